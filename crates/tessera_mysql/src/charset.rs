//! Charset ↔ collation tables for the SET surface.
//!
//! Deliberately the short list clients actually negotiate; everything else is
//! an unknown-charset error, same as the upstream server answers for a
//! charset it was built without.

/// Default collation name for a charset.
pub fn default_collation(charset: &str) -> Option<&'static str> {
    Some(match charset {
        "utf8" => "utf8_general_ci",
        "utf8mb4" => "utf8mb4_general_ci",
        "latin1" => "latin1_swedish_ci",
        "ascii" => "ascii_general_ci",
        "gbk" => "gbk_chinese_ci",
        "binary" => "binary",
        _ => return None,
    })
}

/// Collation name → numeric collation id.
pub fn collation_id(collation: &str) -> Option<u16> {
    Some(match collation {
        "utf8_general_ci" => 33,
        "utf8_bin" => 83,
        "utf8mb4_general_ci" => 45,
        "utf8mb4_bin" => 46,
        "utf8mb4_unicode_ci" => 224,
        "latin1_swedish_ci" => 8,
        "latin1_bin" => 47,
        "ascii_general_ci" => 11,
        "gbk_chinese_ci" => 28,
        "binary" => 63,
        _ => return None,
    })
}

/// Collation name → the charset it belongs to.
pub fn collation_charset(collation: &str) -> Option<&'static str> {
    Some(match collation {
        "utf8_general_ci" | "utf8_bin" => "utf8",
        "utf8mb4_general_ci" | "utf8mb4_bin" | "utf8mb4_unicode_ci" => "utf8mb4",
        "latin1_swedish_ci" | "latin1_bin" => "latin1",
        "ascii_general_ci" => "ascii",
        "gbk_chinese_ci" => "gbk",
        "binary" => "binary",
        _ => return None,
    })
}

/// Resolve a charset name to `(charset, default collation id)`.
pub fn charset_with_default_id(charset: &str) -> Option<(&'static str, u16)> {
    let col = default_collation(charset)?;
    let id = collation_id(col)?;
    // round-trip through the table so the returned &'static str is canonical
    let cs = collation_charset(col)?;
    Some((cs, id))
}
