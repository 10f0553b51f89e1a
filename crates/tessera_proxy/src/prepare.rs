//! Text-protocol prepared statements.
//!
//! PREPARE counts `?` placeholders by scanning outside strings, quoted
//! identifiers and comments, recording their byte offsets; EXECUTE splices
//! literal parameters back at those offsets and re-enters the query path.

use tessera_common::error::{ExecError, ProxyResult};
use tessera_mysql::Value;

/// A prepared statement, scoped to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub id: u32,
    pub sql: String,
    pub param_count: usize,
    pub offsets: Vec<usize>,
    /// Columns are unknown until execution; reported as 0 at prepare time.
    pub column_count: u16,
}

/// Count placeholders and record their byte offsets.
pub(crate) fn calc_params(sql: &str) -> ProxyResult<(usize, Vec<usize>)> {
    let bytes = sql.as_bytes();
    let mut offsets = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    i += 1;
                }
                i += 1;
            }
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'-' if bytes.get(i + 1) == Some(&b'-')
                && matches!(bytes.get(i + 2), None | Some(b' ') | Some(b'\t') | Some(b'\n')) =>
            {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            b'?' => {
                offsets.push(i);
                i += 1;
            }
            _ => i += 1,
        }
    }

    Ok((offsets.len(), offsets))
}

/// Splice parameter literals into the statement text.
pub(crate) fn bind_params(sql: &str, offsets: &[usize], params: &[Value]) -> ProxyResult<String> {
    if params.len() != offsets.len() {
        return Err(ExecError::MalformedPacket.into());
    }
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut prev = 0;
    for (offset, value) in offsets.iter().zip(params) {
        out.push_str(&sql[prev..*offset]);
        out.push_str(&value.sql_literal());
        prev = offset + 1;
    }
    out.push_str(&sql[prev..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_simple_placeholders() {
        let (n, offsets) = calc_params("SELECT * FROM t WHERE a = ? AND b = ?").unwrap();
        assert_eq!(n, 2);
        assert_eq!(offsets.len(), 2);
        assert_eq!(&"SELECT * FROM t WHERE a = ? AND b = ?"[offsets[0]..offsets[0] + 1], "?");
    }

    #[test]
    fn ignores_placeholders_in_strings_and_comments() {
        let (n, _) = calc_params("SELECT '?' , \"?\" , `a?b` /* ? */ -- ?\n FROM t WHERE x = ?")
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let (n, _) = calc_params(r"SELECT 'a\'?' , x FROM t WHERE y = ?").unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn bind_splices_literals() {
        let sql = "SELECT * FROM t WHERE a = ? AND b = ?";
        let (_, offsets) = calc_params(sql).unwrap();
        let bound = bind_params(
            sql,
            &offsets,
            &[Value::Int(7), Value::from_str("x'y")],
        )
        .unwrap();
        assert_eq!(bound, "SELECT * FROM t WHERE a = 7 AND b = 'x''y'");
    }

    #[test]
    fn bind_with_wrong_arity_fails() {
        let sql = "SELECT ?";
        let (_, offsets) = calc_params(sql).unwrap();
        assert!(bind_params(sql, &offsets, &[]).is_err());
    }

    #[test]
    fn no_placeholders_is_fine() {
        let (n, offsets) = calc_params("SELECT 1").unwrap();
        assert_eq!(n, 0);
        assert_eq!(bind_params("SELECT 1", &offsets, &[]).unwrap(), "SELECT 1");
    }
}
