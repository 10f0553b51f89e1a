//! Cell values and their ordering.

use std::cmp::Ordering;

/// One cell of a result row. Backends hand the proxy text-protocol bytes;
/// typed variants exist so the merger can compare and add without reparsing.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn from_str(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    /// Numeric view, when the value is or parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Float(v) => Some(*v as i64),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Merger comparison: NULL sorts first, numbers compare numerically
    /// (cross-type included), everything else by bytes (binary collation).
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (a, b) => match (a.as_numeric(), b.as_numeric()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => a.to_bytes().cmp(&b.to_bytes()),
            },
        }
    }

    /// Sum for SUM/COUNT merging; integer until a float shows up, NULL is
    /// the additive identity.
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) => v.clone(),
            (a, b) => {
                let (ai, bi) = (a.as_int_exact(), b.as_int_exact());
                if let (Some(x), Some(y)) = (ai, bi) {
                    match x.checked_add(y) {
                        Some(sum) => Value::Int(sum),
                        None => Value::Float(x as f64 + y as f64),
                    }
                } else {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(x), Some(y)) => Value::Float(x + y),
                        _ => a.clone(),
                    }
                }
            }
        }
    }

    fn as_numeric(&self) -> Option<f64> {
        match self {
            // bytes only count as numeric if they parse cleanly
            Value::Bytes(b) => {
                let s = std::str::from_utf8(b).ok()?.trim();
                if s.is_empty() {
                    return None;
                }
                s.parse::<f64>().ok()
            }
            other => other.as_f64(),
        }
    }

    fn as_int_exact(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => vec![],
            Value::Int(v) => v.to_string().into_bytes(),
            Value::UInt(v) => v.to_string().into_bytes(),
            Value::Float(v) => v.to_string().into_bytes(),
            Value::Bytes(b) => b.clone(),
        }
    }

    /// Render as a SQL literal (used when splicing prepared-statement
    /// parameters back into text SQL).
    pub fn sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".into(),
            Value::Int(v) => v.to_string(),
            Value::UInt(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bytes(b) => {
                let mut out = String::with_capacity(b.len() + 2);
                out.push('\'');
                for &c in b {
                    match c {
                        b'\'' => out.push_str("''"),
                        b'\\' => out.push_str("\\\\"),
                        b'\0' => out.push_str("\\0"),
                        b'\n' => out.push_str("\\n"),
                        b'\r' => out.push_str("\\r"),
                        _ => out.push(c as char),
                    }
                }
                out.push('\'');
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── ordering ────────────────────────────────────────────────────────

    #[test]
    fn null_sorts_first() {
        assert_eq!(Value::Null.compare(&Value::Int(1)), Ordering::Less);
        assert_eq!(Value::Int(1).compare(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn cross_type_numeric_compare() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::UInt(3).compare(&Value::Int(3)), Ordering::Equal);
        // text-protocol bytes compare numerically when both sides are numbers
        assert_eq!(
            Value::Bytes(b"10".to_vec()).compare(&Value::Bytes(b"9".to_vec())),
            Ordering::Greater
        );
    }

    #[test]
    fn bytes_compare_binary() {
        assert_eq!(
            Value::Bytes(b"abc".to_vec()).compare(&Value::Bytes(b"abd".to_vec())),
            Ordering::Less
        );
    }

    // ── arithmetic ──────────────────────────────────────────────────────

    #[test]
    fn add_null_identity() {
        assert_eq!(Value::Null.add(&Value::Int(5)), Value::Int(5));
        assert_eq!(Value::Int(5).add(&Value::Null), Value::Int(5));
    }

    #[test]
    fn add_stays_integer_until_float() {
        assert_eq!(Value::Int(2).add(&Value::Int(3)), Value::Int(5));
        assert_eq!(Value::Int(2).add(&Value::Float(0.5)), Value::Float(2.5));
        assert_eq!(
            Value::Bytes(b"200".to_vec()).add(&Value::Bytes(b"150".to_vec())),
            Value::Int(350)
        );
    }

    #[test]
    fn add_overflow_widens() {
        let v = Value::Int(i64::MAX).add(&Value::Int(1));
        assert!(matches!(v, Value::Float(_)));
    }

    // ── literals ────────────────────────────────────────────────────────

    #[test]
    fn sql_literal_escapes() {
        assert_eq!(Value::Null.sql_literal(), "NULL");
        assert_eq!(Value::Int(-7).sql_literal(), "-7");
        assert_eq!(Value::from_str("o'ne").sql_literal(), "'o''ne'");
        assert_eq!(Value::from_str("a\\b").sql_literal(), "'a\\\\b'");
    }
}
