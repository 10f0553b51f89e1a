//! SQL fingerprinting for the blacklist and per-statement metrics.
//!
//! Canonical form: keywords and identifiers lowercased, comments dropped,
//! whitespace collapsed, string and numeric literals replaced by `?`, and
//! `IN (?, ?, …)` collapsed to `in (?+)` so list width doesn't split the
//! fingerprint space.

/// Compute the canonical fingerprint of a statement.
pub fn fingerprint(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    let mut last_emitted: char = ' ';

    let mut push = |out: &mut String, c: char, last: &mut char| {
        if c == ' ' {
            if *last == ' ' {
                return;
            }
        }
        out.push(c);
        *last = c;
    };

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' | b'"' => {
                // quoted string literal -> ?
                let quote = c;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == b'\\' {
                        i += 2;
                        continue;
                    }
                    if bytes[i] == quote {
                        // doubled quote stays inside the literal
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
                push(&mut out, '?', &mut last_emitted);
            }
            b'`' => {
                // backquoted identifier: keep, lowercased, without quotes
                i += 1;
                while i < bytes.len() && bytes[i] != b'`' {
                    push(&mut out, (bytes[i] as char).to_ascii_lowercase(), &mut last_emitted);
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
                push(&mut out, ' ', &mut last_emitted);
            }
            b'0'..=b'9'
                if !last_emitted.is_ascii_alphanumeric() && last_emitted != '_' && last_emitted != '?' =>
            {
                // numeric literal (digits, decimal point, exponent) -> ?
                while i < bytes.len()
                    && (bytes[i].is_ascii_digit()
                        || bytes[i] == b'.'
                        || bytes[i] == b'e'
                        || bytes[i] == b'E')
                {
                    i += 1;
                }
                push(&mut out, '?', &mut last_emitted);
            }
            b' ' | b'\t' | b'\n' | b'\r' => {
                push(&mut out, ' ', &mut last_emitted);
                i += 1;
            }
            _ => {
                push(&mut out, (c as char).to_ascii_lowercase(), &mut last_emitted);
                i += 1;
            }
        }
    }

    collapse_in_lists(out.trim().to_string())
}

/// Rewrite `in (?, ?, ?)` (any arity) as `in (?+)`.
fn collapse_in_lists(s: String) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s.as_str();
    while let Some(idx) = rest.find("in (?") {
        let (head, tail) = rest.split_at(idx);
        // word boundary: don't collapse `min (?)` and friends
        if head
            .chars()
            .last()
            .map(|c| c.is_ascii_alphanumeric() || c == '_')
            .unwrap_or(false)
        {
            out.push_str(head);
            out.push_str("in (?");
            rest = &tail["in (?".len()..];
            continue;
        }
        out.push_str(head);
        // scan the parenthesized placeholder list
        let mut chars = tail["in (?".len()..].chars();
        let mut consumed = "in (?".len();
        let mut only_placeholders = true;
        for c in chars.by_ref() {
            consumed += c.len_utf8();
            match c {
                ')' => break,
                '?' | ',' | ' ' => {}
                _ => {
                    only_placeholders = false;
                    break;
                }
            }
        }
        if only_placeholders && tail[..consumed].ends_with(')') {
            out.push_str("in (?+)");
            rest = &tail[consumed..];
        } else {
            out.push_str(&tail[..consumed]);
            rest = &tail[consumed..];
        }
    }
    out.push_str(rest);
    out
}
