//! The SET statement surface.
//!
//! Clients (and every connector library on connect) issue a zoo of SET
//! statements; this module interprets the session-variable schema, treats
//! the compatibility knobs as logged no-ops, and rejects what the proxy
//! genuinely cannot honor. Unknown variables are accepted silently to keep
//! old clients working.

use tessera_common::error::{ExecError, ProxyError, ProxyResult};
use tessera_mysql::charset;
use tessera_mysql::QueryResult;
use tessera_mysql::SERVER_STATUS_AUTOCOMMIT;
use tessera_mysql::SERVER_STATUS_IN_TRANS;

use crate::session::{SessionExecutor, VarValue};

impl SessionExecutor {
    pub(crate) async fn handle_set(&mut self, sql: &str) -> ProxyResult<QueryResult> {
        let body = strip_leading_keyword(sql, "set")
            .ok_or_else(|| ProxyError::Parse(format!("malformed SET: {sql}")))?;

        if let Some(rest) = strip_leading_keyword(body, "names") {
            return self.handle_set_names(rest).await;
        }

        for assignment in split_assignments(body) {
            self.apply_assignment(&assignment).await?;
        }
        Ok(self.ok_result(0, 0))
    }

    async fn handle_set_names(&mut self, rest: &str) -> ProxyResult<QueryResult> {
        let mut tokens = tokenize(rest);
        let cs = tokens
            .next()
            .ok_or_else(|| ProxyError::Parse("SET NAMES without a charset".into()))?;
        let cs = if cs.eq_ignore_ascii_case("default") {
            self.namespace.config.default_charset.clone()
        } else {
            cs.to_lowercase()
        };

        let collation = match tokens.next() {
            Some(word) if word.eq_ignore_ascii_case("collate") => {
                let col = tokens
                    .next()
                    .ok_or_else(|| ProxyError::Parse("COLLATE without a collation".into()))?;
                if col.eq_ignore_ascii_case("default") {
                    None
                } else {
                    Some(col.to_lowercase())
                }
            }
            _ => None,
        };

        match collation {
            Some(col) => {
                let id = charset::collation_id(&col)
                    .ok_or_else(|| ExecError::UnknownCharset(cs.clone()))?;
                let col_cs = charset::collation_charset(&col)
                    .ok_or_else(|| ExecError::UnknownCharset(cs.clone()))?;
                if col_cs != cs {
                    return Err(ExecError::UnknownCharset(cs).into());
                }
                self.charset = cs;
                self.collation_id = id;
            }
            None => {
                let (canonical, id) = charset::charset_with_default_id(&cs)
                    .ok_or_else(|| ExecError::UnknownCharset(cs.clone()))?;
                self.charset = canonical.to_string();
                self.collation_id = id;
            }
        }
        Ok(self.ok_result(0, 0))
    }

    async fn apply_assignment(&mut self, assignment: &Assignment) -> ProxyResult<()> {
        if assignment.global {
            return Err(ExecError::VariableReadonly(format!(
                "GLOBAL {}",
                assignment.name
            ))
            .into());
        }
        let name = assignment.name.as_str();
        let value = assignment.value.as_str();
        let lowered = value.to_lowercase();

        match name {
            "character_set_client" | "character_set_connection" | "character_set_results" => {
                if lowered == "null" {
                    if name == "character_set_results" {
                        return Ok(()); // NULL means "no conversion"
                    }
                    return Err(ExecError::UnknownCharset(lowered).into());
                }
                if lowered == "default" {
                    self.charset = self.namespace.config.default_charset.clone();
                    self.collation_id = self.namespace.config.default_collation_id;
                    return Ok(());
                }
                let (canonical, id) = charset::charset_with_default_id(&lowered)
                    .ok_or_else(|| ExecError::UnknownCharset(lowered.clone()))?;
                self.charset = canonical.to_string();
                self.collation_id = id;
                Ok(())
            }
            "autocommit" => match lowered.as_str() {
                "on" | "1" | "default" => self.set_autocommit(true).await,
                "off" | "0" => self.set_autocommit(false).await,
                _ => Err(ExecError::WrongValueForVar {
                    name: name.into(),
                    value: value.into(),
                }
                .into()),
            },
            "sql_mode" => {
                self.session_vars
                    .insert(name.into(), VarValue::Str(value.to_string()));
                Ok(())
            }
            "sql_safe_updates" => {
                let v = on_off_value(&lowered).ok_or_else(|| ExecError::WrongValueForVar {
                    name: name.into(),
                    value: value.into(),
                })?;
                self.session_vars.insert(name.into(), VarValue::Int(v));
                Ok(())
            }
            "time_zone" => {
                self.session_vars
                    .insert(name.into(), VarValue::Str(value.to_string()));
                Ok(())
            }
            "max_allowed_packet" => {
                Err(ExecError::VariableReadonly("max_allowed_packet".into()).into())
            }
            "wait_timeout" | "interactive_timeout" | "net_write_timeout" | "net_read_timeout"
            | "sql_select_limit" => {
                tracing::debug!(variable = name, value, "accepted as a no-op");
                Ok(())
            }
            "transaction" => Err(ExecError::CmdUnsupported.into()),
            "general_log" => {
                let v = on_off_value(&lowered).ok_or_else(|| ExecError::WrongValueForVar {
                    name: name.into(),
                    value: value.into(),
                })?;
                self.general_log = v != 0;
                Ok(())
            }
            _ => {
                tracing::debug!(variable = name, value, "unknown variable accepted silently");
                Ok(())
            }
        }
    }

    /// Re-enabling autocommit mid-transaction commits implicitly: the pinned
    /// connections get their autocommit back and return to their pools.
    pub(crate) async fn set_autocommit(&mut self, on: bool) -> ProxyResult<()> {
        if on {
            self.status |= SERVER_STATUS_AUTOCOMMIT;
            self.status &= !SERVER_STATUS_IN_TRANS;
            let conns = std::mem::take(&mut self.tx_conns);
            for (slice, mut pc) in conns {
                match pc.conn().set_autocommit(true).await {
                    Ok(()) => pc.recycle(),
                    Err(err) => {
                        tracing::warn!(slice = %slice, error = %err, "set autocommit failed");
                        pc.discard();
                    }
                }
            }
            self.poisoned = false;
        } else {
            self.status &= !SERVER_STATUS_AUTOCOMMIT;
        }
        Ok(())
    }
}

fn on_off_value(value: &str) -> Option<i64> {
    match value {
        "on" | "1" => Some(1),
        "off" | "0" => Some(0),
        _ => None,
    }
}

/// One `name = value` in a SET list.
struct Assignment {
    global: bool,
    name: String,
    value: String,
}

/// Strip a leading keyword (case-insensitive), returning the rest.
fn strip_leading_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let trimmed = sql.trim_start();
    if trimmed.len() < keyword.len() {
        return None;
    }
    let (head, rest) = trimmed.split_at(keyword.len());
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    if rest
        .chars()
        .next()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false)
    {
        return None;
    }
    Some(rest.trim_start())
}

/// Split on top-level commas, respecting quotes.
fn split_assignments(body: &str) -> Vec<Assignment> {
    let mut parts = Vec::new();
    let mut depth_quote: Option<char> = None;
    let mut current = String::new();
    for c in body.chars() {
        match depth_quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    depth_quote = None;
                }
            }
            None => match c {
                '\'' | '"' | '`' => {
                    depth_quote = Some(c);
                    current.push(c);
                }
                ',' => {
                    parts.push(std::mem::take(&mut current));
                    continue;
                }
                _ => current.push(c),
            },
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }

    parts
        .into_iter()
        .filter_map(|part| parse_assignment(&part))
        .collect()
}

fn parse_assignment(part: &str) -> Option<Assignment> {
    let (name, value) = part.split_once('=')?;
    let mut name = name.trim().to_lowercase();
    let value = unquote(value.trim());

    let mut global = false;
    for prefix in ["@@global.", "global "] {
        if let Some(rest) = name.strip_prefix(prefix) {
            global = true;
            name = rest.trim().to_string();
        }
    }
    for prefix in ["@@session.", "@@local.", "@@", "session ", "local "] {
        if let Some(rest) = name.strip_prefix(prefix) {
            name = rest.trim().to_string();
        }
    }

    Some(Assignment {
        global,
        name,
        value,
    })
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && matches!(first, b'\'' | b'"' | b'`') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

/// Whitespace tokenizer that strips quotes from each token.
fn tokenize(input: &str) -> impl Iterator<Item = String> + '_ {
    input.split_whitespace().map(unquote)
}
