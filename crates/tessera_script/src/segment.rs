//! Template scanning: split an inline expression into segment groups.

use crate::eval::CompiledScript;
use tessera_common::error::ScriptError;

/// One `(prefix, optional script)` piece of a group.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Segment {
    pub prefix: String,
    pub script: Option<CompiledScript>,
}

/// A comma-separated alternative within the expression.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct SegmentGroup {
    pub segments: Vec<Segment>,
}

#[derive(Default)]
struct SplitContext {
    prefix: String,
    raw_script: String,
    segments: Vec<Segment>,
}

impl SplitContext {
    fn flush_segment(&mut self) -> Result<(), ScriptError> {
        let prefix = self.prefix.trim().to_string();
        let raw = self.raw_script.trim().to_string();
        self.prefix.clear();
        self.raw_script.clear();

        if prefix.is_empty() && raw.is_empty() {
            return Ok(());
        }
        let script = if raw.is_empty() {
            None
        } else {
            Some(CompiledScript::compile(&raw)?)
        };
        self.segments.push(Segment { prefix, script });
        Ok(())
    }

    fn flush_group(&mut self) -> Result<SegmentGroup, ScriptError> {
        self.flush_segment()?;
        Ok(SegmentGroup {
            segments: std::mem::take(&mut self.segments),
        })
    }
}

/// Single left-to-right scan with `prefix`/`raw_script` accumulators and the
/// `in_script`/`script_start` flags.
pub(crate) fn split_segments(exp: &str) -> Result<Vec<SegmentGroup>, ScriptError> {
    let mut in_script = false;
    let mut script_start = false;
    let mut include_splitter = false;
    let exp_len = exp.chars().count();

    let syntax_error = |message: &str, index: usize| ScriptError::Syntax {
        message: message.to_string(),
        char_index: index,
        expression: exp.to_string(),
    };

    let mut groups = Vec::new();
    let mut ctx = SplitContext::default();
    let chars: Vec<char> = exp.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        match c {
            '$' => {
                if in_script {
                    return Err(syntax_error("should not appear symbol '$'", i));
                }
                if chars.get(i + 1) == Some(&'{') {
                    in_script = true;
                    script_start = true;
                } else {
                    return Err(syntax_error("'{' symbol is missing after the symbol '$'", i));
                }
            }
            '{' => {
                if in_script {
                    if script_start {
                        script_start = false; // the opener itself
                    } else {
                        ctx.raw_script.push(c);
                    }
                } else {
                    ctx.prefix.push(c);
                }
            }
            '}' => {
                if in_script {
                    in_script = false;
                    ctx.flush_segment()
                        .map_err(|e| syntax_error(&e.to_string(), i))?;
                    include_splitter = false;
                } else {
                    return Err(syntax_error("should not appear symbol '}'", i));
                }
            }
            '.' => {
                if i == 0 || i == exp_len - 1 {
                    return Err(syntax_error(
                        "should not appear symbol '.' at beginning and end of the inline expression",
                        i,
                    ));
                }
                if in_script {
                    ctx.raw_script.push(c);
                } else {
                    if include_splitter {
                        return Err(syntax_error("should not appear symbol '.'", i));
                    }
                    include_splitter = true;
                    ctx.prefix.push(c);
                }
            }
            ',' => {
                if in_script {
                    ctx.raw_script.push(c);
                } else {
                    let g = ctx
                        .flush_group()
                        .map_err(|e| syntax_error(&e.to_string(), i))?;
                    groups.push(g);
                    include_splitter = false;
                }
            }
            _ => {
                if in_script {
                    ctx.raw_script.push(c);
                } else {
                    ctx.prefix.push(c);
                }
            }
        }
    }

    if in_script {
        return Err(syntax_error("'}' symbol is missing", exp_len));
    }

    let g = ctx
        .flush_group()
        .map_err(|e| syntax_error(&e.to_string(), exp_len))?;
    groups.push(g);
    Ok(groups)
}
