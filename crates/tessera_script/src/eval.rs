//! The `${…}` script interpreter: a lexer, a precedence-climbing parser, and
//! an evaluator over a small typed value.

use std::collections::{BTreeMap, BTreeSet};
use tessera_common::error::ScriptError;

/// A concrete value bound to a script variable (one shard-key candidate).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scalar {
    Int(i64),
    Str(String),
}

/// Candidate values per variable; flattening evaluates the expression once
/// per combination.
pub type Bindings = BTreeMap<String, Vec<Scalar>>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    DotDot,
    Comma,
    LParen,
    RParen,
}

fn lex(src: &str) -> Result<Vec<Token>, ScriptError> {
    let mut tokens = Vec::new();
    let bytes = src.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                if bytes.get(i + 1) == Some(&b'.') {
                    tokens.push(Token::DotDot);
                    i += 2;
                } else {
                    return Err(ScriptError::Eval(format!(
                        "unexpected '.' in script {src:?}"
                    )));
                }
            }
            '\'' | '"' => {
                let quote = bytes[i];
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end] != quote {
                    end += 1;
                }
                if end == bytes.len() {
                    return Err(ScriptError::Eval(format!(
                        "unterminated string in script {src:?}"
                    )));
                }
                tokens.push(Token::Str(src[start..end].to_string()));
                i = end + 1;
            }
            '0'..='9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let text = &src[start..i];
                let v = text.parse::<i64>().map_err(|_| {
                    ScriptError::Eval(format!("integer literal {text} out of range"))
                })?;
                tokens.push(Token::Int(v));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(src[start..i].to_string()));
            }
            other => {
                return Err(ScriptError::Eval(format!(
                    "unexpected character {other:?} in script {src:?}"
                )))
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Int(i64),
    Str(String),
    Var(String),
    Neg(Box<Node>),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Mod(Box<Node>, Box<Node>),
    Range(Box<Node>, Box<Node>),
    List(Vec<Node>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // script := range_expr (',' range_expr)*
    fn script(&mut self) -> Result<Node, ScriptError> {
        let first = self.range_expr()?;
        if self.peek() != Some(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            items.push(self.range_expr()?);
        }
        Ok(Node::List(items))
    }

    // range_expr := sum ('..' sum)?
    fn range_expr(&mut self) -> Result<Node, ScriptError> {
        let lo = self.sum()?;
        if self.eat(&Token::DotDot) {
            let hi = self.sum()?;
            return Ok(Node::Range(Box::new(lo), Box::new(hi)));
        }
        Ok(lo)
    }

    fn sum(&mut self) -> Result<Node, ScriptError> {
        let mut node = self.term()?;
        loop {
            if self.eat(&Token::Plus) {
                node = Node::Add(Box::new(node), Box::new(self.term()?));
            } else if self.eat(&Token::Minus) {
                node = Node::Sub(Box::new(node), Box::new(self.term()?));
            } else {
                return Ok(node);
            }
        }
    }

    fn term(&mut self) -> Result<Node, ScriptError> {
        let mut node = self.factor()?;
        loop {
            if self.eat(&Token::Star) {
                node = Node::Mul(Box::new(node), Box::new(self.factor()?));
            } else if self.eat(&Token::Slash) {
                node = Node::Div(Box::new(node), Box::new(self.factor()?));
            } else if self.eat(&Token::Percent) {
                node = Node::Mod(Box::new(node), Box::new(self.factor()?));
            } else {
                return Ok(node);
            }
        }
    }

    fn factor(&mut self) -> Result<Node, ScriptError> {
        match self.next() {
            Some(Token::Int(v)) => Ok(Node::Int(v)),
            Some(Token::Str(s)) => Ok(Node::Str(s)),
            Some(Token::Ident(name)) => Ok(Node::Var(name)),
            Some(Token::Minus) => Ok(Node::Neg(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.range_expr()?;
                if !self.eat(&Token::RParen) {
                    return Err(ScriptError::Eval("expected ')'".into()));
                }
                Ok(inner)
            }
            other => Err(ScriptError::Eval(format!(
                "unexpected token {other:?} in script"
            ))),
        }
    }
}

/// Intermediate evaluation value.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    fn flatten_into(&self, out: &mut Vec<String>) {
        match self {
            Value::Int(v) => out.push(v.to_string()),
            Value::Str(s) => out.push(s.clone()),
            Value::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }
}

/// A compiled `${…}` fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScript {
    raw: String,
    root: Node,
}

impl CompiledScript {
    pub fn compile(raw: &str) -> Result<Self, ScriptError> {
        let tokens = lex(raw)?;
        if tokens.is_empty() {
            return Err(ScriptError::Eval("empty script".into()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.script()?;
        if parser.pos != parser.tokens.len() {
            return Err(ScriptError::Eval(format!(
                "trailing input in script {raw:?}"
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
            root,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Variables referenced by this script.
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        collect_vars(&self.root, &mut out);
        out
    }

    /// Evaluate under a single-value environment, yielding the string list
    /// this fragment expands to.
    pub fn execute(&self, env: &BTreeMap<String, Scalar>) -> Result<Vec<String>, ScriptError> {
        let value = eval(&self.root, env)?;
        let mut out = Vec::new();
        value.flatten_into(&mut out);
        Ok(out)
    }
}

fn collect_vars<'a>(node: &'a Node, out: &mut BTreeSet<&'a str>) {
    match node {
        Node::Var(name) => {
            out.insert(name.as_str());
        }
        Node::Neg(a) => collect_vars(a, out),
        Node::Add(a, b)
        | Node::Sub(a, b)
        | Node::Mul(a, b)
        | Node::Div(a, b)
        | Node::Mod(a, b)
        | Node::Range(a, b) => {
            collect_vars(a, out);
            collect_vars(b, out);
        }
        Node::List(items) => {
            for item in items {
                collect_vars(item, out);
            }
        }
        Node::Int(_) | Node::Str(_) => {}
    }
}

fn eval(node: &Node, env: &BTreeMap<String, Scalar>) -> Result<Value, ScriptError> {
    match node {
        Node::Int(v) => Ok(Value::Int(*v)),
        Node::Str(s) => Ok(Value::Str(s.clone())),
        Node::Var(name) => match env.get(name) {
            Some(Scalar::Int(v)) => Ok(Value::Int(*v)),
            Some(Scalar::Str(s)) => Ok(Value::Str(s.clone())),
            None => Err(ScriptError::Eval(format!("unbound variable {name}"))),
        },
        Node::Neg(a) => match eval(a, env)? {
            Value::Int(v) => Ok(Value::Int(-v)),
            other => Err(ScriptError::Eval(format!("cannot negate {other:?}"))),
        },
        Node::Add(a, b) => {
            let (a, b) = (eval(a, env)?, eval(b, env)?);
            match (a, b) {
                (Value::Int(x), Value::Int(y)) => Ok(Value::Int(x.wrapping_add(y))),
                (Value::Str(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
                (Value::Str(x), Value::Int(y)) => Ok(Value::Str(format!("{x}{y}"))),
                (Value::Int(x), Value::Str(y)) => Ok(Value::Str(format!("{x}{y}"))),
                (a, b) => Err(ScriptError::Eval(format!("cannot add {a:?} and {b:?}"))),
            }
        }
        Node::Sub(a, b) => int_op(a, b, env, "-", |x, y| Some(x.wrapping_sub(y))),
        Node::Mul(a, b) => int_op(a, b, env, "*", |x, y| Some(x.wrapping_mul(y))),
        Node::Div(a, b) => int_op(a, b, env, "/", |x, y| x.checked_div(y)),
        Node::Mod(a, b) => int_op(a, b, env, "%", |x, y| x.checked_rem(y)),
        Node::Range(a, b) => {
            let (lo, hi) = match (eval(a, env)?, eval(b, env)?) {
                (Value::Int(x), Value::Int(y)) => (x, y),
                (a, b) => {
                    return Err(ScriptError::Eval(format!(
                        "range bounds must be integers, got {a:?}..{b:?}"
                    )))
                }
            };
            let items: Vec<Value> = if lo <= hi {
                (lo..=hi).map(Value::Int).collect()
            } else {
                (hi..=lo).rev().map(Value::Int).collect()
            };
            Ok(Value::List(items))
        }
        Node::List(nodes) => {
            let mut items = Vec::with_capacity(nodes.len());
            for n in nodes {
                items.push(eval(n, env)?);
            }
            Ok(Value::List(items))
        }
    }
}

fn int_op(
    a: &Node,
    b: &Node,
    env: &BTreeMap<String, Scalar>,
    op: &str,
    f: impl Fn(i64, i64) -> Option<i64>,
) -> Result<Value, ScriptError> {
    match (eval(a, env)?, eval(b, env)?) {
        (Value::Int(x), Value::Int(y)) => f(x, y)
            .map(Value::Int)
            .ok_or_else(|| ScriptError::Eval(format!("{x} {op} {y} is undefined"))),
        (a, b) => Err(ScriptError::Eval(format!(
            "operator {op} needs integers, got {a:?} and {b:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, i64)]) -> BTreeMap<String, Scalar> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Scalar::Int(*v)))
            .collect()
    }

    // ── literals and arithmetic ─────────────────────────────────────────

    #[test]
    fn integer_arithmetic() {
        let s = CompiledScript::compile("1 + 2 * 3").unwrap();
        assert_eq!(s.execute(&BTreeMap::new()).unwrap(), vec!["7"]);

        let s = CompiledScript::compile("(1 + 2) * 3").unwrap();
        assert_eq!(s.execute(&BTreeMap::new()).unwrap(), vec!["9"]);

        let s = CompiledScript::compile("-4 % 3").unwrap();
        assert_eq!(s.execute(&BTreeMap::new()).unwrap(), vec!["-1"]);
    }

    #[test]
    fn division_by_zero_errors() {
        let s = CompiledScript::compile("1 / 0").unwrap();
        assert!(s.execute(&BTreeMap::new()).is_err());
        let s = CompiledScript::compile("1 % 0").unwrap();
        assert!(s.execute(&BTreeMap::new()).is_err());
    }

    // ── ranges and lists ────────────────────────────────────────────────

    #[test]
    fn inclusive_range() {
        let s = CompiledScript::compile("0..3").unwrap();
        assert_eq!(s.execute(&BTreeMap::new()).unwrap(), vec!["0", "1", "2", "3"]);
    }

    #[test]
    fn descending_range() {
        let s = CompiledScript::compile("2..0").unwrap();
        assert_eq!(s.execute(&BTreeMap::new()).unwrap(), vec!["2", "1", "0"]);
    }

    #[test]
    fn comma_list() {
        let s = CompiledScript::compile("1, 3, 7").unwrap();
        assert_eq!(s.execute(&BTreeMap::new()).unwrap(), vec!["1", "3", "7"]);
    }

    #[test]
    fn list_of_strings() {
        let s = CompiledScript::compile("'a', 'b'").unwrap();
        assert_eq!(s.execute(&BTreeMap::new()).unwrap(), vec!["a", "b"]);
    }

    // ── variables ───────────────────────────────────────────────────────

    #[test]
    fn variable_arithmetic() {
        let s = CompiledScript::compile("id % 4").unwrap();
        assert_eq!(s.execute(&env(&[("id", 7)])).unwrap(), vec!["3"]);
        assert_eq!(s.variables().into_iter().collect::<Vec<_>>(), vec!["id"]);
    }

    #[test]
    fn unbound_variable_errors() {
        let s = CompiledScript::compile("id % 4").unwrap();
        assert!(s.execute(&BTreeMap::new()).is_err());
    }

    #[test]
    fn string_concat() {
        let s = CompiledScript::compile("'u' + id").unwrap();
        assert_eq!(s.execute(&env(&[("id", 5)])).unwrap(), vec!["u5"]);
    }

    // ── lex/parse failures ──────────────────────────────────────────────

    #[test]
    fn bad_scripts_fail_to_compile() {
        assert!(CompiledScript::compile("").is_err());
        assert!(CompiledScript::compile("1 +").is_err());
        assert!(CompiledScript::compile("(1").is_err());
        assert!(CompiledScript::compile("1 @ 2").is_err());
        assert!(CompiledScript::compile("'open").is_err());
    }
}
