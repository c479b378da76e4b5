//! The textual query expression language: `all` / `none` / conditions /
//! piped refinement / fallback, plus an alias table that rewrites `@name`
//! tokens before parsing.
//!
//! The grammar:
//!
//! ```text
//! expression := "all" | "none" | "''" | "\"\""
//!             | condition
//!             | expression "|" (expression | function)
//!             | expression "?:" expression
//!             | "(" expression ")"
//! condition  := or_expr
//! or_expr    := and_expr ("or" and_expr)*
//! and_expr   := atom ("and" atom)*
//! atom       := "[" or_expr "]" | attr op value
//! ```
//!
//! Conditions evaluate against [`Representation::attribute`]; a missing
//! attribute makes the clause false rather than raising an error.

use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::Catalog;
use crate::error::{RewindError, Result};
use crate::representation::{AttributeValue, Representation};

// --- Alias table --------------------------------------------------------

lazy_static! {
    static ref ALIAS_TOKEN_RE: Regex = Regex::new(r"@([\w<>=\-]+[?!]?)").unwrap();
    static ref ITAG_PATTERN: Regex = Regex::new(r"^(\d+)$").unwrap();
    static ref QUALITY_FPS_PATTERN: Regex = Regex::new(r"^(\d+)p(\d+)$").unwrap();
    static ref QUALITY_OP_PATTERN: Regex = Regex::new(r"^([<>=]=?)(\d+)p$").unwrap();
    static ref QUALITY_PATTERN: Regex = Regex::new(r"^(\d+)p$").unwrap();
    static ref FPS_PATTERN: Regex = Regex::new(r"^(\d+)fps$").unwrap();
}

/// Looks up a named alias, either from the fixed table or by matching one of
/// the parametrized patterns (`@137` → `itag = 137`, `@1080p30` → `[height =
/// 1080 and frame_rate = 30]`, and so on).
fn lookup_alias(name: &str) -> Option<String> {
    let fixed: Option<&str> = match name {
        "mp4" => Some("format = mp4"),
        "webm" => Some("format = webm"),
        "mp4a" => Some("codecs contains mp4a"),
        "avc1" => Some("codecs contains avc1"),
        "vp9" => Some("codecs = vp9"),
        "low" => Some("height = 144"),
        "medium" => Some("height = 480"),
        "high" => Some("height = 720"),
        "FHD" => Some("height = 1080"),
        "2K" => Some("height = 1440"),
        "4K" => Some("height = 2160"),
        _ => None,
    };
    if let Some(v) = fixed {
        return Some(v.to_string());
    }
    if let Some(c) = QUALITY_FPS_PATTERN.captures(name) {
        return Some(format!("[height = {} and frame_rate = {}]", &c[1], &c[2]));
    }
    if let Some(c) = QUALITY_OP_PATTERN.captures(name) {
        return Some(format!("height {} {}", &c[1], &c[2]));
    }
    if let Some(c) = QUALITY_PATTERN.captures(name) {
        return Some(format!("height = {}", &c[1]));
    }
    if let Some(c) = FPS_PATTERN.captures(name) {
        return Some(format!("frame_rate = {}", &c[1]));
    }
    if let Some(c) = ITAG_PATTERN.captures(name) {
        return Some(format!("itag = {}", &c[1]));
    }
    None
}

/// Expands every `@name` token in `expression`, recursively, until none
/// remain. Fails with `AliasResolutionError` on an unknown alias or a
/// circular expansion.
pub fn expand_aliases(expression: &str) -> Result<String> {
    expand_aliases_inner(expression, &mut Vec::new())
}

fn expand_aliases_inner(expression: &str, expanding: &mut Vec<String>) -> Result<String> {
    let mut resolved = expression.to_string();
    let matches: Vec<(String, String)> = ALIAS_TOKEN_RE
        .captures_iter(expression)
        .map(|c| (c.get(0).unwrap().as_str().to_string(), c[1].to_string()))
        .collect();

    if matches.is_empty() {
        return Ok(resolved);
    }

    for (full, name) in matches {
        if expanding.contains(&name) {
            return Err(RewindError::AliasResolutionError(format!(
                "circular alias @{name}"
            )));
        }
        let value = lookup_alias(&name)
            .ok_or_else(|| RewindError::AliasResolutionError(format!("unknown alias @{name}")))?;
        expanding.push(name.clone());
        resolved = resolved.replacen(&full, &value, 1);
        if !ALIAS_TOKEN_RE.is_match(&value) {
            expanding.pop();
        }
    }

    if ALIAS_TOKEN_RE.is_match(&resolved) {
        expand_aliases_inner(&resolved, expanding)
    } else {
        Ok(resolved)
    }
}

// --- AST -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
}

#[derive(Debug, Clone)]
struct Clause {
    attribute: String,
    op: Op,
    value: String,
}

#[derive(Debug, Clone)]
enum Cond {
    Clause(Clause),
    And(Vec<Cond>),
    Or(Vec<Cond>),
}

#[derive(Debug, Clone)]
enum Stage {
    Expr(Expr),
    Function(String),
}

#[derive(Debug, Clone)]
enum Expr {
    All,
    None,
    Condition(Cond),
    Pipe(Vec<Stage>),
    Fallback(Vec<Expr>),
    Group(Box<Expr>),
}

// --- Tokenizer -------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    All,
    None,
    Pipe,
    Fallback,
    LParen,
    RParen,
    LBracket,
    RBracket,
    And,
    Or,
    Ident(String),
    Op(String),
    Value(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '\'' if chars.get(i + 1) == Some(&'\'') => {
                tokens.push(Token::None);
                i += 2;
            }
            '"' if chars.get(i + 1) == Some(&'"') => {
                tokens.push(Token::None);
                i += 2;
            }
            '?' if chars.get(i + 1) == Some(&':') => {
                tokens.push(Token::Fallback);
                i += 2;
            }
            '=' | '!' | '<' | '>' => {
                let mut op = String::new();
                op.push(c);
                i += 1;
                if chars.get(i) == Some(&'=') && c != '=' {
                    op.push('=');
                    i += 1;
                } else if c == '=' {
                    // bare '=' is already a complete operator
                }
                tokens.push(Token::Op(op));
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() && !"()[]|".contains(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                match word.as_str() {
                    "all" => tokens.push(Token::All),
                    "none" => tokens.push(Token::None),
                    "and" => tokens.push(Token::And),
                    "or" => tokens.push(Token::Or),
                    _ => {
                        // Either an attribute/function identifier or a bare value,
                        // disambiguated by the parser from position.
                        if tokens.last().map(|t| matches!(t, Token::Op(_))) == Some(true) {
                            tokens.push(Token::Value(word));
                        } else {
                            tokens.push(Token::Ident(word));
                        }
                    }
                }
            }
        }
    }
    Ok(tokens)
}

// --- Parser ----------------------------------------------------------------

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
        self.pos += 1;
        t
    }

    fn expect(&mut self, t: &Token) -> Result<()> {
        match self.next() {
            Some(ref tok) if tok == t => Ok(()),
            other => Err(RewindError::QuerySyntaxError(format!(
                "expected {t:?}, found {other:?}"
            ))),
        }
    }

    fn parse_query(&mut self) -> Result<Expr> {
        let expr = self.parse_fallback()?;
        if self.pos != self.tokens.len() {
            return Err(RewindError::QuerySyntaxError(format!(
                "unexpected trailing tokens at position {}",
                self.pos
            )));
        }
        Ok(expr)
    }

    fn parse_fallback(&mut self) -> Result<Expr> {
        let mut branches = vec![self.parse_pipe()?];
        while matches!(self.peek(), Some(Token::Fallback)) {
            self.next();
            branches.push(self.parse_pipe()?);
        }
        if branches.len() == 1 {
            Ok(branches.pop().unwrap())
        } else {
            Ok(Expr::Fallback(branches))
        }
    }

    fn parse_pipe(&mut self) -> Result<Expr> {
        let first = self.parse_atom_expr()?;
        let mut stages = vec![Stage::Expr(first)];
        while matches!(self.peek(), Some(Token::Pipe)) {
            self.next();
            stages.push(self.parse_stage()?);
        }
        if stages.len() == 1 {
            match stages.pop().unwrap() {
                Stage::Expr(e) => Ok(e),
                Stage::Function(name) => Err(RewindError::QuerySyntaxError(format!(
                    "function '{name}' cannot be the first stage of a query"
                ))),
            }
        } else {
            Ok(Expr::Pipe(stages))
        }
    }

    fn parse_stage(&mut self) -> Result<Stage> {
        // A bare identifier not followed by a comparison operator is a
        // function reference (e.g. `best`); otherwise it's a condition.
        if let Some(Token::Ident(name)) = self.peek() {
            if !matches!(self.tokens.get(self.pos + 1), Some(Token::Op(_))) {
                let name = name.clone();
                self.next();
                return Ok(Stage::Function(name));
            }
        }
        Ok(Stage::Expr(self.parse_atom_expr()?))
    }

    fn parse_atom_expr(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::All) => {
                self.next();
                Ok(Expr::All)
            }
            Some(Token::None) => {
                self.next();
                Ok(Expr::None)
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_fallback()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Group(Box::new(inner)))
            }
            _ => Ok(Expr::Condition(self.parse_or_cond()?)),
        }
    }

    fn parse_or_cond(&mut self) -> Result<Cond> {
        let mut branches = vec![self.parse_and_cond()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.next();
            branches.push(self.parse_and_cond()?);
        }
        if branches.len() == 1 {
            Ok(branches.pop().unwrap())
        } else {
            Ok(Cond::Or(branches))
        }
    }

    fn parse_and_cond(&mut self) -> Result<Cond> {
        let mut branches = vec![self.parse_cond_atom()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.next();
            branches.push(self.parse_cond_atom()?);
        }
        if branches.len() == 1 {
            Ok(branches.pop().unwrap())
        } else {
            Ok(Cond::And(branches))
        }
    }

    fn parse_cond_atom(&mut self) -> Result<Cond> {
        match self.peek() {
            Some(Token::LBracket) => {
                self.next();
                let inner = self.parse_or_cond()?;
                self.expect(&Token::RBracket)?;
                Ok(inner)
            }
            _ => self.parse_clause(),
        }
    }

    fn parse_clause(&mut self) -> Result<Cond> {
        let attribute = match self.next() {
            Some(Token::Ident(name)) => name,
            other => {
                return Err(RewindError::QuerySyntaxError(format!(
                    "expected attribute name, found {other:?}"
                )))
            }
        };
        let op = match self.next() {
            Some(Token::Op(s)) => match s.as_str() {
                "=" => Op::Eq,
                "!=" => Op::Ne,
                "<" => Op::Lt,
                "<=" => Op::Le,
                ">" => Op::Gt,
                ">=" => Op::Ge,
                other => {
                    return Err(RewindError::QuerySyntaxError(format!(
                        "unknown operator '{other}'"
                    )))
                }
            },
            Some(Token::Ident(s)) => match s.as_str() {
                "eq" => Op::Eq,
                "ne" => Op::Ne,
                "lt" => Op::Lt,
                "le" => Op::Le,
                "gt" => Op::Gt,
                "ge" => Op::Ge,
                "contains" => Op::Contains,
                other => {
                    return Err(RewindError::QuerySyntaxError(format!(
                        "unknown operator '{other}'"
                    )))
                }
            },
            other => {
                return Err(RewindError::QuerySyntaxError(format!(
                    "expected comparison operator, found {other:?}"
                )))
            }
        };
        let value = match self.next() {
            Some(Token::Value(v)) | Some(Token::Ident(v)) => v,
            other => {
                return Err(RewindError::QuerySyntaxError(format!(
                    "expected value, found {other:?}"
                )))
            }
        };
        Ok(Cond::Clause(Clause { attribute, op, value }))
    }
}

fn parse(expression: &str) -> Result<Expr> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_query()
}

// --- Evaluation --------------------------------------------------------

fn eval_clause(clause: &Clause, repr: &Representation) -> Result<bool> {
    let attr = match repr.attribute(&clause.attribute) {
        Some(v) => v,
        None => {
            if repr.known_attribute_names().contains(&clause.attribute.as_str()) {
                return Ok(false);
            }
            let suggestion = closest_attribute_name(&clause.attribute, repr.known_attribute_names());
            return Err(RewindError::UnknownAttributeError {
                attribute: clause.attribute.clone(),
                suggestion,
            });
        }
    };
    Ok(match clause.op {
        Op::Contains => attr.contains(&clause.value),
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => {
            let ordering = match &attr {
                AttributeValue::Str(s) => s.as_str().cmp(clause.value.as_str()),
                AttributeValue::Num(n) => {
                    let target: f64 = clause.value.parse().map_err(|_| {
                        RewindError::QuerySyntaxError(format!(
                            "expected a number for '{}', got '{}'",
                            clause.attribute, clause.value
                        ))
                    })?;
                    n.partial_cmp(&target).unwrap_or(std::cmp::Ordering::Equal)
                }
            };
            use std::cmp::Ordering::*;
            match clause.op {
                Op::Eq => ordering == Equal,
                Op::Ne => ordering != Equal,
                Op::Lt => ordering == Less,
                Op::Le => ordering != Greater,
                Op::Gt => ordering == Greater,
                Op::Ge => ordering != Less,
                Op::Contains => unreachable!(),
            }
        }
    })
}

fn closest_attribute_name(attribute: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, edit_distance::edit_distance(attribute, k)))
        .min_by_key(|(_, d)| *d)
        .filter(|(_, d)| *d <= 2)
        .map(|(k, _)| k.to_string())
}

fn eval_cond(cond: &Cond, repr: &Representation) -> Result<bool> {
    match cond {
        Cond::Clause(c) => eval_clause(c, repr),
        Cond::And(parts) => {
            for p in parts {
                if !eval_cond(p, repr)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Cond::Or(parts) => {
            for p in parts {
                if eval_cond(p, repr)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

fn call_function(name: &str, items: Vec<Representation>) -> Result<Vec<Representation>> {
    match name {
        "best" => Ok(items
            .into_iter()
            .max_by(|a, b| a.quality().cmp(&b.quality()))
            .into_iter()
            .collect()),
        "worst" => Ok(items
            .into_iter()
            .min_by(|a, b| a.quality().cmp(&b.quality()))
            .into_iter()
            .collect()),
        other => Err(RewindError::QuerySyntaxError(format!(
            "unknown query function '{other}'"
        ))),
    }
}

fn eval_expr(expr: &Expr, items: Vec<Representation>) -> Result<Vec<Representation>> {
    match expr {
        Expr::All => Ok(items),
        Expr::None => Ok(Vec::new()),
        Expr::Group(inner) => eval_expr(inner, items),
        Expr::Condition(cond) => {
            let mut out = Vec::new();
            for item in items {
                if eval_cond(cond, &item)? {
                    out.push(item);
                }
            }
            Ok(out)
        }
        Expr::Pipe(stages) => {
            let mut current = items;
            for stage in stages {
                current = match stage {
                    Stage::Expr(e) => eval_expr(e, current)?,
                    Stage::Function(name) => call_function(name, current)?,
                };
            }
            Ok(current)
        }
        Expr::Fallback(branches) => {
            for branch in branches {
                let result = eval_expr(branch, items.clone())?;
                if !result.is_empty() {
                    return Ok(result);
                }
            }
            Ok(Vec::new())
        }
    }
}

/// Expands aliases, parses, and evaluates `expression` against `catalog`,
/// returning the matching representations in catalog order.
#[tracing::instrument(level = "trace", skip(catalog))]
pub fn query(expression: &str, catalog: &Catalog) -> Result<Vec<Representation>> {
    let expanded = expand_aliases(expression)?;
    let tree = parse(&expanded)?;
    eval_expr(&tree, catalog.iter().cloned().collect())
}
