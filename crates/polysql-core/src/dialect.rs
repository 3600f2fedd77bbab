//! SQL dialect facts per engine
//!
//! A [`Dialect`] is built once per driver type and shared read-only by every
//! grip of that driver. The SQL renderer reads the exported constants
//! (`max_batch_values`, `joins`, `catalog`) to decide what it may emit.

use std::collections::BTreeMap;
use std::fmt;

use crate::{DriverType, PolysqlError, Result};

/// Whether a statement returns rows or an affected-row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecMode {
    Query,
    Exec,
}

/// Operators of the query language that map onto SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Like,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
}

impl Op {
    /// The token used for this operator in the query language.
    pub fn token(&self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
            Op::Like => "like",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Concat => "++",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

pub const ALL_JOINS: &[JoinType] = &[
    JoinType::Inner,
    JoinType::Left,
    JoinType::Right,
    JoinType::Full,
    JoinType::Cross,
];

/// Rendering rules for one engine family.
#[derive(Clone)]
pub struct Dialect {
    pub driver_type: DriverType,
    /// Renders `num_rows` groups of `num_cols` parameter markers.
    pub placeholders: fn(usize, usize) -> String,
    /// Renders the parameter marker at a one-based position.
    pub param: fn(usize) -> String,
    /// Quotes an identifier, applying the engine's case folding.
    pub enquote: fn(&str) -> String,
    pub exec_mode_for: fn(&str) -> Result<ExecMode>,
    pub ops: BTreeMap<Op, &'static str>,
    pub joins: &'static [JoinType],
    /// Maximum number of bound values in one batch statement.
    pub max_batch_values: usize,
    /// Whether catalog-qualified names are legal.
    pub catalog: bool,
    /// Whether booleans are stored as integers.
    pub int_bool: bool,
}

impl fmt::Debug for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialect")
            .field("driver_type", &self.driver_type)
            .field("joins", &self.joins)
            .field("max_batch_values", &self.max_batch_values)
            .field("catalog", &self.catalog)
            .field("int_bool", &self.int_bool)
            .finish_non_exhaustive()
    }
}

impl Dialect {
    pub fn op(&self, op: Op) -> Option<&'static str> {
        self.ops.get(&op).copied()
    }

    pub fn supports_join(&self, join: JoinType) -> bool {
        self.joins.contains(&join)
    }

    /// Rows per batch so that one batch binds at most `max_batch_values`
    /// values. Never less than one.
    pub fn max_batch_rows(&self, num_cols: usize) -> usize {
        (self.max_batch_values / num_cols.max(1)).max(1)
    }

    pub fn enquote_all<S: AsRef<str>>(&self, idents: &[S]) -> Vec<String> {
        idents
            .iter()
            .map(|ident| (self.enquote)(ident.as_ref()))
            .collect()
    }
}

/// `(?, ?), (?, ?)` style placeholders.
pub fn placeholders_question(num_cols: usize, num_rows: usize) -> String {
    render_placeholders(num_cols, num_rows, param_question)
}

/// `($1, $2), ($3, $4)` style placeholders, numbered across rows.
pub fn placeholders_numbered(num_cols: usize, num_rows: usize) -> String {
    render_placeholders(num_cols, num_rows, param_numbered)
}

pub fn param_question(_position: usize) -> String {
    "?".to_string()
}

pub fn param_numbered(position: usize) -> String {
    format!("${}", position)
}

fn render_placeholders(num_cols: usize, num_rows: usize, param: fn(usize) -> String) -> String {
    let mut out = String::with_capacity(num_rows * (num_cols * 4 + 4));
    let mut position = 1;
    for row in 0..num_rows {
        if row > 0 {
            out.push_str(", ");
        }
        out.push('(');
        for col in 0..num_cols {
            if col > 0 {
                out.push_str(", ");
            }
            out.push_str(&param(position));
            position += 1;
        }
        out.push(')');
    }
    out
}

/// Double-quotes an identifier, doubling embedded quotes. An identifier that
/// is already correctly quoted is returned unchanged.
pub fn enquote_double(ident: &str) -> String {
    if is_double_quoted(ident) {
        return ident.to_string();
    }
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Like [`enquote_double`], for engines that fold unquoted identifiers to
/// upper case.
pub fn enquote_double_upper(ident: &str) -> String {
    if is_double_quoted(ident) {
        return ident.to_string();
    }
    enquote_double(&ident.to_uppercase())
}

fn is_double_quoted(ident: &str) -> bool {
    let Some(inner) = ident
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return false;
    };
    !inner.replace("\"\"", "").contains('"')
}

/// Operator mapping shared by ANSI-ish engines.
pub fn default_ops() -> BTreeMap<Op, &'static str> {
    BTreeMap::from([
        (Op::Eq, "="),
        (Op::Ne, "!="),
        (Op::Lt, "<"),
        (Op::Le, "<="),
        (Op::Gt, ">"),
        (Op::Ge, ">="),
        (Op::And, "AND"),
        (Op::Or, "OR"),
        (Op::Not, "NOT"),
        (Op::Like, "LIKE"),
        (Op::Add, "+"),
        (Op::Sub, "-"),
        (Op::Mul, "*"),
        (Op::Div, "/"),
        (Op::Mod, "%"),
        (Op::Concat, "||"),
    ])
}

/// Leading keywords of statements that return rows in most engines.
pub const QUERY_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "TABLE", "SHOW", "EXPLAIN", "DESCRIBE",
];

/// Classifies `sql` by its first keyword after whitespace and comments.
pub fn classify_exec_mode(sql: &str, query_keywords: &[&str]) -> Result<ExecMode> {
    let keyword = first_keyword(sql)?;
    if keyword.is_empty() {
        return Err(PolysqlError::InvalidSql(
            "empty or ambiguous statement: no leading keyword".to_string(),
        ));
    }

    if query_keywords
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(keyword))
    {
        Ok(ExecMode::Query)
    } else {
        Ok(ExecMode::Exec)
    }
}

fn first_keyword(sql: &str) -> Result<&str> {
    let mut rest = sql;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(' || c == ';');
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |idx| &after[idx + 1..]);
        } else if let Some(after) = rest.strip_prefix("/*") {
            let Some(end) = after.find("*/") else {
                return Err(PolysqlError::InvalidSql(
                    "unclosed block comment".to_string(),
                ));
            };
            rest = &after[end + 2..];
        } else {
            break;
        }
    }

    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    Ok(&rest[..end])
}

/// Default exec-mode classifier.
pub fn exec_mode_default(sql: &str) -> Result<ExecMode> {
    classify_exec_mode(sql, QUERY_KEYWORDS)
}
