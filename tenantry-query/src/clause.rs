//! WHERE clause expressions.

use crate::value::Value;

/// A single predicate in a WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `column = value`
    Eq {
        /// Column name.
        column: String,
        /// Compared value.
        value: Value,
    },
    /// `column IN (values...)`
    In {
        /// Column name.
        column: String,
        /// Candidate values.
        values: Vec<Value>,
    },
    /// A SQL fragment with `?` placeholders bound to `vars` in order.
    Raw {
        /// SQL text.
        sql: String,
        /// Bound variables.
        vars: Vec<Value>,
    },
}

impl Expr {
    /// Build an equality predicate.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Build an `IN` predicate.
    pub fn in_list<V: Into<Value>>(column: impl Into<String>, values: Vec<V>) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a raw SQL predicate.
    pub fn raw(sql: impl Into<String>, vars: Vec<Value>) -> Self {
        Self::Raw {
            sql: sql.into(),
            vars,
        }
    }

    /// Render the predicate as SQL with every placeholder replaced by the
    /// plain text of its variable.
    pub fn to_inline_sql(&self) -> String {
        match self {
            Self::Eq { column, value } => format!("{} = {}", column, value.to_plain_string()),
            Self::In { column, values } => format!(
                "{} IN ({})",
                column,
                values
                    .iter()
                    .map(Value::to_plain_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Self::Raw { sql, vars } => inline_vars(sql, vars),
        }
    }
}

/// Flag the bytes of `sql` inside a single- or double-quoted span, the
/// quotes included. A doubled quote closes and reopens the span, so it
/// stays flagged.
pub fn quoted_mask(sql: &str) -> Vec<bool> {
    let mut mask = vec![false; sql.len()];
    let mut open: Option<u8> = None;
    for (i, b) in sql.bytes().enumerate() {
        match open {
            Some(quote) => {
                mask[i] = true;
                if b == quote {
                    open = None;
                }
            }
            None if b == b'\'' || b == b'"' => {
                mask[i] = true;
                open = Some(b);
            }
            None => {}
        }
    }
    mask
}

/// Byte offsets of the `?` placeholders outside quoted spans.
pub fn placeholders(sql: &str) -> Vec<usize> {
    let quoted = quoted_mask(sql);
    sql.bytes()
        .enumerate()
        .filter(|&(i, b)| b == b'?' && !quoted[i])
        .map(|(i, _)| i)
        .collect()
}

/// Substitute `?` placeholders with the plain text of `vars`, in order.
///
/// Question marks inside quoted literals are not placeholders.
/// Placeholders without a matching variable are left untouched.
pub fn inline_vars(sql: &str, vars: &[Value]) -> String {
    let quoted = quoted_mask(sql);
    let mut out = String::with_capacity(sql.len());
    let mut vars = vars.iter();
    for (i, c) in sql.char_indices() {
        if c == '?' && !quoted[i] {
            match vars.next() {
                Some(v) => out.push_str(&v.to_plain_string()),
                None => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split `sql` on the keyword `AND`, case-insensitively, at word
/// boundaries outside quoted literals.
pub fn split_and(sql: &str) -> Vec<&str> {
    let quoted = quoted_mask(sql);
    let lower = sql.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + 3 <= bytes.len() {
        let boundary_before = i == 0 || bytes[i - 1].is_ascii_whitespace();
        let boundary_after = i + 3 == bytes.len() || bytes[i + 3].is_ascii_whitespace();
        if &bytes[i..i + 3] == b"and" && !quoted[i] && boundary_before && boundary_after {
            parts.push(&sql[start..i]);
            start = i + 3;
            i += 3;
        } else {
            i += 1;
        }
    }
    parts.push(&sql[start..]);
    parts
}

/// A WHERE clause: predicates joined with `AND`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    /// Predicates in order.
    pub exprs: Vec<Expr>,
}

impl Where {
    /// Create an empty clause.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a predicate (builder pattern).
    pub fn and(mut self, expr: Expr) -> Self {
        self.exprs.push(expr);
        self
    }

    /// Check whether the clause has no predicates.
    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Render the clause as inline SQL, predicates joined by ` AND `.
    pub fn to_inline_sql(&self) -> String {
        self.exprs
            .iter()
            .map(Expr::to_inline_sql)
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

impl From<Expr> for Where {
    fn from(expr: Expr) -> Self {
        Self { exprs: vec![expr] }
    }
}

impl From<Vec<Expr>> for Where {
    fn from(exprs: Vec<Expr>) -> Self {
        Self { exprs }
    }
}
