//! In-process connection backed by hash maps.
//!
//! `MemoryConnection` implements the full [`Connection`] contract for the
//! clause subset statements carry: `Eq`, `In` and raw predicates built
//! from `col = x`, `col != x`, `col <> x`, `col [not] in x` joined with
//! `AND`, `OR` and parentheses, where `x` is a `?`, a literal or a
//! parenthesized list of them. Anything else is an invalid filter. It is
//! what the test suites run against.

use crate::clause::{Expr, Where, quoted_mask};
use crate::connection::{Connection, ConnectionHandle};
use crate::error::{QueryError, QueryResult};
use crate::schema::{Row, Schema};
use crate::statement::{Operation, Statement, Target};
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
}

/// An in-memory database.
#[derive(Debug)]
pub struct MemoryConnection {
    name: String,
    tables: RwLock<HashMap<String, Table>>,
    raw_log: RwLock<Vec<String>>,
    migrations: AtomicUsize,
    executions: AtomicUsize,
}

impl MemoryConnection {
    /// Create an empty database.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
            raw_log: RwLock::new(Vec::new()),
            migrations: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        }
    }

    /// Create an empty database behind a shared handle.
    pub fn shared(name: impl Into<String>) -> ConnectionHandle {
        Arc::new(Self::new(name))
    }

    /// Check whether a table exists.
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.read().contains_key(table)
    }

    /// Snapshot the stored rows of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of `auto_migrate` calls received.
    pub fn migration_count(&self) -> usize {
        self.migrations.load(Ordering::Relaxed)
    }

    /// Number of statements executed.
    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }

    /// Raw SQL executed so far, with variables inlined.
    pub fn raw_log(&self) -> Vec<String> {
        self.raw_log.read().clone()
    }

    fn matching(rows: &[Row], clause: Option<&Where>) -> QueryResult<Vec<usize>> {
        let mut out = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if matches_clause(row, clause)? {
                out.push(i);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, stmt: &mut Statement) -> QueryResult<()> {
        self.executions.fetch_add(1, Ordering::Relaxed);

        if stmt.operation == Operation::Raw {
            let rendered = stmt
                .raw
                .as_ref()
                .map(|raw| crate::clause::inline_vars(&raw.sql, &raw.vars))
                .unwrap_or_default();
            tracing::trace!(db = %self.name, sql = %rendered, "raw statement");
            self.raw_log.write().push(rendered);
            return Ok(());
        }

        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&stmt.table)
            .ok_or_else(|| QueryError::table_not_found(&stmt.table))?;

        match stmt.operation {
            Operation::Create => {
                let rows: Vec<Row> = stmt.target.rows().cloned().collect();
                stmt.rows_affected = rows.len() as u64;
                table.rows.extend(rows);
            }
            Operation::Query | Operation::Row => {
                let hits = Self::matching(&table.rows, stmt.clause.as_ref())?;
                let rows = hits.into_iter().map(|i| table.rows[i].clone()).collect();
                stmt.target = Target::Many(rows);
            }
            Operation::Update => {
                let hits = Self::matching(&table.rows, stmt.clause.as_ref())?;
                if let Some(dest) = &stmt.dest {
                    for &i in &hits {
                        for (column, value) in dest.assignments() {
                            table.rows[i].insert(column.clone(), value.clone());
                        }
                    }
                }
                stmt.rows_affected = hits.len() as u64;
            }
            Operation::Delete => {
                let hits = Self::matching(&table.rows, stmt.clause.as_ref())?;
                stmt.rows_affected = hits.len() as u64;
                for i in hits.into_iter().rev() {
                    table.rows.remove(i);
                }
            }
            Operation::Raw => {}
        }
        Ok(())
    }

    async fn auto_migrate(&self, schema: &Schema) -> QueryResult<()> {
        self.migrations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(db = %self.name, sql = %schema.create_table_sql(), "migrating table");
        self.tables.write().entry(schema.table.clone()).or_default();
        Ok(())
    }
}

/// Evaluate a WHERE clause against a row. A missing clause matches all rows.
pub fn matches_clause(row: &Row, clause: Option<&Where>) -> QueryResult<bool> {
    let Some(clause) = clause else {
        return Ok(true);
    };
    for expr in &clause.exprs {
        if !matches_expr(row, expr)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn column_value<'r>(row: &'r Row, column: &str) -> &'r Value {
    static NULL: Value = Value::Null;
    let column = column.trim();
    let column = column.rsplit('.').next().unwrap_or(column);
    let column = column.trim_matches(|c| c == '`' || c == '"');
    row.get(column).unwrap_or(&NULL)
}

fn matches_expr(row: &Row, expr: &Expr) -> QueryResult<bool> {
    match expr {
        Expr::Eq { column, value } => Ok(loose_eq(column_value(row, column), value)),
        Expr::In { column, values } => {
            let actual = column_value(row, column);
            Ok(values.iter().any(|v| loose_eq(actual, v)))
        }
        Expr::Raw { sql, vars } => matches_raw(row, sql, vars),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    a == b || (!a.is_null() && a.to_plain_string() == b.to_plain_string())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RawOp {
    Eq,
    Ne,
    In,
    NotIn,
}

type Vars<'v> = std::slice::Iter<'v, Value>;

fn unsupported(part: &str) -> QueryError {
    QueryError::invalid_filter(format!("unsupported predicate: {}", part.trim()))
}

/// Parenthesis depth of every byte outside quoted literals, `None` inside
/// them. An opening parenthesis and its match share the outer depth.
fn depths(sql: &str) -> QueryResult<Vec<Option<usize>>> {
    let quoted = quoted_mask(sql);
    let mut depth = 0usize;
    let mut out = Vec::with_capacity(sql.len());
    for (i, b) in sql.bytes().enumerate() {
        if quoted[i] {
            out.push(None);
            continue;
        }
        match b {
            b'(' => {
                out.push(Some(depth));
                depth += 1;
            }
            b')' => {
                depth = depth.checked_sub(1).ok_or_else(|| unsupported(sql))?;
                out.push(Some(depth));
            }
            _ => out.push(Some(depth)),
        }
    }
    if depth != 0 {
        return Err(unsupported(sql));
    }
    Ok(out)
}

/// Split on a keyword at word boundaries, outside quotes and parentheses.
fn split_top_level<'s>(sql: &'s str, keyword: &str) -> QueryResult<Vec<&'s str>> {
    let depths = depths(sql)?;
    let lower = sql.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let n = keyword.len();
    let boundary = |b: u8| b.is_ascii_whitespace() || b == b'(' || b == b')';

    let mut parts = Vec::new();
    let (mut start, mut i) = (0, 0);
    while i + n <= bytes.len() {
        let hit = depths[i] == Some(0)
            && &bytes[i..i + n] == keyword.as_bytes()
            && (i == 0 || boundary(bytes[i - 1]))
            && (i + n == bytes.len() || boundary(bytes[i + n]));
        if hit {
            parts.push(&sql[start..i]);
            start = i + n;
            i += n;
        } else {
            i += 1;
        }
    }
    parts.push(&sql[start..]);
    Ok(parts)
}

/// Split a list body on commas outside quoted literals.
fn split_commas(list: &str) -> Vec<&str> {
    let quoted = quoted_mask(list);
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, b) in list.bytes().enumerate() {
        if b == b',' && !quoted[i] {
            parts.push(&list[start..i]);
            start = i + 1;
        }
    }
    parts.push(&list[start..]);
    parts
}

/// The inside of a predicate wrapped in one pair of parentheses.
fn grouped(part: &str) -> QueryResult<Option<&str>> {
    if part.len() < 2 || !part.starts_with('(') || !part.ends_with(')') {
        return Ok(None);
    }
    let depths = depths(part)?;
    let closes_early = depths[1..part.len() - 1].contains(&Some(0));
    Ok((!closes_early).then(|| &part[1..part.len() - 1]))
}

fn parse_predicate(part: &str) -> QueryResult<(&str, RawOp, &str)> {
    let depths = depths(part)?;
    let lower = part.to_ascii_lowercase();
    let mut best: Option<(usize, usize, RawOp)> = None;
    for (token, op) in [
        (" not in ", RawOp::NotIn),
        (" in ", RawOp::In),
        ("!=", RawOp::Ne),
        ("<>", RawOp::Ne),
        ("=", RawOp::Eq),
    ] {
        let found = lower
            .match_indices(token)
            .map(|(pos, _)| pos)
            .find(|&pos| depths[pos] == Some(0));
        if let Some(pos) = found {
            if best.is_none_or(|(at, _, _)| pos < at) {
                best = Some((pos, token.len(), op));
            }
        }
    }

    let (pos, len, op) = best.ok_or_else(|| unsupported(part))?;
    let column = part[..pos].trim();
    let plain = !column.is_empty()
        && column
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '`' | '"'));
    if !plain {
        return Err(unsupported(part));
    }
    Ok((column, op, part[pos + len..].trim()))
}

fn literal(operand: &str) -> Option<Value> {
    for quote in ['\'', '"'] {
        if operand.len() >= 2 && operand.starts_with(quote) && operand.ends_with(quote) {
            let doubled = format!("{quote}{quote}");
            let inner = &operand[1..operand.len() - 1];
            return Some(Value::String(inner.replace(&doubled, &quote.to_string())));
        }
    }
    let bare = |c: char| !c.is_whitespace() && !matches!(c, '?' | '(' | ')' | '\'' | '"');
    if operand.is_empty() || !operand.chars().all(bare) {
        return None;
    }
    Some(
        operand
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or_else(|_| Value::String(operand.to_string())),
    )
}

fn next_var(vars: &mut Vars<'_>, part: &str) -> QueryResult<Value> {
    vars.next().cloned().ok_or_else(|| {
        QueryError::invalid_filter(format!("missing variable for: {}", part.trim()))
    })
}

/// The compared value: a placeholder, a parenthesized list of placeholders
/// and literals, or a single literal.
fn operand_value(operand: &str, vars: &mut Vars<'_>, part: &str) -> QueryResult<Value> {
    if operand == "?" {
        return next_var(vars, part);
    }
    if let Some(list) = operand.strip_prefix('(').and_then(|o| o.strip_suffix(')')) {
        let mut items = Vec::new();
        for item in split_commas(list) {
            let item = item.trim();
            if item == "?" {
                match next_var(vars, part)? {
                    Value::List(values) => items.extend(values),
                    value => items.push(value),
                }
            } else {
                items.push(literal(item).ok_or_else(|| unsupported(part))?);
            }
        }
        return Ok(Value::List(items));
    }
    literal(operand).ok_or_else(|| unsupported(part))
}

fn matches_raw(row: &Row, sql: &str, vars: &[Value]) -> QueryResult<bool> {
    eval_and(row, sql, &mut vars.iter())
}

// Every branch is evaluated so placeholders bind in order.
fn eval_and(row: &Row, sql: &str, vars: &mut Vars<'_>) -> QueryResult<bool> {
    let mut hit = true;
    for part in split_top_level(sql, "and")? {
        if part.trim().is_empty() {
            continue;
        }
        hit &= eval_or(row, part, vars)?;
    }
    Ok(hit)
}

fn eval_or(row: &Row, sql: &str, vars: &mut Vars<'_>) -> QueryResult<bool> {
    let mut hit = false;
    for part in split_top_level(sql, "or")? {
        hit |= eval_predicate(row, part.trim(), vars)?;
    }
    Ok(hit)
}

fn eval_predicate(row: &Row, part: &str, vars: &mut Vars<'_>) -> QueryResult<bool> {
    if let Some(inner) = grouped(part)? {
        return eval_and(row, inner, vars);
    }
    let (column, op, operand) = parse_predicate(part)?;
    let expected = operand_value(operand, vars, part)?;
    let actual = column_value(row, column);
    let hit = match op {
        RawOp::Eq => loose_eq(actual, &expected),
        RawOp::Ne => !loose_eq(actual, &expected),
        RawOp::In | RawOp::NotIn => {
            let found = match &expected {
                Value::List(items) => items.iter().any(|v| loose_eq(actual, v)),
                single => loose_eq(actual, single),
            };
            (op == RawOp::In) == found
        }
    };
    Ok(hit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind};
    use crate::statement::UpdateDest;

    fn schema() -> Schema {
        Schema::new("User", "users")
            .field(Field::new("id", FieldKind::Int).primary_key())
            .field(Field::new("name", FieldKind::String))
    }

    fn user(id: i64, name: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), Value::from(id));
        row.insert("name".into(), Value::from(name));
        row
    }

    #[test]
    fn test_raw_predicates() {
        let row = user(1, "ann");
        assert!(matches_raw(&row, "name = ?", &[Value::from("ann")]).unwrap());
        assert!(matches_raw(&row, "name != ? and id = 1", &[Value::from("bob")]).unwrap());
        assert!(matches_raw(&row, "name in ?", &[Value::from(vec!["x", "ann"])]).unwrap());
        assert!(!matches_raw(&row, "name NOT IN ?", &[Value::from(vec!["ann"])]).unwrap());
        assert!(matches_raw(&row, "name LIKE ?", &[Value::from("a%")]).is_err());
    }

    #[test]
    fn test_raw_placeholder_lists() {
        let row = user(1, "ann");
        let vars = [Value::from("ann"), Value::from("bob"), Value::from(1)];
        assert!(matches_raw(&row, "name IN (?, ?) AND id = ?", &vars).unwrap());
        assert!(!matches_raw(&row, "name not in (?, ?) and id = ?", &vars).unwrap());
        assert!(matches_raw(&row, "id IN (1, 2) AND name = 'ann'", &[]).unwrap());
        assert!(matches_raw(&row, "name = 'it''s' OR id = 1", &[]).unwrap());
    }

    #[test]
    fn test_raw_or_groups() {
        let ann = user(1, "ann");
        let bob = user(2, "bob");
        let sql = "(name = ? OR name = ?) AND id = ?";
        let vars = [Value::from("ann"), Value::from("bob"), Value::from(2)];
        assert!(!matches_raw(&ann, sql, &vars).unwrap());
        assert!(matches_raw(&bob, sql, &vars).unwrap());
        assert!(matches_raw(&ann, "name = ? OR name = ?", &vars[..2]).unwrap());
    }

    #[test]
    fn test_raw_rejects_unparsed_predicates() {
        let row = user(1, "ann");
        for sql in [
            "(name = ?",
            "lower(name) = ?",
            "id >= ?",
            "name = ? ORDER BY id",
            "name IS NULL",
        ] {
            let err = matches_raw(&row, sql, &[Value::from("ann")]).unwrap_err();
            assert_eq!(err.code, crate::ErrorCode::InvalidFilter, "{}", sql);
        }
    }

    #[tokio::test]
    async fn test_create_requires_migration() {
        let conn = MemoryConnection::shared("db");
        let mut stmt = Statement::new(Operation::Create, "users", conn.clone())
            .with_target(Target::Single(user(1, "ann")));

        let err = conn.execute(&mut stmt).await.unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::TableNotFound);

        conn.auto_migrate(&schema()).await.unwrap();
        conn.execute(&mut stmt).await.unwrap();
        assert_eq!(stmt.rows_affected, 1);
    }

    #[tokio::test]
    async fn test_query_update_delete() {
        let mem = Arc::new(MemoryConnection::new("db"));
        let conn: ConnectionHandle = mem.clone();
        conn.auto_migrate(&schema()).await.unwrap();

        let mut create = Statement::new(Operation::Create, "users", conn.clone())
            .with_target(Target::Many(vec![user(1, "ann"), user(2, "bob")]));
        conn.execute(&mut create).await.unwrap();

        let mut update = Statement::new(Operation::Update, "users", conn.clone())
            .with_clause(Expr::eq("id", 2))
            .with_dest(UpdateDest::Map(user(2, "rob")));
        conn.execute(&mut update).await.unwrap();
        assert_eq!(update.rows_affected, 1);

        let mut query = Statement::new(Operation::Query, "users", conn.clone())
            .with_clause(Expr::in_list("name", vec!["rob"]));
        conn.execute(&mut query).await.unwrap();
        assert_eq!(query.target.len(), 1);

        let mut delete = Statement::new(Operation::Delete, "users", conn.clone())
            .with_clause(Expr::raw("id = ?", vec![Value::from(1)]));
        conn.execute(&mut delete).await.unwrap();
        assert_eq!(delete.rows_affected, 1);
        assert_eq!(mem.rows("users").len(), 1);
        assert_eq!(mem.execution_count(), 4);
    }

    #[tokio::test]
    async fn test_raw_is_logged() {
        let mem = Arc::new(MemoryConnection::new("db"));
        let conn: ConnectionHandle = mem.clone();
        let mut stmt = Statement::new(Operation::Raw, "", conn.clone())
            .with_raw("DELETE FROM users WHERE id = ?", vec![Value::from(9)]);
        conn.execute(&mut stmt).await.unwrap();
        assert_eq!(mem.raw_log(), vec!["DELETE FROM users WHERE id = 9".to_string()]);
    }
}
