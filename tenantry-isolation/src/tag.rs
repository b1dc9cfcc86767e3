//! Tenant identifier extraction.
//!
//! A [`TagResolver`] knows the tenant column and pulls its value out of the
//! different parts of a statement: the rows being written, the WHERE
//! clause, the values of an UPDATE and raw SQL text.

use crate::errors;
use tenantry_query::clause::{placeholders, quoted_mask, split_and};
use tenantry_query::{Expr, QueryResult, Row, Schema, Target, Value, Where};

/// Extracts tenant identifiers for a configured tenant column.
#[derive(Debug, Clone)]
pub struct TagResolver {
    tag: String,
}

impl TagResolver {
    /// Create a resolver for a tenant column.
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    /// The tenant column.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Read the tenant from the rows of a statement.
    ///
    /// Empty values are skipped. Every non-empty value in a batch must
    /// name the same tenant.
    pub fn from_rows(&self, schema: &Schema, target: &Target) -> QueryResult<Option<String>> {
        let Some(field) = schema.field_by_db_name(&self.tag) else {
            return Ok(None);
        };

        let mut found: Option<String> = None;
        for row in target.rows() {
            let (value, zero) = field.value_of(row);
            let Some(value) = value else { continue };
            if zero {
                continue;
            }
            let Some(tenant) = value.as_str() else {
                return Err(errors::non_string_tenant(&self.tag, value.type_name()));
            };
            let tenant = normalize(tenant);
            if tenant.is_empty() {
                continue;
            }
            match &found {
                Some(first) if *first != tenant => {
                    return Err(errors::tenant_mismatch(first, &tenant));
                }
                Some(_) => {}
                None => found = Some(tenant),
            }
        }
        Ok(found)
    }

    /// Read the tenant from a WHERE clause.
    ///
    /// Structured equality on the tenant column wins; otherwise the raw
    /// fragments are scanned in order for `tenant = value`.
    pub fn from_clause(&self, clause: &Where) -> Option<String> {
        let mut raw = Vec::new();
        for expr in &clause.exprs {
            match expr {
                Expr::Eq { column, value } if column_matches(column, &self.tag) => {
                    if let Some(tenant) = non_empty(&value.to_plain_string()) {
                        return Some(tenant);
                    }
                }
                Expr::In { column, values } if column_matches(column, &self.tag) => {
                    if let [single] = values.as_slice() {
                        if let Some(tenant) = non_empty(&single.to_plain_string()) {
                            return Some(tenant);
                        }
                    }
                }
                Expr::Raw { sql, vars } => raw.push((sql, vars)),
                _ => {}
            }
        }

        raw.into_iter().find_map(|(sql, vars)| self.scan(sql, vars))
    }

    /// Read the tenant from the values of an UPDATE.
    pub fn from_values(&self, row: &Row) -> Option<String> {
        match row.get(&self.tag) {
            Some(Value::String(tenant)) => non_empty(tenant),
            _ => None,
        }
    }

    /// Read the tenant from raw SQL with its bound variables.
    pub fn from_sql(&self, sql: &str, vars: &[Value]) -> Option<String> {
        self.scan(sql, vars)
    }

    /// Find `tenant = operand` in an `AND` chain. A `?` operand reads its
    /// bound variable; anything else is the rest of the conjunct.
    fn scan(&self, sql: &str, vars: &[Value]) -> Option<String> {
        let mut bound = 0;
        for part in split_and(sql) {
            let holes = placeholders(part);
            let tenant = assignments(part).find_map(|(at, left, right)| {
                let column = left.split_whitespace().last()?;
                if !column_matches(column, &self.tag) {
                    return None;
                }
                let operand = right.trim();
                if operand.starts_with('?') {
                    let index = bound + holes.iter().filter(|&&hole| hole < at).count();
                    non_empty(&vars.get(index)?.to_plain_string())
                } else {
                    non_empty(literal_operand(operand))
                }
            });
            if tenant.is_some() {
                return tenant;
            }
            bound += holes.len();
        }
        None
    }
}

/// Every split of a predicate around a bare `=` outside quoted literals,
/// left to right, with the offset of the `=`.
fn assignments(part: &str) -> impl Iterator<Item = (usize, &str, &str)> {
    let quoted = quoted_mask(part);
    let bytes = part.as_bytes();
    (0..bytes.len())
        .filter(move |&i| {
            bytes[i] == b'='
                && !quoted[i]
                && (i == 0 || !matches!(bytes[i - 1], b'!' | b'<' | b'>' | b'='))
                && bytes.get(i + 1) != Some(&b'=')
        })
        .map(move |i| (i, &part[..i], &part[i + 1..]))
}

/// A literal right-hand side: the quoted literal when it starts with a
/// quote, otherwise the whole conjunct without statement terminators.
fn literal_operand(operand: &str) -> &str {
    if let Some(quote) = operand.chars().next().filter(|c| *c == '\'' || *c == '"') {
        return match operand[1..].find(quote) {
            Some(end) => &operand[..end + 2],
            None => operand,
        };
    }
    operand.trim_end_matches([';', ')']).trim_end()
}

/// Compare a possibly qualified or quoted column with the tenant column.
fn column_matches(column: &str, tag: &str) -> bool {
    let column = column.trim().trim_start_matches('(');
    let column = column.rsplit('.').next().unwrap_or(column);
    let column = column.trim_matches(|c| c == '`' || c == '"');
    column.eq_ignore_ascii_case(tag)
}

fn normalize(value: &str) -> String {
    let value = value.trim();
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .or_else(|| value.strip_prefix('"').and_then(|v| v.strip_suffix('"')))
        .unwrap_or(value);
    value.trim().to_string()
}

fn non_empty(value: &str) -> Option<String> {
    let value = normalize(value);
    if value.is_empty() { None } else { Some(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tenantry_query::{ErrorCode, Field, FieldKind};

    fn schema() -> Schema {
        Schema::new("User", "users")
            .field(Field::new("id", FieldKind::Int).primary_key())
            .field(Field::new("tenant_id", FieldKind::String))
            .field(Field::new("name", FieldKind::String))
    }

    fn row(tenant: impl Into<Value>) -> Row {
        let mut row = Row::new();
        row.insert("id".into(), 1.into());
        row.insert("tenant_id".into(), tenant.into());
        row
    }

    #[test]
    fn test_from_single_row() {
        let resolver = TagResolver::new("tenant_id");
        let tenant = resolver
            .from_rows(&schema(), &Target::Single(row(" acme ")))
            .unwrap();
        assert_eq!(tenant.as_deref(), Some("acme"));
    }

    #[test]
    fn test_batch_skips_empty_and_agrees() {
        let resolver = TagResolver::new("tenant_id");
        let target = Target::Many(vec![row(""), row("acme"), row("acme")]);
        assert_eq!(
            resolver.from_rows(&schema(), &target).unwrap().as_deref(),
            Some("acme")
        );
    }

    #[test]
    fn test_batch_mismatch() {
        let resolver = TagResolver::new("tenant_id");
        let target = Target::Many(vec![row("acme"), row("globex")]);
        let err = resolver.from_rows(&schema(), &target).unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantMismatch);
        assert!(err.message.contains("batch insert into different databases"));
    }

    #[test]
    fn test_non_string_tenant() {
        let resolver = TagResolver::new("tenant_id");
        let err = resolver
            .from_rows(&schema(), &Target::Single(row(42)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDataType);
    }

    #[test]
    fn test_schema_without_tag() {
        let resolver = TagResolver::new("org_id");
        let tenant = resolver
            .from_rows(&schema(), &Target::Single(row("acme")))
            .unwrap();
        assert_eq!(tenant, None);
    }

    #[test]
    fn test_from_clause_eq() {
        let resolver = TagResolver::new("tenant_id");
        let clause = Where::new()
            .and(Expr::eq("id", 7))
            .and(Expr::eq("tenant_id", "acme"));
        assert_eq!(resolver.from_clause(&clause).as_deref(), Some("acme"));
    }

    #[test]
    fn test_from_clause_raw() {
        let resolver = TagResolver::new("tenant_id");
        let clause = Where::new()
            .and(Expr::raw("name = ?", vec!["x".into()]))
            .and(Expr::raw("id > 3 and tenant_id = ?", vec!["globex".into()]));
        assert_eq!(resolver.from_clause(&clause).as_deref(), Some("globex"));

        let quoted = Where::new().and(Expr::raw("users.tenant_id = 'acme'", vec![]));
        assert_eq!(resolver.from_clause(&quoted).as_deref(), Some("acme"));
    }

    #[test]
    fn test_tenant_with_spaces() {
        let resolver = TagResolver::new("tenant_id");
        let clause = Where::new().and(Expr::raw(
            "name = ? AND tenant_id = ?",
            vec!["bob".into(), "acme corp".into()],
        ));
        assert_eq!(resolver.from_clause(&clause).as_deref(), Some("acme corp"));

        let sql = "DELETE FROM users WHERE tenant_id = ?";
        assert_eq!(
            resolver.from_sql(sql, &["acme corp".into()]).as_deref(),
            Some("acme corp")
        );

        let bare = "SELECT * FROM users WHERE tenant_id = acme corp AND id = 1";
        assert_eq!(resolver.from_sql(bare, &[]).as_deref(), Some("acme corp"));
    }

    #[test]
    fn test_placeholders_in_literals_are_skipped() {
        let resolver = TagResolver::new("tenant_id");
        let sql = "SELECT * FROM users WHERE note = 'a=?' AND tenant_id = ?";
        assert_eq!(resolver.from_sql(sql, &["acme".into()]).as_deref(), Some("acme"));
    }

    #[test]
    fn test_from_clause_ignores_other_operators() {
        let resolver = TagResolver::new("tenant_id");
        let clause = Where::new().and(Expr::raw("tenant_id != ?", vec!["acme".into()]));
        assert_eq!(resolver.from_clause(&clause), None);
    }

    #[test]
    fn test_from_values() {
        let resolver = TagResolver::new("tenant_id");
        let mut values = Row::new();
        values.insert("tenant_id".into(), "\"acme\"".into());
        assert_eq!(resolver.from_values(&values).as_deref(), Some("acme"));
        values.insert("tenant_id".into(), "".into());
        assert_eq!(resolver.from_values(&values), None);
    }

    #[test]
    fn test_from_sql() {
        let resolver = TagResolver::new("tenant_id");
        let sql = "UPDATE users SET name = ? WHERE tenant_id = ? AND id = ?";
        let vars = vec!["bob".into(), "acme".into(), 3.into()];
        assert_eq!(resolver.from_sql(sql, &vars).as_deref(), Some("acme"));

        let literal = "SELECT * FROM users WHERE tenant_id='initech' ORDER BY id";
        assert_eq!(resolver.from_sql(literal, &[]).as_deref(), Some("initech"));
    }
}
