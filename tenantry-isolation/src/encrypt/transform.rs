//! Encryption of rows, update values and WHERE clauses.

use super::analyzer::EncryptionPlan;
use super::cipher::Cipher;
use crate::errors;
use std::collections::BTreeSet;
use tenantry_query::clause::{placeholders, quoted_mask};
use tenantry_query::{Expr, QueryError, QueryResult, Schema, Target, UpdateDest, Value, Where};

/// Which way a value is transformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Plaintext to ciphertext.
    Encrypt,
    /// Ciphertext to plaintext.
    Decrypt,
}

impl Direction {
    fn apply(self, cipher: &dyn Cipher, value: &str) -> QueryResult<String> {
        match self {
            Self::Encrypt => cipher.encrypt(value),
            Self::Decrypt => cipher.decrypt(value),
        }
    }
}

/// Encrypt or decrypt the encrypted columns of every row.
///
/// Empty values are left alone. Returns the number of values changed.
pub fn transform_rows(
    plan: &EncryptionPlan,
    schema: &Schema,
    target: &mut Target,
    cipher: &dyn Cipher,
    direction: Direction,
) -> QueryResult<usize> {
    let mut changed = 0;
    for column in plan.encrypted_columns() {
        let Some(field) = schema.field_by_db_name(column) else {
            continue;
        };
        for row in target.rows_mut() {
            let (value, zero) = field.value_of(row);
            let Some(value) = value else { continue };
            if zero {
                continue;
            }
            let Some(text) = value.as_str() else {
                return Err(errors::non_string_encrypted(column, value.type_name()));
            };
            let transformed = direction.apply(cipher, text)?;
            field.set(row, transformed)?;
            changed += 1;
        }
    }
    Ok(changed)
}

/// Encrypt the encrypted columns of an UPDATE's values.
pub fn encrypt_values(
    plan: &EncryptionPlan,
    dest: &mut UpdateDest,
    cipher: &dyn Cipher,
) -> QueryResult<usize> {
    let mut changed = 0;
    for (column, value) in dest.row_mut().iter_mut() {
        if plan.is_encrypted_column(column) {
            changed += encrypt_value(value, cipher)?;
        }
    }
    Ok(changed)
}

/// Encrypt the values compared against encrypted columns in a WHERE
/// clause.
///
/// Only exact matches can be rewritten: `=`, `!=`, `<>`, `IN` and
/// `NOT IN`. Any other comparison on an encrypted column is rejected.
pub fn encrypt_clause(
    plan: &EncryptionPlan,
    clause: &mut Where,
    cipher: &dyn Cipher,
) -> QueryResult<usize> {
    let mut changed = 0;
    for expr in clause.exprs.iter_mut() {
        match expr {
            Expr::Eq { column, value } if plan.is_encrypted_column(column) => {
                changed += encrypt_value(value, cipher)?;
            }
            Expr::In { column, values } if plan.is_encrypted_column(column) => {
                for value in values.iter_mut() {
                    changed += encrypt_value(value, cipher)?;
                }
            }
            Expr::Raw { sql, vars } => {
                for index in bound_placeholders(plan, sql)? {
                    let value = vars.get_mut(index).ok_or_else(|| {
                        QueryError::invalid_filter(format!(
                            "placeholder {} in {:?} has no bound value",
                            index + 1,
                            sql
                        ))
                    })?;
                    changed += encrypt_value(value, cipher)?;
                }
            }
            _ => {}
        }
    }
    Ok(changed)
}

fn encrypt_value(value: &mut Value, cipher: &dyn Cipher) -> QueryResult<usize> {
    match value {
        Value::Null => Ok(0),
        Value::List(items) => {
            let mut changed = 0;
            for item in items.iter_mut() {
                changed += encrypt_value(item, cipher)?;
            }
            Ok(changed)
        }
        other => {
            let plain = other.to_plain_string();
            if plain.is_empty() {
                return Ok(0);
            }
            *other = Value::String(cipher.encrypt(&plain)?);
            Ok(1)
        }
    }
}

/// Indexes of the `?` placeholders compared against encrypted columns.
///
/// Quoted literals are skipped, except a double-quoted identifier followed
/// by a comparison operator.
fn bound_placeholders(plan: &EncryptionPlan, sql: &str) -> QueryResult<BTreeSet<usize>> {
    let quoted = quoted_mask(sql);
    let holes = placeholders(sql);
    let lower = sql.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut indexes = BTreeSet::new();

    for column in plan.encrypted_columns() {
        let needle = column.to_ascii_lowercase();
        for (start, _) in lower.match_indices(&needle) {
            let end = start + needle.len();
            let before_ok = start == 0 || !is_ident(bytes[start - 1]);
            let after_ok = end == bytes.len() || !is_ident(bytes[end]);
            if !(before_ok && after_ok) {
                continue;
            }
            let in_literal = quoted[start];
            if in_literal && !quoted_identifier(bytes, start, end) {
                continue;
            }

            let rest = &lower[end..];
            let operand = match operator_len(rest) {
                Some(len) => end + len,
                None if in_literal => continue,
                None => return Err(errors::unsupported_predicate(column)),
            };

            let operand_sql = lower[operand..].trim_start();
            let at = lower.len() - operand_sql.len();
            if operand_sql.starts_with('?') {
                indexes.insert(placeholder_index(&holes, at));
            } else if operand_sql.starts_with('(') {
                let close = at + operand_sql.find(')').unwrap_or(operand_sql.len());
                let group: Vec<usize> = holes
                    .iter()
                    .filter(|&&hole| hole > at && hole < close)
                    .map(|&hole| placeholder_index(&holes, hole))
                    .collect();
                if group.is_empty() {
                    return Err(errors::unbound_encrypted(column));
                }
                indexes.extend(group);
            } else {
                return Err(errors::unbound_encrypted(column));
            }
        }
    }
    Ok(indexes)
}

fn quoted_identifier(bytes: &[u8], start: usize, end: usize) -> bool {
    start > 0 && bytes[start - 1] == b'"' && bytes.get(end) == Some(&b'"')
}

/// Length of the exact-match operator at the start of `rest`, including
/// any closing identifier quote and surrounding whitespace.
fn operator_len(rest: &str) -> Option<usize> {
    let trimmed = rest.trim_start_matches(['`', '"']).trim_start();
    let skipped = rest.len() - trimmed.len();

    if trimmed.starts_with("!=") || trimmed.starts_with("<>") {
        return Some(skipped + 2);
    }
    if trimmed.starts_with('=') {
        return Some(skipped + 1);
    }
    if let Some(after_not) = trimmed.strip_prefix("not") {
        let after_ws = after_not.trim_start();
        if after_ws.len() < after_not.len() && keyword_at(after_ws, "in") {
            return Some(skipped + (trimmed.len() - after_ws.len()) + 2);
        }
        return None;
    }
    if keyword_at(trimmed, "in") {
        return Some(skipped + 2);
    }
    None
}

fn keyword_at(s: &str, keyword: &str) -> bool {
    s.starts_with(keyword)
        && s.as_bytes()
            .get(keyword.len())
            .is_none_or(|b| !is_ident(*b))
}

fn placeholder_index(holes: &[usize], at: usize) -> usize {
    holes.iter().take_while(|&&hole| hole < at).count()
}

fn is_ident(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
