//! Field annotation analysis.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tenantry_query::{FieldKind, Schema};
use tracing::trace;

/// Parsed annotation of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTag {
    /// Model field name.
    pub field: String,
    /// Column name.
    pub column: String,
    /// Field kind.
    pub kind: FieldKind,
    /// The raw tag body.
    pub raw: String,
    /// Whether the field is stored encrypted.
    pub encrypt: bool,
}

/// Check whether a tag body marks its field encrypted.
///
/// The body is split on `;` and any part containing `encrypt` counts.
pub fn is_encrypt_tag(body: &str) -> bool {
    body.split(';').any(|part| part.contains("encrypt"))
}

/// The encrypted columns of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncryptionPlan {
    /// Table name.
    pub table: String,
    /// Annotated fields, keyed by column.
    pub tags: IndexMap<String, FieldTag>,
}

impl EncryptionPlan {
    /// Analyze a schema's annotations under `tag_name`.
    pub fn analyze(schema: &Schema, tag_name: &str) -> Self {
        let tags = schema
            .fields
            .iter()
            .filter_map(|field| {
                let raw = field.tag_value(tag_name)?;
                Some((
                    field.db_name.clone(),
                    FieldTag {
                        field: field.name.clone(),
                        column: field.db_name.clone(),
                        kind: field.kind,
                        raw: raw.to_string(),
                        encrypt: is_encrypt_tag(raw),
                    },
                ))
            })
            .collect();

        Self {
            table: schema.table.clone(),
            tags,
        }
    }

    /// Whether any column is encrypted.
    pub fn has_encrypted(&self) -> bool {
        self.tags.values().any(|t| t.encrypt)
    }

    /// Encrypted column names, in schema order.
    pub fn encrypted_columns(&self) -> impl Iterator<Item = &str> {
        self.tags
            .values()
            .filter(|t| t.encrypt)
            .map(|t| t.column.as_str())
    }

    /// Encrypted model field names, in schema order.
    pub fn encrypted_fields(&self) -> impl Iterator<Item = &str> {
        self.tags
            .values()
            .filter(|t| t.encrypt)
            .map(|t| t.field.as_str())
    }

    /// Check whether a column (possibly table qualified or quoted) is
    /// encrypted.
    pub fn is_encrypted_column(&self, column: &str) -> bool {
        let column = column.rsplit('.').next().unwrap_or(column);
        let column = column.trim_matches(|c| c == '`' || c == '"');
        self.tags
            .values()
            .any(|t| t.encrypt && t.column.eq_ignore_ascii_case(column))
    }
}

/// Analyzes schemas once per table and caches the plans.
#[derive(Debug)]
pub struct TagAnalyzer {
    tag_name: String,
    plans: RwLock<HashMap<String, Arc<EncryptionPlan>>>,
}

impl TagAnalyzer {
    /// Create an analyzer reading the `tag_name` annotation.
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into(),
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// The cached plan of a schema's table.
    pub fn plan(&self, schema: &Schema) -> Arc<EncryptionPlan> {
        if let Some(plan) = self.plans.read().get(&schema.table) {
            return plan.clone();
        }
        self.plans
            .write()
            .entry(schema.table.clone())
            .or_insert_with(|| {
                let plan = EncryptionPlan::analyze(schema, &self.tag_name);
                trace!(
                    table = %plan.table,
                    encrypted = ?plan.encrypted_columns().collect::<Vec<_>>(),
                    "analyzed encryption tags"
                );
                Arc::new(plan)
            })
            .clone()
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.plans.read().len()
    }

    /// Check if no plan is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tenantry_query::Field;

    fn schema() -> Schema {
        Schema::new("User", "users")
            .field(Field::new("id", FieldKind::Int).primary_key())
            .field(Field::new("phone", FieldKind::String).named("Phone").tag("mt", "encrypt"))
            .field(Field::new("email", FieldKind::String).tag("mt", "index;encrypt:aes"))
            .field(Field::new("nickname", FieldKind::String).tag("mt", "index"))
            .field(Field::new("address", FieldKind::String).tag("other", "encrypt"))
    }

    #[test]
    fn test_is_encrypt_tag() {
        assert!(is_encrypt_tag("encrypt"));
        assert!(is_encrypt_tag("size:64;encrypt"));
        assert!(!is_encrypt_tag("size:64;index"));
        assert!(!is_encrypt_tag(""));
    }

    #[test]
    fn test_plan_columns() {
        let plan = EncryptionPlan::analyze(&schema(), "mt");
        assert_eq!(plan.table, "users");
        assert_eq!(plan.tags.len(), 3);
        assert_eq!(
            plan.encrypted_columns().collect::<Vec<_>>(),
            vec!["phone", "email"]
        );
        assert_eq!(plan.encrypted_fields().collect::<Vec<_>>(), vec!["Phone", "email"]);
        assert!(plan.is_encrypted_column("users.PHONE"));
        assert!(!plan.is_encrypted_column("nickname"));
        assert!(!plan.is_encrypted_column("address"));
    }

    #[test]
    fn test_other_tag_name() {
        let plan = EncryptionPlan::analyze(&schema(), "other");
        assert_eq!(plan.encrypted_columns().collect::<Vec<_>>(), vec!["address"]);
    }

    #[test]
    fn test_analyzer_caches_per_table() {
        let analyzer = TagAnalyzer::new("mt");
        let a = analyzer.plan(&schema());
        let b = analyzer.plan(&schema());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(analyzer.len(), 1);
    }
}
