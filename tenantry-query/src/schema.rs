//! Reflected model descriptions.
//!
//! A [`Schema`] describes how a Rust model maps onto a table: its columns,
//! their kinds and the annotation tags attached to each field. Plugins read
//! tags (for example `mt:"encrypt"`) to decide how a column is treated.
//!
//! ```rust
//! use tenantry_query::schema::{Field, FieldKind, Schema};
//!
//! let schema = Schema::new("User", "users")
//!     .field(Field::new("id", FieldKind::Int).primary_key())
//!     .field(Field::new("tenant_id", FieldKind::String))
//!     .field(Field::new("phone", FieldKind::String).tag("mt", "encrypt"));
//!
//! assert_eq!(schema.field_by_db_name("phone").unwrap().tag_value("mt"), Some("encrypt"));
//! ```

use crate::error::{QueryError, QueryResult};
use crate::value::Value;
use indexmap::IndexMap;

/// A single row: column name to value, in column order.
pub type Row = IndexMap<String, Value>;

/// The storage kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Text column.
    String,
    /// Integer column.
    Int,
    /// Floating point column.
    Float,
    /// Boolean column.
    Bool,
}

impl FieldKind {
    /// SQL type used when creating the column.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::String => "TEXT",
            Self::Int => "BIGINT",
            Self::Float => "DOUBLE PRECISION",
            Self::Bool => "BOOLEAN",
        }
    }

    /// Check whether a value can be stored in a column of this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::String, Value::String(_))
                | (Self::Int, Value::Int(_))
                | (Self::Float, Value::Float(_) | Value::Int(_))
                | (Self::Bool, Value::Bool(_))
        )
    }
}

/// A reflected model field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Rust-side field name.
    pub name: String,
    /// Column name.
    pub db_name: String,
    /// Column kind.
    pub kind: FieldKind,
    /// Whether this column is the primary key.
    pub primary_key: bool,
    /// Annotation tags, keyed by tag name.
    pub tags: IndexMap<String, String>,
}

impl Field {
    /// Create a field whose Rust name and column name are the same.
    pub fn new(db_name: impl Into<String>, kind: FieldKind) -> Self {
        let db_name = db_name.into();
        Self {
            name: db_name.clone(),
            db_name,
            kind,
            primary_key: false,
            tags: IndexMap::new(),
        }
    }

    /// Set the Rust-side field name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Mark the field as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Attach an annotation tag.
    pub fn tag(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.tags.insert(name.into(), body.into());
        self
    }

    /// Look up the body of an annotation tag.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    /// Read this field's value from a row.
    ///
    /// Returns the value and whether it is the zero value of its type;
    /// a missing column reads as `Null`.
    pub fn value_of<'r>(&self, row: &'r Row) -> (Option<&'r Value>, bool) {
        match row.get(&self.db_name) {
            Some(value) => (Some(value), value.is_zero()),
            None => (None, true),
        }
    }

    /// Write a value into this field's column of a row.
    pub fn set(&self, row: &mut Row, value: impl Into<Value>) -> QueryResult<()> {
        let value = value.into();
        if !self.kind.accepts(&value) {
            return Err(QueryError::invalid_type(
                &self.db_name,
                format!(
                    "cannot assign {} value to {:?} column {}",
                    value.type_name(),
                    self.kind,
                    self.db_name
                ),
            ));
        }
        row.insert(self.db_name.clone(), value);
        Ok(())
    }
}

/// A reflected model: table name plus ordered fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Model name.
    pub name: String,
    /// Table name.
    pub table: String,
    /// Fields in declaration order.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Find a field by column name.
    pub fn field_by_db_name(&self, db_name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.db_name == db_name)
    }

    /// Find a field by Rust-side name.
    pub fn field_by_name(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Column names in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.db_name.as_str())
    }

    /// Render a `CREATE TABLE IF NOT EXISTS` statement for this schema.
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .fields
            .iter()
            .map(|f| {
                let mut col = format!("{} {}", f.db_name, f.kind.sql_type());
                if f.primary_key {
                    col.push_str(" PRIMARY KEY");
                }
                col
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.table, columns)
    }
}

/// A type that can be stored through the statement pipeline.
pub trait Model: Send + Sync + Sized {
    /// The reflected schema of this model.
    fn schema() -> Schema;

    /// Convert the model into a row.
    fn to_row(&self) -> Row;

    /// Build the model back from a row.
    fn from_row(row: &Row) -> QueryResult<Self>;

    /// Table name, defaulting to the schema's table.
    fn table_name() -> String {
        Self::schema().table
    }

    /// Whether rows of this model are routed to per-tenant databases.
    fn data_isolation() -> bool {
        true
    }
}

/// Read a string column from a row, treating a missing column as empty.
pub fn row_string(row: &Row, column: &str) -> QueryResult<String> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(QueryError::invalid_type(
            column,
            format!("expected string for {}, found {}", column, other.type_name()),
        )),
    }
}

/// Read an integer column from a row, treating a missing column as zero.
pub fn row_int(row: &Row, column: &str) -> QueryResult<i64> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Int(i)) => Ok(*i),
        Some(other) => Err(QueryError::invalid_type(
            column,
            format!("expected int for {}, found {}", column, other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Schema {
        Schema::new("User", "users")
            .field(Field::new("id", FieldKind::Int).primary_key())
            .field(Field::new("tenant_id", FieldKind::String).named("TenantId"))
            .field(Field::new("phone", FieldKind::String).tag("mt", "encrypt"))
    }

    #[test]
    fn test_field_lookup() {
        let schema = users();
        assert_eq!(schema.field_by_name("TenantId").unwrap().db_name, "tenant_id");
        assert!(schema.field_by_db_name("missing").is_none());
        assert_eq!(schema.columns().collect::<Vec<_>>(), ["id", "tenant_id", "phone"]);
    }

    #[test]
    fn test_create_table_sql() {
        assert_eq!(
            users().create_table_sql(),
            "CREATE TABLE IF NOT EXISTS users (id BIGINT PRIMARY KEY, tenant_id TEXT, phone TEXT)"
        );
    }

    #[test]
    fn test_field_value_and_set() {
        let schema = users();
        let phone = schema.field_by_db_name("phone").unwrap();
        let mut row = Row::new();

        assert_eq!(phone.value_of(&row), (None, true));
        phone.set(&mut row, "555").unwrap();
        assert_eq!(phone.value_of(&row), (Some(&Value::from("555")), false));

        let err = phone.set(&mut row, 5).unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidDataType);
    }

    #[test]
    fn test_row_readers() {
        let mut row = Row::new();
        row.insert("name".into(), Value::from("a"));
        row.insert("age".into(), Value::from(3));
        assert_eq!(row_string(&row, "name").unwrap(), "a");
        assert_eq!(row_string(&row, "absent").unwrap(), "");
        assert_eq!(row_int(&row, "age").unwrap(), 3);
        assert!(row_int(&row, "name").is_err());
    }
}
