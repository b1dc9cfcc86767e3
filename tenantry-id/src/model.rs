//! Common columns for models keyed by a distributed id.

use crate::id::DistributedId;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tenantry_query::schema::row_string;
use tenantry_query::{Field, FieldKind, QueryResult, Row, Schema};

/// Format of the timestamp columns.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The `id`, `create_time` and `update_time` columns.
///
/// ```rust
/// use tenantry_id::BaseModel;
/// use tenantry_query::{Field, FieldKind, Schema};
///
/// let schema = BaseModel::extend(Schema::new("Order", "orders"))
///     .field(Field::new("tenant_id", FieldKind::String));
///
/// assert_eq!(
///     schema.columns().collect::<Vec<_>>(),
///     vec!["id", "create_time", "update_time", "tenant_id"]
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseModel {
    /// Primary key.
    pub id: DistributedId,
    /// Creation time, `YYYY-MM-DD HH:MM:SS`.
    pub create_time: String,
    /// Last update time, empty until the first update.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_time: String,
}

impl BaseModel {
    /// Create the columns for a new record.
    pub fn new(id: DistributedId) -> Self {
        Self {
            id,
            create_time: now(),
            update_time: String::new(),
        }
    }

    /// Record an update.
    pub fn touch(&mut self) {
        self.update_time = now();
    }

    /// The column definitions.
    pub fn fields() -> Vec<Field> {
        vec![
            Field::new("id", FieldKind::Int)
                .named("ID")
                .primary_key()
                .tag("db", "type:bigint"),
            Field::new("create_time", FieldKind::String)
                .named("CreateTime")
                .tag("db", "index;type:varchar(20)"),
            Field::new("update_time", FieldKind::String)
                .named("UpdateTime")
                .tag("db", "type:varchar(20)"),
        ]
    }

    /// Prepend the columns to a schema.
    pub fn extend(schema: Schema) -> Schema {
        let mut fields = Self::fields();
        fields.extend(schema.fields);
        Schema { fields, ..schema }
    }

    /// Write the columns into a row.
    pub fn write_row(&self, row: &mut Row) {
        row.insert("id".into(), self.id.into());
        row.insert("create_time".into(), self.create_time.clone().into());
        row.insert("update_time".into(), self.update_time.clone().into());
    }

    /// Read the columns from a row. Missing timestamps read as empty.
    pub fn from_row(row: &Row) -> QueryResult<Self> {
        let id = match row.get("id") {
            Some(value) => DistributedId::try_from(value)?,
            None => DistributedId::default(),
        };
        Ok(Self {
            id,
            create_time: row_string(row, "create_time")?,
            update_time: row_string(row, "update_time")?,
        })
    }
}

fn now() -> String {
    Local::now().format(TIME_FORMAT).to_string()
}
