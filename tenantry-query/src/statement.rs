//! The in-flight statement passed through callbacks.

use crate::clause::{Expr, Where};
use crate::connection::ConnectionHandle;
use crate::schema::{Row, Schema};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// The kind of operation a statement performs.
///
/// Each operation has its own callback processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// INSERT of one or more model rows.
    Create,
    /// SELECT into model rows.
    Query,
    /// UPDATE from a column map or a model.
    Update,
    /// DELETE.
    Delete,
    /// SELECT returning raw rows.
    Row,
    /// Raw SQL.
    Raw,
}

impl Operation {
    /// All operations, in registration order.
    pub const ALL: [Operation; 6] = [
        Self::Create,
        Self::Query,
        Self::Update,
        Self::Delete,
        Self::Row,
        Self::Raw,
    ];

    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Query => "query",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Row => "row",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The model value(s) a statement reads from or writes into.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Target {
    /// No model value.
    #[default]
    None,
    /// A single model.
    Single(Row),
    /// A slice of models.
    Many(Vec<Row>),
}

impl Target {
    /// Iterate over the rows.
    pub fn rows(&self) -> std::slice::Iter<'_, Row> {
        match self {
            Self::None => Default::default(),
            Self::Single(row) => std::slice::from_ref(row).iter(),
            Self::Many(rows) => rows.iter(),
        }
    }

    /// Iterate mutably over the rows.
    pub fn rows_mut(&mut self) -> std::slice::IterMut<'_, Row> {
        match self {
            Self::None => Default::default(),
            Self::Single(row) => std::slice::from_mut(row).iter_mut(),
            Self::Many(rows) => rows.iter_mut(),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Single(_) => 1,
            Self::Many(rows) => rows.len(),
        }
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all rows out of the target.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Self::None => Vec::new(),
            Self::Single(row) => vec![row],
            Self::Many(rows) => rows,
        }
    }
}

/// The values of an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDest {
    /// Explicit column map.
    Map(Row),
    /// A model whose non-zero columns are written.
    Model(Row),
}

impl UpdateDest {
    /// Borrow the underlying row.
    pub fn row(&self) -> &Row {
        match self {
            Self::Map(row) | Self::Model(row) => row,
        }
    }

    /// Mutably borrow the underlying row.
    pub fn row_mut(&mut self) -> &mut Row {
        match self {
            Self::Map(row) | Self::Model(row) => row,
        }
    }

    /// Columns to assign, skipping zero values of a model update.
    pub fn assignments(&self) -> impl Iterator<Item = (&String, &Value)> {
        let skip_zero = matches!(self, Self::Model(_));
        self.row()
            .iter()
            .filter(move |(_, v)| !(skip_zero && v.is_zero()))
    }
}

/// Raw SQL with its bound variables.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSql {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Bound variables.
    pub vars: Vec<Value>,
}

/// A statement travelling through the callback pipeline.
///
/// Callbacks may redirect it to another connection, rewrite its rows,
/// update values or clause literals before the executor runs it.
#[derive(Clone)]
pub struct Statement {
    /// The operation.
    pub operation: Operation,
    /// Target table.
    pub table: String,
    /// Reflected schema, when the statement was built from a model.
    pub schema: Option<Arc<Schema>>,
    /// Model rows written (create) or read back (query, row).
    pub target: Target,
    /// Update values.
    pub dest: Option<UpdateDest>,
    /// WHERE clause.
    pub clause: Option<Where>,
    /// Raw SQL for `Raw` statements.
    pub raw: Option<RawSql>,
    /// The connection the statement will execute on.
    pub connection: ConnectionHandle,
    /// Tenant the statement was routed to, if any.
    pub tenant: Option<String>,
    /// Rows affected by the executor.
    pub rows_affected: u64,
}

impl Statement {
    /// Create a statement for a table on a connection.
    pub fn new(
        operation: Operation,
        table: impl Into<String>,
        connection: ConnectionHandle,
    ) -> Self {
        Self {
            operation,
            table: table.into(),
            schema: None,
            target: Target::None,
            dest: None,
            clause: None,
            raw: None,
            connection,
            tenant: None,
            rows_affected: 0,
        }
    }

    /// Attach a schema.
    pub fn with_schema(mut self, schema: Arc<Schema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Set the target rows.
    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Set the update values.
    pub fn with_dest(mut self, dest: UpdateDest) -> Self {
        self.dest = Some(dest);
        self
    }

    /// Set the WHERE clause.
    pub fn with_clause(mut self, clause: impl Into<Where>) -> Self {
        self.clause = Some(clause.into());
        self
    }

    /// Set raw SQL.
    pub fn with_raw(mut self, sql: impl Into<String>, vars: Vec<Value>) -> Self {
        self.raw = Some(RawSql {
            sql: sql.into(),
            vars,
        });
        self
    }

    /// Append a predicate to the WHERE clause, creating it if needed.
    pub fn add_where(&mut self, expr: Expr) {
        self.clause.get_or_insert_with(Where::new).exprs.push(expr);
    }

    /// Table name of the attached schema, if any.
    pub fn schema_table(&self) -> Option<&str> {
        self.schema.as_deref().map(|s| s.table.as_str())
    }

    /// Replace the connection the statement executes on.
    pub fn switch_connection(&mut self, connection: ConnectionHandle) {
        self.connection = connection;
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("operation", &self.operation)
            .field("table", &self.table)
            .field("target", &self.target)
            .field("dest", &self.dest)
            .field("clause", &self.clause)
            .field("raw", &self.raw)
            .field("connection", &self.connection.name())
            .field("tenant", &self.tenant)
            .field("rows_affected", &self.rows_affected)
            .finish()
    }
}
