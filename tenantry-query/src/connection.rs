//! The connection seam statements execute on.

use crate::error::QueryResult;
use crate::schema::Schema;
use crate::statement::Statement;
use async_trait::async_trait;
use std::sync::Arc;

/// A live database handle.
///
/// Implementations own their pooling; callers only pick which handle a
/// statement runs on.
#[async_trait]
pub trait Connection: Send + Sync {
    /// A name identifying the physical database, used in logs.
    fn name(&self) -> &str;

    /// Execute a statement, filling its target rows for reads and its
    /// affected row count for writes.
    async fn execute(&self, stmt: &mut Statement) -> QueryResult<()>;

    /// Create the table described by `schema` if it does not exist.
    async fn auto_migrate(&self, schema: &Schema) -> QueryResult<()>;
}

/// A shared connection handle.
pub type ConnectionHandle = Arc<dyn Connection>;
