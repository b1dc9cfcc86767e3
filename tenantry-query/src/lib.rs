//! # tenantry-query
//!
//! Statement model and callback pipeline for Tenantry.
//!
//! This crate provides the seam that plugins hook into:
//! - Reflected model schemas with per-field annotation tags
//! - Statements carrying rows, update values, WHERE clauses and raw SQL
//! - Named callbacks before and after each operation's executor
//! - An async [`Connection`] trait plus an in-memory implementation
//! - A [`Database`] entry point that runs every statement through its callbacks
//!
//! ## Statements
//!
//! ```rust
//! use tenantry_query::{Expr, MemoryConnection, Operation, Statement, Value};
//!
//! let stmt = Statement::new(Operation::Query, "users", MemoryConnection::shared("main"))
//!     .with_clause(Expr::eq("tenant_id", "acme"));
//!
//! assert_eq!(stmt.clause.unwrap().to_inline_sql(), "tenant_id = acme");
//! ```
//!
//! ## Callbacks
//!
//! ```rust
//! use tenantry_query::{Database, FnCallback, MemoryConnection, QueryResult, Statement};
//!
//! let db = Database::new(MemoryConnection::shared("main"));
//! db.callback()
//!     .query()
//!     .before("*")
//!     .register("trace", FnCallback(|stmt: &mut Statement| -> QueryResult<()> {
//!         tracing::debug!(table = %stmt.table, "query");
//!         Ok(())
//!     }))
//!     .unwrap();
//! ```

pub mod callback;
pub mod clause;
pub mod connection;
pub mod database;
pub mod error;
pub mod logging;
pub mod memory;
pub mod schema;
pub mod statement;
pub mod value;

pub use callback::{
    Callback, CallbackRegistry, FnCallback, Processor, SharedCallback, executor_name,
};
pub use clause::{Expr, Where};
pub use connection::{Connection, ConnectionHandle};
pub use database::{Database, Plugin};
pub use error::{ErrorCode, QueryError, QueryResult};
pub use memory::MemoryConnection;
pub use schema::{Field, FieldKind, Model, Row, Schema};
pub use statement::{Operation, RawSql, Statement, Target, UpdateDest};
pub use value::Value;

// Re-export logging utilities
pub use logging::{get_log_format, get_log_level, init as init_logging, is_debug_enabled};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::callback::{Callback, FnCallback};
    pub use crate::clause::{Expr, Where};
    pub use crate::connection::{Connection, ConnectionHandle};
    pub use crate::database::{Database, Plugin};
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::schema::{Field, FieldKind, Model, Row, Schema};
    pub use crate::statement::{Operation, Statement};
    pub use crate::value::Value;
}
