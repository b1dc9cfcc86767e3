//! # Tenantry
//!
//! Database-per-tenant isolation for an async query pipeline.
//!
//! Tenantry provides:
//! - A statement and callback pipeline with an async connection seam
//! - A multi-tenancy plugin that routes each statement to its tenant's
//!   database, opening and migrating it on first use
//! - Deterministic field encryption driven by model annotations
//! - Snowflake identifiers bound to a tenant
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tenantry::prelude::*;
//!
//! struct Order {
//!     id: i64,
//!     tenant_id: String,
//! }
//!
//! impl Model for Order {
//!     fn schema() -> Schema {
//!         Schema::new("Order", "orders")
//!             .field(Field::new("id", FieldKind::Int).primary_key())
//!             .field(Field::new("tenant_id", FieldKind::String))
//!     }
//!
//!     fn to_row(&self) -> Row {
//!         let mut row = Row::new();
//!         row.insert("id".into(), self.id.into());
//!         row.insert("tenant_id".into(), self.tenant_id.clone().into());
//!         row
//!     }
//!
//!     fn from_row(row: &Row) -> QueryResult<Self> {
//!         Ok(Self {
//!             id: tenantry::query::schema::row_int(row, "id")?,
//!             tenant_id: tenantry::query::schema::row_string(row, "tenant_id")?,
//!         })
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), QueryError> {
//! let plugin = MultiTenancy::new(IsolationConfig::default()).register(
//!     "tenant_id",
//!     FnFactory::new(|tenant| async move { Ok(MemoryConnection::shared(tenant)) }),
//! );
//! plugin.set_data_isolation::<Order>();
//!
//! let db = Database::new(MemoryConnection::shared("main"));
//! db.use_plugin(Arc::new(plugin))?;
//!
//! let mut order = Order { id: 1, tenant_id: "acme".into() };
//! db.create(&mut order).await?;
//!
//! let found = db.find::<Order>(Expr::eq("tenant_id", "acme")).await?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Statements, callbacks and connections.
pub mod query {
    pub use tenantry_query::*;
}

/// Tenant routing and field encryption.
pub mod isolation {
    pub use tenantry_isolation::*;
}

/// Distributed identifiers.
pub mod id {
    pub use tenantry_id::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use tenantry_id::{BaseModel, DistributedId, IdGenerator};
    pub use tenantry_isolation::prelude::*;
    pub use tenantry_query::prelude::*;
    pub use tenantry_query::MemoryConnection;
}

// Re-export key types at the crate root
pub use tenantry_isolation::{IsolationConfig, MultiTenancy};
pub use tenantry_query::{Database, QueryError, QueryResult};
