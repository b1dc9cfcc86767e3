//! Per-tenant schema migration tracking.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tenantry_query::{ConnectionHandle, QueryError, QueryResult, Schema};
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Remembers which tables were migrated on each tenant connection.
#[derive(Debug, Default)]
pub struct MigrationTracker {
    tenants: RwLock<HashMap<String, Arc<Mutex<HashSet<String>>>>>,
}

impl MigrationTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Migrate `table` on the tenant's connection unless that already
    /// succeeded once.
    ///
    /// Migrations of one tenant run one at a time. A failed migration is
    /// not recorded. Returns whether a migration ran.
    pub async fn ensure(
        &self,
        tenant: &str,
        table: &str,
        schema: &Schema,
        connection: &ConnectionHandle,
    ) -> QueryResult<bool> {
        let tables = self.tables(tenant);
        let mut tables = tables.lock().await;
        if tables.contains(table) {
            return Ok(false);
        }

        debug!(tenant_id = %tenant, table = %table, "migrating tenant table");
        connection.auto_migrate(schema).await.map_err(|e| {
            error!(tenant_id = %tenant, table = %table, error = %e, "tenant migration failed");
            QueryError::migration(table, format!("auto migrate failed: {}", e.message))
                .with_tenant(tenant)
                .with_source(e)
        })?;

        tables.insert(table.to_string());
        Ok(true)
    }

    /// Check whether a table was migrated for a tenant.
    pub async fn is_migrated(&self, tenant: &str, table: &str) -> bool {
        let Some(tables) = self.tenants.read().get(tenant).cloned() else {
            return false;
        };
        let tables = tables.lock().await;
        tables.contains(table)
    }

    fn tables(&self, tenant: &str) -> Arc<Mutex<HashSet<String>>> {
        if let Some(tables) = self.tenants.read().get(tenant) {
            return tables.clone();
        }
        self.tenants
            .write()
            .entry(tenant.to_string())
            .or_default()
            .clone()
    }
}
