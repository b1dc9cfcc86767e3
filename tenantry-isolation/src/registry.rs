//! Tenant connection registry.

use crate::errors;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tenantry_query::{ConnectionHandle, QueryResult};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Opens the database connection of a tenant.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create the connection for `tenant`.
    async fn create_connection(&self, tenant: &str) -> QueryResult<ConnectionHandle>;
}

/// Type alias for async factory functions.
pub type FactoryFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = QueryResult<ConnectionHandle>> + Send>>
        + Send
        + Sync,
>;

/// A factory backed by an async closure.
pub struct FnFactory {
    create_fn: FactoryFn,
}

impl FnFactory {
    /// Wrap an async closure.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = QueryResult<ConnectionHandle>> + Send + 'static,
    {
        Self {
            create_fn: Arc::new(move |tenant| Box::pin(f(tenant))),
        }
    }
}

impl std::fmt::Debug for FnFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnFactory").finish()
    }
}

#[async_trait]
impl ConnectionFactory for FnFactory {
    async fn create_connection(&self, tenant: &str) -> QueryResult<ConnectionHandle> {
        (self.create_fn)(tenant.to_string()).await
    }
}

type Slot = Arc<OnceCell<ConnectionHandle>>;

/// Maps tenant identifiers to live connections.
///
/// Connections are created on first use through the factory. Concurrent
/// first uses of the same tenant share a single creation; a failed
/// creation is not remembered.
#[derive(Default)]
pub struct ConnectionRegistry {
    factory: Option<Arc<dyn ConnectionFactory>>,
    slots: RwLock<HashMap<String, Slot>>,
}

impl ConnectionRegistry {
    /// Create an empty registry without a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that opens connections with `factory`.
    pub fn with_factory(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory: Some(factory),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the factory.
    pub fn set_factory(&mut self, factory: Arc<dyn ConnectionFactory>) {
        self.factory = Some(factory);
    }

    /// Check whether a factory is configured.
    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }

    /// Register a pre-built connection for a tenant, replacing any
    /// existing one.
    pub fn add_connection(&self, tenant: impl Into<String>, connection: ConnectionHandle) {
        let tenant = tenant.into();
        info!(tenant_id = %tenant, connection = %connection.name(), "tenant connection added");
        let slot = Arc::new(OnceCell::new_with(Some(connection)));
        if self.slots.write().insert(tenant.clone(), slot).is_some() {
            warn!(tenant_id = %tenant, "replaced existing tenant connection");
        }
    }

    /// The connection of a tenant if it is already open.
    pub fn get(&self, tenant: &str) -> Option<ConnectionHandle> {
        self.slots.read().get(tenant).and_then(|slot| slot.get().cloned())
    }

    /// Check whether a tenant has an open connection.
    pub fn contains(&self, tenant: &str) -> bool {
        self.get(tenant).is_some()
    }

    /// Tenants with an open connection.
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> = self
            .slots
            .read()
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(tenant, _)| tenant.clone())
            .collect();
        tenants.sort();
        tenants
    }

    /// Number of open tenant connections.
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|s| s.initialized()).count()
    }

    /// Check if no tenant connection is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a tenant's connection.
    pub fn remove(&self, tenant: &str) -> Option<ConnectionHandle> {
        self.slots
            .write()
            .remove(tenant)
            .and_then(|slot| slot.get().cloned())
    }

    /// Return the tenant's connection, opening it on first use.
    pub async fn resolve(&self, tenant: &str) -> QueryResult<ConnectionHandle> {
        if tenant.is_empty() {
            return Err(errors::plugin_error(
                tenantry_query::ErrorCode::TenantNotDetected,
                "tenant identifier not detected",
            ));
        }

        let slot = self.slot(tenant);
        if let Some(connection) = slot.get() {
            return Ok(connection.clone());
        }

        let factory = self
            .factory
            .clone()
            .ok_or_else(|| errors::missing_factory(tenant))?;

        let connection = slot
            .get_or_try_init(|| async {
                debug!(tenant_id = %tenant, "opening tenant connection");
                factory
                    .create_connection(tenant)
                    .await
                    .map_err(|e| errors::factory_failed(tenant, e))
            })
            .await
            .inspect_err(|e| warn!(tenant_id = %tenant, error = %e, "tenant connection failed"))?;

        Ok(connection.clone())
    }

    fn slot(&self, tenant: &str) -> Slot {
        if let Some(slot) = self.slots.read().get(tenant) {
            return slot.clone();
        }
        self.slots
            .write()
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("has_factory", &self.has_factory())
            .field("tenants", &self.tenants())
            .finish()
    }
}
