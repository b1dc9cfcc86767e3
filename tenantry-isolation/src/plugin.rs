//! The multi-tenancy plugin.

use crate::callbacks::{self, TenantSource};
use crate::config::IsolationConfig;
use crate::encrypt::{
    Cipher, Direction, EncryptionPlan, TagAnalyzer, encrypt_clause, encrypt_values,
    transform_rows,
};
use crate::errors::{self, PLUGIN_NAME};
use crate::migration::MigrationTracker;
use crate::registry::{ConnectionFactory, ConnectionRegistry};
use crate::tag::TagResolver;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tenantry_query::{
    ConnectionHandle, Database, Model, Operation, Plugin, QueryResult, Schema, Statement,
};
use tracing::{debug, trace};

/// Routes statements of isolated models to per-tenant databases and
/// encrypts annotated fields.
///
/// ```rust
/// use std::sync::Arc;
/// use tenantry_isolation::{FnFactory, IsolationConfig, MultiTenancy};
/// use tenantry_query::{Database, MemoryConnection};
///
/// let plugin = MultiTenancy::new(IsolationConfig::default()).register(
///     "tenant_id",
///     FnFactory::new(|tenant| async move { Ok(MemoryConnection::shared(tenant)) }),
/// );
///
/// let db = Database::new(MemoryConnection::shared("main"));
/// db.use_plugin(Arc::new(plugin)).unwrap();
/// assert!(db.plugin("tenantry:multi-tenancy").is_some());
/// ```
pub struct MultiTenancy {
    config: IsolationConfig,
    resolver: TagResolver,
    registry: ConnectionRegistry,
    migrations: MigrationTracker,
    analyzer: TagAnalyzer,
    cipher: Option<Arc<dyn Cipher>>,
    isolation: RwLock<HashMap<String, bool>>,
}

impl MultiTenancy {
    /// Create the plugin without a connection factory.
    pub fn new(config: IsolationConfig) -> Self {
        Self {
            resolver: TagResolver::new(config.tenant_tag()),
            analyzer: TagAnalyzer::new(config.tag_name()),
            registry: ConnectionRegistry::new(),
            migrations: MigrationTracker::new(),
            cipher: None,
            isolation: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Set the tenant column and the factory that opens tenant
    /// connections. A blank tag keeps the configured one.
    pub fn register<F>(mut self, tenant_tag: impl Into<String>, factory: F) -> Self
    where
        F: ConnectionFactory + 'static,
    {
        let tenant_tag = tenant_tag.into();
        if !tenant_tag.trim().is_empty() {
            self.config.tenant_tag = tenant_tag;
            self.resolver = TagResolver::new(self.config.tenant_tag());
        }
        self.registry.set_factory(Arc::new(factory));
        self
    }

    /// Attach the cipher used for annotated fields.
    pub fn with_cipher<C: Cipher + 'static>(mut self, cipher: C) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    /// Attach an already shared cipher.
    pub fn with_shared_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Register a pre-built connection for a tenant.
    pub fn add_connection(&self, tenant: impl Into<String>, connection: ConnectionHandle) {
        self.registry.add_connection(tenant, connection);
    }

    /// Opt a model into tenant routing, as reported by its
    /// [`Model::data_isolation`].
    pub fn set_data_isolation<M: Model>(&self) -> &Self {
        let isolated = M::data_isolation();
        let mut isolation = self.isolation.write();
        isolation.insert(M::table_name(), isolated);
        isolation.insert(M::schema().table, isolated);
        debug!(table = %M::table_name(), isolated, "data isolation set");
        self
    }

    /// The configuration.
    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    /// The tenant connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// The migration tracker.
    pub fn migrations(&self) -> &MigrationTracker {
        &self.migrations
    }

    /// The encryption plan of a schema.
    pub fn encryption_plan(&self, schema: &Schema) -> Arc<EncryptionPlan> {
        self.analyzer.plan(schema)
    }

    /// Whether a statement's table is routed per tenant. The statement
    /// table is looked up first, then the schema table.
    pub fn is_isolated(&self, stmt: &Statement) -> bool {
        let isolation = self.isolation.read();
        isolation
            .get(&stmt.table)
            .or_else(|| stmt.schema_table().and_then(|t| isolation.get(t)))
            .copied()
            .unwrap_or(false)
    }

    /// Switch an isolated statement to its tenant connection and make sure
    /// the table exists there.
    pub(crate) async fn route(
        &self,
        stmt: &mut Statement,
        sources: &[TenantSource],
    ) -> QueryResult<()> {
        if !self.is_isolated(stmt) {
            trace!(table = %stmt.table, operation = %stmt.operation, "table not isolated");
            return Ok(());
        }

        let Some(tenant) = self.detect(stmt, sources)? else {
            if !self.config.require_tenant {
                debug!(
                    table = %stmt.table,
                    operation = %stmt.operation,
                    "no tenant detected, using default connection"
                );
                return Ok(());
            }
            let missing_clause = stmt.clause.as_ref().is_none_or(|c| c.is_empty());
            if sources.contains(&TenantSource::Clause) && missing_clause {
                return Err(errors::missing_where(&stmt.table));
            }
            return Err(errors::tenant_not_detected(&stmt.table));
        };

        let connection = self
            .registry
            .resolve(&tenant)
            .await
            .map_err(|e| e.with_table(&stmt.table))?;

        debug!(
            tenant_id = %tenant,
            table = %stmt.table,
            operation = %stmt.operation,
            db = %connection.name(),
            "routing statement"
        );
        stmt.switch_connection(connection.clone());

        if let Some(schema) = stmt.schema.clone() {
            self.migrations
                .ensure(&tenant, &stmt.table, &schema, &connection)
                .await?;
        }

        stmt.tenant = Some(tenant);
        Ok(())
    }

    fn detect(&self, stmt: &Statement, sources: &[TenantSource]) -> QueryResult<Option<String>> {
        for source in sources {
            let found = match source {
                TenantSource::Rows => match &stmt.schema {
                    Some(schema) => self.resolver.from_rows(schema, &stmt.target)?,
                    None => None,
                },
                TenantSource::Clause => stmt
                    .clause
                    .as_ref()
                    .and_then(|clause| self.resolver.from_clause(clause)),
                TenantSource::Values => stmt
                    .dest
                    .as_ref()
                    .and_then(|dest| self.resolver.from_values(dest.row())),
                TenantSource::Raw => stmt
                    .raw
                    .as_ref()
                    .and_then(|raw| self.resolver.from_sql(&raw.sql, &raw.vars)),
            };
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn encryption(
        &self,
        stmt: &Statement,
    ) -> QueryResult<Option<(Arc<Schema>, Arc<EncryptionPlan>, &dyn Cipher)>> {
        if !self.config.encrypted_save {
            return Ok(None);
        }
        let Some(schema) = stmt.schema.clone() else {
            return Ok(None);
        };
        let plan = self.analyzer.plan(&schema);
        if !plan.has_encrypted() {
            return Ok(None);
        }
        let cipher = self.cipher.as_deref().ok_or_else(errors::missing_cipher)?;
        Ok(Some((schema, plan, cipher)))
    }

    /// Encrypt the values a statement sends to the database.
    pub(crate) fn encrypt_statement(&self, stmt: &mut Statement) -> QueryResult<()> {
        let Some((schema, plan, cipher)) = self.encryption(stmt)? else {
            return Ok(());
        };

        let mut changed = 0;
        if stmt.operation == Operation::Create {
            let target = &mut stmt.target;
            changed += transform_rows(&plan, &schema, target, cipher, Direction::Encrypt)?;
        }
        if let Some(dest) = stmt.dest.as_mut() {
            changed += encrypt_values(&plan, dest, cipher)?;
        }
        if let Some(clause) = stmt.clause.as_mut() {
            changed += encrypt_clause(&plan, clause, cipher)?;
        }

        trace!(table = %stmt.table, operation = %stmt.operation, changed, "encrypted values");
        Ok(())
    }

    /// Decrypt the rows a statement carries back to the caller.
    pub(crate) fn decrypt_statement(&self, stmt: &mut Statement) -> QueryResult<()> {
        let Some((schema, plan, cipher)) = self.encryption(stmt)? else {
            return Ok(());
        };
        let target = &mut stmt.target;
        let changed = transform_rows(&plan, &schema, target, cipher, Direction::Decrypt)?;
        trace!(table = %stmt.table, operation = %stmt.operation, changed, "decrypted values");
        Ok(())
    }
}

impl std::fmt::Debug for MultiTenancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTenancy")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("has_cipher", &self.cipher.is_some())
            .finish()
    }
}

impl Plugin for MultiTenancy {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn initialize(self: Arc<Self>, db: &Database) -> QueryResult<()> {
        callbacks::register(&self, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt::FnCipher;
    use crate::registry::FnFactory;
    use pretty_assertions::assert_eq;
    use tenantry_query::schema::row_string;
    use tenantry_query::{
        ErrorCode, Expr, Field, FieldKind, MemoryConnection, QueryError, Row, Target, Value,
    };

    #[derive(Debug, Clone, PartialEq)]
    struct Account {
        tenant_id: String,
        email: String,
    }

    impl Model for Account {
        fn schema() -> Schema {
            Schema::new("Account", "accounts")
                .field(Field::new("tenant_id", FieldKind::String))
                .field(Field::new("email", FieldKind::String).tag("mt", "encrypt"))
        }

        fn to_row(&self) -> Row {
            let mut row = Row::new();
            row.insert("tenant_id".into(), self.tenant_id.clone().into());
            row.insert("email".into(), self.email.clone().into());
            row
        }

        fn from_row(row: &Row) -> QueryResult<Self> {
            Ok(Self {
                tenant_id: row_string(row, "tenant_id")?,
                email: row_string(row, "email")?,
            })
        }
    }

    struct Shared;

    impl Model for Shared {
        fn schema() -> Schema {
            Schema::new("Shared", "shared").field(Field::new("tenant_id", FieldKind::String))
        }

        fn to_row(&self) -> Row {
            Row::new()
        }

        fn from_row(_row: &Row) -> QueryResult<Self> {
            Ok(Self)
        }

        fn data_isolation() -> bool {
            false
        }
    }

    fn plugin(config: IsolationConfig) -> MultiTenancy {
        MultiTenancy::new(config).register(
            "",
            FnFactory::new(|tenant| async move {
                Ok(MemoryConnection::shared(format!("db-{}", tenant)))
            }),
        )
    }

    fn statement(op: Operation) -> Statement {
        Statement::new(op, "accounts", MemoryConnection::shared("main"))
            .with_schema(Arc::new(Account::schema()))
    }

    #[test]
    fn test_isolation_lookup() {
        let plugin = plugin(IsolationConfig::default());
        let stmt = statement(Operation::Query);
        assert!(!plugin.is_isolated(&stmt));

        plugin.set_data_isolation::<Account>().set_data_isolation::<Shared>();
        assert!(plugin.is_isolated(&stmt));

        let shared = Statement::new(Operation::Query, "shared", MemoryConnection::shared("main"));
        assert!(!plugin.is_isolated(&shared));

        let aliased =
            Statement::new(Operation::Query, "accounts_view", MemoryConnection::shared("main"))
                .with_schema(Arc::new(Account::schema()));
        assert!(plugin.is_isolated(&aliased));

        let shared_alias =
            Statement::new(Operation::Query, "shared_view", MemoryConnection::shared("main"))
                .with_schema(Arc::new(Shared::schema()));
        assert!(!plugin.is_isolated(&shared_alias));
    }

    #[tokio::test]
    async fn test_route_switches_connection_and_migrates() {
        let plugin = plugin(IsolationConfig::default());
        plugin.set_data_isolation::<Account>();

        let mut stmt = statement(Operation::Query).with_clause(Expr::eq("tenant_id", "acme"));
        plugin.route(&mut stmt, &[TenantSource::Clause]).await.unwrap();

        assert_eq!(stmt.connection.name(), "db-acme");
        assert_eq!(stmt.tenant.as_deref(), Some("acme"));
        assert!(plugin.migrations().is_migrated("acme", "accounts").await);
    }

    #[tokio::test]
    async fn test_route_errors() {
        let plugin = plugin(IsolationConfig::default());
        plugin.set_data_isolation::<Account>();

        let mut no_where = statement(Operation::Query);
        let err = plugin.route(&mut no_where, &[TenantSource::Clause]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingWhereClause);

        let mut no_tenant = statement(Operation::Query).with_clause(Expr::eq("email", "x"));
        let err = plugin.route(&mut no_tenant, &[TenantSource::Clause]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantNotDetected);
    }

    #[tokio::test]
    async fn test_update_falls_back_to_values() {
        let plugin = plugin(IsolationConfig::default());
        plugin.set_data_isolation::<Account>();

        let mut values = Row::new();
        values.insert("tenant_id".into(), "globex".into());
        let mut stmt = statement(Operation::Update)
            .with_clause(Expr::eq("email", "x"))
            .with_dest(tenantry_query::UpdateDest::Map(values));

        plugin
            .route(&mut stmt, &[TenantSource::Clause, TenantSource::Values])
            .await
            .unwrap();
        assert_eq!(stmt.connection.name(), "db-globex");
    }

    #[tokio::test]
    async fn test_optional_tenant_keeps_default_connection() {
        let plugin = plugin(IsolationConfig::default().with_require_tenant(false));
        plugin.set_data_isolation::<Account>();

        let mut stmt = statement(Operation::Query);
        plugin.route(&mut stmt, &[TenantSource::Clause]).await.unwrap();
        assert_eq!(stmt.connection.name(), "main");
        assert_eq!(stmt.tenant, None);
    }

    #[test]
    fn test_encryption_requires_cipher() {
        let plugin = plugin(IsolationConfig::default().with_encrypted_save(true));
        let mut stmt = statement(Operation::Create).with_target(Target::Single(
            Account {
                tenant_id: "acme".into(),
                email: "a@b.c".into(),
            }
            .to_row(),
        ));

        let err = plugin.encrypt_statement(&mut stmt).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingConfiguration);
        assert!(err.message.contains("no cipher configured"));
    }

    #[test]
    fn test_encrypt_and_decrypt_statement() {
        let plugin = plugin(IsolationConfig::default().with_encrypted_save(true)).with_cipher(
            FnCipher::new(
                |plain| Ok(format!("~{}", plain)),
                |sealed| {
                    sealed
                        .strip_prefix('~')
                        .map(str::to_string)
                        .ok_or_else(|| QueryError::internal("not sealed"))
                },
            ),
        );
        let mut stmt = statement(Operation::Create).with_target(Target::Single(
            Account {
                tenant_id: "acme".into(),
                email: "a@b.c".into(),
            }
            .to_row(),
        ));

        plugin.encrypt_statement(&mut stmt).unwrap();
        let row = stmt.target.rows().next().unwrap().clone();
        assert_eq!(row["email"], Value::from("~a@b.c"));
        assert_eq!(row["tenant_id"], Value::from("acme"));

        plugin.decrypt_statement(&mut stmt).unwrap();
        assert_eq!(stmt.target.rows().next().unwrap()["email"], Value::from("a@b.c"));
    }

    #[test]
    fn test_encryption_disabled_is_noop() {
        let plugin = plugin(IsolationConfig::default());
        let mut stmt = statement(Operation::Query).with_clause(Expr::eq("email", "a@b.c"));
        plugin.encrypt_statement(&mut stmt).unwrap();
        assert_eq!(
            stmt.clause.unwrap().to_inline_sql(),
            "email = a@b.c"
        );
    }

    #[test]
    fn test_register_changes_tag() {
        let plugin = MultiTenancy::new(IsolationConfig::default()).register(
            "org_id",
            FnFactory::new(|tenant| async move { Ok(MemoryConnection::shared(tenant)) }),
        );
        assert_eq!(plugin.config().tenant_tag(), "org_id");
        assert!(plugin.registry().has_factory());
        assert_eq!(plugin.name(), "tenantry:multi-tenancy");
    }
}
