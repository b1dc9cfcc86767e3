//! The database entry point: default connection, callbacks and plugins.

use crate::callback::CallbackRegistry;
use crate::clause::{Expr, Where};
use crate::connection::ConnectionHandle;
use crate::error::{ErrorCode, QueryError, QueryResult};
use crate::schema::{Model, Row, Schema};
use crate::statement::{Operation, Statement, Target, UpdateDest};
use crate::value::Value;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// An extension that registers callbacks on a [`Database`].
pub trait Plugin: Send + Sync {
    /// Unique plugin name.
    fn name(&self) -> &str;

    /// Register the plugin's callbacks.
    fn initialize(self: Arc<Self>, db: &Database) -> QueryResult<()>;
}

/// A database handle that runs every statement through its callbacks.
pub struct Database {
    connection: ConnectionHandle,
    callbacks: CallbackRegistry,
    plugins: RwLock<IndexMap<String, Arc<dyn Plugin>>>,
    schemas: RwLock<HashMap<TypeId, Arc<Schema>>>,
}

impl Database {
    /// Create a database on its default connection.
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            callbacks: CallbackRegistry::new(),
            plugins: RwLock::new(IndexMap::new()),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// The default connection.
    pub fn connection(&self) -> ConnectionHandle {
        self.connection.clone()
    }

    /// The callback registry.
    pub fn callback(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Initialize and record a plugin. Plugin names must be unique.
    pub fn use_plugin<P: Plugin + 'static>(&self, plugin: Arc<P>) -> QueryResult<()> {
        let name = plugin.name().to_string();
        if self.plugins.read().contains_key(&name) {
            return Err(QueryError::new(
                ErrorCode::DuplicatePlugin,
                format!("plugin {} is already registered", name),
            ));
        }
        plugin.clone().initialize(self)?;
        tracing::info!(plugin = %name, "plugin initialized");
        self.plugins.write().insert(name, plugin);
        Ok(())
    }

    /// Look up a registered plugin by name.
    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.read().get(name).cloned()
    }

    /// The cached schema of a model.
    pub fn schema_of<M: Model + 'static>(&self) -> Arc<Schema> {
        let key = TypeId::of::<M>();
        if let Some(schema) = self.schemas.read().get(&key) {
            return schema.clone();
        }
        self.schemas
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(M::schema()))
            .clone()
    }

    fn statement<M: Model + 'static>(&self, operation: Operation) -> Statement {
        let schema = self.schema_of::<M>();
        Statement::new(operation, schema.table.clone(), self.connection.clone()).with_schema(schema)
    }

    /// Run a prepared statement through the processor of its operation.
    pub async fn run(&self, mut stmt: Statement) -> QueryResult<Statement> {
        self.callbacks
            .processor(stmt.operation)
            .execute(&mut stmt)
            .await?;
        Ok(stmt)
    }

    /// Create the model's table on the default connection.
    pub async fn auto_migrate<M: Model + 'static>(&self) -> QueryResult<()> {
        let schema = self.schema_of::<M>();
        self.connection.auto_migrate(&schema).await
    }

    /// Insert one model. The model is refreshed from the statement's row
    /// after the after-create callbacks ran.
    pub async fn create<M: Model + 'static>(&self, model: &mut M) -> QueryResult<u64> {
        let stmt = self
            .statement::<M>(Operation::Create)
            .with_target(Target::Single(model.to_row()));
        let stmt = self.run(stmt).await?;
        if let Target::Single(row) = &stmt.target {
            *model = M::from_row(row)?;
        }
        Ok(stmt.rows_affected)
    }

    /// Insert a batch of models.
    pub async fn create_many<M: Model + 'static>(&self, models: &mut [M]) -> QueryResult<u64> {
        let rows = models.iter().map(M::to_row).collect();
        let stmt = self
            .statement::<M>(Operation::Create)
            .with_target(Target::Many(rows));
        let stmt = self.run(stmt).await?;
        for (model, row) in models.iter_mut().zip(stmt.target.rows()) {
            *model = M::from_row(row)?;
        }
        Ok(stmt.rows_affected)
    }

    /// Select models matching a clause.
    pub async fn find<M: Model + 'static>(&self, clause: impl Into<Where>) -> QueryResult<Vec<M>> {
        let stmt = self.statement::<M>(Operation::Query).with_clause(clause);
        let stmt = self.run(stmt).await?;
        stmt.target.rows().map(M::from_row).collect()
    }

    /// Select the first model matching a clause.
    pub async fn first<M: Model + 'static>(
        &self,
        clause: impl Into<Where>,
    ) -> QueryResult<Option<M>> {
        Ok(self.find::<M>(clause).await?.into_iter().next())
    }

    /// Update columns from an explicit map.
    pub async fn update<M: Model + 'static>(
        &self,
        clause: impl Into<Where>,
        values: Row,
    ) -> QueryResult<u64> {
        let stmt = self
            .statement::<M>(Operation::Update)
            .with_clause(clause)
            .with_dest(UpdateDest::Map(values));
        Ok(self.run(stmt).await?.rows_affected)
    }

    /// Update the non-zero columns of a model.
    pub async fn update_model<M: Model + 'static>(
        &self,
        clause: impl Into<Where>,
        model: &M,
    ) -> QueryResult<u64> {
        let stmt = self
            .statement::<M>(Operation::Update)
            .with_clause(clause)
            .with_dest(UpdateDest::Model(model.to_row()));
        Ok(self.run(stmt).await?.rows_affected)
    }

    /// Delete rows matching a clause.
    pub async fn delete<M: Model + 'static>(&self, clause: impl Into<Where>) -> QueryResult<u64> {
        let stmt = self.statement::<M>(Operation::Delete).with_clause(clause);
        Ok(self.run(stmt).await?.rows_affected)
    }

    /// Delete a model by its primary key. The model's row travels with the
    /// statement as its target.
    pub async fn delete_model<M: Model + 'static>(&self, model: &M) -> QueryResult<u64> {
        let schema = self.schema_of::<M>();
        let row = model.to_row();

        let mut clause = Where::new();
        for field in schema.fields.iter().filter(|f| f.primary_key) {
            if let (Some(value), false) = field.value_of(&row) {
                clause = clause.and(Expr::eq(&field.db_name, value.clone()));
            }
        }
        if clause.is_empty() {
            return Err(QueryError::missing_where(&schema.table)
                .with_help("Set the model's primary key before deleting it"));
        }

        let stmt = self
            .statement::<M>(Operation::Delete)
            .with_clause(clause)
            .with_target(Target::Single(row));
        Ok(self.run(stmt).await?.rows_affected)
    }

    /// Select raw rows of a model's table.
    pub async fn rows<M: Model + 'static>(
        &self,
        clause: impl Into<Where>,
    ) -> QueryResult<Vec<Row>> {
        let stmt = self.statement::<M>(Operation::Row).with_clause(clause);
        Ok(self.run(stmt).await?.target.into_rows())
    }

    /// Execute raw SQL against a table.
    pub async fn raw(
        &self,
        table: impl Into<String>,
        sql: impl Into<String>,
        vars: Vec<Value>,
    ) -> QueryResult<u64> {
        let stmt =
            Statement::new(Operation::Raw, table, self.connection.clone()).with_raw(sql, vars);
        Ok(self.run(stmt).await?.rows_affected)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connection", &self.connection.name())
            .field("plugins", &self.plugins.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnection;
    use crate::schema::{Field, FieldKind, row_int, row_string};
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: i64,
        body: String,
    }

    impl Model for Note {
        fn schema() -> Schema {
            Schema::new("Note", "notes")
                .field(Field::new("id", FieldKind::Int).primary_key())
                .field(Field::new("body", FieldKind::String))
        }

        fn to_row(&self) -> Row {
            let mut row = Row::new();
            row.insert("id".into(), self.id.into());
            row.insert("body".into(), self.body.clone().into());
            row
        }

        fn from_row(row: &Row) -> QueryResult<Self> {
            Ok(Self {
                id: row_int(row, "id")?,
                body: row_string(row, "body")?,
            })
        }
    }

    struct Named(&'static str);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn initialize(self: Arc<Self>, _db: &Database) -> QueryResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let db = Database::new(MemoryConnection::shared("main"));
        db.auto_migrate::<Note>().await.unwrap();

        let mut note = Note { id: 1, body: "hi".into() };
        assert_eq!(db.create(&mut note).await.unwrap(), 1);

        let mut more = vec![Note { id: 2, body: "a".into() }, Note { id: 3, body: "b".into() }];
        assert_eq!(db.create_many(&mut more).await.unwrap(), 2);

        let mut values = Row::new();
        values.insert("body".into(), "edited".into());
        assert_eq!(db.update::<Note>(Expr::eq("id", 2), values).await.unwrap(), 1);

        let found = db.first::<Note>(Expr::eq("id", 2)).await.unwrap();
        assert_eq!(found, Some(Note { id: 2, body: "edited".into() }));

        assert_eq!(db.delete::<Note>(Expr::in_list("id", vec![1, 3])).await.unwrap(), 2);
        assert_eq!(db.rows::<Note>(Where::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_model_by_primary_key() {
        let db = Database::new(MemoryConnection::shared("main"));
        db.auto_migrate::<Note>().await.unwrap();
        let mut notes = vec![Note { id: 1, body: "a".into() }, Note { id: 2, body: "b".into() }];
        db.create_many(&mut notes).await.unwrap();

        assert_eq!(db.delete_model(&notes[0]).await.unwrap(), 1);
        let left = db.find::<Note>(Where::new()).await.unwrap();
        assert_eq!(left, vec![Note { id: 2, body: "b".into() }]);

        let err = db.delete_model(&Note { id: 0, body: "x".into() }).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingWhereClause);
    }

    #[test]
    fn test_duplicate_plugin_rejected() {
        let db = Database::new(MemoryConnection::shared("main"));
        db.use_plugin(Arc::new(Named("p"))).unwrap();
        let err = db.use_plugin(Arc::new(Named("p"))).unwrap_err();
        assert_eq!(err.code, ErrorCode::DuplicatePlugin);
        assert!(db.plugin("p").is_some());
    }

    #[test]
    fn test_schema_cache() {
        let db = Database::new(MemoryConnection::shared("main"));
        let a = db.schema_of::<Note>();
        let b = db.schema_of::<Note>();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
