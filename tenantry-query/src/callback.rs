//! Named callbacks around statement execution.
//!
//! Every [`Operation`] has a [`Processor`]: an ordered list of named
//! callbacks, one of which is the executor that hands the statement to its
//! connection. Plugins insert their own callbacks relative to the others:
//!
//! ```rust,ignore
//! db.callback()
//!     .create()
//!     .before("*")
//!     .register("audit:stamp", StampCallback)?;
//!
//! db.callback()
//!     .query()
//!     .after("tenantry:query")
//!     .register("audit:log", LogCallback)?;
//! ```
//!
//! Callbacks run in order and the first error stops the chain.

use crate::error::QueryResult;
use crate::statement::{Operation, Statement};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A step in a statement's processing chain.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Inspect or rewrite the statement.
    async fn call(&self, stmt: &mut Statement) -> QueryResult<()>;
}

/// A callback that can be shared across processors.
pub type SharedCallback = Arc<dyn Callback>;

/// Adapter turning a synchronous closure into a [`Callback`].
pub struct FnCallback<F>(pub F);

#[async_trait]
impl<F> Callback for FnCallback<F>
where
    F: Fn(&mut Statement) -> QueryResult<()> + Send + Sync,
{
    async fn call(&self, stmt: &mut Statement) -> QueryResult<()> {
        (self.0)(stmt)
    }
}

/// The callback that executes the statement on its connection.
struct ExecuteCallback;

#[async_trait]
impl Callback for ExecuteCallback {
    async fn call(&self, stmt: &mut Statement) -> QueryResult<()> {
        let connection = stmt.connection.clone();
        tracing::debug!(
            operation = %stmt.operation,
            table = %stmt.table,
            db = %connection.name(),
            "executing statement"
        );
        connection.execute(stmt).await
    }
}

/// Name of the executor callback for an operation, e.g. `tenantry:query`.
pub fn executor_name(operation: Operation) -> String {
    format!("tenantry:{}", operation.as_str())
}

#[derive(Clone)]
struct Entry {
    name: String,
    callback: SharedCallback,
}

/// The ordered callback chain for one operation.
pub struct Processor {
    operation: Operation,
    entries: RwLock<Vec<Entry>>,
}

impl Processor {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            entries: RwLock::new(vec![Entry {
                name: executor_name(operation),
                callback: Arc::new(ExecuteCallback),
            }]),
        }
    }

    /// The operation this processor handles.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Callback names in execution order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().iter().map(|e| e.name.clone()).collect()
    }

    /// Run every callback in order, stopping at the first error.
    pub async fn execute(&self, stmt: &mut Statement) -> QueryResult<()> {
        let entries = self.entries.read().clone();
        for entry in entries {
            if let Err(err) = entry.callback.call(stmt).await {
                tracing::debug!(
                    operation = %self.operation,
                    callback = %entry.name,
                    error = %err,
                    "callback aborted statement"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    fn insert(&self, position: &Position, name: String, callback: SharedCallback) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter().position(|e| e.name == name) {
            tracing::warn!(operation = %self.operation, callback = %name, "replacing callback");
            entries.remove(existing);
        }
        let index = match position {
            Position::Default => entries.len(),
            Position::Before(target) if target == "*" => 0,
            Position::After(target) if target == "*" => entries.len(),
            Position::Before(target) => match entries.iter().position(|e| &e.name == target) {
                Some(i) => i,
                None => {
                    tracing::warn!(callback = %name, before = %target, "anchor callback not found");
                    entries.len()
                }
            },
            Position::After(target) => match entries.iter().position(|e| &e.name == target) {
                Some(i) => i + 1,
                None => {
                    tracing::warn!(callback = %name, after = %target, "anchor callback not found");
                    entries.len()
                }
            },
        };
        entries.insert(index, Entry { name, callback });
    }

    fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.name != name);
        entries.len() != before
    }
}

#[derive(Debug, Clone)]
enum Position {
    Default,
    Before(String),
    After(String),
}

/// Builder returned by [`CallbackRegistry::create`] and friends.
pub struct Registration<'a> {
    processor: &'a Processor,
    position: Position,
}

impl<'a> Registration<'a> {
    /// Place the callback before `name`; `"*"` means first.
    pub fn before(mut self, name: impl Into<String>) -> Self {
        self.position = Position::Before(name.into());
        self
    }

    /// Place the callback after `name`; `"*"` means last.
    pub fn after(mut self, name: impl Into<String>) -> Self {
        self.position = Position::After(name.into());
        self
    }

    /// Register a callback under `name`, replacing any callback of the
    /// same name on this operation.
    pub fn register<C: Callback + 'static>(
        self,
        name: impl Into<String>,
        callback: C,
    ) -> QueryResult<()> {
        self.register_shared(name, Arc::new(callback))
    }

    /// Register an already shared callback.
    pub fn register_shared(
        self,
        name: impl Into<String>,
        callback: SharedCallback,
    ) -> QueryResult<()> {
        let name = name.into();
        tracing::debug!(
            operation = %self.processor.operation,
            callback = %name,
            "registering callback"
        );
        self.processor.insert(&self.position, name, callback);
        Ok(())
    }

    /// Remove the callback registered under `name`.
    pub fn remove(self, name: &str) -> bool {
        self.processor.remove(name)
    }
}

/// Processors for every operation.
pub struct CallbackRegistry {
    processors: HashMap<Operation, Processor>,
}

impl CallbackRegistry {
    /// Create a registry where every processor holds only its executor.
    pub fn new() -> Self {
        Self {
            processors: Operation::ALL
                .into_iter()
                .map(|op| (op, Processor::new(op)))
                .collect(),
        }
    }

    /// The processor for an operation.
    pub fn processor(&self, operation: Operation) -> &Processor {
        // Every operation is inserted in `new`.
        &self.processors[&operation]
    }

    fn registration(&self, operation: Operation) -> Registration<'_> {
        Registration {
            processor: self.processor(operation),
            position: Position::Default,
        }
    }

    /// Callbacks around `create`.
    pub fn create(&self) -> Registration<'_> {
        self.registration(Operation::Create)
    }

    /// Callbacks around `query`.
    pub fn query(&self) -> Registration<'_> {
        self.registration(Operation::Query)
    }

    /// Callbacks around `update`.
    pub fn update(&self) -> Registration<'_> {
        self.registration(Operation::Update)
    }

    /// Callbacks around `delete`.
    pub fn delete(&self) -> Registration<'_> {
        self.registration(Operation::Delete)
    }

    /// Callbacks around `row`.
    pub fn row(&self) -> Registration<'_> {
        self.registration(Operation::Row)
    }

    /// Callbacks around `raw`.
    pub fn raw(&self) -> Registration<'_> {
        self.registration(Operation::Raw)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;
    use crate::QueryError;
    use crate::memory::MemoryConnection;
    use pretty_assertions::assert_eq;

    fn noop() -> FnCallback<impl Fn(&mut Statement) -> QueryResult<()> + Send + Sync> {
        FnCallback(|_stmt: &mut Statement| -> QueryResult<()> { Ok(()) })
    }

    #[test]
    fn test_positions() {
        let registry = CallbackRegistry::new();
        registry.query().register("a", noop()).unwrap();
        registry.query().before("*").register("first", noop()).unwrap();
        registry.query().after("*").register("last", noop()).unwrap();
        registry.query().before("tenantry:query").register("pre", noop()).unwrap();
        registry.query().after("tenantry:query").register("post", noop()).unwrap();

        assert_eq!(
            registry.processor(Operation::Query).names(),
            vec!["first", "pre", "tenantry:query", "post", "a", "last"]
        );
        assert_eq!(registry.processor(Operation::Create).names(), vec!["tenantry:create"]);
    }

    #[test]
    fn test_replace_and_remove() {
        let registry = CallbackRegistry::new();
        registry.update().register("x", noop()).unwrap();
        registry.update().before("*").register("x", noop()).unwrap();
        assert_eq!(registry.processor(Operation::Update).names(), vec!["x", "tenantry:update"]);
        assert!(registry.update().remove("x"));
        assert!(!registry.update().remove("x"));
    }

    #[tokio::test]
    async fn test_first_error_stops_chain() {
        let registry = CallbackRegistry::new();
        registry
            .delete()
            .before("*")
            .register(
                "deny",
                FnCallback(|_stmt: &mut Statement| -> QueryResult<()> {
                    Err(QueryError::invalid_filter("denied"))
                }),
            )
            .unwrap();

        let mem = Arc::new(MemoryConnection::new("db"));
        let mut stmt = Statement::new(Operation::Delete, "users", mem.clone());
        let err = registry
            .processor(Operation::Delete)
            .execute(&mut stmt)
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidFilter);
        assert_eq!(mem.execution_count(), 0);
    }
}
