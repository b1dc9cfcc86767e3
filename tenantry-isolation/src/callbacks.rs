//! Hook registration.
//!
//! Routing runs first on every operation so later callbacks already see the
//! tenant connection. Encryption runs right before the executor and
//! decryption right after it.

use crate::errors::PLUGIN_NAME;
use crate::plugin::MultiTenancy;
use async_trait::async_trait;
use std::sync::Arc;
use tenantry_query::{Callback, Database, Operation, QueryResult, Statement, executor_name};

/// Name of the callback that encrypts outgoing values.
pub const ENCRYPT_CALLBACK: &str = "tenantry:multi-tenancy:encrypt";

/// Name of the callback that decrypts returned rows.
pub const DECRYPT_CALLBACK: &str = "tenantry:multi-tenancy:decrypt";

/// Where a tenant identifier can be read from, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenantSource {
    /// The rows being written or matched.
    Rows,
    /// The WHERE clause.
    Clause,
    /// The values of an UPDATE.
    Values,
    /// Raw SQL text.
    Raw,
}

const CREATE_SOURCES: &[TenantSource] = &[TenantSource::Rows];
const QUERY_SOURCES: &[TenantSource] = &[TenantSource::Clause];
const UPDATE_SOURCES: &[TenantSource] = &[TenantSource::Clause, TenantSource::Values];
const DELETE_SOURCES: &[TenantSource] = &[TenantSource::Clause, TenantSource::Rows];
const RAW_SOURCES: &[TenantSource] = &[TenantSource::Raw];

#[derive(Debug, Clone, Copy)]
enum Hook {
    Route(&'static [TenantSource]),
    Encrypt,
    Decrypt,
}

struct Dispatch {
    plugin: Arc<MultiTenancy>,
    hook: Hook,
}

#[async_trait]
impl Callback for Dispatch {
    async fn call(&self, stmt: &mut Statement) -> QueryResult<()> {
        let result = match self.hook {
            Hook::Route(sources) => self.plugin.route(stmt, sources).await,
            Hook::Encrypt => self.plugin.encrypt_statement(stmt),
            Hook::Decrypt => self.plugin.decrypt_statement(stmt),
        };
        result.map_err(|e| e.with_context(stmt.operation.as_str()).with_table(&stmt.table))
    }
}

/// Register the plugin's callbacks on every operation.
pub(crate) fn register(plugin: &Arc<MultiTenancy>, db: &Database) -> QueryResult<()> {
    let dispatch = |hook| Dispatch {
        plugin: plugin.clone(),
        hook,
    };
    let callbacks = db.callback();

    let routes = [
        (Operation::Create, CREATE_SOURCES),
        (Operation::Query, QUERY_SOURCES),
        (Operation::Update, UPDATE_SOURCES),
        (Operation::Delete, DELETE_SOURCES),
        (Operation::Row, QUERY_SOURCES),
        (Operation::Raw, RAW_SOURCES),
    ];
    for (operation, sources) in routes {
        registration(db, operation)
            .before("*")
            .register(PLUGIN_NAME, dispatch(Hook::Route(sources)))?;
    }

    for operation in [
        Operation::Create,
        Operation::Query,
        Operation::Update,
        Operation::Delete,
        Operation::Row,
    ] {
        registration(db, operation)
            .before(executor_name(operation))
            .register(ENCRYPT_CALLBACK, dispatch(Hook::Encrypt))?;
    }

    for operation in [Operation::Create, Operation::Query, Operation::Row] {
        registration(db, operation)
            .after(executor_name(operation))
            .register(DECRYPT_CALLBACK, dispatch(Hook::Decrypt))?;
    }

    tracing::debug!(
        create = ?callbacks.processor(Operation::Create).names(),
        "multi-tenancy callbacks registered"
    );
    Ok(())
}

fn registration(db: &Database, operation: Operation) -> tenantry_query::callback::Registration<'_> {
    let callbacks = db.callback();
    match operation {
        Operation::Create => callbacks.create(),
        Operation::Query => callbacks.query(),
        Operation::Update => callbacks.update(),
        Operation::Delete => callbacks.delete(),
        Operation::Row => callbacks.row(),
        Operation::Raw => callbacks.raw(),
    }
}
