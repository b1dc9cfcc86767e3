//! # tenantry-isolation
//!
//! Database-per-tenant routing and field-level encryption for Tenantry.
//!
//! The [`MultiTenancy`] plugin hooks into every operation of a
//! [`Database`](tenantry_query::Database):
//!
//! - it reads the tenant identifier from the statement (written rows, the
//!   WHERE clause, UPDATE values or raw SQL),
//! - opens or reuses that tenant's connection through a
//!   [`ConnectionFactory`] and swaps it into the statement,
//! - migrates the model's table on the tenant database the first time it
//!   is used,
//! - encrypts fields annotated with `encrypt` on the way in and decrypts
//!   them on the way out.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tenantry_isolation::{AesGcmCipher, FnFactory, IsolationConfig, MultiTenancy};
//! use tenantry_query::{Database, MemoryConnection};
//!
//! let config = IsolationConfig::default().with_encrypted_save(true);
//! let cipher = AesGcmCipher::from_base64_key(&AesGcmCipher::generate_key()).unwrap();
//!
//! let plugin = MultiTenancy::new(config)
//!     .register(
//!         "tenant_id",
//!         FnFactory::new(|tenant| async move {
//!             Ok(MemoryConnection::shared(format!("tenant-{}", tenant)))
//!         }),
//!     )
//!     .with_cipher(cipher);
//!
//! let db = Database::new(MemoryConnection::shared("main"));
//! db.use_plugin(Arc::new(plugin)).unwrap();
//! ```

pub mod callbacks;
pub mod config;
pub mod encrypt;
pub mod errors;
pub mod migration;
pub mod plugin;
pub mod registry;
pub mod tag;

pub use callbacks::{DECRYPT_CALLBACK, ENCRYPT_CALLBACK, TenantSource};
pub use config::{EnvSource, IsolationConfig, MapEnvSource, StdEnvSource};
pub use encrypt::{AesGcmCipher, Cipher, EncryptionPlan, FnCipher};
pub use errors::PLUGIN_NAME;
pub use migration::MigrationTracker;
pub use plugin::MultiTenancy;
pub use registry::{ConnectionFactory, ConnectionRegistry, FnFactory};
pub use tag::TagResolver;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::IsolationConfig;
    pub use crate::encrypt::{AesGcmCipher, Cipher};
    pub use crate::plugin::MultiTenancy;
    pub use crate::registry::{ConnectionFactory, FnFactory};
}
