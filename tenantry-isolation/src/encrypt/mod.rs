//! Field-level encryption.
//!
//! Fields are marked for encryption with an annotation tag (default `mt`)
//! whose body contains `encrypt`:
//!
//! ```rust
//! use tenantry_isolation::encrypt::EncryptionPlan;
//! use tenantry_query::{Field, FieldKind, Schema};
//!
//! let schema = Schema::new("User", "users")
//!     .field(Field::new("phone", FieldKind::String).tag("mt", "size:32;encrypt"));
//!
//! let plan = EncryptionPlan::analyze(&schema, "mt");
//! assert!(plan.is_encrypted_column("phone"));
//! ```

pub mod analyzer;
pub mod cipher;
pub mod transform;

pub use analyzer::{EncryptionPlan, FieldTag, TagAnalyzer, is_encrypt_tag};
pub use cipher::{AesGcmCipher, Cipher, CipherFn, FnCipher, KEY_LEN};
pub use transform::{Direction, encrypt_clause, encrypt_values, transform_rows};
