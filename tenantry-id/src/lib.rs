//! # tenantry-id
//!
//! Snowflake identifiers for tenant databases.
//!
//! ```rust
//! use tenantry_id::{DistributedId, IdGenerator};
//!
//! let generator = IdGenerator::new("acme", 3).unwrap();
//! let id = generator.next_id();
//!
//! assert_eq!(id.node(), 3);
//! let json = format!("\"{}\"", id);
//! assert_eq!(serde_json::from_str::<DistributedId>(&json).unwrap(), id);
//! ```

pub mod error;
pub mod generator;
pub mod id;
pub mod model;

pub use error::{IdError, IdResult};
pub use generator::{EPOCH_MS, IdGenerator, MAX_NODE};
pub use id::DistributedId;
pub use model::BaseModel;
