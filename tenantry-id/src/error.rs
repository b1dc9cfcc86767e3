//! Error types for identifier handling.

use thiserror::Error;

/// Result type for identifier operations.
pub type IdResult<T> = Result<T, IdError>;

/// Errors raised by identifier parsing and generation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The node number does not fit in the node bits.
    #[error("node number must be between 0 and {max}, got {node}")]
    InvalidNode {
        /// Requested node.
        node: i64,
        /// Largest allowed node.
        max: i64,
    },

    /// A textual identifier is not a decimal integer.
    #[error("invalid distributed id {0:?}")]
    Parse(String),

    /// A column value cannot be read as an identifier.
    #[error("cannot read a distributed id from a {0} value")]
    Scan(&'static str),
}

impl From<IdError> for tenantry_query::QueryError {
    fn from(err: IdError) -> Self {
        tenantry_query::QueryError::new(tenantry_query::ErrorCode::InvalidDataType, err.to_string())
            .with_source(err)
    }
}
