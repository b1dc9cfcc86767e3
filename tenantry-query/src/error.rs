//! Error types for statement execution with actionable messages.
//!
//! Every error carries an [`ErrorCode`] for programmatic handling plus
//! optional context about the statement that failed.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: T{category}{number}
//! - 1xxx: Statement errors (missing clause, invalid value)
//! - 3xxx: Connection errors
//! - 6xxx: Data errors (type mismatch)
//! - 7xxx: Configuration errors
//! - 8xxx: Migration errors
//! - 9xxx: Tenancy and encryption errors
//!
//! ```rust
//! use tenantry_query::{ErrorCode, QueryError};
//!
//! let err = QueryError::new(ErrorCode::TenantNotDetected, "no tenant");
//! assert_eq!(err.code, ErrorCode::TenantNotDetected);
//! assert_eq!(err.code.code(), "T9001");
//! ```

use std::fmt;
use thiserror::Error;

/// Result type for statement operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Statement errors (1xxx)
    /// The statement has no WHERE clause (T1002).
    MissingWhereClause = 1002,
    /// Invalid filter or where clause (T1003).
    InvalidFilter = 1003,
    /// The target table does not exist (T1005).
    TableNotFound = 1005,

    // Connection errors (3xxx)
    /// Database connection failed (T3001).
    ConnectionFailed = 3001,

    // Data errors (6xxx)
    /// Invalid data type (T6001).
    InvalidDataType = 6001,
    /// Serialization error (T6002).
    SerializationError = 6002,

    // Configuration errors (7xxx)
    /// Invalid configuration (T7001).
    InvalidConfiguration = 7001,
    /// Missing configuration (T7002).
    MissingConfiguration = 7002,
    /// A plugin with the same name is already registered (T7003).
    DuplicatePlugin = 7003,

    // Migration errors (8xxx)
    /// Table migration failed (T8001).
    MigrationFailed = 8001,

    // Tenancy errors (9xxx)
    /// No tenant identifier found for an isolated statement (T9001).
    TenantNotDetected = 9001,
    /// Rows in one batch belong to different tenants (T9002).
    TenantMismatch = 9002,
    /// Encryption or decryption failed (T9003).
    EncryptionFailed = 9003,
    /// A predicate on an encrypted column is not an exact match (T9004).
    UnsupportedEncryptedPredicate = 9004,

    /// Internal error (T9998).
    Internal = 9998,
    /// Unknown error (T9999).
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the error code string (e.g., "T1002").
    pub fn code(&self) -> String {
        format!("T{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::MissingWhereClause => "WHERE clause not found",
            Self::InvalidFilter => "Invalid filter condition",
            Self::TableNotFound => "Table not found",
            Self::ConnectionFailed => "Database connection failed",
            Self::InvalidDataType => "Invalid data type",
            Self::SerializationError => "Serialization error",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::MissingConfiguration => "Missing configuration",
            Self::DuplicatePlugin => "Plugin already registered",
            Self::MigrationFailed => "Table migration failed",
            Self::TenantNotDetected => "Tenant identifier not detected",
            Self::TenantMismatch => "Rows belong to different tenants",
            Self::EncryptionFailed => "Encryption failed",
            Self::UnsupportedEncryptedPredicate => "Unsupported predicate on encrypted column",
            Self::Internal => "Internal error",
            Self::Unknown => "Unknown error",
        }
    }

    /// Check whether this code belongs to the tenancy category.
    pub fn is_tenancy(&self) -> bool {
        (*self as u16) / 1000 == 9
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The table involved.
    pub table: Option<String>,
    /// The field involved.
    pub field: Option<String>,
    /// The tenant involved.
    pub tenant: Option<String>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors that can occur while preparing or executing a statement.
#[derive(Error, Debug)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Set the table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.context.table = Some(table.into());
        self
    }

    /// Set the field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Set the tenant.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.context.tenant = Some(tenant.into());
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// Create a missing WHERE clause error.
    pub fn missing_where(table: impl Into<String>) -> Self {
        Self::new(ErrorCode::MissingWhereClause, "WHERE clause not found").with_table(table)
    }

    /// Create a table not found error.
    pub fn table_not_found(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(ErrorCode::TableNotFound, format!("table {} does not exist", table))
            .with_table(table)
            .with_help("Run auto_migrate for the model before writing to it")
    }

    /// Create an invalid filter error.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFilter, message)
    }

    /// Create a type mismatch error for a column.
    pub fn invalid_type(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDataType, message).with_field(field)
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Create a migration error.
    pub fn migration(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::MigrationFailed, message).with_table(table)
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        self.code == ErrorCode::ConnectionFailed
    }
}

impl Clone for QueryError {
    fn clone(&self) -> Self {
        // The boxed source is not cloneable; its message survives in `help`.
        let mut cloned = Self::new(self.code, self.message.clone());
        cloned.context = self.context.clone();
        if let Some(source) = &self.source {
            if cloned.context.help.is_none() {
                cloned.context.help = Some(source.to_string());
            }
        }
        cloned
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::MissingWhereClause.code(), "T1002");
        assert_eq!(ErrorCode::TenantMismatch.to_string(), "T9002");
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::missing_where("users");
        assert_eq!(err.to_string(), "[T1002] WHERE clause not found");
        assert_eq!(err.context.table.as_deref(), Some("users"));
    }

    #[test]
    fn test_tenancy_category() {
        assert!(ErrorCode::TenantNotDetected.is_tenancy());
        assert!(ErrorCode::EncryptionFailed.is_tenancy());
        assert!(!ErrorCode::MigrationFailed.is_tenancy());
    }

    #[test]
    fn test_clone_keeps_source_message() {
        let io = std::io::Error::other("socket closed");
        let err = QueryError::connection("connect failed").with_source(io);
        let cloned = err.clone();
        assert!(cloned.source.is_none());
        assert_eq!(cloned.context.help.as_deref(), Some("socket closed"));
        assert!(cloned.is_connection_error());
    }
}
