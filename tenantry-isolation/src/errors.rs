//! Plugin error constructors.
//!
//! Every error raised by the plugin carries the plugin name as a message
//! prefix so it stands out among host errors.

use tenantry_query::{ErrorCode, QueryError};

/// Name the plugin registers under.
pub const PLUGIN_NAME: &str = "tenantry:multi-tenancy";

pub(crate) fn plugin_error(code: ErrorCode, message: impl AsRef<str>) -> QueryError {
    QueryError::new(code, format!("[{}] {}", PLUGIN_NAME, message.as_ref()))
}

pub(crate) fn tenant_not_detected(table: &str) -> QueryError {
    plugin_error(ErrorCode::TenantNotDetected, "tenant identifier not detected")
        .with_table(table)
        .with_help("Set the tenant column on the model or filter on it in the WHERE clause")
}

pub(crate) fn missing_where(table: &str) -> QueryError {
    plugin_error(ErrorCode::MissingWhereClause, "WHERE clause not found").with_table(table)
}

pub(crate) fn tenant_mismatch(first: &str, other: &str) -> QueryError {
    plugin_error(
        ErrorCode::TenantMismatch,
        format!(
            "batch insert into different databases is not supported ({} vs {})",
            first, other
        ),
    )
}

pub(crate) fn non_string_tenant(column: &str, found: &str) -> QueryError {
    plugin_error(
        ErrorCode::InvalidDataType,
        format!(
            "only string fields are supported for tenant routing, column {} holds {}",
            column, found
        ),
    )
    .with_field(column)
}

pub(crate) fn non_string_encrypted(column: &str, found: &str) -> QueryError {
    plugin_error(
        ErrorCode::InvalidDataType,
        format!(
            "only string fields can be encrypted, column {} holds {}",
            column, found
        ),
    )
    .with_field(column)
}

pub(crate) fn missing_cipher() -> QueryError {
    plugin_error(ErrorCode::MissingConfiguration, "no cipher configured")
        .with_help("Attach a cipher with MultiTenancy::with_cipher before enabling encrypted_save")
}

pub(crate) fn missing_factory(tenant: &str) -> QueryError {
    plugin_error(ErrorCode::MissingConfiguration, "no connection factory registered")
        .with_tenant(tenant)
}

pub(crate) fn factory_failed(tenant: &str, err: QueryError) -> QueryError {
    plugin_error(ErrorCode::ConnectionFailed, err.message.clone())
        .with_tenant(tenant)
        .with_source(err)
}

pub(crate) fn encryption_failed(message: impl AsRef<str>) -> QueryError {
    plugin_error(ErrorCode::EncryptionFailed, message)
}

pub(crate) fn unsupported_predicate(column: &str) -> QueryError {
    plugin_error(
        ErrorCode::UnsupportedEncryptedPredicate,
        format!(
            "field {} is encrypted; only exact-match queries are supported",
            column
        ),
    )
    .with_field(column)
}

pub(crate) fn unbound_encrypted(column: &str) -> QueryError {
    plugin_error(
        ErrorCode::UnsupportedEncryptedPredicate,
        format!(
            "field {} is encrypted; compare it against a bound `?` parameter",
            column
        ),
    )
    .with_field(column)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix() {
        let err = tenant_not_detected("users");
        assert_eq!(
            err.to_string(),
            "[T9001] [tenantry:multi-tenancy] tenant identifier not detected"
        );
        assert_eq!(err.context.table.as_deref(), Some("users"));
    }

    #[test]
    fn test_factory_failure_keeps_source() {
        let inner = QueryError::connection("refused");
        let err = factory_failed("acme", inner);
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
        assert!(err.message.ends_with("refused"));
        assert!(err.source.is_some());
    }
}
