//! Logging infrastructure for Tenantry.
//!
//! Structured logging is controlled by environment variables.
//!
//! # Environment Variables
//!
//! - `TENANTRY_DEBUG=true` - Enable debug logging
//! - `TENANTRY_DEBUG=1` - Enable debug logging
//! - `TENANTRY_LOG_LEVEL=debug|info|warn|error|trace` - Set specific log level
//! - `TENANTRY_LOG_FORMAT=json|pretty|compact` - Set output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use tenantry_query::logging;
//!
//! // Initialize logging (call once at startup)
//! logging::init();
//! ```
//!
//! Inside the crates, use the standard tracing macros with structured
//! fields:
//!
//! ```rust,ignore
//! debug!(tenant_id = %tenant, table = %table, "routing statement");
//! warn!(callback = %name, "replacing callback");
//! ```

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `TENANTRY_DEBUG`.
///
/// Returns `true` if `TENANTRY_DEBUG` is set to "true", "1", or "yes" (case-insensitive).
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("TENANTRY_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Get the configured log level from `TENANTRY_LOG_LEVEL`.
///
/// Defaults to "debug" if `TENANTRY_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("TENANTRY_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// Get the configured log format from `TENANTRY_LOG_FORMAT`.
///
/// Defaults to "json" for structured logging.
pub fn get_log_format() -> &'static str {
    env::var("TENANTRY_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize the Tenantry logging system.
///
/// This should be called once at application startup. Subsequent calls
/// are no-ops. Nothing is installed unless `TENANTRY_DEBUG` or
/// `TENANTRY_LOG_LEVEL` is set.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("TENANTRY_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!(
                "tenantry={},tenantry_query={},tenantry_isolation={},tenantry_id={}",
                level, level, level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            // A subscriber installed by the host application wins.
            let installed = match get_log_format() {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if installed.is_ok() {
                tracing::info!(
                    level = level,
                    format = get_log_format(),
                    "Tenantry logging initialized"
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // The suite never sets these variables.
        if env::var("TENANTRY_LOG_FORMAT").is_err() {
            assert_eq!(get_log_format(), "json");
        }
        if env::var("TENANTRY_LOG_LEVEL").is_err() && !is_debug_enabled() {
            assert_eq!(get_log_level(), "warn");
        }
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
