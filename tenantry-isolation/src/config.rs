//! Plugin configuration.
//!
//! Configuration can be built in code, loaded from TOML, or read from the
//! environment:
//!
//! ```rust
//! use tenantry_isolation::IsolationConfig;
//!
//! let config = IsolationConfig::from_toml_str(r#"
//!     tenant_tag = "org_id"
//!     encrypted_save = true
//! "#).unwrap();
//!
//! assert_eq!(config.tenant_tag, "org_id");
//! assert_eq!(config.tag_name, "mt");
//! assert!(config.encrypted_save);
//! ```

use serde::Deserialize;
use std::collections::HashMap;
use tenantry_query::{QueryError, QueryResult};

/// Default column that carries the tenant identifier.
pub const DEFAULT_TENANT_TAG: &str = "tenant_id";

/// Default name of the field annotation tag.
pub const DEFAULT_TAG_NAME: &str = "mt";

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get an environment variable value.
    fn get(&self, name: &str) -> Option<String>;
}

/// Environment source backed by the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment source backed by a map.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Configuration of the multi-tenancy plugin.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Column holding the tenant identifier.
    pub tenant_tag: String,
    /// Name of the field annotation tag read for encryption markers.
    pub tag_name: String,
    /// Encrypt annotated fields on write and decrypt them on read.
    pub encrypted_save: bool,
    /// Reject isolated statements with no resolvable tenant. When false
    /// such statements run on the default connection.
    pub require_tenant: bool,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            tenant_tag: DEFAULT_TENANT_TAG.to_string(),
            tag_name: DEFAULT_TAG_NAME.to_string(),
            encrypted_save: false,
            require_tenant: true,
        }
    }
}

impl IsolationConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tenant column.
    pub fn with_tenant_tag(mut self, tag: impl Into<String>) -> Self {
        self.tenant_tag = tag.into();
        self
    }

    /// Set the annotation tag name.
    pub fn with_tag_name(mut self, name: impl Into<String>) -> Self {
        self.tag_name = name.into();
        self
    }

    /// Enable or disable field encryption.
    pub fn with_encrypted_save(mut self, enabled: bool) -> Self {
        self.encrypted_save = enabled;
        self
    }

    /// Require a tenant on every isolated statement.
    pub fn with_require_tenant(mut self, required: bool) -> Self {
        self.require_tenant = required;
        self
    }

    /// The tenant column, falling back to the default when blank.
    pub fn tenant_tag(&self) -> &str {
        let tag = self.tenant_tag.trim();
        if tag.is_empty() { DEFAULT_TENANT_TAG } else { tag }
    }

    /// The annotation tag name, falling back to the default when blank.
    pub fn tag_name(&self) -> &str {
        let name = self.tag_name.trim();
        if name.is_empty() { DEFAULT_TAG_NAME } else { name }
    }

    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> QueryResult<Self> {
        toml::from_str(source).map_err(|e| {
            QueryError::configuration(format!("invalid isolation config: {}", e))
                .with_source(e)
        })
    }

    /// Read the configuration from the process environment.
    ///
    /// - `TENANTRY_TENANT_TAG`
    /// - `TENANTRY_TAG_NAME`
    /// - `TENANTRY_ENCRYPTED_SAVE`
    /// - `TENANTRY_REQUIRE_TENANT`
    pub fn from_env() -> QueryResult<Self> {
        Self::from_env_source(&StdEnvSource)
    }

    /// Read the configuration from an environment source.
    pub fn from_env_source<S: EnvSource>(env: &S) -> QueryResult<Self> {
        let mut config = Self::default();
        if let Some(tag) = env.get("TENANTRY_TENANT_TAG") {
            config.tenant_tag = tag;
        }
        if let Some(name) = env.get("TENANTRY_TAG_NAME") {
            config.tag_name = name;
        }
        if let Some(flag) = env.get("TENANTRY_ENCRYPTED_SAVE") {
            config.encrypted_save = parse_flag("TENANTRY_ENCRYPTED_SAVE", &flag)?;
        }
        if let Some(flag) = env.get("TENANTRY_REQUIRE_TENANT") {
            config.require_tenant = parse_flag("TENANTRY_REQUIRE_TENANT", &flag)?;
        }
        Ok(config)
    }
}

fn parse_flag(name: &str, value: &str) -> QueryResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(QueryError::configuration(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tenantry_query::ErrorCode;

    #[test]
    fn test_defaults() {
        let config = IsolationConfig::default();
        assert_eq!(config.tenant_tag(), "tenant_id");
        assert_eq!(config.tag_name(), "mt");
        assert!(!config.encrypted_save);
        assert!(config.require_tenant);
    }

    #[test]
    fn test_blank_tag_falls_back() {
        let config = IsolationConfig::new().with_tenant_tag("  ");
        assert_eq!(config.tenant_tag(), DEFAULT_TENANT_TAG);
    }

    #[test]
    fn test_from_toml() {
        let config = IsolationConfig::from_toml_str(
            r#"
            tenant_tag = "org"
            tag_name = "tenancy"
            require_tenant = false
            "#,
        )
        .unwrap();

        assert_eq!(
            config,
            IsolationConfig::new()
                .with_tenant_tag("org")
                .with_tag_name("tenancy")
                .with_require_tenant(false)
        );
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = IsolationConfig::from_toml_str("encrypted_save = \"maybe\"").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_from_env_source() {
        let env = MapEnvSource::new()
            .set("TENANTRY_TENANT_TAG", "org_id")
            .set("TENANTRY_ENCRYPTED_SAVE", "YES");

        let config = IsolationConfig::from_env_source(&env).unwrap();
        assert_eq!(config.tenant_tag, "org_id");
        assert_eq!(config.tag_name, "mt");
        assert!(config.encrypted_save);
        assert!(config.require_tenant);
    }

    #[test]
    fn test_from_env_rejects_bad_flag() {
        let env = MapEnvSource::new().set("TENANTRY_REQUIRE_TENANT", "sometimes");
        let err = IsolationConfig::from_env_source(&env).unwrap_err();
        assert!(err.message.contains("TENANTRY_REQUIRE_TENANT"));
    }
}
