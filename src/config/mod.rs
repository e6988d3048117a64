//! Configuration management.
//!
//! Settings come from three layers, later ones winning:
//!
//! 1. Defaults, including the conventional Azure environment variables
//!    (`AZURE_STORAGE_CONNECTION_STRING`, `AZURE_SEARCH_ENDPOINT`, ...)
//! 2. An optional TOML file
//! 3. `AZURE_DATA_MCP__<SECTION>__<KEY>` environment overrides
//!
//! # Configuration File Format
//!
//! ```toml
//! [table]
//! connection_string = "TableEndpoint=https://acme.table.core.windows.net;SharedAccessSignature=sv=..."
//!
//! [search]
//! endpoint = "https://acme.search.windows.net"
//! api_key = "..."
//! api_version = "2023-11-01"
//!
//! [schema]
//! inference_sample_size = 10
//! validation_sample_size = 20
//! on_violation = "warn"
//! cache_ttl_seconds = 0
//!
//! [http]
//! timeout_seconds = 30
//! max_retries = 3
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::schema::{OnViolation, DEFAULT_INFERENCE_SAMPLE_SIZE, DEFAULT_VALIDATION_SAMPLE_SIZE};
use crate::stores::{StoreError, TableConnection, DEFAULT_SEARCH_API_VERSION};
use crate::utils::validate::validate_endpoint;
use crate::utils::{HttpClient, RetryConfig};

/// Name of the config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "azure-data-mcp.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "AZURE_DATA_MCP";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Table storage connection
    #[serde(default)]
    pub table: TableConfig,

    /// Search service connection
    #[serde(default)]
    pub search: SearchConfig,

    /// Schema inference and validation settings
    #[serde(default)]
    pub schema: SchemaConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Table storage connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub connection_string: Option<String>,
    pub account_name: Option<String>,
    pub sas_token: Option<String>,
    /// Explicit table endpoint (e.g. Azurite)
    pub endpoint: Option<String>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            connection_string: env_var("AZURE_STORAGE_CONNECTION_STRING"),
            account_name: env_var("AZURE_STORAGE_ACCOUNT_NAME"),
            sas_token: env_var("AZURE_STORAGE_SAS_TOKEN"),
            endpoint: env_var("AZURE_TABLE_ENDPOINT"),
        }
    }
}

impl TableConfig {
    /// Whether enough is set to build a connection
    pub fn is_configured(&self) -> bool {
        self.connection_string.is_some() || self.account_name.is_some() || self.endpoint.is_some()
    }

    /// Resolve the connection; `None` when nothing is configured.
    ///
    /// A connection string takes precedence over an explicit endpoint, which
    /// takes precedence over an account name.
    pub fn connection(&self) -> Result<Option<TableConnection>, StoreError> {
        let sas = self.sas_token.as_deref();
        if let Some(conn) = &self.connection_string {
            return TableConnection::from_connection_string(conn).map(Some);
        }
        if let Some(endpoint) = &self.endpoint {
            return TableConnection::from_endpoint(endpoint, sas).map(Some);
        }
        if let Some(account) = &self.account_name {
            return TableConnection::from_account(account, sas).map(Some);
        }
        Ok(None)
    }
}

fn default_api_version() -> String {
    env_var("AZURE_SEARCH_API_VERSION").unwrap_or_else(|| DEFAULT_SEARCH_API_VERSION.to_string())
}

/// Search service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_version: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: env_var("AZURE_SEARCH_ENDPOINT"),
            api_key: env_var("AZURE_SEARCH_API_KEY"),
            api_version: default_api_version(),
        }
    }
}

impl SearchConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// Schema inference and validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Records sampled by `infer_table_schema` when no size is given
    pub inference_sample_size: usize,

    /// Records sampled when validating a write
    pub validation_sample_size: usize,

    /// Whether failing writes are refused or only annotated
    pub on_violation: OnViolation,

    /// How long inferred schemas are reused; 0 disables caching
    pub cache_ttl_seconds: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            inference_sample_size: DEFAULT_INFERENCE_SAMPLE_SIZE,
            validation_sample_size: DEFAULT_VALIDATION_SAMPLE_SIZE,
            on_violation: OnViolation::default(),
            cache_ttl_seconds: 0,
        }
    }
}

impl SchemaConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

/// HTTP client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            max_retries: 3,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default().max_retries(self.max_retries)
    }

    pub fn client(&self) -> Result<HttpClient, StoreError> {
        HttpClient::with_timeout(self.timeout())
    }
}

impl Config {
    /// Check values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema.inference_sample_size == 0 {
            return Err(ConfigError::Invalid(
                "schema.inference_sample_size must be at least 1".to_string(),
            ));
        }
        if self.schema.validation_sample_size == 0 {
            return Err(ConfigError::Invalid(
                "schema.validation_sample_size must be at least 1".to_string(),
            ));
        }
        if self.http.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "http.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if let Some(endpoint) = &self.search.endpoint {
            validate_endpoint(endpoint)
                .map_err(|e| ConfigError::Invalid(format!("search.endpoint: {}", e)))?;
        }
        self.table
            .connection()
            .map_err(|e| ConfigError::Invalid(format!("table: {}", e)))?;
        Ok(())
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        fn mask(value: &Option<String>) -> Option<String> {
            value.as_ref().map(|_| "********".to_string())
        }
        let mut copy = self.clone();
        copy.table.connection_string = mask(&self.table.connection_string);
        copy.table.sas_token = mask(&self.table.sas_token);
        copy.search.api_key = mask(&self.search.api_key);
        copy
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn build(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(env),
    );

    let config: Config = builder.build()?.try_deserialize()?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from a file plus environment overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    build(Some(path), None)
}

/// Configuration from defaults and environment overrides only
pub fn get_config() -> Result<Config, ConfigError> {
    build(None, None)
}

/// Look for a config file in the working directory, then the user config dir
pub fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }

    let user = dirs::config_dir()?.join("azure-data-mcp").join("config.toml");
    user.is_file().then_some(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.schema.inference_sample_size, 10);
        assert_eq!(config.schema.validation_sample_size, 20);
        assert_eq!(config.schema.on_violation, OnViolation::Warn);
        assert!(config.schema.cache_ttl().is_zero());
        assert_eq!(config.http.timeout_seconds, 30);
        assert_eq!(config.http.retry_config().max_attempts, 4);
    }

    #[test]
    fn test_config_file_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let toml_content = r#"
[table]
endpoint = "http://127.0.0.1:10002/devstoreaccount1"
sas_token = "sv=2022&sig=abc"

[search]
endpoint = "https://acme.search.windows.net"
api_key = "key"

[schema]
validation_sample_size = 50
on_violation = "reject"
cache_ttl_seconds = 120

[http]
max_retries = 0
"#;

        let mut file = File::create(&path).unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = build(Some(&path), Some(HashMap::new())).unwrap();

        assert_eq!(config.schema.validation_sample_size, 50);
        assert_eq!(config.schema.inference_sample_size, 10);
        assert_eq!(config.schema.on_violation, OnViolation::Reject);
        assert_eq!(config.schema.cache_ttl(), Duration::from_secs(120));
        assert_eq!(config.http.max_retries, 0);
        assert_eq!(
            config.search.endpoint.as_deref(),
            Some("https://acme.search.windows.net")
        );

        let connection = config.table.connection().unwrap().unwrap();
        assert_eq!(connection.endpoint, "http://127.0.0.1:10002/devstoreaccount1");
        assert_eq!(connection.sas_token.as_deref(), Some("sv=2022&sig=abc"));
    }

    #[test]
    fn test_environment_overrides() {
        let env = HashMap::from([
            (
                "AZURE_DATA_MCP__SCHEMA__ON_VIOLATION".to_string(),
                "reject".to_string(),
            ),
            (
                "AZURE_DATA_MCP__HTTP__TIMEOUT_SECONDS".to_string(),
                "5".to_string(),
            ),
        ]);
        let config = build(None, Some(env)).unwrap();
        assert_eq!(config.schema.on_violation, OnViolation::Reject);
        assert_eq!(config.http.timeout_seconds, 5);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[schema]\nvalidation_sample_size = 0\n").unwrap();
        assert!(matches!(
            build(Some(&path), Some(HashMap::new())),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[search]\nendpoint = \"ftp://nope\"\n").unwrap();
        assert!(build(Some(&path), Some(HashMap::new())).is_err());
    }

    #[test]
    fn test_config_file_nonexistent() {
        let result = load_config(Path::new("/nonexistent/azure-data-mcp.toml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_config_file_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("invalid.toml");
        std::fs::write(&path, "invalid = toml = content").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = Config::default();
        config.search.api_key = Some("secret".to_string());
        config.table.sas_token = Some("sig=abc".to_string());
        let shown = config.redacted();
        assert_eq!(shown.search.api_key.as_deref(), Some("********"));
        assert_eq!(shown.table.sas_token.as_deref(), Some("********"));
    }
}
