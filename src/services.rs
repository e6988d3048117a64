//! Store clients assembled from configuration.

use std::sync::Arc;

use crate::config::{Config, SchemaConfig};
use crate::schema::SchemaGuard;
use crate::stores::{
    AzureSearchClient, AzureTableStore, MemoryTableStore, SearchService, StoreError, TableStore,
};
use crate::utils::SchemaCache;

/// The backends the tools and CLI commands operate on
#[derive(Debug, Clone)]
pub struct Services {
    table_store: Option<Arc<dyn TableStore>>,
    search: Option<Arc<dyn SearchService>>,
    guard: Arc<SchemaGuard>,
    inference_sample_size: usize,
}

impl Services {
    /// No backends; schema settings from `schema`
    pub fn new(schema: &SchemaConfig) -> Self {
        Self {
            table_store: None,
            search: None,
            guard: Arc::new(SchemaGuard::new(
                schema.validation_sample_size,
                schema.on_violation,
                SchemaCache::new(schema.cache_ttl()),
            )),
            inference_sample_size: schema.inference_sample_size,
        }
    }

    /// Build the Azure clients that `config` has settings for
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let mut services = Self::new(&config.schema);
        if let Some(connection) = config.table.connection()? {
            tracing::info!(endpoint = %connection.endpoint, "Table store configured");
            services.table_store = Some(Arc::new(AzureTableStore::new(
                connection,
                config.http.client()?,
                config.http.retry_config(),
            )));
        }
        services.search = search_from_config(config)?;
        Ok(services)
    }

    /// Like [`Services::from_config`] but with an in-process table store
    pub fn in_memory(config: &Config) -> Result<Self, StoreError> {
        let mut services = Self::new(&config.schema);
        services.search = search_from_config(config)?;
        tracing::info!("Using in-memory table store");
        Ok(services.with_table_store(Arc::new(MemoryTableStore::new())))
    }

    pub fn with_table_store(mut self, store: Arc<dyn TableStore>) -> Self {
        self.table_store = Some(store);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchService>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn has_table_store(&self) -> bool {
        self.table_store.is_some()
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    /// The table store, or a configuration error naming what to set
    pub fn table_store(&self) -> Result<Arc<dyn TableStore>, StoreError> {
        self.table_store.clone().ok_or_else(|| {
            StoreError::Configuration(
                "no table store configured; set AZURE_STORAGE_CONNECTION_STRING, \
                 AZURE_STORAGE_ACCOUNT_NAME or AZURE_TABLE_ENDPOINT"
                    .to_string(),
            )
        })
    }

    /// The search service, or a configuration error naming what to set
    pub fn search(&self) -> Result<Arc<dyn SearchService>, StoreError> {
        self.search.clone().ok_or_else(|| {
            StoreError::Configuration(
                "no search service configured; set AZURE_SEARCH_ENDPOINT".to_string(),
            )
        })
    }

    pub fn guard(&self) -> Arc<SchemaGuard> {
        self.guard.clone()
    }

    pub fn inference_sample_size(&self) -> usize {
        self.inference_sample_size
    }
}

fn search_from_config(config: &Config) -> Result<Option<Arc<dyn SearchService>>, StoreError> {
    let Some(endpoint) = &config.search.endpoint else {
        return Ok(None);
    };
    if config.search.api_key.is_none() {
        tracing::warn!("AZURE_SEARCH_API_KEY is not set; search requests will be anonymous");
    }
    let client = AzureSearchClient::new(
        endpoint,
        config.search.api_key.clone(),
        config.http.client()?,
        config.http.retry_config(),
    )?
    .with_api_version(config.search.api_version.clone());
    tracing::info!(endpoint = %client.endpoint(), "Search service configured");
    Ok(Some(Arc::new(client)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SearchConfig, TableConfig};

    fn bare_config() -> Config {
        Config {
            table: TableConfig {
                connection_string: None,
                account_name: None,
                sas_token: None,
                endpoint: None,
            },
            search: SearchConfig {
                endpoint: None,
                api_key: None,
                api_version: "2023-11-01".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_nothing_configured() {
        let services = Services::from_config(&bare_config()).unwrap();
        assert!(!services.has_table_store());
        assert!(!services.has_search());
        assert!(matches!(
            services.table_store(),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_both_configured() {
        let mut config = bare_config();
        config.table.account_name = Some("acme".to_string());
        config.table.sas_token = Some("sv=1".to_string());
        config.search.endpoint = Some("https://acme.search.windows.net".to_string());

        let services = Services::from_config(&config).unwrap();
        assert_eq!(services.table_store().unwrap().id(), "azure-table");
        assert!(services.has_search());
    }

    #[test]
    fn test_in_memory_ignores_table_settings() {
        let mut config = bare_config();
        config.table.connection_string = Some("AccountName=acme;AccountKey=abc".to_string());
        let services = Services::in_memory(&config).unwrap();
        assert_eq!(services.table_store().unwrap().id(), "memory");
    }
}
