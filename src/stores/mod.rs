//! Store clients behind trait-based seams.
//!
//! This module defines the interfaces the MCP tools talk to:
//!
//! - [`TableStore`]: a schema-less partitioned key-value table store
//! - [`RecordSource`]: the read path schema inference samples from
//! - [`SearchService`]: a managed full-text/vector search index
//!
//! Concrete implementations are [`AzureTableStore`] and [`AzureSearchClient`]
//! (REST over `reqwest`), plus [`MemoryTableStore`] for tests and local runs.
//!
//! # Runtime Configuration
//!
//! The Azure clients are built from [`crate::config::Config`]. A table store is
//! available when a connection string, account name or explicit table endpoint
//! is configured; a search service is available when `AZURE_SEARCH_ENDPOINT`
//! is set.

mod azure_search;
mod azure_table;
mod memory;

pub use azure_search::{
    AzureSearchClient, SearchRequest, SearchResults, VectorQuery,
    DEFAULT_API_VERSION as DEFAULT_SEARCH_API_VERSION,
};
pub use azure_table::{AzureTableStore, TableConnection};
pub use memory::MemoryTableStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{record_from_json, FieldValue, Record};

/// Options for a table query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// OData filter expression
    pub filter: Option<String>,

    /// Properties to project
    pub select: Option<Vec<String>>,

    /// Maximum number of entities to return
    pub top: Option<usize>,
}

impl QueryOptions {
    /// Query returning at most `top` entities
    pub fn top(top: usize) -> Self {
        Self {
            top: Some(top),
            ..Default::default()
        }
    }

    /// Set the filter expression
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Set the projected properties
    pub fn select(mut self, select: Vec<String>) -> Self {
        self.select = Some(select);
        self
    }
}

/// How an update treats properties missing from the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Keep existing properties that the payload omits
    #[default]
    Merge,
    /// Replace the whole entity
    Replace,
}

impl std::str::FromStr for UpdateMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "merge" => Ok(UpdateMode::Merge),
            "replace" => Ok(UpdateMode::Replace),
            other => Err(StoreError::InvalidRequest(format!(
                "unknown update mode '{}', expected 'merge' or 'replace'",
                other
            ))),
        }
    }
}

/// Names the table service manages itself; never treated as user properties.
pub const SYSTEM_PROPERTIES: [&str; 3] = ["PartitionKey", "RowKey", "Timestamp"];

/// Whether `name` is a system property or OData metadata
pub fn is_system_property(name: &str) -> bool {
    SYSTEM_PROPERTIES.contains(&name) || name.starts_with("odata.") || name.contains("@odata.")
}

/// Convert a JSON object into storable properties.
///
/// System properties and the key aliases in `skip` are dropped; nested
/// objects and arrays are refused since table properties are scalars.
pub fn entity_properties(value: &Value, skip: &[&str]) -> Result<Record, StoreError> {
    let record = record_from_json(value)
        .ok_or_else(|| StoreError::InvalidRequest("'entity' must be a JSON object".into()))?;
    let mut properties = Record::new();
    for (name, value) in record {
        if is_system_property(&name) || skip.contains(&name.as_str()) {
            continue;
        }
        if let FieldValue::Other(_) = value {
            return Err(StoreError::InvalidRequest(format!(
                "property '{}' must be a string, number, boolean or null",
                name
            )));
        }
        properties.insert(name, value);
    }
    Ok(properties)
}

/// A stored entity: system keys plus user properties
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub properties: Record,
}

impl TableEntity {
    /// Create an entity with no server-assigned metadata
    pub fn new(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        properties: Record,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            timestamp: None,
            etag: None,
            properties,
        }
    }

    /// Flattened JSON view used in tool responses
    pub fn to_json(&self) -> Value {
        let mut map = Map::new();
        map.insert("partitionKey".into(), Value::String(self.partition_key.clone()));
        map.insert("rowKey".into(), Value::String(self.row_key.clone()));
        if let Some(ts) = &self.timestamp {
            map.insert(
                "timestamp".into(),
                Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            );
        }
        if let Some(etag) = &self.etag {
            map.insert("etag".into(), Value::String(etag.clone()));
        }
        for (key, value) in &self.properties {
            map.insert(key.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

/// Interface to a schema-less partitioned table store.
#[async_trait]
pub trait TableStore: Send + Sync + std::fmt::Debug {
    /// Short identifier used in logs (e.g., "azure-table", "memory")
    fn id(&self) -> &str;

    /// List table names
    async fn list_tables(&self) -> Result<Vec<String>, StoreError>;

    /// Create a table
    async fn create_table(&self, table: &str) -> Result<(), StoreError>;

    /// Delete a table and all of its entities
    async fn delete_table(&self, table: &str) -> Result<(), StoreError>;

    /// Query entities. Order is store-defined.
    async fn query(&self, table: &str, options: &QueryOptions)
        -> Result<Vec<TableEntity>, StoreError>;

    /// Fetch one entity
    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<TableEntity, StoreError>;

    /// Insert a new entity; fails with [`StoreError::AlreadyExists`] on key collision
    async fn insert_entity(&self, table: &str, entity: &TableEntity) -> Result<(), StoreError>;

    /// Update an existing entity
    async fn update_entity(
        &self,
        table: &str,
        entity: &TableEntity,
        mode: UpdateMode,
    ) -> Result<(), StoreError>;

    /// Delete one entity
    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<(), StoreError>;
}

/// Read path used by schema inference.
///
/// Implementations must report read failures as errors, distinct from an
/// empty result.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Read at most `max_count` records
    async fn read_sample(&self, max_count: usize) -> Result<Vec<Record>, StoreError>;
}

/// A [`RecordSource`] over one table of a [`TableStore`], yielding user properties only.
#[derive(Debug, Clone, Copy)]
pub struct TableSample<'a> {
    pub store: &'a dyn TableStore,
    pub table: &'a str,
}

impl<'a> TableSample<'a> {
    pub fn new(store: &'a dyn TableStore, table: &'a str) -> Self {
        Self { store, table }
    }
}

#[async_trait]
impl<'a> RecordSource for TableSample<'a> {
    async fn read_sample(&self, max_count: usize) -> Result<Vec<Record>, StoreError> {
        let entities = self
            .store
            .query(self.table, &QueryOptions::top(max_count))
            .await?;
        Ok(entities
            .into_iter()
            .take(max_count)
            .map(|e| e.properties)
            .collect())
    }
}

#[async_trait]
impl RecordSource for Vec<Record> {
    async fn read_sample(&self, max_count: usize) -> Result<Vec<Record>, StoreError> {
        Ok(self.iter().take(max_count).cloned().collect())
    }
}

/// Interface to a managed search index.
#[async_trait]
pub trait SearchService: Send + Sync + std::fmt::Debug {
    /// Run a text and/or vector query
    async fn search(&self, index: &str, request: &SearchRequest)
        -> Result<SearchResults, StoreError>;

    /// Fetch a document by key
    async fn get_document(
        &self,
        index: &str,
        key: &str,
        select: Option<&[String]>,
    ) -> Result<Value, StoreError>;

    /// Index definition: fields, analyzers, semantic and vector settings
    async fn get_index(&self, index: &str) -> Result<Value, StoreError>;

    /// Document count and storage usage of an index
    async fn get_index_statistics(&self, index: &str) -> Result<Value, StoreError>;

    /// List index names
    async fn list_indexes(&self) -> Result<Vec<String>, StoreError>;
}

/// Errors that can occur when interacting with a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Invalid request parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Table, entity, index or document not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Table or entity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(String),

    /// Parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Rate limit exceeded (with optional retry-after seconds)
    #[error("Rate limit exceeded")]
    RateLimit(Option<u64>),

    /// API error from the service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Missing or unusable client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other error
    #[error("Error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Parse(format!("JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_mode_parse() {
        assert_eq!("merge".parse::<UpdateMode>().unwrap(), UpdateMode::Merge);
        assert_eq!("Replace".parse::<UpdateMode>().unwrap(), UpdateMode::Replace);
        assert!("upsert".parse::<UpdateMode>().is_err());
    }

    #[test]
    fn test_entity_to_json_flattens_properties() {
        let mut props = Record::new();
        props.insert("status".into(), FieldValue::from("active"));
        let entity = TableEntity::new("p1", "r1", props);

        let json = entity.to_json();
        assert_eq!(json["partitionKey"], "p1");
        assert_eq!(json["rowKey"], "r1");
        assert_eq!(json["status"], "active");
        assert!(json.get("timestamp").is_none());
    }

    #[test]
    fn test_system_properties() {
        assert!(is_system_property("PartitionKey"));
        assert!(is_system_property("Timestamp"));
        assert!(is_system_property("odata.etag"));
        assert!(is_system_property("created@odata.type"));
        assert!(!is_system_property("status"));
    }

    #[test]
    fn test_entity_properties_filters_and_rejects() {
        let props = entity_properties(
            &json!({"PartitionKey": "x", "odata.etag": "y", "Timestamp": "t", "name": "n", "n": 1}),
            &[],
        )
        .unwrap();
        assert_eq!(props.len(), 2);

        let props = entity_properties(&json!({"rowKey": "r", "name": "n"}), &["rowKey"]).unwrap();
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["name"]);

        assert!(entity_properties(&json!({"tags": ["a"]}), &[]).is_err());
        assert!(entity_properties(&json!("text"), &[]).is_err());
    }

    #[tokio::test]
    async fn test_vec_record_source_limits_sample() {
        let records: Vec<Record> = (0..5).map(|_| Record::new()).collect();
        assert_eq!(records.read_sample(3).await.unwrap().len(), 3);
        assert_eq!(records.read_sample(10).await.unwrap().len(), 5);
    }
}
