//! In-process table store for testing and local runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::stores::{QueryOptions, StoreError, TableEntity, TableStore, UpdateMode};

type Partition = BTreeMap<(String, String), TableEntity>;

/// A table store that keeps everything in memory.
///
/// Entities are returned in `(PartitionKey, RowKey)` order. Filter
/// expressions are not evaluated.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<BTreeMap<String, Partition>>,
    read_failure: Mutex<Option<String>>,
    etag_counter: Mutex<u64>,
}

impl MemoryTableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given (empty) tables.
    pub fn with_tables<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        if let Ok(mut tables) = store.tables.lock() {
            for name in names {
                tables.insert(name.into(), Partition::new());
            }
        }
        store
    }

    /// Make every subsequent query fail with the given message.
    pub fn set_read_failure(&self, message: impl Into<String>) {
        if let Ok(mut guard) = self.read_failure.lock() {
            *guard = Some(message.into());
        }
    }

    /// Clear a configured read failure.
    pub fn clear_read_failure(&self) {
        if let Ok(mut guard) = self.read_failure.lock() {
            *guard = None;
        }
    }

    fn tables(&self) -> Result<MutexGuard<'_, BTreeMap<String, Partition>>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".to_string()))
    }

    fn next_etag(&self) -> String {
        let mut counter = match self.etag_counter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *counter += 1;
        format!("W/\"{}\"", *counter)
    }

    fn check_read_failure(&self) -> Result<(), StoreError> {
        match self.read_failure.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(message) => Err(StoreError::Network(message.clone())),
                None => Ok(()),
            },
            Err(_) => Err(StoreError::Other("memory store lock poisoned".to_string())),
        }
    }

    fn stamp(&self, entity: &TableEntity) -> TableEntity {
        let mut stored = entity.clone();
        stored.timestamp = Some(Utc::now());
        stored.etag = Some(self.next_etag());
        stored
    }
}

fn table_not_found(table: &str) -> StoreError {
    StoreError::NotFound(format!("table '{}' does not exist", table))
}

fn entity_not_found(partition_key: &str, row_key: &str) -> StoreError {
    StoreError::NotFound(format!(
        "entity with PartitionKey='{}' and RowKey='{}'",
        partition_key, row_key
    ))
}

#[async_trait]
impl TableStore for MemoryTableStore {
    fn id(&self) -> &str {
        "memory"
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.tables()?.keys().cloned().collect())
    }

    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        if tables.contains_key(table) {
            return Err(StoreError::AlreadyExists(format!("table '{}'", table)));
        }
        tables.insert(table.to_string(), Partition::new());
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        self.tables()?
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| table_not_found(table))
    }

    async fn query(
        &self,
        table: &str,
        options: &QueryOptions,
    ) -> Result<Vec<TableEntity>, StoreError> {
        self.check_read_failure()?;
        if options.filter.is_some() {
            return Err(StoreError::InvalidRequest(
                "filter expressions are not supported by the in-memory store".to_string(),
            ));
        }

        let tables = self.tables()?;
        let partition = tables.get(table).ok_or_else(|| table_not_found(table))?;
        let limit = options.top.unwrap_or(usize::MAX);

        Ok(partition
            .values()
            .take(limit)
            .map(|entity| match &options.select {
                Some(select) => {
                    let mut projected = entity.clone();
                    projected.properties.retain(|k, _| select.contains(k));
                    projected
                }
                None => entity.clone(),
            })
            .collect())
    }

    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<TableEntity, StoreError> {
        self.check_read_failure()?;
        let tables = self.tables()?;
        let partition = tables.get(table).ok_or_else(|| table_not_found(table))?;
        partition
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
            .ok_or_else(|| entity_not_found(partition_key, row_key))
    }

    async fn insert_entity(&self, table: &str, entity: &TableEntity) -> Result<(), StoreError> {
        let stored = self.stamp(entity);
        let mut tables = self.tables()?;
        let partition = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if partition.contains_key(&key) {
            return Err(StoreError::AlreadyExists(format!(
                "entity with PartitionKey='{}' and RowKey='{}'",
                entity.partition_key, entity.row_key
            )));
        }
        partition.insert(key, stored);
        Ok(())
    }

    async fn update_entity(
        &self,
        table: &str,
        entity: &TableEntity,
        mode: UpdateMode,
    ) -> Result<(), StoreError> {
        let stamped = self.stamp(entity);
        let mut tables = self.tables()?;
        let partition = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        let existing = partition
            .get_mut(&key)
            .ok_or_else(|| entity_not_found(&entity.partition_key, &entity.row_key))?;

        match mode {
            UpdateMode::Replace => *existing = stamped,
            UpdateMode::Merge => {
                existing.properties.extend(stamped.properties);
                existing.timestamp = stamped.timestamp;
                existing.etag = stamped.etag;
            }
        }
        Ok(())
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let partition = tables.get_mut(table).ok_or_else(|| table_not_found(table))?;
        partition
            .remove(&(partition_key.to_string(), row_key.to_string()))
            .map(|_| ())
            .ok_or_else(|| entity_not_found(partition_key, row_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldValue, Record};

    fn entity(pk: &str, rk: &str, pairs: &[(&str, FieldValue)]) -> TableEntity {
        let props: Record = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        TableEntity::new(pk, rk, props)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryTableStore::with_tables(["orders"]);
        let e = entity("p", "1", &[("status", FieldValue::from("active"))]);
        store.insert_entity("orders", &e).await.unwrap();

        let fetched = store.get_entity("orders", "p", "1").await.unwrap();
        assert_eq!(fetched.properties, e.properties);
        assert!(fetched.timestamp.is_some());
        assert!(fetched.etag.is_some());
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let store = MemoryTableStore::with_tables(["orders"]);
        let e = entity("p", "1", &[]);
        store.insert_entity("orders", &e).await.unwrap();
        let err = store.insert_entity("orders", &e).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_missing_table() {
        let store = MemoryTableStore::new();
        let err = store.query("nope", &QueryOptions::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_merge_keeps_and_replace_drops() {
        let store = MemoryTableStore::with_tables(["t"]);
        store
            .insert_entity(
                "t",
                &entity("p", "1", &[("a", FieldValue::Integer(1)), ("b", FieldValue::Integer(2))]),
            )
            .await
            .unwrap();

        store
            .update_entity("t", &entity("p", "1", &[("b", FieldValue::Integer(20))]), UpdateMode::Merge)
            .await
            .unwrap();
        let merged = store.get_entity("t", "p", "1").await.unwrap();
        assert_eq!(merged.properties["a"], FieldValue::Integer(1));
        assert_eq!(merged.properties["b"], FieldValue::Integer(20));

        store
            .update_entity("t", &entity("p", "1", &[("c", FieldValue::Integer(3))]), UpdateMode::Replace)
            .await
            .unwrap();
        let replaced = store.get_entity("t", "p", "1").await.unwrap();
        assert_eq!(replaced.properties.len(), 1);
        assert!(replaced.properties.contains_key("c"));
    }

    #[tokio::test]
    async fn test_query_top_and_select() {
        let store = MemoryTableStore::with_tables(["t"]);
        for i in 0..5 {
            store
                .insert_entity(
                    "t",
                    &entity("p", &i.to_string(), &[("a", FieldValue::Integer(1)), ("b", FieldValue::Integer(2))]),
                )
                .await
                .unwrap();
        }

        let options = QueryOptions::top(2).select(vec!["a".to_string()]);
        let rows = store.query("t", &options).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.properties.len() == 1));
    }

    #[tokio::test]
    async fn test_read_failure_injection() {
        let store = MemoryTableStore::with_tables(["t"]);
        store.set_read_failure("connection reset");
        assert!(store.query("t", &QueryOptions::default()).await.is_err());
        store.clear_read_failure();
        assert!(store.query("t", &QueryOptions::default()).await.is_ok());
    }
}
