//! Table storage tool handlers.
//!
//! Writes go through [`SchemaGuard`]: the candidate is validated against the
//! table's inferred schema, the report is attached to the result as
//! `schemaValidation`, and any cached schema for the table is dropped once the
//! write lands.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::models::Record;
use crate::schema::{validate, SchemaGuard, ValidationReport};
use crate::stores::{
    entity_properties, QueryOptions, StoreError, TableEntity, TableStore, UpdateMode,
};
use crate::utils::validate::{validate_entity_key, validate_table_name};

use super::tools::{optional_str, optional_usize, required_str, string_list, ToolHandler};

/// Default and ceiling for `read_table`'s `max_results`
const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_RESULTS_LIMIT: usize = 1000;

/// Shared state of the table tools
#[derive(Debug)]
pub struct TableContext {
    pub store: Arc<dyn TableStore>,
    pub guard: Arc<SchemaGuard>,
    pub inference_sample_size: usize,
}

fn table_arg<'a>(args: &'a Value) -> Result<&'a str, String> {
    validate_table_name(required_str(args, "table_name")?).map_err(|e| e.to_string())
}

fn key_args<'a>(args: &'a Value) -> Result<(&'a str, &'a str), String> {
    let pk = validate_entity_key("PartitionKey", required_str(args, "partition_key")?)
        .map_err(|e| e.to_string())?;
    let rk = validate_entity_key("RowKey", required_str(args, "row_key")?)
        .map_err(|e| e.to_string())?;
    Ok((pk, rk))
}

fn store_err(e: StoreError) -> String {
    e.to_string()
}

/// Handler for listing tables
#[derive(Debug)]
pub struct ListTablesHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for ListTablesHandler {
    async fn execute(&self, _args: Value) -> Result<Value, String> {
        let tables = self.ctx.store.list_tables().await.map_err(store_err)?;
        Ok(json!({
            "count": tables.len(),
            "tables": tables,
        }))
    }
}

/// Handler for querying a table
#[derive(Debug)]
pub struct ReadTableHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for ReadTableHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let max_results = optional_usize(&args, "max_results")?.unwrap_or(DEFAULT_MAX_RESULTS);
        if max_results == 0 || max_results > MAX_RESULTS_LIMIT {
            return Err(format!(
                "'max_results' must be between 1 and {}",
                MAX_RESULTS_LIMIT
            ));
        }

        let mut options = QueryOptions::top(max_results);
        if let Some(filter) = optional_str(&args, "filter") {
            options = options.filter(filter);
        }
        let select = string_list(&args, "select")?;
        if !select.is_empty() {
            options = options.select(select);
        }

        let entities = self
            .ctx
            .store
            .query(table, &options)
            .await
            .map_err(store_err)?;

        Ok(json!({
            "tableName": table,
            "count": entities.len(),
            "entities": entities.iter().map(TableEntity::to_json).collect::<Vec<_>>(),
        }))
    }
}

/// Handler for fetching one entity
#[derive(Debug)]
pub struct GetEntityHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for GetEntityHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let (pk, rk) = key_args(&args)?;

        match self.ctx.store.get_entity(table, pk, rk).await {
            Ok(entity) => Ok(json!({
                "exists": true,
                "entity": entity.to_json(),
            })),
            Err(StoreError::NotFound(_)) => Ok(json!({
                "exists": false,
                "partitionKey": pk,
                "rowKey": rk,
            })),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Handler for schema inference
#[derive(Debug)]
pub struct InferSchemaHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for InferSchemaHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let sample_size =
            optional_usize(&args, "sample_size")?.unwrap_or(self.ctx.inference_sample_size);
        if sample_size == 0 {
            return Err("'sample_size' must be at least 1".to_string());
        }

        let inference = self
            .ctx
            .guard
            .infer(self.ctx.store.as_ref(), table, sample_size)
            .await
            .map_err(|e| format!("Failed to infer schema for '{}': {}", table, e))?;

        let mut result = inference.to_json();
        if let Some(object) = result.as_object_mut() {
            object.insert("tableName".into(), json!(table));
        }
        Ok(result)
    }
}

/// Handler for validating an entity without writing it
#[derive(Debug)]
pub struct ValidateEntityHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for ValidateEntityHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let entity = args.get("entity").ok_or("Missing 'entity' parameter")?;
        let properties = entity_properties(entity, &[]).map_err(store_err)?;

        let guard = &self.ctx.guard;
        let inference = guard
            .infer(self.ctx.store.as_ref(), table, guard.validation_sample_size())
            .await
            .map_err(|e| format!("Failed to infer schema for '{}': {}", table, e))?;
        let report = validate(&inference, &properties);

        Ok(json!({
            "tableName": table,
            "validation": report,
        }))
    }
}

/// Handler for inserting an entity
#[derive(Debug)]
pub struct CreateEntityHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for CreateEntityHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let (pk, rk) = key_args(&args)?;
        let entity = args.get("entity").ok_or("Missing 'entity' parameter")?;
        let properties = entity_properties(entity, &[]).map_err(store_err)?;

        let store = self.ctx.store.as_ref();
        let report = self
            .ctx
            .guard
            .check(store, table, &properties)
            .await
            .map_err(|e| e.to_string())?;

        store
            .insert_entity(table, &TableEntity::new(pk, rk, properties))
            .await
            .map_err(store_err)?;
        self.ctx.guard.invalidate(table);
        tracing::debug!(table, pk, rk, "Entity created");

        Ok(json!({
            "tableName": table,
            "partitionKey": pk,
            "rowKey": rk,
            "created": true,
            "schemaValidation": report,
        }))
    }
}

/// Handler for updating an entity
#[derive(Debug)]
pub struct UpdateEntityHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for UpdateEntityHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let (pk, rk) = key_args(&args)?;
        let entity = args.get("entity").ok_or("Missing 'entity' parameter")?;
        let properties = entity_properties(entity, &[]).map_err(store_err)?;
        let mode: UpdateMode = match optional_str(&args, "mode") {
            Some(mode) => mode.parse().map_err(store_err)?,
            None => UpdateMode::default(),
        };

        let store = self.ctx.store.as_ref();
        let report = self
            .ctx
            .guard
            .check(store, table, &properties)
            .await
            .map_err(|e| e.to_string())?;

        store
            .update_entity(table, &TableEntity::new(pk, rk, properties), mode)
            .await
            .map_err(store_err)?;
        self.ctx.guard.invalidate(table);

        Ok(json!({
            "tableName": table,
            "partitionKey": pk,
            "rowKey": rk,
            "updated": true,
            "mode": mode,
            "schemaValidation": report,
        }))
    }
}

/// Handler for deleting an entity
#[derive(Debug)]
pub struct DeleteEntityHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for DeleteEntityHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let (pk, rk) = key_args(&args)?;

        self.ctx
            .store
            .delete_entity(table, pk, rk)
            .await
            .map_err(store_err)?;
        self.ctx.guard.invalidate(table);

        Ok(json!({
            "tableName": table,
            "partitionKey": pk,
            "rowKey": rk,
            "deleted": true,
        }))
    }
}

const PARTITION_KEY_ALIASES: [&str; 2] = ["partitionKey", "partition_key"];
const ROW_KEY_ALIASES: [&str; 2] = ["rowKey", "row_key"];

struct BatchItem {
    index: usize,
    row_key: String,
    properties: Record,
}

fn key_from(object: &Map<String, Value>, canonical: &str, aliases: &[&str]) -> Option<String> {
    std::iter::once(canonical)
        .chain(aliases.iter().copied())
        .find_map(|name| object.get(name).and_then(Value::as_str))
        .map(str::to_string)
}

fn item_keys(index: usize, value: &Value) -> Result<(String, String), String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("entity {} is not a JSON object", index))?;
    let pk = key_from(object, "PartitionKey", &PARTITION_KEY_ALIASES)
        .ok_or_else(|| format!("entity {} is missing partitionKey", index))?;
    let rk = key_from(object, "RowKey", &ROW_KEY_ALIASES)
        .ok_or_else(|| format!("entity {} is missing rowKey", index))?;
    validate_entity_key("PartitionKey", &pk).map_err(|e| e.to_string())?;
    validate_entity_key("RowKey", &rk).map_err(|e| e.to_string())?;
    Ok((pk, rk))
}

/// A flat item: keys and properties side by side
fn parse_batch_item(index: usize, value: &Value) -> Result<(String, BatchItem), String> {
    let (pk, rk) = item_keys(index, value)?;
    let skip: Vec<&str> = PARTITION_KEY_ALIASES
        .iter()
        .chain(ROW_KEY_ALIASES.iter())
        .copied()
        .collect();
    let properties = entity_properties(value, &skip).map_err(store_err)?;

    Ok((
        pk,
        BatchItem {
            index,
            row_key: rk,
            properties,
        },
    ))
}

/// An update item: keys, the properties under `entity`, and an optional `mode`
fn parse_update_item(
    index: usize,
    value: &Value,
    default_mode: UpdateMode,
) -> Result<(String, BatchItem, UpdateMode), String> {
    let (pk, rk) = item_keys(index, value)?;
    let entity = value
        .get("entity")
        .ok_or_else(|| format!("entity {} is missing 'entity'", index))?;
    let properties = entity_properties(entity, &[]).map_err(store_err)?;
    let mode = match value.get("mode").and_then(Value::as_str) {
        Some(mode) => mode.parse().map_err(store_err)?,
        None => default_mode,
    };

    Ok((
        pk,
        BatchItem {
            index,
            row_key: rk,
            properties,
        },
        mode,
    ))
}

type ItemOutcome = Result<Option<ValidationReport>, (String, Option<ValidationReport>)>;

/// Fill in `success` and the optional report or error of a batch result
fn settle(result: &mut Value, outcome: ItemOutcome) -> bool {
    let Some(object) = result.as_object_mut() else {
        return false;
    };
    match outcome {
        Ok(report) => {
            object.insert("success".into(), json!(true));
            if let Some(report) = report {
                object.insert("schemaValidation".into(), json!(report));
            }
            true
        }
        Err((error, report)) => {
            object.insert("success".into(), json!(false));
            object.insert("error".into(), json!(error));
            if let Some(report) = report {
                object.insert("schemaValidation".into(), json!(report));
            }
            false
        }
    }
}

fn batch_items<'a>(args: &'a Value, name: &str) -> Result<&'a Vec<Value>, String> {
    let items = args
        .get(name)
        .and_then(|v| v.as_array())
        .ok_or_else(|| format!("Missing '{}' parameter", name))?;
    if items.is_empty() {
        return Err(format!("'{}' must not be empty", name));
    }
    Ok(items)
}

fn batch_summary(
    table: &str,
    total: usize,
    succeeded: usize,
    partitions: usize,
    mut results: Vec<Value>,
) -> Value {
    results.sort_by_key(|r| r["index"].as_u64());
    json!({
        "tableName": table,
        "total": total,
        "succeeded": succeeded,
        "failed": total - succeeded,
        "partitions": partitions,
        "results": results,
    })
}

fn item_error(index: usize, error: String) -> Value {
    json!({
        "index": index,
        "success": false,
        "error": error,
    })
}

/// Handler for inserting many entities
#[derive(Debug)]
pub struct BatchCreateEntitiesHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for BatchCreateEntitiesHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let entities = batch_items(&args, "entities")?;

        let mut results: Vec<Value> = Vec::with_capacity(entities.len());
        let mut partitions: BTreeMap<String, Vec<BatchItem>> = BTreeMap::new();
        for (index, value) in entities.iter().enumerate() {
            match parse_batch_item(index, value) {
                Ok((pk, item)) => partitions.entry(pk).or_default().push(item),
                Err(e) => results.push(item_error(index, e)),
            }
        }

        let store = self.ctx.store.as_ref();
        let guard = &self.ctx.guard;
        // One sample for the whole batch, taken before any of it is written
        let inference = guard
            .infer(store, table, guard.validation_sample_size())
            .await;

        let mut written = 0usize;
        for (pk, items) in &partitions {
            for item in items {
                let mut result = json!({
                    "index": item.index,
                    "partitionKey": pk,
                    "rowKey": item.row_key,
                });
                let outcome = match guard.check_against(table, inference.as_ref(), &item.properties) {
                    Err(violation) => Err((violation.to_string(), violation.into_report())),
                    Ok(report) => {
                        let entity = TableEntity::new(pk.as_str(), item.row_key.as_str(), item.properties.clone());
                        match store.insert_entity(table, &entity).await {
                            Ok(()) => Ok(Some(report)),
                            Err(e) => Err((e.to_string(), Some(report))),
                        }
                    }
                };
                if settle(&mut result, outcome) {
                    written += 1;
                }
                results.push(result);
            }
        }

        if written > 0 {
            guard.invalidate(table);
        }
        tracing::debug!(table, total = entities.len(), written, "Batch insert finished");

        Ok(batch_summary(table, entities.len(), written, partitions.len(), results))
    }
}

/// Handler for updating many entities
#[derive(Debug)]
pub struct BatchUpdateEntitiesHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for BatchUpdateEntitiesHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let entities = batch_items(&args, "entities")?;
        let default_mode: UpdateMode = match optional_str(&args, "mode") {
            Some(mode) => mode.parse().map_err(store_err)?,
            None => UpdateMode::default(),
        };

        let mut results: Vec<Value> = Vec::with_capacity(entities.len());
        let mut partitions: BTreeMap<String, Vec<(BatchItem, UpdateMode)>> = BTreeMap::new();
        for (index, value) in entities.iter().enumerate() {
            match parse_update_item(index, value, default_mode) {
                Ok((pk, item, mode)) => partitions.entry(pk).or_default().push((item, mode)),
                Err(e) => results.push(item_error(index, e)),
            }
        }

        let store = self.ctx.store.as_ref();
        let guard = &self.ctx.guard;
        let inference = guard
            .infer(store, table, guard.validation_sample_size())
            .await;

        let mut updated = 0usize;
        for (pk, items) in &partitions {
            for (item, mode) in items {
                let mut result = json!({
                    "index": item.index,
                    "partitionKey": pk,
                    "rowKey": item.row_key,
                    "mode": mode,
                });
                let outcome = match guard.check_against(table, inference.as_ref(), &item.properties) {
                    Err(violation) => Err((violation.to_string(), violation.into_report())),
                    Ok(report) => {
                        let entity = TableEntity::new(pk.as_str(), item.row_key.as_str(), item.properties.clone());
                        match store.update_entity(table, &entity, *mode).await {
                            Ok(()) => Ok(Some(report)),
                            Err(e) => Err((e.to_string(), Some(report))),
                        }
                    }
                };
                if settle(&mut result, outcome) {
                    updated += 1;
                }
                results.push(result);
            }
        }

        if updated > 0 {
            guard.invalidate(table);
        }
        tracing::debug!(table, total = entities.len(), updated, "Batch update finished");

        Ok(batch_summary(table, entities.len(), updated, partitions.len(), results))
    }
}

/// Handler for deleting many entities
#[derive(Debug)]
pub struct BatchDeleteEntitiesHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for BatchDeleteEntitiesHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        let entities = batch_items(&args, "entities")?;

        let mut results: Vec<Value> = Vec::with_capacity(entities.len());
        let mut partitions: BTreeMap<String, Vec<(usize, String)>> = BTreeMap::new();
        for (index, value) in entities.iter().enumerate() {
            match item_keys(index, value) {
                Ok((pk, rk)) => partitions.entry(pk).or_default().push((index, rk)),
                Err(e) => results.push(item_error(index, e)),
            }
        }

        let store = self.ctx.store.as_ref();
        let mut deleted = 0usize;
        for (pk, keys) in &partitions {
            for (index, rk) in keys {
                let mut result = json!({
                    "index": index,
                    "partitionKey": pk,
                    "rowKey": rk,
                });
                let outcome = store
                    .delete_entity(table, pk, rk)
                    .await
                    .map(|()| None)
                    .map_err(|e| (e.to_string(), None));
                if settle(&mut result, outcome) {
                    deleted += 1;
                }
                results.push(result);
            }
        }

        if deleted > 0 {
            self.ctx.guard.invalidate(table);
        }
        tracing::debug!(table, total = entities.len(), deleted, "Batch delete finished");

        Ok(batch_summary(table, entities.len(), deleted, partitions.len(), results))
    }
}

/// Handler for creating a table
#[derive(Debug)]
pub struct CreateTableHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for CreateTableHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        self.ctx.store.create_table(table).await.map_err(store_err)?;
        Ok(json!({
            "tableName": table,
            "created": true,
        }))
    }
}

/// Handler for deleting a table
#[derive(Debug)]
pub struct DeleteTableHandler {
    pub ctx: Arc<TableContext>,
}

#[async_trait::async_trait]
impl ToolHandler for DeleteTableHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let table = table_arg(&args)?;
        self.ctx.store.delete_table(table).await.map_err(store_err)?;
        self.ctx.guard.invalidate(table);
        Ok(json!({
            "tableName": table,
            "deleted": true,
        }))
    }
}
