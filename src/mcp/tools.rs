//! Tool registry for MCP tools.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::models::ToolResponse;
use crate::services::Services;

use super::search_tools::{
    GetDocumentHandler, GetIndexSchemaHandler, GetIndexStatisticsHandler, ListIndexesHandler,
    SearchDocumentsHandler, SemanticSearchHandler, VectorSearchHandler,
};
use super::table_tools::{
    BatchCreateEntitiesHandler, BatchDeleteEntitiesHandler, BatchUpdateEntitiesHandler,
    CreateEntityHandler, CreateTableHandler, DeleteEntityHandler, DeleteTableHandler,
    GetEntityHandler, InferSchemaHandler, ListTablesHandler, ReadTableHandler, TableContext,
    UpdateEntityHandler, ValidateEntityHandler,
};

/// An MCP tool that can be called by the client
#[derive(Clone)]
pub struct Tool {
    /// Tool name (e.g., "infer_table_schema")
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,

    /// Handler function to execute the tool
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// Handler for executing a tool
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + std::fmt::Debug {
    /// Execute the tool with the given arguments
    async fn execute(&self, args: Value) -> Result<Value, String>;
}

/// Run a handler and wrap the outcome in the `{success, data|error}` envelope
pub async fn call_enveloped(handler: &dyn ToolHandler, name: &str, args: Value) -> Value {
    let result = handler.execute(args).await;
    if let Err(e) = &result {
        tracing::debug!(tool = name, error = %e, "Tool call failed");
    }
    ToolResponse::from_result(result).into_value()
}

/// Registry for all MCP tools
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Tool>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tools for every configured backend
    pub fn from_services(services: &Services) -> Self {
        let mut registry = Self::new();

        if let Ok(store) = services.table_store() {
            let ctx = Arc::new(TableContext {
                store,
                guard: services.guard(),
                inference_sample_size: services.inference_sample_size(),
            });
            registry.register_table_tools(&ctx);
        }

        if let Ok(search) = services.search() {
            registry.register_search_tools(&search);
        }

        tracing::debug!(tools = registry.len(), "Tool registry built");
        registry
    }

    fn register_table_tools(&mut self, ctx: &Arc<TableContext>) {
        let table_name = json!({
            "type": "string",
            "description": "Name of the table"
        });
        let partition_key = json!({
            "type": "string",
            "description": "PartitionKey of the entity"
        });
        let row_key = json!({
            "type": "string",
            "description": "RowKey of the entity"
        });

        self.register(Tool {
            name: "list_tables".to_string(),
            description: "List all tables in the storage account".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            handler: Arc::new(ListTablesHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "read_table".to_string(),
            description: "Query entities from a table with an optional OData filter".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "filter": {
                        "type": "string",
                        "description": "OData filter expression (e.g., \"PartitionKey eq 'customers'\")"
                    },
                    "select": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Properties to return"
                    },
                    "max_results": {
                        "type": "integer",
                        "description": "Maximum number of entities to return",
                        "default": 100
                    }
                },
                "required": ["table_name"]
            }),
            handler: Arc::new(ReadTableHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "get_entity".to_string(),
            description: "Fetch a single entity by PartitionKey and RowKey".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "partition_key": partition_key,
                    "row_key": row_key
                },
                "required": ["table_name", "partition_key", "row_key"]
            }),
            handler: Arc::new(GetEntityHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "infer_table_schema".to_string(),
            description: "Infer a table's schema by sampling existing entities: field frequency, \
                          presence, observed types and which fields look required"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "sample_size": {
                        "type": "integer",
                        "description": "Number of entities to sample",
                        "default": ctx.inference_sample_size,
                        "minimum": 1
                    }
                },
                "required": ["table_name"]
            }),
            handler: Arc::new(InferSchemaHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "validate_entity".to_string(),
            description: "Check an entity against the table's inferred schema without writing it"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "entity": {
                        "type": "object",
                        "description": "Entity properties to validate"
                    }
                },
                "required": ["table_name", "entity"]
            }),
            handler: Arc::new(ValidateEntityHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "create_entity".to_string(),
            description: "Insert a new entity. The entity is checked against the inferred schema \
                          and the validation report is returned with the result"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "partition_key": partition_key,
                    "row_key": row_key,
                    "entity": {
                        "type": "object",
                        "description": "Entity properties (scalars only)"
                    }
                },
                "required": ["table_name", "partition_key", "row_key", "entity"]
            }),
            handler: Arc::new(CreateEntityHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "update_entity".to_string(),
            description: "Update an existing entity by merging or replacing its properties"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "partition_key": partition_key,
                    "row_key": row_key,
                    "entity": {
                        "type": "object",
                        "description": "Properties to write"
                    },
                    "mode": {
                        "type": "string",
                        "enum": ["merge", "replace"],
                        "default": "merge"
                    }
                },
                "required": ["table_name", "partition_key", "row_key", "entity"]
            }),
            handler: Arc::new(UpdateEntityHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "delete_entity".to_string(),
            description: "Delete an entity by PartitionKey and RowKey".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "partition_key": partition_key,
                    "row_key": row_key
                },
                "required": ["table_name", "partition_key", "row_key"]
            }),
            handler: Arc::new(DeleteEntityHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "batch_create_entities".to_string(),
            description: "Insert several entities, grouped by partition, reporting per-entity \
                          outcome and schema validation"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "entities": {
                        "type": "array",
                        "description": "Entities, each with partitionKey and rowKey",
                        "items": {"type": "object"}
                    }
                },
                "required": ["table_name", "entities"]
            }),
            handler: Arc::new(BatchCreateEntitiesHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "batch_update_entities".to_string(),
            description: "Update several entities, grouped by partition, reporting per-entity \
                          outcome and schema validation"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "entities": {
                        "type": "array",
                        "description": "Items with partitionKey, rowKey, entity and optional mode",
                        "items": {
                            "type": "object",
                            "properties": {
                                "partitionKey": {"type": "string"},
                                "rowKey": {"type": "string"},
                                "entity": {"type": "object"},
                                "mode": {"type": "string", "enum": ["merge", "replace"]}
                            },
                            "required": ["partitionKey", "rowKey", "entity"]
                        }
                    },
                    "mode": {
                        "type": "string",
                        "enum": ["merge", "replace"],
                        "default": "merge",
                        "description": "Mode for items that do not set their own"
                    }
                },
                "required": ["table_name", "entities"]
            }),
            handler: Arc::new(BatchUpdateEntitiesHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "batch_delete_entities".to_string(),
            description: "Delete several entities by key, reporting per-entity outcome"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "table_name": table_name,
                    "entities": {
                        "type": "array",
                        "description": "Keys of the entities to delete",
                        "items": {
                            "type": "object",
                            "properties": {
                                "partitionKey": {"type": "string"},
                                "rowKey": {"type": "string"}
                            },
                            "required": ["partitionKey", "rowKey"]
                        }
                    }
                },
                "required": ["table_name", "entities"]
            }),
            handler: Arc::new(BatchDeleteEntitiesHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "create_table".to_string(),
            description: "Create a new table".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"table_name": table_name},
                "required": ["table_name"]
            }),
            handler: Arc::new(CreateTableHandler { ctx: ctx.clone() }),
        });

        self.register(Tool {
            name: "delete_table".to_string(),
            description: "Delete a table and all of its entities".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"table_name": table_name},
                "required": ["table_name"]
            }),
            handler: Arc::new(DeleteTableHandler { ctx: ctx.clone() }),
        });
    }

    fn register_search_tools(&mut self, search: &Arc<dyn crate::stores::SearchService>) {
        let index_name = json!({
            "type": "string",
            "description": "Name of the search index"
        });
        let list_schema = |description: &str| {
            json!({
                "type": "array",
                "items": {"type": "string"},
                "description": description
            })
        };

        self.register(Tool {
            name: "search_documents".to_string(),
            description: "Full-text search over an index. Embedding vector fields are stripped \
                          from the returned documents"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "index_name": index_name,
                    "search_text": {
                        "type": "string",
                        "description": "Search text; '*' matches everything"
                    },
                    "search_mode": {"type": "string", "enum": ["any", "all"]},
                    "search_fields": list_schema("Fields to search in"),
                    "select": list_schema("Fields to return"),
                    "filter": {"type": "string", "description": "OData filter expression"},
                    "order_by": list_schema("Sort expressions (e.g., \"rating desc\")"),
                    "top": {"type": "integer", "minimum": 1, "maximum": 1000, "default": 50},
                    "skip": {"type": "integer", "minimum": 0},
                    "include_total_count": {"type": "boolean", "default": false},
                    "facets": list_schema("Facet expressions"),
                    "highlight_fields": list_schema("Fields to highlight"),
                    "highlight_pre_tag": {"type": "string"},
                    "highlight_post_tag": {"type": "string"},
                    "minimum_coverage": {"type": "number", "minimum": 0, "maximum": 100},
                    "query_type": {"type": "string", "enum": ["simple", "full", "semantic"]},
                    "semantic_configuration": {
                        "type": "string",
                        "description": "Semantic configuration name; required when query_type is 'semantic'"
                    }
                },
                "required": ["index_name", "search_text"]
            }),
            handler: Arc::new(SearchDocumentsHandler {
                service: search.clone(),
            }),
        });

        self.register(Tool {
            name: "vector_search".to_string(),
            description: "Vector (or hybrid) search with pre-computed embeddings".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "index_name": index_name,
                    "vector_queries": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "vector": {"type": "array", "items": {"type": "number"}},
                                "fields": {"type": "array", "items": {"type": "string"}},
                                "k": {"type": "integer", "default": 10},
                                "exhaustive": {"type": "boolean", "default": false}
                            },
                            "required": ["vector", "fields"]
                        }
                    },
                    "search_text": {
                        "type": "string",
                        "description": "Optional text for hybrid search"
                    },
                    "select": list_schema("Fields to return"),
                    "filter": {"type": "string"},
                    "top": {"type": "integer", "minimum": 1, "maximum": 1000, "default": 50}
                },
                "required": ["index_name", "vector_queries"]
            }),
            handler: Arc::new(VectorSearchHandler {
                service: search.clone(),
            }),
        });

        self.register(Tool {
            name: "semantic_search".to_string(),
            description: "Semantic ranking over an index, with optional extractive answers and \
                          captions. Embedding vector fields are stripped from the returned documents"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "index_name": index_name,
                    "search_text": {"type": "string", "description": "Natural-language query"},
                    "semantic_configuration": {
                        "type": "string",
                        "description": "Name of a semantic configuration defined on the index"
                    },
                    "search_fields": list_schema("Fields to search in"),
                    "select": list_schema("Fields to return"),
                    "filter": {"type": "string", "description": "OData filter expression"},
                    "order_by": list_schema("Sort expressions"),
                    "top": {"type": "integer", "minimum": 1, "maximum": 1000, "default": 50},
                    "skip": {"type": "integer", "minimum": 0},
                    "include_total_count": {"type": "boolean", "default": false},
                    "answers": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 10,
                        "description": "Number of extractive answers to return"
                    },
                    "captions": {
                        "type": "boolean",
                        "description": "Return extractive captions; true highlights them"
                    }
                },
                "required": ["index_name", "search_text", "semantic_configuration"]
            }),
            handler: Arc::new(SemanticSearchHandler {
                service: search.clone(),
            }),
        });

        self.register(Tool {
            name: "get_document".to_string(),
            description: "Fetch a document by key".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "index_name": index_name,
                    "key": {"type": "string", "description": "Document key"},
                    "select": list_schema("Fields to return")
                },
                "required": ["index_name", "key"]
            }),
            handler: Arc::new(GetDocumentHandler {
                service: search.clone(),
            }),
        });

        self.register(Tool {
            name: "get_index_schema".to_string(),
            description: "Read an index definition: fields, analyzers, semantic and vector settings"
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"index_name": index_name},
                "required": ["index_name"]
            }),
            handler: Arc::new(GetIndexSchemaHandler {
                service: search.clone(),
            }),
        });

        self.register(Tool {
            name: "get_index_statistics".to_string(),
            description: "Document count and storage usage of an index".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {"index_name": index_name},
                "required": ["index_name"]
            }),
            handler: Arc::new(GetIndexStatisticsHandler {
                service: search.clone(),
            }),
        });

        self.register(Tool {
            name: "list_indexes".to_string(),
            description: "List the indexes of the search service".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            handler: Arc::new(ListIndexesHandler {
                service: search.clone(),
            }),
        });
    }

    /// Register a tool
    pub fn register(&mut self, tool: Tool) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Get all tools, ordered by name
    pub fn all(&self) -> Vec<&Tool> {
        self.tools.values().collect()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Registered tool names, ordered
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name, returning the response envelope
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, String> {
        let tool = self
            .get(name)
            .ok_or_else(|| format!("Tool '{}' not found", name))?;

        Ok(call_enveloped(tool.handler.as_ref(), name, args).await)
    }
}

// Argument helpers shared by the handlers

pub(crate) fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("Missing '{}' parameter", name))
}

pub(crate) fn optional_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

pub(crate) fn optional_usize(args: &Value, name: &str) -> Result<Option<usize>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| format!("'{}' must be a non-negative integer", name)),
    }
}

/// Accepts either an array of strings or a comma-separated string
pub(crate) fn string_list(args: &Value, name: &str) -> Result<Vec<String>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("'{}' must contain only strings", name))
            })
            .collect(),
        Some(_) => Err(format!("'{}' must be an array of strings", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::stores::MemoryTableStore;

    #[test]
    fn test_empty_services_register_nothing() {
        let registry = ToolRegistry::from_services(&Services::new(&SchemaConfig::default()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_table_tools_registered_with_store() {
        let services = Services::new(&SchemaConfig::default())
            .with_table_store(Arc::new(MemoryTableStore::new()));
        let registry = ToolRegistry::from_services(&services);

        assert_eq!(registry.len(), 13);
        assert!(registry.get("infer_table_schema").is_some());
        assert!(registry.get("search_documents").is_none());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        assert!(registry.execute("nope", json!({})).await.is_err());
    }

    #[test]
    fn test_string_list_forms() {
        let args = json!({"a": ["x", "y"], "b": "x, y,", "c": 3});
        assert_eq!(string_list(&args, "a").unwrap(), vec!["x", "y"]);
        assert_eq!(string_list(&args, "b").unwrap(), vec!["x", "y"]);
        assert!(string_list(&args, "c").is_err());
        assert!(string_list(&args, "missing").unwrap().is_empty());
    }

    #[test]
    fn test_optional_usize() {
        let args = json!({"n": 5, "bad": -1});
        assert_eq!(optional_usize(&args, "n").unwrap(), Some(5));
        assert_eq!(optional_usize(&args, "missing").unwrap(), None);
        assert!(optional_usize(&args, "bad").is_err());
    }
}
