//! Search tool handlers. Every returned document passes through the
//! vector-field redactor.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::redact::{redact, redact_batch};
use crate::stores::{SearchRequest, SearchResults, SearchService, VectorQuery};
use crate::utils::validate::{validate_document_key, validate_index_name};

use super::tools::{optional_str, optional_usize, required_str, string_list, ToolHandler};

fn index_arg<'a>(args: &'a Value) -> Result<&'a str, String> {
    validate_index_name(required_str(args, "index_name")?).map_err(|e| e.to_string())
}

/// Build a request from the parameters shared by both search tools
fn request_from_args(args: &Value) -> Result<SearchRequest, String> {
    let request = SearchRequest {
        search_text: optional_str(args, "search_text").map(str::to_string),
        search_mode: optional_str(args, "search_mode").map(str::to_string),
        search_fields: string_list(args, "search_fields")?,
        select: string_list(args, "select")?,
        filter: optional_str(args, "filter").map(str::to_string),
        order_by: string_list(args, "order_by")?,
        top: optional_usize(args, "top")?,
        skip: optional_usize(args, "skip")?,
        include_total_count: args
            .get("include_total_count")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        facets: string_list(args, "facets")?,
        highlight_fields: string_list(args, "highlight_fields")?,
        highlight_pre_tag: optional_str(args, "highlight_pre_tag").map(str::to_string),
        highlight_post_tag: optional_str(args, "highlight_post_tag").map(str::to_string),
        minimum_coverage: args.get("minimum_coverage").and_then(Value::as_f64),
        query_type: optional_str(args, "query_type").map(str::to_string),
        semantic_configuration: optional_str(args, "semantic_configuration").map(str::to_string),
        answers: optional_usize(args, "answers")?,
        captions: args.get("captions").and_then(Value::as_bool),
        vector_queries: Vec::new(),
    };
    Ok(request)
}

fn results_json(index: &str, results: SearchResults) -> Value {
    let documents = redact_batch(&results.documents);
    let mut out = Map::new();
    out.insert("indexName".into(), json!(index));
    if let Some(count) = results.count {
        out.insert("count".into(), json!(count));
    }
    if let Some(coverage) = results.coverage {
        out.insert("coverage".into(), json!(coverage));
    }
    if let Some(facets) = results.facets {
        out.insert("facets".into(), facets);
    }
    if let Some(answers) = results.answers {
        out.insert("answers".into(), answers);
    }
    out.insert("returned".into(), json!(documents.len()));
    out.insert("results".into(), Value::Array(documents));
    Value::Object(out)
}

async fn run_search(
    service: &dyn SearchService,
    index: &str,
    request: &SearchRequest,
) -> Result<Value, String> {
    request.validate().map_err(|e| e.to_string())?;
    let results = service
        .search(index, request)
        .await
        .map_err(|e| e.to_string())?;
    tracing::debug!(index, returned = results.documents.len(), "Search completed");
    Ok(results_json(index, results))
}

/// Handler for full-text search
#[derive(Debug)]
pub struct SearchDocumentsHandler {
    pub service: Arc<dyn SearchService>,
}

#[async_trait::async_trait]
impl ToolHandler for SearchDocumentsHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let index = index_arg(&args)?;
        let request = request_from_args(&args)?;
        run_search(self.service.as_ref(), index, &request).await
    }
}

/// Handler for vector and hybrid search
#[derive(Debug)]
pub struct VectorSearchHandler {
    pub service: Arc<dyn SearchService>,
}

#[async_trait::async_trait]
impl ToolHandler for VectorSearchHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let index = index_arg(&args)?;
        let queries = args
            .get("vector_queries")
            .cloned()
            .ok_or("Missing 'vector_queries' parameter")?;
        let vector_queries: Vec<VectorQuery> = serde_json::from_value(queries)
            .map_err(|e| format!("Invalid 'vector_queries': {}", e))?;
        if vector_queries.is_empty() {
            return Err("'vector_queries' must contain at least one query".to_string());
        }

        let mut request = request_from_args(&args)?;
        request.vector_queries = vector_queries;
        run_search(self.service.as_ref(), index, &request).await
    }
}

/// Handler for semantic search
#[derive(Debug)]
pub struct SemanticSearchHandler {
    pub service: Arc<dyn SearchService>,
}

#[async_trait::async_trait]
impl ToolHandler for SemanticSearchHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let index = index_arg(&args)?;
        required_str(&args, "search_text")?;
        required_str(&args, "semantic_configuration")?;

        let mut request = request_from_args(&args)?;
        request.query_type = Some("semantic".to_string());
        run_search(self.service.as_ref(), index, &request).await
    }
}

/// Handler for fetching a document by key
#[derive(Debug)]
pub struct GetDocumentHandler {
    pub service: Arc<dyn SearchService>,
}

#[async_trait::async_trait]
impl ToolHandler for GetDocumentHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let index = index_arg(&args)?;
        let key = validate_document_key(required_str(&args, "key")?).map_err(|e| e.to_string())?;
        let select = string_list(&args, "select")?;
        let select = (!select.is_empty()).then_some(select.as_slice());

        let document = self
            .service
            .get_document(index, key, select)
            .await
            .map_err(|e| e.to_string())?;

        Ok(json!({
            "indexName": index,
            "key": key,
            "document": redact(&document),
        }))
    }
}

/// Handler for reading an index definition
#[derive(Debug)]
pub struct GetIndexSchemaHandler {
    pub service: Arc<dyn SearchService>,
}

#[async_trait::async_trait]
impl ToolHandler for GetIndexSchemaHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let index = index_arg(&args)?;
        let definition = self
            .service
            .get_index(index)
            .await
            .map_err(|e| e.to_string())?;
        let fields = definition
            .get("fields")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);

        Ok(json!({
            "indexName": index,
            "fieldCount": fields,
            "schema": definition,
        }))
    }
}

/// Handler for index statistics
#[derive(Debug)]
pub struct GetIndexStatisticsHandler {
    pub service: Arc<dyn SearchService>,
}

#[async_trait::async_trait]
impl ToolHandler for GetIndexStatisticsHandler {
    async fn execute(&self, args: Value) -> Result<Value, String> {
        let index = index_arg(&args)?;
        let statistics = self
            .service
            .get_index_statistics(index)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({
            "indexName": index,
            "statistics": statistics,
        }))
    }
}

/// Handler for listing indexes
#[derive(Debug)]
pub struct ListIndexesHandler {
    pub service: Arc<dyn SearchService>,
}

#[async_trait::async_trait]
impl ToolHandler for ListIndexesHandler {
    async fn execute(&self, _args: Value) -> Result<Value, String> {
        let indexes = self.service.list_indexes().await.map_err(|e| e.to_string())?;
        Ok(json!({
            "count": indexes.len(),
            "indexes": indexes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::StoreError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns canned documents and remembers the last request
    #[derive(Debug, Default)]
    struct FakeSearch {
        last: Mutex<Option<SearchRequest>>,
    }

    fn embedding() -> Value {
        Value::Array((0..64).map(|i| json!(i as f64 / 64.0)).collect())
    }

    #[async_trait]
    impl SearchService for FakeSearch {
        async fn search(
            &self,
            _index: &str,
            request: &SearchRequest,
        ) -> Result<SearchResults, StoreError> {
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(SearchResults {
                count: request.include_total_count.then_some(1),
                answers: request
                    .answers
                    .map(|_| json!([{"key": "1", "text": "Beachfront", "score": 0.8}])),
                documents: vec![json!({"id": "1", "title": "Hotel", "text_vector": embedding()})],
                ..Default::default()
            })
        }

        async fn get_document(
            &self,
            _index: &str,
            key: &str,
            _select: Option<&[String]>,
        ) -> Result<Value, StoreError> {
            if key == "missing" {
                return Err(StoreError::NotFound(format!("document '{}'", key)));
            }
            Ok(json!({"id": key, "meta": {"contentEmbedding": embedding(), "lang": "en"}}))
        }

        async fn get_index(&self, index: &str) -> Result<Value, StoreError> {
            Ok(json!({
                "name": index,
                "fields": [
                    {"name": "id", "type": "Edm.String", "key": true},
                    {"name": "text_vector", "type": "Collection(Edm.Single)", "dimensions": 64}
                ]
            }))
        }

        async fn get_index_statistics(&self, _index: &str) -> Result<Value, StoreError> {
            Ok(json!({"documentCount": 3, "storageSize": 4096, "vectorIndexSize": 1024}))
        }

        async fn list_indexes(&self) -> Result<Vec<String>, StoreError> {
            Ok(vec!["hotels".to_string()])
        }
    }

    #[tokio::test]
    async fn test_search_redacts_results() {
        let service = Arc::new(FakeSearch::default());
        let handler = SearchDocumentsHandler {
            service: service.clone(),
        };
        let result = handler
            .execute(json!({
                "index_name": "hotels",
                "search_text": "beach",
                "select": "id, title",
                "include_total_count": true
            }))
            .await
            .unwrap();

        assert_eq!(result["returned"], 1);
        assert_eq!(result["count"], 1);
        assert_eq!(result["results"][0], json!({"id": "1", "title": "Hotel"}));

        let sent = service.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.select, vec!["id", "title"]);
        assert_eq!(sent.search_text.as_deref(), Some("beach"));
    }

    #[tokio::test]
    async fn test_search_rejects_bad_parameters() {
        let handler = SearchDocumentsHandler {
            service: Arc::new(FakeSearch::default()),
        };
        assert!(handler
            .execute(json!({"index_name": "hotels", "top": 5000}))
            .await
            .is_err());
        assert!(handler
            .execute(json!({"index_name": "Hotels!", "search_text": "x"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_vector_search_requires_queries() {
        let service = Arc::new(FakeSearch::default());
        let handler = VectorSearchHandler {
            service: service.clone(),
        };
        assert!(handler
            .execute(json!({"index_name": "hotels", "vector_queries": []}))
            .await
            .is_err());

        handler
            .execute(json!({
                "index_name": "hotels",
                "vector_queries": [{"vector": [0.1, 0.2], "fields": ["text_vector"]}]
            }))
            .await
            .unwrap();
        let sent = service.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.vector_queries[0].k, 10);
        assert!(sent.search_text.is_none());
    }

    #[tokio::test]
    async fn test_semantic_search_sets_query_type() {
        let service = Arc::new(FakeSearch::default());
        let handler = SemanticSearchHandler {
            service: service.clone(),
        };
        let result = handler
            .execute(json!({
                "index_name": "hotels",
                "search_text": "near the beach",
                "semantic_configuration": "default",
                "answers": 2,
                "captions": true
            }))
            .await
            .unwrap();

        assert_eq!(result["answers"][0]["text"], "Beachfront");
        assert_eq!(result["results"][0], json!({"id": "1", "title": "Hotel"}));
        let sent = service.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.query_type.as_deref(), Some("semantic"));
        assert_eq!(sent.semantic_configuration.as_deref(), Some("default"));
        assert_eq!(sent.answers, Some(2));

        assert!(handler
            .execute(json!({"index_name": "hotels", "search_text": "x"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_semantic_query_type_needs_configuration() {
        let handler = SearchDocumentsHandler {
            service: Arc::new(FakeSearch::default()),
        };
        let err = handler
            .execute(json!({"index_name": "hotels", "search_text": "x", "query_type": "semantic"}))
            .await
            .unwrap_err();
        assert!(err.contains("semanticConfiguration"));

        handler
            .execute(json!({
                "index_name": "hotels",
                "search_text": "x",
                "query_type": "semantic",
                "semantic_configuration": "default"
            }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_index_schema_and_statistics() {
        let service: Arc<dyn SearchService> = Arc::new(FakeSearch::default());
        let schema = GetIndexSchemaHandler {
            service: service.clone(),
        }
        .execute(json!({"index_name": "hotels"}))
        .await
        .unwrap();
        assert_eq!(schema["fieldCount"], 2);
        assert_eq!(schema["schema"]["fields"][1]["dimensions"], 64);

        let stats = GetIndexStatisticsHandler { service }
            .execute(json!({"index_name": "hotels"}))
            .await
            .unwrap();
        assert_eq!(stats["statistics"]["documentCount"], 3);
    }

    #[tokio::test]
    async fn test_get_document_redacts_nested() {
        let handler = GetDocumentHandler {
            service: Arc::new(FakeSearch::default()),
        };
        let result = handler
            .execute(json!({"index_name": "hotels", "key": "42"}))
            .await
            .unwrap();
        assert_eq!(result["document"], json!({"id": "42", "meta": {"lang": "en"}}));

        let err = handler
            .execute(json!({"index_name": "hotels", "key": "missing"}))
            .await
            .unwrap_err();
        assert!(err.contains("missing"));
    }

    #[tokio::test]
    async fn test_list_indexes() {
        let handler = ListIndexesHandler {
            service: Arc::new(FakeSearch::default()),
        };
        let result = handler.execute(json!({})).await.unwrap();
        assert_eq!(result, json!({"count": 1, "indexes": ["hotels"]}));
    }
}
