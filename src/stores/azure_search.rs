//! Azure AI Search client over the REST API (query side only).

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::stores::{SearchService, StoreError};
use crate::utils::validate::validate_endpoint;
use crate::utils::{with_retry, HttpClient, RetryConfig};

/// REST api-version used when none is configured
pub const DEFAULT_API_VERSION: &str = "2023-11-01";

/// Results per page when `top` is not given
pub const DEFAULT_TOP: usize = 50;

/// Largest `top` the service accepts
pub const MAX_TOP: usize = 1000;

/// Largest number of semantic answers the service returns
pub const MAX_ANSWERS: usize = 10;

fn default_k() -> usize {
    10
}

/// A pre-computed embedding to match against vector fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub fields: Vec<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub exhaustive: bool,
}

/// Parameters of a search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchRequest {
    pub search_text: Option<String>,
    /// `any` or `all`
    pub search_mode: Option<String>,
    pub search_fields: Vec<String>,
    pub select: Vec<String>,
    pub filter: Option<String>,
    pub order_by: Vec<String>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
    pub include_total_count: bool,
    pub facets: Vec<String>,
    pub highlight_fields: Vec<String>,
    pub highlight_pre_tag: Option<String>,
    pub highlight_post_tag: Option<String>,
    pub minimum_coverage: Option<f64>,
    /// `simple`, `full` or `semantic`
    pub query_type: Option<String>,
    /// Named semantic configuration of the index; needed for `semantic` queries
    pub semantic_configuration: Option<String>,
    /// Number of extractive answers to return (semantic queries)
    pub answers: Option<usize>,
    /// Extractive captions, highlighted when `true` (semantic queries)
    pub captions: Option<bool>,
    pub vector_queries: Vec<VectorQuery>,
}

impl SearchRequest {
    /// Full-text request for `text`
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            search_text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Reject parameter combinations the service would refuse
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(top) = self.top {
            if top == 0 || top > MAX_TOP {
                return Err(StoreError::InvalidRequest(format!(
                    "top must be between 1 and {}",
                    MAX_TOP
                )));
            }
        }
        if let Some(mode) = &self.search_mode {
            if mode != "any" && mode != "all" {
                return Err(StoreError::InvalidRequest(format!(
                    "searchMode must be 'any' or 'all', got '{}'",
                    mode
                )));
            }
        }
        if let Some(query_type) = &self.query_type {
            if !matches!(query_type.as_str(), "simple" | "full" | "semantic") {
                return Err(StoreError::InvalidRequest(format!(
                    "queryType must be 'simple', 'full' or 'semantic', got '{}'",
                    query_type
                )));
            }
        }
        if self.query_type.as_deref() == Some("semantic") {
            if self
                .semantic_configuration
                .as_deref()
                .map_or(true, |name| name.trim().is_empty())
            {
                return Err(StoreError::InvalidRequest(
                    "semantic queries need a semanticConfiguration".to_string(),
                ));
            }
        } else if self.semantic_configuration.is_some()
            || self.answers.is_some()
            || self.captions.is_some()
        {
            return Err(StoreError::InvalidRequest(
                "semanticConfiguration, answers and captions require queryType 'semantic'"
                    .to_string(),
            ));
        }
        if let Some(answers) = self.answers {
            if answers == 0 || answers > MAX_ANSWERS {
                return Err(StoreError::InvalidRequest(format!(
                    "answers must be between 1 and {}",
                    MAX_ANSWERS
                )));
            }
        }
        if let Some(coverage) = self.minimum_coverage {
            if !(0.0..=100.0).contains(&coverage) {
                return Err(StoreError::InvalidRequest(
                    "minimumCoverage must be between 0 and 100".to_string(),
                ));
            }
        }
        for query in &self.vector_queries {
            if query.vector.is_empty() {
                return Err(StoreError::InvalidRequest("vector must not be empty".to_string()));
            }
            if query.fields.is_empty() {
                return Err(StoreError::InvalidRequest(
                    "vector query needs at least one field".to_string(),
                ));
            }
            if query.k == 0 {
                return Err(StoreError::InvalidRequest("k must be at least 1".to_string()));
            }
        }
        Ok(())
    }

    /// JSON body for `POST /docs/search`
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();

        match &self.search_text {
            Some(text) => {
                body.insert("search".into(), json!(text));
            }
            None if self.vector_queries.is_empty() => {
                body.insert("search".into(), json!("*"));
            }
            None => {}
        }

        let mut put_list = |key: &str, values: &[String]| {
            if !values.is_empty() {
                body.insert(key.to_string(), json!(values.join(",")));
            }
        };
        put_list("searchFields", &self.search_fields);
        put_list("select", &self.select);
        put_list("orderby", &self.order_by);
        put_list("highlight", &self.highlight_fields);

        if let Some(mode) = &self.search_mode {
            body.insert("searchMode".into(), json!(mode));
        }
        if let Some(filter) = &self.filter {
            body.insert("filter".into(), json!(filter));
        }
        body.insert("top".into(), json!(self.top.unwrap_or(DEFAULT_TOP)));
        if let Some(skip) = self.skip {
            body.insert("skip".into(), json!(skip));
        }
        if self.include_total_count {
            body.insert("count".into(), json!(true));
        }
        if !self.facets.is_empty() {
            body.insert("facets".into(), json!(self.facets));
        }
        if let Some(tag) = &self.highlight_pre_tag {
            body.insert("highlightPreTag".into(), json!(tag));
        }
        if let Some(tag) = &self.highlight_post_tag {
            body.insert("highlightPostTag".into(), json!(tag));
        }
        if let Some(coverage) = self.minimum_coverage {
            body.insert("minimumCoverage".into(), json!(coverage));
        }
        if let Some(query_type) = &self.query_type {
            body.insert("queryType".into(), json!(query_type));
        }
        if let Some(name) = &self.semantic_configuration {
            body.insert("semanticConfiguration".into(), json!(name));
        }
        if let Some(count) = self.answers {
            body.insert("answers".into(), json!(format!("extractive|count-{}", count)));
        }
        if let Some(highlight) = self.captions {
            body.insert("captions".into(), json!(format!("extractive|highlight-{}", highlight)));
        }
        if !self.vector_queries.is_empty() {
            let queries: Vec<Value> = self
                .vector_queries
                .iter()
                .map(|q| {
                    json!({
                        "kind": "vector",
                        "vector": q.vector,
                        "fields": q.fields.join(","),
                        "k": q.k,
                        "exhaustive": q.exhaustive,
                    })
                })
                .collect();
            body.insert("vectorQueries".into(), Value::Array(queries));
        }

        Value::Object(body)
    }
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<Value>,
    /// Semantic answers, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<Value>,
    pub documents: Vec<Value>,
}

impl SearchResults {
    fn from_body(body: Value) -> Result<Self, StoreError> {
        let Value::Object(mut body) = body else {
            return Err(StoreError::Parse("search response is not an object".to_string()));
        };
        let documents = match body.remove("value") {
            Some(Value::Array(docs)) => docs,
            _ => return Err(StoreError::Parse("search response has no 'value' array".to_string())),
        };
        Ok(Self {
            count: body.get("@odata.count").and_then(Value::as_u64),
            coverage: body.get("@search.coverage").and_then(Value::as_f64),
            facets: body.remove("@search.facets"),
            answers: body.remove("@search.answers"),
            documents,
        })
    }
}

/// Azure AI Search client authenticated with an API key
#[derive(Debug, Clone)]
pub struct AzureSearchClient {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
    api_version: String,
    retry: RetryConfig,
}

impl AzureSearchClient {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        http: HttpClient,
        retry: RetryConfig,
    ) -> Result<Self, StoreError> {
        let url = validate_endpoint(endpoint).map_err(|e| StoreError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: url.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            api_version: DEFAULT_API_VERSION.to_string(),
            retry,
        })
    }

    /// Override the REST api-version
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut query = vec![format!("api-version={}", urlencoding::encode(&self.api_version))];
        for (key, value) in params {
            query.push(format!("{}={}", key, urlencoding::encode(value)));
        }
        format!("{}{}?{}", self.endpoint, path, query.join("&"))
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response, StoreError> {
        let mut request = self
            .http
            .client()
            .request(method, url)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }
        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    async fn execute(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value, StoreError> {
        tracing::debug!(%method, url, "Search request");
        let response = with_retry(self.retry, || self.send(method.clone(), url, body)).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl SearchService for AzureSearchClient {
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchResults, StoreError> {
        request.validate()?;
        let url = self.url(&format!("/indexes/{}/docs/search", index), &[]);
        let body = request.to_body();
        let response = self.execute(Method::POST, &url, Some(&body)).await?;
        let results = SearchResults::from_body(response)?;
        tracing::debug!(index, hits = results.documents.len(), "Search completed");
        Ok(results)
    }

    async fn get_document(
        &self,
        index: &str,
        key: &str,
        select: Option<&[String]>,
    ) -> Result<Value, StoreError> {
        let params: Vec<(&str, String)> = select
            .filter(|s| !s.is_empty())
            .map(|s| vec![("$select", s.join(","))])
            .unwrap_or_default();
        let url = self.url(
            &format!("/indexes/{}/docs/{}", index, urlencoding::encode(key)),
            &params,
        );
        self.execute(Method::GET, &url, None).await
    }

    async fn get_index(&self, index: &str) -> Result<Value, StoreError> {
        let url = self.url(&format!("/indexes/{}", index), &[]);
        let mut definition = self.execute(Method::GET, &url, None).await?;
        if let Some(object) = definition.as_object_mut() {
            object.retain(|key, _| !key.starts_with("@odata."));
        }
        Ok(definition)
    }

    async fn get_index_statistics(&self, index: &str) -> Result<Value, StoreError> {
        let url = self.url(&format!("/indexes/{}/stats", index), &[]);
        let mut stats = self.execute(Method::GET, &url, None).await?;
        if let Some(object) = stats.as_object_mut() {
            object.retain(|key, _| !key.starts_with("@odata."));
        }
        Ok(stats)
    }

    async fn list_indexes(&self) -> Result<Vec<String>, StoreError> {
        let url = self.url("/indexes", &[("$select", "name".to_string())]);
        let body = self.execute(Method::GET, &url, None).await?;
        let names = body
            .get("value")
            .and_then(Value::as_array)
            .ok_or_else(|| StoreError::Parse("index list has no 'value' array".to_string()))?
            .iter()
            .filter_map(|i| i.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(names)
    }
}

async fn error_from_response(response: Response) -> StoreError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text
            }
        });

    match status.as_u16() {
        404 => StoreError::NotFound(message),
        409 => StoreError::AlreadyExists(message),
        429 => StoreError::RateLimit(retry_after),
        code => StoreError::Api {
            status: code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> AzureSearchClient {
        AzureSearchClient::new(
            &server.url(),
            Some("secret".to_string()),
            HttpClient::new().unwrap(),
            RetryConfig::no_retry(),
        )
        .unwrap()
    }

    #[test]
    fn test_body_defaults() {
        let body = SearchRequest::default().to_body();
        assert_eq!(body["search"], "*");
        assert_eq!(body["top"], DEFAULT_TOP);
        assert!(body.get("count").is_none());
    }

    #[test]
    fn test_body_lists_and_vectors() {
        let request = SearchRequest {
            search_text: Some("hotel".into()),
            select: vec!["id".into(), "name".into()],
            order_by: vec!["rating desc".into()],
            include_total_count: true,
            vector_queries: vec![VectorQuery {
                vector: vec![0.5, 0.25],
                fields: vec!["contentVector".into()],
                k: 3,
                exhaustive: false,
            }],
            ..Default::default()
        };
        let body = request.to_body();
        assert_eq!(body["select"], "id,name");
        assert_eq!(body["orderby"], "rating desc");
        assert_eq!(body["count"], true);
        assert_eq!(body["vectorQueries"][0]["kind"], "vector");
        assert_eq!(body["vectorQueries"][0]["fields"], "contentVector");
        assert_eq!(body["vectorQueries"][0]["k"], 3);
    }

    #[test]
    fn test_vector_only_omits_search() {
        let request = SearchRequest {
            vector_queries: vec![VectorQuery {
                vector: vec![1.0],
                fields: vec!["v".into()],
                k: 1,
                exhaustive: true,
            }],
            ..Default::default()
        };
        assert!(request.to_body().get("search").is_none());
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let mut request = SearchRequest::text("x");
        request.top = Some(0);
        assert!(request.validate().is_err());
        request.top = Some(MAX_TOP + 1);
        assert!(request.validate().is_err());
        request.top = Some(MAX_TOP);
        assert!(request.validate().is_ok());

        request.search_mode = Some("some".into());
        assert!(request.validate().is_err());
        request.search_mode = Some("all".into());

        request.vector_queries = vec![VectorQuery {
            vector: vec![],
            fields: vec!["v".into()],
            k: 1,
            exhaustive: false,
        }];
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_semantic_needs_configuration() {
        let mut request = SearchRequest::text("quiet rooms");
        request.query_type = Some("semantic".into());
        assert!(request.validate().is_err());

        request.semantic_configuration = Some("default".into());
        request.answers = Some(3);
        request.captions = Some(true);
        assert!(request.validate().is_ok());
        let body = request.to_body();
        assert_eq!(body["queryType"], "semantic");
        assert_eq!(body["semanticConfiguration"], "default");
        assert_eq!(body["answers"], "extractive|count-3");
        assert_eq!(body["captions"], "extractive|highlight-true");

        request.answers = Some(MAX_ANSWERS + 1);
        assert!(request.validate().is_err());

        let mut plain = SearchRequest::text("x");
        plain.semantic_configuration = Some("default".into());
        assert!(plain.validate().is_err());
    }

    #[test]
    fn test_vector_query_deserialize_defaults() {
        let query: VectorQuery =
            serde_json::from_value(json!({"vector": [0.1], "fields": ["v"]})).unwrap();
        assert_eq!(query.k, 10);
        assert!(!query.exhaustive);
    }

    #[tokio::test]
    async fn test_search_posts_and_parses() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/indexes/hotels/docs/search")
            .match_query(Matcher::UrlEncoded("api-version".into(), DEFAULT_API_VERSION.into()))
            .match_header("api-key", "secret")
            .match_body(Matcher::PartialJson(json!({"search": "spa", "top": 5})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"@odata.count": 12, "@search.facets": {"rating": []}, "value": [{"@search.score": 1.5, "id": "1"}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let mut request = SearchRequest::text("spa");
        request.top = Some(5);
        let results = client.search("hotels", &request).await.unwrap();

        assert_eq!(results.count, Some(12));
        assert!(results.facets.is_some());
        assert_eq!(results.documents.len(), 1);
        assert_eq!(results.documents[0]["id"], "1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_error_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/indexes/hotels/docs/search")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error": {"code": "", "message": "Invalid expression: Syntax error"}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client
            .search("hotels", &SearchRequest::text("x"))
            .await
            .unwrap_err();
        match err {
            StoreError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid expression: Syntax error");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_document_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/indexes/hotels/docs/42")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.get_document("hotels", "42", None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_indexes() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/indexes")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("api-version".into(), DEFAULT_API_VERSION.into()),
                Matcher::UrlEncoded("$select".into(), "name".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"value": [{"name": "hotels"}, {"name": "docs"}]}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        assert_eq!(client.list_indexes().await.unwrap(), vec!["hotels", "docs"]);
    }

    #[tokio::test]
    async fn test_semantic_answers_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/indexes/hotels/docs/search")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "queryType": "semantic",
                "semanticConfiguration": "default"
            })))
            .with_status(200)
            .with_body(
                r#"{"@search.answers": [{"key": "1", "text": "Quiet", "score": 0.9}], "value": [{"id": "1", "@search.captions": [{"text": "Quiet rooms"}]}]}"#,
            )
            .create_async()
            .await;

        let client = client_for(&server);
        let request = SearchRequest {
            query_type: Some("semantic".into()),
            semantic_configuration: Some("default".into()),
            ..SearchRequest::text("quiet")
        };
        let results = client.search("hotels", &request).await.unwrap();
        assert_eq!(results.answers.unwrap()[0]["key"], "1");
        assert_eq!(results.documents[0]["@search.captions"][0]["text"], "Quiet rooms");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_index_and_statistics() {
        let mut server = mockito::Server::new_async().await;
        let _index = server
            .mock("GET", "/indexes/hotels")
            .match_query(Matcher::UrlEncoded("api-version".into(), DEFAULT_API_VERSION.into()))
            .with_status(200)
            .with_body(
                r#"{"@odata.context": "x", "@odata.etag": "\"0x1\"", "name": "hotels", "fields": [{"name": "id", "key": true}]}"#,
            )
            .create_async()
            .await;
        let _stats = server
            .mock("GET", "/indexes/hotels/stats")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"@odata.context": "x", "documentCount": 12, "storageSize": 2048}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let index = client.get_index("hotels").await.unwrap();
        assert_eq!(index, json!({"name": "hotels", "fields": [{"name": "id", "key": true}]}));

        let stats = client.get_index_statistics("hotels").await.unwrap();
        assert_eq!(stats, json!({"documentCount": 12, "storageSize": 2048}));
    }

    #[tokio::test]
    async fn test_get_index_missing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/indexes/nope")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"error": {"message": "No index with the name 'nope' was found"}}"#)
            .create_async()
            .await;

        let client = client_for(&server);
        let err = client.get_index("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref m) if m.contains("nope")));
    }
}
