//! Azure Table Storage client over the REST API.
//!
//! Requests are authorized with a SAS token appended to the query string.
//! Entities use the JSON "minimal metadata" format: values whose type cannot
//! be told from JSON alone carry a `<name>@odata.type` annotation.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response};
use serde_json::{json, Map, Value};

use crate::models::{FieldValue, Record};
use crate::stores::{
    is_system_property, QueryOptions, StoreError, TableEntity, TableStore, UpdateMode,
};
use crate::utils::validate::validate_endpoint;
use crate::utils::{with_retry, HttpClient, RetryConfig};

const API_VERSION: &str = "2019-02-02";
const ACCEPT_MINIMAL_METADATA: &str = "application/json;odata=minimalmetadata";
const DATA_SERVICE_VERSION: &str = "3.0;NetFx";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Largest page the service returns for one query request
const MAX_PAGE_SIZE: usize = 1000;

const EDM_BINARY: &str = "Edm.Binary";
const EDM_DATETIME: &str = "Edm.DateTime";
const EDM_DOUBLE: &str = "Edm.Double";
const EDM_INT64: &str = "Edm.Int64";

/// Where the table service lives and how to authorize against it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConnection {
    /// Base URL without a trailing slash
    pub endpoint: String,
    /// SAS token without the leading `?`
    pub sas_token: Option<String>,
}

impl TableConnection {
    /// Connect to an explicit endpoint (e.g. Azurite)
    pub fn from_endpoint(endpoint: &str, sas_token: Option<&str>) -> Result<Self, StoreError> {
        let url = validate_endpoint(endpoint).map_err(|e| StoreError::Configuration(e.to_string()))?;
        Ok(Self {
            endpoint: url.as_str().trim_end_matches('/').to_string(),
            sas_token: normalize_sas(sas_token),
        })
    }

    /// Connect to `https://{account}.table.core.windows.net`
    pub fn from_account(account: &str, sas_token: Option<&str>) -> Result<Self, StoreError> {
        Self::from_endpoint(
            &format!("https://{}.table.{}", account.trim(), DEFAULT_ENDPOINT_SUFFIX),
            sas_token,
        )
    }

    /// Parse a storage connection string.
    ///
    /// Understands `TableEndpoint`, `AccountName`, `EndpointSuffix`,
    /// `DefaultEndpointsProtocol` and `SharedAccessSignature`. Shared-key
    /// connection strings are rejected.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, StoreError> {
        let mut table_endpoint = None;
        let mut account_name = None;
        let mut account_key = None;
        let mut endpoint_suffix = DEFAULT_ENDPOINT_SUFFIX.to_string();
        let mut protocol = "https".to_string();
        let mut sas = None;

        for part in connection_string.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(StoreError::Configuration(format!(
                    "malformed connection string segment '{}'",
                    part
                )));
            };
            match key.trim() {
                "TableEndpoint" => table_endpoint = Some(value.trim().to_string()),
                "AccountName" => account_name = Some(value.trim().to_string()),
                "AccountKey" => account_key = Some(value.trim().to_string()),
                "EndpointSuffix" => endpoint_suffix = value.trim().to_string(),
                "DefaultEndpointsProtocol" => protocol = value.trim().to_string(),
                "SharedAccessSignature" => sas = Some(value.trim().to_string()),
                _ => {}
            }
        }

        if sas.is_none() && account_key.is_some() {
            return Err(StoreError::Configuration(
                "shared key connection strings are not supported; use a SharedAccessSignature"
                    .to_string(),
            ));
        }

        let endpoint = match (table_endpoint, account_name) {
            (Some(endpoint), _) => endpoint,
            (None, Some(account)) => format!("{}://{}.table.{}", protocol, account, endpoint_suffix),
            (None, None) => {
                return Err(StoreError::Configuration(
                    "connection string needs TableEndpoint or AccountName".to_string(),
                ))
            }
        };

        Self::from_endpoint(&endpoint, sas.as_deref())
    }
}

fn normalize_sas(sas: Option<&str>) -> Option<String> {
    sas.map(|s| s.trim().trim_start_matches('?').to_string())
        .filter(|s| !s.is_empty())
}

/// Azure Table Storage client
#[derive(Debug, Clone)]
pub struct AzureTableStore {
    http: HttpClient,
    connection: TableConnection,
    retry: RetryConfig,
}

impl AzureTableStore {
    pub fn new(connection: TableConnection, http: HttpClient, retry: RetryConfig) -> Self {
        Self {
            http,
            connection,
            retry,
        }
    }

    /// Base endpoint this client talks to
    pub fn endpoint(&self) -> &str {
        &self.connection.endpoint
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut query: Vec<String> = Vec::new();
        if let Some(sas) = &self.connection.sas_token {
            query.push(sas.clone());
        }
        for (key, value) in params {
            query.push(format!("{}={}", key, urlencoding::encode(value)));
        }

        if query.is_empty() {
            format!("{}{}", self.connection.endpoint, path)
        } else {
            format!("{}{}?{}", self.connection.endpoint, path, query.join("&"))
        }
    }

    fn entity_path(table: &str, partition_key: &str, row_key: &str) -> String {
        format!(
            "/{}(PartitionKey='{}',RowKey='{}')",
            table,
            quote_key(partition_key),
            quote_key(row_key)
        )
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        if_match: bool,
    ) -> Result<Response, StoreError> {
        let mut request = self
            .http
            .client()
            .request(method, url)
            .header("x-ms-version", API_VERSION)
            .header(
                "x-ms-date",
                Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            )
            .header("Accept", ACCEPT_MINIMAL_METADATA)
            .header("DataServiceVersion", DATA_SERVICE_VERSION)
            .header("MaxDataServiceVersion", DATA_SERVICE_VERSION);

        if let Some(body) = body {
            request = request
                .header(CONTENT_TYPE, "application/json")
                .header("Prefer", "return-no-content")
                .body(serde_json::to_vec(body)?);
        }
        if if_match {
            request = request.header("If-Match", "*");
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        if_match: bool,
    ) -> Result<Response, StoreError> {
        tracing::debug!(%method, url = %redact_sas(url), "Table request");
        // POST creates; resending one that committed would come back as 409
        let retry = if method == Method::POST {
            RetryConfig::no_retry()
        } else {
            self.retry
        };
        with_retry(retry, || self.send(method.clone(), url, body, if_match)).await
    }
}

#[async_trait]
impl TableStore for AzureTableStore {
    fn id(&self) -> &str {
        "azure-table"
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        let mut tables = Vec::new();
        let mut next_table: Option<String> = None;

        loop {
            let params: Vec<(&str, String)> = next_table
                .take()
                .map(|t| vec![("NextTableName", t)])
                .unwrap_or_default();
            let url = self.url("/Tables", &params);
            let response = self.execute(Method::GET, &url, None, false).await?;
            next_table = header_value(&response, "x-ms-continuation-NextTableName");

            let body = read_json(response).await?;
            for item in value_array(&body)? {
                if let Some(name) = item.get("TableName").and_then(Value::as_str) {
                    tables.push(name.to_string());
                }
            }

            if next_table.is_none() {
                break;
            }
        }

        Ok(tables)
    }

    async fn create_table(&self, table: &str) -> Result<(), StoreError> {
        let url = self.url("/Tables", &[]);
        let body = json!({ "TableName": table });
        self.execute(Method::POST, &url, Some(&body), false).await?;
        tracing::info!(table, "Created table");
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<(), StoreError> {
        let url = self.url(&format!("/Tables('{}')", quote_key(table)), &[]);
        self.execute(Method::DELETE, &url, None, false).await?;
        tracing::info!(table, "Deleted table");
        Ok(())
    }

    async fn query(
        &self,
        table: &str,
        options: &QueryOptions,
    ) -> Result<Vec<TableEntity>, StoreError> {
        if options.top == Some(0) {
            return Ok(Vec::new());
        }

        let mut entities = Vec::new();
        let mut continuation: Option<(String, Option<String>)> = None;

        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(top) = options.top {
                let remaining = top.saturating_sub(entities.len());
                params.push(("$top", remaining.min(MAX_PAGE_SIZE).to_string()));
            }
            if let Some(filter) = &options.filter {
                params.push(("$filter", filter.clone()));
            }
            if let Some(select) = &options.select {
                params.push(("$select", select.join(",")));
            }
            if let Some((next_pk, next_rk)) = continuation.take() {
                params.push(("NextPartitionKey", next_pk));
                if let Some(next_rk) = next_rk {
                    params.push(("NextRowKey", next_rk));
                }
            }

            let url = self.url(&format!("/{}()", table), &params);
            let response = self.execute(Method::GET, &url, None, false).await?;
            let next_pk = header_value(&response, "x-ms-continuation-NextPartitionKey");
            let next_rk = header_value(&response, "x-ms-continuation-NextRowKey");

            let body = read_json(response).await?;
            for item in value_array(&body)? {
                entities.push(decode_entity(item)?);
            }

            if let Some(top) = options.top {
                if entities.len() >= top {
                    entities.truncate(top);
                    break;
                }
            }

            match next_pk {
                Some(pk) => continuation = Some((pk, next_rk)),
                None => break,
            }
        }

        tracing::debug!(table, count = entities.len(), "Queried entities");
        Ok(entities)
    }

    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<TableEntity, StoreError> {
        let url = self.url(&Self::entity_path(table, partition_key, row_key), &[]);
        let response = self.execute(Method::GET, &url, None, false).await?;
        let body = read_json(response).await?;
        decode_entity(&body)
    }

    async fn insert_entity(&self, table: &str, entity: &TableEntity) -> Result<(), StoreError> {
        let body = encode_entity(entity)?;
        let url = self.url(&format!("/{}", table), &[]);
        self.execute(Method::POST, &url, Some(&body), false).await?;
        Ok(())
    }

    async fn update_entity(
        &self,
        table: &str,
        entity: &TableEntity,
        mode: UpdateMode,
    ) -> Result<(), StoreError> {
        let body = encode_entity(entity)?;
        let url = self.url(
            &Self::entity_path(table, &entity.partition_key, &entity.row_key),
            &[],
        );
        let method = match mode {
            UpdateMode::Replace => Method::PUT,
            UpdateMode::Merge => Method::from_bytes(b"MERGE")
                .map_err(|e| StoreError::Other(format!("MERGE method: {}", e)))?,
        };
        self.execute(method, &url, Some(&body), true).await?;
        Ok(())
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<(), StoreError> {
        let url = self.url(&Self::entity_path(table, partition_key, row_key), &[]);
        self.execute(Method::DELETE, &url, None, true).await?;
        Ok(())
    }
}

/// Quote a key for use inside `'...'` in a resource path
fn quote_key(key: &str) -> String {
    urlencoding::encode(&key.replace('\'', "''")).into_owned()
}

fn redact_sas(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}

fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn read_json(response: Response) -> Result<Value, StoreError> {
    let text = response.text().await?;
    Ok(serde_json::from_str(&text)?)
}

fn value_array(body: &Value) -> Result<&Vec<Value>, StoreError> {
    body.get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| StoreError::Parse("response has no 'value' array".to_string()))
}

async fn error_from_response(response: Response) -> StoreError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();

    let message = odata_error_message(&text).unwrap_or_else(|| {
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

fn odata_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("odata.error")?;
    let message = error
        .get("message")
        .and_then(|m| m.get("value").or(Some(m)))
        .and_then(Value::as_str)?;
    match error.get("code").and_then(Value::as_str) {
        Some(code) => Some(format!("{}: {}", code, message.lines().next().unwrap_or(message))),
        None => Some(message.to_string()),
    }
}

/// Decode one entity from minimal-metadata JSON
fn decode_entity(value: &Value) -> Result<TableEntity, StoreError> {
    let object = value
        .as_object()
        .ok_or_else(|| StoreError::Parse("entity is not a JSON object".to_string()))?;

    let key = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::Parse(format!("entity is missing {}", name)))
    };
    let partition_key = key("PartitionKey")?;
    let row_key = key("RowKey")?;

    let timestamp = object
        .get("Timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    let etag = object
        .get("odata.etag")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut properties = Record::new();
    for (name, raw) in object {
        if is_system_property(name) {
            continue;
        }
        let edm_type = object
            .get(&format!("{}@odata.type", name))
            .and_then(Value::as_str);
        properties.insert(name.clone(), decode_property(raw, edm_type));
    }

    Ok(TableEntity {
        partition_key,
        row_key,
        timestamp,
        etag,
        properties,
    })
}

fn decode_property(raw: &Value, edm_type: Option<&str>) -> FieldValue {
    let text = match raw {
        Value::String(s) => s,
        Value::Number(n) if edm_type == Some(EDM_DOUBLE) => {
            return FieldValue::Number(n.as_f64().unwrap_or_default())
        }
        other => return FieldValue::from_json(other),
    };

    let decoded = match edm_type {
        Some(EDM_DATETIME) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|d| FieldValue::DateTime(d.with_timezone(&Utc))),
        Some(EDM_BINARY) => BASE64.decode(text).ok().map(FieldValue::Binary),
        Some(EDM_INT64) => text.parse::<i64>().ok().map(FieldValue::Integer),
        Some(EDM_DOUBLE) => match text.as_str() {
            "NaN" => Some(FieldValue::Number(f64::NAN)),
            "Infinity" => Some(FieldValue::Number(f64::INFINITY)),
            "-Infinity" => Some(FieldValue::Number(f64::NEG_INFINITY)),
            other => other.parse::<f64>().ok().map(FieldValue::Number),
        },
        _ => None,
    };

    decoded.unwrap_or_else(|| FieldValue::String(text.clone()))
}

fn annotate(body: &mut Map<String, Value>, name: &str, edm: &str) {
    body.insert(format!("{}@odata.type", name), Value::String(edm.to_string()));
}

/// Encode an entity as a minimal-metadata JSON body.
///
/// Nulls are omitted. Nested JSON cannot be stored and is rejected.
fn encode_entity(entity: &TableEntity) -> Result<Value, StoreError> {
    let mut body = Map::new();
    body.insert("PartitionKey".into(), Value::String(entity.partition_key.clone()));
    body.insert("RowKey".into(), Value::String(entity.row_key.clone()));

    for (name, value) in &entity.properties {
        if is_system_property(name) {
            continue;
        }
        match value {
            FieldValue::Null => {}
            FieldValue::String(s) => {
                body.insert(name.clone(), Value::String(s.clone()));
            }
            FieldValue::Boolean(b) => {
                body.insert(name.clone(), Value::Bool(*b));
            }
            FieldValue::Integer(i) => {
                if i32::try_from(*i).is_ok() {
                    body.insert(name.clone(), Value::from(*i));
                } else {
                    body.insert(name.clone(), Value::String(i.to_string()));
                    annotate(&mut body, name, EDM_INT64);
                }
            }
            FieldValue::Number(f) => {
                if f.is_finite() {
                    body.insert(name.clone(), Value::from(*f));
                    if f.fract() == 0.0 {
                        annotate(&mut body, name, EDM_DOUBLE);
                    }
                } else {
                    let text = if f.is_nan() {
                        "NaN"
                    } else if *f > 0.0 {
                        "Infinity"
                    } else {
                        "-Infinity"
                    };
                    body.insert(name.clone(), Value::String(text.to_string()));
                    annotate(&mut body, name, EDM_DOUBLE);
                }
            }
            FieldValue::DateTime(d) => {
                body.insert(
                    name.clone(),
                    Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                annotate(&mut body, name, EDM_DATETIME);
            }
            FieldValue::Binary(bytes) => {
                body.insert(name.clone(), Value::String(BASE64.encode(bytes)));
                annotate(&mut body, name, EDM_BINARY);
            }
            FieldValue::Other(_) => {
                return Err(StoreError::InvalidRequest(format!(
                    "property '{}' holds a nested value; table properties must be scalars",
                    name
                )))
            }
        }
    }

    Ok(Value::Object(body))
}
