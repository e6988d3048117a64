//! Input validation utilities for table names, entity keys, index names and endpoints.
//!
//! These checks run before any request is built so that malformed names never
//! reach a URL path.

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// Maximum size of a PartitionKey or RowKey in bytes
pub const MAX_KEY_BYTES: usize = 1024;

/// Validation error types
#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Invalid table name '{0}': must be 3-63 alphanumeric characters starting with a letter")]
    InvalidTableName(String),

    #[error("Invalid {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    #[error("Invalid index name '{0}': must be 2-128 lowercase letters, digits or dashes")]
    InvalidIndexName(String),

    #[error("Invalid document key: {0}")]
    InvalidDocumentKey(String),

    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid sample size: must be at least 1")]
    InvalidSampleSize,
}

fn table_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9]{2,62}$").unwrap_or_else(|e| panic!("table name pattern: {e}"))
    })
}

fn index_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9-]{0,126}[a-z0-9]$").unwrap_or_else(|e| panic!("index name pattern: {e}"))
    })
}

/// Validate an Azure table name
pub fn validate_table_name(name: &str) -> Result<&str, ValidationError> {
    let name = name.trim();
    if !table_name_pattern().is_match(name) || name.eq_ignore_ascii_case("tables") {
        return Err(ValidationError::InvalidTableName(name.to_string()));
    }
    Ok(name)
}

/// Validate a PartitionKey or RowKey value
///
/// Keys may be empty strings in the service but the tools require a value.
/// Forward slash, backslash, number sign, question mark and control
/// characters are disallowed.
pub fn validate_entity_key<'a>(
    field: &'static str,
    key: &'a str,
) -> Result<&'a str, ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::InvalidKey {
            field,
            reason: "must not be empty".to_string(),
        });
    }

    if key.len() > MAX_KEY_BYTES {
        return Err(ValidationError::InvalidKey {
            field,
            reason: format!("exceeds {} bytes", MAX_KEY_BYTES),
        });
    }

    for ch in key.chars() {
        if matches!(ch, '/' | '\\' | '#' | '?') {
            return Err(ValidationError::InvalidKey {
                field,
                reason: format!("contains disallowed character '{}'", ch),
            });
        }
        if ch.is_control() {
            return Err(ValidationError::InvalidKey {
                field,
                reason: "contains control characters".to_string(),
            });
        }
    }

    Ok(key)
}

/// Validate a search index name
pub fn validate_index_name(name: &str) -> Result<&str, ValidationError> {
    let name = name.trim();
    if !index_name_pattern().is_match(name) || name.contains("--") {
        return Err(ValidationError::InvalidIndexName(name.to_string()));
    }
    Ok(name)
}

/// Validate a search document key
pub fn validate_document_key(key: &str) -> Result<&str, ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::InvalidDocumentKey("empty key".to_string()));
    }
    if key.contains('\0') || key.chars().any(|c| c.is_control()) {
        return Err(ValidationError::InvalidDocumentKey(
            "contains control characters".to_string(),
        ));
    }
    Ok(key)
}

/// Validate a service endpoint URL (http or https only)
pub fn validate_endpoint(endpoint: &str) -> Result<url::Url, ValidationError> {
    let endpoint = endpoint.trim();
    let parsed =
        url::Url::parse(endpoint).map_err(|e| ValidationError::InvalidEndpoint(e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::InvalidEndpoint(format!(
                "invalid scheme: {}",
                other
            )))
        }
    }

    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidEndpoint("missing host".to_string()));
    }

    Ok(parsed)
}

/// Validate a requested sample size
pub fn validate_sample_size(size: usize) -> Result<usize, ValidationError> {
    if size == 0 {
        return Err(ValidationError::InvalidSampleSize);
    }
    Ok(size)
}
