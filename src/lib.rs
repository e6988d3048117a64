//! # Azure Data MCP
//!
//! A Model Context Protocol (MCP) server that exposes Azure Table Storage and
//! Azure AI Search as tools for language-model clients.
//!
//! Table writes are checked against a schema inferred from a sample of the
//! table's existing rows, and search results are stripped of embedding vectors
//! before they reach the client.
//!
//! ## Architecture
//!
//! - [`schema`]: schema inference, record validation and the pre-write guard
//! - [`redact`]: removal of vector fields from documents
//! - [`stores`]: table store and search service clients
//! - [`mcp`]: MCP tools and server
//! - [`services`]: backends assembled from configuration
//! - [`config`]: configuration management
//! - [`models`]: records, field values and the tool response envelope
//! - [`utils`]: HTTP client, retry, schema cache and input validation

pub mod config;
pub mod mcp;
pub mod models;
pub mod redact;
pub mod schema;
pub mod services;
pub mod stores;
pub mod utils;

// Re-export commonly used types
pub use models::{FieldValue, Record, ToolResponse, ValueKind};
pub use redact::{redact, redact_batch};
pub use schema::{infer_schema, validate, SchemaInference, ValidationReport};
pub use services::Services;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
