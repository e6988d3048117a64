//! Utility modules supporting the store clients and tools.
//!
//! - [`HttpClient`]: shared `reqwest` client with timeouts
//! - [`RetryConfig`] / [`with_retry`]: exponential backoff for transient store errors
//! - [`SchemaCache`]: short-lived per-table cache of inferred schemas
//! - [`validate`]: input validation for names, keys and endpoints
//!
//! # Retry with Backoff
//!
//! ```rust,no_run
//! use azure_data_mcp::stores::StoreError;
//! use azure_data_mcp::utils::{with_retry, RetryConfig};
//!
//! # async fn fetch_data() -> Result<String, StoreError> { Ok("data".to_string()) }
//! # #[tokio::main]
//! # async fn main() -> Result<(), StoreError> {
//! let config = RetryConfig::default().max_retries(3);
//! let result = with_retry(config, || fetch_data()).await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod http;
mod retry;
pub mod validate;

pub use cache::{CacheResult, SchemaCache};
pub use http::HttpClient;
pub use retry::{with_retry, RetryConfig, TransientError};
pub use validate::ValidationError;
