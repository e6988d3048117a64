//! MCP (Model Context Protocol) implementation.
//!
//! - [`server`]: pmcp server over stdio or streamable HTTP
//! - [`ToolRegistry`]: the table and search tools, built from [`Services`](crate::services::Services)

mod search_tools;
pub mod server;
mod table_tools;
mod tools;

pub use server::{create_mcp_server, McpServer, SERVER_NAME};
pub use table_tools::TableContext;
pub use tools::{call_enveloped, Tool, ToolHandler, ToolRegistry};
