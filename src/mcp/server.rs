//! MCP server implementation using pmcp.
//!
//! Serves the tool registry over stdio or streamable HTTP. Tool results are
//! always returned inside the `{success, data|error}` envelope, so a failing
//! store call reaches the client as data rather than a JSON-RPC error.

use crate::mcp::tools::{call_enveloped, ToolRegistry};
use crate::services::Services;
use async_trait::async_trait;
use pmcp::{
    server::streamable_http_server::StreamableHttpServer,
    Error, RequestHandlerExtra, Server, ServerCapabilities, ToolHandler, ToolInfo,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Name announced to MCP clients
pub const SERVER_NAME: &str = "azure-data-mcp";

/// The MCP server exposing the table and search tools
#[derive(Debug, Clone)]
pub struct McpServer {
    server: Arc<Mutex<Server>>,
    tool_names: Vec<String>,
}

impl McpServer {
    /// Create a server with a tool for every backend in `services`
    pub fn new(services: &Services) -> Result<Self, pmcp::Error> {
        let tools = ToolRegistry::from_services(services);
        if tools.is_empty() {
            tracing::warn!("No backends configured; the server exposes no tools");
        }
        let tool_names = tools.names().into_iter().map(str::to_string).collect();
        let server = Self::build_server_impl(tools)?;
        Ok(Self {
            server: Arc::new(Mutex::new(server)),
            tool_names,
        })
    }

    /// Names of the registered tools
    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    fn build_server_impl(tools: ToolRegistry) -> Result<Server, pmcp::Error> {
        let mut builder = Server::builder()
            .name(SERVER_NAME)
            .version(env!("CARGO_PKG_VERSION"))
            .capabilities(ServerCapabilities::default());

        for tool in tools.all() {
            let wrapper = ToolWrapper {
                name: tool.name.clone(),
                description: Some(tool.description.clone()),
                input_schema: tool.input_schema.clone(),
                handler: tool.handler.clone(),
            };
            builder = builder.tool(wrapper.name.clone(), wrapper);
        }

        builder.build()
    }

    /// Run the server over stdio
    pub async fn run(self) -> Result<(), pmcp::Error> {
        tracing::info!(tools = self.tool_names.len(), "Starting MCP server in stdio mode");

        // run_stdio() takes ownership of the Server
        let server = Arc::try_unwrap(self.server)
            .map_err(|_| Error::internal("MCP server is shared and cannot run over stdio"))?
            .into_inner();

        server.run_stdio().await
    }

    /// Run the server over streamable HTTP
    pub async fn run_http(&self, addr: &str) -> Result<(SocketAddr, JoinHandle<()>), pmcp::Error> {
        tracing::info!(addr, "Starting MCP server in HTTP mode");

        let socket_addr = parse_addr(addr)?;
        StreamableHttpServer::new(socket_addr, self.server.clone())
            .start()
            .await
    }
}

fn parse_addr(addr: &str) -> Result<SocketAddr, pmcp::Error> {
    addr.parse()
        .map_err(|e| Error::invalid_params(format!("Invalid address '{}': {}", addr, e)))
}

/// Adapts a registry tool to pmcp's `ToolHandler`
#[derive(Clone)]
struct ToolWrapper {
    name: String,
    description: Option<String>,
    input_schema: Value,
    handler: Arc<dyn crate::mcp::tools::ToolHandler>,
}

#[async_trait]
impl ToolHandler for ToolWrapper {
    async fn handle(&self, args: Value, _extra: RequestHandlerExtra) -> Result<Value, Error> {
        Ok(call_enveloped(self.handler.as_ref(), &self.name, args).await)
    }

    fn metadata(&self) -> Option<ToolInfo> {
        Some(ToolInfo::new(
            self.name.clone(),
            self.description.clone(),
            self.input_schema.clone(),
        ))
    }
}

/// Create a new MCP server instance
pub fn create_mcp_server(services: &Services) -> Result<McpServer, pmcp::Error> {
    McpServer::new(services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchemaConfig;
    use crate::stores::MemoryTableStore;

    #[test]
    fn test_server_registers_table_tools() {
        let services = Services::new(&SchemaConfig::default())
            .with_table_store(Arc::new(MemoryTableStore::new()));
        let server = create_mcp_server(&services).unwrap();
        assert!(server.tool_names().iter().any(|n| n == "validate_entity"));
        assert_eq!(server.tool_names().len(), 13);
    }

    #[test]
    fn test_parse_addr() {
        assert!(parse_addr("127.0.0.1:3000").is_ok());
        assert!(parse_addr("localhost").is_err());
    }
}
