//! MCP server over stdio.
//!
//! Adapts [`ToolDispatch`] to the rmcp [`ServerHandler`] so MCP clients
//! (Claude Desktop, Cursor, ...) can call `search_embeddings`,
//! `list_workspaces`, and `workspace_info`. Tool failures come back as
//! `isError` results, never as protocol errors.

use std::borrow::Cow;
use std::sync::Arc;

use anyhow::Result;
use rmcp::model::*;
use rmcp::transport::stdio;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use tracing::info;

use ragbridge_core::tools::{ToolDescriptor, ToolResponse};
use ragbridge_core::ToolDispatch;

use crate::backend::build_orchestrator;
use crate::config::Config;

/// Bridges [`ToolDispatch`] to the MCP protocol.
///
/// Cloned per session; the dispatch is shared behind an `Arc`.
#[derive(Clone)]
pub struct McpBridge {
    dispatch: Arc<ToolDispatch>,
}

impl McpBridge {
    pub fn new(dispatch: Arc<ToolDispatch>) -> Self {
        Self { dispatch }
    }

    fn to_mcp_tool(descriptor: ToolDescriptor) -> Tool {
        let input_schema = match descriptor.input_schema {
            serde_json::Value::Object(map) => Arc::new(map),
            _ => Arc::new(serde_json::Map::new()),
        };

        Tool {
            name: Cow::Owned(descriptor.name),
            title: None,
            description: Some(Cow::Owned(descriptor.description)),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(true)),
            execution: None,
            icons: None,
            meta: None,
        }
    }

    fn to_call_result(response: ToolResponse) -> CallToolResult {
        let content = response
            .content
            .into_iter()
            .map(|c| Content::text(c.text))
            .collect();
        if response.is_error {
            CallToolResult::error(content)
        } else {
            CallToolResult::success(content)
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "ragbridge".to_string(),
                title: Some("RAG Bridge".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Semantic search over workspace embeddings. Use list_workspaces to find a \
                 workspace slug, workspace_info to inspect it, and search_embeddings to \
                 retrieve relevant passages."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .dispatch
            .list_tools()
            .into_iter()
            .map(Self::to_mcp_tool)
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.dispatch
            .list_tools()
            .into_iter()
            .find(|d| d.name == name)
            .map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = request.arguments.map(serde_json::Value::Object);
        let response = self.dispatch.call(&request.name, arguments).await;
        Ok(Self::to_call_result(response))
    }
}

/// Serve MCP over stdin/stdout until the client disconnects.
///
/// Logging must stay on stderr: stdout carries the protocol.
pub async fn run_stdio(config: &Config) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let bridge = McpBridge::new(Arc::new(ToolDispatch::new(orchestrator)));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "ragbridge MCP server listening on stdio"
    );
    let server = bridge.serve(stdio()).await?;
    server.waiting().await?;
    info!("MCP client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragbridge_core::tools::ToolRegistry;
    use ragbridge_core::Error;

    #[test]
    fn test_descriptor_to_mcp_tool() {
        let descriptors = ToolRegistry::with_builtins().descriptors();
        let search = descriptors
            .into_iter()
            .find(|d| d.name == "search_embeddings")
            .unwrap();
        let tool = McpBridge::to_mcp_tool(search);
        assert_eq!(tool.name, "search_embeddings");
        assert_eq!(
            tool.input_schema.get("type").and_then(|v| v.as_str()),
            Some("object")
        );
        assert!(tool.input_schema.contains_key("properties"));
    }

    #[test]
    fn test_error_response_maps_to_is_error() {
        let result = McpBridge::to_call_result(ToolResponse::error(&Error::UnknownTool(
            "nope".into(),
        )));
        assert_eq!(result.is_error, Some(true));

        let result = McpBridge::to_call_result(ToolResponse::success("{}".into()));
        assert_eq!(result.is_error, Some(false));
    }
}
