//! MCP server over stdio.
//!
//! Re-exposes every registered capability, Home Assistant and local alike,
//! so other MCP clients can use the same bridge the voice agent does.

use anyhow::{Context, Result};
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo, Tool,
    },
    transport::stdio,
    ErrorData, RoleServer, ServerHandler, ServiceExt,
};
use std::sync::Arc;
use tracing::{debug, info};

use friday_core::{Capability, Config, ToolBridge, ToolOutcome};

/// Friday MCP server
#[derive(Clone)]
pub struct FridayMcpServer {
    bridge: Arc<ToolBridge>,
    instructions: Option<String>,
}

impl FridayMcpServer {
    pub fn new(bridge: Arc<ToolBridge>, instructions: Option<String>) -> Self {
        Self { bridge, instructions }
    }
}

pub async fn execute(config: &Config) -> Result<()> {
    let bridge = super::open_bridge(config).await?;
    let instructions = bridge.server_instructions().await;
    info!(tools = bridge.registry().len().await, "Serving tools over stdio");

    let server = FridayMcpServer::new(Arc::clone(&bridge), instructions);
    let service = server
        .serve(stdio())
        .await
        .context("Failed to start the MCP server")?;
    let reason = service.waiting().await?;
    debug!(?reason, "MCP client disconnected");

    bridge.close().await?;
    Ok(())
}

/// Convert a registry entry to rmcp's tool format
fn to_mcp_tool(capability: Capability) -> Tool {
    // input_schema must be a JSON object
    let input_schema = match capability.input_schema {
        serde_json::Value::Object(obj) => Arc::new(obj),
        _ => Arc::new(serde_json::Map::new()),
    };

    Tool {
        name: capability.name.into(),
        title: None,
        description: Some(capability.description.into()),
        input_schema,
        output_schema: None,
        annotations: None,
        icons: None,
        meta: None,
    }
}

fn to_call_result(outcome: friday_core::Result<ToolOutcome>) -> CallToolResult {
    match outcome {
        Ok(outcome) if outcome.is_error => CallToolResult::error(vec![Content::text(outcome.text)]),
        Ok(outcome) => CallToolResult::success(vec![Content::text(outcome.text)]),
        Err(e) => CallToolResult::error(vec![Content::text(e.to_string())]),
    }
}

impl ServerHandler for FridayMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut instructions =
            "Friday - Home Assistant device control plus weather, time, search and host status tools."
                .to_string();
        if let Some(extra) = &self.instructions {
            instructions.push_str("\n\n");
            instructions.push_str(extra);
        }

        ServerInfo {
            instructions: Some(instructions),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, ErrorData>> + Send + '_ {
        async move {
            let tools: Vec<Tool> = self
                .bridge
                .registry()
                .list()
                .await
                .into_iter()
                .map(to_mcp_tool)
                .collect();
            debug!("list_tools: returning {} tools", tools.len());

            Ok(ListToolsResult {
                tools,
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: rmcp::service::RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send + '_ {
        debug!("Calling tool: {}", request.name);
        async move {
            let arguments = request
                .arguments
                .map(serde_json::Value::Object)
                .unwrap_or_else(|| serde_json::json!({}));
            let outcome = self.bridge.invoke(request.name.as_ref(), arguments).await;
            Ok(to_call_result(outcome))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use friday_core::CapabilitySource;
    use serde_json::json;
    use std::time::Duration;

    fn outcome(text: &str, is_error: bool) -> ToolOutcome {
        ToolOutcome {
            tool: "HassTurnOn".to_string(),
            text: text.to_string(),
            is_error,
            attempts: 1,
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_tool_conversion_keeps_schema() {
        let tool = to_mcp_tool(Capability {
            name: "get_weather".to_string(),
            description: "Current weather".to_string(),
            input_schema: json!({"type": "object", "required": ["city"]}),
            source: CapabilitySource::Local,
            side_effects: false,
        });

        assert_eq!(tool.name, "get_weather");
        assert_eq!(tool.input_schema["required"], json!(["city"]));
    }

    #[test]
    fn test_non_object_schema_becomes_empty() {
        let tool = to_mcp_tool(Capability::local("noop", "Does nothing", json!(true)));
        assert!(tool.input_schema.is_empty());
    }

    #[test]
    fn test_call_results() {
        assert_eq!(to_call_result(Ok(outcome("Kitchen on", false))).is_error, Some(false));
        assert_eq!(to_call_result(Ok(outcome("no match", true))).is_error, Some(true));

        let failed = to_call_result(Err(friday_core::Error::NotFound("Missing".to_string())));
        assert_eq!(failed.is_error, Some(true));
    }
}
