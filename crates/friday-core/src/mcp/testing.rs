//! In-memory MCP server used by unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::transport::McpTransport;
use crate::error::{Error, Result};

pub const LIVE_CONTEXT: &str = "Live Context: An overview of the areas and the devices in this smart home:
- names: Kitchen Light
  domain: light
  state: 'on'
  areas: Kitchen
  attributes:
    brightness: '180'
- names: Bedroom Lamp
  domain: light
  state: 'off'
  areas: Bedroom
- names: Outdoor Temperature
  domain: sensor
  state: '12.5'
  areas: Garden
";

#[derive(Default)]
struct State {
    tools: Vec<Value>,
    page_size: Option<usize>,
    slot_failures: u32,
    connect_failures: u32,
    timeouts: u32,
    latency: Option<Duration>,
    requests: Vec<(u64, String)>,
    calls: Vec<(String, Value)>,
    notifications: Vec<String>,
}

/// Scripted Home Assistant MCP server
#[derive(Clone, Default)]
pub struct ScriptedServer {
    state: Arc<Mutex<State>>,
}

impl ScriptedServer {
    /// Server exposing HassTurnOn, HassTurnOff and GetLiveContext
    pub fn home_assistant() -> Self {
        let target = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "area": {"type": "string"},
                "domain": {"type": "array", "items": {"type": "string"}}
            }
        });
        let server = Self::default();
        server.state.lock().unwrap().tools = vec![
            json!({"name": "HassTurnOn", "description": "Turns on a device or entity", "inputSchema": target}),
            json!({"name": "HassTurnOff", "description": "Turns off a device or entity", "inputSchema": target}),
            json!({
                "name": "GetLiveContext",
                "description": "Provides real-time information about devices",
                "inputSchema": {"type": "object", "properties": {}},
                "annotations": {"readOnlyHint": true}
            }),
        ];
        server
    }

    pub fn with_page_size(self, size: usize) -> Self {
        self.state.lock().unwrap().page_size = Some(size);
        self
    }

    /// Next `n` calls to a Hass* tool fail with an invalid slot info error
    pub fn with_slot_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().slot_failures = n;
        self
    }

    /// Next `n` `tools/call` requests are refused before reaching the server
    pub fn with_connect_failures(self, n: u32) -> Self {
        self.state.lock().unwrap().connect_failures = n;
        self
    }

    /// Next `n` `tools/call` requests run but their answer never arrives
    pub fn with_timeouts(self, n: u32) -> Self {
        self.state.lock().unwrap().timeouts = n;
        self
    }

    /// Every request takes `latency` to answer
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().unwrap().latency = Some(latency);
        self
    }

    pub fn add_tool(&self, tool: Value) {
        self.state.lock().unwrap().tools.push(tool);
    }

    pub fn transport(&self) -> Arc<dyn McpTransport> {
        Arc::new(self.clone())
    }

    pub fn was_notified(&self, method: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .notifications
            .iter()
            .any(|m| m == method)
    }

    pub fn count_requests(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(_, m)| m == method)
            .count()
    }

    pub fn request_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }

    /// Tool names in call order
    pub fn calls(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn handle(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((request.id, request.method.clone()));
        let params = request.params.clone().unwrap_or(Value::Null);

        let result = match request.method.as_str() {
            "initialize" => json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {"listChanged": true}},
                "serverInfo": {"name": "home-assistant", "version": "2025.6.0"},
                "instructions": "You are a voice assistant for Home Assistant."
            }),
            "ping" => json!({}),
            "tools/list" => {
                let start: usize = params["cursor"]
                    .as_str()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let size = state.page_size.unwrap_or(state.tools.len().max(1));
                let end = (start + size).min(state.tools.len());
                let page: Vec<Value> = state.tools[start..end].to_vec();
                if end < state.tools.len() {
                    json!({"tools": page, "nextCursor": end.to_string()})
                } else {
                    json!({"tools": page})
                }
            }
            "tools/call" => {
                if state.connect_failures > 0 {
                    state.connect_failures -= 1;
                    return Err(Error::Connect("connection refused".into()));
                }
                let name = params["name"].as_str().unwrap_or_default().to_string();
                let args = params["arguments"].clone();
                state.calls.push((name.clone(), args.clone()));

                if state.timeouts > 0 {
                    state.timeouts -= 1;
                    return Err(Error::Timeout(30_000));
                }

                if !state.tools.iter().any(|t| t["name"] == name.as_str()) {
                    return Ok(JsonRpcResponse::failure(request.id, -32602, format!("Unknown tool: {}", name)));
                }
                if name.starts_with("Hass") && state.slot_failures > 0 {
                    state.slot_failures -= 1;
                    json!({"content": [{"type": "text", "text": "Error: MatchFailedError: invalid slot info"}], "isError": true})
                } else if name == "GetLiveContext" {
                    let answer = json!({"success": true, "result": LIVE_CONTEXT});
                    json!({"content": [{"type": "text", "text": answer.to_string()}]})
                } else {
                    let target = args["name"].as_str().or(args["area"].as_str()).unwrap_or("device");
                    json!({"content": [{"type": "text", "text": format!("{} done for {}", name, target)}]})
                }
            }
            other => {
                return Ok(JsonRpcResponse::failure(
                    request.id,
                    -32601,
                    format!("Method not found: {}", other),
                ));
            }
        };

        Ok(JsonRpcResponse::success(request.id, result))
    }
}

#[async_trait]
impl McpTransport for ScriptedServer {
    async fn request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.handle(&request)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .notifications
            .push(notification.method);
        Ok(())
    }
}
