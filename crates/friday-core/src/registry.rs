//! Capability registry.
//!
//! Maps tool names to their invocation schemas, validates arguments before
//! dispatch and keeps handlers for tools that run in-process.
//!
//! ```text
//! Home Assistant MCP ──tools/list──► ToolBridge ──replace_source──┐
//!                                                                 ▼
//! local tools ─────────────register──────────────────► CapabilityRegistry
//!                                                                 │
//!                        tool_specs() ◄───────────────────────────┤
//!                        validate(name, args) ◄───────────────────┘
//! ```
//!
//! Unlike a static tool table, Home Assistant tools come and go at runtime
//! (entities exposed or hidden), so the registry supports atomic resync of
//! everything that came from one source.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::mcp::protocol::{CallToolResult, ToolDescriptor};

/// Where a capability is executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilitySource {
    /// Forwarded to the Home Assistant MCP server
    HomeAssistant,
    /// Runs in-process through a registered handler
    Local,
}

impl std::fmt::Display for CapabilitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HomeAssistant => write!(f, "home_assistant"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A callable tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub input_schema: Value,
    pub source: CapabilitySource,
    /// Whether calling it changes device state
    pub side_effects: bool,
}

impl Capability {
    pub fn local(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            source: CapabilitySource::Local,
            side_effects: false,
        }
    }

    /// Convert a tool advertised by the MCP server
    pub fn from_mcp(tool: &ToolDescriptor) -> Self {
        let read_only = tool
            .annotations
            .as_ref()
            .and_then(|a| a.read_only_hint)
            .unwrap_or(false);

        Self {
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            input_schema: tool.input_schema.clone(),
            source: CapabilitySource::HomeAssistant,
            side_effects: !read_only,
        }
    }
}

/// Function-calling declaration handed to the voice model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Handler for an in-process tool
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = CallToolResult> + Send>> + Send + Sync>;

/// Result of resyncing one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
    /// Tools rejected for an invalid schema or a name clash
    pub skipped: Vec<String>,
}

impl SyncSummary {
    pub fn changed(&self) -> bool {
        self.added + self.removed + self.updated > 0
    }
}

struct Registered {
    capability: Capability,
    validator: Arc<jsonschema::Validator>,
    handler: Option<ToolHandler>,
}

type ChangeListener = Box<dyn Fn(u64) + Send + Sync>;

/// Registry of every tool the session can call
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Registered>>,
    revision: AtomicU64,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            revision: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a capability, optionally with an in-process handler
    pub async fn register(&self, capability: Capability, handler: Option<ToolHandler>) -> Result<()> {
        let validator = compile(&capability)?;
        let mut entries = self.entries.write().await;

        if entries.contains_key(&capability.name) {
            return Err(Error::AlreadyRegistered(capability.name));
        }

        debug!(tool = %capability.name, source = %capability.source, "Registered capability");
        entries.insert(
            capability.name.clone(),
            Registered {
                capability,
                validator,
                handler,
            },
        );

        drop(entries);
        self.bump().await;
        Ok(())
    }

    /// Replace everything registered from `source` with `capabilities`.
    ///
    /// Entries whose schema does not compile, or whose name is taken by a
    /// different source, are skipped.
    pub async fn replace_source(
        &self,
        source: CapabilitySource,
        capabilities: Vec<Capability>,
    ) -> SyncSummary {
        let mut summary = SyncSummary::default();
        let mut entries = self.entries.write().await;

        let incoming: Vec<String> = capabilities.iter().map(|c| c.name.clone()).collect();
        let before = entries.len();
        entries.retain(|name, r| r.capability.source != source || incoming.contains(name));
        summary.removed = before - entries.len();

        for capability in capabilities {
            match entries.get(&capability.name) {
                Some(existing) if existing.capability.source != source => {
                    warn!(
                        tool = %capability.name,
                        "Tool name already provided by {}, skipping", existing.capability.source
                    );
                    summary.skipped.push(capability.name);
                    continue;
                }
                Some(existing) if existing.capability == capability => continue,
                _ => {}
            }

            let validator = match compile(&capability) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Skipping tool: {}", e);
                    summary.skipped.push(capability.name.clone());
                    // A stale entry under the same name must not survive
                    if entries.remove(&capability.name).is_some() {
                        summary.removed += 1;
                    }
                    continue;
                }
            };

            let previous = entries.insert(
                capability.name.clone(),
                Registered {
                    capability,
                    validator,
                    handler: None,
                },
            );
            if previous.is_some() {
                summary.updated += 1;
            } else {
                summary.added += 1;
            }
        }

        drop(entries);
        if summary.changed() {
            self.bump().await;
        }
        summary
    }

    /// Remove a capability
    pub async fn remove(&self, name: &str) -> Result<Capability> {
        let removed = self
            .entries
            .write()
            .await
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        self.bump().await;
        Ok(removed.capability)
    }

    /// Attach or replace the handler of a registered capability
    pub async fn set_handler(&self, name: &str, handler: ToolHandler) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        entry.handler = Some(handler);
        drop(entries);
        self.bump().await;
        Ok(())
    }

    /// Check arguments against the capability's schema.
    ///
    /// Returns the normalized arguments: `null` becomes an empty object.
    pub async fn validate(&self, name: &str, arguments: Value) -> Result<Value> {
        let validator = {
            let entries = self.entries.read().await;
            let entry = entries
                .get(name)
                .ok_or_else(|| Error::NotFound(name.to_string()))?;
            Arc::clone(&entry.validator)
        };

        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => arguments,
            other => {
                return Err(Error::invalid_arguments(
                    name,
                    vec![format!("expected an object, got {}", json_type(&other))],
                ));
            }
        };

        let violations: Vec<String> = validator
            .iter_errors(&arguments)
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                format!("{}: {}", path, e)
            })
            .collect();

        if violations.is_empty() {
            Ok(arguments)
        } else {
            Err(Error::invalid_arguments(name, violations))
        }
    }

    pub async fn get(&self, name: &str) -> Option<Capability> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|r| r.capability.clone())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn handler(&self, name: &str) -> Option<ToolHandler> {
        self.entries
            .read()
            .await
            .get(name)
            .and_then(|r| r.handler.clone())
    }

    /// All capabilities sorted by name
    pub async fn list(&self) -> Vec<Capability> {
        let mut list: Vec<Capability> = self
            .entries
            .read()
            .await
            .values()
            .map(|r| r.capability.clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn list_source(&self, source: CapabilitySource) -> Vec<Capability> {
        self.list()
            .await
            .into_iter()
            .filter(|c| c.source == source)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Declarations for the voice model, sorted by name
    pub async fn tool_specs(&self) -> Vec<ToolSpec> {
        self.list()
            .await
            .into_iter()
            .map(|c| ToolSpec {
                name: c.name,
                description: c.description,
                parameters: c.input_schema,
            })
            .collect()
    }

    /// Incremented on every mutation
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Add a change listener; it receives the new revision
    pub async fn on_change(&self, callback: impl Fn(u64) + Send + Sync + 'static) {
        self.listeners.write().await.push(Box::new(callback));
    }

    async fn bump(&self) {
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        let listeners = self.listeners.read().await;
        for listener in listeners.iter() {
            listener(revision);
        }
    }
}

fn compile(capability: &Capability) -> Result<Arc<jsonschema::Validator>> {
    if !capability.input_schema.is_object() {
        return Err(Error::InvalidSchema {
            tool: capability.name.clone(),
            message: "schema must be a JSON object".to_string(),
        });
    }
    jsonschema::validator_for(&capability.input_schema)
        .map(Arc::new)
        .map_err(|e| Error::InvalidSchema {
            tool: capability.name.clone(),
            message: e.to_string(),
        })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn turn_on() -> Capability {
        Capability {
            name: "HassTurnOn".to_string(),
            description: "Turns on a device or entity".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "area": { "type": "string" },
                    "brightness": { "type": "integer", "minimum": 0, "maximum": 100 }
                },
                "additionalProperties": false
            }),
            source: CapabilitySource::HomeAssistant,
            side_effects: true,
        }
    }

    fn echo_handler() -> ToolHandler {
        let handler: ToolHandler = Arc::new(|args| {
            Box::pin(async move { CallToolResult::text_result(args.to_string(), false) })
        });
        handler
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = CapabilityRegistry::new();
        registry.register(turn_on(), None).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert!(registry.contains("HassTurnOn").await);
        assert!(registry.handler("HassTurnOn").await.is_none());
        assert_eq!(registry.revision(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let registry = CapabilityRegistry::new();
        registry.register(turn_on(), None).await.unwrap();

        let err = registry.register(turn_on(), None).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(name) if name == "HassTurnOn"));
    }

    #[tokio::test]
    async fn test_invalid_schema_rejected() {
        let registry = CapabilityRegistry::new();
        let mut cap = turn_on();
        cap.input_schema = json!({"type": "no-such-type"});

        let err = registry.register(cap, None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_validate_normalizes_null() {
        let registry = CapabilityRegistry::new();
        registry.register(turn_on(), None).await.unwrap();

        let args = registry.validate("HassTurnOn", Value::Null).await.unwrap();
        assert_eq!(args, json!({}));
    }

    #[tokio::test]
    async fn test_validate_reports_every_violation() {
        let registry = CapabilityRegistry::new();
        registry.register(turn_on(), None).await.unwrap();

        let err = registry
            .validate("HassTurnOn", json!({"name": 42, "brightness": 250}))
            .await
            .unwrap_err();

        match err {
            Error::InvalidArguments { tool, violations } => {
                assert_eq!(tool, "HassTurnOn");
                assert_eq!(violations.len(), 2);
                assert!(violations.iter().any(|v| v.starts_with("/name")));
                assert!(violations.iter().any(|v| v.starts_with("/brightness")));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_rejects_non_object() {
        let registry = CapabilityRegistry::new();
        registry.register(turn_on(), None).await.unwrap();

        let err = registry
            .validate("HassTurnOn", json!(["kitchen"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected an object, got array"));
    }

    #[tokio::test]
    async fn test_validate_unknown_tool() {
        let registry = CapabilityRegistry::new();
        let err = registry.validate("Nope", json!({})).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_replace_source_resyncs() {
        let registry = CapabilityRegistry::new();
        registry
            .register(
                Capability::local("get_weather", "Weather", json!({"type": "object"})),
                Some(echo_handler()),
            )
            .await
            .unwrap();

        let mut turn_off = turn_on();
        turn_off.name = "HassTurnOff".to_string();

        let summary = registry
            .replace_source(CapabilitySource::HomeAssistant, vec![turn_on(), turn_off])
            .await;
        assert_eq!(summary.added, 2);
        assert_eq!(registry.len().await, 3);

        // Second sync drops HassTurnOff and updates HassTurnOn
        let mut updated = turn_on();
        updated.description = "Turns things on".to_string();
        let summary = registry
            .replace_source(CapabilitySource::HomeAssistant, vec![updated])
            .await;
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(registry.len().await, 2);
        assert!(registry.contains("get_weather").await);
        assert_eq!(
            registry.get("HassTurnOn").await.unwrap().description,
            "Turns things on"
        );
    }

    #[tokio::test]
    async fn test_replace_source_unchanged_keeps_revision() {
        let registry = CapabilityRegistry::new();
        registry
            .replace_source(CapabilitySource::HomeAssistant, vec![turn_on()])
            .await;
        let revision = registry.revision();

        let summary = registry
            .replace_source(CapabilitySource::HomeAssistant, vec![turn_on()])
            .await;
        assert!(!summary.changed());
        assert_eq!(registry.revision(), revision);
    }

    #[tokio::test]
    async fn test_replace_source_skips_clashes_and_bad_schemas() {
        let registry = CapabilityRegistry::new();
        registry
            .register(
                Capability::local("HassTurnOn", "local shadow", json!({"type": "object"})),
                Some(echo_handler()),
            )
            .await
            .unwrap();

        let mut broken = turn_on();
        broken.name = "Broken".to_string();
        broken.input_schema = json!("not a schema");

        let summary = registry
            .replace_source(CapabilitySource::HomeAssistant, vec![turn_on(), broken])
            .await;
        assert_eq!(summary.added, 0);
        assert_eq!(summary.skipped, vec!["HassTurnOn".to_string(), "Broken".to_string()]);
        assert_eq!(
            registry.get("HassTurnOn").await.unwrap().source,
            CapabilitySource::Local
        );
    }

    #[tokio::test]
    async fn test_change_listener_receives_revisions() {
        let registry = CapabilityRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        registry
            .on_change(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        registry.register(turn_on(), None).await.unwrap();
        registry.remove("HassTurnOn").await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_set_handler_notifies_listeners() {
        let registry = CapabilityRegistry::new();
        registry.register(turn_on(), None).await.unwrap();
        let before = registry.revision();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        registry
            .on_change(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        registry.set_handler("HassTurnOn", echo_handler()).await.unwrap();
        assert_eq!(registry.revision(), before + 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(registry.handler("HassTurnOn").await.is_some());

        assert!(registry.set_handler("Missing", echo_handler()).await.unwrap_err().is_not_found());
        assert_eq!(registry.revision(), before + 1);
    }

    #[tokio::test]
    async fn test_tool_specs_sorted() {
        let registry = CapabilityRegistry::new();
        registry
            .register(
                Capability::local("search_web", "Search", json!({"type": "object"})),
                Some(echo_handler()),
            )
            .await
            .unwrap();
        registry.register(turn_on(), None).await.unwrap();

        let specs = registry.tool_specs().await;
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["HassTurnOn", "search_web"]);
        assert_eq!(specs[0].parameters["type"], "object");
    }

    #[tokio::test]
    async fn test_handler_invocation() {
        let registry = CapabilityRegistry::new();
        registry
            .register(
                Capability::local("echo", "Echo", json!({"type": "object"})),
                Some(echo_handler()),
            )
            .await
            .unwrap();

        let handler = registry.handler("echo").await.unwrap();
        let result = handler(json!({"x": 1})).await;
        assert_eq!(result.text(), r#"{"x":1}"#);
    }

    #[test]
    fn test_capability_from_mcp_read_only_hint() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "GetLiveContext",
            "description": "Live state",
            "annotations": {"readOnlyHint": true}
        }))
        .unwrap();

        let cap = Capability::from_mcp(&tool);
        assert_eq!(cap.source, CapabilitySource::HomeAssistant);
        assert!(!cap.side_effects);
    }
}
