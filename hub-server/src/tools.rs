//! Hub-native tool catalog and the `ToolExecutor` that dispatches to it,
//! falling back to the browser-tool router for tools marked `browser_only`.

use async_trait::async_trait;
use hub_core::protocol::ToolCatalogEntry;
use hub_core::runner::{ToolCallRequest, ToolCallResult, ToolExecutor};
use hub_core::AgentHub;
use std::sync::Arc;

use crate::registry::ConnectionRegistry;

/// The tools the hub itself knows how to run, plus the ones it must
/// delegate to a connected browser. Real deployments extend this catalog
/// per agent configuration; this is the hub-wide default set.
pub fn default_catalog() -> Vec<ToolCatalogEntry> {
    vec![
        ToolCatalogEntry {
            name: "capabilities".into(),
            description: Some("Reports hub capabilities, including the local timezone used for cron evaluation.".into()),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            browser_only: false,
        },
        ToolCatalogEntry {
            name: "dom_query".into(),
            description: Some("Queries the agent's virtual DOM for a CSS selector's serialized HTML.".into()),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"selector": {"type": "string"}},
                "required": ["selector"]
            }),
            browser_only: true,
        },
    ]
}

/// Per-agent tool executor: resolves `name` against the catalog, runs
/// hub-native tools locally, and routes browser-only tools through the
/// shared `BrowserToolRouter`.
pub struct HubToolExecutor {
    pub agent_id: String,
    pub hub: Arc<AgentHub>,
    pub directory: Arc<ConnectionRegistry>,
    pub catalog: Vec<ToolCatalogEntry>,
}

#[async_trait]
impl ToolExecutor for HubToolExecutor {
    async fn execute(&self, request: ToolCallRequest) -> ToolCallResult {
        execute_tool(
            &self.hub,
            &self.directory,
            &self.catalog,
            Some(&self.agent_id),
            &request.name,
            request.input,
        )
        .await
    }
}

/// Resolves `name` against `catalog` and either runs it locally or routes it
/// to a connected browser. Shared by the per-agent `ToolExecutor` (tool
/// calls made from inside a loop turn) and the client-initiated
/// `tool_request` handler (calls made directly over the socket).
pub async fn execute_tool(
    hub: &AgentHub,
    directory: &Arc<ConnectionRegistry>,
    catalog: &[ToolCatalogEntry],
    agent_id: Option<&str>,
    name: &str,
    input: serde_json::Value,
) -> ToolCallResult {
    let Some(entry) = catalog.iter().find(|t| t.name == name) else {
        return ToolCallResult {
            is_error: true,
            content: serde_json::json!(format!("Unknown tool: {name}")),
        };
    };

    if entry.browser_only {
        let Some(agent_id) = agent_id else {
            return ToolCallResult {
                is_error: true,
                content: serde_json::json!(format!(
                    "Tool {name} is browser-only and requires an agentId"
                )),
            };
        };
        let result = hub
            .route_browser_tool(directory.as_ref(), agent_id, name, input, None)
            .await;
        return ToolCallResult {
            is_error: result.is_error,
            content: result.content,
        };
    }

    run_native_tool(name, input)
}

fn run_native_tool(name: &str, _input: serde_json::Value) -> ToolCallResult {
    match name {
        "capabilities" => ToolCallResult {
            is_error: false,
            content: serde_json::json!({
                "timezone": local_utc_offset(),
                "tools": default_catalog().iter().map(|t| &t.name).collect::<Vec<_>>(),
            }),
        },
        other => ToolCallResult {
            is_error: true,
            content: serde_json::json!(format!("Unknown tool: {other}")),
        },
    }
}

/// The hub's wall-clock offset, used by `capabilities` and exposed so
/// clients can render cron schedules in local time. `chrono` carries no
/// timezone database, so this reports the fixed UTC offset of `Local::now`
/// rather than an IANA zone name (the workspace has no `iana-time-zone` or
/// `chrono-tz` dependency to draw on).
fn local_utc_offset() -> String {
    chrono::Local::now().format("%:z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_reports_tools() {
        let result = run_native_tool("capabilities", serde_json::json!({}));
        assert!(!result.is_error);
        assert!(result.content["tools"].as_array().unwrap().len() >= 2);
    }

    #[test]
    fn unknown_native_tool_errors() {
        let result = run_native_tool("nonexistent", serde_json::json!({}));
        assert!(result.is_error);
    }
}
