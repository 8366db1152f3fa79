//! Browser-Tool Router: picks a subscribed browser for a browser-only tool
//! call, forwards the request, and resolves the agent's await when the
//! matching `browser_tool_result` arrives (or on timeout/disconnect).

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// What the router needs to know about connected clients, kept abstract so
/// this module doesn't depend on the transport layer.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    /// True if `client_id` is still connected, authenticated, and subscribed
    /// to `agent_id`.
    async fn is_valid(&self, client_id: &str, agent_id: &str) -> bool;
    /// Clients currently subscribed to `agent_id`, in a stable scan order.
    async fn subscribed_clients(&self, agent_id: &str) -> Vec<String>;
    /// Sends a `browser_tool_request` envelope to `client_id`.
    async fn send_tool_request(
        &self,
        client_id: &str,
        request_id: &str,
        agent_id: &str,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<(), String>;
}

struct PendingRequest {
    client_id: String,
    responder: oneshot::Sender<serde_json::Value>,
}

#[derive(Default)]
pub struct BrowserToolRouter {
    pending: DashMap<String, PendingRequest>,
    last_active_by_agent: DashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    pub is_error: bool,
    pub content: serde_json::Value,
}

impl ToolResult {
    fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            content: serde_json::json!(message.into()),
        }
    }

    fn ok(content: serde_json::Value) -> Self {
        Self {
            is_error: false,
            content,
        }
    }
}

impl BrowserToolRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records affinity from observed client activity (any inbound message
    /// from a client on behalf of an agent counts).
    pub fn note_activity(&self, agent_id: &str, client_id: &str) {
        self.last_active_by_agent
            .insert(agent_id.to_string(), client_id.to_string());
    }

    pub async fn route_to_browser(
        &self,
        directory: &dyn ClientDirectory,
        agent_id: &str,
        tool_name: &str,
        input: serde_json::Value,
        timeout_ms: Option<u64>,
    ) -> ToolResult {
        let Some(client_id) = self.select_candidate(directory, agent_id).await else {
            return ToolResult::error(format!(
                "No browser connected for agent {agent_id} (tool: {tool_name})"
            ));
        };

        let request_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            request_id.clone(),
            PendingRequest {
                client_id: client_id.clone(),
                responder: tx,
            },
        );

        if let Err(err) = directory
            .send_tool_request(&client_id, &request_id, agent_id, tool_name, input)
            .await
        {
            self.pending.remove(&request_id);
            return ToolResult::error(format!("Failed to reach browser: {err}"));
        }

        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => ToolResult::ok(value),
            Ok(Err(_)) => ToolResult::error("Browser disconnected"),
            Err(_) => {
                self.pending.remove(&request_id);
                ToolResult::error(format!("Browser tool {tool_name} timed out"))
            }
        }
    }

    /// Resolves a pending request; duplicates and unknown ids are discarded.
    pub fn resolve(&self, request_id: &str, result: serde_json::Value) {
        if let Some((_, pending)) = self.pending.remove(request_id) {
            let _ = pending.responder.send(result);
        }
    }

    /// Scrubs affinity entries pointing at `client_id` and fails any pending
    /// requests routed to it.
    pub fn remove_client(&self, client_id: &str) {
        self.last_active_by_agent
            .retain(|_, v| v != client_id);
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.value().client_id == client_id)
            .map(|e| e.key().clone())
            .collect();
        for id in stale {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.responder.send(serde_json::json!({
                    "is_error": true,
                    "content": "Browser disconnected",
                }));
            }
        }
    }

    async fn select_candidate(
        &self,
        directory: &dyn ClientDirectory,
        agent_id: &str,
    ) -> Option<String> {
        if let Some(cached) = self.last_active_by_agent.get(agent_id) {
            let cached = cached.clone();
            if directory.is_valid(&cached, agent_id).await {
                return Some(cached);
            }
            warn!(agent_id, client_id = %cached, "evicting stale browser affinity");
            self.last_active_by_agent.remove(agent_id);
        }
        let candidates = directory.subscribed_clients(agent_id).await;
        let chosen = candidates.into_iter().next()?;
        self.last_active_by_agent
            .insert(agent_id.to_string(), chosen.clone());
        Some(chosen)
    }
}
