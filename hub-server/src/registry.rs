//! Tracks connected clients and their agent subscriptions. Implements the
//! two abstract interfaces `hub-core` drives fan-out and browser-tool
//! routing through (`Broadcaster`, `ClientDirectory`) so `hub-core` never
//! depends on the transport layer.

use async_trait::async_trait;
use dashmap::DashMap;
use hub_core::protocol::{
    BrowserToolRequestMessage, FilePushMessage, ServerMessage, StatePushMessage, WriteThroughAction,
};
use hub_core::{Broadcaster, ClientDirectory};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;

struct ClientEntry {
    sender: OutboundSender,
    authenticated: bool,
    subscribed: HashSet<String>,
}

/// Shared directory of connected clients. One instance per running hub;
/// cloned (`Arc`) into every connection task and into the `AgentHub`'s
/// browser-tool router calls.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    clients: Arc<DashMap<String, ClientEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: &str, sender: OutboundSender) {
        self.clients.insert(
            client_id.to_string(),
            ClientEntry {
                sender,
                authenticated: false,
                subscribed: HashSet::new(),
            },
        );
    }

    pub fn mark_authenticated(&self, client_id: &str) {
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            entry.authenticated = true;
        }
    }

    pub fn is_authenticated(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .map(|e| e.authenticated)
            .unwrap_or(false)
    }

    pub fn subscribe(&self, client_id: &str, agent_id: &str) {
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            entry.subscribed.insert(agent_id.to_string());
        }
    }

    pub fn unsubscribe(&self, client_id: &str, agent_id: &str) {
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            entry.subscribed.remove(agent_id);
        }
    }

    pub fn send_to(&self, client_id: &str, message: ServerMessage) {
        if let Some(entry) = self.clients.get(client_id) {
            let _ = entry.sender.send(message);
        }
    }

    /// Pushes `message` to every authenticated client subscribed to
    /// `agent_id`. Plain (non-async) so it can be called from a runner event
    /// callback, which is `Fn(RunnerEvent) + Send + Sync` rather than async.
    pub fn broadcast_to_agent_subscribers(&self, agent_id: &str, message: ServerMessage) {
        for entry in self.clients.iter() {
            if entry.authenticated && entry.subscribed.contains(agent_id) {
                let _ = entry.sender.send(message.clone());
            }
        }
    }

    /// Removes a client on disconnect, returning the agent ids it had been
    /// subscribed to so the caller can evict browser-stream/router state.
    pub fn remove(&self, client_id: &str) -> Vec<String> {
        self.clients
            .remove(client_id)
            .map(|(_, entry)| entry.subscribed.into_iter().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClientDirectory for ConnectionRegistry {
    async fn is_valid(&self, client_id: &str, agent_id: &str) -> bool {
        self.clients
            .get(client_id)
            .map(|e| e.authenticated && e.subscribed.contains(agent_id))
            .unwrap_or(false)
    }

    async fn subscribed_clients(&self, agent_id: &str) -> Vec<String> {
        self.clients
            .iter()
            .filter(|e| e.authenticated && e.subscribed.contains(agent_id))
            .map(|e| e.key().clone())
            .collect()
    }

    async fn send_tool_request(
        &self,
        client_id: &str,
        request_id: &str,
        agent_id: &str,
        tool_name: &str,
        input: serde_json::Value,
    ) -> Result<(), String> {
        let Some(entry) = self.clients.get(client_id) else {
            return Err(format!("client {client_id} not connected"));
        };
        entry
            .sender
            .send(ServerMessage::BrowserToolRequest(BrowserToolRequestMessage {
                id: request_id.to_string(),
                hub_agent_id: agent_id.to_string(),
                tool_name: tool_name.to_string(),
                input,
            }))
            .map_err(|_| format!("client {client_id} channel closed"))
    }
}

#[async_trait]
impl Broadcaster for ConnectionRegistry {
    async fn fan_out_state(
        &self,
        agent_id: &str,
        key: &str,
        value: serde_json::Value,
        action: WriteThroughAction,
        exclude_client: Option<&str>,
    ) {
        for entry in self.clients.iter() {
            if !entry.authenticated || !entry.subscribed.contains(agent_id) {
                continue;
            }
            if exclude_client == Some(entry.key().as_str()) {
                continue;
            }
            let _ = entry.sender.send(ServerMessage::StatePush(StatePushMessage {
                hub_agent_id: agent_id.to_string(),
                key: key.to_string(),
                value: value.clone(),
                action,
            }));
        }
    }

    async fn fan_out_file(
        &self,
        agent_id: &str,
        path: &str,
        content: String,
        action: WriteThroughAction,
        exclude_client: Option<&str>,
    ) {
        for entry in self.clients.iter() {
            if !entry.authenticated || !entry.subscribed.contains(agent_id) {
                continue;
            }
            if exclude_client == Some(entry.key().as_str()) {
                continue;
            }
            let _ = entry.sender.send(ServerMessage::FilePush(FilePushMessage {
                hub_agent_id: agent_id.to_string(),
                path: path.to_string(),
                content: content.clone(),
                action,
            }));
        }
    }
}
