//! Out-of-band approval gate for sensitive tool calls: the hub asks a
//! subscribed client to approve or deny before proceeding, the same
//! request/response correlation shape as the browser-tool router (a pending
//! map keyed by UUID, resolved by an inbound message or timed out).

use dashmap::DashMap;
use hub_core::protocol::{ServerMessage, SkillApprovalRequestMessage};
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::registry::ConnectionRegistry;

const APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Default)]
pub struct SkillApprovalGate {
    pending: DashMap<String, oneshot::Sender<bool>>,
}

impl SkillApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a `skill_approval_request` to every client subscribed to
    /// `agent_id` and waits for the first response. Denied by default on
    /// timeout, since an unanswered prompt must not silently grant access.
    pub async fn request(
        &self,
        registry: &ConnectionRegistry,
        agent_id: &str,
        description: &str,
    ) -> bool {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        registry.broadcast_to_agent_subscribers(
            agent_id,
            ServerMessage::SkillApprovalRequest(SkillApprovalRequestMessage {
                id: id.clone(),
                agent_id: agent_id.to_string(),
                description: description.to_string(),
            }),
        );

        match tokio::time::timeout(APPROVAL_TIMEOUT, rx).await {
            Ok(Ok(approved)) => approved,
            _ => {
                self.pending.remove(&id);
                false
            }
        }
    }

    pub fn resolve(&self, id: &str, approved: bool) {
        if let Some((_, tx)) = self.pending.remove(id) {
            let _ = tx.send(approved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_denies_by_default() {
        let gate = SkillApprovalGate::new();
        let registry = ConnectionRegistry::new();
        let approved = gate.request(&registry, "agent-1", "delete everything").await;
        assert!(!approved);
    }
}
