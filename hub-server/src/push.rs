//! Push-notification subscription bookkeeping.
//!
//! The corpus carries no web-push-delivery crate (no VAPID/web-push client),
//! so this tracks subscriptions and PIN verification state without actually
//! delivering anything over the network — `flo.push` calls surface
//! `"Push notifications not configured"` from the sandbox bridge
//! (`hub_core::sandbox`), and this registry exists only to answer the wire
//! protocol's `push_subscribe`/`push_verify_pin`/`push_unsubscribe` messages
//! coherently for clients that probe it.

use dashmap::DashMap;
use rand::Rng;

#[derive(Default)]
pub struct PushRegistry {
    subscriptions: DashMap<String, serde_json::Value>,
    pending_pins: DashMap<String, String>,
}

impl PushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a subscription and issues a 6-digit verification pin, logged
    /// rather than delivered (no push transport is wired up).
    pub fn subscribe(&self, client_id: &str, subscription: serde_json::Value) -> String {
        self.subscriptions.insert(client_id.to_string(), subscription);
        let pin: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
        let pin = pin.to_string();
        self.pending_pins.insert(client_id.to_string(), pin.clone());
        tracing::info!(client_id, pin, "push verification pin issued (not delivered, no push transport configured)");
        pin
    }

    pub fn verify_pin(&self, client_id: &str, pin: &str) -> bool {
        match self.pending_pins.get(client_id) {
            Some(expected) if expected.as_str() == pin => {
                drop(expected);
                self.pending_pins.remove(client_id);
                true
            }
            _ => false,
        }
    }

    pub fn unsubscribe(&self, client_id: &str) {
        self.subscriptions.remove(client_id);
        self.pending_pins.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_then_verify_with_issued_pin() {
        let registry = PushRegistry::new();
        let pin = registry.subscribe("c1", serde_json::json!({"endpoint": "https://example.test"}));
        assert!(registry.verify_pin("c1", &pin));
        assert!(!registry.verify_pin("c1", &pin), "pin is single-use");
    }

    #[test]
    fn wrong_pin_rejected() {
        let registry = PushRegistry::new();
        let _ = registry.subscribe("c1", serde_json::json!({}));
        assert!(!registry.verify_pin("c1", "000000"));
    }
}
