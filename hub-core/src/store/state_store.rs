//! In-memory `key -> JSON` state cache with change fan-out, escalation, and
//! debounced persistence.

use crate::model::{EscalationRule, MAX_STATE_BYTES, MAX_STATE_KEYS};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

const PERSIST_DEBOUNCE_MS: u64 = 500;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateStoreError {
    #[error("state cache exceeds key cap ({0} keys)")]
    TooManyKeys(usize),
    #[error("state cache exceeds byte cap ({0} bytes)")]
    TooLarge(usize),
}

/// Fired after a successful write, once onChange callbacks have run.
#[derive(Clone, Debug)]
pub struct Escalation {
    pub key: String,
    pub message: String,
    pub value: serde_json::Value,
}

type OnChange = Arc<dyn Fn(&str, &serde_json::Value) + Send + Sync>;
type PersistFn = Arc<dyn Fn(HashMap<String, serde_json::Value>) + Send + Sync>;

struct Inner {
    values: HashMap<String, serde_json::Value>,
    rules: HashMap<String, EscalationRule>,
    listeners: Vec<OnChange>,
    pending_escalations: Vec<Escalation>,
}

/// Owns the mutable cache; debounced persistence is driven by a background
/// task spawned the first time a write lands after the store has been idle.
pub struct StateStore {
    inner: Arc<AsyncMutex<Inner>>,
    persist: Option<PersistFn>,
    persist_scheduled: Arc<std::sync::atomic::AtomicBool>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(Inner {
                values: HashMap::new(),
                rules: HashMap::new(),
                listeners: Vec::new(),
                pending_escalations: Vec::new(),
            })),
            persist: None,
            persist_scheduled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn with_persist(persist: impl Fn(HashMap<String, serde_json::Value>) + Send + Sync + 'static) -> Self {
        let mut s = Self::new();
        s.persist = Some(Arc::new(persist));
        s
    }

    pub async fn on_change(&self, cb: impl Fn(&str, &serde_json::Value) + Send + Sync + 'static) {
        self.inner.lock().await.listeners.push(Arc::new(cb));
    }

    pub async fn set_escalation_rule(&self, key: impl Into<String>, rule: EscalationRule) {
        self.inner.lock().await.rules.insert(key.into(), rule);
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().await.values.get(key).cloned()
    }

    pub async fn get_all(&self) -> HashMap<String, serde_json::Value> {
        self.inner.lock().await.values.clone()
    }

    /// Writes a key, running onChange listeners and the escalation check
    /// synchronously, then scheduling a debounced persist.
    pub async fn set(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), StateStoreError> {
        let key = key.into();
        let (listeners, escalation) = {
            let mut inner = self.inner.lock().await;
            let previous = inner.values.get(&key).cloned();
            let mut candidate = inner.values.clone();
            candidate.insert(key.clone(), value.clone());
            check_size_caps(&candidate)?;
            inner.values = candidate;

            let escalation = inner.rules.get(&key).and_then(|rule| {
                if rule.condition.evaluate(previous.as_ref(), &value) {
                    Some(Escalation {
                        key: key.clone(),
                        message: rule.message.clone(),
                        value: value.clone(),
                    })
                } else {
                    None
                }
            });
            if let Some(e) = &escalation {
                inner.pending_escalations.push(e.clone());
            }
            (inner.listeners.clone(), escalation)
        };

        for cb in listeners {
            cb(&key, &value);
        }
        let _ = escalation;
        self.schedule_persist();
        Ok(())
    }

    /// Removes a key, running onChange listeners with a `Null` value (mirroring
    /// the JS `undefined` signal) and scheduling a debounced persist. A no-op
    /// if the key was never set.
    pub async fn delete(&self, key: &str) {
        let (listeners, removed) = {
            let mut inner = self.inner.lock().await;
            let removed = inner.values.remove(key).is_some();
            (inner.listeners.clone(), removed)
        };
        if !removed {
            return;
        }
        for cb in listeners {
            cb(key, &serde_json::Value::Null);
        }
        self.schedule_persist();
    }

    /// Drains escalations queued by prior writes (the runner delivers these
    /// to subscribed browsers).
    pub async fn drain_escalations(&self) -> Vec<Escalation> {
        std::mem::take(&mut self.inner.lock().await.pending_escalations)
    }

    fn schedule_persist(&self) {
        let Some(persist) = self.persist.clone() else {
            return;
        };
        if self
            .persist_scheduled
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return;
        }
        let inner = self.inner.clone();
        let scheduled = self.persist_scheduled.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(PERSIST_DEBOUNCE_MS)).await;
            scheduled.store(false, std::sync::atomic::Ordering::SeqCst);
            let snapshot = inner.lock().await.values.clone();
            persist(snapshot);
        });
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn check_size_caps(values: &HashMap<String, serde_json::Value>) -> Result<(), StateStoreError> {
    if values.len() > MAX_STATE_KEYS {
        return Err(StateStoreError::TooManyKeys(values.len()));
    }
    let bytes = serde_json::to_vec(values)
        .map(|v| v.len())
        .unwrap_or(usize::MAX);
    if bytes > MAX_STATE_BYTES {
        return Err(StateStoreError::TooLarge(bytes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EscalationCondition;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn set_invokes_on_change_and_escalation() {
        let store = StateStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        store
            .on_change(move |_k, _v| {
                calls2.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        store
            .set_escalation_rule(
                "temperature",
                EscalationRule {
                    condition: EscalationCondition::parse("> 100"),
                    message: "overheating".into(),
                },
            )
            .await;

        store.set("temperature", serde_json::json!(50)).await.unwrap();
        assert_eq!(store.drain_escalations().await.len(), 0);

        store.set("temperature", serde_json::json!(150)).await.unwrap();
        let escalations = store.drain_escalations().await;
        assert_eq!(escalations.len(), 1);
        assert_eq!(escalations[0].message, "overheating");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delete_removes_key_and_notifies_listeners() {
        let store = StateStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        store
            .on_change(move |_k, _v| {
                calls2.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        store.set("temperature", serde_json::json!(50)).await.unwrap();
        assert_eq!(store.get("temperature").await, Some(serde_json::json!(50)));

        store.delete("temperature").await;
        assert_eq!(store.get("temperature").await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_a_noop() {
        let store = StateStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        store
            .on_change(move |_k, _v| {
                calls2.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        store.delete("never_set").await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejects_over_key_cap() {
        let store = StateStore::new();
        for i in 0..MAX_STATE_KEYS {
            store
                .inner
                .lock()
                .await
                .values
                .insert(format!("k{i}"), serde_json::json!(1));
        }
        let err = store.set("one_more", serde_json::json!(1)).await.unwrap_err();
        assert!(matches!(err, StateStoreError::TooManyKeys(_)));
    }
}
