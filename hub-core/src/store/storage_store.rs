//! Agent workspace key-value storage: same shape as the state cache but
//! without escalation or change fan-out.

use std::collections::HashMap;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
pub struct StorageStore {
    values: AsyncMutex<HashMap<String, serde_json::Value>>,
}

impl StorageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.values.lock().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.values.lock().await.insert(key.into(), value);
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.values.lock().await.remove(key).is_some()
    }

    pub async fn list(&self) -> HashMap<String, serde_json::Value> {
        self.values.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_crud() {
        let store = StorageStore::new();
        store.set("a", serde_json::json!(1)).await;
        assert_eq!(store.get("a").await, Some(serde_json::json!(1)));
        assert_eq!(store.list().await.len(), 1);
        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
    }
}
