//! Session persistence: durable storage for runner snapshots and the
//! state/storage key-value caches, keyed by agent id.
//!
//! `SqliteSessionStore` follows the same `Arc<Mutex<Connection>>` plus
//! `tokio::task::block_in_place` shape used elsewhere in this codebase for
//! wrapping a synchronous `rusqlite::Connection` in an async API: open once,
//! hand out cheap clones, run each query on the blocking thread.

use crate::runner::RunnerSnapshot;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("session not found: {0}")]
    NotFound(String),
}

/// Storage abstraction so callers (the hub registry, tests) aren't tied to
/// SQLite specifically.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn save(&self, snapshot: &RunnerSnapshot) -> Result<(), SessionError>;
    async fn load(&self, agent_id: &str) -> Result<RunnerSnapshot, SessionError>;
    async fn list_agent_ids(&self) -> Result<Vec<String>, SessionError>;
    async fn delete(&self, agent_id: &str) -> Result<(), SessionError>;

    async fn save_state_values(
        &self,
        agent_id: &str,
        values: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(), SessionError>;
    async fn load_state_values(
        &self,
        agent_id: &str,
    ) -> Result<std::collections::HashMap<String, serde_json::Value>, SessionError>;

    async fn save_storage_values(
        &self,
        agent_id: &str,
        values: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(), SessionError>;
    async fn load_storage_values(
        &self,
        agent_id: &str,
    ) -> Result<std::collections::HashMap<String, serde_json::Value>, SessionError>;
}

pub struct SqliteSessionStore {
    db: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let conn = rusqlite::Connection::open(path.as_ref())
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                agent_id TEXT PRIMARY KEY,
                snapshot TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS state_values (
                agent_id TEXT PRIMARY KEY,
                values_json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS storage_values (
                agent_id TEXT PRIMARY KEY,
                values_json TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self, SessionError> {
        Self::new(":memory:")
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn save(&self, snapshot: &RunnerSnapshot) -> Result<(), SessionError> {
        let db = self.db.clone();
        let agent_id = snapshot.id.clone();
        let json = serde_json::to_string(snapshot).map_err(|e| SessionError::Storage(e.to_string()))?;
        let now = chrono::Utc::now().timestamp();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| SessionError::Storage("lock".into()))?;
            conn.execute(
                "INSERT INTO sessions (agent_id, snapshot, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(agent_id) DO UPDATE SET snapshot = excluded.snapshot, updated_at = excluded.updated_at",
                rusqlite::params![agent_id, json, now],
            )
            .map_err(|e| SessionError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    async fn load(&self, agent_id: &str) -> Result<RunnerSnapshot, SessionError> {
        let db = self.db.clone();
        let agent_id = agent_id.to_string();
        let json: String = tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| SessionError::Storage("lock".into()))?;
            conn.query_row(
                "SELECT snapshot FROM sessions WHERE agent_id = ?1",
                rusqlite::params![agent_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => SessionError::NotFound(agent_id.clone()),
                other => SessionError::Storage(other.to_string()),
            })
        })?;
        serde_json::from_str(&json).map_err(|e| SessionError::Storage(e.to_string()))
    }

    async fn list_agent_ids(&self) -> Result<Vec<String>, SessionError> {
        let db = self.db.clone();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| SessionError::Storage("lock".into()))?;
            let mut stmt = conn
                .prepare("SELECT agent_id FROM sessions ORDER BY updated_at DESC")
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get(0))
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| SessionError::Storage(e.to_string()))
        })
    }

    async fn delete(&self, agent_id: &str) -> Result<(), SessionError> {
        let db = self.db.clone();
        let agent_id = agent_id.to_string();
        tokio::task::block_in_place(|| {
            let conn = db.lock().map_err(|_| SessionError::Storage("lock".into()))?;
            conn.execute("DELETE FROM sessions WHERE agent_id = ?1", rusqlite::params![agent_id])
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            conn.execute("DELETE FROM state_values WHERE agent_id = ?1", rusqlite::params![agent_id])
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            conn.execute("DELETE FROM storage_values WHERE agent_id = ?1", rusqlite::params![agent_id])
                .map_err(|e| SessionError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    async fn save_state_values(
        &self,
        agent_id: &str,
        values: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(), SessionError> {
        save_values_table(&self.db, "state_values", agent_id, values).await
    }

    async fn load_state_values(
        &self,
        agent_id: &str,
    ) -> Result<std::collections::HashMap<String, serde_json::Value>, SessionError> {
        load_values_table(&self.db, "state_values", agent_id).await
    }

    async fn save_storage_values(
        &self,
        agent_id: &str,
        values: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<(), SessionError> {
        save_values_table(&self.db, "storage_values", agent_id, values).await
    }

    async fn load_storage_values(
        &self,
        agent_id: &str,
    ) -> Result<std::collections::HashMap<String, serde_json::Value>, SessionError> {
        load_values_table(&self.db, "storage_values", agent_id).await
    }
}

async fn save_values_table(
    db: &Arc<Mutex<rusqlite::Connection>>,
    table: &'static str,
    agent_id: &str,
    values: &std::collections::HashMap<String, serde_json::Value>,
) -> Result<(), SessionError> {
    let db = db.clone();
    let agent_id = agent_id.to_string();
    let json = serde_json::to_string(values).map_err(|e| SessionError::Storage(e.to_string()))?;
    tokio::task::block_in_place(move || {
        let conn = db.lock().map_err(|_| SessionError::Storage("lock".into()))?;
        conn.execute(
            &format!(
                "INSERT INTO {table} (agent_id, values_json) VALUES (?1, ?2)
                 ON CONFLICT(agent_id) DO UPDATE SET values_json = excluded.values_json"
            ),
            rusqlite::params![agent_id, json],
        )
        .map_err(|e| SessionError::Storage(e.to_string()))?;
        Ok(())
    })
}

async fn load_values_table(
    db: &Arc<Mutex<rusqlite::Connection>>,
    table: &'static str,
    agent_id: &str,
) -> Result<std::collections::HashMap<String, serde_json::Value>, SessionError> {
    let db = db.clone();
    let agent_id = agent_id.to_string();
    let json: Option<String> = tokio::task::block_in_place(move || {
        let conn = db.lock().map_err(|_| SessionError::Storage("lock".into()))?;
        let result: Result<String, rusqlite::Error> = conn.query_row(
            &format!("SELECT values_json FROM {table} WHERE agent_id = ?1"),
            rusqlite::params![agent_id],
            |row| row.get(0),
        );
        match result {
            Ok(json) => Ok(Some(json)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(other) => Err(SessionError::Storage(other.to_string())),
        }
    })?;
    match json {
        Some(json) => serde_json::from_str(&json).map_err(|e| SessionError::Storage(e.to_string())),
        None => Ok(std::collections::HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentConfig, DomSnapshot, NetworkPolicy, SessionMetadata};
    use crate::runner::RunnerState;

    fn snapshot(id: &str) -> RunnerSnapshot {
        RunnerSnapshot {
            id: id.into(),
            state: RunnerState::Running,
            history: vec![],
            dom: DomSnapshot::default(),
            metadata: SessionMetadata::new(),
            config: AgentConfig {
                model: "test-model".into(),
                provider: "test".into(),
                system_prompt: None,
                tool_catalog: vec![],
                token_budget: None,
                cost_budget: None,
                network_policy: NetworkPolicy::Allow,
            },
        }
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = SqliteSessionStore::in_memory().unwrap();
        store.save(&snapshot("agent-1")).await.unwrap();
        let loaded = store.load("agent-1").await.unwrap();
        assert_eq!(loaded.id, "agent-1");
        assert_eq!(loaded.state, RunnerState::Running);
    }

    #[tokio::test]
    async fn load_missing_returns_not_found() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let err = store.load("nope").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn upsert_overwrites_existing() {
        let store = SqliteSessionStore::in_memory().unwrap();
        store.save(&snapshot("agent-1")).await.unwrap();
        let mut second = snapshot("agent-1");
        second.state = RunnerState::Stopped;
        store.save(&second).await.unwrap();
        let loaded = store.load("agent-1").await.unwrap();
        assert_eq!(loaded.state, RunnerState::Stopped);
        assert_eq!(store.list_agent_ids().await.unwrap(), vec!["agent-1".to_string()]);
    }

    #[tokio::test]
    async fn state_values_roundtrip() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let mut values = std::collections::HashMap::new();
        values.insert("temperature".to_string(), serde_json::json!(72));
        store.save_state_values("agent-1", &values).await.unwrap();
        let loaded = store.load_state_values("agent-1").await.unwrap();
        assert_eq!(loaded.get("temperature"), Some(&serde_json::json!(72)));
    }

    #[tokio::test]
    async fn missing_state_values_returns_empty_map() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let loaded = store.load_state_values("ghost").await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn delete_clears_all_tables() {
        let store = SqliteSessionStore::in_memory().unwrap();
        store.save(&snapshot("agent-1")).await.unwrap();
        let mut values = std::collections::HashMap::new();
        values.insert("k".to_string(), serde_json::json!(1));
        store.save_state_values("agent-1", &values).await.unwrap();
        store.delete("agent-1").await.unwrap();
        assert!(store.load("agent-1").await.is_err());
        assert!(store.load_state_values("agent-1").await.unwrap().is_empty());
    }
}
