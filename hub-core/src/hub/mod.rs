//! Hub registry: owns the map of live agents and wires each agent's runner
//! to its stores, the shared scheduler, and the shared browser-tool router.
//! Transport (`hub-server`) drives this through `Broadcaster` and
//! `ClientDirectory` rather than hub-core depending on WebSocket types.

use crate::model::AgentConfig;
use crate::protocol::WriteThroughAction;
use crate::router::{BrowserToolRouter, ClientDirectory, ToolResult};
use crate::runner::{AgenticLoop, ProviderAdapter, RunnerError, RunnerSnapshot, ToolExecutor};
use crate::sandbox::{FloBridge, SandboxError, SandboxExecutor, SandboxOutput};
use crate::scheduler::{ScheduleTarget, Scheduler, SchedulerError};
use crate::session::{SessionError, SessionStore};
use crate::store::{DomStore, StateStore, StorageStore};
use crate::AgentRunner;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Fan-out sink the hub pushes write-through updates and escalations into.
/// Implemented by `hub-server`, which knows which transport connections are
/// subscribed to which agent.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn fan_out_state(
        &self,
        agent_id: &str,
        key: &str,
        value: serde_json::Value,
        action: WriteThroughAction,
        exclude_client: Option<&str>,
    );
    async fn fan_out_file(
        &self,
        agent_id: &str,
        path: &str,
        content: String,
        action: WriteThroughAction,
        exclude_client: Option<&str>,
    );
}

/// Everything one live agent owns besides its runner.
#[derive(Clone)]
pub struct AgentHandle {
    pub runner: AgentRunner,
    pub state: Arc<StateStore>,
    pub storage: Arc<StorageStore>,
    pub dom: Arc<DomStore>,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("agent already exists: {0}")]
    AlreadyExists(String),
    #[error("agent not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct AgentHub {
    agents: DashMap<String, AgentHandle>,
    pub scheduler: Arc<Scheduler>,
    pub router: Arc<BrowserToolRouter>,
    sessions: Arc<dyn SessionStore>,
}

impl AgentHub {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            agents: DashMap::new(),
            scheduler: Arc::new(Scheduler::new()),
            router: Arc::new(BrowserToolRouter::new()),
            sessions,
        }
    }

    pub fn create_agent(
        &self,
        id: impl Into<String>,
        config: AgentConfig,
        agentic_loop: Option<Arc<dyn AgenticLoop>>,
        adapter: Arc<dyn ProviderAdapter>,
        tool_executor: Arc<dyn ToolExecutor>,
    ) -> Result<AgentHandle, HubError> {
        let id = id.into();
        if self.agents.contains_key(&id) {
            return Err(HubError::AlreadyExists(id));
        }
        let runner = AgentRunner::new(id.clone(), config, agentic_loop, adapter, tool_executor);
        let handle = AgentHandle {
            runner,
            state: Arc::new(StateStore::new()),
            storage: Arc::new(StorageStore::new()),
            dom: Arc::new(DomStore::new()),
        };
        self.agents.insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<AgentHandle> {
        self.agents.get(id).map(|e| e.value().clone())
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn remove_agent(&self, id: &str) -> Result<(), HubError> {
        let Some((_, handle)) = self.agents.remove(id) else {
            return Err(HubError::NotFound(id.to_string()));
        };
        handle.runner.kill().await;
        let _ = self.sessions.delete(id).await;
        Ok(())
    }

    /// Persists one agent's runner snapshot plus its state/storage caches.
    pub async fn persist_agent(&self, id: &str) -> Result<(), HubError> {
        let handle = self.get(id).ok_or_else(|| HubError::NotFound(id.to_string()))?;
        let snapshot = handle.runner.serialize().await;
        self.sessions.save(&snapshot).await?;
        self.sessions
            .save_state_values(id, &handle.state.get_all().await)
            .await?;
        self.sessions
            .save_storage_values(id, &handle.storage.list().await)
            .await?;
        Ok(())
    }

    /// Drains any escalations queued on an agent's state store and surfaces
    /// them as out-of-band runner messages (delivered to subscribed browsers
    /// the same way any other history entry is).
    pub async fn deliver_escalations(&self, id: &str) {
        let Some(handle) = self.get(id) else { return };
        for escalation in handle.state.drain_escalations().await {
            handle
                .runner
                .add_info_message(format!("{}: {}", escalation.message, escalation.value))
                .await;
        }
    }

    /// Applies a client-originated state write-through and fans it out to
    /// every other subscribed client.
    pub async fn state_write_through(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
        action: WriteThroughAction,
        origin_client: Option<&str>,
        broadcaster: &dyn Broadcaster,
    ) -> Result<(), HubError> {
        let handle = self.get(id).ok_or_else(|| HubError::NotFound(id.to_string()))?;
        match action {
            WriteThroughAction::Set => {
                if let Err(err) = handle.state.set(key, value.clone()).await {
                    tracing::warn!(agent_id = id, %err, "state write-through dropped: cache over cap");
                }
            }
            WriteThroughAction::Delete => {
                handle.state.delete(key).await;
            }
        }
        self.deliver_escalations(id).await;
        broadcaster
            .fan_out_state(id, key, value, action, origin_client)
            .await;
        Ok(())
    }

    pub async fn file_write_through(
        &self,
        id: &str,
        path: &str,
        content: String,
        action: WriteThroughAction,
        origin_client: Option<&str>,
        broadcaster: &dyn Broadcaster,
    ) -> Result<(), HubError> {
        let handle = self.get(id).ok_or_else(|| HubError::NotFound(id.to_string()))?;
        match action {
            WriteThroughAction::Set => {
                handle.storage.set(path, serde_json::json!(content)).await;
            }
            WriteThroughAction::Delete => {
                handle.storage.delete(path).await;
            }
        }
        broadcaster
            .fan_out_file(id, path, content, action, origin_client)
            .await;
        Ok(())
    }

    /// Persists a session snapshot handed to the hub directly (e.g. a
    /// client-driven agent loop pushing its own serialized session rather
    /// than one produced by a locally-running `AgentRunner`).
    pub async fn persist_raw_snapshot(&self, snapshot: RunnerSnapshot) -> Result<(), HubError> {
        self.sessions.save(&snapshot).await?;
        Ok(())
    }

    /// Loads a persisted snapshot without requiring a live `AgentRunner` for
    /// that id (used to answer `restore_agent` before the agent is created).
    pub async fn load_snapshot(&self, agent_id: &str) -> Result<RunnerSnapshot, HubError> {
        Ok(self.sessions.load(agent_id).await?)
    }

    /// Runs one agent's due cron schedules at `now`.
    pub async fn tick_schedulers(&self, now: chrono::DateTime<chrono::Utc>) {
        let ids = self.list_ids();
        for id in ids {
            if let Some(handle) = self.get(&id) {
                let target = RunnerScheduleTarget {
                    runner: handle.runner.clone(),
                };
                self.scheduler.tick_agent(&id, now, &target).await;
            }
        }
    }

    /// Routes a browser-only tool call through the shared router.
    pub async fn route_browser_tool(
        &self,
        directory: &dyn ClientDirectory,
        agent_id: &str,
        tool_name: &str,
        input: serde_json::Value,
        timeout_ms: Option<u64>,
    ) -> ToolResult {
        self.router
            .route_to_browser(directory, agent_id, tool_name, input, timeout_ms)
            .await
    }

    /// Runs sandboxed JS against one agent's bridge. `directory` is owned
    /// (not borrowed) since the bridge is handed to the sandboxed runtime as
    /// a `'static` value.
    pub async fn run_sandboxed(
        &self,
        agent_id: &str,
        code: &str,
        directory: Arc<dyn ClientDirectory>,
        context_hint: Option<&str>,
    ) -> Result<SandboxOutput, SandboxError> {
        let handle = self
            .get(agent_id)
            .ok_or_else(|| SandboxError::Script(format!("unknown agent {agent_id}")))?;
        let bridge: Arc<dyn FloBridge> = Arc::new(RunnerFloBridge {
            agent_id: agent_id.to_string(),
            handle,
            scheduler: self.scheduler.clone(),
            router: self.router.clone(),
            directory,
        });
        SandboxExecutor::run(code, bridge, context_hint).await
    }
}

struct RunnerScheduleTarget {
    runner: AgentRunner,
}

#[async_trait]
impl ScheduleTarget for RunnerScheduleTarget {
    async fn is_busy(&self) -> bool {
        self.runner.is_busy().await
    }

    async fn dispatch_message(&self, text: &str) {
        let _ = self.runner.send_message(text.to_string(), None).await;
    }

    async fn dispatch_tool(&self, _name: &str, _input: serde_json::Value) -> Result<serde_json::Value, String> {
        Err("scheduled tool dispatch requires a tool pipeline wired at the hub-server layer".to_string())
    }
}

/// `flo.*` bridge backing a single agent's sandboxed scripts.
struct RunnerFloBridge {
    agent_id: String,
    handle: AgentHandle,
    scheduler: Arc<Scheduler>,
    router: Arc<BrowserToolRouter>,
    directory: Arc<dyn ClientDirectory>,
}

#[async_trait]
impl FloBridge for RunnerFloBridge {
    async fn state_get(&self, key: &str) -> Result<serde_json::Value, String> {
        Ok(self.handle.state.get(key).await.unwrap_or(serde_json::Value::Null))
    }

    async fn state_set(&self, key: &str, value: serde_json::Value) -> Result<(), String> {
        self.handle.state.set(key, value).await.map_err(|e| e.to_string())
    }

    async fn state_get_all(&self) -> Result<serde_json::Value, String> {
        Ok(serde_json::to_value(self.handle.state.get_all().await).unwrap_or(serde_json::Value::Null))
    }

    async fn storage_get(&self, key: &str) -> Result<serde_json::Value, String> {
        Ok(self.handle.storage.get(key).await.unwrap_or(serde_json::Value::Null))
    }

    async fn storage_set(&self, key: &str, value: serde_json::Value) -> Result<(), String> {
        self.handle.storage.set(key, value).await;
        Ok(())
    }

    async fn storage_delete(&self, key: &str) -> Result<bool, String> {
        Ok(self.handle.storage.delete(key).await)
    }

    async fn storage_list(&self) -> Result<serde_json::Value, String> {
        Ok(serde_json::to_value(self.handle.storage.list().await).unwrap_or(serde_json::Value::Null))
    }

    async fn push(&self, _title: &str, _body: &str) -> Result<(), String> {
        Err("Push notifications are delivered by hub-server, not the core bridge".to_string())
    }

    async fn emit(&self, event_name: &str, payload: serde_json::Value) -> Result<(), String> {
        let target = RunnerScheduleTarget {
            runner: self.handle.runner.clone(),
        };
        self.scheduler
            .on_event(&self.agent_id, event_name, None, &payload, &target)
            .await;
        Ok(())
    }

    async fn notify(&self, text: &str) -> Result<(), String> {
        self.handle.runner.add_info_message(text.to_string()).await;
        Ok(())
    }

    async fn notify_user(&self, text: &str) -> Result<(), String> {
        self.handle.runner.add_info_message(text.to_string()).await;
        Ok(())
    }

    async fn call_tool(&self, name: &str, input: serde_json::Value) -> Result<serde_json::Value, String> {
        let result = self
            .router
            .route_to_browser(self.directory.as_ref(), &self.agent_id, name, input, None)
            .await;
        if result.is_error {
            Err(result.content.as_str().unwrap_or("tool call failed").to_string())
        } else {
            Ok(result.content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkPolicy;
    use crate::runner::NullProviderAdapter;
    use crate::runner::ToolCallRequest;
    use crate::runner::ToolCallResult;
    use crate::session::SqliteSessionStore;

    fn config() -> AgentConfig {
        AgentConfig {
            model: "m".into(),
            provider: "p".into(),
            system_prompt: None,
            tool_catalog: vec![],
            token_budget: None,
            cost_budget: None,
            network_policy: NetworkPolicy::Allow,
        }
    }

    struct NoopExecutor;
    #[async_trait]
    impl ToolExecutor for NoopExecutor {
        async fn execute(&self, _request: ToolCallRequest) -> ToolCallResult {
            ToolCallResult {
                is_error: false,
                content: serde_json::json!(null),
            }
        }
    }

    struct NoopBroadcaster {
        state_calls: std::sync::Mutex<usize>,
    }

    #[async_trait]
    impl Broadcaster for NoopBroadcaster {
        async fn fan_out_state(
            &self,
            _agent_id: &str,
            _key: &str,
            _value: serde_json::Value,
            _action: WriteThroughAction,
            _exclude_client: Option<&str>,
        ) {
            *self.state_calls.lock().unwrap() += 1;
        }
        async fn fan_out_file(
            &self,
            _agent_id: &str,
            _path: &str,
            _content: String,
            _action: WriteThroughAction,
            _exclude_client: Option<&str>,
        ) {
        }
    }

    #[tokio::test]
    async fn create_and_fetch_agent() {
        let hub = AgentHub::new(Arc::new(SqliteSessionStore::in_memory().unwrap()));
        hub.create_agent("a1", config(), None, Arc::new(NullProviderAdapter), Arc::new(NoopExecutor))
            .unwrap();
        assert!(hub.get("a1").is_some());
        assert_eq!(hub.list_ids(), vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_create_fails() {
        let hub = AgentHub::new(Arc::new(SqliteSessionStore::in_memory().unwrap()));
        hub.create_agent("a1", config(), None, Arc::new(NullProviderAdapter), Arc::new(NoopExecutor))
            .unwrap();
        let err = hub
            .create_agent("a1", config(), None, Arc::new(NullProviderAdapter), Arc::new(NoopExecutor))
            .unwrap_err();
        assert!(matches!(err, HubError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn state_write_through_fans_out_and_persists_in_store() {
        let hub = AgentHub::new(Arc::new(SqliteSessionStore::in_memory().unwrap()));
        hub.create_agent("a1", config(), None, Arc::new(NullProviderAdapter), Arc::new(NoopExecutor))
            .unwrap();
        let broadcaster = NoopBroadcaster {
            state_calls: std::sync::Mutex::new(0),
        };
        hub.state_write_through(
            "a1",
            "temp",
            serde_json::json!(72),
            WriteThroughAction::Set,
            None,
            &broadcaster,
        )
        .await
        .unwrap();
        assert_eq!(*broadcaster.state_calls.lock().unwrap(), 1);
        let handle = hub.get("a1").unwrap();
        assert_eq!(handle.state.get("temp").await, Some(serde_json::json!(72)));
    }

    #[tokio::test]
    async fn persist_and_remove_roundtrip() {
        let hub = AgentHub::new(Arc::new(SqliteSessionStore::in_memory().unwrap()));
        hub.create_agent("a1", config(), None, Arc::new(NullProviderAdapter), Arc::new(NoopExecutor))
            .unwrap();
        hub.persist_agent("a1").await.unwrap();
        hub.remove_agent("a1").await.unwrap();
        assert!(hub.get("a1").is_none());
    }
}
