//! The external agentic-loop and LLM-provider contracts. The hub consumes
//! these as library calls; their internals (request shaping, streaming
//! parse, turn taking) are a separate collaborator and are not implemented
//! here.

use crate::model::{AgentConfig, ContentBlock, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Token/cost usage reported by a loop turn.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub cost: f64,
}

/// Loop-level events forwarded to `on_agent_event` subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentLoopEvent {
    TextDelta { text: String },
    TextDone { text: String },
    ToolUseStart { id: String, name: String, input: serde_json::Value },
    ToolUseDone { id: String, name: String, result: serde_json::Value },
    Usage(Usage),
    TurnEnd,
}

/// A tool-call request the loop wants executed, passed through the runner's
/// wrapped tool executor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub is_error: bool,
    pub content: serde_json::Value,
}

impl ToolCallResult {
    pub fn cancelled() -> Self {
        Self {
            is_error: true,
            content: serde_json::json!("Cancelled: runner stop/pause requested"),
        }
    }
}

/// Cooperative cancellation flags shared between the runner and an in-flight
/// loop turn. The tool executor checks these before every dispatch.
#[derive(Clone, Default)]
pub struct CancellationFlags {
    stop_requested: Arc<AtomicBool>,
    pause_requested: Arc<AtomicBool>,
}

impl CancellationFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst) || self.pause_requested.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.pause_requested.store(false, Ordering::SeqCst);
    }
}

/// Executes a single tool call, honoring cooperative cancellation.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, request: ToolCallRequest) -> ToolCallResult;
}

/// Dependencies handed to one loop turn. `adapter` is the out-of-scope
/// LLM-provider surface, represented here only as an opaque handle the loop
/// is free to use.
pub struct LoopDependencies {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    pub emit: Arc<dyn Fn(AgentLoopEvent) + Send + Sync>,
    pub cancellation: CancellationFlags,
}

/// Input to one loop turn: configuration, new user text, and history
/// filtered to messages that carry a role.
pub struct LoopInput {
    pub config: AgentConfig,
    pub user_message: String,
    pub history: Vec<Message>,
}

/// The loop's output: messages the runner appends to history on completion.
#[derive(Clone, Debug, Default)]
pub struct LoopOutcome {
    pub messages: Vec<Message>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("agentic loop failed: {0}")]
    Failed(String),
}

/// The external agentic loop, consumed as a library call.
#[async_trait]
pub trait AgenticLoop: Send + Sync {
    async fn run_turn(
        &self,
        input: LoopInput,
        deps: LoopDependencies,
    ) -> Result<LoopOutcome, LoopError>;
}

/// LLM provider adapter contract. Request shaping, streaming parse, and cost
/// estimation are the provider's concern; the hub only needs a name to
/// route proxied API requests and advertise shared providers.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn send_api_request(
        &self,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, LoopError>;
}

/// A trivial adapter used when no real provider is wired up (tests, or a
/// hub started without `sharedProviders`).
pub struct NullProviderAdapter;

#[async_trait]
impl ProviderAdapter for NullProviderAdapter {
    fn name(&self) -> &str {
        "null"
    }

    async fn send_api_request(
        &self,
        _payload: serde_json::Value,
    ) -> Result<serde_json::Value, LoopError> {
        Err(LoopError::Failed("no provider adapter configured".into()))
    }
}

/// Helper: turns a `LoopOutcome`'s final text (if any) into a `Message`.
pub fn text_message(text: impl Into<String>) -> Message {
    Message::assistant(vec![ContentBlock::Text { text: text.into() }])
}
