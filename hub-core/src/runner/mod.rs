//! The Agent Runner: owns one agent's lifecycle, conversation history, and
//! in-flight loop turn. One runner per agent; the hub registry (see
//! `crate::hub`) holds a map of these keyed by agent id.
//!
//! Turns execute on a background task rather than blocking the caller,
//! since the agentic loop is suspension-driven (it may wait on tool results
//! routed through a browser). `send_message` therefore returns as soon as
//! the message is queued or handed to a freshly spawned turn, not when the
//! turn completes; callers observe progress through `on_event`/`on_agent_event`.

pub mod events;
pub mod loop_contract;
pub mod state;

pub use events::RunnerEvent;
pub use loop_contract::{
    AgenticLoop, CancellationFlags, LoopDependencies, LoopError, LoopInput, LoopOutcome,
    NullProviderAdapter, ProviderAdapter, ToolCallRequest, ToolCallResult, ToolExecutor, Usage,
};
pub use state::{RunnerError, RunnerState};

use crate::model::{AgentConfig, DomSnapshot, Message, MessageType, SessionMetadata};
use loop_contract::AgentLoopEvent;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};

type EventCallback = Arc<dyn Fn(RunnerEvent) + Send + Sync>;
type AgentEventCallback = Arc<dyn Fn(AgentLoopEvent) + Send + Sync>;

/// One queued user-turn input. Only a single slot is kept: a message sent
/// while a turn is in flight replaces (does not append to) the pending slot.
#[derive(Clone)]
struct QueuedTurn {
    text: String,
    kind: Option<MessageType>,
}

struct Subscribers {
    event: Vec<(u64, EventCallback)>,
    agent_event: Vec<(u64, AgentEventCallback)>,
}

impl Default for Subscribers {
    fn default() -> Self {
        Self {
            event: Vec::new(),
            agent_event: Vec::new(),
        }
    }
}

struct RunnerInner {
    state: RunnerState,
    busy: bool,
    stop_deferred: bool,
    pause_deferred: bool,
    /// Set by `intervene_start` when a turn is in flight; like
    /// `pause_deferred` but also discards the queued turn on loop exit and
    /// marks `intervene_paused` instead of a plain pause.
    intervene_deferred: bool,
    /// True while the runner is paused specifically because of
    /// `intervene_start`, as opposed to a plain `pause()`. `intervene_end`
    /// is a no-op unless this is set.
    intervene_paused: bool,
    history: Vec<Message>,
    dom: DomSnapshot,
    metadata: SessionMetadata,
    queued: Option<QueuedTurn>,
    cancellation: CancellationFlags,
}

/// Internal pieces shared across clones via `Arc`; `AgentRunner` is itself a
/// thin `Arc<Inner>` handle so the hub registry can freely clone it.
struct Inner {
    id: String,
    config: Mutex<AgentConfig>,
    state: Mutex<RunnerInner>,
    subscribers: Mutex<Subscribers>,
    next_sub_id: AtomicU64,
    agentic_loop: Option<Arc<dyn AgenticLoop>>,
    adapter: Arc<dyn ProviderAdapter>,
    tool_executor: Arc<dyn ToolExecutor>,
}

#[derive(Clone)]
pub struct AgentRunner {
    inner: Arc<Inner>,
}

/// Opaque unsubscribe handle returned by `on_event`/`on_agent_event`.
pub struct Subscription {
    id: u64,
    kind: SubscriptionKind,
    runner: Arc<Inner>,
}

enum SubscriptionKind {
    Event,
    AgentEvent,
}

impl Subscription {
    pub async fn unsubscribe(self) {
        let mut subs = self.runner.subscribers.lock().await;
        match self.kind {
            SubscriptionKind::Event => subs.event.retain(|(id, _)| *id != self.id),
            SubscriptionKind::AgentEvent => subs.agent_event.retain(|(id, _)| *id != self.id),
        }
    }
}

impl AgentRunner {
    /// Creates a runner in `pending` state. `agentic_loop` is `None` for an
    /// "inert" runner with no injected loop dependency: such a runner never
    /// transitions past `pending`/`running` bookkeeping on its own and accepts
    /// `send_message` unconditionally, appending to history without starting
    /// a turn. This matches hubs that drive the conversation purely through
    /// `add_info_message`/external tooling rather than an LLM loop.
    pub fn new(
        id: impl Into<String>,
        config: AgentConfig,
        agentic_loop: Option<Arc<dyn AgenticLoop>>,
        adapter: Arc<dyn ProviderAdapter>,
        tool_executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        let inner = Inner {
            id: id.into(),
            config: Mutex::new(config),
            state: Mutex::new(RunnerInner {
                state: RunnerState::Pending,
                busy: false,
                stop_deferred: false,
                pause_deferred: false,
                intervene_deferred: false,
                intervene_paused: false,
                history: Vec::new(),
                dom: DomSnapshot::default(),
                metadata: SessionMetadata::new(),
                queued: None,
                cancellation: CancellationFlags::new(),
            }),
            subscribers: Mutex::new(Subscribers::default()),
            next_sub_id: AtomicU64::new(0),
            agentic_loop,
            adapter,
            tool_executor,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub async fn state(&self) -> RunnerState {
        self.inner.state.lock().await.state
    }

    /// True while a loop turn is in flight. Cron triggers use this to
    /// busy-skip rather than queue behind a running turn.
    pub async fn is_busy(&self) -> bool {
        self.inner.state.lock().await.busy
    }

    pub async fn config(&self) -> AgentConfig {
        self.inner.config.lock().await.clone()
    }

    pub async fn history(&self) -> Vec<Message> {
        self.inner.state.lock().await.history.clone()
    }

    pub async fn dom_snapshot(&self) -> DomSnapshot {
        self.inner.state.lock().await.dom.clone()
    }

    pub async fn set_dom_state(&self, snapshot: DomSnapshot) {
        self.inner.state.lock().await.dom = snapshot;
    }

    pub async fn get_dom_state(&self) -> DomSnapshot {
        self.dom_snapshot().await
    }

    /// Registers an event subscriber; callback panics are caught and logged
    /// so one misbehaving subscriber cannot take down the runner's emit path.
    pub async fn on_event(&self, cb: impl Fn(RunnerEvent) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .lock()
            .await
            .event
            .push((id, Arc::new(cb)));
        Subscription {
            id,
            kind: SubscriptionKind::Event,
            runner: self.inner.clone(),
        }
    }

    pub async fn on_agent_event(
        &self,
        cb: impl Fn(AgentLoopEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .lock()
            .await
            .agent_event
            .push((id, Arc::new(cb)));
        Subscription {
            id,
            kind: SubscriptionKind::AgentEvent,
            runner: self.inner.clone(),
        }
    }

    async fn emit(&self, event: RunnerEvent) {
        let subs = self.inner.subscribers.lock().await.event.clone();
        for (_, cb) in subs {
            let event = event.clone();
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| cb(event))) {
                error!(agent_id = %self.inner.id, ?panic, "runner event callback panicked");
            }
        }
    }

    fn emit_agent_event_fn(&self) -> AgentEventCallback {
        let inner = self.inner.clone();
        Arc::new(move |event: AgentLoopEvent| {
            let subs = inner.subscribers.try_lock();
            let Ok(subs) = subs else {
                warn!("agent event dropped: subscriber list locked");
                return;
            };
            for (_, cb) in subs.agent_event.iter() {
                let event = event.clone();
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| cb(event))) {
                    error!(?panic, "agent event callback panicked");
                }
            }
        })
    }

    async fn set_state(&self, to: RunnerState) {
        let from = {
            let mut s = self.inner.state.lock().await;
            let from = s.state;
            s.state = to;
            from
        };
        if from != to {
            self.emit(RunnerEvent::StateChange { from, to }).await;
        }
    }

    /// `pending -> running`. Any other starting state is an error.
    pub async fn start(&self) -> Result<(), RunnerError> {
        {
            let s = self.inner.state.lock().await;
            if s.state != RunnerState::Pending {
                return Err(RunnerError::InvalidState { from: s.state });
            }
        }
        self.set_state(RunnerState::Running).await;
        Ok(())
    }

    /// Queues a user message and, if idle, spawns a background turn.
    ///
    /// Loop-configured runners require `running` state. Inert runners (no
    /// `AgenticLoop` injected) accept messages unconditionally and simply
    /// append to history, since there is no turn to drive.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        kind: Option<MessageType>,
    ) -> Result<(), RunnerError> {
        let text = text.into();
        let Some(agentic_loop) = self.inner.agentic_loop.clone() else {
            let msg = match kind {
                Some(MessageType::Intervention) => Message::intervention_text(text),
                _ => Message::user_text(text),
            };
            self.inner.state.lock().await.history.push(msg.clone());
            self.emit(RunnerEvent::Message(msg)).await;
            return Ok(());
        };

        let should_spawn = {
            let mut s = self.inner.state.lock().await;
            if s.state != RunnerState::Running {
                return Err(RunnerError::NotRunning);
            }
            if s.busy {
                s.queued = Some(QueuedTurn {
                    text: text.clone(),
                    kind,
                });
                false
            } else {
                s.busy = true;
                true
            }
        };

        if should_spawn {
            self.spawn_turn(agentic_loop, text, kind).await;
        }
        Ok(())
    }

    /// Adds an out-of-band informational message without driving a turn
    /// (announcements, system notices surfaced to subscribed browsers).
    pub async fn add_info_message(&self, text: impl Into<String>) {
        let msg = Message::announcement(text);
        self.inner.state.lock().await.history.push(msg.clone());
        self.emit(RunnerEvent::Message(msg)).await;
    }

    /// Pauses the runner for direct-control intervention: immediate if idle,
    /// deferred (and the queued turn discarded on loop exit) if busy. A
    /// no-op outside `running`.
    pub async fn intervene_start(&self) {
        let (defer, cancellation) = {
            let mut s = self.inner.state.lock().await;
            if s.state != RunnerState::Running {
                return;
            }
            if s.busy {
                s.intervene_deferred = true;
                (true, s.cancellation.clone())
            } else {
                s.intervene_paused = true;
                (false, s.cancellation.clone())
            }
        };
        if defer {
            cancellation.request_pause();
        } else {
            self.set_state(RunnerState::Paused).await;
        }
    }

    /// No-op unless the runner is currently paused via `intervene_start`.
    /// On match, resumes and drives a real turn with `notification` as an
    /// intervention-typed user message.
    pub async fn intervene_end(&self, notification: Option<String>) {
        {
            let mut s = self.inner.state.lock().await;
            if !s.intervene_paused {
                return;
            }
            s.intervene_paused = false;
        }
        if self.resume().await.is_err() {
            return;
        }
        if let Some(text) = notification {
            let _ = self
                .send_message(text, Some(MessageType::Intervention))
                .await;
        }
    }

    /// `running -> paused` immediately if idle, otherwise deferred until the
    /// in-flight turn finishes (checked cooperatively via `CancellationFlags`).
    pub async fn pause(&self) -> Result<(), RunnerError> {
        let (defer, cancellation) = {
            let mut s = self.inner.state.lock().await;
            if s.state != RunnerState::Running {
                return Err(RunnerError::InvalidState { from: s.state });
            }
            if s.busy {
                s.pause_deferred = true;
                (true, s.cancellation.clone())
            } else {
                (false, s.cancellation.clone())
            }
        };
        if defer {
            cancellation.request_pause();
        } else {
            self.set_state(RunnerState::Paused).await;
        }
        Ok(())
    }

    /// `paused -> running`.
    pub async fn resume(&self) -> Result<(), RunnerError> {
        {
            let s = self.inner.state.lock().await;
            if s.state != RunnerState::Paused {
                return Err(RunnerError::InvalidState { from: s.state });
            }
        }
        self.set_state(RunnerState::Running).await;
        Ok(())
    }

    /// `{running, paused} -> stopped`, deferred if a turn is in flight.
    pub async fn stop(&self) -> Result<(), RunnerError> {
        let (defer, cancellation) = {
            let mut s = self.inner.state.lock().await;
            if !matches!(s.state, RunnerState::Running | RunnerState::Paused) {
                return Err(RunnerError::InvalidState { from: s.state });
            }
            if s.busy {
                s.stop_deferred = true;
                (true, s.cancellation.clone())
            } else {
                (false, s.cancellation.clone())
            }
        };
        if defer {
            cancellation.request_stop();
        } else {
            self.set_state(RunnerState::Stopped).await;
        }
        Ok(())
    }

    /// Immediate, non-deferred stop from any state. Requests cancellation of
    /// an in-flight turn but does not wait for it to observe the flag.
    pub async fn kill(&self) {
        let cancellation = {
            let mut s = self.inner.state.lock().await;
            s.queued = None;
            s.cancellation.clone()
        };
        cancellation.request_stop();
        self.set_state(RunnerState::Stopped).await;
    }

    async fn spawn_turn(
        &self,
        agentic_loop: Arc<dyn AgenticLoop>,
        text: String,
        kind: Option<MessageType>,
    ) {
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run_turn(agentic_loop, text, kind).await;
        });
    }

    async fn run_turn(
        &self,
        agentic_loop: Arc<dyn AgenticLoop>,
        text: String,
        kind: Option<MessageType>,
    ) {
        let user_msg = match kind {
            Some(MessageType::Intervention) => Message::intervention_text(text.clone()),
            _ => Message::user_text(text.clone()),
        };
        {
            let mut s = self.inner.state.lock().await;
            s.history.push(user_msg.clone());
        }
        self.emit(RunnerEvent::Message(user_msg)).await;

        let (config, history, cancellation) = {
            let s = self.inner.state.lock().await;
            (
                self.inner.config.lock().await.clone(),
                s.history
                    .iter()
                    .cloned()
                    .filter(Message::in_llm_context)
                    .collect(),
                s.cancellation.clone(),
            )
        };

        let deps = LoopDependencies {
            adapter: self.inner.adapter.clone(),
            tool_executor: self.inner.tool_executor.clone(),
            emit: self.emit_agent_event_fn(),
            cancellation: cancellation.clone(),
        };
        let input = LoopInput {
            config,
            user_message: text,
            history,
        };

        let outcome = agentic_loop.run_turn(input, deps).await;
        match outcome {
            Ok(outcome) => {
                let mut s = self.inner.state.lock().await;
                for msg in &outcome.messages {
                    s.history.push(msg.clone());
                }
                drop(s);
                for msg in outcome.messages {
                    self.emit(RunnerEvent::Message(msg)).await;
                }
                self.emit(RunnerEvent::LoopComplete).await;
            }
            Err(LoopError::Failed(message)) => {
                error!(agent_id = %self.inner.id, %message, "agent loop turn failed");
                self.emit(RunnerEvent::Error { message }).await;
            }
        }

        self.finish_turn(agentic_loop).await;
    }

    /// Clears the busy flag, applies any deferred pause/stop, resets
    /// cancellation flags, and pops the next queued turn if one is waiting.
    ///
    /// Returns a boxed future (rather than a plain `async fn`) because this
    /// function and `run_turn`/`spawn_turn` are mutually recursive through
    /// `tokio::spawn`; without a nominal, already-known-`Send` return type
    /// here, rustc's auto-trait solver hits a cycle trying to prove the
    /// spawned future is `Send`.
    fn finish_turn(
        &self,
        agentic_loop: Arc<dyn AgenticLoop>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let (next, deferred_stop, deferred_pause, deferred_intervene) = {
                let mut s = self.inner.state.lock().await;
                s.busy = false;
                s.cancellation.reset();
                let deferred_stop = std::mem::take(&mut s.stop_deferred);
                let deferred_pause = std::mem::take(&mut s.pause_deferred);
                let deferred_intervene = std::mem::take(&mut s.intervene_deferred);
                if deferred_intervene {
                    s.intervene_paused = true;
                }
                let next = if !deferred_stop && !deferred_intervene {
                    s.queued.take()
                } else {
                    s.queued = None;
                    None
                };
                if next.is_some() {
                    s.busy = true;
                }
                (next, deferred_stop, deferred_pause, deferred_intervene)
            };

            if deferred_stop {
                self.set_state(RunnerState::Stopped).await;
                return;
            }
            if deferred_pause || deferred_intervene {
                self.set_state(RunnerState::Paused).await;
                return;
            }
            if let Some(turn) = next {
                self.spawn_turn(agentic_loop, turn.text, turn.kind).await;
            }
        })
    }

    /// Serializes the runner to a session snapshot for persistence.
    pub async fn serialize(&self) -> RunnerSnapshot {
        let s = self.inner.state.lock().await;
        let mut metadata = s.metadata.clone();
        metadata.serialized_at = Some(chrono::Utc::now());
        RunnerSnapshot {
            id: self.inner.id.clone(),
            state: s.state,
            history: s.history.clone(),
            dom: s.dom.clone(),
            metadata,
            config: self.inner.config.lock().await.clone(),
        }
    }
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct RunnerSnapshot {
    pub id: String,
    pub state: RunnerState,
    pub history: Vec<Message>,
    pub dom: DomSnapshot,
    pub metadata: SessionMetadata,
    pub config: AgentConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NetworkPolicy, Role};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn test_config() -> AgentConfig {
        AgentConfig {
            model: "test-model".into(),
            provider: "test".into(),
            system_prompt: None,
            tool_catalog: vec![],
            token_budget: None,
            cost_budget: None,
            network_policy: NetworkPolicy::Allow,
        }
    }

    struct EchoLoop;

    #[async_trait]
    impl AgenticLoop for EchoLoop {
        async fn run_turn(
            &self,
            input: LoopInput,
            deps: LoopDependencies,
        ) -> Result<LoopOutcome, LoopError> {
            (deps.emit)(AgentLoopEvent::TextDelta {
                text: input.user_message.clone(),
            });
            (deps.emit)(AgentLoopEvent::TurnEnd);
            Ok(LoopOutcome {
                messages: vec![loop_contract::text_message(format!(
                    "echo: {}",
                    input.user_message
                ))],
            })
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

    fn test_runner() -> AgentRunner {
        AgentRunner::new(
            "agent-1",
            test_config(),
            Some(Arc::new(EchoLoop)),
            Arc::new(NullProviderAdapter),
            Arc::new(NoopExecutor),
        )
    }

    #[tokio::test]
    async fn happy_path_loop() {
        let runner = test_runner();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        let _sub = runner
            .on_event(move |event| {
                if matches!(event, RunnerEvent::LoopComplete) {
                    done2.fetch_add(1, AtomicOrdering::SeqCst);
                }
            })
            .await;

        runner.start().await.unwrap();
        assert_eq!(runner.state().await, RunnerState::Running);

        runner.send_message("hello", None).await.unwrap();

        for _ in 0..50 {
            if done.load(AtomicOrdering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(done.load(AtomicOrdering::SeqCst), 1);

        let history = runner.history().await;
        assert_eq!(history.len(), 2);
        assert!(history[0].in_llm_context());
    }

    #[tokio::test]
    async fn send_message_requires_running_state() {
        let runner = test_runner();
        let err = runner.send_message("hi", None).await.unwrap_err();
        assert_eq!(err, RunnerError::NotRunning);
    }

    #[tokio::test]
    async fn intervene_start_pauses_idle_runner() {
        let runner = test_runner();
        runner.start().await.unwrap();
        runner.intervene_start().await;
        assert_eq!(runner.state().await, RunnerState::Paused);
    }

    #[tokio::test]
    async fn intervene_end_resumes_and_drives_a_turn() {
        let runner = test_runner();
        let done = Arc::new(AtomicUsize::new(0));
        let done2 = done.clone();
        let _sub = runner
            .on_event(move |event| {
                if matches!(event, RunnerEvent::LoopComplete) {
                    done2.fetch_add(1, AtomicOrdering::SeqCst);
                }
            })
            .await;

        runner.start().await.unwrap();
        runner.intervene_start().await;
        assert_eq!(runner.state().await, RunnerState::Paused);

        runner
            .intervene_end(Some("took control, fixed the form".into()))
            .await;
        assert_eq!(runner.state().await, RunnerState::Running);

        for _ in 0..50 {
            if done.load(AtomicOrdering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(done.load(AtomicOrdering::SeqCst), 1);

        let history = runner.history().await;
        assert_eq!(history.len(), 2);
        assert!(matches!(
            history[0].message_type,
            Some(MessageType::Intervention)
        ));
        assert!(matches!(history[1].role, Some(Role::Assistant)));
    }

    #[tokio::test]
    async fn intervene_end_is_a_noop_without_a_matching_intervene_start() {
        let runner = test_runner();
        runner.start().await.unwrap();
        runner.intervene_end(Some("ignored".into())).await;
        assert_eq!(runner.state().await, RunnerState::Running);
        assert!(runner.history().await.is_empty());
    }

    #[tokio::test]
    async fn inert_runner_accepts_messages_without_loop() {
        let runner = AgentRunner::new(
            "agent-2",
            test_config(),
            None,
            Arc::new(NullProviderAdapter),
            Arc::new(NoopExecutor),
        );
        runner.send_message("no loop needed", None).await.unwrap();
        assert_eq!(runner.history().await.len(), 1);
    }

    #[tokio::test]
    async fn pause_and_resume_when_idle() {
        let runner = test_runner();
        runner.start().await.unwrap();
        runner.pause().await.unwrap();
        assert_eq!(runner.state().await, RunnerState::Paused);
        runner.resume().await.unwrap();
        assert_eq!(runner.state().await, RunnerState::Running);
    }

    #[tokio::test]
    async fn kill_stops_from_any_state() {
        let runner = test_runner();
        runner.kill().await;
        assert_eq!(runner.state().await, RunnerState::Stopped);
    }
}
