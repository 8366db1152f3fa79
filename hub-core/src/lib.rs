//! Core types and runtime for hosting long-lived autonomous agents: the
//! agent runner, wire protocol, stores, scheduler, browser-tool router,
//! sandboxed code executor, session persistence, and the hub registry tying
//! them together. Transport (WebSocket/HTTP) lives in `hub-server`.

pub mod auth;
pub mod hub;
pub mod model;
pub mod protocol;
pub mod rate_limit;
pub mod router;
pub mod runner;
pub mod sandbox;
pub mod scheduler;
pub mod session;
pub mod signing;
pub mod store;

pub use hub::{AgentHandle, AgentHub, Broadcaster, HubError};
pub use model::{
    AgentConfig, ContentBlock, DomSnapshot, EscalationCondition, EscalationRule,
    ListenerRegistration, Message, MessageType, NetworkPolicy, Role, Schedule, SchedulePayload,
    ScheduleKind, SessionMetadata, Trigger,
};
pub use router::{BrowserToolRouter, ClientDirectory};
pub use runner::{AgentRunner, RunnerError, RunnerEvent, RunnerState};
pub use sandbox::{FloBridge, SandboxError, SandboxExecutor};
pub use scheduler::{ScheduleTarget, Scheduler, SchedulerError};
pub use session::{SessionError, SessionStore, SqliteSessionStore};
pub use store::{DomStore, StateStore, StorageStore};
