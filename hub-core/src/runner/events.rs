//! Runner-level lifecycle events delivered to `on_event` subscribers.
//! Distinct from `AgentLoopEvent`, which carries the finer-grained stream
//! from inside a single loop turn.

use super::state::RunnerState;
use crate::model::Message;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunnerEvent {
    StateChange { from: RunnerState, to: RunnerState },
    Message(Message),
    LoopComplete,
    Error { message: String },
    NotifyUser { message: String },
}
