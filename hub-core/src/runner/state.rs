//! Runner observable state and the deferred-transition rules.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerState {
    Pending,
    Running,
    Paused,
    Stopped,
}

impl RunnerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Pending => "pending",
            RunnerState::Running => "running",
            RunnerState::Paused => "paused",
            RunnerState::Stopped => "stopped",
        }
    }
}

/// Error kind for invalid lifecycle operations on `start()`, `send_message()`, and friends.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RunnerError {
    #[error("invalid state transition from {from:?}")]
    InvalidState { from: RunnerState },
    #[error("runner is not running")]
    NotRunning,
}
