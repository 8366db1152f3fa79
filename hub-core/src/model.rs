//! Core data model: agent session, conversation, schedules, DOM snapshot.
//!
//! These types are shared between the in-memory runner state, the session
//! persistence format, and the wire protocol (conversation history sent to
//! subscribed browsers uses the same `Message` shape the runner stores).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A message role. Absent (`None`) marks an announcement (display-only, no LLM role).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message sub-type, orthogonal to `role`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Intervention,
    Announcement,
}

/// One typed content block inside a message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// One entry in the conversation history.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageType>,
    pub content: Vec<ContentBlock>,
    #[serde(default = "chrono::Utc::now")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Some(Role::User),
            message_type: None,
            content: vec![ContentBlock::Text { text: text.into() }],
            created_at: chrono::Utc::now(),
        }
    }

    pub fn intervention_text(text: impl Into<String>) -> Self {
        Self {
            role: Some(Role::User),
            message_type: Some(MessageType::Intervention),
            content: vec![ContentBlock::Text { text: text.into() }],
            created_at: chrono::Utc::now(),
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Some(Role::Assistant),
            message_type: None,
            content,
            created_at: chrono::Utc::now(),
        }
    }

    pub fn announcement(text: impl Into<String>) -> Self {
        Self {
            role: None,
            message_type: Some(MessageType::Announcement),
            content: vec![ContentBlock::Text { text: text.into() }],
            created_at: chrono::Utc::now(),
        }
    }

    /// True when this message participates in LLM context (has a `role`).
    pub fn in_llm_context(&self) -> bool {
        self.role.is_some()
    }

    /// Migrates a legacy `role=system` message (represented by callers passing
    /// `Some(Role::User)` with a `"system"` marker is not representable anymore;
    /// this helper is used by session deserialization for old snapshots that
    /// stored `"role":"system"` as a bare string field before this schema).
    pub fn migrate_legacy_system(mut self, was_system: bool) -> Self {
        if was_system {
            self.role = None;
            self.message_type = Some(MessageType::Announcement);
        }
        self
    }
}

/// Per-agent configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub model: String,
    pub provider: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tool_catalog: Vec<String>,
    #[serde(default)]
    pub token_budget: Option<u64>,
    #[serde(default)]
    pub cost_budget: Option<f64>,
    #[serde(default)]
    pub network_policy: NetworkPolicy,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    #[default]
    Allow,
    Deny,
    AllowList,
}

/// Cumulative and point-in-time session metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub serialized_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
}

impl SessionMetadata {
    pub fn new() -> Self {
        Self {
            created_at: chrono::Utc::now(),
            serialized_at: None,
            total_tokens: 0,
            total_cost: 0.0,
        }
    }
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered DOM event listener, kept for restoration after reattach.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListenerRegistration {
    pub selector: String,
    pub events: Vec<String>,
    pub target_worker_id: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// DOM snapshot.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DomSnapshot {
    #[serde(default)]
    pub body_html: String,
    #[serde(default)]
    pub body_attrs: HashMap<String, String>,
    #[serde(default)]
    pub head_html: String,
    #[serde(default)]
    pub html_attrs: HashMap<String, String>,
    #[serde(default)]
    pub registered_listeners: Vec<ListenerRegistration>,
    #[serde(default)]
    pub captured_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Escalation rule condition grammar.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCondition {
    Always,
    Changed,
    Gt(serde_json::Value),
    Gte(serde_json::Value),
    Lt(serde_json::Value),
    Lte(serde_json::Value),
    Eq(serde_json::Value),
    Ne(serde_json::Value),
    /// A condition serialized as a free-form predicate string whose producing
    /// runtime is unavailable here; treated as inert (always false) unless it
    /// happens to match one of the grammar forms above.
    Predicate(String),
}

impl EscalationCondition {
    /// Parses the comparison condition string grammar:
    /// `"> 100"`, `"== foo"`, `"changed"`, `"!= X"`, `">= N"`, `"<= N"`, `"< N"`.
    pub fn parse(condition: &str) -> Self {
        let condition = condition.trim();
        if condition.eq_ignore_ascii_case("true") || condition.eq_ignore_ascii_case("always") {
            return EscalationCondition::Always;
        }
        if condition.eq_ignore_ascii_case("changed") {
            return EscalationCondition::Changed;
        }
        let try_op = |op: &str| condition.strip_prefix(op).map(|rest| rest.trim().to_string());
        if let Some(rest) = try_op(">=") {
            return EscalationCondition::Gte(parse_scalar(&rest));
        }
        if let Some(rest) = try_op("<=") {
            return EscalationCondition::Lte(parse_scalar(&rest));
        }
        if let Some(rest) = try_op("==") {
            return EscalationCondition::Eq(parse_scalar(&rest));
        }
        if let Some(rest) = try_op("!=") {
            return EscalationCondition::Ne(parse_scalar(&rest));
        }
        if let Some(rest) = try_op(">") {
            return EscalationCondition::Gt(parse_scalar(&rest));
        }
        if let Some(rest) = try_op("<") {
            return EscalationCondition::Lt(parse_scalar(&rest));
        }
        EscalationCondition::Predicate(condition.to_string())
    }

    /// Evaluates the condition given the previous and new values.
    pub fn evaluate(&self, previous: Option<&serde_json::Value>, new: &serde_json::Value) -> bool {
        use EscalationCondition::*;
        match self {
            Always => true,
            Changed => previous != Some(new),
            Gt(v) => compare_numeric(new, v).map(|o| o.is_gt()).unwrap_or(false),
            Gte(v) => compare_numeric(new, v).map(|o| o.is_ge()).unwrap_or(false),
            Lt(v) => compare_numeric(new, v).map(|o| o.is_lt()).unwrap_or(false),
            Lte(v) => compare_numeric(new, v).map(|o| o.is_le()).unwrap_or(false),
            Eq(v) => new == v,
            Ne(v) => new != v,
            // Inert: the runtime that produced this predicate string is not
            // available here.
            Predicate(_) => false,
        }
    }
}

fn parse_scalar(s: &str) -> serde_json::Value {
    let s = s.trim().trim_matches('"');
    if let Ok(n) = s.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return serde_json::Value::Number(num);
        }
    }
    serde_json::Value::String(s.to_string())
}

fn compare_numeric(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    let a = a.as_f64()?;
    let b = b.as_f64()?;
    a.partial_cmp(&b)
}

/// A per-key escalation rule.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscalationRule {
    pub condition: EscalationCondition,
    pub message: String,
}

/// Schedule trigger kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Event,
}

/// Schedule trigger detail.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Trigger {
    Cron { expression: String },
    Event { event_name: String, condition: String },
}

/// Schedule payload: either wakes the LLM with a message, or runs a stored tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulePayload {
    Message { text: String },
    Tool {
        name: String,
        input: serde_json::Value,
    },
}

/// A single schedule entry (capped at 10 per agent, minimum interval 1 minute).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub kind: ScheduleKind,
    pub enabled: bool,
    pub max_runs: Option<u64>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub last_run_at: Option<chrono::DateTime<chrono::Utc>>,
    pub trigger: Trigger,
    pub payload: SchedulePayload,
}

pub const MAX_SCHEDULES_PER_AGENT: usize = 10;
pub const MIN_SCHEDULE_INTERVAL_SECS: i64 = 60;
pub const MAX_STATE_BYTES: usize = 1024 * 1024;
pub const MAX_STATE_KEYS: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_in_llm_context() {
        assert!(Message::user_text("hi").in_llm_context());
        assert!(!Message::announcement("persisted").in_llm_context());
        assert!(Message::intervention_text("took over").in_llm_context());
    }

    #[test]
    fn escalation_condition_parse_and_eval() {
        let c = EscalationCondition::parse("> 100");
        assert!(c.evaluate(None, &serde_json::json!(150)));
        assert!(!c.evaluate(None, &serde_json::json!(50)));

        let c = EscalationCondition::parse("changed");
        assert!(c.evaluate(Some(&serde_json::json!(1)), &serde_json::json!(2)));
        assert!(!c.evaluate(Some(&serde_json::json!(1)), &serde_json::json!(1)));

        let c = EscalationCondition::parse("== foo");
        assert!(c.evaluate(None, &serde_json::json!("foo")));

        let c = EscalationCondition::parse("always");
        assert!(c.evaluate(None, &serde_json::json!(null)));
    }

    #[test]
    fn escalation_predicate_is_inert() {
        let c = EscalationCondition::parse("state.foo > state.bar * 2");
        assert!(!c.evaluate(None, &serde_json::json!(9999)));
    }
}
