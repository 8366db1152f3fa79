//! Cron and event-driven triggers that wake idle agents or fire stored tool
//! calls without LLM involvement. Evaluation runs on a central timing loop;
//! dispatch lands on the target agent's own serial queue via `ScheduleTarget`.

pub mod cron;

use crate::model::{Schedule, SchedulePayload, Trigger, MAX_SCHEDULES_PER_AGENT};
use crate::EscalationCondition;
use async_trait::async_trait;
use cron::CronSchedule;
use dashmap::DashMap;
use tracing::error;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("agent already has the maximum of {MAX_SCHEDULES_PER_AGENT} schedules")]
    CapExceeded,
    #[error("cron expression invalid: {0}")]
    InvalidCron(#[from] cron::CronError),
    #[error("schedule not found: {0}")]
    NotFound(String),
}

/// Abstraction over an agent runner + tool pipeline so the scheduler doesn't
/// depend on `runner` directly (it's driven by whatever owns both).
#[async_trait]
pub trait ScheduleTarget: Send + Sync {
    async fn is_busy(&self) -> bool;
    async fn dispatch_message(&self, text: &str);
    async fn dispatch_tool(&self, name: &str, input: serde_json::Value) -> Result<serde_json::Value, String>;
}

struct AgentSchedules {
    schedules: Vec<Schedule>,
}

#[derive(Default)]
pub struct Scheduler {
    by_agent: DashMap<String, AgentSchedules>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_schedule(&self, agent_id: &str, schedule: Schedule) -> Result<(), SchedulerError> {
        if let Trigger::Cron { expression } = &schedule.trigger {
            let cron_schedule = CronSchedule::parse(expression)?;
            let _ = cron_schedule;
            let minute_field = expression.split_whitespace().next().unwrap_or("*");
            cron::enforce_minimum_interval(minute_field)?;
        }
        let mut entry = self
            .by_agent
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentSchedules { schedules: Vec::new() });
        if entry.schedules.len() >= MAX_SCHEDULES_PER_AGENT {
            return Err(SchedulerError::CapExceeded);
        }
        entry.schedules.push(schedule);
        Ok(())
    }

    pub fn remove_schedule(&self, agent_id: &str, schedule_id: &str) -> Result<(), SchedulerError> {
        let mut entry = self
            .by_agent
            .get_mut(agent_id)
            .ok_or_else(|| SchedulerError::NotFound(schedule_id.to_string()))?;
        let before = entry.schedules.len();
        entry.schedules.retain(|s| s.id != schedule_id);
        if entry.schedules.len() == before {
            return Err(SchedulerError::NotFound(schedule_id.to_string()));
        }
        Ok(())
    }

    pub fn list_schedules(&self, agent_id: &str) -> Vec<Schedule> {
        self.by_agent
            .get(agent_id)
            .map(|e| e.schedules.clone())
            .unwrap_or_default()
    }

    /// Evaluates cron triggers for one agent at `now`, silently skipping if
    /// the target is busy (cron triggers never queue).
    pub async fn tick_agent(
        &self,
        agent_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        target: &dyn ScheduleTarget,
    ) {
        let due: Vec<usize> = {
            let Some(entry) = self.by_agent.get(agent_id) else {
                return;
            };
            entry
                .schedules
                .iter()
                .enumerate()
                .filter_map(|(i, s)| match (&s.trigger, s.enabled) {
                    (Trigger::Cron { expression }, true) => {
                        CronSchedule::parse(expression)
                            .ok()
                            .filter(|c| c.matches(now))
                            .map(|_| i)
                    }
                    _ => None,
                })
                .collect()
        };

        for idx in due {
            if target.is_busy().await {
                // Busy-skip: the trigger fired but is silently dropped.
                continue;
            }
            self.run_schedule_at(agent_id, idx, target).await;
        }
    }

    /// Evaluates event triggers matching `event_name` for one agent.
    pub async fn on_event(
        &self,
        agent_id: &str,
        event_name: &str,
        previous: Option<&serde_json::Value>,
        new: &serde_json::Value,
        target: &dyn ScheduleTarget,
    ) {
        let due: Vec<usize> = {
            let Some(entry) = self.by_agent.get(agent_id) else {
                return;
            };
            entry
                .schedules
                .iter()
                .enumerate()
                .filter_map(|(i, s)| match (&s.trigger, s.enabled) {
                    (Trigger::Event { event_name: name, condition }, true) if name == event_name => {
                        let cond = EscalationCondition::parse(condition);
                        cond.evaluate(previous, new).then_some(i)
                    }
                    _ => None,
                })
                .collect()
        };

        for idx in due {
            if target.is_busy().await {
                continue;
            }
            self.run_schedule_at(agent_id, idx, target).await;
        }
    }

    async fn run_schedule_at(&self, agent_id: &str, idx: usize, target: &dyn ScheduleTarget) {
        let (payload, schedule_id, max_runs, run_count) = {
            let Some(entry) = self.by_agent.get(agent_id) else {
                return;
            };
            let Some(schedule) = entry.schedules.get(idx) else {
                return;
            };
            (
                schedule.payload.clone(),
                schedule.id.clone(),
                schedule.max_runs,
                schedule.run_count,
            )
        };

        match &payload {
            SchedulePayload::Message { text } => target.dispatch_message(text).await,
            SchedulePayload::Tool { name, input } => {
                if let Err(err) = target.dispatch_tool(name, input.clone()).await {
                    error!(agent_id, schedule_id, %err, "scheduled tool call failed");
                }
            }
        }

        if let Some(mut entry) = self.by_agent.get_mut(agent_id) {
            if let Some(schedule) = entry.schedules.iter_mut().find(|s| s.id == schedule_id) {
                schedule.run_count += 1;
                schedule.last_run_at = Some(chrono::Utc::now());
                if let Some(max) = max_runs {
                    if schedule.run_count >= max {
                        schedule.enabled = false;
                    }
                }
            }
        }
        let _ = run_count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleKind;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeTarget {
        busy: AtomicBool,
        messages: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScheduleTarget for FakeTarget {
        async fn is_busy(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }
        async fn dispatch_message(&self, text: &str) {
            self.messages.lock().unwrap().push(text.to_string());
        }
        async fn dispatch_tool(&self, _name: &str, _input: serde_json::Value) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!(null))
        }
    }

    fn cron_schedule(id: &str, expression: &str) -> Schedule {
        Schedule {
            id: id.into(),
            kind: ScheduleKind::Cron,
            enabled: true,
            max_runs: None,
            run_count: 0,
            last_run_at: None,
            trigger: Trigger::Cron { expression: expression.into() },
            payload: SchedulePayload::Message { text: "tick".into() },
        }
    }

    #[tokio::test]
    async fn cron_busy_skip_drops_trigger() {
        let scheduler = Scheduler::new();
        scheduler.add_schedule("agent-1", cron_schedule("s1", "*/1 * * * *")).unwrap();
        let target = FakeTarget {
            busy: AtomicBool::new(true),
            messages: std::sync::Mutex::new(Vec::new()),
        };
        let now = chrono::Utc::now();
        scheduler.tick_agent("agent-1", now, &target).await;
        assert!(target.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn schedule_cap_enforced() {
        let scheduler = Scheduler::new();
        for i in 0..MAX_SCHEDULES_PER_AGENT {
            scheduler
                .add_schedule("agent-1", cron_schedule(&format!("s{i}"), "* * * * *"))
                .unwrap();
        }
        let err = scheduler
            .add_schedule("agent-1", cron_schedule("overflow", "* * * * *"))
            .unwrap_err();
        assert_eq!(err, SchedulerError::CapExceeded);
    }

    #[tokio::test]
    async fn max_runs_auto_disables() {
        let scheduler = Scheduler::new();
        let mut schedule = cron_schedule("s1", "* * * * *");
        schedule.max_runs = Some(1);
        scheduler.add_schedule("agent-1", schedule).unwrap();
        let target = FakeTarget {
            busy: AtomicBool::new(false),
            messages: std::sync::Mutex::new(Vec::new()),
        };
        let now = chrono::Utc::now();
        scheduler.tick_agent("agent-1", now, &target).await;
        let schedules = scheduler.list_schedules("agent-1");
        assert!(!schedules[0].enabled);
    }

    #[tokio::test]
    async fn event_trigger_matches_condition() {
        let scheduler = Scheduler::new();
        let schedule = Schedule {
            id: "s1".into(),
            kind: ScheduleKind::Event,
            enabled: true,
            max_runs: None,
            run_count: 0,
            last_run_at: None,
            trigger: Trigger::Event {
                event_name: "state:temperature".into(),
                condition: "> 100".into(),
            },
            payload: SchedulePayload::Message { text: "hot".into() },
        };
        scheduler.add_schedule("agent-1", schedule).unwrap();
        let target = FakeTarget {
            busy: AtomicBool::new(false),
            messages: std::sync::Mutex::new(Vec::new()),
        };
        scheduler
            .on_event("agent-1", "state:temperature", None, &serde_json::json!(150), &target)
            .await;
        assert_eq!(target.messages.lock().unwrap().as_slice(), ["hot"]);
    }
}
