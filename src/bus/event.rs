//! Event envelope and event types flowing through the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Highest priority an event may carry.
pub const MAX_EVENT_PRIORITY: u8 = 10;

/// Kinds of events the control plane publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskAssigned,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    DataUpdated,
    WorkerRegistered,
    CollaborationStarted,
    CollaborationCompleted,
    CollaborationFailed,
    Error,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskAssigned => "task_assigned",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::TaskCancelled => "task_cancelled",
            EventType::DataUpdated => "data_updated",
            EventType::WorkerRegistered => "worker_registered",
            EventType::CollaborationStarted => "collaboration_started",
            EventType::CollaborationCompleted => "collaboration_completed",
            EventType::CollaborationFailed => "collaboration_failed",
            EventType::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// An immutable event envelope. Built once, published, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    /// Component or worker that produced the event.
    pub source_id: String,
    /// Intended recipient, when the event is addressed rather than broadcast.
    pub target_id: Option<String>,
    pub session_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    /// 0..=10, clamped on construction.
    pub priority: u8,
    /// Event that caused this one, for tracing chains of activity.
    pub causation_id: Option<Uuid>,
}

impl Event {
    pub fn new(event_type: EventType, source_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            source_id: source_id.into(),
            target_id: None,
            session_id: None,
            payload: Value::Null,
            timestamp: Utc::now(),
            priority: 5,
            causation_id: None,
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(MAX_EVENT_PRIORITY);
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_is_clamped() {
        let event = Event::new(EventType::TaskCreated, "scheduler").with_priority(200);
        assert_eq!(event.priority, MAX_EVENT_PRIORITY);
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let json = serde_json::to_string(&EventType::CollaborationStarted).unwrap();
        assert_eq!(json, "\"collaboration_started\"");
    }

    #[test]
    fn builder_sets_optional_fields() {
        let cause = Uuid::new_v4();
        let event = Event::new(EventType::TaskAssigned, "scheduler")
            .with_target("worker-1")
            .with_session("session-a")
            .with_causation(cause);
        assert_eq!(event.target_id.as_deref(), Some("worker-1"));
        assert_eq!(event.session_id.as_deref(), Some("session-a"));
        assert_eq!(event.causation_id, Some(cause));
    }
}
