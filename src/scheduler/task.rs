//! Task aggregate and its status state machine.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ValidationError;

pub const MIN_TASK_PRIORITY: u8 = 1;
pub const MAX_TASK_PRIORITY: u8 = 10;

/// Lifecycle states of a task.
///
/// ```text
/// Pending ─▶ Assigned ─▶ Running ─▶ Succeeded
///    │           │          ├─▶ Failed ───▶ Pending (retry)
///    │           │          ├─▶ TimedOut ─▶ Pending (retry)
///    ▼           ▼          ▼
/// Cancelled  Cancelled  Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    /// Whether moving from `self` to `next` is a legal edge.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, Cancelled)
                | (Assigned, Running)
                | (Assigned, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, Cancelled)
                | (Failed, Pending)
                | (Failed, Cancelled)
                | (TimedOut, Pending)
                | (TimedOut, Cancelled)
        )
    }

    /// Succeeded and Cancelled are always terminal. Failed and TimedOut are
    /// terminal only once retries are exhausted, which the task itself knows.
    pub fn is_always_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A task submission, before the scheduler takes ownership of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task category, matched against worker capabilities.
    pub kind: String,
    pub session_id: Option<String>,
    /// 1..=10, higher runs first.
    pub priority: u8,
    pub input: Value,
    /// Ids of tasks that must succeed before this one runs.
    pub dependencies: Vec<Uuid>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    /// Pin execution to one specific worker instead of policy selection.
    pub target_worker: Option<String>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            session_id: None,
            priority: 5,
            input: Value::Null,
            dependencies: Vec::new(),
            timeout: None,
            max_retries: None,
            target_worker: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_dependency(mut self, id: Uuid) -> Self {
        self.dependencies.push(id);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_target_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.target_worker = Some(worker_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.kind.trim().is_empty() {
            return Err(ValidationError::MissingKind);
        }
        if !(MIN_TASK_PRIORITY..=MAX_TASK_PRIORITY).contains(&self.priority) {
            return Err(ValidationError::PriorityOutOfRange {
                value: self.priority,
                min: MIN_TASK_PRIORITY,
                max: MAX_TASK_PRIORITY,
            });
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(ValidationError::ZeroTimeout);
        }
        let mut seen = HashSet::new();
        for dep in &self.dependencies {
            if !seen.insert(*dep) {
                return Err(ValidationError::DuplicateDependency { id: *dep });
            }
        }
        Ok(())
    }
}

/// A scheduled task. Owned by the scheduler's task table; everything else
/// refers to it by id.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub kind: String,
    pub priority: u8,
    pub status: TaskStatus,
    /// Dependencies not yet succeeded. Drained as upstream tasks complete.
    pub dependencies: HashSet<Uuid>,
    /// When set, the scheduler dispatches only to this worker.
    pub target_worker: Option<String>,
    pub assigned_worker: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout: Duration,
    /// 0.0..=1.0
    pub progress: f64,
    pub input: Value,
    pub output: Value,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub collaboration_id: Option<Uuid>,
}

impl Task {
    pub fn from_spec(spec: TaskSpec, default_timeout: Duration, default_max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: spec.session_id,
            kind: spec.kind,
            priority: spec.priority,
            status: TaskStatus::Pending,
            dependencies: spec.dependencies.into_iter().collect(),
            target_worker: spec.target_worker,
            assigned_worker: None,
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            timeout: spec.timeout.unwrap_or(default_timeout),
            progress: 0.0,
            input: spec.input,
            output: Value::Null,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            collaboration_id: None,
        }
    }

    /// Move to `next`, updating timestamps. Returns false (and leaves the task
    /// untouched) on an illegal edge.
    pub fn transition_to(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        match next {
            TaskStatus::Running => {
                self.started_at = Some(Utc::now());
            }
            TaskStatus::Succeeded
            | TaskStatus::Failed
            | TaskStatus::TimedOut
            | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending => {
                // Retry: reset execution state for the next attempt.
                self.assigned_worker = None;
                self.started_at = None;
                self.completed_at = None;
                self.progress = 0.0;
                self.error = None;
            }
            TaskStatus::Assigned => {}
        }
        self.status = next;
        true
    }

    /// Ready to be scheduled: pending with no unresolved dependencies.
    pub fn is_ready(&self) -> bool {
        self.status == TaskStatus::Pending && self.dependencies.is_empty()
    }

    /// Running longer than its timeout allows.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        match self.started_at {
            Some(started) => {
                now.signed_duration_since(started).to_std().unwrap_or(std::time::Duration::ZERO)
                    > self.timeout
            }
            None => false,
        }
    }

    pub fn can_retry(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::TimedOut)
            && self.retry_count < self.max_retries
    }

    /// Terminal means no further transitions will happen.
    pub fn is_terminal(&self) -> bool {
        self.status.is_always_terminal()
            || (matches!(self.status, TaskStatus::Failed | TaskStatus::TimedOut)
                && self.retry_count >= self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_lifecycle_edges() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Running));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(TimedOut));
        assert!(Failed.can_transition_to(Pending));
        assert!(TimedOut.can_transition_to(Pending));
        for status in [Pending, Assigned, Running, Failed, TimedOut] {
            assert!(status.can_transition_to(Cancelled), "{status} -> cancelled");
        }
    }

    #[test]
    fn illegal_edges_are_rejected() {
        use TaskStatus::*;
        assert!(!Pending.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Succeeded.can_transition_to(Pending));
        assert!(!Succeeded.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Pending));
        assert!(!Running.can_transition_to(Assigned));
    }

    #[test]
    fn transition_updates_timestamps_and_rejects_bad_edges() {
        let mut task = Task::from_spec(TaskSpec::new("search"), Duration::from_secs(60), 3);
        assert!(task.transition_to(TaskStatus::Assigned));
        assert!(task.transition_to(TaskStatus::Running));
        assert!(task.started_at.is_some());
        assert!(!task.transition_to(TaskStatus::Assigned));
        assert_eq!(task.status, TaskStatus::Running);
        assert!(task.transition_to(TaskStatus::Succeeded));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn retry_reset_clears_execution_state() {
        let mut task = Task::from_spec(TaskSpec::new("search"), Duration::from_secs(60), 3);
        task.transition_to(TaskStatus::Assigned);
        task.assigned_worker = Some("w1".into());
        task.transition_to(TaskStatus::Running);
        task.error = Some("boom".into());
        task.transition_to(TaskStatus::Failed);
        task.retry_count += 1;
        assert!(task.can_retry());
        assert!(task.transition_to(TaskStatus::Pending));
        assert!(task.assigned_worker.is_none());
        assert!(task.started_at.is_none());
        assert!(task.error.is_none());
        assert_eq!(task.progress, 0.0);
    }

    #[test]
    fn failed_is_terminal_only_after_retries_exhausted() {
        let mut task = Task::from_spec(
            TaskSpec::new("search").with_max_retries(1),
            Duration::from_secs(60),
            3,
        );
        task.transition_to(TaskStatus::Assigned);
        task.transition_to(TaskStatus::Running);
        task.transition_to(TaskStatus::Failed);
        assert!(!task.is_terminal());
        task.retry_count = 1;
        assert!(task.is_terminal());
        assert!(!task.can_retry());
    }

    #[test]
    fn spec_validation() {
        assert!(TaskSpec::new("search").validate().is_ok());
        assert!(matches!(
            TaskSpec::new("  ").validate(),
            Err(ValidationError::MissingKind)
        ));
        assert!(matches!(
            TaskSpec::new("search").with_priority(0).validate(),
            Err(ValidationError::PriorityOutOfRange { .. })
        ));
        assert!(matches!(
            TaskSpec::new("search").with_priority(11).validate(),
            Err(ValidationError::PriorityOutOfRange { .. })
        ));
        assert!(matches!(
            TaskSpec::new("search").with_timeout(Duration::ZERO).validate(),
            Err(ValidationError::ZeroTimeout)
        ));
        let dep = Uuid::new_v4();
        assert!(matches!(
            TaskSpec::new("search")
                .with_dependency(dep)
                .with_dependency(dep)
                .validate(),
            Err(ValidationError::DuplicateDependency { .. })
        ));
    }

    #[test]
    fn readiness_requires_empty_dependencies() {
        let dep = Uuid::new_v4();
        let mut task = Task::from_spec(
            TaskSpec::new("search").with_dependency(dep),
            Duration::from_secs(60),
            3,
        );
        assert!(!task.is_ready());
        task.dependencies.remove(&dep);
        assert!(task.is_ready());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::TimedOut).unwrap(),
            "\"timed_out\""
        );
    }
}
