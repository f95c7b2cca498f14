//! Task scheduler: owns the task table, matches ready tasks to workers, and
//! drives timeouts, retries, and cleanup.
//!
//! Dispatch is fire-and-forget: the scheduler emits a targeted `TaskAssigned`
//! event and learns the outcome from a `CompletionReport` sent back over the
//! completion channel. A dependency that ends terminally failed leaves its
//! dependents pending forever; callers that care should cancel them.

pub mod task;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use task::{Task, TaskSpec, TaskStatus};

use crate::bus::{Event, EventBus, EventType};
use crate::config::SchedulerConfig;
use crate::error::{Result, TaskError, ValidationError};
use crate::registry::WorkerRegistry;

const SOURCE: &str = "scheduler";

/// What a worker sends back after finishing (or failing) an assigned task.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub task_id: Uuid,
    pub worker_id: String,
    /// Which attempt this report belongs to, echoed from the assignment
    /// event. Reports for an attempt other than the task's current one are
    /// stale and dropped.
    pub attempt: u32,
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub duration_ms: f64,
}

/// Aggregate counters, exposed through health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    pub total_submitted: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_retries: u64,
    pub avg_task_duration_ms: f64,
    pub uptime_secs: i64,
}

#[derive(Debug, Default)]
struct MetricsInner {
    total_submitted: u64,
    total_succeeded: u64,
    total_failed: u64,
    total_cancelled: u64,
    total_retries: u64,
    duration_sum_ms: f64,
    duration_count: u64,
}

pub struct Scheduler {
    config: SchedulerConfig,
    bus: Arc<EventBus>,
    registry: Arc<WorkerRegistry>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    metrics: RwLock<MetricsInner>,
    completion_tx: mpsc::Sender<CompletionReport>,
    completion_rx: Mutex<Option<mpsc::Receiver<CompletionReport>>>,
    started_at: DateTime<Utc>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, bus: Arc<EventBus>, registry: Arc<WorkerRegistry>) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(config.completion_channel_capacity);
        Self {
            config,
            bus,
            registry,
            tasks: RwLock::new(HashMap::new()),
            metrics: RwLock::new(MetricsInner::default()),
            completion_tx,
            completion_rx: Mutex::new(Some(completion_rx)),
            started_at: Utc::now(),
        }
    }

    /// Sender side of the completion channel, handed to worker harnesses.
    pub fn completion_sender(&self) -> mpsc::Sender<CompletionReport> {
        self.completion_tx.clone()
    }

    /// Validate and accept a submission. Dependencies must reference tasks the
    /// scheduler already knows, which rules out cycles. There is no bound on
    /// the pending set; per-worker concurrency is the only backpressure.
    pub async fn submit(&self, spec: TaskSpec) -> Result<Uuid> {
        self.submit_internal(spec, None).await
    }

    pub(crate) async fn submit_internal(
        &self,
        spec: TaskSpec,
        collaboration_id: Option<Uuid>,
    ) -> Result<Uuid> {
        spec.validate()?;

        let mut task = Task::from_spec(
            spec,
            self.config.default_timeout,
            self.config.default_max_retries,
        );
        task.collaboration_id = collaboration_id;

        {
            let mut tasks = self.tasks.write().await;
            for dep in task.dependencies.clone() {
                match tasks.get(&dep) {
                    None => return Err(ValidationError::UnknownDependency { id: dep }.into()),
                    Some(upstream) if upstream.status == TaskStatus::Succeeded => {
                        task.dependencies.remove(&dep);
                    }
                    Some(_) => {}
                }
            }
            tasks.insert(task.id, task.clone());
        }

        self.metrics.write().await.total_submitted += 1;
        tracing::info!(task_id = %task.id, kind = %task.kind, priority = task.priority, "Task submitted");
        self.bus
            .publish(
                Event::new(EventType::TaskCreated, SOURCE)
                    .with_payload(serde_json::json!({
                        "task_id": task.id,
                        "kind": task.kind,
                        "priority": task.priority,
                    }))
                    .with_priority(task.priority),
            )
            .await;
        Ok(task.id)
    }

    /// One scheduling pass: dispatch ready tasks to workers in priority order,
    /// then run the timeout and retry sweeps.
    pub async fn tick(&self) {
        self.dispatch_ready().await;
        self.timeout_sweep().await;
        self.retry_sweep().await;
    }

    async fn dispatch_ready(&self) {
        let mut ready: Vec<(Uuid, u8, DateTime<Utc>, String, Option<String>)> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|t| t.is_ready())
                .map(|t| {
                    (
                        t.id,
                        t.priority,
                        t.created_at,
                        t.kind.clone(),
                        t.target_worker.clone(),
                    )
                })
                .collect()
        };
        ready.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        for (task_id, _, _, kind, target) in ready {
            let worker_id = match target {
                // Pinned tasks wait for their worker instead of falling back
                // to policy selection.
                Some(target) => match self.registry.get(&target).await {
                    Some(w) if w.available && w.has_spare_capacity() => target,
                    _ => continue,
                },
                None => {
                    let candidates = self
                        .registry
                        .candidates_for(&kind, self.config.load_policy)
                        .await;
                    let Some(worker) = candidates.first() else {
                        // No capable worker right now; the task stays pending.
                        continue;
                    };
                    worker.worker_id.clone()
                }
            };

            if self.registry.reserve_slot(&worker_id).await.is_err() {
                continue;
            }

            let dispatched = {
                let mut tasks = self.tasks.write().await;
                match tasks.get_mut(&task_id) {
                    Some(task) if task.is_ready() => {
                        task.assigned_worker = Some(worker_id.clone());
                        task.transition_to(TaskStatus::Assigned)
                            && task.transition_to(TaskStatus::Running)
                    }
                    _ => false,
                }
            };
            if !dispatched {
                self.registry.release_slot(&worker_id).await;
                continue;
            }

            let (input, session_id, attempt) = {
                let tasks = self.tasks.read().await;
                let task = &tasks[&task_id];
                (task.input.clone(), task.session_id.clone(), task.retry_count)
            };
            tracing::info!(task_id = %task_id, worker_id = %worker_id, attempt, "Task dispatched");
            let mut event = Event::new(EventType::TaskAssigned, SOURCE)
                .with_target(&worker_id)
                .with_payload(serde_json::json!({
                    "task_id": task_id,
                    "kind": kind,
                    "attempt": attempt,
                    "input": input,
                }));
            if let Some(session) = session_id {
                event = event.with_session(session);
            }
            self.bus.publish(event).await;
        }
    }

    /// Move running tasks past their deadline to TimedOut and free their slots.
    pub async fn timeout_sweep(&self) {
        let now = Utc::now();
        let expired: Vec<Uuid> = {
            let tasks = self.tasks.read().await;
            tasks
                .values()
                .filter(|t| t.is_expired(now))
                .map(|t| t.id)
                .collect()
        };

        for task_id in expired {
            let (worker, timeout, session_id) = {
                let mut tasks = self.tasks.write().await;
                match tasks.get_mut(&task_id) {
                    Some(task) if task.is_expired(now) => {
                        let worker = task.assigned_worker.clone();
                        task.error = Some(format!("timed out after {:?}", task.timeout));
                        task.transition_to(TaskStatus::TimedOut);
                        (worker, task.timeout, task.session_id.clone())
                    }
                    _ => continue,
                }
            };
            tracing::warn!(task_id = %task_id, "Task timed out");
            if let Some(worker_id) = worker {
                self.registry.release_slot(&worker_id).await;
                self.registry
                    .record_outcome(&worker_id, false, timeout.as_millis() as f64)
                    .await;
            }
            let mut event =
                Event::new(EventType::TaskFailed, SOURCE).with_payload(serde_json::json!({
                    "task_id": task_id,
                    "reason": "timeout",
                }));
            if let Some(session) = session_id {
                event = event.with_session(session);
            }
            self.bus.publish(event).await;
        }
    }

    /// Requeue failed and timed-out tasks that still have retry budget.
    pub async fn retry_sweep(&self) {
        let mut retried = 0u64;
        {
            let mut tasks = self.tasks.write().await;
            for task in tasks.values_mut() {
                if task.can_retry() {
                    task.retry_count += 1;
                    let attempt = task.retry_count;
                    if task.transition_to(TaskStatus::Pending) {
                        retried += 1;
                        tracing::info!(
                            task_id = %task.id,
                            attempt,
                            max = task.max_retries,
                            "Retrying task"
                        );
                    }
                }
            }
        }
        if retried > 0 {
            self.metrics.write().await.total_retries += retried;
        }
    }

    /// Apply a worker's completion report. Idempotent: reports for tasks that
    /// are not running, from a worker the task is not assigned to, or for an
    /// attempt other than the current one are dropped, so neither a duplicate
    /// report nor a zombie report from a timed-out attempt can double-free a
    /// slot, kill a live retry, or re-emit completion events.
    pub async fn report_completion(&self, report: CompletionReport) {
        let applied = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&report.task_id) {
                Some(task)
                    if task.status == TaskStatus::Running
                        && task.assigned_worker.as_deref() == Some(&report.worker_id)
                        && task.retry_count == report.attempt =>
                {
                    if report.success {
                        task.output = report.output.clone();
                        task.progress = 1.0;
                        task.transition_to(TaskStatus::Succeeded);
                    } else {
                        task.error = report.error.clone();
                        task.transition_to(TaskStatus::Failed);
                    }
                    true
                }
                _ => {
                    tracing::debug!(
                        task_id = %report.task_id,
                        worker_id = %report.worker_id,
                        "Dropping stale completion report"
                    );
                    false
                }
            }
        };
        if !applied {
            return;
        }

        self.registry.release_slot(&report.worker_id).await;
        self.registry
            .record_outcome(&report.worker_id, report.success, report.duration_ms)
            .await;

        {
            let mut metrics = self.metrics.write().await;
            if report.success {
                metrics.total_succeeded += 1;
            } else {
                metrics.total_failed += 1;
            }
            metrics.duration_sum_ms += report.duration_ms;
            metrics.duration_count += 1;
        }

        if report.success {
            self.resolve_dependents(report.task_id).await;
        }
        let session_id = {
            let tasks = self.tasks.read().await;
            tasks.get(&report.task_id).and_then(|t| t.session_id.clone())
        };

        let (event_type, payload) = if report.success {
            (
                EventType::TaskCompleted,
                serde_json::json!({
                    "task_id": report.task_id,
                    "worker_id": report.worker_id,
                    "output": report.output,
                }),
            )
        } else {
            (
                EventType::TaskFailed,
                serde_json::json!({
                    "task_id": report.task_id,
                    "worker_id": report.worker_id,
                    "reason": report.error,
                }),
            )
        };
        let mut event = Event::new(event_type, SOURCE).with_payload(payload);
        if let Some(session) = session_id {
            event = event.with_session(session);
        }
        self.bus.publish(event).await;
    }

    /// Drop the succeeded task from every dependent's remaining set.
    async fn resolve_dependents(&self, succeeded: Uuid) {
        let mut tasks = self.tasks.write().await;
        for task in tasks.values_mut() {
            task.dependencies.remove(&succeeded);
        }
    }

    /// Cancel a task from any non-terminal state, releasing its worker slot
    /// exactly once.
    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        let worker = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id).ok_or(TaskError::NotFound { id: task_id })?;
            if task.is_terminal() {
                return Err(TaskError::AlreadyTerminal {
                    id: task_id,
                    status: task.status.to_string(),
                }
                .into());
            }
            let worker = if task.status == TaskStatus::Running || task.status == TaskStatus::Assigned
            {
                task.assigned_worker.clone()
            } else {
                None
            };
            if !task.transition_to(TaskStatus::Cancelled) {
                return Err(TaskError::InvalidTransition {
                    id: task_id,
                    from: task.status.to_string(),
                    to: TaskStatus::Cancelled.to_string(),
                }
                .into());
            }
            worker
        };

        if let Some(worker_id) = worker {
            self.registry.release_slot(&worker_id).await;
        }
        self.metrics.write().await.total_cancelled += 1;
        tracing::info!(task_id = %task_id, "Task cancelled");
        self.bus
            .publish(
                Event::new(EventType::TaskCancelled, SOURCE)
                    .with_payload(serde_json::json!({ "task_id": task_id })),
            )
            .await;
        Ok(())
    }

    pub async fn task(&self, task_id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    pub async fn list_tasks(
        &self,
        session_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| session_id.is_none_or(|s| t.session_id.as_deref() == Some(s)))
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub async fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let tasks = self.tasks.read().await;
        let mut counts = HashMap::new();
        for task in tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    pub async fn metrics(&self) -> SchedulerMetrics {
        let inner = self.metrics.read().await;
        SchedulerMetrics {
            total_submitted: inner.total_submitted,
            total_succeeded: inner.total_succeeded,
            total_failed: inner.total_failed,
            total_cancelled: inner.total_cancelled,
            total_retries: inner.total_retries,
            avg_task_duration_ms: if inner.duration_count > 0 {
                inner.duration_sum_ms / inner.duration_count as f64
            } else {
                0.0
            },
            uptime_secs: Utc::now().signed_duration_since(self.started_at).num_seconds(),
        }
    }

    /// Drop terminal tasks whose completion is older than the retention
    /// window. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention).unwrap_or(chrono::Duration::hours(24));
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| {
            !(t.is_terminal() && t.completed_at.is_some_and(|done| done < cutoff))
        });
        let removed = before - tasks.len();
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up old terminal tasks");
        }
        removed
    }

    /// Spawn the scheduling loop, the completion consumer, and the cleanup
    /// loop. Callable once; the completion receiver is consumed.
    pub async fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.tick_interval);
            loop {
                interval.tick().await;
                scheduler.tick().await;
            }
        }));

        if let Some(mut rx) = self.completion_rx.lock().await.take() {
            let scheduler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                while let Some(report) = rx.recv().await {
                    scheduler.report_completion(report).await;
                }
            }));
        }

        let scheduler = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.cleanup_interval);
            loop {
                interval.tick().await;
                scheduler.cleanup().await;
            }
        }));

        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::registry::WorkerCapability;
    use std::time::Duration;

    fn scheduler() -> Arc<Scheduler> {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        let registry = Arc::new(WorkerRegistry::new());
        Arc::new(Scheduler::new(SchedulerConfig::default(), bus, registry))
    }

    async fn add_worker(s: &Scheduler, id: &str, category: &str, max: usize) {
        s.registry
            .register(WorkerCapability::new(
                id,
                "test",
                [category.to_string()],
                max,
            ))
            .await
            .unwrap();
    }

    fn report(task_id: Uuid, worker_id: &str, attempt: u32, success: bool) -> CompletionReport {
        CompletionReport {
            task_id,
            worker_id: worker_id.to_string(),
            attempt,
            success,
            output: serde_json::json!({"ok": success}),
            error: (!success).then(|| "boom".to_string()),
            duration_ms: 10.0,
        }
    }

    #[tokio::test]
    async fn submit_rejects_unknown_dependency() {
        let s = scheduler();
        let err = s
            .submit(TaskSpec::new("search").with_dependency(Uuid::new_v4()))
            .await;
        assert!(matches!(
            err,
            Err(crate::error::Error::Validation(
                ValidationError::UnknownDependency { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn tick_without_workers_leaves_tasks_pending() {
        let s = scheduler();
        let id = s.submit(TaskSpec::new("search")).await.unwrap();
        s.tick().await;
        assert_eq!(s.task(id).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn dispatch_runs_highest_priority_first() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let low = s.submit(TaskSpec::new("search").with_priority(2)).await.unwrap();
        let high = s.submit(TaskSpec::new("search").with_priority(9)).await.unwrap();

        s.tick().await;
        assert_eq!(s.task(high).await.unwrap().status, TaskStatus::Running);
        assert_eq!(s.task(low).await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn dependency_gates_dispatch_until_upstream_succeeds() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 2).await;
        let upstream = s.submit(TaskSpec::new("search")).await.unwrap();
        let downstream = s
            .submit(TaskSpec::new("search").with_dependency(upstream))
            .await
            .unwrap();

        s.tick().await;
        assert_eq!(s.task(upstream).await.unwrap().status, TaskStatus::Running);
        assert_eq!(s.task(downstream).await.unwrap().status, TaskStatus::Pending);

        s.report_completion(report(upstream, "w1", 0, true)).await;
        s.tick().await;
        assert_eq!(s.task(downstream).await.unwrap().status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn duplicate_completion_report_is_dropped() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let id = s.submit(TaskSpec::new("search")).await.unwrap();
        s.tick().await;

        s.report_completion(report(id, "w1", 0, true)).await;
        s.report_completion(report(id, "w1", 0, true)).await;

        assert_eq!(s.task(id).await.unwrap().status, TaskStatus::Succeeded);
        assert_eq!(s.registry.get("w1").await.unwrap().current_load, 0);
        assert_eq!(s.metrics().await.total_succeeded, 1);
    }

    #[tokio::test]
    async fn failed_task_retries_until_success() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let id = s.submit(TaskSpec::new("search").with_max_retries(3)).await.unwrap();

        for attempt in 0..2 {
            s.tick().await; // dispatch
            s.report_completion(report(id, "w1", attempt, false)).await;
            s.tick().await; // retry sweep requeues
        }
        s.tick().await;
        s.report_completion(report(id, "w1", 2, true)).await;

        let task = s.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.retry_count, 2);
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn retries_exhaust_to_terminal_failed() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let id = s.submit(TaskSpec::new("search").with_max_retries(1)).await.unwrap();

        s.tick().await; // dispatch
        s.report_completion(report(id, "w1", 0, false)).await;
        s.tick().await; // retry sweep requeues
        s.tick().await; // redispatch
        s.report_completion(report(id, "w1", 1, false)).await;
        s.tick().await;

        let task = s.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.is_terminal());
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn timeout_sweep_times_out_and_requeues() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let id = s
            .submit(
                TaskSpec::new("search")
                    .with_timeout(Duration::from_millis(10))
                    .with_max_retries(1),
            )
            .await
            .unwrap();

        s.tick().await;
        assert_eq!(s.task(id).await.unwrap().status, TaskStatus::Running);
        tokio::time::sleep(Duration::from_millis(30)).await;

        s.timeout_sweep().await;
        assert_eq!(s.task(id).await.unwrap().status, TaskStatus::TimedOut);
        assert_eq!(s.registry.get("w1").await.unwrap().current_load, 0);

        s.retry_sweep().await;
        let task = s.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn cancel_releases_slot_once_and_rejects_terminal() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let id = s.submit(TaskSpec::new("search")).await.unwrap();
        s.tick().await;

        s.cancel(id).await.unwrap();
        assert_eq!(s.task(id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(s.registry.get("w1").await.unwrap().current_load, 0);
        assert!(s.cancel(id).await.is_err());
        assert_eq!(s.registry.get("w1").await.unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn worker_load_never_exceeds_capacity_under_dispatch() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 2).await;
        for _ in 0..5 {
            s.submit(TaskSpec::new("search")).await.unwrap();
        }
        s.tick().await;

        assert_eq!(s.registry.get("w1").await.unwrap().current_load, 2);
        let counts = s.status_counts().await;
        assert_eq!(counts.get(&TaskStatus::Running), Some(&2));
        assert_eq!(counts.get(&TaskStatus::Pending), Some(&3));
    }

    #[tokio::test]
    async fn cleanup_removes_old_terminal_tasks() {
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        let registry = Arc::new(WorkerRegistry::new());
        let config = SchedulerConfig {
            retention: Duration::from_millis(1),
            ..Default::default()
        };
        let s = Arc::new(Scheduler::new(config, bus, registry));
        add_worker(&s, "w1", "search", 1).await;

        let id = s.submit(TaskSpec::new("search")).await.unwrap();
        s.tick().await;
        s.report_completion(report(id, "w1", 0, true)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(s.cleanup().await, 1);
        assert!(s.task(id).await.is_none());
    }

    #[tokio::test]
    async fn zombie_report_from_timed_out_attempt_does_not_kill_retry() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let id = s
            .submit(
                TaskSpec::new("search")
                    .with_timeout(Duration::from_millis(10))
                    .with_max_retries(1),
            )
            .await
            .unwrap();

        s.tick().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        s.tick().await; // times out and requeues
        s.tick().await; // retry dispatches, on the same worker

        let task = s.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.retry_count, 1);

        // The hung first attempt finally reports failure; it must not be
        // applied to the retry that is running now.
        s.report_completion(report(id, "w1", 0, false)).await;
        let task = s.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(s.registry.get("w1").await.unwrap().current_load, 1);

        s.report_completion(report(id, "w1", 1, true)).await;
        let task = s.task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(s.registry.get("w1").await.unwrap().current_load, 0);
    }

    #[tokio::test]
    async fn pinned_task_dispatches_only_to_its_target_worker() {
        let s = scheduler();
        add_worker(&s, "idle", "search", 4).await;
        add_worker(&s, "pinned", "search", 1).await;

        let id = s
            .submit(TaskSpec::new("search").with_target_worker("pinned"))
            .await
            .unwrap();
        s.tick().await;
        assert_eq!(
            s.task(id).await.unwrap().assigned_worker.as_deref(),
            Some("pinned")
        );

        // A second pinned task waits for its worker instead of spilling over.
        let waiting = s
            .submit(TaskSpec::new("search").with_target_worker("pinned"))
            .await
            .unwrap();
        s.tick().await;
        assert_eq!(s.task(waiting).await.unwrap().status, TaskStatus::Pending);

        s.report_completion(report(id, "pinned", 0, true)).await;
        s.tick().await;
        assert_eq!(
            s.task(waiting).await.unwrap().assigned_worker.as_deref(),
            Some("pinned")
        );
    }

    #[tokio::test]
    async fn failure_events_carry_the_session_id() {
        let s = scheduler();
        add_worker(&s, "w1", "search", 1).await;
        let id = s
            .submit(
                TaskSpec::new("search")
                    .with_session("s1")
                    .with_max_retries(0),
            )
            .await
            .unwrap();
        s.tick().await;
        s.report_completion(report(id, "w1", 0, false)).await;

        let failures = s
            .bus
            .query(crate::bus::EventFilter {
                event_type: Some(EventType::TaskFailed),
                session_id: Some("s1".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(failures.len(), 1);
    }
}
