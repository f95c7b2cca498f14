//! The control plane context: owns every component and wires them together.
//!
//! There are no global singletons; everything hangs off a `ControlPlane`
//! instance, which makes tests able to run several planes side by side.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::{BusHealth, Event, EventBus, EventType};
use crate::collab::{Collaboration, CollaborationManager};
use crate::config::ControlPlaneConfig;
use crate::error::{CollabError, Error, Result};
use crate::registry::{WorkerCapability, WorkerRegistry, WorkerUtilization};
use crate::scheduler::{CompletionReport, Scheduler, SchedulerMetrics, Task, TaskSpec, TaskStatus};
use crate::worker::{Worker, WorkerHarness};

/// What a caller gets back from `submit`.
#[derive(Debug, Clone, Copy)]
pub struct TaskReceipt {
    /// Id to track the submission by. For collaborative submissions this is
    /// the collaboration's parent task id; results arrive via collaboration
    /// events rather than a single task record.
    pub task_id: Uuid,
    pub collaboration_id: Option<Uuid>,
}

/// Aggregated health snapshot across all components.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status_counts: HashMap<TaskStatus, usize>,
    pub workers: Vec<WorkerUtilization>,
    pub scheduler: SchedulerMetrics,
    pub bus: BusHealth,
    pub active_collaborations: usize,
    pub uptime_secs: i64,
}

pub struct ControlPlane {
    bus: Arc<EventBus>,
    registry: Arc<WorkerRegistry>,
    scheduler: Arc<Scheduler>,
    collab: Arc<CollaborationManager>,
    started_at: DateTime<Utc>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ControlPlane {
    pub fn new(config: ControlPlaneConfig) -> Arc<Self> {
        let bus = Arc::new(EventBus::new(config.bus));
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler,
            Arc::clone(&bus),
            Arc::clone(&registry),
        ));
        let collab = Arc::new(CollaborationManager::new(
            config.collab,
            Arc::clone(&bus),
            Arc::clone(&registry),
            Arc::clone(&scheduler),
        ));
        Arc::new(Self {
            bus,
            registry,
            scheduler,
            collab,
            started_at: Utc::now(),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background loops: scheduling tick, completion consumer,
    /// cleanup, and the collaboration monitor.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }
        handles.extend(self.scheduler.spawn().await);
        handles.push(self.collab.spawn());
        tracing::info!("Control plane started");
    }

    /// Abort the background loops. Task state stays queryable afterwards.
    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
        tracing::info!("Control plane stopped");
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Submit work. Submissions that score as collaborative are split across
    /// several workers; when too few workers are eligible the task falls back
    /// to ordinary single-worker scheduling.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskReceipt> {
        spec.validate()?;
        if let Some(mode) = self.collab.detect(&spec) {
            match self.collab.initiate(spec.clone(), mode).await {
                Ok(collaboration) => {
                    return Ok(TaskReceipt {
                        task_id: collaboration.parent_task_id,
                        collaboration_id: Some(collaboration.id),
                    });
                }
                Err(Error::Collaboration(CollabError::Abort { needed, found })) => {
                    tracing::info!(
                        needed,
                        found,
                        "Not enough participants, falling back to single-worker scheduling"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        let task_id = self.scheduler.submit(spec).await?;
        Ok(TaskReceipt {
            task_id,
            collaboration_id: None,
        })
    }

    /// Register a worker and subscribe its harness to assignment events.
    pub async fn attach_worker(&self, worker: Arc<dyn Worker>) -> Result<()> {
        let capability = WorkerCapability::new(
            worker.id(),
            worker.kind(),
            worker.categories(),
            worker.max_concurrency(),
        );
        let worker_id = capability.worker_id.clone();
        self.registry.register(capability).await?;

        let harness = Arc::new(WorkerHarness::new(
            Arc::clone(&worker),
            self.scheduler.completion_sender(),
        ));
        self.bus.subscribe(EventType::TaskAssigned, harness).await;

        self.bus
            .publish(
                Event::new(EventType::WorkerRegistered, "control_plane")
                    .with_payload(serde_json::json!({ "worker_id": worker_id })),
            )
            .await;
        Ok(())
    }

    pub async fn task(&self, id: Uuid) -> Option<Task> {
        self.scheduler.task(id).await
    }

    pub async fn list_tasks(
        &self,
        session_id: Option<&str>,
        status: Option<TaskStatus>,
    ) -> Vec<Task> {
        self.scheduler.list_tasks(session_id, status).await
    }

    pub async fn collaboration(&self, id: Uuid) -> Option<Collaboration> {
        self.collab.collaboration(id).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        self.scheduler.cancel(id).await
    }

    /// Apply a completion report directly, bypassing the channel. Useful for
    /// external workers that poll instead of subscribing.
    pub async fn report_completion(&self, report: CompletionReport) {
        self.scheduler.report_completion(report).await;
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status_counts: self.scheduler.status_counts().await,
            workers: self.registry.utilization().await,
            scheduler: self.scheduler.metrics().await,
            bus: self.bus.health().await,
            active_collaborations: self.collab.active_count().await,
            uptime_secs: Utc::now().signed_duration_since(self.started_at).num_seconds(),
        }
    }
}
