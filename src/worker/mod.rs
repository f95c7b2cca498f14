//! Worker capability interface and the harness that connects a worker to the
//! control plane.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bus::{Event, EventHandler};
use crate::scheduler::CompletionReport;

/// What a worker process must implement to receive tasks. Task business logic
/// lives entirely behind `execute`; the control plane only sees JSON in and
/// JSON out.
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> &str;

    /// Worker kind, e.g. "search" or "summarizer". Informational.
    fn kind(&self) -> &str;

    /// Task categories this worker accepts.
    fn categories(&self) -> Vec<String>;

    /// How many tasks may run on this worker at once.
    fn max_concurrency(&self) -> usize {
        1
    }

    async fn execute(&self, input: Value) -> crate::error::Result<Value>;
}

/// Bridges a `Worker` to the bus: reacts to assignment events targeted at its
/// worker, runs `execute` in a spawned task, and reports the outcome over the
/// completion channel.
pub struct WorkerHarness {
    worker: Arc<dyn Worker>,
    completion_tx: mpsc::Sender<CompletionReport>,
}

impl WorkerHarness {
    pub fn new(worker: Arc<dyn Worker>, completion_tx: mpsc::Sender<CompletionReport>) -> Self {
        Self { worker, completion_tx }
    }
}

#[async_trait]
impl EventHandler for WorkerHarness {
    async fn handle(&self, event: &Event) -> crate::error::Result<()> {
        if event.target_id.as_deref() != Some(self.worker.id()) {
            return Ok(());
        }
        let Some(task_id) = event
            .payload
            .get("task_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            tracing::warn!(worker_id = %self.worker.id(), "Assignment event without task id");
            return Ok(());
        };
        let input = event.payload.get("input").cloned().unwrap_or(Value::Null);
        let attempt = event
            .payload
            .get("attempt")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        let worker = Arc::clone(&self.worker);
        let completion_tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = worker.execute(input).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            let report = match result {
                Ok(output) => CompletionReport {
                    task_id,
                    worker_id: worker.id().to_string(),
                    attempt,
                    success: true,
                    output,
                    error: None,
                    duration_ms,
                },
                Err(err) => CompletionReport {
                    task_id,
                    worker_id: worker.id().to_string(),
                    attempt,
                    success: false,
                    output: Value::Null,
                    error: Some(err.to_string()),
                    duration_ms,
                },
            };
            if completion_tx.send(report).await.is_err() {
                tracing::warn!(task_id = %task_id, "Completion channel closed, report lost");
            }
        });
        Ok(())
    }
}
