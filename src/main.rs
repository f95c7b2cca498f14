//! Demo binary: wires a control plane, attaches two demo workers, submits a
//! dependent task pair and a collaborative task, then prints a health report.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use foreman::config::ControlPlaneConfig;
use foreman::context::ControlPlane;
use foreman::scheduler::TaskSpec;
use foreman::worker::Worker;

struct DemoWorker {
    id: String,
    category: String,
}

#[async_trait]
impl Worker for DemoWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        &self.category
    }

    fn categories(&self) -> Vec<String> {
        vec![self.category.clone()]
    }

    fn max_concurrency(&self) -> usize {
        2
    }

    async fn execute(&self, input: Value) -> foreman::Result<Value> {
        // Pretend to do some work.
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({
            "worker": self.id,
            "category": self.category,
            "echo": input,
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman=info".into()),
        )
        .init();

    eprintln!("foreman control plane demo");

    let plane = ControlPlane::new(ControlPlaneConfig::from_env());
    plane.start().await;

    plane
        .attach_worker(Arc::new(DemoWorker {
            id: "searcher-1".into(),
            category: "search".into(),
        }))
        .await?;
    plane
        .attach_worker(Arc::new(DemoWorker {
            id: "summarizer-1".into(),
            category: "summarize".into(),
        }))
        .await?;

    // An ordinary pair: summarize only after the search has succeeded.
    let search = plane
        .submit(
            TaskSpec::new("search")
                .with_session("demo")
                .with_input(json!({"query": "rust schedulers"})),
        )
        .await?;
    let summarize = plane
        .submit(
            TaskSpec::new("summarize")
                .with_session("demo")
                .with_dependency(search.task_id),
        )
        .await?;

    // A submission that scores as collaborative and fans out across workers.
    let report = plane
        .submit(
            TaskSpec::new("analysis")
                .with_session("demo")
                .with_input(json!({
                    "requires_collaboration": true,
                    "domains": ["search", "summarize"],
                })),
        )
        .await?;
    tracing::info!(
        task_id = %report.task_id,
        collaboration = ?report.collaboration_id,
        "Submitted collaborative analysis"
    );

    tokio::time::sleep(Duration::from_secs(3)).await;

    if let Some(task) = plane.task(summarize.task_id).await {
        tracing::info!(status = %task.status, "Summarize task finished");
    }
    if let Some(collab_id) = report.collaboration_id
        && let Some(collab) = plane.collaboration(collab_id).await
    {
        tracing::info!(
            status = ?collab.status,
            quality = ?collab.quality.as_ref().map(|q| q.overall),
            "Collaboration finished"
        );
    }

    let health = plane.health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);

    plane.shutdown().await;
    Ok(())
}
