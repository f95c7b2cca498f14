//! Worker capability registry: who can do what, how loaded they are, and how
//! well they have been doing it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::{Result, WorkerError};

/// Smoothing factor for the success-rate and processing-time moving averages.
const EMA_ALPHA: f64 = 0.3;

/// Worker selection policy when several candidates can take a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPolicy {
    /// Pick the candidate with the lowest current load.
    #[default]
    LeastLoaded,
    /// Pick the candidate with the best success rate.
    BestSuccessRate,
}

/// What the registry knows about one worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerCapability {
    pub worker_id: String,
    pub kind: String,
    /// Task categories this worker handles, stored lowercased.
    pub categories: HashSet<String>,
    pub max_concurrency: usize,
    pub current_load: usize,
    /// Exponential moving average of task success (1.0 = always succeeds).
    pub success_rate: f64,
    /// Exponential moving average of task duration in milliseconds.
    pub avg_processing_ms: f64,
    pub available: bool,
    pub last_active_at: DateTime<Utc>,
}

impl WorkerCapability {
    pub fn new(
        worker_id: impl Into<String>,
        kind: impl Into<String>,
        categories: impl IntoIterator<Item = String>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind: kind.into(),
            categories: categories.into_iter().map(|c| c.to_lowercase()).collect(),
            max_concurrency: max_concurrency.max(1),
            current_load: 0,
            success_rate: 1.0,
            avg_processing_ms: 0.0,
            available: true,
            last_active_at: Utc::now(),
        }
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.current_load < self.max_concurrency
    }
}

/// Per-worker utilization row for health snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerUtilization {
    pub worker_id: String,
    pub current_load: usize,
    pub max_concurrency: usize,
    pub success_rate: f64,
    pub available: bool,
}

/// In-memory registry of worker capabilities with a centralized alias table
/// for category name resolution.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, WorkerCapability>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, capability: WorkerCapability) -> Result<()> {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&capability.worker_id) {
            return Err(WorkerError::AlreadyRegistered {
                id: capability.worker_id,
            }
            .into());
        }
        tracing::info!(
            worker_id = %capability.worker_id,
            kind = %capability.kind,
            "Registered worker"
        );
        workers.insert(capability.worker_id.clone(), capability);
        Ok(())
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerCapability> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// Map a category name (or a known alias of one) to its canonical form.
    /// Unknown names resolve to their lowercased selves.
    pub async fn resolve_alias(&self, name: &str) -> String {
        let lowered = name.to_lowercase();
        let aliases = self.aliases.read().await;
        aliases.get(&lowered).cloned().unwrap_or(lowered)
    }

    /// Register `alias → canonical` (case-insensitive on both sides).
    pub async fn add_alias(&self, alias: impl Into<String>, canonical: impl Into<String>) {
        let mut aliases = self.aliases.write().await;
        aliases.insert(alias.into().to_lowercase(), canonical.into().to_lowercase());
    }

    /// Workers that can take a task of the given category right now, ordered
    /// best-first by the policy. Ties are broken randomly so load spreads
    /// across equivalent workers.
    pub async fn candidates_for(&self, category: &str, policy: LoadPolicy) -> Vec<WorkerCapability> {
        let canonical = self.resolve_alias(category).await;
        let workers = self.workers.read().await;
        let mut candidates: Vec<WorkerCapability> = workers
            .values()
            .filter(|w| w.available && w.has_spare_capacity() && w.categories.contains(&canonical))
            .cloned()
            .collect();

        candidates.shuffle(&mut rand::thread_rng());
        match policy {
            LoadPolicy::LeastLoaded => candidates.sort_by_key(|w| w.current_load),
            LoadPolicy::BestSuccessRate => candidates.sort_by(|a, b| {
                b.success_rate
                    .partial_cmp(&a.success_rate)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        candidates
    }

    /// Take one concurrency slot on the worker. Fails when the worker is
    /// unknown or already at its limit.
    pub async fn reserve_slot(&self, worker_id: &str) -> Result<()> {
        let mut workers = self.workers.write().await;
        let worker = workers.get_mut(worker_id).ok_or_else(|| WorkerError::NotFound {
            id: worker_id.to_string(),
        })?;
        if !worker.has_spare_capacity() {
            return Err(WorkerError::Saturated {
                id: worker_id.to_string(),
                load: worker.current_load,
                max: worker.max_concurrency,
            }
            .into());
        }
        worker.current_load += 1;
        Ok(())
    }

    /// Return a concurrency slot. Releasing below zero is clamped and logged.
    pub async fn release_slot(&self, worker_id: &str) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            if worker.current_load == 0 {
                tracing::warn!(worker_id, "Slot released on idle worker");
                return;
            }
            worker.current_load -= 1;
        }
    }

    /// Fold one task outcome into the worker's moving averages.
    pub async fn record_outcome(&self, worker_id: &str, success: bool, duration_ms: f64) {
        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            let outcome = if success { 1.0 } else { 0.0 };
            worker.success_rate = EMA_ALPHA * outcome + (1.0 - EMA_ALPHA) * worker.success_rate;
            worker.avg_processing_ms = if worker.avg_processing_ms == 0.0 {
                duration_ms
            } else {
                EMA_ALPHA * duration_ms + (1.0 - EMA_ALPHA) * worker.avg_processing_ms
            };
            worker.last_active_at = Utc::now();
        }
    }

    pub async fn set_available(&self, worker_id: &str, available: bool) -> Result<()> {
        let mut workers = self.workers.write().await;
        let worker = workers.get_mut(worker_id).ok_or_else(|| WorkerError::NotFound {
            id: worker_id.to_string(),
        })?;
        worker.available = available;
        Ok(())
    }

    pub async fn utilization(&self) -> Vec<WorkerUtilization> {
        let workers = self.workers.read().await;
        let mut rows: Vec<WorkerUtilization> = workers
            .values()
            .map(|w| WorkerUtilization {
                worker_id: w.worker_id.clone(),
                current_load: w.current_load,
                max_concurrency: w.max_concurrency,
                success_rate: w.success_rate,
                available: w.available,
            })
            .collect();
        rows.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        rows
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
