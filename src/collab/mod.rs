//! Multi-worker collaboration: detection, participant selection, task
//! decomposition, progress monitoring, and result integration.

pub mod graph;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use graph::{CollabEdge, CollabGraph, CollabRelation};

use crate::bus::{Event, EventBus, EventType};
use crate::config::CollabConfig;
use crate::error::{CollabError, Result};
use crate::registry::{LoadPolicy, WorkerRegistry};
use crate::scheduler::{Scheduler, TaskSpec, TaskStatus};

const SOURCE: &str = "collaboration_manager";

/// Number of detection signals considered by `detect`.
const DETECTION_SIGNALS: f64 = 5.0;

/// How a collaboration is organized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollabMode {
    /// Chain of hand-offs, each stage feeding the next.
    Sequential,
    /// Independent subtasks merged at the end.
    Parallel,
    /// A coordinator plans, specialists execute.
    Hierarchical,
    /// Equal peers working the same problem.
    PeerToPeer,
}

impl std::fmt::Display for CollabMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CollabMode::Sequential => "sequential",
            CollabMode::Parallel => "parallel",
            CollabMode::Hierarchical => "hierarchical",
            CollabMode::PeerToPeer => "peer_to_peer",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollabStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Leader,
    Specialist,
    Reviewer,
    Collaborator,
}

#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub worker_id: String,
    pub role: ParticipantRole,
    /// Category this participant was matched on.
    pub domain: String,
    /// Moving success rate over the worker's recent collaborations.
    pub trust_score: f64,
    pub communication_efficiency: f64,
}

/// Quality assessment of a finished collaboration. All values 0.0..=1.0.
#[derive(Debug, Clone, Serialize)]
pub struct QualityMetrics {
    pub time_efficiency: f64,
    pub participant_satisfaction: f64,
    pub result_completeness: f64,
    pub communication_efficiency: f64,
    pub overall: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Collaboration {
    pub id: Uuid,
    /// Logical parent task this collaboration stands in for. Not registered
    /// with the scheduler; results are reported through collaboration events.
    pub parent_task_id: Uuid,
    pub session_id: Option<String>,
    pub mode: CollabMode,
    pub participants: Vec<Participant>,
    /// Ordinary scheduler tasks tagged with this collaboration's id.
    pub subtask_ids: Vec<Uuid>,
    pub coordinator: Option<String>,
    pub status: CollabStatus,
    pub started_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub intermediate_results: HashMap<Uuid, Value>,
    pub graph: CollabGraph,
    pub result: Option<Value>,
    pub quality: Option<QualityMetrics>,
    estimated_duration_secs: Option<f64>,
}

pub struct CollaborationManager {
    config: CollabConfig,
    bus: Arc<EventBus>,
    registry: Arc<WorkerRegistry>,
    scheduler: Arc<Scheduler>,
    active: RwLock<HashMap<Uuid, Collaboration>>,
    archived: RwLock<HashMap<Uuid, Collaboration>>,
    /// Per-worker rolling collaboration outcomes, newest last.
    history: RwLock<HashMap<String, VecDeque<bool>>>,
}

impl CollaborationManager {
    pub fn new(
        config: CollabConfig,
        bus: Arc<EventBus>,
        registry: Arc<WorkerRegistry>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            config,
            bus,
            registry,
            scheduler,
            active: RwLock::new(HashMap::new()),
            archived: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Score a submission for collaboration need. Five binary signals are
    /// averaged; below the cutoff the task runs as an ordinary single-worker
    /// task.
    pub fn detect(&self, spec: &TaskSpec) -> Option<CollabMode> {
        let domains = spec
            .input
            .get("domains")
            .and_then(Value::as_array)
            .map(|d| d.len())
            .unwrap_or(0);
        let complexity = spec
            .input
            .get("complexity")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let explicit = spec
            .input
            .get("requires_collaboration")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let estimated_secs = spec
            .input
            .get("estimated_duration_secs")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);

        let multi_domain = domains >= 2;
        let complex = complexity > self.config.complexity_threshold;
        let duration_heavy = estimated_secs > self.config.duration_threshold.as_secs_f64();
        let priority_critical = spec.priority >= self.config.priority_threshold;

        let hits = [multi_domain, complex, explicit, duration_heavy, priority_critical]
            .iter()
            .filter(|b| **b)
            .count();
        let score = hits as f64 / DETECTION_SIGNALS;
        if score < self.config.score_cutoff {
            return None;
        }

        let mode = if multi_domain && complex {
            CollabMode::Hierarchical
        } else if duration_heavy {
            CollabMode::Parallel
        } else if priority_critical {
            CollabMode::PeerToPeer
        } else {
            CollabMode::Sequential
        };
        tracing::debug!(score, %mode, "Collaboration detected");
        Some(mode)
    }

    /// Moving success rate over the worker's recent collaborations, falling
    /// back to the configured default for unknown workers.
    pub async fn trust_score(&self, worker_id: &str) -> f64 {
        let history = self.history.read().await;
        match history.get(worker_id) {
            Some(outcomes) if !outcomes.is_empty() => {
                let wins = outcomes.iter().filter(|b| **b).count();
                wins as f64 / outcomes.len() as f64
            }
            _ => self.config.default_trust,
        }
    }

    /// Start a collaboration for the given submission. Fails with
    /// `CollabError::Abort` when fewer than the minimum participants are
    /// eligible, in which case the caller falls back to single-worker
    /// scheduling.
    pub async fn initiate(&self, spec: TaskSpec, mode: CollabMode) -> Result<Collaboration> {
        let domains = self.domains_of(&spec);
        let participants = self.select_participants(mode, &domains).await?;

        let id = Uuid::new_v4();
        let coordinator = participants
            .iter()
            .find(|p| p.role == ParticipantRole::Leader)
            .map(|p| p.worker_id.clone());

        let subtask_ids = self.decompose(id, &spec, mode, &participants).await?;
        let graph = self.build_graph(mode, &participants);

        let now = Utc::now();
        let collaboration = Collaboration {
            id,
            parent_task_id: Uuid::new_v4(),
            session_id: spec.session_id.clone(),
            mode,
            participants,
            subtask_ids,
            coordinator,
            status: CollabStatus::Active,
            started_at: now,
            deadline_at: now
                + chrono::Duration::from_std(self.config.deadline)
                    .unwrap_or(chrono::Duration::minutes(30)),
            ended_at: None,
            intermediate_results: HashMap::new(),
            graph,
            result: None,
            quality: None,
            estimated_duration_secs: spec
                .input
                .get("estimated_duration_secs")
                .and_then(Value::as_f64),
        };

        tracing::info!(
            collaboration_id = %id,
            %mode,
            participants = collaboration.participants.len(),
            subtasks = collaboration.subtask_ids.len(),
            "Collaboration started"
        );
        self.bus
            .publish(
                Event::new(EventType::CollaborationStarted, SOURCE)
                    .with_payload(serde_json::json!({
                        "collaboration_id": id,
                        "mode": mode.to_string(),
                        "participants": collaboration
                            .participants
                            .iter()
                            .map(|p| p.worker_id.clone())
                            .collect::<Vec<_>>(),
                    }))
                    .with_priority(spec.priority),
            )
            .await;

        let snapshot = collaboration.clone();
        self.active.write().await.insert(id, collaboration);
        Ok(snapshot)
    }

    fn domains_of(&self, spec: &TaskSpec) -> Vec<String> {
        let declared: Vec<String> = spec
            .input
            .get("domains")
            .and_then(Value::as_array)
            .map(|d| {
                d.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if declared.is_empty() {
            vec![spec.kind.clone()]
        } else {
            declared
        }
    }

    /// Pick up to `max_participants` distinct workers covering the declared
    /// domains, best trust first, and assign roles for the mode.
    async fn select_participants(
        &self,
        mode: CollabMode,
        domains: &[String],
    ) -> Result<Vec<Participant>> {
        let mut picked: Vec<Participant> = Vec::new();
        for domain in domains.iter().cycle().take(domains.len() * 2) {
            if picked.len() >= self.config.max_participants {
                break;
            }
            let candidates = self
                .registry
                .candidates_for(domain, LoadPolicy::BestSuccessRate)
                .await;
            let Some(candidate) = candidates
                .into_iter()
                .find(|c| picked.iter().all(|p| p.worker_id != c.worker_id))
            else {
                continue;
            };
            let trust = self.trust_score(&candidate.worker_id).await;
            picked.push(Participant {
                worker_id: candidate.worker_id,
                role: ParticipantRole::Collaborator,
                domain: domain.clone(),
                trust_score: trust,
                communication_efficiency: 0.9,
            });
        }

        if picked.len() < self.config.min_participants {
            return Err(CollabError::Abort {
                needed: self.config.min_participants,
                found: picked.len(),
            }
            .into());
        }

        picked.sort_by(|a, b| {
            b.trust_score
                .partial_cmp(&a.trust_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let last = picked.len() - 1;
        for (i, participant) in picked.iter_mut().enumerate() {
            participant.role = match mode {
                CollabMode::Hierarchical if i == 0 => ParticipantRole::Leader,
                CollabMode::Hierarchical => ParticipantRole::Specialist,
                CollabMode::Sequential if i == last => ParticipantRole::Reviewer,
                CollabMode::Sequential => ParticipantRole::Specialist,
                CollabMode::Parallel => ParticipantRole::Specialist,
                CollabMode::PeerToPeer => ParticipantRole::Collaborator,
            };
        }
        Ok(picked)
    }

    /// Split the submission into scheduler subtasks shaped by the mode and
    /// submit them, returning the subtask ids in participant order.
    async fn decompose(
        &self,
        collaboration_id: Uuid,
        spec: &TaskSpec,
        mode: CollabMode,
        participants: &[Participant],
    ) -> Result<Vec<Uuid>> {
        let mut subtask_ids = Vec::with_capacity(participants.len());
        let total = participants.len();

        for (stage, participant) in participants.iter().enumerate() {
            // Each stage is pinned to the participant it was planned for, so
            // trust scores, roles, and the graph describe the workers that
            // actually execute.
            let mut subtask = TaskSpec::new(&participant.domain)
                .with_priority(spec.priority)
                .with_target_worker(&participant.worker_id)
                .with_input(serde_json::json!({
                    "collaboration_id": collaboration_id,
                    "mode": mode.to_string(),
                    "stage": stage,
                    "stages": total,
                    "original": spec.input,
                }));
            if let Some(session) = &spec.session_id {
                subtask = subtask.with_session(session.clone());
            }
            if let Some(timeout) = spec.timeout {
                subtask = subtask.with_timeout(timeout);
            }

            let depends_on_previous = match mode {
                CollabMode::Sequential => stage > 0,
                // Specialists wait for the coordinator's plan.
                CollabMode::Hierarchical => stage > 0,
                CollabMode::Parallel | CollabMode::PeerToPeer => false,
            };
            if depends_on_previous {
                let upstream = if mode == CollabMode::Hierarchical {
                    subtask_ids[0]
                } else {
                    subtask_ids[stage - 1]
                };
                subtask = subtask.with_dependency(upstream);
            }

            let id = self
                .scheduler
                .submit_internal(subtask, Some(collaboration_id))
                .await?;
            subtask_ids.push(id);
        }
        Ok(subtask_ids)
    }

    fn build_graph(&self, mode: CollabMode, participants: &[Participant]) -> CollabGraph {
        let ids: Vec<String> = participants.iter().map(|p| p.worker_id.clone()).collect();
        let mut graph = CollabGraph::new(ids.clone());
        match mode {
            CollabMode::Sequential => {
                for pair in participants.windows(2) {
                    graph.add_edge(
                        &pair[0].worker_id,
                        &pair[1].worker_id,
                        CollabRelation::HandsOffTo,
                        pair[1].trust_score,
                    );
                }
            }
            CollabMode::Hierarchical => {
                let leader = &participants[0];
                for specialist in &participants[1..] {
                    graph.add_edge(
                        &leader.worker_id,
                        &specialist.worker_id,
                        CollabRelation::Supervises,
                        specialist.trust_score,
                    );
                    graph.add_edge(
                        &specialist.worker_id,
                        &leader.worker_id,
                        CollabRelation::ReportsTo,
                        leader.trust_score,
                    );
                }
            }
            CollabMode::Parallel | CollabMode::PeerToPeer => {
                for (i, a) in participants.iter().enumerate() {
                    for b in &participants[i + 1..] {
                        let weight = (a.trust_score + b.trust_score) / 2.0;
                        graph.add_edge(
                            &a.worker_id,
                            &b.worker_id,
                            CollabRelation::PeerCommunication,
                            weight,
                        );
                        graph.add_edge(
                            &b.worker_id,
                            &a.worker_id,
                            CollabRelation::PeerCommunication,
                            weight,
                        );
                    }
                }
            }
        }
        graph
    }

    /// One monitoring pass over every active collaboration: collect finished
    /// subtask outputs, flag delays, enforce the deadline and the
    /// coordinator-fatal rule, and integrate once everything is terminal.
    pub async fn monitor_tick(&self) {
        let ids: Vec<Uuid> = self.active.read().await.keys().copied().collect();
        for id in ids {
            self.monitor_one(id).await;
        }
    }

    async fn monitor_one(&self, id: Uuid) {
        let now = Utc::now();
        let (subtask_ids, mode, deadline_at) = {
            let active = self.active.read().await;
            let Some(collab) = active.get(&id) else { return };
            (collab.subtask_ids.clone(), collab.mode, collab.deadline_at)
        };

        let mut tasks = Vec::with_capacity(subtask_ids.len());
        for subtask_id in &subtask_ids {
            if let Some(task) = self.scheduler.task(*subtask_id).await {
                tasks.push(task);
            }
        }

        // Collect outputs of finished stages as intermediate results.
        {
            let mut active = self.active.write().await;
            if let Some(collab) = active.get_mut(&id) {
                for task in &tasks {
                    if task.status == TaskStatus::Succeeded {
                        collab
                            .intermediate_results
                            .entry(task.id)
                            .or_insert_with(|| task.output.clone());
                    }
                }
            }
        }

        for task in &tasks {
            if task.status == TaskStatus::Running
                && task.started_at.is_some_and(|started| {
                    now.signed_duration_since(started).to_std().unwrap_or_default()
                        > self.config.delay_threshold
                })
            {
                tracing::warn!(
                    collaboration_id = %id,
                    task_id = %task.id,
                    "Collaboration subtask is delayed"
                );
            }
        }

        // The first subtask is the coordinator's plan; if it dies, nothing
        // downstream can proceed.
        let coordinator_failed = mode == CollabMode::Hierarchical
            && subtask_ids.first().is_some_and(|first| {
                tasks
                    .iter()
                    .any(|t| t.id == *first && t.is_terminal() && t.status != TaskStatus::Succeeded)
            });
        if coordinator_failed {
            self.fail_collaboration(id, "coordinator failed").await;
            return;
        }

        if now > deadline_at {
            self.fail_collaboration(id, "deadline exceeded").await;
            return;
        }

        let all_terminal = !tasks.is_empty() && tasks.iter().all(|t| t.is_terminal());
        if !all_terminal || tasks.len() != subtask_ids.len() {
            return;
        }

        let succeeded = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Succeeded)
            .count();
        if succeeded == 0 {
            self.fail_collaboration(id, "all subtasks failed").await;
            return;
        }
        self.complete_collaboration(id, &tasks).await;
    }

    async fn complete_collaboration(&self, id: Uuid, tasks: &[crate::scheduler::Task]) {
        let Some(mut collab) = self.active.write().await.remove(&id) else {
            return;
        };
        let (result, quality) = self.integrate(&collab, tasks);
        collab.status = CollabStatus::Completed;
        collab.ended_at = Some(Utc::now());
        collab.result = Some(result.clone());
        collab.quality = Some(quality.clone());

        self.record_participant_outcomes(&collab, tasks).await;
        tracing::info!(
            collaboration_id = %id,
            overall_quality = quality.overall,
            "Collaboration completed"
        );
        self.bus
            .publish(
                Event::new(EventType::CollaborationCompleted, SOURCE).with_payload(
                    serde_json::json!({
                        "collaboration_id": id,
                        "parent_task_id": collab.parent_task_id,
                        "result": result,
                        "quality": quality,
                    }),
                ),
            )
            .await;
        self.archived.write().await.insert(id, collab);
    }

    async fn fail_collaboration(&self, id: Uuid, reason: &str) {
        let Some(mut collab) = self.active.write().await.remove(&id) else {
            return;
        };
        collab.status = CollabStatus::Failed;
        collab.ended_at = Some(Utc::now());

        // Stop whatever is still in flight.
        for subtask_id in &collab.subtask_ids {
            if let Some(task) = self.scheduler.task(*subtask_id).await
                && !task.is_terminal()
            {
                if let Err(err) = self.scheduler.cancel(*subtask_id).await {
                    tracing::debug!(task_id = %subtask_id, error = %err, "Subtask cancel skipped");
                }
            }
        }

        let mut tasks = Vec::new();
        for subtask_id in &collab.subtask_ids {
            if let Some(task) = self.scheduler.task(*subtask_id).await {
                tasks.push(task);
            }
        }
        self.record_participant_outcomes(&collab, &tasks).await;

        tracing::warn!(collaboration_id = %id, reason, "Collaboration failed");
        self.bus
            .publish(
                Event::new(EventType::CollaborationFailed, SOURCE).with_payload(
                    serde_json::json!({
                        "collaboration_id": id,
                        "parent_task_id": collab.parent_task_id,
                        "reason": reason,
                    }),
                ),
            )
            .await;
        self.archived.write().await.insert(id, collab);
    }

    /// Fold each participant's subtask outcome into their rolling history and
    /// refresh stored trust scores.
    async fn record_participant_outcomes(
        &self,
        collab: &Collaboration,
        tasks: &[crate::scheduler::Task],
    ) {
        let mut history = self.history.write().await;
        for participant in &collab.participants {
            let outcome = tasks.iter().any(|t| {
                t.assigned_worker.as_deref() == Some(participant.worker_id.as_str())
                    && t.status == TaskStatus::Succeeded
            });
            let outcomes = history.entry(participant.worker_id.clone()).or_default();
            outcomes.push_back(outcome);
            while outcomes.len() > self.config.trust_window {
                outcomes.pop_front();
            }
        }
    }

    /// Merge subtask outputs by mode and score the collaboration.
    fn integrate(
        &self,
        collab: &Collaboration,
        tasks: &[crate::scheduler::Task],
    ) -> (Value, QualityMetrics) {
        let succeeded: Vec<&crate::scheduler::Task> = collab
            .subtask_ids
            .iter()
            .filter_map(|id| tasks.iter().find(|t| t.id == *id))
            .filter(|t| t.status == TaskStatus::Succeeded)
            .collect();

        let result = match collab.mode {
            // The last stage's output is the refined final answer.
            CollabMode::Sequential => succeeded
                .last()
                .map(|t| t.output.clone())
                .unwrap_or(Value::Null),
            CollabMode::Parallel | CollabMode::PeerToPeer => {
                let merged: serde_json::Map<String, Value> = succeeded
                    .iter()
                    .map(|t| {
                        (
                            t.assigned_worker.clone().unwrap_or_else(|| t.id.to_string()),
                            t.output.clone(),
                        )
                    })
                    .collect();
                Value::Object(merged)
            }
            CollabMode::Hierarchical => {
                let plan = succeeded
                    .iter()
                    .find(|t| Some(&t.id) == collab.subtask_ids.first())
                    .map(|t| t.output.clone())
                    .unwrap_or(Value::Null);
                let results: serde_json::Map<String, Value> = succeeded
                    .iter()
                    .filter(|t| Some(&t.id) != collab.subtask_ids.first())
                    .map(|t| {
                        (
                            t.assigned_worker.clone().unwrap_or_else(|| t.id.to_string()),
                            t.output.clone(),
                        )
                    })
                    .collect();
                serde_json::json!({ "plan": plan, "results": results })
            }
        };

        let actual_secs = collab
            .ended_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(collab.started_at)
            .num_milliseconds() as f64
            / 1000.0;
        let estimate_secs = collab
            .estimated_duration_secs
            .unwrap_or(self.config.duration_threshold.as_secs_f64());
        let time_efficiency = if actual_secs > 0.0 {
            (estimate_secs / actual_secs).min(1.0)
        } else {
            1.0
        };
        let participant_satisfaction = mean(collab.participants.iter().map(|p| p.trust_score));
        let result_completeness = succeeded.len() as f64 / collab.subtask_ids.len().max(1) as f64;
        let communication_efficiency =
            mean(collab.participants.iter().map(|p| p.communication_efficiency));
        let overall = (time_efficiency
            + participant_satisfaction
            + result_completeness
            + communication_efficiency)
            / 4.0;

        (
            result,
            QualityMetrics {
                time_efficiency,
                participant_satisfaction,
                result_completeness,
                communication_efficiency,
                overall,
            },
        )
    }

    /// Look up a collaboration, active or finished.
    pub async fn collaboration(&self, id: Uuid) -> Option<Collaboration> {
        if let Some(collab) = self.active.read().await.get(&id) {
            return Some(collab.clone());
        }
        self.archived.read().await.get(&id).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Spawn the periodic monitoring loop.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.monitor_interval);
            loop {
                interval.tick().await;
                manager.monitor_tick().await;
            }
        })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BusConfig, ControlPlaneConfig, SchedulerConfig};
    use crate::registry::WorkerCapability;
    use crate::scheduler::CompletionReport;

    fn manager() -> (Arc<CollaborationManager>, Arc<Scheduler>, Arc<WorkerRegistry>) {
        let config = ControlPlaneConfig::default();
        let bus = Arc::new(EventBus::new(BusConfig::default()));
        let registry = Arc::new(WorkerRegistry::new());
        let scheduler = Arc::new(Scheduler::new(
            SchedulerConfig::default(),
            Arc::clone(&bus),
            Arc::clone(&registry),
        ));
        let manager = Arc::new(CollaborationManager::new(
            config.collab,
            bus,
            registry.clone(),
            Arc::clone(&scheduler),
        ));
        (manager, scheduler, registry)
    }

    async fn add_worker(registry: &WorkerRegistry, id: &str, category: &str) {
        registry
            .register(WorkerCapability::new(
                id,
                "test",
                [category.to_string()],
                4,
            ))
            .await
            .unwrap();
    }

    fn finish(task: &crate::scheduler::Task, success: bool) -> CompletionReport {
        CompletionReport {
            task_id: task.id,
            worker_id: task.assigned_worker.clone().unwrap(),
            attempt: task.retry_count,
            success,
            output: serde_json::json!({"by": task.assigned_worker}),
            error: (!success).then(|| "boom".to_string()),
            duration_ms: 5.0,
        }
    }

    #[tokio::test]
    async fn detect_picks_mode_from_signals() {
        let (manager, _, _) = manager();

        let hierarchical = TaskSpec::new("analysis").with_input(serde_json::json!({
            "domains": ["search", "summarize"],
            "complexity": 0.9,
        }));
        assert_eq!(manager.detect(&hierarchical), Some(CollabMode::Hierarchical));

        let parallel = TaskSpec::new("analysis").with_input(serde_json::json!({
            "estimated_duration_secs": 900,
            "requires_collaboration": true,
        }));
        assert_eq!(manager.detect(&parallel), Some(CollabMode::Parallel));

        let peer = TaskSpec::new("analysis")
            .with_priority(9)
            .with_input(serde_json::json!({ "requires_collaboration": true }));
        assert_eq!(manager.detect(&peer), Some(CollabMode::PeerToPeer));

        let sequential = TaskSpec::new("analysis").with_input(serde_json::json!({
            "requires_collaboration": true,
            "domains": ["search", "summarize"],
        }));
        assert_eq!(manager.detect(&sequential), Some(CollabMode::Sequential));

        assert_eq!(manager.detect(&TaskSpec::new("analysis")), None);
    }

    #[tokio::test]
    async fn initiate_aborts_below_minimum_participants() {
        let (manager, _, registry) = manager();
        add_worker(&registry, "only", "search").await;

        let spec = TaskSpec::new("search").with_input(serde_json::json!({
            "requires_collaboration": true,
            "domains": ["search"],
        }));
        let err = manager.initiate(spec, CollabMode::Sequential).await;
        assert!(matches!(
            err,
            Err(crate::error::Error::Collaboration(CollabError::Abort { .. }))
        ));
    }

    #[tokio::test]
    async fn sequential_subtasks_are_chained_by_dependencies() {
        let (manager, scheduler, registry) = manager();
        add_worker(&registry, "w1", "search").await;
        add_worker(&registry, "w2", "summarize").await;

        let spec = TaskSpec::new("analysis").with_input(serde_json::json!({
            "requires_collaboration": true,
            "domains": ["search", "summarize"],
        }));
        let collab = manager.initiate(spec, CollabMode::Sequential).await.unwrap();
        assert_eq!(collab.subtask_ids.len(), 2);

        let first = scheduler.task(collab.subtask_ids[0]).await.unwrap();
        let second = scheduler.task(collab.subtask_ids[1]).await.unwrap();
        assert!(first.dependencies.is_empty());
        assert!(second.dependencies.contains(&first.id));
        assert_eq!(first.collaboration_id, Some(collab.id));
    }

    #[tokio::test]
    async fn subtasks_execute_on_the_selected_participants() {
        let (manager, scheduler, registry) = manager();
        // Both workers cover the same category, so policy selection alone
        // could send a stage to either of them.
        add_worker(&registry, "w1", "search").await;
        add_worker(&registry, "w2", "search").await;

        let spec = TaskSpec::new("search").with_input(serde_json::json!({
            "requires_collaboration": true,
        }));
        let collab = manager.initiate(spec, CollabMode::Sequential).await.unwrap();
        assert_eq!(collab.participants.len(), 2);
        assert_ne!(
            collab.participants[0].worker_id,
            collab.participants[1].worker_id
        );

        for (stage, participant) in collab.participants.iter().enumerate() {
            let task = scheduler.task(collab.subtask_ids[stage]).await.unwrap();
            assert_eq!(
                task.target_worker.as_deref(),
                Some(participant.worker_id.as_str())
            );
        }

        // The first stage runs on its planned participant, not whichever
        // worker the load policy would have favored.
        scheduler.tick().await;
        let first = scheduler.task(collab.subtask_ids[0]).await.unwrap();
        assert_eq!(
            first.assigned_worker.as_deref(),
            Some(collab.participants[0].worker_id.as_str())
        );
    }

    #[tokio::test]
    async fn collaboration_completes_and_integrates_when_subtasks_finish() {
        let (manager, scheduler, registry) = manager();
        add_worker(&registry, "w1", "search").await;
        add_worker(&registry, "w2", "summarize").await;

        let spec = TaskSpec::new("analysis").with_input(serde_json::json!({
            "requires_collaboration": true,
            "domains": ["search", "summarize"],
        }));
        let collab = manager.initiate(spec, CollabMode::Sequential).await.unwrap();

        // Drive both stages to success.
        for _ in 0..2 {
            scheduler.tick().await;
            for id in &collab.subtask_ids {
                let task = scheduler.task(*id).await.unwrap();
                if task.status == TaskStatus::Running {
                    scheduler.report_completion(finish(&task, true)).await;
                }
            }
        }
        manager.monitor_tick().await;

        let done = manager.collaboration(collab.id).await.unwrap();
        assert_eq!(done.status, CollabStatus::Completed);
        let quality = done.quality.unwrap();
        assert_eq!(quality.result_completeness, 1.0);
        assert!(done.result.is_some());
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn coordinator_failure_fails_hierarchical_collaboration() {
        let (manager, scheduler, registry) = manager();
        add_worker(&registry, "w1", "search").await;
        add_worker(&registry, "w2", "summarize").await;

        let spec = TaskSpec::new("analysis").with_input(serde_json::json!({
            "domains": ["search", "summarize"],
            "complexity": 0.9,
        }));
        let collab = manager.initiate(spec, CollabMode::Hierarchical).await.unwrap();

        // Fail the coordinator's subtask past its retry budget.
        let coordinator_task = collab.subtask_ids[0];
        loop {
            scheduler.tick().await;
            let task = scheduler.task(coordinator_task).await.unwrap();
            if task.is_terminal() {
                break;
            }
            if task.status == TaskStatus::Running {
                scheduler.report_completion(finish(&task, false)).await;
            }
        }
        manager.monitor_tick().await;

        let done = manager.collaboration(collab.id).await.unwrap();
        assert_eq!(done.status, CollabStatus::Failed);
    }

    #[tokio::test]
    async fn trust_reflects_rolling_collaboration_history() {
        let (manager, _, _) = manager();
        assert_eq!(manager.trust_score("new-worker").await, 0.8);

        {
            let mut history = manager.history.write().await;
            let outcomes = history.entry("w1".to_string()).or_default();
            outcomes.extend([true, true, false, true]);
        }
        assert!((manager.trust_score("w1").await - 0.75).abs() < 1e-9);
    }
}
