//! Configuration types.

use std::time::Duration;

use crate::registry::LoadPolicy;

/// Event bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Maximum number of events kept in the bounded history (oldest evicted first).
    pub max_history: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { max_history: 1000 }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Period of the scheduling tick (also drives the timeout and retry sweeps).
    pub tick_interval: Duration,
    /// Default per-task timeout when a submission does not specify one.
    pub default_timeout: Duration,
    /// Default retry budget when a submission does not specify one.
    pub default_max_retries: u32,
    /// Active worker selection policy.
    pub load_policy: LoadPolicy,
    /// How long terminal tasks are retained before cleanup.
    pub retention: Duration,
    /// Period of the terminal-task cleanup loop.
    pub cleanup_interval: Duration,
    /// Capacity of the completion report channel.
    pub completion_channel_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(500),
            default_timeout: Duration::from_secs(300),
            default_max_retries: 3,
            load_policy: LoadPolicy::LeastLoaded,
            retention: Duration::from_secs(24 * 3600),
            cleanup_interval: Duration::from_secs(1800),
            completion_channel_capacity: 256,
        }
    }
}

/// Collaboration manager configuration.
#[derive(Debug, Clone)]
pub struct CollabConfig {
    /// Minimum detection score before a task is considered collaborative.
    pub score_cutoff: f64,
    /// Complexity signal threshold.
    pub complexity_threshold: f64,
    /// Estimated-duration signal threshold.
    pub duration_threshold: Duration,
    /// Priority signal threshold (tasks at or above are "quality critical").
    pub priority_threshold: u8,
    /// Period of the collaboration monitor loop.
    pub monitor_interval: Duration,
    /// A subtask running longer than this is flagged as delayed.
    pub delay_threshold: Duration,
    /// Outer deadline for a whole collaboration.
    pub deadline: Duration,
    /// Number of recent collaborations used for trust scoring.
    pub trust_window: usize,
    /// Trust score assumed for workers with no collaboration history.
    pub default_trust: f64,
    /// Minimum participants required to run a collaboration.
    pub min_participants: usize,
    /// Maximum participants selected for one collaboration.
    pub max_participants: usize,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            score_cutoff: 0.3,
            complexity_threshold: 0.7,
            duration_threshold: Duration::from_secs(300),
            priority_threshold: 8,
            monitor_interval: Duration::from_secs(5),
            delay_threshold: Duration::from_secs(300),
            deadline: Duration::from_secs(1800),
            trust_window: 10,
            default_trust: 0.8,
            min_participants: 2,
            max_participants: 4,
        }
    }
}

/// Top-level control plane configuration.
#[derive(Debug, Clone, Default)]
pub struct ControlPlaneConfig {
    pub bus: BusConfig,
    pub scheduler: SchedulerConfig,
    pub collab: CollabConfig,
}

impl ControlPlaneConfig {
    /// Build a config from environment variables, falling back to defaults.
    ///
    /// Recognized: `FOREMAN_TICK_MS`, `FOREMAN_MAX_HISTORY`,
    /// `FOREMAN_LOAD_POLICY` (`least_loaded` | `success_rate`),
    /// `FOREMAN_COLLAB_DEADLINE_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_parse::<u64>("FOREMAN_TICK_MS") {
            config.scheduler.tick_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("FOREMAN_MAX_HISTORY") {
            config.bus.max_history = n;
        }
        if let Ok(policy) = std::env::var("FOREMAN_LOAD_POLICY") {
            match policy.as_str() {
                "least_loaded" => config.scheduler.load_policy = LoadPolicy::LeastLoaded,
                "success_rate" => config.scheduler.load_policy = LoadPolicy::BestSuccessRate,
                other => tracing::warn!("Unknown FOREMAN_LOAD_POLICY: {}", other),
            }
        }
        if let Some(secs) = env_parse::<u64>("FOREMAN_COLLAB_DEADLINE_SECS") {
            config.collab.deadline = Duration::from_secs(secs);
        }

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
