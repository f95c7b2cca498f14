//! Error types for the control plane.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the control plane.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Collaboration error: {0}")]
    Collaboration(#[from] CollabError),
}

/// Submission validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Task kind must not be empty")]
    MissingKind,

    #[error("Priority {value} out of range ({min}..={max})")]
    PriorityOutOfRange { value: u8, min: u8, max: u8 },

    #[error("Timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Unknown dependency {id}: dependencies must reference already-submitted tasks")]
    UnknownDependency { id: Uuid },

    #[error("Duplicate dependency {id}")]
    DuplicateDependency { id: Uuid },
}

/// Task lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} cannot transition from {from} to {to}")]
    InvalidTransition { id: Uuid, from: String, to: String },

    #[error("Task {id} is already terminal in status {status}")]
    AlreadyTerminal { id: Uuid, status: String },

    #[error("Task {id} timed out after {timeout:?}")]
    Timeout { id: Uuid, timeout: Duration },

    #[error("Task {id} failed: {reason}")]
    Failed { id: Uuid, reason: String },
}

/// Worker registry and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {id} not found")]
    NotFound { id: String },

    #[error("Worker {id} is already registered")]
    AlreadyRegistered { id: String },

    #[error("No capable worker for category {category}")]
    NoCapableWorker { category: String },

    #[error("Worker {id} is saturated ({load}/{max})")]
    Saturated { id: String, load: usize, max: usize },

    #[error("Worker {id} execution failed: {reason}")]
    ExecutionFailed { id: String, reason: String },
}

/// Event bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Subscriber handler failed: {reason}")]
    HandlerFailed { reason: String },

    #[error("Shared key not found: {key}")]
    KeyNotFound { key: String },
}

/// Collaboration errors.
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("Collaboration {id} not found")]
    NotFound { id: Uuid },

    #[error("Collaboration aborted: {found} eligible participant(s), need at least {needed}")]
    Abort { needed: usize, found: usize },

    #[error("Collaboration {id} exceeded its deadline of {deadline:?}")]
    Timeout { id: Uuid, deadline: Duration },

    #[error("Coordinator {worker} failed in collaboration {id}")]
    CoordinatorFailed { id: Uuid, worker: String },
}

/// Result type alias for the control plane.
pub type Result<T> = std::result::Result<T, Error>;
