//! Foreman: an in-memory control plane for coordinating worker processes.
//!
//! Components:
//! - [`bus`]: shared event bus with pub/sub fan-out, bounded history, and a
//!   key/value store for cross-worker data.
//! - [`registry`]: worker capability registry with load and reliability
//!   tracking.
//! - [`scheduler`]: task state machine and scheduler with dependencies,
//!   priorities, timeouts, and retries.
//! - [`collab`]: multi-worker collaboration detection, decomposition,
//!   monitoring, and result integration.
//! - [`context`]: the [`context::ControlPlane`] object that owns and wires
//!   everything.

pub mod bus;
pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use context::{ControlPlane, HealthReport, TaskReceipt};
pub use error::{Error, Result};
