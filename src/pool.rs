//! Bounded-concurrency job pool: placement, submission waves and lifecycle tracking

use std::time::Duration;

use thiserror::Error;

use crate::workspace::WorkspaceError;

/// Pool parameters and their validation
pub mod config;

/// Round-robin job to node placement with a per-node cap
pub mod assigner;

/// Per-job handle: the state machine the orchestrator drives
pub mod handle;

/// Aggregated outcome of a pool run
pub mod summary;

/// The orchestrator loop and its workers
pub mod job_pool;

pub use config::PoolConfig;
pub use handle::{JobError, JobHandle};
pub use job_pool::{JobPool, PoolCanceller};
pub use summary::PoolSummary;

/// Invocation-level failures. Per-job problems never end up here, they stay on the JobHandle.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
    #[error("pool submission failed: {0}")]
    PoolSubmission(#[from] WorkspaceError),
    #[error("pool submission stalled: {pending} job(s) still pending after {waited:?} without a free node")]
    Stalled { pending: usize, waited: Duration },
}
