use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use thiserror::Error;

use crate::lsf::state::JobState;

/// Attempts made for a submission before a transient failure becomes a rejection
pub const SUBMIT_ATTEMPTS: u32 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The scheduler refused the job, retrying won't help
    #[error("scheduler rejected the job: {0}")]
    Rejected(String),
    /// The scheduler couldn't be reached, worth another try
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
    #[error("can't run the submission command: {0}")]
    Spawn(String),
}

impl SubmitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SubmitError::Unavailable(_))
    }
}

/// A failed status query. Never changes job state, the job is polled again next tick.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
    #[error("can't parse status output: {0:?}")]
    Unparseable(String),
    #[error("scheduler reports unknown status {0}")]
    UnknownStatus(String),
}

/// What the scheduler says about one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub state: JobState,
    pub exit_code: Option<i32>,
}

impl SchedulerStatus {
    pub fn new(state: JobState) -> Self {
        SchedulerStatus { state, exit_code: None }
    }
}

/// The seam between the pool and the batch scheduler
///
/// Everything scheduler specific (command lines, output parsing, status vocabulary) stays behind
/// this trait, so the pool can run against LSF, a stub in tests, or a structured API client.
#[async_trait]
pub trait SubmissionClient: Send + Sync {
    /// Submit a job script, returning the scheduler's job id
    async fn submit(&self, script: &Path) -> Result<String, SubmitError>;

    async fn poll(&self, scheduler_id: &str) -> Result<SchedulerStatus, PollError>;

    /// Ask the scheduler to kill a job. Best effort: scheduler side work may not stop at once.
    async fn cancel(&self, scheduler_id: &str) -> Result<(), SubmitError>;
}

/// Bounded exponential backoff between submission attempts
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub attempts: u32,
    pub base: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff { attempts: SUBMIT_ATTEMPTS, base: Duration::from_secs(2) }
    }
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        self.base * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Submit with retries on transient failures
///
/// Returns the scheduler id or the last error together with the number of attempts made.
pub async fn submit_with_retry(
    client: &dyn SubmissionClient,
    script: &Path,
    backoff: Backoff,
) -> Result<String, (SubmitError, u32)> {
    let attempts = backoff.attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.submit(script).await {
            Ok(id) => {
                info!("Submitted {} as scheduler job {id}", script.display());
                return Ok(id);
            }
            Err(err) if err.is_transient() && attempt < attempts => {
                let delay = backoff.delay(attempt);
                warn!("Submitting {} failed ({err}), attempt {attempt}/{attempts}, retrying in {delay:?}", script.display());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                warn!("Giving up on {} after {attempt} attempt(s): {err}", script.display());
                return Err((err, attempt));
            }
        }
    }
}
