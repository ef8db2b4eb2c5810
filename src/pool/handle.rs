use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use thiserror::Error;

use crate::lsf::job_spec::JobSpec;
use crate::lsf::script::RenderError;
use crate::lsf::state::JobState;

/// Why a single job failed. Recorded on its handle, never fatal for the pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("can't write job script: {0}")]
    Script(String),
    #[error("submission rejected after {attempts} attempt(s): {message}")]
    SubmissionRejected { attempts: u32, message: String },
    #[error("job exited with code {code}")]
    Exited { code: i32 },
    #[error("scheduler reports the job failed")]
    Scheduler,
}

/// A job the pool has taken on
///
/// Handles are created when a job leaves the pending queue and only the orchestrator loop moves
/// them through `JobState`. Jobs that never reached the scheduler (render failures, rejections,
/// cancelled while pending) have no `scheduler_id` and no `submitted_at`.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub spec: JobSpec,
    pub scheduler_id: Option<String>,
    pub state: JobState,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<JobError>,
    pub script: Option<PathBuf>,
}

impl JobHandle {
    pub fn new(spec: JobSpec) -> Self {
        JobHandle {
            spec,
            scheduler_id: None,
            state: JobState::Pending,
            submitted_at: None,
            finished_at: None,
            error: None,
            script: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `next` if the lifecycle allows it, returns whether the state changed
    pub fn advance(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            if self.state != next {
                debug!("Ignoring {} -> {next} for {}", self.state, self.spec.job_name);
            }
            return false;
        }

        debug!("{}: {} -> {next}", self.spec.job_name, self.state);
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// The scheduler accepted the job
    pub fn submitted(&mut self, scheduler_id: String) -> bool {
        if !self.advance(JobState::Submitted) {
            return false;
        }
        self.scheduler_id = Some(scheduler_id);
        self.submitted_at = Some(Utc::now());
        true
    }

    pub fn fail(&mut self, error: JobError) -> bool {
        if !self.advance(JobState::Failed) {
            return false;
        }
        warn!("{} failed: {error}", self.spec.job_name);
        self.error = Some(error);
        true
    }

    pub fn cancel(&mut self) -> bool {
        self.advance(JobState::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> JobHandle {
        JobHandle::new(JobSpec::new("true", "job_1", 1))
    }

    #[test]
    fn walks_the_happy_path() {
        let mut job = handle();

        assert!(job.submitted("101".to_string()));
        assert!(job.submitted_at.is_some());
        assert!(job.advance(JobState::Running));
        assert!(job.finished_at.is_none());
        assert!(job.advance(JobState::Succeeded));

        assert_eq!(job.scheduler_id.as_deref(), Some("101"));
        assert!(job.finished_at.is_some());
        assert!(job.is_terminal());
    }

    #[test]
    fn terminal_state_sticks() {
        let mut job = handle();
        job.submitted("7".to_string());

        assert!(job.fail(JobError::Exited { code: 3 }));
        assert!(!job.cancel());
        assert!(!job.advance(JobState::Succeeded));

        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error, Some(JobError::Exited { code: 3 }));
    }

    #[test]
    fn repeated_poll_results_are_no_ops() {
        let mut job = handle();
        job.submitted("7".to_string());
        job.advance(JobState::Running);

        assert!(!job.advance(JobState::Running));
        assert!(!job.advance(JobState::Submitted));
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn pending_jobs_can_be_dropped() {
        let mut job = handle();
        assert!(job.cancel());
        assert!(job.scheduler_id.is_none());
        assert_eq!(job.state, JobState::Cancelled);
    }
}
