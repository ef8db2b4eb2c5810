use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a job in the pool
///
/// `Pending -> Submitted -> Running -> Succeeded | Failed | Cancelled`. A job may skip straight
/// from `Pending` or `Submitted` to a terminal state (rejected submission, a fast job finishing
/// between two polls, cancellation). Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum JobState {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Whether the scheduler currently holds this job
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobState::Submitted | JobState::Running)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (*self, next) {
            (current, _) if current.is_terminal() => false,
            (current, next) if current == next => false,
            (Pending, _) => true,
            (Submitted, Pending) => false,
            (Submitted, _) => true,
            (Running, Pending | Submitted) => false,
            (Running, _) => true,
            _ => false,
        }
    }

    /// Map an LSF `STAT` column value onto a pool state
    ///
    /// Returns None for statuses that carry no information (`UNKWN`) or aren't LSF statuses.
    pub fn from_lsf(stat: &str) -> Option<JobState> {
        match stat.trim().to_uppercase().as_str() {
            "PEND" | "PSUSP" | "WAIT" | "PROV" => Some(JobState::Submitted),
            "RUN" | "USUSP" | "SSUSP" => Some(JobState::Running),
            "DONE" => Some(JobState::Succeeded),
            "EXIT" | "ZOMBI" => Some(JobState::Failed),
            _ => None,
        }
    }

    /// lower case name, used in the ledger and the summary
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(name: &str) -> Option<JobState> {
        match name {
            "pending" => Some(JobState::Pending),
            "submitted" => Some(JobState::Submitted),
            "running" => Some(JobState::Running),
            "succeeded" => Some(JobState::Succeeded),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_final() {
        for terminal in [JobState::Succeeded, JobState::Failed, JobState::Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobState::Running));
            assert!(!terminal.can_transition_to(JobState::Failed));
        }
    }

    #[test]
    fn no_going_backwards() {
        assert!(!JobState::Running.can_transition_to(JobState::Submitted));
        assert!(!JobState::Submitted.can_transition_to(JobState::Pending));
        assert!(JobState::Submitted.can_transition_to(JobState::Succeeded));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
    }

    #[test]
    fn lsf_vocabulary() {
        assert_eq!(JobState::from_lsf("PEND"), Some(JobState::Submitted));
        assert_eq!(JobState::from_lsf("run"), Some(JobState::Running));
        assert_eq!(JobState::from_lsf("SSUSP"), Some(JobState::Running));
        assert_eq!(JobState::from_lsf("DONE"), Some(JobState::Succeeded));
        assert_eq!(JobState::from_lsf("EXIT"), Some(JobState::Failed));
        assert_eq!(JobState::from_lsf("UNKWN"), None);
    }

    #[test]
    fn names_round_trip() {
        assert_eq!(JobState::parse(JobState::Cancelled.as_str()), Some(JobState::Cancelled));
        assert_eq!(JobState::parse("bogus"), None);
    }
}
