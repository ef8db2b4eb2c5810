use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::lsf::state::JobState;
use crate::pool::handle::JobHandle;
use crate::workspace::Workspace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub job_name: String,
    pub command: String,
    pub reason: String,
    pub stderr: Option<PathBuf>,
}

/// Counts per final state plus the reason behind each failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failures: Vec<FailureReport>,
}

impl PoolSummary {
    pub fn from_handles(handles: &[JobHandle], workspace: &Workspace) -> Self {
        let mut summary = PoolSummary::default();
        for handle in handles {
            match handle.state {
                JobState::Succeeded => summary.succeeded += 1,
                JobState::Cancelled => summary.cancelled += 1,
                JobState::Failed => {
                    summary.failed += 1;
                    let reason = handle
                        .error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "unknown".to_string());
                    // only jobs that reached the scheduler have logs
                    let stderr = handle.scheduler_id.as_ref().map(|_| workspace.stderr_path(&handle.spec.job_name));
                    summary.failures.push(FailureReport {
                        job_name: handle.spec.job_name.clone(),
                        command: handle.spec.command.clone(),
                        reason,
                        stderr,
                    });
                }
                // the pool only returns once every job is terminal
                JobState::Pending | JobState::Submitted | JobState::Running => {}
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }

    /// 0 all succeeded, 1 any failure, 130 nothing failed but something was cancelled
    pub fn exit_code(&self) -> u8 {
        if self.failed > 0 {
            1
        } else if self.cancelled > 0 {
            130
        } else {
            0
        }
    }

    pub fn write(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::from)?;
        info!("Writing run summary to {}", path.display());
        fs::write(path, json)
    }
}

impl fmt::Display for PoolSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} job(s): {} succeeded, {} failed, {} cancelled",
            self.total(),
            self.succeeded,
            self.failed,
            self.cancelled
        )?;
        for failure in &self.failures {
            writeln!(f, "  {} failed: {}", failure.job_name, failure.reason)?;
            writeln!(f, "    command: {}", failure.command)?;
            if let Some(stderr) = &failure.stderr {
                writeln!(f, "    log: {}", stderr.display())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsf::job_spec::JobSpec;
    use crate::pool::handle::JobError;

    fn finished(name: &str, state: JobState) -> JobHandle {
        let mut handle = JobHandle::new(JobSpec::new(format!("run {name}"), name, 1));
        handle.submitted(format!("{name}-id"));
        match state {
            JobState::Failed => {
                handle.fail(JobError::Exited { code: 2 });
            }
            other => {
                handle.advance(other);
            }
        }
        handle
    }

    #[test]
    fn counts_and_failures() {
        let ws = Workspace::new("/tmp/ws");
        let handles = vec![
            finished("a", JobState::Succeeded),
            finished("b", JobState::Failed),
            finished("c", JobState::Cancelled),
            finished("d", JobState::Succeeded),
        ];

        let summary = PoolSummary::from_handles(&handles, &ws);

        assert_eq!((summary.succeeded, summary.failed, summary.cancelled), (2, 1, 1));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].command, "run b");
        assert_eq!(summary.failures[0].reason, "job exited with code 2");
        assert_eq!(summary.failures[0].stderr, Some(PathBuf::from("/tmp/ws/logs/b.err")));
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn exit_codes() {
        let ws = Workspace::new("/tmp/ws");
        let ok = PoolSummary::from_handles(&[finished("a", JobState::Succeeded)], &ws);
        assert_eq!(ok.exit_code(), 0);
        assert!(ok.all_succeeded());

        let cancelled = PoolSummary::from_handles(&[finished("a", JobState::Cancelled)], &ws);
        assert_eq!(cancelled.exit_code(), 130);
    }

    #[test]
    fn display_lists_failed_commands() {
        let ws = Workspace::new("/tmp/ws");
        let summary = PoolSummary::from_handles(&[finished("b", JobState::Failed)], &ws);

        let text = summary.to_string();

        assert!(text.starts_with("1 job(s): 0 succeeded, 1 failed, 0 cancelled"));
        assert!(text.contains("command: run b"));
    }
}
