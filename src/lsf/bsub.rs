use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use log::{debug, info};
use tokio::process::Command;

use crate::lsf::client::{PollError, SchedulerStatus, SubmissionClient, SubmitError};
use crate::lsf::state::JobState;

/// stderr fragments LSF prints when mbatchd can't be reached
static UNAVAILABLE: [&str; 5] = [
    "lsf is down",
    "cannot connect",
    "not responding",
    "failed in an lsf library call",
    "please wait",
];

/// Talks to LSF through its command line tools
///
/// Scripts are fed to `bsub` on stdin so the `#BSUB` directives in them are honoured.
#[derive(Debug, Clone)]
pub struct BsubClient {
    pub bsub: PathBuf,
    pub bjobs: PathBuf,
    pub bkill: PathBuf,
}

impl Default for BsubClient {
    fn default() -> Self {
        BsubClient {
            bsub: PathBuf::from("bsub"),
            bjobs: PathBuf::from("bjobs"),
            bkill: PathBuf::from("bkill"),
        }
    }
}

#[async_trait]
impl SubmissionClient for BsubClient {
    async fn submit(&self, script: &Path) -> Result<String, SubmitError> {
        let stdin = File::open(script)
            .map_err(|err| SubmitError::Spawn(format!("can't open {}: {err}", script.display())))?;

        let mut bsub = Command::new(&self.bsub);
        let cmd = bsub.stdin(Stdio::from(stdin));
        info!("Running bsub < {}", script.display());
        debug!("{:?}", &cmd);
        let output = cmd.output().await.map_err(|err| SubmitError::Spawn(format!("{}: {err}", self.bsub.display())))?;

        if !output.status.success() {
            let stderr = stderr(&output);
            return Err(match is_unavailable(&stderr) {
                true => SubmitError::Unavailable(stderr),
                false => SubmitError::Rejected(stderr),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_job_id(&stdout).ok_or_else(|| SubmitError::Rejected(format!("no job id in bsub output: {}", stdout.trim())))
    }

    async fn poll(&self, scheduler_id: &str) -> Result<SchedulerStatus, PollError> {
        let output = Command::new(&self.bjobs)
            .args(["-noheader", "-o", "stat exit_code", scheduler_id])
            .output()
            .await
            .map_err(|err| PollError::Unavailable(format!("{}: {err}", self.bjobs.display())))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() || stdout.trim().is_empty() {
            let stderr = stderr(&output);
            return Err(match is_unavailable(&stderr) {
                true => PollError::Unavailable(stderr),
                false => PollError::Unparseable(stderr),
            });
        }

        parse_status(&stdout)
    }

    async fn cancel(&self, scheduler_id: &str) -> Result<(), SubmitError> {
        info!("Running bkill {scheduler_id}");
        let output = Command::new(&self.bkill)
            .arg(scheduler_id)
            .output()
            .await
            .map_err(|err| SubmitError::Spawn(format!("{}: {err}", self.bkill.display())))?;

        let stderr = stderr(&output);
        if output.status.success() || stderr.contains("already finished") {
            Ok(())
        } else if is_unavailable(&stderr) {
            Err(SubmitError::Unavailable(stderr))
        } else {
            Err(SubmitError::Rejected(stderr))
        }
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn is_unavailable(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    UNAVAILABLE.iter().any(|fragment| stderr.contains(fragment))
}

/// Extract the id from `Job <1234> is submitted to queue <normal>.`
fn parse_job_id(stdout: &str) -> Option<String> {
    let line = stdout.lines().find(|line| line.starts_with("Job <"))?;
    let start = line.find('<')? + 1;
    let end = start + line[start..].find('>')?;
    let id = &line[start..end];
    match !id.is_empty() && id.chars().all(|c| c.is_ascii_digit() || c == '[' || c == ']') {
        true => Some(id.to_string()),
        false => None,
    }
}

/// Parse one line of `bjobs -noheader -o "stat exit_code"`, e.g. `EXIT 2` or `RUN -`
fn parse_status(stdout: &str) -> Result<SchedulerStatus, PollError> {
    let line = stdout.lines().next().unwrap_or_default();
    let mut fields = line.split_whitespace();
    let stat = fields.next().ok_or_else(|| PollError::Unparseable(line.to_string()))?;
    let state = JobState::from_lsf(stat).ok_or_else(|| PollError::UnknownStatus(stat.to_string()))?;
    let exit_code = fields.next().and_then(|code| code.parse::<i32>().ok());
    Ok(SchedulerStatus { state, exit_code })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_from_bsub_output() {
        let stdout = "Job <20817> is submitted to queue <normal>.\n";
        assert_eq!(parse_job_id(stdout), Some("20817".to_string()));
    }

    #[test]
    fn job_id_after_noise() {
        let stdout = "Warning: project not set\nJob <7> is submitted to default queue <short>.\n";
        assert_eq!(parse_job_id(stdout), Some("7".to_string()));
    }

    #[test]
    fn no_job_id() {
        assert_eq!(parse_job_id("Request aborted by esub. Job not submitted.\n"), None);
        assert_eq!(parse_job_id("Job <> is submitted\n"), None);
    }

    #[test]
    fn status_lines() {
        assert_eq!(parse_status("RUN -\n").unwrap(), SchedulerStatus::new(JobState::Running));
        assert_eq!(parse_status("PEND -").unwrap(), SchedulerStatus::new(JobState::Submitted));
        assert_eq!(parse_status("DONE -").unwrap(), SchedulerStatus::new(JobState::Succeeded));
        assert_eq!(
            parse_status("EXIT 137").unwrap(),
            SchedulerStatus { state: JobState::Failed, exit_code: Some(137) }
        );
    }

    #[test]
    fn unknown_status_is_a_poll_error() {
        assert_eq!(parse_status("UNKWN -"), Err(PollError::UnknownStatus("UNKWN".to_string())));
        assert!(matches!(parse_status(""), Err(PollError::Unparseable(_))));
    }

    #[test]
    fn unavailable_scheduler() {
        assert!(is_unavailable("LSF is down. Please wait ..."));
        assert!(is_unavailable("batch system daemon not responding ... still trying"));
        assert!(!is_unavailable("No such queue. Job not submitted."));
    }
}
