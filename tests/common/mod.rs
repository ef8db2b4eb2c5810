#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use autobsub::lsf::client::{Backoff, PollError, SchedulerStatus, SubmissionClient, SubmitError};
use autobsub::lsf::state::JobState;
use autobsub::pool::{JobPool, PoolConfig};
use autobsub::workspace::Workspace;
use tempfile::TempDir;

/// What the stub saw when a job was submitted
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: String,
    pub job_name: String,
    pub node: Option<String>,
    pub command: String,
    /// jobs that had already finished at submission time
    pub finished_before: usize,
}

#[derive(Debug)]
struct StubJob {
    name: String,
    node: Option<String>,
    command: String,
    polls: usize,
    final_state: Option<JobState>,
}

#[derive(Debug, Default)]
struct StubState {
    next_id: u64,
    jobs: HashMap<String, StubJob>,
    submissions: Vec<Submission>,
    attempts: HashMap<String, u32>,
    finished: usize,
    live: usize,
    max_live: usize,
    live_per_node: HashMap<String, usize>,
    max_per_node: HashMap<String, usize>,
    cancelled: Vec<String>,
}

/// In-process stand-in for LSF
///
/// Reads back the rendered `#BSUB` script, so it sees what bsub would see. Commands containing
/// `reject` are refused, `fail` exits 1, `flaky` is unavailable on its first attempt. Everything
/// else runs for `polls` status queries and then succeeds.
#[derive(Debug)]
pub struct StubScheduler {
    state: Mutex<StubState>,
    polls: usize,
    never_finish: bool,
    /// how long each bsub call takes
    submit_delay: Duration,
}

impl StubScheduler {
    fn build(polls: usize, never_finish: bool, submit_delay: Duration) -> Arc<Self> {
        Arc::new(StubScheduler { state: Mutex::new(StubState::default()), polls, never_finish, submit_delay })
    }

    pub fn new() -> Arc<Self> {
        Self::running_for(1)
    }

    pub fn running_for(polls: usize) -> Arc<Self> {
        Self::build(polls, false, Duration::ZERO)
    }

    pub fn never_finishing() -> Arc<Self> {
        Self::build(0, true, Duration::ZERO)
    }

    pub fn slow_to_submit(delay: Duration) -> Arc<Self> {
        Self::build(1, false, delay)
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.submissions().into_iter().map(|s| s.job_name).collect()
    }

    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn max_on_node(&self, node: &str) -> usize {
        self.state.lock().unwrap().max_per_node.get(node).copied().unwrap_or(0)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn attempts(&self, job_name: &str) -> u32 {
        self.state.lock().unwrap().attempts.get(job_name).copied().unwrap_or(0)
    }
}

fn directive(script: &str, flag: &str) -> Option<String> {
    let prefix = format!("#BSUB {flag} ");
    script.lines().find_map(|line| line.strip_prefix(&prefix).map(str::to_string))
}

fn finish(state: &mut StubState, id: &str, final_state: JobState) {
    let Some(job) = state.jobs.get_mut(id) else { return };
    if job.final_state.is_some() {
        return;
    }
    job.final_state = Some(final_state);
    let node = job.node.clone();
    state.live -= 1;
    state.finished += 1;
    if let Some(node) = node {
        if let Some(live) = state.live_per_node.get_mut(&node) {
            *live -= 1;
        }
    }
}

#[async_trait]
impl SubmissionClient for StubScheduler {
    async fn submit(&self, script: &Path) -> Result<String, SubmitError> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }
        let text = fs::read_to_string(script).map_err(|err| SubmitError::Spawn(err.to_string()))?;
        let job_name = directive(&text, "-J").ok_or_else(|| SubmitError::Rejected("no job name".into()))?;
        let node = directive(&text, "-m");
        let command = text.lines().rev().find(|line| !line.trim().is_empty()).unwrap_or_default().to_string();

        let mut state = self.state.lock().unwrap();
        let attempt = {
            let attempts = state.attempts.entry(job_name.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        if command.contains("reject") {
            return Err(SubmitError::Rejected("Bad resource requirement syntax".into()));
        }
        if command.contains("flaky") && attempt == 1 {
            return Err(SubmitError::Unavailable("LSF is down. Please wait ...".into()));
        }

        state.next_id += 1;
        let id = state.next_id.to_string();
        state.live += 1;
        state.max_live = state.max_live.max(state.live);
        if let Some(node) = &node {
            let live = {
                let live = state.live_per_node.entry(node.clone()).or_insert(0);
                *live += 1;
                *live
            };
            let max = state.max_per_node.entry(node.clone()).or_insert(0);
            *max = (*max).max(live);
        }
        let finished_before = state.finished;
        state.submissions.push(Submission {
            id: id.clone(),
            job_name: job_name.clone(),
            node: node.clone(),
            command: command.clone(),
            finished_before,
        });
        state.jobs.insert(id.clone(), StubJob { name: job_name, node, command, polls: 0, final_state: None });
        Ok(id)
    }

    async fn poll(&self, scheduler_id: &str) -> Result<SchedulerStatus, PollError> {
        let mut state = self.state.lock().unwrap();
        let job = state
            .jobs
            .get_mut(scheduler_id)
            .ok_or_else(|| PollError::Unparseable(format!("Job <{scheduler_id}> is not found")))?;

        if let Some(final_state) = job.final_state {
            return Ok(SchedulerStatus::new(final_state));
        }
        job.polls += 1;
        if self.never_finish || job.polls <= self.polls {
            return Ok(SchedulerStatus::new(JobState::Running));
        }

        let failed = job.command.contains("fail");
        let final_state = match failed {
            true => JobState::Failed,
            false => JobState::Succeeded,
        };
        finish(&mut state, scheduler_id, final_state);
        Ok(SchedulerStatus { state: final_state, exit_code: failed.then_some(1) })
    }

    async fn cancel(&self, scheduler_id: &str) -> Result<(), SubmitError> {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(scheduler_id.to_string());
        finish(&mut state, scheduler_id, JobState::Cancelled);
        Ok(())
    }
}

/// Pool config with test-friendly timings
pub fn quick_config() -> PoolConfig {
    PoolConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_backoff(Backoff { attempts: 3, base: Duration::from_millis(1) })
}

pub fn workspace(tmp: &TempDir) -> Workspace {
    Workspace::new(tmp.path().join(".autobsub"))
}

pub fn pool(config: PoolConfig, stub: &Arc<StubScheduler>, tmp: &TempDir) -> JobPool {
    JobPool::new(config, stub.clone(), workspace(tmp)).unwrap()
}

pub fn commands(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("echo job {i}")).collect()
}
