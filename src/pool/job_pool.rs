use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, Instant};

use crate::db::job::archive::archive_jobs;
use crate::db::open::open_db;
use crate::lsf::client::{submit_with_retry, Backoff, PollError, SchedulerStatus, SubmissionClient, SubmitError};
use crate::lsf::job_spec::JobSpec;
use crate::lsf::script::ScriptGenerator;
use crate::lsf::state::JobState;
use crate::pool::assigner::{NodeAssigner, Placement};
use crate::pool::config::{validate_job_name, PoolConfig};
use crate::pool::handle::{JobError, JobHandle};
use crate::pool::summary::PoolSummary;
use crate::pool::PoolError;
use crate::workspace::Workspace;

/// Messages from the workers back to the orchestrator loop
#[derive(Debug)]
enum WorkerEvent {
    Submitted { index: usize, result: Result<String, (SubmitError, u32)> },
    /// The pool was cancelled before this job reached the scheduler
    Skipped { index: usize },
    Polled { index: usize, result: Result<SchedulerStatus, PollError> },
}

#[derive(Debug)]
struct SubmitRequest {
    index: usize,
    script: PathBuf,
}

/// A dispatched job and the bookkeeping the loop needs for it
#[derive(Debug)]
struct Tracked {
    handle: JobHandle,
    node: Option<String>,
    /// holds one of the pool's slots
    active: bool,
    polling: bool,
}

/// State of one `submit_all` invocation, owned by the orchestrator loop
struct Run {
    pending: VecDeque<JobSpec>,
    jobs: Vec<Tracked>,
    active: usize,
    limit: usize,
    assigner: NodeAssigner,
}

impl Run {
    fn is_done(&self) -> bool {
        self.pending.is_empty() && self.active == 0
    }

    /// A dispatched job the scheduler hasn't accepted yet
    fn is_submitting(&self) -> bool {
        self.jobs.iter().any(|job| job.active && job.handle.scheduler_id.is_none())
    }

    /// Pending jobs wait only because every node is at its cap
    ///
    /// A full pool or a slow submission is progress, not a stall.
    fn is_blocked_on_nodes(&self) -> bool {
        !self.pending.is_empty()
            && self.active < self.limit
            && !self.assigner.has_capacity()
            && !self.is_submitting()
    }

    /// Give back the slot (and node) of a job that reached a terminal state
    fn release(&mut self, index: usize) {
        let job = &mut self.jobs[index];
        if !job.active {
            return;
        }
        job.active = false;
        self.active -= 1;
        if let Some(node) = job.node.take() {
            self.assigner.release(&node);
        }
    }

    fn into_handles(self) -> Vec<JobHandle> {
        self.jobs.into_iter().map(|job| job.handle).collect()
    }
}

/// Cancels a running pool from anywhere, e.g. a Ctrl-C handler
#[derive(Debug, Clone)]
pub struct PoolCanceller {
    tx: Arc<watch::Sender<bool>>,
}

impl PoolCanceller {
    pub fn cancel(&self) {
        info!("Cancelling job pool");
        self.tx.send_replace(true);
    }
}

/// Submits a list of commands to the scheduler with bounded concurrency
///
/// One orchestrator loop owns all job state. Submissions go through a single worker task so the
/// scheduler sees jobs in input order; status polls run as one task per in-flight job. Workers
/// report back over a channel and never touch job state themselves.
pub struct JobPool {
    config: PoolConfig,
    client: Arc<dyn SubmissionClient>,
    workspace: Workspace,
    generator: ScriptGenerator,
    cancel: Arc<watch::Sender<bool>>,
}

impl JobPool {
    pub fn new(config: PoolConfig, client: Arc<dyn SubmissionClient>, workspace: Workspace) -> Result<Self, PoolError> {
        config.validate()?;
        let generator = ScriptGenerator::new().map_err(|err| PoolError::InvalidConfig(err.to_string()))?;
        let (tx, _) = watch::channel(false);
        Ok(JobPool { config, client, workspace, generator, cancel: Arc::new(tx) })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// A cancelled pool stays cancelled
    pub fn canceller(&self) -> PoolCanceller {
        PoolCanceller { tx: Arc::clone(&self.cancel) }
    }

    /// Submit every non-blank command and wait until each job reached a terminal state
    ///
    /// `job_name` prefixes the job names (`<job_name>_<n>`, or just `<job_name>` for a single
    /// command); an empty name falls back to the configured prefix. Per-job failures are recorded
    /// on the returned handles. Errors are reserved for the whole invocation: a workspace that
    /// can't be prepared, or pending jobs stalled for longer than `stall_timeout`.
    pub async fn submit_all<I, S>(&self, commands: I, job_name: &str) -> Result<Vec<JobHandle>, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefix = match job_name.is_empty() {
            true => self.config.job_name_prefix.clone(),
            false => job_name.to_string(),
        };
        validate_job_name(&prefix)?;
        self.workspace.prepare()?;

        let pending = self.job_specs(commands, &prefix);
        let limit = self.config.effective_pool_size(pending.len());
        info!("Submitting {} job(s) with up to {limit} in flight", pending.len());

        let mut run = Run {
            pending,
            jobs: Vec::new(),
            active: 0,
            limit,
            assigner: NodeAssigner::new(self.config.node_list.as_deref(), self.config.max_jobs_per_node),
        };

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let mut cancelled = self.cancel.subscribe();
        // set on user cancellation and on a stall, queued submissions are skipped once it is
        let (stop_tx, stop_rx) = watch::channel(false);
        let submitter =
            spawn_submitter(Arc::clone(&self.client), self.config.backoff, submit_rx, events_tx.clone(), stop_rx);

        let mut kills: Vec<JoinHandle<()>> = Vec::new();
        let mut polls: JoinSet<()> = JoinSet::new();
        let mut cancelling = false;
        let mut stalled: Option<(usize, Duration)> = None;
        let mut blocked_since = Instant::now();

        loop {
            if !cancelling && *cancelled.borrow() {
                cancelling = true;
                stop_tx.send_replace(true);
                self.cancel_outstanding(&mut run, &mut kills);
            }

            if !cancelling {
                let dispatched = self.dispatch(&mut run, &submit_tx);
                if dispatched > 0 {
                    debug!("Dispatched {dispatched} job(s), {} in flight", run.active);
                }
                if !run.is_blocked_on_nodes() {
                    blocked_since = Instant::now();
                } else if let Some(timeout) = self.config.stall_timeout {
                    let waited = blocked_since.elapsed();
                    if waited >= timeout {
                        warn!("{} job(s) waited {waited:?} for a free node, giving up", run.pending.len());
                        stalled = Some((run.pending.len(), waited));
                        cancelling = true;
                        stop_tx.send_replace(true);
                        self.cancel_outstanding(&mut run, &mut kills);
                    }
                }
            }

            if run.is_done() {
                break;
            }

            let tick = sleep(self.config.poll_interval);
            tokio::pin!(tick);
            loop {
                tokio::select! {
                    _ = &mut tick => break,
                    Some(event) = events.recv() => {
                        self.apply(&mut run, event, cancelling, &mut kills);
                        if run.is_done() {
                            break;
                        }
                    }
                    Some(joined) = polls.join_next(), if !polls.is_empty() => {
                        if let Err(err) = joined {
                            warn!("Status query task ended abnormally: {err}");
                        }
                    }
                    _ = cancelled.changed(), if !cancelling => break,
                }
            }

            if !cancelling && !run.is_done() {
                self.poll_in_flight(&mut run, &events_tx, &mut polls);
            }
        }

        // late results are of no use once every job is terminal
        polls.shutdown().await;
        drop(submit_tx);
        if let Err(err) = submitter.await {
            warn!("Submission worker ended abnormally: {err}");
        }
        for kill in kills {
            if let Err(err) = kill.await {
                warn!("Cancellation task ended abnormally: {err}");
            }
        }

        let handles = run.into_handles();
        self.archive(&handles);

        match stalled {
            Some((pending, waited)) => Err(PoolError::Stalled { pending, waited }),
            None => Ok(handles),
        }
    }

    /// One JobSpec per non-blank command, in input order
    fn job_specs<I, S>(&self, commands: I, prefix: &str) -> VecDeque<JobSpec>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let commands: Vec<String> = commands
            .into_iter()
            .map(|command| command.as_ref().trim().to_string())
            .filter(|command| !command.is_empty())
            .collect();

        let single = commands.len() == 1;
        commands
            .into_iter()
            .enumerate()
            .map(|(i, command)| {
                let name = match single {
                    true => prefix.to_string(),
                    false => format!("{prefix}_{}", i + 1),
                };
                JobSpec::new(command, name, self.config.cpus_per_job).with_queue(self.config.queue.clone())
            })
            .collect()
    }

    /// Submit pending jobs in order while slots and node capacity last, returns how many went out
    fn dispatch(&self, run: &mut Run, submit_tx: &mpsc::UnboundedSender<SubmitRequest>) -> usize {
        let mut dispatched = 0;
        while run.active < run.limit && !run.pending.is_empty() {
            let node = match run.assigner.assign() {
                Placement::Unconstrained => None,
                Placement::Node(node) => Some(node),
                Placement::Saturated => {
                    debug!("All nodes at capacity, {} job(s) wait for the next tick", run.pending.len());
                    break;
                }
            };
            let Some(spec) = run.pending.pop_front() else { break };
            let mut handle = JobHandle::new(spec.on_node(node.clone()));
            let index = run.jobs.len();

            match self.stage(&handle.spec) {
                Ok(script) => {
                    handle.script = Some(script.clone());
                    run.jobs.push(Tracked { handle, node, active: true, polling: false });
                    run.active += 1;
                    dispatched += 1;
                    if submit_tx.send(SubmitRequest { index, script }).is_err() {
                        let job = &mut run.jobs[index];
                        job.handle.fail(JobError::SubmissionRejected {
                            attempts: 0,
                            message: "submission worker is gone".to_string(),
                        });
                        run.release(index);
                    }
                }
                Err(err) => {
                    if let Some(node) = &node {
                        run.assigner.release(node);
                    }
                    handle.fail(err);
                    run.jobs.push(Tracked { handle, node: None, active: false, polling: false });
                }
            }
        }
        dispatched
    }

    /// Render the job script and write it into the workspace
    fn stage(&self, spec: &JobSpec) -> Result<PathBuf, JobError> {
        let script = self.generator.render(spec, &self.workspace)?;
        let path = self.workspace.script_path(&spec.job_name);
        if path.exists() {
            warn!("Job script {} already exists, it will be overwritten", path.display());
        }
        fs::write(&path, script.content).map_err(|err| JobError::Script(format!("{}: {err}", path.display())))?;
        debug!("Wrote job script {}", path.display());
        Ok(path)
    }

    fn apply(&self, run: &mut Run, event: WorkerEvent, cancelling: bool, kills: &mut Vec<JoinHandle<()>>) {
        match event {
            WorkerEvent::Submitted { index, result: Ok(scheduler_id) } => {
                let job = &mut run.jobs[index];
                job.handle.submitted(scheduler_id.clone());
                if cancelling {
                    kills.push(self.spawn_kill(scheduler_id));
                    job.handle.cancel();
                    run.release(index);
                }
            }
            WorkerEvent::Submitted { index, result: Err((err, attempts)) } => {
                run.jobs[index].handle.fail(JobError::SubmissionRejected { attempts, message: err.to_string() });
                run.release(index);
            }
            WorkerEvent::Skipped { index } => {
                run.jobs[index].handle.cancel();
                run.release(index);
            }
            WorkerEvent::Polled { index, result } => {
                let job = &mut run.jobs[index];
                job.polling = false;
                if job.handle.is_terminal() {
                    return;
                }
                match result {
                    Ok(status) if status.state == JobState::Failed => {
                        let error = match status.exit_code {
                            Some(code) => JobError::Exited { code },
                            None => JobError::Scheduler,
                        };
                        job.handle.fail(error);
                    }
                    Ok(status) => {
                        if job.handle.advance(status.state) && status.state == JobState::Succeeded {
                            info!("{} succeeded", job.handle.spec.job_name);
                        }
                    }
                    Err(err) => {
                        warn!("Polling {} failed, retrying next tick: {err}", job.handle.spec.job_name);
                    }
                }
                if job.handle.is_terminal() {
                    run.release(index);
                }
            }
        }
    }

    /// Spawn one status query per in-flight job that isn't already being polled
    fn poll_in_flight(&self, run: &mut Run, events: &mpsc::UnboundedSender<WorkerEvent>, polls: &mut JoinSet<()>) {
        for (index, job) in run.jobs.iter_mut().enumerate() {
            if !job.active || job.polling || !job.handle.state.is_in_flight() {
                continue;
            }
            let Some(scheduler_id) = job.handle.scheduler_id.clone() else { continue };
            job.polling = true;

            let client = Arc::clone(&self.client);
            let events = events.clone();
            polls.spawn(async move {
                let result = client.poll(&scheduler_id).await;
                if events.send(WorkerEvent::Polled { index, result }).is_err() {
                    debug!("Pool finished before the status of {scheduler_id} came back");
                }
            });
        }
    }

    /// Drop pending jobs and kill what the scheduler already holds
    ///
    /// Jobs whose submission is still in flight are resolved when the submitter reports back.
    fn cancel_outstanding(&self, run: &mut Run, kills: &mut Vec<JoinHandle<()>>) {
        let dropped = run.pending.len();
        while let Some(spec) = run.pending.pop_front() {
            let mut handle = JobHandle::new(spec);
            handle.cancel();
            run.jobs.push(Tracked { handle, node: None, active: false, polling: false });
        }

        let mut killed = 0;
        for index in 0..run.jobs.len() {
            let job = &mut run.jobs[index];
            if !job.active || !job.handle.state.is_in_flight() {
                continue;
            }
            if let Some(scheduler_id) = job.handle.scheduler_id.clone() {
                kills.push(self.spawn_kill(scheduler_id));
                killed += 1;
            }
            job.handle.cancel();
            run.release(index);
        }

        info!("Dropped {dropped} pending job(s), cancelling {killed} submitted job(s)");
    }

    fn spawn_kill(&self, scheduler_id: String) -> JoinHandle<()> {
        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            if let Err(err) = client.cancel(&scheduler_id).await {
                warn!("Couldn't cancel scheduler job {scheduler_id}: {err}");
            }
        })
    }

    /// Archive handles and write the run summary. Failures here don't change the outcome.
    fn archive(&self, handles: &[JobHandle]) {
        match open_db(&self.workspace).and_then(|mut conn| archive_jobs(&mut conn, handles)) {
            Ok(_) => {}
            Err(err) => warn!("Couldn't archive jobs in {}: {err}", self.workspace.ledger_path().display()),
        }

        let summary = PoolSummary::from_handles(handles, &self.workspace);
        if let Err(err) = summary.write(&self.workspace.summary_path()) {
            warn!("Couldn't write run summary: {err}");
        }
    }
}

/// The single submission worker: submits in request order, so the scheduler sees input order
fn spawn_submitter(
    client: Arc<dyn SubmissionClient>,
    backoff: Backoff,
    mut requests: mpsc::UnboundedReceiver<SubmitRequest>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(SubmitRequest { index, script }) = requests.recv().await {
            let skip = *stop.borrow();
            let event = match skip {
                true => WorkerEvent::Skipped { index },
                false => {
                    let result = submit_with_retry(client.as_ref(), &script, backoff).await;
                    WorkerEvent::Submitted { index, result }
                }
            };
            if events.send(event).is_err() {
                break;
            }
        }
    })
}
