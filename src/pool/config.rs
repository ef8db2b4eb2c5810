use std::collections::HashSet;
use std::time::Duration;

use log::warn;

use crate::lsf::client::Backoff;
use crate::pool::PoolError;

/// Upper sanity bound for `pool_size`
pub const MAX_POOL_SIZE: usize = 1000;

pub static DEFAULT_JOB_NAME: &str = "autobsub";

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Concurrency ceiling. None or 0 means one slot per command (no throttling).
    pub pool_size: Option<usize>,
    pub cpus_per_job: u32,
    /// Only meaningful together with `node_list`
    pub max_jobs_per_node: Option<usize>,
    pub node_list: Option<Vec<String>>,
    pub queue: Option<String>,
    pub job_name_prefix: String,
    /// Time between two status polls of the in-flight jobs
    pub poll_interval: Duration,
    /// Give up when pending jobs waited this long for a node below `max_jobs_per_node`. None waits forever.
    pub stall_timeout: Option<Duration>,
    pub backoff: Backoff,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            pool_size: None,
            cpus_per_job: 1,
            max_jobs_per_node: None,
            node_list: None,
            queue: None,
            job_name_prefix: DEFAULT_JOB_NAME.to_string(),
            poll_interval: Duration::from_secs(5),
            stall_timeout: None,
            backoff: Backoff::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = Some(pool_size);
        self
    }

    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus_per_job = cpus;
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<String>, max_jobs_per_node: Option<usize>) -> Self {
        self.node_list = Some(nodes);
        self.max_jobs_per_node = max_jobs_per_node;
        self
    }

    pub fn with_queue(mut self, queue: Option<String>) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_job_name(mut self, prefix: impl Into<String>) -> Self {
        self.job_name_prefix = prefix.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stall_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if let Some(size) = self.pool_size {
            if size > MAX_POOL_SIZE {
                return invalid(format!("pool_size {size} is above the limit of {MAX_POOL_SIZE}"));
            }
        }
        if self.cpus_per_job == 0 {
            return invalid("cpus_per_job must be at least 1".to_string());
        }
        if self.max_jobs_per_node == Some(0) {
            return invalid("max_jobs_per_node must be at least 1".to_string());
        }
        if self.poll_interval.is_zero() {
            return invalid("poll_interval must be longer than zero".to_string());
        }
        if let Some(queue) = &self.queue {
            if queue.trim().is_empty() || queue.contains(char::is_whitespace) {
                return invalid(format!("queue {queue:?} is not a valid queue name"));
            }
        }
        validate_job_name(&self.job_name_prefix)?;

        match &self.node_list {
            Some(nodes) => validate_nodes(nodes)?,
            None => {
                if let Some(max) = self.max_jobs_per_node {
                    warn!("max_jobs_per_node ({max}) is ignored without a node list");
                }
            }
        }

        Ok(())
    }

    /// Concurrency ceiling for a pool of `n` jobs: `min(pool_size, n)`, 0 meaning unbounded
    pub fn effective_pool_size(&self, n: usize) -> usize {
        match self.pool_size {
            None | Some(0) => n,
            Some(size) => size.min(n),
        }
    }
}

/// Job names end up in file names and `#BSUB -J`, keep them boring
pub fn validate_job_name(name: &str) -> Result<(), PoolError> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if name.is_empty() || name.starts_with('.') || !name.chars().all(allowed) {
        return invalid(format!("job name {name:?} may only contain letters, digits, '_', '-' and '.'"));
    }
    Ok(())
}

fn validate_nodes(nodes: &[String]) -> Result<(), PoolError> {
    if nodes.is_empty() {
        return invalid("node_list is set but empty".to_string());
    }
    let mut seen = HashSet::new();
    for node in nodes {
        if node.trim().is_empty() || node.contains(char::is_whitespace) {
            return invalid(format!("node {node:?} is not a valid host name"));
        }
        if !seen.insert(node.as_str()) {
            return invalid(format!("node {node} is listed twice"));
        }
    }
    Ok(())
}

fn invalid(reason: String) -> Result<(), PoolError> {
    Err(PoolError::InvalidConfig(reason))
}
