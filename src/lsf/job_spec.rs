use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JobSpec {
    pub command: String,
    pub job_name: String,
    pub cpus: u32,
    pub node: Option<String>,
    pub queue: Option<String>,
}

impl JobSpec {
    pub fn new(command: impl Into<String>, job_name: impl Into<String>, cpus: u32) -> Self {
        JobSpec {
            command: command.into(),
            job_name: job_name.into(),
            cpus,
            node: None,
            queue: None,
        }
    }

    pub fn with_queue(mut self, queue: Option<String>) -> Self {
        self.queue = queue;
        self
    }

    /// Copy of this spec pinned to a node (placement is decided after the spec is built)
    pub fn on_node(&self, node: Option<String>) -> Self {
        JobSpec { node, ..self.clone() }
    }
}
