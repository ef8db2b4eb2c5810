use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::lsf::job_spec::JobSpec;
use crate::workspace::Workspace;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("command contains a NUL byte")]
    NulByte,
    #[error("job {0} requests zero cpus")]
    NoCpus(String),
    #[error("can't render job script: {0}")]
    Template(String),
}

/// A rendered job script, ready to be written to `path` and fed to bsub
#[derive(Debug, Clone)]
pub struct JobScript {
    pub content: String,
}

/// Rendering context for the job template
#[derive(Serialize)]
struct JobContext<'a> {
    job_name: &'a str,
    cpus: u32,
    queue: Option<&'a str>,
    node: Option<&'a str>,
    stdout: String,
    stderr: String,
    command: &'a str,
}

/// Renders JobSpecs into LSF submission scripts
///
/// The output is a shell script with `#BSUB` directives for job name, cpu count (kept on one
/// host), queue, node constraint and log paths, followed by the command verbatim. Rendering is a
/// pure function of the `JobSpec` and the workspace layout; writing the script is the caller's job.
pub struct ScriptGenerator {
    tt: TinyTemplate<'static>,
}

impl ScriptGenerator {
    pub fn new() -> Result<Self, RenderError> {
        /// included job template
        static JOB: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/job.txt"));
        let mut tt = TinyTemplate::new();
        // commands are shell, not HTML
        tt.set_default_formatter(&format_unescaped);
        tt.add_template("job", JOB).map_err(|err| RenderError::Template(err.to_string()))?;
        Ok(ScriptGenerator { tt })
    }

    pub fn render(&self, spec: &JobSpec, workspace: &Workspace) -> Result<JobScript, RenderError> {
        let command = spec.command.trim();
        if command.is_empty() {
            return Err(RenderError::EmptyCommand);
        }
        if command.contains('\0') {
            return Err(RenderError::NulByte);
        }
        if spec.cpus == 0 {
            return Err(RenderError::NoCpus(spec.job_name.clone()));
        }

        let context = JobContext {
            job_name: &spec.job_name,
            cpus: spec.cpus,
            queue: spec.queue.as_deref(),
            node: spec.node.as_deref(),
            stdout: display(&workspace.stdout_path(&spec.job_name)),
            stderr: display(&workspace.stderr_path(&spec.job_name)),
            command,
        };

        let content = self.tt.render("job", &context).map_err(|err| RenderError::Template(err.to_string()))?;
        Ok(JobScript { content })
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
