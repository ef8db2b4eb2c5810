//! Render LSF job scripts and talk to the batch scheduler

/// An immutable description of one job: command plus resource requests
pub mod job_spec;

/// Job lifecycle states and the LSF status vocabulary
pub mod state;

/// Render a JobSpec into a `#BSUB` script using TinyTemplate
pub mod script;

/// The scheduler seam: submit, poll and cancel jobs
pub mod client;

/// SubmissionClient backed by the LSF command line tools (bsub, bjobs, bkill)
pub mod bsub;
