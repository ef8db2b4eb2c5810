//! Submit batches of shell commands to an LSF cluster without writing job scripts by hand
//!
//! A [`pool::JobPool`] takes a list of commands, renders one `#BSUB` script per command into the
//! [`workspace::Workspace`], and keeps at most `pool_size` of them (and at most
//! `max_jobs_per_node` per node) at the scheduler until every job has finished.

/// Render job scripts and talk to LSF
pub mod lsf;

/// Bounded-concurrency submission of many jobs
pub mod pool;

/// The directory holding generated scripts, logs and the ledger
pub mod workspace;

/// SQLite ledger of finished jobs
pub mod db;
