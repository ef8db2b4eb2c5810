//! Finished jobs are archived in a SQLite ledger inside the workspace

/// Connect to the ledger, creating the schema on first use
pub mod open;
pub mod job;
