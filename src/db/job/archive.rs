use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection};

use crate::pool::handle::JobHandle;

/// Store finished handles in one transaction, returns the number of rows written
pub fn archive_jobs(conn: &mut Connection, handles: &[JobHandle]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO job (job_name, command, cpus, node, queue, scheduler_id, state, reason, submitted_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for handle in handles {
            let spec = &handle.spec;
            stmt.execute(params![
                spec.job_name,
                spec.command,
                spec.cpus,
                spec.node,
                spec.queue,
                handle.scheduler_id,
                handle.state.as_str(),
                handle.error.as_ref().map(ToString::to_string),
                timestamp(handle.submitted_at),
                timestamp(handle.finished_at),
            ])?;
        }
    }
    tx.commit()?;

    info!("Archived {} job(s) in the ledger", handles.len());
    Ok(handles.len())
}

fn timestamp(time: Option<DateTime<Utc>>) -> Option<String> {
    time.map(|time| time.to_rfc3339())
}
