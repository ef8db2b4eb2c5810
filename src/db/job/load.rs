use rusqlite::Connection;

use crate::lsf::state::JobState;

/// One row of the ledger
#[derive(Debug, Clone)]
pub struct ArchivedJob {
    pub job_name: String,
    pub command: String,
    pub node: Option<String>,
    pub scheduler_id: Option<String>,
    pub state: JobState,
    pub reason: Option<String>,
    pub finished_at: Option<String>,
    pub archived_at: String,
}

/// Most recently archived jobs first
pub fn get_recent_jobs(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<ArchivedJob>> {
    let mut stmt = conn.prepare(
        "SELECT job_name, command, node, scheduler_id, state, reason, finished_at, archived_at
         FROM job ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        let state: String = row.get(4)?;
        Ok(ArchivedJob {
            job_name: row.get(0)?,
            command: row.get(1)?,
            node: row.get(2)?,
            scheduler_id: row.get(3)?,
            // the schema CHECK keeps this to known names
            state: JobState::parse(&state).unwrap_or(JobState::Failed),
            reason: row.get(5)?,
            finished_at: row.get(6)?,
            archived_at: row.get(7)?,
        })
    })?;

    let jobs: rusqlite::Result<Vec<ArchivedJob>> = rows.collect();
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job::archive::archive_jobs;
    use crate::db::open::open_db;
    use crate::lsf::job_spec::JobSpec;
    use crate::pool::handle::{JobError, JobHandle};
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    #[test]
    fn archive_then_load() {
        let tmp = TempDir::new().unwrap();
        let mut conn = open_db(&Workspace::new(tmp.path())).unwrap();

        let mut ok = JobHandle::new(JobSpec::new("echo ok", "run_1", 2).on_node(Some("n1".into())));
        ok.submitted("11".into());
        ok.advance(JobState::Succeeded);
        let mut bad = JobHandle::new(JobSpec::new("false", "run_2", 2));
        bad.fail(JobError::SubmissionRejected { attempts: 1, message: "Bad queue".into() });

        assert_eq!(archive_jobs(&mut conn, &[ok, bad]).unwrap(), 2);
        let jobs = get_recent_jobs(&conn, 10).unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job_name, "run_2");
        assert_eq!(jobs[0].state, JobState::Failed);
        assert!(jobs[0].scheduler_id.is_none());
        assert!(jobs[0].reason.as_deref().unwrap().contains("Bad queue"));
        assert_eq!(jobs[1].node.as_deref(), Some("n1"));
        assert_eq!(jobs[1].scheduler_id.as_deref(), Some("11"));
        assert!(jobs[1].finished_at.is_some());

        assert_eq!(get_recent_jobs(&conn, 1).unwrap().len(), 1);
    }
}
