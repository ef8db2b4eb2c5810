use log::info;
use rusqlite::Connection;

use crate::workspace::Workspace;

pub fn open_db(workspace: &Workspace) -> rusqlite::Result<Connection> {
    let path = workspace.ledger_path();
    if !path.exists() { info!("Creating new job ledger {}", path.display()) }
    let conn = Connection::open(&path)?;

    static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
    conn.execute_batch(SCHEMA)?;

    Ok(conn)
}
