//! On-disk working directory for generated job scripts, scheduler logs and the job ledger
//!
//! Everything autobsub writes lives below a single directory (`.autobsub` in the invocation
//! directory unless overridden), so `clean` can remove exactly what this tool created:
//!
//! ```text
//! .autobsub/
//! ├── autobsub.db             job ledger
//! ├── autobsub-summary.json   summary of the last run
//! ├── scripts/                <job name>.sh
//! └── logs/                   <job name>.out, <job name>.err
//! ```

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use thiserror::Error;

/// Default workspace location, relative to the invocation directory
pub static DEFAULT_WORKDIR: &str = ".autobsub";

/// First-lines marker of every job script autobsub writes
pub static SCRIPT_MARKER: &str = "# generated by autobsub";

static SCRIPT_DIR: &str = "scripts";
static LOG_DIR: &str = "logs";
static LEDGER_FILE: &str = "autobsub.db";
static LEDGER_SIDECARS: [&str; 3] = ["-journal", "-wal", "-shm"];
static SUMMARY_FILE: &str = "autobsub-summary.json";

/// The marker is looked for this far into a script
const MARKER_LINES: usize = 3;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("can't create workspace directory {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("can't read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("can't remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub path: PathBuf,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Workspace { path: path.into() }
    }

    /// Create the workspace (and its script/log directories) if absent
    pub fn prepare(&self) -> Result<&Path, WorkspaceError> {
        for dir in [self.path.clone(), self.script_dir(), self.log_dir()] {
            if !dir.exists() {
                info!("Creating workspace directory {}", dir.display());
            }
            fs::create_dir_all(&dir).map_err(|source| WorkspaceError::Create { path: dir.clone(), source })?;
        }
        Ok(self.path.as_path())
    }

    /// Remove generated scripts, their logs, the ledger and the run summary
    ///
    /// Only files autobsub wrote are touched: scripts carrying [`SCRIPT_MARKER`], the logs named
    /// after those scripts and the ledger/summary files. Directories are removed once empty, so
    /// a workdir shared with other files keeps them. Idempotent: a missing workspace is not an
    /// error.
    pub fn clean(&self) -> Result<(), WorkspaceError> {
        if !self.path.exists() {
            info!("Nothing to clean at {}", self.path.display());
            return Ok(());
        }

        let mut removed = 0;
        for job_name in self.generated_jobs()? {
            for path in [self.stdout_path(&job_name), self.stderr_path(&job_name), self.script_path(&job_name)] {
                removed += remove_file(&path)?;
            }
        }
        for path in self.ledger_files() {
            removed += remove_file(&path)?;
        }
        removed += remove_file(&self.summary_path())?;

        for dir in [self.script_dir(), self.log_dir(), self.path.clone()] {
            remove_dir_if_empty(&dir)?;
        }

        info!("Removed {removed} file(s) from {}", self.path.display());
        if self.path.exists() {
            warn!("{} holds files autobsub didn't create, leaving them in place", self.path.display());
        }
        Ok(())
    }

    pub fn script_dir(&self) -> PathBuf {
        self.path.join(SCRIPT_DIR)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.path.join(LOG_DIR)
    }

    pub fn script_path(&self, job_name: &str) -> PathBuf {
        self.script_dir().join(format!("{job_name}.sh"))
    }

    pub fn stdout_path(&self, job_name: &str) -> PathBuf {
        self.log_dir().join(format!("{job_name}.out"))
    }

    pub fn stderr_path(&self, job_name: &str) -> PathBuf {
        self.log_dir().join(format!("{job_name}.err"))
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.path.join(LEDGER_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join(SUMMARY_FILE)
    }

    /// The ledger plus the journal files sqlite may leave next to it
    fn ledger_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.ledger_path()];
        files.extend(LEDGER_SIDECARS.iter().map(|suffix| self.path.join(format!("{LEDGER_FILE}{suffix}"))));
        files
    }

    /// Job names of the scripts in `scripts/` that autobsub wrote
    fn generated_jobs(&self) -> Result<Vec<String>, WorkspaceError> {
        let dir = self.script_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(WorkspaceError::Read { path: dir, source }),
        };

        let mut jobs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|source| WorkspaceError::Read { path: dir.clone(), source })?.path();
            if !path.is_file() || path.extension().map_or(true, |ext| ext != "sh") {
                continue;
            }
            let Some(job_name) = path.file_stem().and_then(|stem| stem.to_str()) else { continue };
            if has_marker(&path)? {
                jobs.push(job_name.to_string());
            } else {
                debug!("{} wasn't written by autobsub, keeping it", path.display());
            }
        }
        Ok(jobs)
    }
}

fn has_marker(script: &Path) -> Result<bool, WorkspaceError> {
    let file = File::open(script).map_err(|source| WorkspaceError::Read { path: script.to_path_buf(), source })?;
    for line in BufReader::new(file).lines().take(MARKER_LINES) {
        match line {
            Ok(line) if line.starts_with(SCRIPT_MARKER) => return Ok(true),
            Ok(_) => {}
            // not text, so not one of ours
            Err(_) => return Ok(false),
        }
    }
    Ok(false)
}

/// Returns how many files were removed (0 or 1)
fn remove_file(path: &Path) -> Result<usize, WorkspaceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(1),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(source) => Err(WorkspaceError::Remove { path: path.to_path_buf(), source }),
    }
}

fn remove_dir_if_empty(dir: &Path) -> Result<(), WorkspaceError> {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => return Err(WorkspaceError::Read { path: dir.to_path_buf(), source }),
    };
    if entries.next().is_some() {
        return Ok(());
    }
    fs::remove_dir(dir).map_err(|source| WorkspaceError::Remove { path: dir.to_path_buf(), source })
}

impl Default for Workspace {
    fn default() -> Self {
        Workspace::new(DEFAULT_WORKDIR)
    }
}
