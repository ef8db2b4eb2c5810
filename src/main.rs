use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};

use autobsub::db::job::load::get_recent_jobs;
use autobsub::db::open::open_db;
use autobsub::lsf::bsub::BsubClient;
use autobsub::pool::config::DEFAULT_JOB_NAME;
use autobsub::pool::{JobPool, PoolConfig, PoolSummary};
use autobsub::workspace::{Workspace, DEFAULT_WORKDIR};

/// Exit code for failures of the invocation itself (bad options, workspace, stalled pool)
const EXIT_INVOCATION: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "autobsub", version, about = "Automatically submit LSF jobs")]
struct Cli {
    /// Log progress
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log everything, including scheduler calls
    #[arg(long, global = true)]
    dev: bool,
    /// Directory for generated scripts, logs and the job ledger
    #[arg(long, global = true, env = "AUTOBSUB_WORKDIR", default_value = DEFAULT_WORKDIR)]
    workdir: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit one command as a job
    SingleJob {
        /// Shell command to run
        command: String,
        /// Run on this node
        #[arg(short, long)]
        node: Option<String>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Submit each line of a command file as its own job
    MultiJob {
        /// File with one shell command per line, blank lines are ignored
        file: PathBuf,
        /// Maximum number of jobs at the scheduler at once (0 = all)
        #[arg(short, long)]
        pool_size: Option<usize>,
        /// Maximum number of jobs per node, needs --node-list
        #[arg(short, long)]
        max_jobs_per_node: Option<usize>,
        /// Comma separated nodes to spread jobs over, round-robin
        #[arg(short, long, value_delimiter = ',')]
        node_list: Option<Vec<String>>,
        #[command(flatten)]
        job: JobArgs,
    },
    /// Remove generated scripts, logs and the job ledger
    Clean,
    /// Show recently finished jobs from the ledger
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
struct JobArgs {
    /// CPUs per job
    #[arg(short, long, default_value_t = 1)]
    cpus: u32,
    /// LSF queue
    #[arg(short, long)]
    queue: Option<String>,
    /// Job name, numbered per command for multi-job
    #[arg(short, long, default_value = DEFAULT_JOB_NAME)]
    job_name: String,
    /// Seconds between status polls
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,
    /// Give up after this many seconds with pending jobs blocked because every node is at
    /// --max-jobs-per-node. A full --pool-size is never a stall
    #[arg(long)]
    stall_timeout: Option<u64>,
}

impl JobArgs {
    fn pool_config(self) -> PoolConfig {
        PoolConfig::default()
            .with_cpus(self.cpus)
            .with_queue(self.queue)
            .with_job_name(self.job_name)
            .with_poll_interval(Duration::from_secs(self.poll_interval))
            .with_stall_timeout(self.stall_timeout.map(Duration::from_secs))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(log_level(cli.verbose, cli.dev));

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            eprintln!("autobsub: {err:#}");
            ExitCode::from(EXIT_INVOCATION)
        }
    }
}

fn log_level(verbose: bool, dev: bool) -> LevelFilter {
    match (verbose, dev) {
        (_, true) => LevelFilter::Debug,
        (true, false) => LevelFilter::Info,
        (false, false) => LevelFilter::Warn,
    }
}

/// RUST_LOG still wins over the command line flags
fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

async fn run(cli: Cli) -> Result<u8> {
    let workspace = Workspace::new(cli.workdir);

    match cli.command {
        Commands::SingleJob { command, node, job } => {
            let mut config = job.pool_config().with_pool_size(1);
            if let Some(node) = node {
                config = config.with_nodes(vec![node], None);
            }
            submit(config, workspace, vec![command]).await
        }
        Commands::MultiJob { file, pool_size, max_jobs_per_node, node_list, job } => {
            let commands = read_commands(&file)?;
            let mut config = job.pool_config();
            config.pool_size = pool_size;
            config.max_jobs_per_node = max_jobs_per_node;
            config.node_list = node_list;
            submit(config, workspace, commands).await
        }
        Commands::Clean => {
            workspace.clean().context("Can't clean workspace")?;
            match workspace.path.exists() {
                true => println!("Removed autobsub files from {}, other files were kept", workspace.path.display()),
                false => println!("Removed {}", workspace.path.display()),
            }
            Ok(0)
        }
        Commands::History { limit } => {
            history(&workspace, limit)?;
            Ok(0)
        }
    }
}

async fn submit(config: PoolConfig, workspace: Workspace, commands: Vec<String>) -> Result<u8> {
    let job_name = config.job_name_prefix.clone();
    let pool = JobPool::new(config, Arc::new(BsubClient::default()), workspace)?;

    let canceller = pool.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling submitted jobs");
            canceller.cancel();
        }
    });

    let handles = pool.submit_all(&commands, &job_name).await?;
    let summary = PoolSummary::from_handles(&handles, pool.workspace());
    print!("{summary}");
    Ok(summary.exit_code())
}

/// Read a command file: one shell command per line
fn read_commands(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).with_context(|| format!("Can't read command file {}", path.display()))?;
    info!("Reading commands from {}", path.display());

    let commands: Vec<String> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect();
    if commands.is_empty() {
        bail!("No commands in {}", path.display());
    }
    Ok(commands)
}

fn history(workspace: &Workspace, limit: usize) -> Result<()> {
    if !workspace.ledger_path().exists() {
        println!("No jobs archived in {}", workspace.path.display());
        return Ok(());
    }
    let conn = open_db(workspace).context("Can't open job ledger")?;
    for job in get_recent_jobs(&conn, limit)? {
        println!(
            "{:<24} {:<10} {:<10} {:<12} {}",
            job.job_name,
            job.state,
            job.scheduler_id.as_deref().unwrap_or("-"),
            job.node.as_deref().unwrap_or("-"),
            job.finished_at.as_deref().unwrap_or(&job.archived_at),
        );
        if let Some(reason) = &job.reason {
            println!("    {reason}");
        }
        println!("    {}", job.command);
    }
    Ok(())
}
