//! Entry-point for the `concerto` multitool.
//!
//! One binary, five durable verbs (`run`, `worker`, `status`, `cancel`)
//! plus manual single-phase invocations that reuse the same executors
//! the worker dispatches to.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use concerto_agents::OpenAiAgents;
use concerto_core::Config;
use concerto_core::SubmitParams;
use concerto_core::Worker;
use concerto_core::cancel_run;
use concerto_core::phases;
use concerto_core::status::RunView;
use concerto_core::status::list_runs;
use concerto_core::status::run_view;
use concerto_core::submit;
use concerto_core::submit::create_run;
use concerto_core::workspace::GitWorkspace;
use concerto_protocol::Phase;
use concerto_protocol::RunStatus;
use concerto_protocol::resolve_task_input;
use concerto_state::QueueStore;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

/// Concerto CLI
///
/// Durable multi-worker pipeline for long-running code-modification runs.
#[derive(Debug, Parser)]
#[clap(author, version, bin_name = "concerto")]
struct MultitoolCli {
    /// Root directory for runs, workspaces, and the queue database.
    /// Defaults to $CONCERTO_HOME, then `.concerto`.
    #[clap(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[clap(subcommand)]
    subcommand: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
enum Subcommand {
    /// Submit a run and print its id.
    Run(RunCommand),

    /// Run the worker loop; never returns normally.
    Worker,

    /// Print the status of one run, or of every run.
    Status(StatusCommand),

    /// Cancel a run's jobs and lease; the in-flight worker aborts at its
    /// next handoff read.
    Cancel(CancelCommand),

    /// Run the plan phase once for a fresh run, without a worker.
    Plan(PlanCommand),

    /// Run the implement phase once for an existing run directory.
    Implement(PhaseDirCommand),

    /// Run the review phase once for an existing run directory.
    Review(PhaseDirCommand),

    /// Run the test phase once for an existing run directory.
    Test(PhaseDirCommand),
}

#[derive(Debug, Parser)]
struct RunCommand {
    /// Task description, or a path to a .md/.json task file.
    task: String,

    /// Repository URL to clone.
    #[clap(long, value_name = "URL")]
    repo: String,

    /// Keep the workspace directory after the pr phase.
    #[clap(long)]
    keep_workspace: bool,

    /// Base branch to cut the work branch from.
    #[clap(long, value_name = "NAME")]
    branch: Option<String>,

    /// Start a worker in this process after submitting.
    #[clap(long)]
    start_worker: bool,
}

#[derive(Debug, Parser)]
struct StatusCommand {
    /// Run id; omit to list every run.
    run_id: Option<String>,

    /// Refresh continuously.
    #[clap(long)]
    watch: bool,

    /// Refresh interval in milliseconds.
    #[clap(long, value_name = "MS", default_value_t = 2000)]
    interval: u64,
}

#[derive(Debug, Parser)]
struct CancelCommand {
    run_id: String,
}

#[derive(Debug, Parser)]
struct PlanCommand {
    /// Task description, or a path to a .md/.json task file.
    task: String,

    /// Repository URL to clone.
    #[clap(long, value_name = "URL")]
    repo: String,

    /// Base branch to cut the work branch from.
    #[clap(long, value_name = "NAME")]
    branch: Option<String>,
}

#[derive(Debug, Parser)]
struct PhaseDirCommand {
    /// Run directory (`<root>/runs/<run_id>`).
    #[clap(long = "run", value_name = "DIR")]
    run: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = MultitoolCli::parse();
    init_logging();
    dispatch(cli).await
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: MultitoolCli) -> anyhow::Result<()> {
    let config = Config::new(Config::resolve_root(cli.root.clone()));
    match cli.subcommand {
        Subcommand::Run(command) => run_cmd(config, command).await,
        Subcommand::Worker => worker_cmd(config).await,
        Subcommand::Status(command) => status_cmd(config, command).await,
        Subcommand::Cancel(command) => {
            let store = open_store(&config).await?;
            cancel_run(&config, &store, command.run_id.as_str()).await?;
            println!("{}", command.run_id);
            Ok(())
        }
        Subcommand::Plan(command) => plan_cmd(config, command).await,
        Subcommand::Implement(command) => phase_dir_cmd(command, Phase::Implement).await,
        Subcommand::Review(command) => phase_dir_cmd(command, Phase::Review).await,
        Subcommand::Test(command) => phase_dir_cmd(command, Phase::Test).await,
    }
}

async fn open_store(config: &Config) -> anyhow::Result<QueueStore> {
    Ok(QueueStore::open(config.queue_db().as_path(), config.tunables()).await?)
}

async fn run_cmd(config: Config, command: RunCommand) -> anyhow::Result<()> {
    let task = resolve_task_input(command.task.as_str())?;
    let store = open_store(&config).await?;
    let submission = submit(
        &config,
        &store,
        SubmitParams {
            task,
            repo_url: command.repo,
            keep_workspace: command.keep_workspace,
            base_branch: command.branch,
        },
    )
    .await?;
    println!("{}", submission.run_id);

    if command.start_worker {
        let worker = build_worker(store, config)?;
        worker.run().await?;
    }
    Ok(())
}

async fn worker_cmd(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config).await?;
    let worker = build_worker(store, config)?;
    worker.run().await
}

fn build_worker(store: QueueStore, config: Config) -> anyhow::Result<Worker> {
    let agents = Arc::new(OpenAiAgents::from_env()?);
    Ok(Worker::new(store, config, agents, Arc::new(GitWorkspace)))
}

async fn status_cmd(config: Config, command: StatusCommand) -> anyhow::Result<()> {
    loop {
        match command.run_id.as_deref() {
            Some(run_id) => {
                let view = run_view(&config, run_id).await?;
                print_view(&view);
            }
            None => {
                let views = list_runs(&config).await?;
                if views.is_empty() {
                    println!("no runs");
                }
                for view in views {
                    print_view(&view);
                }
            }
        }
        if !command.watch {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(command.interval.max(100))).await;
        println!();
    }
}

fn print_view(view: &RunView) {
    let status = match view.status {
        RunStatus::Completed => view.status.as_str().green().to_string(),
        RunStatus::Failed => view.status.as_str().red().to_string(),
        RunStatus::Cancelled => view.status.as_str().yellow().to_string(),
        RunStatus::InProgress => view.status.as_str().cyan().to_string(),
        RunStatus::Queued => view.status.as_str().to_string(),
    };
    println!(
        "{}  phase={} status={status} iteration={}",
        view.run_id, view.phase, view.iteration
    );
    if let Some(last) = &view.last_entry {
        println!(
            "    last: {} {} at {} ({})",
            last.phase,
            last.status,
            last.ended_at.to_rfc3339(),
            last.artifact
        );
    }
    if let Some(note) = view.notes.last() {
        println!("    note: {note}");
    }
}

async fn plan_cmd(config: Config, command: PlanCommand) -> anyhow::Result<()> {
    let task = resolve_task_input(command.task.as_str())?;
    let run_id = create_run(
        &config,
        &SubmitParams {
            task,
            repo_url: command.repo,
            keep_workspace: true,
            base_branch: command.branch,
        },
    )
    .await?;
    let agents = OpenAiAgents::from_env()?;
    phases::execute(&config, &agents, &GitWorkspace, run_id.as_str(), Phase::Plan).await?;
    println!("{run_id}");
    Ok(())
}

/// Manual phase invocation against an existing `<root>/runs/<run_id>`
/// directory; the root is derived from the directory itself.
async fn phase_dir_cmd(command: PhaseDirCommand, phase: Phase) -> anyhow::Result<()> {
    let run_dir = command.run.canonicalize()?;
    let run_id = run_dir
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .ok_or_else(|| anyhow::anyhow!("invalid run directory: {}", run_dir.display()))?
        .to_string();
    let root = run_dir
        .parent()
        .and_then(std::path::Path::parent)
        .ok_or_else(|| anyhow::anyhow!("run directory is not under <root>/runs"))?
        .to_path_buf();
    let config = Config::new(root);
    let agents = OpenAiAgents::from_env()?;
    let outcome = phases::execute(&config, &agents, &GitWorkspace, run_id.as_str(), phase).await?;
    match outcome.next {
        Some(next) => println!("{run_id}: {phase} completed; next phase {next}"),
        None => println!("{run_id}: {phase} completed; run finished"),
    }
    Ok(())
}
