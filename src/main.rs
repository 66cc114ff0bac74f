use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use townd::agents::lifecycle::{AgentManager, AgentSpec, LifecycleError};
use townd::agents::names;
use townd::agents::state::{RunState, StateStore};
use townd::config::DaemonConfig;
use townd::doctor::{self, DoctorContext};
use townd::scheduler::backoff::BackoffRegistry;
use townd::tmux::Tmux;
use townd::{supervisor, workspace};

#[derive(Parser)]
#[command(
    name = "townd",
    about = "Agent fleet supervision daemon for tmux-hosted agents",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Town root directory (discovered from the working directory when unset)
    #[arg(long, env = "TOWND_TOWN_ROOT")]
    town_root: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "TOWND_LOG")]
    log: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "TOWND_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the supervision loop in the foreground (default when no
    /// subcommand given).
    Serve,
    /// Start, stop, or inspect a single agent.
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Check fleet health: orphaned sessions and escaped workload processes.
    Doctor {
        /// Remediate findings (kill orphaned sessions, signal orphaned
        /// processes)
        #[arg(long)]
        fix: bool,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    Start {
        /// Agent role: mayor, deacon, witness, refinery, or a worker name
        role: String,
        /// Rig the agent belongs to (omit for town-level roles)
        #[arg(long)]
        rig: Option<String>,
    },
    Stop {
        role: String,
        #[arg(long)]
        rig: Option<String>,
    },
    Status {
        role: String,
        #[arg(long)]
        rig: Option<String>,
    },
    Restart {
        role: String,
        #[arg(long)]
        rig: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let town_root = match &args.town_root {
        Some(root) => root.clone(),
        None => {
            let cwd = std::env::current_dir().context("reading working directory")?;
            workspace::find(&cwd)
                .context("not inside a town workspace (no mayor/ directory found)")?
        }
    };
    let config = DaemonConfig::load(&town_root);

    let _log_guard = init_tracing(
        args.log.as_deref().unwrap_or("info"),
        args.log_file.as_deref(),
        config.log_format.as_deref().unwrap_or("compact"),
    );

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(town_root, config).await,
        Command::Agent { action } => agent_command(town_root, config, action).await,
        Command::Doctor { fix } => {
            let results = doctor::run(&DoctorContext { town_root }, fix).await;
            doctor::print_results(&results);
            Ok(())
        }
    }
}

/// Build the manager for one agent out of the town layout.
fn manager_for(
    town_root: &std::path::Path,
    config: &DaemonConfig,
    role: &str,
    rig: Option<&str>,
) -> AgentManager {
    let agent_id = match rig {
        Some(rig) => format!("{rig}/{role}"),
        None => role.to_string(),
    };
    let work_dir = match rig {
        Some(rig) => town_root.join(rig),
        None => town_root.to_path_buf(),
    };
    let state_dir = match rig {
        Some(rig) => town_root.join(rig),
        None => town_root.join("mayor"),
    };

    let spec = AgentSpec {
        agent_id,
        session: names::session_name(rig, role),
        rig: rig.map(String::from),
        role: role.to_string(),
        work_dir,
        town_root: town_root.to_path_buf(),
        launch_command: config.agent_command().to_string(),
        startup_nudge: None,
    };
    let store = StateStore::new(&state_dir, &format!("{role}.json"));
    AgentManager::new(Arc::new(Tmux::new()), store, spec)
}

/// All agents the town layout implies: the two singletons plus a witness
/// and refinery per rig.
fn fleet(town_root: &std::path::Path, config: &DaemonConfig) -> Vec<Arc<AgentManager>> {
    let mut managers = vec![
        Arc::new(manager_for(town_root, config, "mayor", None)),
        Arc::new(manager_for(town_root, config, "deacon", None)),
    ];
    let mut rigs: Vec<String> = workspace::valid_rig_names(town_root).into_iter().collect();
    rigs.sort();
    for rig in &rigs {
        managers.push(Arc::new(manager_for(town_root, config, "witness", Some(rig))));
        managers.push(Arc::new(manager_for(town_root, config, "refinery", Some(rig))));
    }
    managers
}

async fn serve(town_root: PathBuf, config: DaemonConfig) -> Result<()> {
    let managers = fleet(&town_root, &config);
    let registry = Arc::new(tokio::sync::RwLock::new(BackoffRegistry::new(
        config.backoff.to_backoff_config(),
    )));

    info!(town_root = %town_root.display(), agents = managers.len(), "townd starting");

    tokio::select! {
        () = supervisor::run(registry, managers, config.poll_tick()) => {}
        r = tokio::signal::ctrl_c() => {
            r.context("listening for shutdown signal")?;
            info!("shutdown signal received");
        }
    }
    Ok(())
}

async fn agent_command(
    town_root: PathBuf,
    config: DaemonConfig,
    action: AgentAction,
) -> Result<()> {
    match action {
        AgentAction::Start { role, rig } => {
            let mgr = manager_for(&town_root, &config, &role, rig.as_deref());
            match mgr.start().await {
                Ok(report) => {
                    println!("started {}", mgr.spec().agent_id);
                    for diag in report.diagnostics {
                        println!("  warning: {diag}");
                    }
                    Ok(())
                }
                Err(LifecycleError::AlreadyRunning) => {
                    bail!("{} is already running", mgr.spec().agent_id)
                }
                Err(e) => Err(e).context("starting agent"),
            }
        }
        AgentAction::Stop { role, rig } => {
            let mgr = manager_for(&town_root, &config, &role, rig.as_deref());
            match mgr.stop().await {
                Ok(()) => {
                    println!("stopped {}", mgr.spec().agent_id);
                    Ok(())
                }
                Err(LifecycleError::NotRunning) => {
                    bail!("{} is not running", mgr.spec().agent_id)
                }
                Err(e) => Err(e).context("stopping agent"),
            }
        }
        AgentAction::Status { role, rig } => {
            let mgr = manager_for(&town_root, &config, &role, rig.as_deref());
            let monitored = match rig.as_deref() {
                Some(rig) => workspace::polecat_names(&town_root, rig),
                None => Vec::new(),
            };
            let record = mgr.status(&monitored).await.context("reading agent status")?;
            match record.state {
                RunState::Running => {
                    println!("{} is running", mgr.spec().agent_id);
                    if let Some(at) = record.started_at {
                        println!("  started: {at}");
                    }
                    if !record.monitored.is_empty() {
                        println!("  monitoring: {}", record.monitored.join(", "));
                    }
                }
                RunState::Stopped => println!("{} is stopped", mgr.spec().agent_id),
            }
            Ok(())
        }
        AgentAction::Restart { role, rig } => {
            let mgr = manager_for(&town_root, &config, &role, rig.as_deref());
            let report = mgr.restart().await.context("restarting agent")?;
            println!("restarted {}", mgr.spec().agent_id);
            for diag in report.diagnostics {
                println!("  warning: {diag}");
            }
            Ok(())
        }
    }
}

/// Set up tracing: env-filter level, compact or JSON, optional rolling file.
fn init_tracing(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("townd.log"));

        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!(
                "warn: could not create log directory '{}': {e}; falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }
        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
