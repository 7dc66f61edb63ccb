//! Tether - continuous deployment daemon
//!
//! Usage:
//!   tether --git-repo <URL>                      # Deploy master on port 5005
//!   tether --git-repo <URL> --branch-name main   # Track another branch
//!   tether --config ./tether.toml                # Read settings from a file

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::config::{ConfigOverrides, DaemonConfig};
use tether_core::orchestrator::DeploymentOrchestrator;
use tether_core::runtime::RuntimeKind;
use tether_core::scheduler::Scheduler;
use tether_core::supervisor::{RestartPolicy, Supervisor};

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Continuously deploy a service from a git branch", long_about = None)]
struct Cli {
    /// Path to a tether.toml config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Remote git repo to monitor
    #[arg(long)]
    git_repo: Option<String>,

    /// Path to store all project related files (default: .)
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Git branch to monitor (default: master)
    #[arg(long = "branch-name")]
    branch: Option<String>,

    /// Port for the server to listen on (default: 5005)
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between remote checks (default: 5)
    #[arg(long = "poll-interval")]
    poll_interval_secs: Option<u64>,

    /// Runtime environment for the service (virtualenv or shell)
    #[arg(long)]
    runtime: Option<RuntimeKind>,

    /// Automatic restarts before a crashing service stops the daemon (default: 3)
    #[arg(long)]
    max_restarts: Option<u32>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            git_repo: self.git_repo.clone(),
            project_dir: self.project_dir.clone(),
            branch: self.branch.clone(),
            port: self.port,
            poll_interval_secs: self.poll_interval_secs,
            runtime: self.runtime,
            max_restarts: self.max_restarts,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=debug,tether_core=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = DaemonConfig::load(cli.config.as_deref(), cli.overrides())?;
    std::fs::create_dir_all(&config.project_dir).with_context(|| {
        format!(
            "Failed to create project directory: {}",
            config.project_dir.display()
        )
    })?;

    info!(
        repo = %config.git_repo,
        branch = %config.branch,
        port = config.port,
        project_dir = %config.project_dir.display(),
        "starting tether"
    );

    let (supervisor, supervisor_task) =
        Supervisor::spawn(RestartPolicy::new(config.max_restarts));
    let orchestrator = Arc::new(DeploymentOrchestrator::from_config(
        &config,
        supervisor.clone(),
    )?);
    let scheduler = tokio::spawn(Scheduler::new(orchestrator, config.poll_interval).run());

    let code = tokio::select! {
        result = supervisor_task => match result {
            Ok(Ok(())) => {
                info!("supervisor stopped");
                ExitCode::SUCCESS
            }
            Ok(Err(err)) => {
                error!(error = %err, "supervisor failed, shutting down");
                ExitCode::FAILURE
            }
            Err(err) => {
                error!(error = %err, "supervisor task aborted");
                ExitCode::FAILURE
            }
        },
        received = shutdown_signal() => {
            received?;
            info!("received termination signal");
            supervisor
                .stop()
                .await
                .context("Failed to stop supervisor")?;
            ExitCode::SUCCESS
        }
    };

    scheduler.abort();
    Ok(code)
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
