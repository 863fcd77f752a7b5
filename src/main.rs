//! mvno-provisioning: Widely back-office gateway and auto-cancel job.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use mvno_provisioning::config::Config;
use mvno_provisioning::gateway::{self, AppState};
use mvno_provisioning::scheduler::{
    AutoCancelScheduler, CronSchedule, RunTrigger, SqliteLineStore,
};
use mvno_provisioning::widely::{MobileService, WidelyClient};

#[derive(Parser, Debug)]
#[command(name = "mvno-provisioning")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (defaults to ./mvno.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP gateway and the recurring auto-cancel job
    Serve,

    /// Run one auto-cancel pass now and print the summary as JSON
    CancelExpired,

    /// Print the next scheduled auto-cancel fire times
    NextRuns {
        /// Number of fire times to show
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    tracing::info!(environment = config.environment.as_str(), "Configuration loaded");

    match cli.command {
        Commands::Serve => serve(&config).await,
        Commands::CancelExpired => {
            let mobile = build_mobile(&config)?;
            let scheduler = build_scheduler(&config, &mobile)?;
            let summary = scheduler.run_once(RunTrigger::Manual).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::NextRuns { count } => {
            let schedule =
                CronSchedule::parse(&config.scheduler.cron, &config.scheduler.timezone)?;
            for at in schedule.upcoming(Utc::now(), count) {
                println!("{}", at.with_timezone(&schedule.timezone()).to_rfc3339());
            }
            Ok(())
        }
    }
}

fn build_mobile(config: &Config) -> Result<Arc<MobileService>> {
    let client = WidelyClient::from_config(config)?;
    Ok(Arc::new(MobileService::new(Arc::new(client), &config.widely)))
}

fn build_scheduler(config: &Config, mobile: &MobileService) -> Result<Arc<AutoCancelScheduler>> {
    let store = Arc::new(SqliteLineStore::open(&config.store.database_path)?);
    let scheduler = AutoCancelScheduler::new(
        store.clone(),
        store,
        mobile.dispatcher().clone(),
        &config.scheduler,
    )?;
    Ok(Arc::new(scheduler))
}

/// Flip `tx` once `signal` fires. A handler that failed to register leaves
/// the process running.
async fn forward_shutdown<F>(signal: F, tx: Arc<watch::Sender<bool>>)
where
    F: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            let _ = tx.send(true);
        }
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}

async fn serve(config: &Config) -> Result<()> {
    let mobile = build_mobile(config)?;
    let scheduler = build_scheduler(config, &mobile)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let job = if config.scheduler.enabled {
        Some(tokio::spawn(scheduler.clone().run_forever(shutdown_rx.clone())))
    } else {
        tracing::info!("Auto-cancel scheduler disabled");
        None
    };

    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx.clone()));

    let state = AppState { mobile, scheduler };
    let served =
        gateway::run_gateway(&config.gateway.host, config.gateway.port, state, shutdown_rx).await;

    // Gateway is gone either way; stop the job before reporting.
    let _ = shutdown_tx.send(true);
    if let Some(job) = job {
        job.await.context("Auto-cancel scheduler task panicked")?;
    }
    served
}
