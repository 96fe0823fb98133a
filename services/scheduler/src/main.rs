//! fleet Scheduler
//!
//! Subscribes to the cluster manager, feeds its events through the event bus
//! and launches the app definitions given on the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use fleet_events::Call;
use fleet_scheduler::acquire::Acquirer;
use fleet_scheduler::app::{AppLauncher, AppVersion};
use fleet_scheduler::bus::EventBus;
use fleet_scheduler::config::{Config, StoreKind};
use fleet_scheduler::pump::EventPump;
use fleet_scheduler::store::{MemoryStore, Store};
use fleet_scheduler::task::TaskCaller;
use fleet_scheduler::transport::{ManagerTransport, SimulatedManager};
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "fleet-scheduler", version, about = "Framework scheduler for containerized apps")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler against the configured manager.
    Manager(ManagerArgs),

    /// Print build information.
    Version,
}

#[derive(Debug, Args)]
struct ManagerArgs {
    /// App definition (JSON) to launch once running. Repeatable.
    #[arg(long = "launch", value_name = "FILE")]
    launch: Vec<PathBuf>,

    /// Cluster name; overrides FLEET_CLUSTER.
    #[arg(long)]
    cluster: Option<String>,

    /// Tear down the framework, killing all its tasks, on exit.
    #[arg(long, env = "FLEET_TEARDOWN_ON_EXIT")]
    teardown: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Manager(args) => run_manager(args).await,
        Command::Version => {
            println!(
                "{} {} ({}/{})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            );
            Ok(())
        }
    }
}

async fn run_manager(args: ManagerArgs) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(cluster) = args.cluster {
        config.cluster = cluster;
    }

    fleet_scheduler::logging::init(&config.log_level, config.log_format)?;

    info!(
        cluster = %config.cluster,
        manager_url = %config.manager_url,
        delivery_timeout_ms = config.bus.delivery_timeout.as_millis() as u64,
        mailbox_capacity = config.bus.mailbox_capacity,
        "Starting fleet scheduler"
    );

    // Load app definitions up front so a bad file fails fast.
    let mut versions = Vec::with_capacity(args.launch.len());
    for path in &args.launch {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let version: AppVersion = serde_json::from_str(&raw)
            .with_context(|| format!("parsing app definition {}", path.display()))?;
        versions.push(version);
    }

    let store: Arc<dyn Store> = match config.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
    };

    let bus = EventBus::new(config.bus.clone());
    let (sim, source) = SimulatedManager::new(config.sim.clone());
    let transport: Arc<dyn ManagerTransport> = sim.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pump_handle = tokio::spawn(
        EventPump::new(source, bus.clone(), Arc::clone(&store)).run(shutdown_rx.clone()),
    );
    let sim_handle = tokio::spawn(sim.run(shutdown_rx.clone()));

    let caller = TaskCaller::new(Arc::clone(&transport), Acquirer::new(bus.clone()))
        .with_update_timeout(config.update_timeout);
    let launcher = Arc::new(
        AppLauncher::new(config.cluster.clone(), Arc::clone(&store), caller)
            .with_offer_timeout(config.offer_timeout),
    );

    for version in versions {
        let launcher = Arc::clone(&launcher);
        tokio::spawn(async move {
            let name = version.app_name.clone();
            match launcher.launch_app(version).await {
                Ok(app) => info!(app_id = %app.id, "App launched"),
                Err(e) => error!(app_name = %name, error = %e, "App launch failed"),
            }
        });
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = pump_handle => {
            match result {
                Ok(Ok(stats)) => info!(published = stats.published, "Event pump exited"),
                Ok(Err(e)) => error!(error = %e, "Event pump failed"),
                Err(e) => error!(error = %e, "Event pump panicked"),
            }
        }
    }

    if args.teardown {
        if let Err(e) = transport.send(Call::Teardown).await {
            warn!(error = %e, "Teardown failed");
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    if tokio::time::timeout(Duration::from_secs(2), sim_handle).await.is_err() {
        warn!("Simulated manager did not stop in time");
    }

    info!("Fleet scheduler shutdown complete");
    Ok(())
}
