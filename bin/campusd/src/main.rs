//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "binary"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Binary entrypoint for the campus broker daemon."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use campus_allocator::{Allocator, AllocatorMetrics};
use campus_broker::{spawn_router, AllocationService, BrokerMetrics, ProgramNotifier, RouterSettings};
use campus_client::{
    spawn_reconciler, ClientMetrics, ControllerSettings, FacultyAgent, FailoverController,
};
use campus_common::{init_tracing, AppConfig};
use campus_metrics::{new_registry, spawn_http_server, DaemonMetrics, SharedRegistry};
use campus_persistence::{DurableStore, PersistenceMetrics};
use campus_redundancy::{
    CoordinatorSettings, FailoverMetrics, HealthCoordinator, StandbyBroker, StandbySettings,
};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("campusd ", env!("CARGO_PKG_VERSION")),
    about = "Campus resource broker",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Serve allocation requests on the primary endpoint")]
    Primary,
    #[command(about = "Monitor the primary and take over when it fails")]
    Standby,
    #[command(about = "Run the failover proxy and activate the standby on primary failure")]
    HealthCheck,
    #[command(about = "Simulate a faculty issuing allocation requests")]
    Faculty {
        #[arg(long, help = "Faculty name; defaults to [faculty].name")]
        name: Option<String>,
        #[arg(long, help = "Fail over to the proxy instead of the standby service address")]
        via_proxy: bool,
        #[arg(long, help = "Seed for reproducible demand")]
        seed: Option<u64>,
    },
    #[command(about = "Print inventory usage from the durable store and exit")]
    Status {
        #[arg(long, help = "Emit JSON instead of a table")]
        json: bool,
    },
}

impl Commands {
    fn role(&self) -> &'static str {
        match self {
            Commands::Primary => "primary",
            Commands::Standby => "standby",
            Commands::HealthCheck => "health-check",
            Commands::Faculty { .. } => "faculty",
            Commands::Status { .. } => "status",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/campus.toml"));
    candidates.push(PathBuf::from("configs/campus.example.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let config = loaded_config.config;
    let load_duration = load_started.elapsed();

    if let Commands::Status { json } = &cli.command {
        return print_status(&config, *json);
    }

    let role = cli.command.role();
    init_tracing(&format!("campusd-{role}"), &config.logging)?;
    info!(config_path = %loaded_config.source.display(), role, "configuration loaded");

    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(load_duration.as_secs_f64());
    daemon_metrics.inc_start();
    daemon_metrics.set_role(role);

    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry.clone(), config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    match cli.command {
        Commands::Primary => run_primary(&config, &registry).await?,
        Commands::Standby => run_standby(&config, &registry).await?,
        Commands::HealthCheck => run_health_check(&config, &registry).await?,
        Commands::Faculty {
            name,
            via_proxy,
            seed,
        } => run_faculty(&config, &registry, name, via_proxy, seed).await?,
        Commands::Status { .. } => {}
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn durable_store(config: &AppConfig) -> DurableStore {
    DurableStore::new(
        &config.persistence.records_path,
        &config.persistence.alerts_path,
    )
}

fn allocation_service(
    config: &AppConfig,
    registry: &SharedRegistry,
) -> Result<(AllocationService, BrokerMetrics)> {
    let store = durable_store(config).with_metrics(PersistenceMetrics::new(registry.clone())?);
    let allocator = Allocator::open(&config.inventory, store)
        .context("failed to recover allocator state from the durable store")?
        .with_metrics(AllocatorMetrics::new(registry.clone())?);
    let broker_metrics = BrokerMetrics::new(registry.clone())?;
    let service = AllocationService::new(Arc::new(allocator))
        .with_notifier(ProgramNotifier::default())
        .with_metrics(broker_metrics.clone());
    Ok((service, broker_metrics))
}

async fn run_primary(config: &AppConfig, registry: &SharedRegistry) -> Result<()> {
    let (service, broker_metrics) = allocation_service(config, registry)?;
    let router = spawn_router(
        config.endpoints.primary,
        service,
        RouterSettings::from_config(&config.broker),
        Some(broker_metrics),
    )
    .await?;
    info!(address = %router.addr(), workers = config.broker.workers, "primary broker serving");

    shutdown_signal().await;
    router.shutdown().await;
    Ok(())
}

async fn run_standby(config: &AppConfig, registry: &SharedRegistry) -> Result<()> {
    let (service, broker_metrics) = allocation_service(config, registry)?;
    let standby = StandbyBroker::start(
        StandbySettings::from_config(config),
        service,
        Some(FailoverMetrics::new(registry.clone())?),
        Some(broker_metrics),
    )
    .await?;

    shutdown_signal().await;
    standby.shutdown().await;
    Ok(())
}

async fn run_health_check(config: &AppConfig, registry: &SharedRegistry) -> Result<()> {
    if config.health.standby_runs_proxy {
        warn!(
            proxy = %config.endpoints.proxy,
            "standby is configured to run the proxy too; set health.standby_runs_proxy = false"
        );
    }
    let coordinator = HealthCoordinator::start(
        CoordinatorSettings::from_config(config),
        Some(FailoverMetrics::new(registry.clone())?),
    )
    .await?;

    shutdown_signal().await;
    coordinator.shutdown().await;
    Ok(())
}

async fn run_faculty(
    config: &AppConfig,
    registry: &SharedRegistry,
    name: Option<String>,
    via_proxy: bool,
    seed: Option<u64>,
) -> Result<()> {
    let mut faculty = config.faculty.clone();
    if let Some(name) = name {
        faculty.name = name;
    }
    let controller = Arc::new(
        FailoverController::new(ControllerSettings::from_config(config, via_proxy))
            .with_metrics(ClientMetrics::new(registry.clone())?),
    );
    let reconciler = spawn_reconciler(Arc::clone(&controller));

    let mut agent = FacultyAgent::new(faculty, controller);
    if let Some(seed) = seed {
        agent = agent.with_seed(seed);
    }
    let (shutdown, shutdown_rx) = broadcast::channel(1);
    let mut task = tokio::spawn(agent.run(shutdown_rx));
    let summary = tokio::select! {
        joined = &mut task => joined?,
        _ = shutdown_signal() => {
            let _ = shutdown.send(());
            task.await?
        }
    };
    reconciler.shutdown().await;
    info!(
        served = summary.served,
        partial = summary.partial,
        failed = summary.failed,
        "faculty finished"
    );
    Ok(())
}

fn print_status(config: &AppConfig, json: bool) -> Result<()> {
    let allocator = Allocator::open(&config.inventory, durable_store(config))
        .context("failed to read the durable store")?;
    let status = allocator.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!(
        "{:<14} {:>8} {:>8} {:>9}",
        "category", "assigned", "total", "available"
    );
    for pool in &status.pools {
        println!(
            "{:<14} {:>8} {:>8} {:>9}",
            pool.kind.as_str(),
            pool.assigned,
            pool.total,
            pool.available
        );
    }
    println!("records: {}  alerts: {}", status.records, status.alerts);
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for ctrl-c");
            }
        }
        _ = terminate() => {}
    }
    info!("termination signal received; shutting down");
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
