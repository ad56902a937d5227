use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use room_reservation_controller::api::controller_dto::ControllerDto;
use room_reservation_controller::domain::controller_model::agent::remote_agent::serve_agent;
use room_reservation_controller::domain::controller_model::agent::simulated_agent::SimulatedDevice;
use room_reservation_controller::domain::controller_model::controller::{Controller, CycleSummary};
use room_reservation_controller::domain::controller_model::utils::id::AgentId;
use room_reservation_controller::domain::controller_model::utils::statistics::init_analytics;
use room_reservation_controller::domain::simulator::simulator::Simulator;
use room_reservation_controller::loader::parser::parse_json_file;
use room_reservation_controller::logger;

/// Scheduling and execution engine for virtual room reservations.
#[derive(Debug, Parser)]
#[command(name = "room_reservation_controller")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the scheduler and executor periodically.
    Run {
        /// Controller configuration (JSON).
        #[arg(long)]
        config: PathBuf,
        /// Write analytics events to this CSV file.
        #[arg(long)]
        statistics: Option<PathBuf>,
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Serve a simulated device agent over TCP.
    Agent {
        /// Agent id the controller addresses.
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "127.0.0.1:7400")]
        listen: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init();

    match cli.command {
        Commands::Run { config, statistics, once } => run(config, statistics, once).await,
        Commands::Agent { id, listen } => agent(id, listen).await,
    }
}

async fn run(config: PathBuf, statistics: Option<PathBuf>, once: bool) -> anyhow::Result<()> {
    let _analytics = init_analytics(statistics.as_deref()).context("failed to initialize statistics")?;

    let dto: ControllerDto = parse_json_file(&config).with_context(|| format!("failed to load '{}'", config.display()))?;
    let simulator = Arc::new(Simulator::new(dto.simulator.clone()));
    let controller = Arc::new(Controller::from_dto(dto, simulator).context("failed to build the controller")?);
    let cancel = CancellationToken::new();

    if once {
        let summary = cycle(controller, cancel).await?;
        print_summary(&summary);
        return Ok(());
    }

    let mut interval = tokio::time::interval(controller.executor_config().period);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Received shutdown signal.");
                cancel.cancel();
                break;
            }
            _ = interval.tick() => {
                match cycle(controller.clone(), cancel.clone()).await {
                    Ok(summary) => print_summary(&summary),
                    Err(e) => log::error!("Controller cycle failed: {:#}", e),
                }
            }
        }
    }

    log::info!("Controller stopped.");
    Ok(())
}

async fn cycle(controller: Arc<Controller>, cancel: CancellationToken) -> anyhow::Result<CycleSummary> {
    let summary = tokio::task::spawn_blocking(move || controller.run_cycle(&cancel)).await??;
    Ok(summary)
}

fn print_summary(summary: &CycleSummary) {
    let scheduler = &summary.scheduler;
    let executor = &summary.executor;
    if scheduler.allocated.is_empty() && scheduler.failed.is_empty() && executor.started + executor.stopped + executor.failed + executor.vanished == 0 {
        return;
    }

    println!(
        "{} {} allocated, {} failed, {} deleted",
        "scheduler".bold(),
        scheduler.allocated.len().to_string().green(),
        scheduler.failed.len().to_string().red(),
        scheduler.deleted_reservations
    );
    println!(
        "{} {} started, {} stopped, {} failed, {} vanished",
        "executor ".bold(),
        executor.started.to_string().green(),
        executor.stopped,
        executor.failed.to_string().red(),
        executor.vanished.to_string().yellow()
    );
}

async fn agent(id: String, listen: String) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&listen).await.with_context(|| format!("failed to listen on {}", listen))?;
    log::info!("Simulated agent '{}' listening on {}.", id, listen);

    let cancel = CancellationToken::new();
    let server = tokio::spawn(serve_agent(listener, Box::new(SimulatedDevice::new(AgentId::new(id))), cancel.clone()));

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    server.await??;
    Ok(())
}
