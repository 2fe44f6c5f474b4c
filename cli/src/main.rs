// meshlane — latency-aware route reconciliation for WireGuard meshes
//
// Discovers tunnel interfaces and peers, probes peer latency, and keeps the
// kernel routing table pointed at the lowest-latency gateway per advertised
// destination range.

mod config;
mod routes;
mod wireguard;

use crate::config::Config;
use crate::routes::IpRouteTable;
use crate::wireguard::{WgPresence, WgTopologySource};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use meshlane_core::{CandidateIndex, IcmpProber, LogReporter, PresenceGuard, RouteService, TopologySource};
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshlane")]
#[command(about = "Meshlane — latency-aware mesh route reconciliation", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation daemon until interrupted
    Run,
    /// Execute a single reconciliation cycle and print the decisions
    Oneshot,
    /// Report mesh availability and the discovered topology
    Check,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => cmd_run().await,
        Commands::Oneshot => cmd_oneshot().await,
        Commands::Check => cmd_check().await,
        Commands::Config { action } => cmd_config(action),
    }
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "meshlane.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

fn build_service(config: &Config) -> Result<RouteService> {
    let reconciler_config = config.reconciler();
    let prober = IcmpProber::new(&reconciler_config).context(
        "failed to open ICMP socket (CAP_NET_RAW or net.ipv4.ping_group_range required)",
    )?;

    let timeout = config.command_timeout();
    RouteService::new(
        reconciler_config,
        Arc::new(WgTopologySource::new(timeout)),
        Arc::new(prober),
        Arc::new(IpRouteTable::new(timeout)),
        Arc::new(LogReporter),
        Arc::new(WgPresence::new(timeout)),
    )
    .context("failed to construct route service")
}

async fn cmd_run() -> Result<()> {
    let config = Config::load()?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let service = Arc::new(build_service(&config)?);

    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested; finishing in-flight cycle");
    service.stop();

    runner.await.context("reconciliation task panicked")??;

    let stats = service.stats();
    tracing::info!(
        cycles = stats.cycles,
        noop_cycles = stats.noop_cycles,
        skipped_cycles = stats.skipped_cycles,
        routes_installed = stats.routes_installed,
        install_failures = stats.install_failures,
        "final counters"
    );
    Ok(())
}

async fn cmd_oneshot() -> Result<()> {
    let config = Config::load()?;
    let _log_guard = init_tracing(None);

    let service = build_service(&config)?;
    let outcome = service
        .run_once()
        .await
        .context("reconciliation cycle failed")?;

    println!("{} destination(s):", outcome.decisions.len());
    for (destination, decision) in &outcome.decisions {
        println!(
            "  {destination} via {} dev {}",
            decision.gateway, decision.interface
        );
    }
    println!(
        "installed {} / unchanged {} / failed {}",
        outcome.summary.installed, outcome.summary.unchanged, outcome.summary.failed
    );
    Ok(())
}

async fn cmd_check() -> Result<()> {
    let config = Config::load()?;
    let _log_guard = init_tracing(None);

    let timeout = config.command_timeout();
    let presence = WgPresence::new(timeout);
    if !presence.is_available().await {
        println!("mesh support: unavailable (wg not usable on this host)");
        return Ok(());
    }
    println!("mesh support: available");

    let topology = WgTopologySource::new(timeout);
    let interfaces = topology
        .list_interfaces()
        .await
        .context("topology discovery failed")?;

    for iface in &interfaces {
        println!("{iface}");
        for peer in &iface.peers {
            let ranges: Vec<String> = peer
                .allowed_ranges
                .iter()
                .map(|range| range.to_string())
                .collect();
            println!("  peer {} -> [{}]", peer.identity, ranges.join(", "));
        }
    }

    let index = CandidateIndex::build(&interfaces);
    println!("{} routable destination(s):", index.len());
    for (destination, candidates) in index.destinations() {
        let via: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} dev {}", c.gateway, c.interface))
            .collect();
        println!("  {destination} via {}", via.join(" | "));
    }
    println!("{} probe target(s)", index.probe_targets().len());
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("{key} = {value}");
        }
    }
    Ok(())
}
