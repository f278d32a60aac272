//! MacroDaemon - macro execution coordinator
//!
//! CLI entry point wiring the coordinator to the loopback worker.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use serde_json::json;
use statestore::KvStore;
use tokio::sync::mpsc;
use tracing::info;

use macrodaemon::cli::{Cli, Command};
use macrodaemon::config::Config;
use macrodaemon::coordinator::{Coordinator, InlineMacroSource, spawn_heartbeat};
use macrodaemon::owner::{CallerContext, OwnerResolver, StaticDirectory};
use macrodaemon::state::PhaseMachine;
use macrodaemon::worker::{loopback_factory, spawn_ack_pump};
use macrodaemon::{ChannelTransport, MacroId, MessageBus, OwnerId};

fn setup_logging(cli_level: Option<&str>) -> Result<()> {
    let level = match cli_level.map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some("INFO") | None => tracing::Level::INFO,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    Ok(())
}

struct Runtime {
    handle: macrodaemon::CoordinatorHandle,
    coordinator_task: tokio::task::JoinHandle<()>,
}

/// Bring up stores, bus, worker factory, and the coordinator task
fn start_runtime(config: &Config) -> Result<Runtime> {
    let (store, kind) = KvStore::open_preferred(&config.storage.session_file, &config.storage.durable_file)
        .context("Failed to open a state store")?;
    info!(backend = ?kind, "State store opened");

    let transport = Arc::new(ChannelTransport::new());
    let (ack_tx, ack_rx) = mpsc::channel(config.worker.channel_buffer);
    let factory = loopback_factory(transport.clone(), &config.worker, ack_tx);
    let bus = MessageBus::new(transport, config.bus.retry_policy(), factory);
    spawn_ack_pump(bus.clone(), ack_rx);

    let directory = StaticDirectory {
        focused: None,
        containers: vec![OwnerId::new("main")],
    };
    let resolver = OwnerResolver::new(store.clone(), Arc::new(directory));
    let machine = PhaseMachine::new(store, config.state.stale_after());

    let source = Arc::new(InlineMacroSource {
        body: json!({"steps": []}),
        delay: None,
    });

    let coordinator = Coordinator::new(config, bus, source, resolver, machine);
    let handle = coordinator.handle();
    let coordinator_task = tokio::spawn(coordinator.run());
    spawn_heartbeat(handle.clone(), config.state.heartbeat_period());

    Ok(Runtime {
        handle,
        coordinator_task,
    })
}

async fn run_until_interrupted(config: &Config) -> Result<()> {
    let runtime = start_runtime(config)?;

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("Interrupted, shutting down");

    runtime.handle.shutdown().await.ok();
    runtime.coordinator_task.await.context("Coordinator task panicked")?;
    Ok(())
}

async fn run_demo(config: &Config, macro_id: &str, owner: &str) -> Result<()> {
    let runtime = start_runtime(config)?;
    let handle = &runtime.handle;
    let ctx = CallerContext::default();

    let owner_id = handle
        .start(
            Some(owner.to_string()),
            MacroId::new(macro_id),
            json!({}),
            ctx.clone(),
        )
        .await
        .context("Start failed")?;
    println!("started '{macro_id}' under '{owner_id}'");

    let snapshot = handle.query_state(Some(owner.to_string()), ctx.clone()).await?;
    println!("phase: {}", snapshot.phase);

    handle.pause(Some(owner.to_string()), ctx.clone()).await?;
    println!("paused");

    handle.resume(Some(owner.to_string()), ctx.clone()).await?;
    println!("resumed");

    handle.stop(Some(owner.to_string()), ctx.clone()).await?;
    let snapshot = handle.query_state(Some(owner.to_string()), ctx).await?;
    println!("stopped, phase: {}", snapshot.phase);

    let metrics = handle.metrics().await?;
    println!("{}", serde_yaml::to_string(&metrics)?);

    handle.shutdown().await.ok();
    runtime.coordinator_task.await.context("Coordinator task panicked")?;

    // Let spawned worker tasks drain their logs
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref())?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load config")?;
    config.validate().context("Invalid config")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_until_interrupted(&config).await,
        Command::Demo { macro_id, owner } => run_demo(&config, &macro_id, &owner).await,
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}
