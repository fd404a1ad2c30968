//! bridgesrv: cycle-driven protocol bridge service
//!
//! Loads the bridge configuration, builds one bridge per configured
//! endpoint and drives the global cycle until shutdown. Device task sets
//! are registered by device drivers against the running bridges; this
//! binary owns the scheduler, not the device inventory.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use bridgesrv::config::{AppConfig, BridgeConfig, ProtocolKind};
use bridgesrv::core::bridge::{Bridge, ProtocolExecutor};
use bridgesrv::core::scheduler::CycleScheduler;
use bridgesrv::protocols::mbus::{MbusExecutor, SimulatedMbusTransport};
use bridgesrv::protocols::modbus::{ModbusExecutor, SimulatedModbusTransport};
use bridgesrv::protocols::mqtt::{MqttExecutor, SimulatedMqttTransport};
use bridgesrv::protocols::rest::{HttpRestClient, RestExecutor};

use edge_core::{ComponentRegistry, TimerService};

#[derive(Debug, Parser)]
#[command(name = "bridgesrv", about = "Edge protocol bridge service")]
struct Args {
    /// Configuration file (yaml, toml or json)
    #[arg(short, long, default_value = "config/bridgesrv.yaml")]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,
}

fn build_executor(bridge: &BridgeConfig, config: &AppConfig) -> anyhow::Result<Box<dyn ProtocolExecutor>> {
    let executor: Box<dyn ProtocolExecutor> = match bridge.protocol {
        ProtocolKind::Rest => Box::new(RestExecutor::new(Box::new(HttpRestClient::new(
            &bridge.endpoint,
            config.task_timeout(),
        )?))),
        ProtocolKind::Modbus if bridge.simulated => {
            Box::new(ModbusExecutor::new(Box::new(SimulatedModbusTransport::new())))
        },
        ProtocolKind::Mbus if bridge.simulated => {
            Box::new(MbusExecutor::new(Box::new(SimulatedMbusTransport::new())))
        },
        ProtocolKind::Mqtt if bridge.simulated => {
            Box::new(MqttExecutor::new(Box::new(SimulatedMqttTransport::new())))
        },
        ProtocolKind::Modbus | ProtocolKind::Mbus | ProtocolKind::Mqtt => {
            // Field transports for these protocols come from device driver
            // crates linking against this service.
            anyhow::bail!(
                "bridge {:?}: no built-in {:?} transport, configure `simulated: true` \
                 or register a driver transport",
                bridge.name,
                bridge.protocol
            );
        },
    };
    Ok(executor)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;
    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    common::init_logging(level);

    if args.validate {
        info!(config = %args.config.display(), "configuration is valid");
        return Ok(());
    }

    let registry = Arc::new(ComponentRegistry::new());
    let timers = Arc::new(TimerService::new());
    let mut scheduler = CycleScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&timers),
        config.budget(),
        config.deferral_limit,
    );

    for bridge_config in &config.bridges {
        let executor = build_executor(bridge_config, &config)?;
        scheduler.add_bridge(Arc::new(Bridge::new(
            &bridge_config.name,
            executor,
            config.failure_threshold,
            config.task_timeout(),
        )));
    }
    info!(
        cycle_ms = config.cycle_ms,
        bridges = config.bridges.len(),
        "bridgesrv started"
    );
    if config.bridges.is_empty() {
        warn!("no bridges configured, cycling an empty scheduler");
    }

    let mut interval = tokio::time::interval(config.cycle());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let shutdown = common::wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            },
            _ = interval.tick() => {
                let report = scheduler.run_cycle().await;
                tracing::debug!(
                    cycle = report.cycle,
                    reads = report.reads.executed,
                    writes = report.writes.executed,
                    promoted = report.channels_promoted,
                    "cycle complete"
                );
            },
        }
    }

    info!("bridgesrv stopped");
    Ok(())
}
