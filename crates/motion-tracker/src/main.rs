// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Robot Motion Tracker CLI
//!
//! # Usage
//!
//! ```bash
//! # Track every robot whose id starts with "cell3-"
//! robot-motion-tracker --config motion.yaml --id 'cell3-*'
//!
//! # Feed telemetry from stdin and print published poses
//! robot-motion-tracker --config motion.yaml --id r1 --stdin-exchange telemetry --echo
//!
//! # Validate a configuration file
//! robot-motion-tracker validate --config motion.yaml
//! ```
//!
//! SIGHUP reloads the configuration; Ctrl+C drains every tracker and exits.

use clap::{Parser, Subcommand};
use motion_tracker::{
    ConfigError, FileConfigSource, HealthProbe, LocalBroker, MessageBus, MotionTrackerConfig,
    RobotFilter, Supervisor, SupervisorHandle, TrackerError,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Two-joint Robotic Arm Motion Tracker
#[derive(Parser, Debug)]
#[command(name = "robot-motion-tracker")]
#[command(about = "Robot motion tracker - telemetry in, forward kinematics, poses out")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Args {
    /// Configuration file path
    #[arg(short, long, required = true)]
    config: Option<PathBuf>,

    /// Robot id to track (exact id or glob with * and ?)
    #[arg(short, long, required = true)]
    id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Publish every stdin line as telemetry on this exchange
    #[arg(long)]
    stdin_exchange: Option<String>,

    /// Print every published pose to stdout
    #[arg(long)]
    echo: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "motion-tracker.yaml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Handle subcommands
    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    match run(args).await {
        Ok(()) => {
            tracing::info!("Motion tracker stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(robot = ?e.robot(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), TrackerError> {
    let (Some(config_path), Some(id)) = (args.config, args.id) else {
        return Err(ConfigError::Invalid("--config and --id are required".into()).into());
    };

    // Fail before anything is started if the file is missing or invalid.
    let config = MotionTrackerConfig::from_file(&config_path)?;
    let filter = RobotFilter::new(id);
    let selected = config.select(&filter)?;

    tracing::info!(
        "Robot Motion Tracker v{} ({} robot(s) selected by '{}')",
        env!("CARGO_PKG_VERSION"),
        selected.len(),
        filter.as_str()
    );

    let broker = LocalBroker::new();
    let bus: Arc<dyn MessageBus> = Arc::new(broker);

    if args.echo {
        let exchanges: BTreeSet<&str> = selected
            .iter()
            .flat_map(|robot| robot.pose_exchanges.iter().map(String::as_str))
            .collect();
        for exchange in exchanges {
            spawn_echo(Arc::clone(&bus), exchange.to_string()).await?;
        }
    }

    if let Some(exchange) = args.stdin_exchange {
        declare(&bus, &exchange).await?;
        tokio::spawn(stdin_bridge(Arc::clone(&bus), exchange));
    }

    let health = match &config.health {
        Some(health) => {
            let probe = HealthProbe::bind(health).await?;
            let shutdown = probe.shutdown_handle();
            tokio::spawn(probe.run());
            Some(shutdown)
        }
        None => None,
    };

    let supervisor = Supervisor::new(
        Box::new(FileConfigSource::new(config_path)),
        Arc::clone(&bus),
        filter,
    );
    spawn_signal_handlers(supervisor.handle());

    let result = supervisor.run().await;

    if let Some(shutdown) = health {
        shutdown.notify_one();
    }
    result
}

fn spawn_signal_handlers(handle: SupervisorHandle) {
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, draining trackers...");
            let _ = ctrl_c.shutdown();
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                tracing::warn!("SIGHUP handler unavailable: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reload requested");
            if handle.reload().is_err() {
                break;
            }
        }
    });

    #[cfg(not(unix))]
    drop(handle);
}

async fn declare(bus: &Arc<dyn MessageBus>, exchange: &str) -> Result<(), TrackerError> {
    bus.declare_exchange(exchange)
        .await
        .map_err(|source| TrackerError::Connection {
            robot: "cli".into(),
            endpoint: format!("exchange '{}'", exchange),
            source,
        })
}

/// Print every delivery on `exchange` as `<exchange> <payload>`.
async fn spawn_echo(bus: Arc<dyn MessageBus>, exchange: String) -> Result<(), TrackerError> {
    declare(&bus, &exchange).await?;
    let mut subscription = bus
        .bind(&exchange, "#")
        .await
        .map_err(|source| TrackerError::Connection {
            robot: "cli".into(),
            endpoint: format!("echo on '{}'", exchange),
            source,
        })?;

    tokio::spawn(async move {
        while let Some(delivery) = subscription.recv().await {
            println!(
                "{} {}",
                delivery.exchange,
                String::from_utf8_lossy(&delivery.payload)
            );
        }
    });
    Ok(())
}

/// Publish each stdin line on `exchange`, routed as `robot.<id>.telemetry`.
async fn stdin_bridge(bus: Arc<dyn MessageBus>, exchange: String) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("stdin read error: {}", e);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let routing_key = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|value| value.get("id").and_then(|id| id.as_str()).map(String::from))
            .map(|id| format!("robot.{}.telemetry", id))
            .unwrap_or_else(|| "telemetry".to_string());

        if let Err(e) = bus
            .publish(&exchange, &routing_key, line.as_bytes().to_vec())
            .await
        {
            tracing::warn!("stdin publish to '{}' failed: {}", exchange, e);
        }
    }
    tracing::debug!("stdin closed");
}

fn cmd_gen_config(output: PathBuf) -> ExitCode {
    let yaml = match MotionTrackerConfig::example().to_yaml() {
        Ok(yaml) => yaml,
        Err(e) => {
            eprintln!("Failed to serialize example configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let content = format!(
        "# Robot Motion Tracker Configuration\n# Generated by robot-motion-tracker gen-config\n\n{}",
        yaml
    );

    match std::fs::write(&output, content) {
        Ok(()) => {
            println!("Generated configuration file: {}", output.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to write {}: {}", output.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate(config_path: PathBuf) -> ExitCode {
    match MotionTrackerConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Version:  {}", config.version);
            println!("Interval: {}s", config.attributes.interval);
            if let Some(store) = &config.state_store {
                println!("Store:    {:?}", store.backend);
            }
            if let Some(health) = &config.health {
                println!("Health:   {}", health.bind_address());
            }
            println!("Robots:   {}", config.robots.len());
            for robot in &config.robots {
                let protocol = robot.protocol.as_ref();
                println!(
                    "  [{}] L1={} L2={} source={:?} publishers={} subscribers={}",
                    robot.id,
                    robot.arm.length_shoulder_to_elbow,
                    robot.arm.length_elbow_to_gripper,
                    robot.geometry_source,
                    protocol.map(|p| p.publishers.len()).unwrap_or(0),
                    protocol.map(|p| p.subscribers.len()).unwrap_or(0)
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            ExitCode::FAILURE
        }
    }
}
