//! Forge - command-line front end for the cluster orchestrator.
//!
//! Loads the controllers named in a TOML configuration file, each backed by
//! a YAML service file, and drives them against a Docker daemon (or an
//! in-memory runtime with `--dry-run`).
//!
//! # Usage
//!
//! ```bash
//! # Print the liveness split of every controller
//! forge --config forge.toml status
//!
//! # Create, build and start one instance of a node
//! forge --config forge.toml exec core api create build start
//!
//! # Bring every node up and tear it down on Ctrl+C
//! forge --config forge.toml up --start
//!
//! # Remove every container of the project
//! forge --config forge.toml down
//! ```

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::ForgeConfig;
use forge_orchestrator::control::{self, InstructionInput};
use forge_orchestrator::{DockerRuntime, MemoryRuntime, Orchestrator, SharedRuntime};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Forge CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name = "forge",
    version,
    about = "Build, start and stop containerized service clusters",
    long_about = None
)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use an in-memory runtime instead of Docker
    #[arg(long, global = true)]
    dry_run: bool,

    /// Docker daemon endpoint (unix socket path or tcp URL)
    #[arg(long, value_name = "URL", global = true)]
    docker_endpoint: Option<String>,

    /// Project name used to label containers
    #[arg(long, value_name = "NAME", global = true)]
    project: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Print running and stopped nodes per controller
    Status,

    /// Print per-node details per controller
    Info,

    /// Run instructions (create, build, start, stop) against one node
    Exec {
        /// Controller name
        controller: String,

        /// Node name
        node: String,

        /// Instruction keywords
        #[arg(required = true)]
        instructions: Vec<String>,
    },

    /// Build every node (one instance each), optionally start it, and wait for a shutdown signal
    Up {
        /// Start every node after the build
        #[arg(long)]
        start: bool,
    },

    /// Stop and remove every container of the project
    Down,
}

fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    // Reports go to stdout.
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn connect_runtime(config: &ForgeConfig, dry_run: bool) -> Result<SharedRuntime> {
    let runtime: SharedRuntime = if dry_run {
        Arc::new(MemoryRuntime::new())
    } else {
        Arc::new(
            DockerRuntime::connect(config.runtime.clone())
                .context("Failed to connect to Docker")?,
        )
    };

    if !runtime.is_ready().await {
        anyhow::bail!("Container runtime '{}' is not reachable", runtime.name());
    }
    Ok(runtime)
}

/// Gives every node an instance, builds all images and optionally starts
/// every node.
async fn bring_up(orchestrator: &mut Orchestrator, start: bool) -> Result<()> {
    for controller in orchestrator.controllers_mut() {
        let nodes: Vec<String> = controller.node_names().map(String::from).collect();

        // Builds fan out over instances.
        for node in &nodes {
            if controller.node(node)?.instance_count() == 0 {
                controller.create_instance(node, None)?;
            }
        }

        let report = controller.build_all().await?;
        if !report.is_success() {
            warn!(controller = %controller.name(), "Some nodes failed to build");
        }

        if start {
            for node in &nodes {
                let report = controller.start_node(node).await?;
                for (id, reason) in &report.failed {
                    warn!(node = %node, instance = %id, reason = %reason, "Instance failed to start");
                }
            }
        }
    }
    Ok(())
}

async fn up(mut orchestrator: Orchestrator, start: bool) -> Result<()> {
    bring_up(&mut orchestrator, start).await?;
    print_json(&orchestrator.status().await)?;

    shutdown_signal().await;
    info!("Shutdown signal received");

    let report = orchestrator.shutdown().await?;
    print_json(&report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = if let Some(ref config_path) = args.config {
        ForgeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        ForgeConfig::default()
    };

    config.merge_cli_args(&args);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    init_tracing(&config.logging, args.json_logs)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        project = %config.runtime.project_name,
        dry_run = args.dry_run,
        "Forge starting"
    );

    let runtime = connect_runtime(&config, args.dry_run).await?;
    let command = args.command.clone().unwrap_or(Command::Status);

    if command == Command::Down {
        let report = Orchestrator::new(runtime).shutdown().await?;
        return print_json(&report);
    }

    let mut orchestrator = Orchestrator::from_config(&config.orchestrator, runtime)
        .await
        .context("Failed to load controllers")?;

    match command {
        Command::Status => print_json(&orchestrator.status().await),
        Command::Info => print_json(&orchestrator.info().await),
        Command::Exec {
            controller,
            node,
            instructions,
        } => {
            let instructions = control::parse_instructions(&InstructionInput::from(instructions))?;
            let response = control::execute(&mut orchestrator, &controller, &node, &instructions)
                .await
                .map_err(|e| {
                    error!(status = e.status_code(), error = %e, "Instruction failed");
                    anyhow::Error::new(e)
                })?;
            print_json(&response)
        }
        Command::Up { start } => up(orchestrator, start).await,
        Command::Down => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_orchestrator::{Controller, FanOutMode, NodeSpec};

    fn orchestrator(runtime: &MemoryRuntime) -> Orchestrator {
        let shared: SharedRuntime = Arc::new(runtime.clone());
        let mut orchestrator = Orchestrator::new(shared.clone());
        orchestrator.add_controller(
            Controller::from_specs(
                "core",
                vec![
                    NodeSpec::builder("db").build(),
                    NodeSpec::builder("api").depends_on("db").build(),
                ],
                shared,
                FanOutMode::Sequential,
            )
            .unwrap(),
        );
        orchestrator
    }

    #[tokio::test]
    async fn test_bring_up_builds_without_start() {
        let runtime = MemoryRuntime::new();
        let mut orchestrator = orchestrator(&runtime);

        bring_up(&mut orchestrator, false).await.unwrap();

        let mut built = runtime.build_log().await;
        built.sort();
        assert_eq!(built, vec!["api:latest", "db:latest"]);
        assert_eq!(runtime.container_count().await, 0);
        assert_eq!(orchestrator.status().await["core"].stopped, vec!["api", "db"]);
    }

    #[tokio::test]
    async fn test_bring_up_with_start() {
        let runtime = MemoryRuntime::new();
        let mut orchestrator = orchestrator(&runtime);

        bring_up(&mut orchestrator, true).await.unwrap();
        bring_up(&mut orchestrator, false).await.unwrap();

        let core = orchestrator.controller("core").unwrap();
        assert_eq!(core.node("db").unwrap().instance_count(), 1);
        assert_eq!(runtime.container_count().await, 2);
        assert_eq!(orchestrator.status().await["core"].running, vec!["api", "db"]);
    }

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::parse_from(["forge"]);
        assert!(args.config.is_none());
        assert!(args.command.is_none());
        assert!(!args.json_logs);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_cli_args_with_options() {
        let args = CliArgs::parse_from([
            "forge",
            "--config",
            "forge.toml",
            "--project",
            "desk",
            "--json-logs",
            "up",
            "--start",
        ]);

        assert_eq!(args.config, Some(PathBuf::from("forge.toml")));
        assert_eq!(args.project, Some("desk".to_string()));
        assert!(args.json_logs);
        assert_eq!(args.command, Some(Command::Up { start: true }));
    }

    #[test]
    fn test_exec_subcommand() {
        let args = CliArgs::parse_from(["forge", "exec", "core", "api", "build", "start", "--dry-run"]);

        assert!(args.dry_run);
        assert_eq!(
            args.command,
            Some(Command::Exec {
                controller: "core".to_string(),
                node: "api".to_string(),
                instructions: vec!["build".to_string(), "start".to_string()],
            })
        );

        assert!(CliArgs::try_parse_from(["forge", "exec", "core", "api"]).is_err());
    }
}
