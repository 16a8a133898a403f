//! Cluster orchestration engine.
//!
//! This crate models a set of deployable service definitions ("nodes"),
//! builds, starts and stops container instances for them while honoring
//! inter-node dependencies, tracks liveness, and exposes an aggregated status
//! and control surface.
//!
//! # Architecture
//!
//! - [`node`]: node definitions, instances and the fan-out of lifecycle
//!   operations across them
//! - [`cluster`]: controllers (one service file each) and the orchestrator
//!   that owns them
//! - [`runtime`]: the container runtime trait with Docker and in-memory
//!   implementations
//! - [`container`]: container handles, run-state and image references
//! - [`config`]: orchestrator and service file configuration
//! - [`control`]: instruction parsing and execution for transports
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use forge_orchestrator::{
//!     config::OrchestratorConfig,
//!     runtime::{DockerRuntime, DockerRuntimeConfig},
//!     Orchestrator,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Arc::new(DockerRuntime::connect(DockerRuntimeConfig::default())?);
//!     let config = OrchestratorConfig::default().with_controller("core", "forge.yml");
//!
//!     let mut orchestrator = Orchestrator::from_config(&config, runtime).await?;
//!     let core = orchestrator.controller_mut("core")?;
//!     core.create_instance("api", None)?;
//!     core.build_node("api").await?;
//!     core.start_node("api").await?;
//!
//!     println!("{:?}", orchestrator.status().await);
//!     orchestrator.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cluster;
pub mod config;
pub mod container;
pub mod control;
pub mod error;
pub mod node;
pub mod runtime;

pub use cluster::{BuildReport, Controller, ControllerInfo, ControllerStatus, LoadOptions, Orchestrator};
pub use config::{OrchestratorConfig, ServiceFile};
pub use error::{OrchestratorError, Result};
pub use node::{FanOutMode, FanOutReport, Instance, Node, NodeInfo, NodeSpec};
pub use runtime::{ContainerRuntime, DockerRuntime, MemoryRuntime, SharedRuntime};
