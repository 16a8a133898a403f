//! The orchestrator.
//!
//! An [`Orchestrator`] owns every controller and the runtime they share. It
//! aggregates their status and, on shutdown, sweeps every container the
//! runtime manages.

use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::cluster::controller::{Controller, ControllerInfo, ControllerStatus, LoadOptions};
use crate::config::OrchestratorConfig;
use crate::container::ContainerHandle;
use crate::error::{OrchestratorError, Result};
use crate::node::FanOutReport;
use crate::runtime::{ContainerRuntime, SharedRuntime};

/// Owner of all controllers.
pub struct Orchestrator {
    controllers: BTreeMap<String, Controller>,
    runtime: SharedRuntime,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("controllers", &self.controllers.keys().collect::<Vec<_>>())
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator without controllers.
    pub fn new(runtime: SharedRuntime) -> Self {
        Self {
            controllers: BTreeMap::new(),
            runtime,
        }
    }

    /// Loads every controller named in `config`, sharing `runtime`.
    ///
    /// # Errors
    ///
    /// The first controller that fails to load aborts construction; the
    /// error names it.
    pub async fn from_config(config: &OrchestratorConfig, runtime: SharedRuntime) -> Result<Self> {
        config.validate()?;

        let options = LoadOptions {
            eager_build: config.eager_build,
            fan_out: config.fan_out,
        };

        let mut orchestrator = Self::new(runtime);
        for (name, path) in &config.controllers {
            let controller =
                Controller::load_from_file(name, path, orchestrator.runtime.clone(), options)
                    .await
                    .map_err(|e| OrchestratorError::controller_load(name, e))?;
            orchestrator.add_controller(controller);
        }

        info!(
            controllers = orchestrator.controllers.len(),
            runtime = orchestrator.runtime.name(),
            "Orchestrator ready"
        );
        Ok(orchestrator)
    }

    /// Adds a controller, replacing any controller with the same name.
    pub fn add_controller(&mut self, controller: Controller) {
        self.controllers
            .insert(controller.name().to_string(), controller);
    }

    /// Returns the shared runtime.
    pub fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    /// Returns a controller by name.
    pub fn controller(&self, name: &str) -> Result<&Controller> {
        self.controllers
            .get(name)
            .ok_or_else(|| OrchestratorError::controller_not_found(name))
    }

    /// Returns a mutable controller by name.
    pub fn controller_mut(&mut self, name: &str) -> Result<&mut Controller> {
        self.controllers
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::controller_not_found(name))
    }

    /// Iterates over controller names in order.
    pub fn controller_names(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }

    /// Iterates over controllers mutably, in name order.
    pub fn controllers_mut(&mut self) -> impl Iterator<Item = &mut Controller> {
        self.controllers.values_mut()
    }

    /// Returns the running/stopped split of every controller.
    pub async fn status(&self) -> BTreeMap<String, ControllerStatus> {
        let mut status = BTreeMap::new();
        for (name, controller) in &self.controllers {
            status.insert(name.clone(), controller.status().await);
        }
        status
    }

    /// Returns per-node details of every controller.
    pub async fn info(&self) -> BTreeMap<String, ControllerInfo> {
        let mut info = BTreeMap::new();
        for (name, controller) in &self.controllers {
            info.insert(name.clone(), controller.info().await);
        }
        info
    }

    /// Stops and removes every container the runtime manages.
    ///
    /// Containers are swept concurrently. A failing container is recorded
    /// in the report and does not stop the sweep. The runtime client is
    /// released afterwards.
    pub async fn shutdown(self) -> Result<FanOutReport> {
        let Self {
            controllers,
            runtime,
        } = self;
        drop(controllers);

        let containers = runtime.list_containers().await?;
        info!(containers = containers.len(), "Shutting down");

        let results = join_all(
            containers
                .iter()
                .map(|handle| sweep_container(runtime.as_ref(), handle)),
        )
        .await;

        let mut report = FanOutReport::new();
        for (handle, result) in containers.iter().zip(results) {
            let key = handle.name.clone().unwrap_or_else(|| handle.id.clone());
            if let Err(e) = &result {
                warn!(container = %handle, error = %e, "Failed to remove container");
            }
            report.record(key, &result);
        }

        info!(
            removed = report.succeeded.len(),
            failed = report.failed.len(),
            "Shutdown complete"
        );
        drop(runtime);
        Ok(report)
    }
}

async fn sweep_container(runtime: &dyn ContainerRuntime, handle: &ContainerHandle) -> Result<()> {
    match runtime.stop_container(handle).await {
        Ok(()) | Err(OrchestratorError::ContainerNotFound(_)) => {}
        Err(e) => return Err(e),
    }
    match runtime.remove_container(handle).await {
        Ok(()) | Err(OrchestratorError::ContainerNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}
