//! Node instances.
//!
//! An [`Instance`] is one realization of a [`NodeSpec`]. It holds at most one
//! container handle and moves through [`InstanceState`] as it is built,
//! started and stopped. Liveness and address are always read back from the
//! runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::container::{ContainerHandle, ImageRef, NetworkAddress};
use crate::error::{OrchestratorError, Result};
use crate::node::fanout::InstanceOp;
use crate::node::port::{NetworkMode, PortMapping};
use crate::node::spec::NodeSpec;
use crate::runtime::ContainerRuntime;

/// Lifecycle marker of an instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Allocated, nothing built or started yet.
    #[default]
    Created,

    /// Image built, no container.
    Built,

    /// Container started.
    Running,

    /// Container stopped and removed.
    Stopped,
}

impl InstanceState {
    /// Returns a short name for this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Built => "built",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network details of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Reachable address; absent without a running container.
    pub address: Option<NetworkAddress>,

    /// Declared port mappings.
    pub ports: Vec<PortMapping>,

    /// Network mode.
    pub network: NetworkMode,
}

/// One realization of a node.
#[derive(Debug, Clone)]
pub struct Instance {
    id: String,
    spec: Arc<NodeSpec>,
    handle: Option<ContainerHandle>,
    state: InstanceState,
}

impl Instance {
    /// Creates an instance that shares the node's spec.
    pub fn new(id: impl Into<String>, spec: Arc<NodeSpec>) -> Self {
        Self {
            id: id.into(),
            spec,
            handle: None,
            state: InstanceState::Created,
        }
    }

    /// Returns the instance id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the node spec.
    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Returns the container handle, if one is held.
    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Returns the lifecycle marker.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Builds the node's image.
    ///
    /// Repeated calls rebuild. A running instance keeps its container and
    /// its state.
    pub async fn build(&mut self, runtime: &dyn ContainerRuntime) -> Result<ImageRef> {
        let image = runtime
            .build_image(&self.spec.path, &self.spec.image_tag)
            .await?;

        if self.handle.is_none() {
            self.state = InstanceState::Built;
        }

        info!(
            node = %self.spec.name,
            instance = %self.id,
            image = %image,
            "Built instance image"
        );
        Ok(image)
    }

    /// Starts a container for this instance.
    ///
    /// # Errors
    ///
    /// Fails with `ImageNotFound` when the image tag is unknown and with an
    /// invalid state transition when a container is already held.
    pub async fn start(&mut self, runtime: &dyn ContainerRuntime) -> Result<ContainerHandle> {
        if self.handle.is_some() {
            return Err(OrchestratorError::invalid_state_transition(
                self.state.name(),
                InstanceState::Running.name(),
            ));
        }

        let handle = runtime.run_container(&self.spec).await?;
        self.handle = Some(handle.clone());
        self.state = InstanceState::Running;

        info!(
            node = %self.spec.name,
            instance = %self.id,
            container = %handle,
            "Started instance"
        );
        Ok(handle)
    }

    /// Stops and removes the container, if one is held.
    ///
    /// A container the runtime no longer knows counts as already stopped,
    /// so calling this twice is safe.
    pub async fn stop(&mut self, runtime: &dyn ContainerRuntime) -> Result<()> {
        let Some(handle) = self.handle.as_ref() else {
            debug!(node = %self.spec.name, instance = %self.id, "Instance has no container");
            return Ok(());
        };

        match runtime.stop_container(handle).await {
            Ok(()) | Err(OrchestratorError::ContainerNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match runtime.remove_container(handle).await {
            Ok(()) | Err(OrchestratorError::ContainerNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        info!(
            node = %self.spec.name,
            instance = %self.id,
            container = %handle,
            "Stopped instance"
        );
        self.handle = None;
        self.state = InstanceState::Stopped;
        Ok(())
    }

    /// Applies a fan-out operation.
    pub async fn apply(&mut self, op: InstanceOp, runtime: &dyn ContainerRuntime) -> Result<()> {
        match op {
            InstanceOp::Build => self.build(runtime).await.map(|_| ()),
            InstanceOp::Start => self.start(runtime).await.map(|_| ()),
            InstanceOp::Stop => self.stop(runtime).await,
        }
    }

    /// Returns true if the container is running right now.
    pub async fn alive(&self, runtime: &dyn ContainerRuntime) -> bool {
        let Some(handle) = self.handle.as_ref() else {
            return false;
        };

        match runtime.container_state(handle).await {
            Ok(state) => state.is_running(),
            Err(e) => {
                debug!(instance = %self.id, error = %e, "Container state unavailable");
                false
            }
        }
    }

    /// Returns the instance's network details.
    pub async fn info(&self, runtime: &dyn ContainerRuntime) -> InstanceInfo {
        let address = match self.handle.as_ref() {
            Some(handle) => match runtime.network_address(handle, &self.spec.network).await {
                Ok(address) => Some(address),
                Err(e) => {
                    warn!(instance = %self.id, error = %e, "Failed to resolve address");
                    None
                }
            },
            None => None,
        };

        InstanceInfo {
            address,
            ports: self.spec.ports.clone(),
            network: self.spec.network.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryRuntime;

    fn instance(spec: NodeSpec) -> Instance {
        Instance::new("i-1", Arc::new(spec))
    }

    #[tokio::test]
    async fn test_instance_lifecycle() {
        let runtime = MemoryRuntime::new();
        let mut instance = instance(NodeSpec::builder("api").port(PortMapping::same(80)).build());
        assert_eq!(instance.state(), InstanceState::Created);

        instance.build(&runtime).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Built);

        instance.start(&runtime).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Running);
        assert!(instance.alive(&runtime).await);

        let info = instance.info(&runtime).await;
        assert_eq!(info.address.unwrap().host_port(80), Some(80));

        instance.stop(&runtime).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Stopped);
        assert!(!instance.alive(&runtime).await);
    }

    #[tokio::test]
    async fn test_instance_start_requires_image() {
        let runtime = MemoryRuntime::new();
        let mut instance = instance(NodeSpec::builder("api").build());

        let err = instance.start(&runtime).await.unwrap_err();
        assert!(err.is_image_not_found());
        assert!(instance.handle().is_none());
    }

    #[tokio::test]
    async fn test_instance_double_start_rejected() {
        let runtime = MemoryRuntime::new();
        runtime.preload_image("api:latest").await;
        let mut instance = instance(NodeSpec::builder("api").build());

        instance.start(&runtime).await.unwrap();
        let err = instance.start(&runtime).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStateTransition { .. }));
        assert_eq!(runtime.container_count().await, 1);
    }

    #[tokio::test]
    async fn test_instance_stop_twice() {
        let runtime = MemoryRuntime::new();
        runtime.preload_image("api:latest").await;
        let mut instance = instance(NodeSpec::builder("api").build());

        instance.start(&runtime).await.unwrap();
        instance.stop(&runtime).await.unwrap();
        instance.stop(&runtime).await.unwrap();

        assert!(instance.handle().is_none());
        assert!(instance.info(&runtime).await.address.is_none());
    }

    #[tokio::test]
    async fn test_instance_stop_vanished_container() {
        let runtime = MemoryRuntime::new();
        runtime.preload_image("api:latest").await;
        let mut instance = instance(NodeSpec::builder("api").build());

        let handle = instance.start(&runtime).await.unwrap();
        runtime.remove_container(&handle).await.unwrap();

        instance.stop(&runtime).await.unwrap();
        assert_eq!(instance.state(), InstanceState::Stopped);
    }

    #[tokio::test]
    async fn test_instance_alive_reads_runtime() {
        let runtime = MemoryRuntime::new();
        runtime.preload_image("api:latest").await;
        let mut instance = instance(NodeSpec::builder("api").build());

        let handle = instance.start(&runtime).await.unwrap();
        assert!(instance.alive(&runtime).await);

        runtime.mark_exited(&handle, 1).await.unwrap();
        assert!(!instance.alive(&runtime).await);
        assert_eq!(instance.state(), InstanceState::Running);
    }
}
