//! Process-local container runtime.
//!
//! [`MemoryRuntime`] keeps images and containers in memory. It backs the
//! `--dry-run` mode of the binary and every scenario test, and exposes a few
//! knobs to inject build, start and stop failures per image tag.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::container::{ContainerHandle, ContainerState, ImageRef, NetworkAddress};
use crate::error::{OrchestratorError, Result};
use crate::node::{NetworkMode, NodeSpec};
use crate::runtime::ContainerRuntime;

#[derive(Debug, Clone)]
struct MemoryContainer {
    handle: ContainerHandle,
    state: ContainerState,
    ip: Ipv4Addr,
    ports: BTreeMap<u16, u16>,
}

#[derive(Debug, Default)]
struct MemoryState {
    images: BTreeMap<String, ImageRef>,
    containers: BTreeMap<String, MemoryContainer>,
    build_log: Vec<String>,
    rejected_builds: BTreeSet<String>,
    failing_starts: BTreeSet<String>,
    failing_stops: BTreeSet<String>,
    sequence: u64,
}

impl MemoryState {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn container(&self, handle: &ContainerHandle) -> Result<&MemoryContainer> {
        self.containers
            .get(&handle.id)
            .ok_or_else(|| OrchestratorError::container_not_found(&handle.id))
    }
}

/// In-memory container runtime.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuntime {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryRuntime {
    /// Creates an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image without building it.
    pub async fn preload_image(&self, tag: impl Into<String>) {
        let tag = tag.into();
        let mut state = self.state.write().await;
        let id = format!("sha256:{:064x}", state.next_sequence());
        state
            .images
            .insert(tag.clone(), ImageRef::new(tag).with_id(id));
    }

    /// Makes every build of `tag` fail.
    pub async fn reject_build(&self, tag: impl Into<String>) {
        self.state.write().await.rejected_builds.insert(tag.into());
    }

    /// Makes every container start from `tag` fail.
    pub async fn fail_start(&self, tag: impl Into<String>) {
        self.state.write().await.failing_starts.insert(tag.into());
    }

    /// Makes stopping containers started from `tag` fail.
    pub async fn fail_stop(&self, tag: impl Into<String>) {
        self.state.write().await.failing_stops.insert(tag.into());
    }

    /// Marks a container as exited, as if its process had terminated.
    pub async fn mark_exited(&self, handle: &ContainerHandle, exit_code: i64) -> Result<()> {
        let mut state = self.state.write().await;
        let container = state
            .containers
            .get_mut(&handle.id)
            .ok_or_else(|| OrchestratorError::container_not_found(&handle.id))?;
        container.state = ContainerState::Exited { exit_code };
        Ok(())
    }

    /// Returns the tags built so far, in build order.
    pub async fn build_log(&self) -> Vec<String> {
        self.state.read().await.build_log.clone()
    }

    /// Returns true if an image with this tag exists.
    pub async fn has_image(&self, tag: &str) -> bool {
        self.state.read().await.images.contains_key(tag)
    }

    /// Returns the number of containers, running or not.
    pub async fn container_count(&self) -> usize {
        self.state.read().await.containers.len()
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<ImageRef> {
        let mut state = self.state.write().await;
        state.build_log.push(tag.to_string());

        if state.rejected_builds.contains(tag) {
            return Err(OrchestratorError::image_build_failed(
                tag,
                "build rejected by runtime",
            ));
        }

        let id = format!("sha256:{:064x}", state.next_sequence());
        let image = ImageRef::new(tag).with_id(id);
        state.images.insert(tag.to_string(), image.clone());

        debug!(tag = %tag, context = %context.display(), "Built image");
        Ok(image)
    }

    async fn inspect_image(&self, tag: &str) -> Result<ImageRef> {
        self.state
            .read()
            .await
            .images
            .get(tag)
            .cloned()
            .ok_or_else(|| OrchestratorError::image_not_found(tag))
    }

    async fn run_container(&self, spec: &NodeSpec) -> Result<ContainerHandle> {
        let mut state = self.state.write().await;

        if !state.images.contains_key(&spec.image_tag) {
            return Err(OrchestratorError::image_not_found(&spec.image_tag));
        }
        if state.failing_starts.contains(&spec.image_tag) {
            return Err(OrchestratorError::runtime(format!(
                "container for {} exited during startup",
                spec.name
            )));
        }

        let sequence = state.next_sequence();
        let id = format!("{:064x}", sequence);
        let handle = ContainerHandle::new(id.clone(), &spec.image_tag)
            .with_name(format!("forge-{}-{}", spec.name, sequence))
            .with_node(&spec.name);

        let octet = (sequence % 250) as u8 + 2;
        let container = MemoryContainer {
            handle: handle.clone(),
            state: ContainerState::Running,
            ip: Ipv4Addr::new(172, 18, 0, octet),
            ports: spec
                .ports
                .iter()
                .map(|p| (p.container_port, p.host_port))
                .collect(),
        };
        state.containers.insert(id, container);

        debug!(node = %spec.name, container = %handle, "Started container");
        Ok(handle)
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        let mut state = self.state.write().await;
        let failing = state.failing_stops.contains(&handle.image);
        let container = state
            .containers
            .get_mut(&handle.id)
            .ok_or_else(|| OrchestratorError::container_not_found(&handle.id))?;

        if failing {
            return Err(OrchestratorError::runtime(format!(
                "container {} did not stop",
                handle.short_id()
            )));
        }

        if container.state.is_running() {
            container.state = ContainerState::Exited { exit_code: 0 };
        }
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.state
            .write()
            .await
            .containers
            .remove(&handle.id)
            .map(|_| ())
            .ok_or_else(|| OrchestratorError::container_not_found(&handle.id))
    }

    async fn container_state(&self, handle: &ContainerHandle) -> Result<ContainerState> {
        let state = self.state.read().await;
        Ok(state.container(handle)?.state.clone())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerHandle>> {
        let state = self.state.read().await;
        Ok(state
            .containers
            .values()
            .map(|c| c.handle.clone())
            .collect())
    }

    async fn network_address(
        &self,
        handle: &ContainerHandle,
        mode: &NetworkMode,
    ) -> Result<NetworkAddress> {
        let state = self.state.read().await;
        let container = state.container(handle)?;

        let address = match mode {
            NetworkMode::Host => NetworkAddress::new(Ipv4Addr::LOCALHOST.to_string()),
            _ => NetworkAddress::new(container.ip.to_string()),
        };
        Ok(container
            .ports
            .iter()
            .fold(address, |address, (container_port, host_port)| {
                address.with_port(*container_port, *host_port)
            }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
