//! Docker runtime implementation.
//!
//! This module drives a Docker Engine through its HTTP API (via bollard).
//! Every container it creates carries the `forge.project` label so that
//! [`ContainerRuntime::list_containers`] only reports containers of this
//! management domain.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::BuildImageOptions;
use bollard::secret::{ContainerStateStatusEnum, NetworkSettings, PortBinding};
use bollard::{Docker, API_DEFAULT_VERSION};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::container::{ContainerHandle, ContainerState, ImageRef, NetworkAddress};
use crate::error::{OrchestratorError, Result};
use crate::node::{NetworkMode, NodeSpec};
use crate::runtime::ContainerRuntime;

/// Label carrying the project name on every managed container.
pub const PROJECT_LABEL: &str = "forge.project";

/// Label carrying the node name on every managed container.
pub const NODE_LABEL: &str = "forge.node";

/// Configuration for the Docker runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerRuntimeConfig {
    /// Docker endpoint (`unix:///var/run/docker.sock`, `tcp://host:2375`).
    /// Local defaults are used when unset.
    pub endpoint: Option<String>,

    /// Project name used for container names and the project label.
    pub project_name: String,

    /// Grace period before a stopped container is killed, in seconds.
    pub stop_timeout_secs: u64,

    /// Timeout for API requests, in seconds.
    pub request_timeout_secs: u64,

    /// Whether to remove anonymous volumes with their container.
    pub remove_volumes: bool,

    /// Additional Docker labels to apply to all containers.
    pub labels: BTreeMap<String, String>,
}

impl Default for DockerRuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            project_name: "forge".to_string(),
            stop_timeout_secs: 10,
            request_timeout_secs: 120,
            remove_volumes: true,
            labels: BTreeMap::new(),
        }
    }
}

impl DockerRuntimeConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> DockerRuntimeConfigBuilder {
        DockerRuntimeConfigBuilder::default()
    }

    /// Returns the label filter selecting this project's containers.
    pub fn project_filter(&self) -> String {
        format!("{}={}", PROJECT_LABEL, self.project_name)
    }

    /// Returns the labels applied to a container of `node`.
    pub fn container_labels(&self, node: &str) -> HashMap<String, String> {
        let mut labels: HashMap<String, String> = self
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.insert(PROJECT_LABEL.to_string(), self.project_name.clone());
        labels.insert(NODE_LABEL.to_string(), node.to_string());
        labels
    }
}

/// Builder for `DockerRuntimeConfig`.
#[derive(Debug, Default)]
pub struct DockerRuntimeConfigBuilder {
    config: DockerRuntimeConfig,
}

impl DockerRuntimeConfigBuilder {
    /// Sets the Docker endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the project name.
    pub fn project_name(mut self, name: impl Into<String>) -> Self {
        self.config.project_name = name.into();
        self
    }

    /// Sets the stop timeout.
    pub fn stop_timeout_secs(mut self, secs: u64) -> Self {
        self.config.stop_timeout_secs = secs;
        self
    }

    /// Sets whether to remove volumes with their container.
    pub fn remove_volumes(mut self, remove: bool) -> Self {
        self.config.remove_volumes = remove;
        self
    }

    /// Adds a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DockerRuntimeConfig {
        self.config
    }
}

/// Docker container runtime.
pub struct DockerRuntime {
    /// Docker client.
    docker: Docker,

    /// Runtime configuration.
    config: DockerRuntimeConfig,
}

impl DockerRuntime {
    /// Connects to the Docker daemon described by `config`.
    ///
    /// No request is made; use [`ContainerRuntime::is_ready`] to probe the
    /// daemon.
    pub fn connect(config: DockerRuntimeConfig) -> Result<Self> {
        let timeout = config.request_timeout_secs;
        let docker = match config.endpoint.as_deref() {
            None => Docker::connect_with_local_defaults()?,
            Some(endpoint) if endpoint.starts_with("unix://") || endpoint.starts_with('/') => {
                Docker::connect_with_socket(endpoint, timeout, API_DEFAULT_VERSION)?
            }
            Some(endpoint) => Docker::connect_with_http(endpoint, timeout, API_DEFAULT_VERSION)?,
        };

        info!(
            project = %config.project_name,
            endpoint = config.endpoint.as_deref().unwrap_or("local"),
            "Configured Docker runtime"
        );

        Ok(Self { docker, config })
    }

    /// Returns the runtime configuration.
    pub fn config(&self) -> &DockerRuntimeConfig {
        &self.config
    }

    /// Generates a unique container name for an instance of `node`.
    fn container_name(&self, node: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.config.project_name, node, &suffix[..8])
    }

    /// Packs a build context directory into an in-memory tarball.
    async fn pack_context(context: &Path) -> Result<Bytes> {
        let context: PathBuf = context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            let mut builder = tar::Builder::new(Vec::new());
            builder.follow_symlinks(false);
            builder.append_dir_all(".", &context)?;
            builder.into_inner()
        })
        .await
        .map_err(|e| OrchestratorError::runtime(format!("build context task failed: {}", e)))??;

        Ok(Bytes::from(archive))
    }
}

/// Maps a 404 from the daemon to a domain-specific not-found error.
fn map_not_found(err: DockerError, not_found: impl FnOnce() -> OrchestratorError) -> OrchestratorError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404, ..
        } => not_found(),
        other => OrchestratorError::DockerApi(other),
    }
}

fn map_state(status: Option<ContainerStateStatusEnum>, exit_code: Option<i64>) -> ContainerState {
    match status {
        Some(ContainerStateStatusEnum::RUNNING) => ContainerState::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerState::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerState::Restarting,
        Some(ContainerStateStatusEnum::EXITED) => ContainerState::Exited {
            exit_code: exit_code.unwrap_or(0),
        },
        Some(ContainerStateStatusEnum::REMOVING) | Some(ContainerStateStatusEnum::DEAD) => {
            ContainerState::Dead
        }
        _ => ContainerState::Created,
    }
}

/// Extracts container-port to host-port bindings ("80/tcp" -> 8080).
fn port_bindings(ports: &HashMap<String, Option<Vec<PortBinding>>>) -> BTreeMap<u16, u16> {
    ports
        .iter()
        .filter_map(|(key, bindings)| {
            let container_port = key.split('/').next()?.parse::<u16>().ok()?;
            let host_port = bindings
                .as_ref()?
                .iter()
                .find_map(|b| b.host_port.as_deref()?.parse::<u16>().ok())?;
            Some((container_port, host_port))
        })
        .collect()
}

/// Picks the container IP for a network mode.
fn container_ip(settings: &NetworkSettings, mode: &NetworkMode) -> Option<String> {
    let networks = settings.networks.as_ref();
    let named = match mode {
        NetworkMode::Named(name) => networks
            .and_then(|n| n.get(name))
            .and_then(|endpoint| endpoint.ip_address.clone()),
        _ => None,
    };

    named
        .or_else(|| settings.ip_address.clone())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            networks?
                .values()
                .filter_map(|endpoint| endpoint.ip_address.clone())
                .find(|ip| !ip.is_empty())
        })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn build_image(&self, context: &Path, tag: &str) -> Result<ImageRef> {
        info!(tag = %tag, context = %context.display(), "Building image");

        let archive = Self::pack_context(context).await?;
        let options = BuildImageOptions {
            t: tag.to_string(),
            dockerfile: "Dockerfile".to_string(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(archive));
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        return Err(OrchestratorError::image_build_failed(tag, error));
                    }
                    if let Some(line) = info.stream {
                        let line = line.trim();
                        if !line.is_empty() {
                            debug!(tag = %tag, output = %line, "Build progress");
                        }
                    }
                }
                Err(e) => {
                    return Err(OrchestratorError::image_build_failed(tag, e.to_string()));
                }
            }
        }

        self.inspect_image(tag).await
    }

    async fn inspect_image(&self, tag: &str) -> Result<ImageRef> {
        let inspect = self
            .docker
            .inspect_image(tag)
            .await
            .map_err(|e| map_not_found(e, || OrchestratorError::image_not_found(tag)))?;

        let image = ImageRef::new(tag);
        Ok(match inspect.id {
            Some(id) => image.with_id(id),
            None => image,
        })
    }

    async fn run_container(&self, spec: &NodeSpec) -> Result<ContainerHandle> {
        self.inspect_image(&spec.image_tag).await?;

        let container_name = self.container_name(&spec.name);
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (p.as_docker_port(), HashMap::new()))
            .collect();

        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .ports
            .iter()
            .map(|p| {
                let binding = PortBinding {
                    host_ip: None,
                    host_port: Some(p.host_port.to_string()),
                };
                (p.as_docker_port(), Some(vec![binding]))
            })
            .collect();

        let host_config = bollard::service::HostConfig {
            port_bindings: (!spec.network.is_host()).then_some(port_bindings),
            network_mode: Some(spec.network.as_docker_mode().to_string()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image_tag.clone()),
            env: Some(env),
            labels: Some(self.config.container_labels(&spec.name)),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| map_not_found(e, || OrchestratorError::image_not_found(&spec.image_tag)))?;

        for warning in &response.warnings {
            warn!(container = %container_name, warning = %warning, "Docker warning");
        }

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await?;

        info!(
            node = %spec.name,
            container = %container_name,
            id = %response.id,
            "Started container"
        );

        Ok(ContainerHandle::new(response.id, &spec.image_tag)
            .with_name(container_name)
            .with_node(&spec.name))
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        let options = StopContainerOptions {
            t: self.config.stop_timeout_secs as i64,
        };

        match self.docker.stop_container(&handle.id, Some(options)).await {
            Ok(()) => {}
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {}
            Err(e) => {
                return Err(map_not_found(e, || {
                    OrchestratorError::container_not_found(&handle.id)
                }))
            }
        }

        debug!(container = %handle, "Stopped container");
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: self.config.remove_volumes,
            ..Default::default()
        };

        self.docker
            .remove_container(&handle.id, Some(options))
            .await
            .map_err(|e| map_not_found(e, || OrchestratorError::container_not_found(&handle.id)))?;

        info!(container = %handle, "Removed container");
        Ok(())
    }

    async fn container_state(&self, handle: &ContainerHandle) -> Result<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(&handle.id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_not_found(e, || OrchestratorError::container_not_found(&handle.id)))?;

        Ok(match inspect.state {
            Some(state) => map_state(state.status, state.exit_code),
            None => ContainerState::Created,
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerHandle>> {
        let filters: HashMap<String, Vec<String>> =
            [("label".to_string(), vec![self.config.project_filter()])]
                .into_iter()
                .collect();

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers
            .into_iter()
            .filter_map(|summary| {
                let mut handle = ContainerHandle::new(summary.id?, summary.image.unwrap_or_default());
                if let Some(name) = summary.names.and_then(|n| n.into_iter().next()) {
                    handle = handle.with_name(name.trim_start_matches('/'));
                }
                if let Some(node) = summary.labels.and_then(|mut l| l.remove(NODE_LABEL)) {
                    handle = handle.with_node(node);
                }
                Some(handle)
            })
            .collect())
    }

    async fn network_address(
        &self,
        handle: &ContainerHandle,
        mode: &NetworkMode,
    ) -> Result<NetworkAddress> {
        let inspect = self
            .docker
            .inspect_container(&handle.id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_not_found(e, || OrchestratorError::container_not_found(&handle.id)))?;

        let settings = inspect.network_settings.unwrap_or_default();
        let host = match mode {
            NetworkMode::Host => "127.0.0.1".to_string(),
            _ => container_ip(&settings, mode).ok_or_else(|| {
                OrchestratorError::runtime(format!(
                    "container {} has no address on network {}",
                    handle.short_id(),
                    mode
                ))
            })?,
        };

        let mut address = NetworkAddress::new(host);
        if let Some(ports) = &settings.ports {
            address.ports = port_bindings(ports);
        }
        Ok(address)
    }

    fn name(&self) -> &str {
        "docker"
    }

    async fn is_ready(&self) -> bool {
        match self.docker.ping().await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Docker daemon is not reachable");
                false
            }
        }
    }
}
