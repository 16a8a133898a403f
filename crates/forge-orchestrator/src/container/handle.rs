//! Container handles and run-state.
//!
//! A [`ContainerHandle`] is the opaque reference an [`Instance`] keeps to the
//! container it started. The handle never caches liveness: the current
//! [`ContainerState`] is always fetched from the runtime.
//!
//! [`Instance`]: crate::node::Instance

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Handle to a container created by a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHandle {
    /// Container ID assigned by the runtime.
    pub id: String,

    /// Container name, when the runtime reports one.
    pub name: Option<String>,

    /// Image reference the container was started from.
    pub image: String,

    /// Node the container was started for, when known.
    pub node: Option<String>,
}

impl ContainerHandle {
    /// Creates a new container handle.
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            image: image.into(),
            node: None,
        }
    }

    /// Sets the container name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the owning node name.
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    /// Returns the short container ID (first 12 characters).
    pub fn short_id(&self) -> &str {
        if self.id.len() > 12 {
            &self.id[..12]
        } else {
            &self.id
        }
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.short_id()),
            None => f.write_str(self.short_id()),
        }
    }
}

/// Container run-state as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    /// Container has been created but not started.
    Created,

    /// Container is running.
    Running,

    /// Container is paused.
    Paused,

    /// Container is being restarted.
    Restarting,

    /// Container has exited.
    Exited {
        /// Exit code.
        exit_code: i64,
    },

    /// Container is dead or being removed.
    Dead,
}

impl ContainerState {
    /// Returns true if the container is running.
    ///
    /// This is the binary liveness check the engine relies on; paused and
    /// restarting containers count as stopped.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns a short name for this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Restarting => "restarting",
            Self::Exited { .. } => "exited",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network-reachable address of a running container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddress {
    /// Host name or IP address the container is reachable at.
    pub host: String,

    /// Resolved port bindings (container port -> host port).
    pub ports: BTreeMap<u16, u16>,
}

impl NetworkAddress {
    /// Creates an address without port bindings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ports: BTreeMap::new(),
        }
    }

    /// Adds a resolved port binding.
    pub fn with_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, host_port);
        self
    }

    /// Returns the host port bound to a container port.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }
}
