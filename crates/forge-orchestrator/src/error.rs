//! Error types for the orchestrator crate.
//!
//! Every fallible operation in the engine returns [`OrchestratorError`]. The
//! variants separate configuration problems (fatal to the load or build that
//! triggered them) from runtime failures (collected per instance) and lookup
//! misses (surfaced as not-found at the boundary).

use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur during orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed or incomplete node/controller definition.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A node declares a dependency that is not defined in its controller.
    #[error("node {node} depends on unknown node {dependency}")]
    UnknownDependency {
        /// The node declaring the dependency.
        node: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// The dependency graph loops back on itself.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    DependencyCycle {
        /// Names along the cycle, starting and ending with the repeated node.
        path: Vec<String>,
    },

    /// Image tag does not resolve to a known image.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Image build failed.
    #[error("failed to build image {tag}: {reason}")]
    ImageBuildFailed {
        /// The tag that was being built.
        tag: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Container not found.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Generic container runtime failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// Controller lookup failed.
    #[error("controller not found: {0}")]
    ControllerNotFound(String),

    /// A controller failed to load while building an orchestrator.
    #[error("failed to load controller {controller}: {source}")]
    ControllerLoad {
        /// The controller name.
        controller: String,
        /// The underlying failure.
        #[source]
        source: Box<OrchestratorError>,
    },

    /// Node lookup failed.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Instance id already registered on the node.
    #[error("instance {instance} already exists on node {node}")]
    InstanceExists {
        /// The node name.
        node: String,
        /// The duplicate instance id.
        instance: String,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// The starting state.
        from: String,
        /// The target state.
        to: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Creates an unknown dependency error.
    pub fn unknown_dependency(node: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            node: node.into(),
            dependency: dependency.into(),
        }
    }

    /// Creates a dependency cycle error.
    pub fn dependency_cycle(path: Vec<String>) -> Self {
        Self::DependencyCycle { path }
    }

    /// Creates an image not found error.
    pub fn image_not_found(image: impl Into<String>) -> Self {
        Self::ImageNotFound(image.into())
    }

    /// Creates an image build failed error.
    pub fn image_build_failed(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImageBuildFailed {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    /// Creates a container not found error.
    pub fn container_not_found(id: impl Into<String>) -> Self {
        Self::ContainerNotFound(id.into())
    }

    /// Creates a generic runtime error.
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime(reason.into())
    }

    /// Creates a controller not found error.
    pub fn controller_not_found(name: impl Into<String>) -> Self {
        Self::ControllerNotFound(name.into())
    }

    /// Wraps a controller load failure.
    pub fn controller_load(controller: impl Into<String>, source: OrchestratorError) -> Self {
        Self::ControllerLoad {
            controller: controller.into(),
            source: Box::new(source),
        }
    }

    /// Creates a node not found error.
    pub fn node_not_found(name: impl Into<String>) -> Self {
        Self::NodeNotFound(name.into())
    }

    /// Creates an instance exists error.
    pub fn instance_exists(node: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::InstanceExists {
            node: node.into(),
            instance: instance.into(),
        }
    }

    /// Creates an invalid state transition error.
    pub fn invalid_state_transition(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization(reason.into())
    }

    /// Returns true if this is a lookup miss of any kind.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ImageNotFound(_)
                | Self::ContainerNotFound(_)
                | Self::ControllerNotFound(_)
                | Self::NodeNotFound(_)
        )
    }

    /// Returns true if the image tag could not be resolved.
    ///
    /// Controllers skip such nodes during a batch load but report them as
    /// failures on an explicit start request.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound(_))
    }

    /// Returns true if this error indicates a broken configuration.
    pub fn is_config_error(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::UnknownDependency { .. } | Self::DependencyCycle { .. } => {
                true
            }
            Self::ControllerLoad { source, .. } => source.is_config_error(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::image_not_found("api:latest");
        assert_eq!(err.to_string(), "image not found: api:latest");

        let err = OrchestratorError::dependency_cycle(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert_eq!(err.to_string(), "dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_error_is_not_found() {
        assert!(OrchestratorError::image_not_found("x").is_not_found());
        assert!(OrchestratorError::node_not_found("x").is_not_found());
        assert!(OrchestratorError::controller_not_found("x").is_not_found());
        assert!(!OrchestratorError::runtime("x").is_not_found());
    }

    #[test]
    fn test_error_classification() {
        assert!(OrchestratorError::image_not_found("x").is_image_not_found());
        assert!(!OrchestratorError::container_not_found("x").is_image_not_found());
        assert!(OrchestratorError::unknown_dependency("api", "db").is_config_error());
        assert!(OrchestratorError::dependency_cycle(vec![]).is_config_error());
        assert!(!OrchestratorError::runtime("boom").is_config_error());

        let err = OrchestratorError::controller_load(
            "core",
            OrchestratorError::unknown_dependency("api", "db"),
        );
        assert!(err.is_config_error());
        assert_eq!(
            err.to_string(),
            "failed to load controller core: node api depends on unknown node db"
        );
    }
}
