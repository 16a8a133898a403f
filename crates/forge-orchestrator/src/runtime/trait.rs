//! Container runtime trait definition.
//!
//! The engine never talks to a container daemon directly. Every image build,
//! container start/stop and liveness query goes through [`ContainerRuntime`],
//! which is injected into controllers as a shared trait object.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::container::{ContainerHandle, ContainerState, ImageRef, NetworkAddress};
use crate::error::Result;
use crate::node::{NetworkMode, NodeSpec};

/// Core trait for container runtimes.
///
/// # Errors
///
/// Implementations must report a tag that does not resolve to an image as
/// [`OrchestratorError::ImageNotFound`] and a container the runtime no
/// longer knows as [`OrchestratorError::ContainerNotFound`]. Everything else
/// is a generic runtime failure.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; instances of one node may be
/// driven concurrently against the same runtime.
///
/// # Example
///
/// ```ignore
/// use forge_orchestrator::runtime::{ContainerRuntime, MemoryRuntime};
///
/// async fn run(spec: &NodeSpec) -> Result<()> {
///     let runtime = MemoryRuntime::new();
///     runtime.build_image(&spec.path, &spec.image_tag).await?;
///     let handle = runtime.run_container(spec).await?;
///     assert!(runtime.container_state(&handle).await?.is_running());
///     runtime.stop_container(&handle).await?;
///     runtime.remove_container(&handle).await
/// }
/// ```
///
/// [`OrchestratorError::ImageNotFound`]: crate::error::OrchestratorError::ImageNotFound
/// [`OrchestratorError::ContainerNotFound`]: crate::error::OrchestratorError::ContainerNotFound
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Builds the image at `context` and tags it `tag`.
    ///
    /// A repeated build of the same tag replaces the previous image.
    async fn build_image(&self, context: &Path, tag: &str) -> Result<ImageRef>;

    /// Resolves a tag to an image.
    async fn inspect_image(&self, tag: &str) -> Result<ImageRef>;

    /// Creates and starts a container for the node.
    ///
    /// Fails with `ImageNotFound` when the node's image tag is unknown.
    async fn run_container(&self, spec: &NodeSpec) -> Result<ContainerHandle>;

    /// Stops a running container.
    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Removes a container.
    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Returns the current run-state of a container.
    async fn container_state(&self, handle: &ContainerHandle) -> Result<ContainerState>;

    /// Lists every container in this runtime's management domain.
    async fn list_containers(&self) -> Result<Vec<ContainerHandle>>;

    /// Returns the address a container is reachable at.
    async fn network_address(
        &self,
        handle: &ContainerHandle,
        mode: &NetworkMode,
    ) -> Result<NetworkAddress>;

    /// Returns the name of this runtime.
    fn name(&self) -> &str;

    /// Checks if the runtime is ready to accept requests.
    async fn is_ready(&self) -> bool {
        true
    }
}

/// Type alias for a runtime shared between controllers.
pub type SharedRuntime = Arc<dyn ContainerRuntime>;
