//! Container runtimes.
//!
//! [`ContainerRuntime`] is the seam between the engine and a container
//! daemon. [`DockerRuntime`] drives a Docker Engine through its HTTP API;
//! [`MemoryRuntime`] keeps containers in process memory for dry runs and
//! tests.

mod docker;
mod memory;
mod r#trait;

pub use docker::{DockerRuntime, DockerRuntimeConfig, DockerRuntimeConfigBuilder};
pub use memory::MemoryRuntime;
pub use r#trait::{ContainerRuntime, SharedRuntime};
