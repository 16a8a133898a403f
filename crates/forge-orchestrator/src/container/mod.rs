//! Container handles, run-state and image references.

mod handle;
mod image;

pub use handle::{ContainerHandle, ContainerState, NetworkAddress};
pub use image::ImageRef;
