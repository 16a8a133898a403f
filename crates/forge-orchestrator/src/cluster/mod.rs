//! Controllers and the orchestrator that owns them.

mod controller;
mod orchestrator;

pub use controller::{BuildReport, Controller, ControllerInfo, ControllerStatus, LoadOptions};
pub use orchestrator::Orchestrator;
