//! Orchestrator and controller configuration sources.
//!
//! An [`OrchestratorConfig`] maps controller names to service files. Each
//! service file is a compose-like YAML document whose `services` map is read
//! into a [`ServiceFile`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{OrchestratorError, Result};
use crate::node::{FanOutMode, RawNodeSpec};

/// Configuration of one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Controller name to service file path.
    pub controllers: BTreeMap<String, PathBuf>,

    /// Fan-out mode for every node.
    pub fan_out: FanOutMode,

    /// Build every image while loading controllers.
    pub eager_build: bool,
}

impl OrchestratorConfig {
    /// Adds a controller.
    pub fn with_controller(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.controllers.insert(name.into(), path.into());
        self
    }

    /// Anchors relative controller paths at `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in self.controllers.values_mut() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        for (name, path) in &self.controllers {
            if name.trim().is_empty() {
                return Err(OrchestratorError::configuration(
                    "controller name cannot be empty",
                ));
            }
            if path.as_os_str().is_empty() {
                return Err(OrchestratorError::configuration(format!(
                    "controller {} has no service file",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// A compose-like service file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceFile {
    /// Service name to raw definition.
    #[serde(default)]
    pub services: BTreeMap<String, RawNodeSpec>,
}

impl ServiceFile {
    /// Parses a service file from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Reads and parses a service file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }
}
