//! Forge configuration.
//!
//! This module provides the configuration file of the `forge` binary,
//! loaded from TOML and overridden by CLI arguments.

use forge_orchestrator::runtime::DockerRuntimeConfig;
use forge_orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Forge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// Docker runtime configuration.
    pub runtime: DockerRuntimeConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Controllers and load options.
    pub orchestrator: OrchestratorConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ForgeConfig {
    /// Loads configuration from a TOML file.
    ///
    /// Relative controller paths are anchored at the file's directory.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        config.orchestrator.resolve_paths(base);
        Ok(config)
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if args.json_logs {
            self.logging.format = "json".to_string();
        }

        if let Some(ref endpoint) = args.docker_endpoint {
            self.runtime.endpoint = Some(endpoint.clone());
        }

        if let Some(ref project) = args.project {
            self.runtime.project_name = project.clone();
        }

        // Nothing exists in a fresh in-memory runtime until it is built.
        if args.dry_run {
            self.orchestrator.eager_build = true;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        if self.runtime.project_name.trim().is_empty() {
            anyhow::bail!("Runtime project name cannot be empty");
        }

        self.orchestrator.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use forge_orchestrator::FanOutMode;
    use std::path::PathBuf;

    #[test]
    fn test_default_config() {
        let config = ForgeConfig::default();

        assert_eq!(config.runtime.project_name, "forge");
        assert!(config.runtime.endpoint.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(config.orchestrator.controllers.is_empty());
        assert!(!config.orchestrator.eager_build);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ForgeConfig::default();
        assert!(config.validate().is_ok());

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "info".to_string();

        config.logging.format = "invalid".to_string();
        assert!(config.validate().is_err());
        config.logging.format = "compact".to_string();

        config.runtime.project_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_resolves_controllers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forge.toml");
        std::fs::write(
            &path,
            r#"
[runtime]
project_name = "desk"
stop_timeout_secs = 3

[runtime.labels]
team = "quant"

[logging]
level = "debug"

[orchestrator]
fan_out = "concurrent"

[orchestrator.controllers]
core = "core/forge.yml"
"#,
        )
        .unwrap();

        let config = ForgeConfig::from_file(&path).unwrap();
        assert_eq!(config.runtime.project_name, "desk");
        assert_eq!(config.runtime.stop_timeout_secs, 3);
        assert_eq!(config.runtime.labels.get("team").map(String::as_str), Some("quant"));
        assert_eq!(config.orchestrator.fan_out, FanOutMode::Concurrent);
        assert_eq!(
            config.orchestrator.controllers.get("core"),
            Some(&dir.path().join("core/forge.yml"))
        );
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_from_bare_file_name() {
        let file = tempfile::Builder::new()
            .prefix("forge-")
            .suffix(".toml")
            .tempfile_in(".")
            .unwrap();
        std::fs::write(file.path(), "[orchestrator.controllers]\ncore = \"core.yml\"\n").unwrap();
        let name = Path::new(file.path().file_name().unwrap());

        let config = ForgeConfig::from_file(name).unwrap();
        assert_eq!(
            config.orchestrator.controllers.get("core"),
            Some(&PathBuf::from("./core.yml"))
        );
    }

    #[test]
    fn test_config_merge() {
        let mut config = ForgeConfig::default();
        let args = crate::CliArgs::parse_from([
            "forge",
            "--log-level",
            "debug",
            "--docker-endpoint",
            "tcp://10.0.0.5:2375",
            "--dry-run",
            "status",
        ]);

        config.merge_cli_args(&args);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.runtime.endpoint.as_deref(), Some("tcp://10.0.0.5:2375"));
        assert!(config.orchestrator.eager_build);
    }

    #[test]
    fn test_config_serialization() {
        let mut config = ForgeConfig::default();
        config
            .orchestrator
            .controllers
            .insert("core".to_string(), PathBuf::from("/srv/core.yml"));
        let toml_str = toml::to_string_pretty(&config).unwrap();

        let parsed: ForgeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.runtime, config.runtime);
        assert_eq!(parsed.orchestrator, config.orchestrator);
    }
}
