//! Node definitions.
//!
//! A [`NodeSpec`] is the parsed, immutable description of one deployable
//! unit. It is produced from a [`RawNodeSpec`] (one entry of a service file's
//! `services` map) by [`NodeSpec::parse`], which resolves the build context
//! and normalizes ports, environment and network settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{OrchestratorError, Result};
use crate::node::port::{NetworkMode, PortMapping};

/// Specification for a single deployable node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node name, unique within its controller.
    pub name: String,

    /// Build context directory.
    pub path: PathBuf,

    /// Tag the image is built under and started from.
    pub image_tag: String,

    /// Published ports, in declaration order without duplicates.
    pub ports: Vec<PortMapping>,

    /// Environment variables passed to the container.
    pub env: BTreeMap<String, String>,

    /// Names of nodes that must be built before this one.
    pub depends_on: Vec<String>,

    /// Network mode for the node's containers.
    pub network: NetworkMode,
}

impl NodeSpec {
    /// Creates a new node specification builder.
    pub fn builder(name: impl Into<String>) -> NodeSpecBuilder {
        NodeSpecBuilder::new(name)
    }

    /// Parses a raw service entry into a node specification.
    ///
    /// `base_path` is the directory of the file the entry was read from;
    /// relative build contexts are resolved against it.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `image` or `build` is missing,
    /// when a port declaration is malformed, or when the node depends on
    /// itself.
    pub fn parse(name: &str, raw: RawNodeSpec, base_path: &Path) -> Result<Self> {
        let image_tag = raw
            .image
            .filter(|image| !image.trim().is_empty())
            .ok_or_else(|| {
                OrchestratorError::configuration(format!("node {} has no image", name))
            })?;

        let build = raw.build.ok_or_else(|| {
            OrchestratorError::configuration(format!("node {} has no build context", name))
        })?;
        let path = resolve_context(&build.into_context(), base_path);

        let mut ports: Vec<PortMapping> = Vec::new();
        for declaration in raw.ports.iter().chain(raw.expose.iter()) {
            let mapping = declaration.to_mapping().map_err(|e| {
                OrchestratorError::configuration(format!("node {}: {}", name, e))
            })?;
            if !ports.contains(&mapping) {
                ports.push(mapping);
            }
        }

        let env = raw.env.map(RawEnv::into_map).unwrap_or_default();

        let mut depends_on: Vec<String> = Vec::new();
        for dependency in raw.depends_on.map(RawDependsOn::into_names).unwrap_or_default() {
            if dependency == name {
                return Err(OrchestratorError::configuration(format!(
                    "node {} depends on itself",
                    name
                )));
            }
            if !depends_on.contains(&dependency) {
                depends_on.push(dependency);
            }
        }

        let network = raw
            .network
            .as_deref()
            .map(NetworkMode::parse)
            .unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            path,
            image_tag,
            ports,
            env,
            depends_on,
            network,
        })
    }

    /// Returns true if this node declares a dependency on `other`.
    pub fn depends_on(&self, other: &str) -> bool {
        self.depends_on.iter().any(|d| d == other)
    }
}

fn resolve_context(context: &str, base_path: &Path) -> PathBuf {
    let base_path = if base_path.as_os_str().is_empty() {
        Path::new(".")
    } else {
        base_path
    };
    let context = context.trim();
    if context.is_empty() || context == "." {
        return base_path.to_path_buf();
    }

    let path = Path::new(context);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_path.join(path)
    }
}

/// Builder for `NodeSpec`.
#[derive(Debug)]
pub struct NodeSpecBuilder {
    spec: NodeSpec,
}

impl NodeSpecBuilder {
    /// Creates a builder for a node tagged `<name>:latest` built from `.`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            spec: NodeSpec {
                image_tag: format!("{}:latest", name),
                name,
                path: PathBuf::from("."),
                ports: Vec::new(),
                env: BTreeMap::new(),
                depends_on: Vec::new(),
                network: NetworkMode::default(),
            },
        }
    }

    /// Sets the image tag.
    pub fn image(mut self, tag: impl Into<String>) -> Self {
        self.spec.image_tag = tag.into();
        self
    }

    /// Sets the build context.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.spec.path = path.into();
        self
    }

    /// Adds a port mapping.
    pub fn port(mut self, mapping: PortMapping) -> Self {
        if !self.spec.ports.contains(&mapping) {
            self.spec.ports.push(mapping);
        }
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.env.insert(key.into(), value.into());
        self
    }

    /// Adds a dependency.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.spec.depends_on.push(name.into());
        self
    }

    /// Sets the network mode.
    pub fn network(mut self, network: NetworkMode) -> Self {
        self.spec.network = network;
        self
    }

    /// Builds the node specification.
    pub fn build(self) -> NodeSpec {
        self.spec
    }
}

/// One entry of a service file's `services` map, as written.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNodeSpec {
    /// Image tag.
    #[serde(default)]
    pub image: Option<String>,

    /// Build context, either a path or `{context: path}`.
    #[serde(default)]
    pub build: Option<RawBuild>,

    /// Published ports.
    #[serde(default)]
    pub ports: Vec<RawPort>,

    /// Exposed ports, merged with `ports`.
    #[serde(default)]
    pub expose: Vec<RawPort>,

    /// Environment as a mapping or a list of `KEY=VALUE` strings.
    #[serde(default, alias = "environment")]
    pub env: Option<RawEnv>,

    /// Dependencies as a list of names or a mapping keyed by name.
    #[serde(default)]
    pub depends_on: Option<RawDependsOn>,

    /// Network mode.
    #[serde(default, alias = "network_mode")]
    pub network: Option<String>,
}

/// Build context declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBuild {
    /// `build: ./dir`
    Context(String),

    /// `build: {context: ./dir}`
    Detailed {
        /// Context directory.
        #[serde(default)]
        context: Option<String>,
    },
}

impl RawBuild {
    fn into_context(self) -> String {
        match self {
            Self::Context(context) => context,
            Self::Detailed { context } => context.unwrap_or_else(|| ".".to_string()),
        }
    }
}

/// Port declaration, scalar or string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawPort {
    /// `- 8080`
    Number(i64),

    /// `- "8080:80/udp"`
    Text(String),
}

impl RawPort {
    fn to_mapping(&self) -> Result<PortMapping> {
        match self {
            Self::Number(port) => match u16::try_from(*port) {
                Ok(port) if port > 0 => Ok(PortMapping::same(port)),
                _ => Err(OrchestratorError::configuration(format!(
                    "malformed port declaration '{}'",
                    port
                ))),
            },
            Self::Text(text) => text.parse(),
        }
    }
}

/// Environment declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEnv {
    /// `KEY: value` mapping.
    Map(BTreeMap<String, serde_yaml::Value>),

    /// `- KEY=value` list.
    List(Vec<String>),
}

impl RawEnv {
    fn into_map(self) -> BTreeMap<String, String> {
        match self {
            Self::Map(map) => map
                .into_iter()
                .map(|(key, value)| (key, scalar_to_string(value)))
                .collect(),
            Self::List(entries) => entries
                .into_iter()
                .map(|entry| match entry.split_once('=') {
                    Some((key, value)) => (key.to_string(), value.to_string()),
                    None => (entry, String::new()),
                })
                .collect(),
        }
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s,
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Dependency declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawDependsOn {
    /// `depends_on: [db, cache]`
    List(Vec<String>),

    /// `depends_on: {db: {condition: service_started}}`
    Map(BTreeMap<String, serde_yaml::Value>),
}

impl RawDependsOn {
    fn into_names(self) -> Vec<String> {
        match self {
            Self::List(names) => names,
            Self::Map(map) => map.into_keys().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::port::PortProtocol;

    fn raw(yaml: &str) -> RawNodeSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_full_entry() {
        let entry = raw(r#"
image: forge/api:latest
build: ./api
ports:
  - 8080
  - "9000:90/udp"
expose:
  - "8080:8080"
  - 7000
environment:
  LOG_LEVEL: debug
  WORKERS: 4
depends_on: [db]
network_mode: host
"#);
        let spec = NodeSpec::parse("api", entry, Path::new("/srv/forge")).unwrap();

        assert_eq!(spec.name, "api");
        assert_eq!(spec.image_tag, "forge/api:latest");
        assert_eq!(spec.path, PathBuf::from("/srv/forge/api"));
        assert_eq!(
            spec.ports,
            vec![
                PortMapping::same(8080),
                PortMapping::new(9000, 90).with_protocol(PortProtocol::Udp),
                PortMapping::same(7000),
            ]
        );
        assert_eq!(spec.env.get("WORKERS").map(String::as_str), Some("4"));
        assert_eq!(spec.depends_on, vec!["db".to_string()]);
        assert_eq!(spec.network, NetworkMode::Host);
    }

    #[test]
    fn test_parse_context_resolution() {
        let base = Path::new("/srv/forge");

        let spec = NodeSpec::parse("a", raw("{image: a, build: .}"), base).unwrap();
        assert_eq!(spec.path, PathBuf::from("/srv/forge"));

        let spec = NodeSpec::parse("a", raw("{image: a, build: /opt/a}"), base).unwrap();
        assert_eq!(spec.path, PathBuf::from("/opt/a"));

        let spec = NodeSpec::parse(
            "a",
            raw("{image: a, build: {context: svc}}"),
            base,
        )
        .unwrap();
        assert_eq!(spec.path, PathBuf::from("/srv/forge/svc"));
    }

    #[test]
    fn test_parse_context_empty_base() {
        let spec = NodeSpec::parse("a", raw("{image: a, build: .}"), Path::new("")).unwrap();
        assert_eq!(spec.path, PathBuf::from("."));

        let spec = NodeSpec::parse("a", raw("{image: a, build: ./a}"), Path::new("")).unwrap();
        assert_eq!(spec.path, PathBuf::from("./a"));
    }

    #[test]
    fn test_parse_env_list() {
        let spec = NodeSpec::parse(
            "a",
            raw("{image: a, build: ., env: [MODE=live, EMPTY]}"),
            Path::new("/"),
        )
        .unwrap();
        assert_eq!(spec.env.get("MODE").map(String::as_str), Some("live"));
        assert_eq!(spec.env.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let err = NodeSpec::parse("a", raw("{build: .}"), Path::new("/")).unwrap_err();
        assert!(err.is_config_error());

        let err = NodeSpec::parse("a", raw("{image: a}"), Path::new("/")).unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_parse_rejects_self_dependency() {
        let err = NodeSpec::parse(
            "a",
            raw("{image: a, build: ., depends_on: [a]}"),
            Path::new("/"),
        )
        .unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("depends on itself"));
    }

    #[test]
    fn test_parse_rejects_malformed_port() {
        let err = NodeSpec::parse(
            "a",
            raw(r#"{image: a, build: ., ports: ["80:http"]}"#),
            Path::new("/"),
        )
        .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_node_spec_builder() {
        let spec = NodeSpec::builder("api")
            .port(PortMapping::same(80))
            .port(PortMapping::same(80))
            .env("MODE", "paper")
            .depends_on("db")
            .build();

        assert_eq!(spec.image_tag, "api:latest");
        assert_eq!(spec.ports.len(), 1);
        assert!(spec.depends_on("db"));
        assert!(!spec.depends_on("cache"));
    }
}
