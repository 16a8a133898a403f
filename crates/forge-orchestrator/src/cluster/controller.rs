//! Controllers.
//!
//! A [`Controller`] owns the nodes parsed from one service file. It resolves
//! dependency order before building a node and reports node liveness. Start
//! and stop are delegated to the node without dependency ordering.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::config::ServiceFile;
use crate::error::{OrchestratorError, Result};
use crate::node::{FanOutMode, FanOutReport, Node, NodeInfo, NodeSpec};
use crate::runtime::SharedRuntime;

/// Options applied while loading a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Build every node's image during load.
    pub eager_build: bool,

    /// Fan-out mode given to every node.
    pub fan_out: FanOutMode,
}

/// Liveness split of a controller's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Nodes with at least one live instance.
    pub running: Vec<String>,

    /// Nodes without a live instance.
    pub stopped: Vec<String>,
}

/// Aggregated view of a controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    /// Per-node details.
    pub nodes: BTreeMap<String, NodeInfo>,
}

/// Outcome of a dependency-ordered build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Nodes in the order they were built.
    pub order: Vec<String>,

    /// Per-node fan-out reports.
    pub nodes: BTreeMap<String, FanOutReport>,
}

impl BuildReport {
    /// Returns true if every instance of every node built.
    pub fn is_success(&self) -> bool {
        self.nodes.values().all(FanOutReport::is_success)
    }
}

/// A named collection of nodes sharing one runtime.
pub struct Controller {
    name: String,
    nodes: BTreeMap<String, Node>,
    runtime: SharedRuntime,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("runtime", &self.runtime.name())
            .finish()
    }
}

impl Controller {
    /// Creates a controller from parsed specs.
    ///
    /// # Errors
    ///
    /// Fails when two specs share a name or a spec depends on a name that is
    /// not among `specs`.
    pub fn from_specs(
        name: impl Into<String>,
        specs: Vec<NodeSpec>,
        runtime: SharedRuntime,
        fan_out: FanOutMode,
    ) -> Result<Self> {
        let name = name.into();
        let mut nodes = BTreeMap::new();
        for spec in specs {
            if nodes.contains_key(&spec.name) {
                return Err(OrchestratorError::configuration(format!(
                    "controller {} defines node {} twice",
                    name, spec.name
                )));
            }
            nodes.insert(spec.name.clone(), Node::new(spec).with_fan_out(fan_out));
        }

        for node in nodes.values() {
            if let Some(missing) = node
                .spec()
                .depends_on
                .iter()
                .find(|d| !nodes.contains_key(d.as_str()))
            {
                return Err(OrchestratorError::unknown_dependency(node.name(), missing));
            }
        }

        Ok(Self {
            name,
            nodes,
            runtime,
        })
    }

    /// Loads a controller from a service file.
    ///
    /// Build contexts resolve relative to the file's directory.
    pub async fn load_from_file(
        name: impl Into<String>,
        path: &Path,
        runtime: SharedRuntime,
        options: LoadOptions,
    ) -> Result<Self> {
        let file = ServiceFile::from_file(path)?;
        // A bare file name has an empty parent.
        let base_path = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::load(name, file, base_path, runtime, options).await
    }

    /// Loads a controller from a parsed service file.
    ///
    /// Unknown dependencies and malformed entries fail the load. A node whose
    /// image cannot be found is skipped, and so is every node depending on a
    /// skipped node.
    pub async fn load(
        name: impl Into<String>,
        file: ServiceFile,
        base_path: &Path,
        runtime: SharedRuntime,
        options: LoadOptions,
    ) -> Result<Self> {
        let name = name.into();

        let mut specs = BTreeMap::new();
        for (service, raw) in file.services {
            let spec = NodeSpec::parse(&service, raw, base_path)?;
            specs.insert(service, spec);
        }

        for spec in specs.values() {
            if let Some(missing) = spec.depends_on.iter().find(|d| !specs.contains_key(*d)) {
                return Err(OrchestratorError::unknown_dependency(&spec.name, missing));
            }
        }

        if options.eager_build {
            for spec in specs.values() {
                if let Err(e) = runtime.build_image(&spec.path, &spec.image_tag).await {
                    warn!(
                        controller = %name,
                        node = %spec.name,
                        error = %e,
                        "Failed to build image during load"
                    );
                }
            }
        }

        let mut skipped = BTreeSet::new();
        for spec in specs.values() {
            match runtime.inspect_image(&spec.image_tag).await {
                Ok(_) => {}
                Err(e) if e.is_image_not_found() => {
                    warn!(
                        controller = %name,
                        node = %spec.name,
                        image = %spec.image_tag,
                        "Image not found, skipping node"
                    );
                    skipped.insert(spec.name.clone());
                }
                Err(e) => return Err(e),
            }
        }

        // Dependents of a skipped node are skipped too.
        loop {
            let cascade: Vec<String> = specs
                .values()
                .filter(|s| !skipped.contains(&s.name))
                .filter(|s| s.depends_on.iter().any(|d| skipped.contains(d)))
                .map(|s| s.name.clone())
                .collect();
            if cascade.is_empty() {
                break;
            }
            for node in cascade {
                warn!(controller = %name, node = %node, "Dependency skipped, skipping node");
                skipped.insert(node);
            }
        }

        let loaded: Vec<NodeSpec> = specs
            .into_values()
            .filter(|s| !skipped.contains(&s.name))
            .collect();

        info!(
            controller = %name,
            nodes = loaded.len(),
            skipped = skipped.len(),
            "Loaded controller"
        );

        Self::from_specs(name, loaded, runtime, options.fan_out)
    }

    /// Returns the controller name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shared runtime.
    pub fn runtime(&self) -> &SharedRuntime {
        &self.runtime
    }

    /// Returns a node by name.
    pub fn node(&self, name: &str) -> Result<&Node> {
        self.nodes
            .get(name)
            .ok_or_else(|| OrchestratorError::node_not_found(name))
    }

    /// Returns a mutable node by name.
    pub fn node_mut(&mut self, name: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| OrchestratorError::node_not_found(name))
    }

    /// Iterates over node names in order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Returns true if the controller has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the names to build for `name`: dependencies first, each once,
    /// `name` last.
    ///
    /// # Errors
    ///
    /// Fails with `DependencyCycle` when a cycle is reachable from `name` and
    /// with `NodeNotFound` for unknown names.
    pub fn build_order(&self, name: &str) -> Result<Vec<String>> {
        fn visit(
            name: &str,
            nodes: &BTreeMap<String, Node>,
            path: &mut Vec<String>,
            visited: &mut HashSet<String>,
            order: &mut Vec<String>,
        ) -> Result<()> {
            if let Some(start) = path.iter().position(|n| n == name) {
                let mut cycle = path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(OrchestratorError::dependency_cycle(cycle));
            }
            if visited.contains(name) {
                return Ok(());
            }

            let node = nodes
                .get(name)
                .ok_or_else(|| OrchestratorError::node_not_found(name))?;

            path.push(name.to_string());
            for dependency in &node.spec().depends_on {
                visit(dependency, nodes, path, visited, order)?;
            }
            path.pop();

            visited.insert(name.to_string());
            order.push(name.to_string());
            Ok(())
        }

        let mut order = Vec::new();
        visit(
            name,
            &self.nodes,
            &mut Vec::new(),
            &mut HashSet::new(),
            &mut order,
        )?;
        Ok(order)
    }

    /// Builds `name` and its transitive dependencies, dependencies first.
    ///
    /// A node's build failure is recorded in its report and does not stop the
    /// nodes after it.
    pub async fn build_node(&mut self, name: &str) -> Result<BuildReport> {
        let order = self.build_order(name)?;
        let report = self.build_in_order(order).await?;

        info!(
            controller = %self.name,
            node = %name,
            order = ?report.order,
            success = report.is_success(),
            "Built node with dependencies"
        );
        Ok(report)
    }

    /// Builds every node once, dependencies first.
    pub async fn build_all(&mut self) -> Result<BuildReport> {
        let mut order: Vec<String> = Vec::new();
        for name in self.nodes.keys() {
            for node_name in self.build_order(name)? {
                if !order.contains(&node_name) {
                    order.push(node_name);
                }
            }
        }

        let report = self.build_in_order(order).await?;
        info!(
            controller = %self.name,
            nodes = report.order.len(),
            success = report.is_success(),
            "Built all nodes"
        );
        Ok(report)
    }

    async fn build_in_order(&mut self, order: Vec<String>) -> Result<BuildReport> {
        let runtime = self.runtime.clone();
        let mut report = BuildReport::default();

        for node_name in &order {
            let node = self.node_mut(node_name)?;
            let node_report = node.build(runtime.as_ref()).await;
            report.nodes.insert(node_name.clone(), node_report);
        }

        report.order = order;
        Ok(report)
    }

    /// Starts every instance of a node.
    pub async fn start_node(&mut self, name: &str) -> Result<FanOutReport> {
        let runtime = self.runtime.clone();
        let node = self.node_mut(name)?;
        Ok(node.start(runtime.as_ref()).await)
    }

    /// Stops every instance of a node.
    pub async fn stop_node(&mut self, name: &str) -> Result<FanOutReport> {
        let runtime = self.runtime.clone();
        let node = self.node_mut(name)?;
        Ok(node.stop(runtime.as_ref()).await)
    }

    /// Allocates an instance on a node.
    pub fn create_instance(&mut self, name: &str, id: Option<String>) -> Result<String> {
        self.node_mut(name)?.create_instance(id)
    }

    /// Splits nodes into running and stopped.
    pub async fn status(&self) -> ControllerStatus {
        let mut status = ControllerStatus::default();
        for (name, node) in &self.nodes {
            if node.alive(self.runtime.as_ref()).await {
                status.running.push(name.clone());
            } else {
                status.stopped.push(name.clone());
            }
        }
        status
    }

    /// Returns per-node details.
    pub async fn info(&self) -> ControllerInfo {
        let mut info = ControllerInfo::default();
        for (name, node) in &self.nodes {
            info.nodes
                .insert(name.clone(), node.info(self.runtime.as_ref()).await);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MemoryRuntime;
    use std::sync::Arc;

    fn controller(specs: Vec<NodeSpec>) -> (MemoryRuntime, Controller) {
        let runtime = MemoryRuntime::new();
        let controller = Controller::from_specs(
            "core",
            specs,
            Arc::new(runtime.clone()),
            FanOutMode::Sequential,
        )
        .unwrap();
        (runtime, controller)
    }

    fn write_service_file(dir: &Path, yaml: &str) -> std::path::PathBuf {
        let path = dir.join("forge.yml");
        std::fs::write(&path, yaml).unwrap();
        path
    }

    #[test]
    fn test_from_specs_rejects_unknown_dependency() {
        let err = Controller::from_specs(
            "core",
            vec![NodeSpec::builder("api").depends_on("db").build()],
            Arc::new(MemoryRuntime::new()),
            FanOutMode::Sequential,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownDependency { .. }));
    }

    #[test]
    fn test_build_order_diamond() {
        let (_, controller) = controller(vec![
            NodeSpec::builder("db").build(),
            NodeSpec::builder("cache").depends_on("db").build(),
            NodeSpec::builder("feed").depends_on("db").build(),
            NodeSpec::builder("api")
                .depends_on("cache")
                .depends_on("feed")
                .build(),
        ]);

        assert_eq!(
            controller.build_order("api").unwrap(),
            vec!["db", "cache", "feed", "api"]
        );
        assert_eq!(controller.build_order("db").unwrap(), vec!["db"]);
    }

    #[test]
    fn test_build_order_cycle() {
        let (_, controller) = controller(vec![
            NodeSpec::builder("a").depends_on("b").build(),
            NodeSpec::builder("b").depends_on("c").build(),
            NodeSpec::builder("c").depends_on("a").build(),
        ]);

        match controller.build_order("a").unwrap_err() {
            OrchestratorError::DependencyCycle { path } => {
                assert_eq!(path, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_build_order_unknown_node() {
        let (_, controller) = controller(vec![NodeSpec::builder("db").build()]);
        assert!(controller.build_order("api").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_build_node_dependencies_first() {
        let (runtime, mut controller) = controller(vec![
            NodeSpec::builder("db").build(),
            NodeSpec::builder("api").depends_on("db").build(),
        ]);
        controller.create_instance("db", None).unwrap();
        controller.create_instance("api", None).unwrap();

        let report = controller.build_node("api").await.unwrap();
        assert_eq!(report.order, vec!["db", "api"]);
        assert!(report.is_success());
        assert_eq!(runtime.build_log().await, vec!["db:latest", "api:latest"]);
    }

    #[tokio::test]
    async fn test_build_node_continues_after_failure() {
        let (runtime, mut controller) = controller(vec![
            NodeSpec::builder("db").build(),
            NodeSpec::builder("api").depends_on("db").build(),
        ]);
        runtime.reject_build("db:latest").await;
        controller.create_instance("db", Some("db-1".to_string())).unwrap();
        controller.create_instance("api", None).unwrap();

        let report = controller.build_node("api").await.unwrap();
        assert!(!report.is_success());
        assert!(report.nodes["db"].failed.contains_key("db-1"));
        assert_eq!(report.nodes["api"].succeeded.len(), 1);
    }

    #[tokio::test]
    async fn test_build_all_builds_each_node_once() {
        let (runtime, mut controller) = controller(vec![
            NodeSpec::builder("api").depends_on("db").build(),
            NodeSpec::builder("db").build(),
            NodeSpec::builder("ui").depends_on("api").build(),
        ]);
        for node in ["api", "db", "ui"] {
            controller.create_instance(node, None).unwrap();
        }

        let report = controller.build_all().await.unwrap();
        assert_eq!(report.order, vec!["db", "api", "ui"]);
        assert_eq!(
            runtime.build_log().await,
            vec!["db:latest", "api:latest", "ui:latest"]
        );
    }

    #[tokio::test]
    async fn test_start_does_not_build_dependencies() {
        let (runtime, mut controller) = controller(vec![
            NodeSpec::builder("db").build(),
            NodeSpec::builder("api").depends_on("db").build(),
        ]);
        runtime.preload_image("api:latest").await;
        controller.create_instance("api", None).unwrap();

        let report = controller.start_node("api").await.unwrap();
        assert_eq!(report.succeeded.len(), 1);
        assert!(runtime.build_log().await.is_empty());

        let status = controller.status().await;
        assert_eq!(status.running, vec!["api"]);
        assert_eq!(status.stopped, vec!["db"]);

        let report = controller.stop_node("api").await.unwrap();
        assert!(report.is_success());
        assert!(controller.status().await.running.is_empty());
    }

    #[tokio::test]
    async fn test_start_reports_missing_image() {
        let (runtime, mut controller) = controller(vec![
            NodeSpec::builder("db").build(),
            NodeSpec::builder("api").build(),
        ]);
        runtime.preload_image("api:latest").await;
        let id = controller.create_instance("db", None).unwrap();
        controller.create_instance("api", None).unwrap();
        assert!(!runtime.has_image("db:latest").await);

        let report = controller.start_node("db").await.unwrap();
        assert!(report.succeeded.is_empty());
        assert_eq!(
            report.failed.get(&id).map(String::as_str),
            Some("image not found: db:latest")
        );
        assert_eq!(runtime.container_count().await, 0);

        let report = controller.start_node("api").await.unwrap();
        assert!(report.is_success());
        assert_eq!(controller.status().await.running, vec!["api"]);
    }

    #[tokio::test]
    async fn test_unknown_node_operations() {
        let (_, mut controller) = controller(vec![NodeSpec::builder("db").build()]);
        assert!(controller.start_node("api").await.unwrap_err().is_not_found());
        assert!(controller.stop_node("api").await.unwrap_err().is_not_found());
        assert!(controller.build_node("api").await.unwrap_err().is_not_found());
        assert!(controller.create_instance("api", None).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_load_skips_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_service_file(
            dir.path(),
            r#"
services:
  db:
    image: postgres:16
    build: ./db
  cache:
    image: redis:7
    build: ./cache
  api:
    image: forge/api
    build: .
    depends_on: [cache]
"#,
        );

        let runtime = MemoryRuntime::new();
        runtime.preload_image("postgres:16").await;
        runtime.preload_image("forge/api").await;

        let controller = Controller::load_from_file(
            "core",
            &path,
            Arc::new(runtime.clone()),
            LoadOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(controller.node_names().collect::<Vec<_>>(), vec!["db"]);
        assert_eq!(
            controller.node("db").unwrap().spec().path,
            dir.path().join("db")
        );
    }

    #[tokio::test]
    async fn test_load_all_images_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_service_file(
            dir.path(),
            "services:\n  db: {image: \"db:1\", build: ./db}\n",
        );

        let controller = Controller::load_from_file(
            "core",
            &path,
            Arc::new(MemoryRuntime::new()),
            LoadOptions::default(),
        )
        .await
        .unwrap();
        assert!(controller.is_empty());
        assert!(controller.status().await.stopped.is_empty());
    }

    #[tokio::test]
    async fn test_load_from_bare_file_name() {
        let file = tempfile::Builder::new()
            .prefix("forge-")
            .suffix(".yml")
            .tempfile_in(".")
            .unwrap();
        std::fs::write(file.path(), "services:\n  api: {image: \"api:1\", build: .}\n").unwrap();
        let name = Path::new(file.path().file_name().unwrap());
        assert_eq!(name.parent(), Some(Path::new("")));

        let runtime = MemoryRuntime::new();
        runtime.preload_image("api:1").await;

        let controller = Controller::load_from_file(
            "core",
            name,
            Arc::new(runtime),
            LoadOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(controller.node("api").unwrap().spec().path, Path::new("."));
    }

    #[tokio::test]
    async fn test_load_eager_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_service_file(
            dir.path(),
            r#"
services:
  db: {image: "db:1", build: ./db}
  feed: {image: "feed:1", build: ./feed}
"#,
        );

        let runtime = MemoryRuntime::new();
        runtime.reject_build("feed:1").await;

        let controller = Controller::load_from_file(
            "core",
            &path,
            Arc::new(runtime.clone()),
            LoadOptions {
                eager_build: true,
                fan_out: FanOutMode::Concurrent,
            },
        )
        .await
        .unwrap();

        assert_eq!(controller.node_names().collect::<Vec<_>>(), vec!["db"]);
        assert_eq!(
            controller.node("db").unwrap().fan_out_mode(),
            FanOutMode::Concurrent
        );
        assert_eq!(runtime.build_log().await, vec!["db:1", "feed:1"]);
    }

    #[tokio::test]
    async fn test_load_unknown_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_service_file(
            dir.path(),
            "services:\n  api: {image: api, build: ., depends_on: [db]}\n",
        );

        let err = Controller::load_from_file(
            "core",
            &path,
            Arc::new(MemoryRuntime::new()),
            LoadOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownDependency { .. }));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = Controller::load_from_file(
            "core",
            Path::new("/nonexistent/forge.yml"),
            Arc::new(MemoryRuntime::new()),
            LoadOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Io(_)));
    }

    #[tokio::test]
    async fn test_info() {
        let (runtime, mut controller) = controller(vec![NodeSpec::builder("db").build()]);
        runtime.preload_image("db:latest").await;
        let id = controller.create_instance("db", None).unwrap();
        controller.start_node("db").await.unwrap();

        let info = controller.info().await;
        assert!(info.nodes["db"].alive);
        assert_eq!(info.nodes["db"].instances.get(&id), Some(&true));
    }
}
