//! Nodes and their instances.
//!
//! A [`Node`] is a named service owning zero or more [`Instance`]s. Build,
//! start and stop apply to every instance through [`Node::fan_out`], which
//! never lets one instance's failure abort the others.

mod fanout;
mod instance;
mod port;
mod spec;

pub use fanout::{FanOutMode, FanOutReport, InstanceOp};
pub use instance::{Instance, InstanceInfo, InstanceState};
pub use port::{NetworkMode, PortMapping, PortProtocol};
pub use spec::{NodeSpec, NodeSpecBuilder, RawNodeSpec};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result};
use crate::runtime::ContainerRuntime;

/// Aggregated view of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// True if at least one instance is alive.
    pub alive: bool,

    /// Liveness per instance id.
    pub instances: BTreeMap<String, bool>,

    /// Declared port mappings.
    pub ports: Vec<PortMapping>,
}

/// A named service and its instances.
#[derive(Debug)]
pub struct Node {
    spec: Arc<NodeSpec>,
    instances: BTreeMap<String, Instance>,
    fan_out: FanOutMode,
}

impl Node {
    /// Creates a node without instances.
    pub fn new(spec: NodeSpec) -> Self {
        Self {
            spec: Arc::new(spec),
            instances: BTreeMap::new(),
            fan_out: FanOutMode::default(),
        }
    }

    /// Sets the fan-out mode.
    pub fn with_fan_out(mut self, mode: FanOutMode) -> Self {
        self.fan_out = mode;
        self
    }

    /// Returns the node name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Returns the node spec.
    pub fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Returns the fan-out mode.
    pub fn fan_out_mode(&self) -> FanOutMode {
        self.fan_out
    }

    /// Returns an instance by id.
    pub fn instance(&self, id: &str) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Returns a mutable instance by id.
    pub fn instance_mut(&mut self, id: &str) -> Option<&mut Instance> {
        self.instances.get_mut(id)
    }

    /// Iterates over instances in id order.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Returns the number of instances.
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Allocates a new instance sharing this node's spec.
    ///
    /// A UUID v4 is generated when no id is supplied. Nothing is built or
    /// started.
    pub fn create_instance(&mut self, id: Option<String>) -> Result<String> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.instances.contains_key(&id) {
            return Err(OrchestratorError::instance_exists(self.name(), id));
        }

        self.instances
            .insert(id.clone(), Instance::new(id.clone(), Arc::clone(&self.spec)));
        debug!(node = %self.spec.name, instance = %id, "Created instance");
        Ok(id)
    }

    /// Applies `op` to every instance and collects the outcomes.
    pub async fn fan_out(&mut self, op: InstanceOp, runtime: &dyn ContainerRuntime) -> FanOutReport {
        let mut report = FanOutReport::new();

        match self.fan_out {
            FanOutMode::Sequential => {
                for (id, instance) in self.instances.iter_mut() {
                    let result = instance.apply(op, runtime).await;
                    report.record(id.as_str(), &result);
                }
            }
            FanOutMode::Concurrent => {
                let results = join_all(self.instances.iter_mut().map(|(id, instance)| async move {
                    let result = instance.apply(op, runtime).await;
                    (id.as_str(), result)
                }))
                .await;

                for (id, result) in results {
                    report.record(id, &result);
                }
            }
        }

        for (id, message) in &report.failed {
            warn!(
                node = %self.spec.name,
                instance = %id,
                op = %op,
                error = %message,
                "Instance operation failed"
            );
        }
        info!(
            node = %self.spec.name,
            op = %op,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Fan-out complete"
        );

        report
    }

    /// Builds every instance's image.
    pub async fn build(&mut self, runtime: &dyn ContainerRuntime) -> FanOutReport {
        self.fan_out(InstanceOp::Build, runtime).await
    }

    /// Starts every instance.
    pub async fn start(&mut self, runtime: &dyn ContainerRuntime) -> FanOutReport {
        self.fan_out(InstanceOp::Start, runtime).await
    }

    /// Stops every instance.
    pub async fn stop(&mut self, runtime: &dyn ContainerRuntime) -> FanOutReport {
        self.fan_out(InstanceOp::Stop, runtime).await
    }

    /// Returns true if at least one instance is alive.
    pub async fn alive(&self, runtime: &dyn ContainerRuntime) -> bool {
        for instance in self.instances.values() {
            if instance.alive(runtime).await {
                return true;
            }
        }
        false
    }

    /// Returns the aggregated view of this node.
    pub async fn info(&self, runtime: &dyn ContainerRuntime) -> NodeInfo {
        let mut instances = BTreeMap::new();
        for (id, instance) in &self.instances {
            instances.insert(id.clone(), instance.alive(runtime).await);
        }

        NodeInfo {
            alive: instances.values().any(|alive| *alive),
            instances,
            ports: self.spec.ports.clone(),
        }
    }
}
