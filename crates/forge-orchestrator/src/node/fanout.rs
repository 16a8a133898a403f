//! Fan-out of lifecycle operations across a node's instances.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::Result;

/// Lifecycle operation applied to every instance of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceOp {
    /// Build the node's image.
    Build,

    /// Start a container.
    Start,

    /// Stop and remove the container.
    Stop,
}

impl InstanceOp {
    /// Returns the name of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for InstanceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a node drives its instances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutMode {
    /// Await each instance in turn.
    #[default]
    Sequential,

    /// Drive all instances at once and merge the results.
    Concurrent,
}

/// Per-instance outcome of a fan-out.
///
/// Both fields are always present, so an empty node reports two empty
/// collections rather than nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutReport {
    /// Ids of instances the operation succeeded on.
    pub succeeded: BTreeSet<String>,

    /// Ids of instances the operation failed on, with the error message.
    pub failed: BTreeMap<String, String>,
}

impl FanOutReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome for one instance.
    pub fn record<T>(&mut self, id: impl Into<String>, result: &Result<T>) {
        let id = id.into();
        match result {
            Ok(_) => {
                self.failed.remove(&id);
                self.succeeded.insert(id);
            }
            Err(e) => {
                self.succeeded.remove(&id);
                self.failed.insert(id, e.to_string());
            }
        }
    }

    /// Merges another report into this one.
    pub fn merge(&mut self, other: FanOutReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }

    /// Returns true if nothing failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Returns the number of recorded outcomes.
    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Returns true if no outcome was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
