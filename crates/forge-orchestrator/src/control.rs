//! Control surface boundary.
//!
//! Transports (the CLI, an HTTP layer) hand this module a controller name, a
//! node name and a set of instruction keywords. Names are resolved once and
//! the instructions run in a fixed order: create, build, start, stop.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{BuildReport, Orchestrator};
use crate::error::OrchestratorError;
use crate::node::FanOutReport;

/// Errors surfaced to transports.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    /// Controller or node does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request cannot be acted on.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The engine failed while executing the request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns the matching HTTP status code.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::BadRequest(_) => 400,
            Self::Internal(_) => 500,
        }
    }
}

impl From<OrchestratorError> for ControlError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::ControllerNotFound(name) => {
                Self::NotFound(format!("controller {}", name))
            }
            OrchestratorError::NodeNotFound(name) => Self::NotFound(format!("node {}", name)),
            OrchestratorError::InstanceExists { .. } => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Instruction keyword.
///
/// The derived order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instruction {
    /// Allocate a new instance.
    Create,

    /// Build the node and its dependencies.
    Build,

    /// Start every instance.
    Start,

    /// Stop every instance.
    Stop,
}

impl Instruction {
    /// Returns the keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Build => "build",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Instruction {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "build" => Ok(Self::Build),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            other => Err(ControlError::BadRequest(format!(
                "unknown instruction '{}'",
                other
            ))),
        }
    }
}

/// Instruction keywords as sent by a client: one keyword or a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum InstructionInput {
    /// `"start"`
    One(String),

    /// `["build", "start"]`
    Many(Vec<String>),
}

impl From<Vec<String>> for InstructionInput {
    fn from(keywords: Vec<String>) -> Self {
        Self::Many(keywords)
    }
}

/// Parses instruction keywords.
///
/// Unknown keywords are ignored. An empty or all-unknown input is a bad
/// request.
pub fn parse_instructions(input: &InstructionInput) -> Result<BTreeSet<Instruction>, ControlError> {
    let keywords: Vec<&str> = match input {
        InstructionInput::One(keyword) => vec![keyword.as_str()],
        InstructionInput::Many(keywords) => keywords.iter().map(String::as_str).collect(),
    };

    if keywords.is_empty() {
        return Err(ControlError::BadRequest("no instructions provided".to_string()));
    }

    let instructions: BTreeSet<Instruction> = keywords
        .iter()
        .filter_map(|keyword| match keyword.parse::<Instruction>() {
            Ok(instruction) => Some(instruction),
            Err(e) => {
                debug!(error = %e, "Ignoring instruction");
                None
            }
        })
        .collect();

    if instructions.is_empty() {
        return Err(ControlError::BadRequest("invalid instruction".to_string()));
    }
    Ok(instructions)
}

/// Outcome of one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum InstructionResponse {
    /// Id of the created instance.
    Created(String),

    /// Dependency-ordered build report.
    Built(BuildReport),

    /// Per-instance start or stop report.
    Applied(FanOutReport),
}

/// Responses keyed by instruction.
pub type ControlResponse = BTreeMap<Instruction, InstructionResponse>;

/// Resolves `controller` and `node` and runs `instructions` in order.
///
/// An instruction failure aborts the remaining ones; instructions already
/// run keep their effect.
pub async fn execute(
    orchestrator: &mut Orchestrator,
    controller: &str,
    node: &str,
    instructions: &BTreeSet<Instruction>,
) -> Result<ControlResponse, ControlError> {
    let controller = orchestrator.controller_mut(controller)?;
    controller.node(node)?;

    let mut response = ControlResponse::new();
    for instruction in instructions {
        let outcome = match instruction {
            Instruction::Create => InstructionResponse::Created(controller.create_instance(node, None)?),
            Instruction::Build => InstructionResponse::Built(controller.build_node(node).await?),
            Instruction::Start => InstructionResponse::Applied(controller.start_node(node).await?),
            Instruction::Stop => InstructionResponse::Applied(controller.stop_node(node).await?),
        };
        info!(
            controller = %controller.name(),
            node = %node,
            instruction = %instruction,
            "Executed instruction"
        );
        response.insert(*instruction, outcome);
    }

    Ok(response)
}
