//! Error types for the sweep engine
//!
//! Construction and expansion problems are fatal and surface as
//! [`EngineError`]. Node-level execution problems never abort a run; they are
//! recorded per node as an [`ExecutionFailure`] inside the run report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::NodeId;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by the engine's fallible API
#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph could not be built as described
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// Iterable expansion rejected the graph
    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    /// No factory is registered under a node kind
    #[error("Unknown node kind '{0}'")]
    UnknownKind(String),

    /// A node kind rejected its parameters
    #[error("Invalid parameters for node kind '{kind}': {message}")]
    InvalidParams { kind: String, message: String },

    /// Malformed workflow definition
    #[error("Invalid workflow definition: {0}")]
    Definition(String),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Graph construction errors. Always fatal, never silently corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    #[error("Node '{0}' already exists in the graph")]
    DuplicateNode(NodeId),

    #[error("Unknown node '{0}'")]
    UnknownNode(NodeId),

    #[error("Node '{node}' has no {direction} field '{field}'")]
    UnknownField {
        node: NodeId,
        field: String,
        direction: FieldDirection,
    },

    #[error("Edge {source_node}.{source_field} -> {dest_node}.{dest_field} connects incompatible types: {source_type} -> {dest_type}")]
    TypeMismatch {
        source_node: NodeId,
        source_field: String,
        dest_node: NodeId,
        dest_field: String,
        source_type: String,
        dest_type: String,
    },

    #[error("Input '{field}' on node '{node}' already has an incoming edge")]
    DuplicateInput { node: NodeId, field: String },

    #[error("Cycle detected through node '{0}'")]
    CycleDetected(NodeId),

    #[error("Invalid join declaration on node '{node}': {message}")]
    InvalidJoin { node: NodeId, message: String },

    #[error("Map node '{node}' iterates over unknown input '{field}'")]
    InvalidMapField { node: NodeId, field: String },
}

/// Which side of a node a field lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDirection {
    Input,
    Output,
}

impl std::fmt::Display for FieldDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Errors raised while expanding iterables into an execution graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpansionError {
    #[error("Iterable field '{field}' is not an input of node '{node}'")]
    UnknownIterableField { node: NodeId, field: String },

    #[error("Join node '{join}' declares source '{source_node}', which does not feed its join fields")]
    JoinSourceNotUpstream { join: NodeId, source_node: NodeId },

    #[error("Join node '{join}' receives iterated values from '{source_node}' on non-join field '{field}'")]
    IteratedJoinInput {
        join: NodeId,
        field: String,
        source_node: NodeId,
    },
}

/// Why a single node did not produce outputs
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExecutionFailure {
    /// The wrapped computation reported a failure
    #[error("{reason}")]
    Executor {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partial_outputs: Option<crate::types::ValueMap>,
    },

    /// A required input was neither connected, preset, nor defaulted
    #[error("Missing required input '{field}'")]
    MissingInput { field: String },

    /// A bound value does not fit the declared field type
    #[error("Value for '{field}' is not a valid {expected}")]
    InvalidValue { field: String, expected: String },

    /// A join could not collect the branches it requires
    #[error("Join incomplete: {message}")]
    JoinIncomplete { message: String },

    /// Map node iterfields carried lists of different lengths
    #[error("Map iterfields have mismatched lengths: {lengths:?}")]
    MapLengthMismatch { lengths: Vec<usize> },

    /// The execution backend lost the job (panic, cancellation)
    #[error("Backend failure: {0}")]
    Backend(String),
}

impl ExecutionFailure {
    /// Create an executor failure with a message
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Executor {
            reason: reason.into(),
            partial_outputs: None,
        }
    }

    /// Create an executor failure that still carries some outputs
    pub fn partial(reason: impl Into<String>, outputs: crate::types::ValueMap) -> Self {
        Self::Executor {
            reason: reason.into(),
            partial_outputs: Some(outputs),
        }
    }
}
