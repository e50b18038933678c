//! Graph vertices: plain nodes, map nodes, and join nodes
//!
//! A [`Node`] pairs an executor with preset input values, optional iterable
//! declarations, and a [`NodeKind`] that tells the expander and scheduler how
//! to treat it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::executor::NodeExecutor;
use crate::types::{Field, FieldType, NodeId, ValueMap};

/// Parameter sweep over one input field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iterable {
    pub field: String,
    pub values: Vec<serde_json::Value>,
}

impl Iterable {
    pub fn new(field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }
}

/// Aggregation settings for a join node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    /// The iterable root whose branches are gathered
    pub source: NodeId,
    /// Fields that receive one value per branch. Empty means every input.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Collapse duplicate values, keeping first-seen order
    #[serde(default)]
    pub unique: bool,
}

impl JoinSpec {
    pub fn new(source: impl Into<NodeId>) -> Self {
        Self {
            source: source.into(),
            fields: Vec::new(),
            unique: false,
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// How a node participates in expansion and scheduling
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Executes once per instance
    Plain,
    /// Fans list inputs on `iterfields` out to one sub-execution per element
    Map { iterfields: Vec<String> },
    /// Gathers every branch of an iterable root into list-valued inputs
    Join(JoinSpec),
}

/// A node in a connection graph
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    executor: Arc<dyn NodeExecutor>,
    /// Values bound directly rather than through an edge
    pub inputs: ValueMap,
    pub iterables: Vec<Iterable>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("executor", &self.executor.kind())
            .field("inputs", &self.inputs)
            .field("iterables", &self.iterables)
            .finish()
    }
}

impl Node {
    /// Create a plain node
    pub fn new(id: impl Into<NodeId>, executor: Arc<dyn NodeExecutor>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            kind: NodeKind::Plain,
            executor,
            inputs: ValueMap::new(),
            iterables: Vec::new(),
        }
    }

    /// Create a map node iterating over the given input fields
    pub fn map(
        id: impl Into<NodeId>,
        executor: Arc<dyn NodeExecutor>,
        iterfields: Vec<String>,
    ) -> Self {
        let mut node = Self::new(id, executor);
        node.kind = NodeKind::Map { iterfields };
        node
    }

    /// Create a join node
    pub fn join(id: impl Into<NodeId>, executor: Arc<dyn NodeExecutor>, spec: JoinSpec) -> Self {
        let mut node = Self::new(id, executor);
        node.kind = NodeKind::Join(spec);
        node
    }

    /// Set a human-readable name (defaults to the id)
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Preset an input value
    pub fn with_input(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(field.into(), value);
        self
    }

    /// Declare an iterable. Multiple declarations expand as a cartesian product.
    pub fn with_iterable(mut self, field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.iterables.push(Iterable::new(field, values));
        self
    }

    pub fn executor(&self) -> &Arc<dyn NodeExecutor> {
        &self.executor
    }

    pub fn join_spec(&self) -> Option<&JoinSpec> {
        match &self.kind {
            NodeKind::Join(spec) => Some(spec),
            _ => None,
        }
    }

    pub fn iterfields(&self) -> &[String] {
        match &self.kind {
            NodeKind::Map { iterfields } => iterfields,
            _ => &[],
        }
    }

    /// Whether `field` aggregates one value per branch
    pub fn is_join_field(&self, field: &str) -> bool {
        match &self.kind {
            NodeKind::Join(spec) => {
                spec.fields.is_empty() || spec.fields.iter().any(|f| f == field)
            }
            _ => false,
        }
    }

    /// Input field as seen from the graph.
    ///
    /// Map iterfields accept a list of the declared item type.
    pub fn input_field(&self, name: &str) -> Option<Field> {
        let field = self.executor.field_spec().input(name)?.clone();
        if self.iterfields().iter().any(|f| f == name) {
            return Some(Field {
                field_type: FieldType::list(field.field_type),
                ..field
            });
        }
        Some(field)
    }

    /// Output field as seen from the graph.
    ///
    /// Map nodes emit one list per output field.
    pub fn output_field(&self, name: &str) -> Option<Field> {
        let field = self.executor.field_spec().output(name)?.clone();
        if matches!(self.kind, NodeKind::Map { .. }) {
            return Some(Field {
                field_type: FieldType::list(field.field_type),
                ..field
            });
        }
        Some(field)
    }

    /// All input fields as seen from the graph
    pub fn input_fields(&self) -> Vec<Field> {
        self.executor
            .field_spec()
            .inputs
            .iter()
            .filter_map(|f| self.input_field(&f.name))
            .collect()
    }

    /// Pass-through nodes that only exist to carry iterables are removed by
    /// expansion.
    pub fn is_elidable(&self) -> bool {
        matches!(self.kind, NodeKind::Plain)
            && !self.iterables.is_empty()
            && self.executor.is_passthrough()
    }
}
