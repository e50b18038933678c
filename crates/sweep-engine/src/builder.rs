//! Fluent builder for connection graphs
//!
//! Calls only record what to build; every construction check runs in
//! [`WorkflowBuilder::build`], which reports the first error.

use std::sync::Arc;

use crate::error::Result;
use crate::executor::NodeExecutor;
use crate::graph::ConnectionGraph;
use crate::node::{JoinSpec, Node};

/// Fluent builder for constructing connection graphs
///
/// # Example
///
/// ```ignore
/// let graph = WorkflowBuilder::new("sweep")
///     .node("inc", increment)
///     .iterables("input1", vec![json!(1), json!(2)])
///     .join_node("total", sum, JoinSpec::new("inc").field("input1"))
///     .connect("inc", "output1", "total", "input1")
///     .build()?;
/// ```
pub struct WorkflowBuilder {
    name: String,
    nodes: Vec<Node>,
    edges: Vec<(String, String, String, String)>,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Add a plain node
    pub fn node(mut self, id: impl Into<String>, executor: Arc<dyn NodeExecutor>) -> Self {
        self.nodes.push(Node::new(id, executor));
        self
    }

    /// Add a map node iterating over `iterfields`
    pub fn map_node(
        mut self,
        id: impl Into<String>,
        executor: Arc<dyn NodeExecutor>,
        iterfields: &[&str],
    ) -> Self {
        let iterfields = iterfields.iter().map(|f| f.to_string()).collect();
        self.nodes.push(Node::map(id, executor, iterfields));
        self
    }

    /// Add a join node
    pub fn join_node(
        mut self,
        id: impl Into<String>,
        executor: Arc<dyn NodeExecutor>,
        spec: JoinSpec,
    ) -> Self {
        self.nodes.push(Node::join(id, executor, spec));
        self
    }

    /// Declare an iterable on the most recently added node
    ///
    /// Must be called after `node`, `map_node` or `join_node`.
    pub fn iterables(mut self, field: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        if let Some(node) = self.nodes.pop() {
            self.nodes.push(node.with_iterable(field, values));
        }
        self
    }

    /// Preset an input on the most recently added node
    pub fn input(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        if let Some(node) = self.nodes.pop() {
            self.nodes.push(node.with_input(field, value));
        }
        self
    }

    /// Connect an output field to an input field
    pub fn connect(
        mut self,
        source: impl Into<String>,
        source_field: impl Into<String>,
        dest: impl Into<String>,
        dest_field: impl Into<String>,
    ) -> Self {
        self.edges.push((
            source.into(),
            source_field.into(),
            dest.into(),
            dest_field.into(),
        ));
        self
    }

    /// Build and validate the graph
    pub fn build(self) -> Result<ConnectionGraph> {
        let mut graph = ConnectionGraph::new(self.name);
        for node in self.nodes {
            let id = node.id.clone();
            let presets = node.inputs.clone();
            let mut node = node;
            node.inputs.clear();
            graph.add_node(node)?;
            for (field, value) in presets {
                graph.set_input(&id, &field, value)?;
            }
        }
        for (source, source_field, dest, dest_field) in &self.edges {
            graph.connect(source, source_field, dest, dest_field)?;
        }
        Ok(graph)
    }
}
