//! Connection graph: nodes plus field-to-field edges
//!
//! The graph validates every construction call eagerly. Field types must be
//! compatible, each input takes at most one edge (join fields excepted), and
//! no edge may close a cycle. A graph is a cheap-to-clone template that can be
//! expanded any number of times.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConstructionError, FieldDirection, Result};
use crate::node::{Iterable, Node, NodeKind};
use crate::types::{Field, FieldType, NodeId};
use crate::validation::topological_sort;

/// A connection from one node's output field to another node's input field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub source_node: NodeId,
    pub source_field: String,
    pub dest_node: NodeId,
    pub dest_field: String,
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source_node, self.source_field, self.dest_node, self.dest_field
        )
    }
}

/// A workflow template
#[derive(Debug, Clone, Default)]
pub struct ConnectionGraph {
    name: String,
    nodes: Vec<Node>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
}

impl ConnectionGraph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a node, checking its map and join declarations
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        if self.index.contains_key(&node.id) {
            return Err(ConstructionError::DuplicateNode(node.id).into());
        }

        let spec = node.executor().field_spec();
        match &node.kind {
            NodeKind::Map { iterfields } => {
                if iterfields.is_empty() {
                    return Err(ConstructionError::InvalidMapField {
                        node: node.id.clone(),
                        field: String::new(),
                    }
                    .into());
                }
                if let Some(missing) = iterfields.iter().find(|f| spec.input(f).is_none()) {
                    return Err(ConstructionError::InvalidMapField {
                        node: node.id.clone(),
                        field: missing.clone(),
                    }
                    .into());
                }
            }
            NodeKind::Join(join) => {
                if join.source == node.id {
                    return Err(ConstructionError::InvalidJoin {
                        node: node.id.clone(),
                        message: "a node cannot join its own iterables".to_string(),
                    }
                    .into());
                }
                if let Some(missing) = join.fields.iter().find(|f| spec.input(f).is_none()) {
                    return Err(ConstructionError::InvalidJoin {
                        node: node.id.clone(),
                        message: format!("join field '{}' is not an input", missing),
                    }
                    .into());
                }
            }
            NodeKind::Plain => {}
        }

        let id = node.id.clone();
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(id)
    }

    /// Connect `source.source_field` to `dest.dest_field`
    pub fn connect(
        &mut self,
        source: &str,
        source_field: &str,
        dest: &str,
        dest_field: &str,
    ) -> Result<()> {
        let src_node = self.require_node(source)?;
        let dst_node = self.require_node(dest)?;

        let out = src_node
            .output_field(source_field)
            .ok_or_else(|| ConstructionError::UnknownField {
                node: source.to_string(),
                field: source_field.to_string(),
                direction: FieldDirection::Output,
            })?;
        let input = dst_node
            .input_field(dest_field)
            .ok_or_else(|| ConstructionError::UnknownField {
                node: dest.to_string(),
                field: dest_field.to_string(),
                direction: FieldDirection::Input,
            })?;

        let join_field = dst_node.is_join_field(dest_field);
        if !edge_types_match(&out, &input, join_field) {
            return Err(ConstructionError::TypeMismatch {
                source_node: source.to_string(),
                source_field: source_field.to_string(),
                dest_node: dest.to_string(),
                dest_field: dest_field.to_string(),
                source_type: out.field_type.to_string(),
                dest_type: input.field_type.to_string(),
            }
            .into());
        }

        let iterated = dst_node.iterables.iter().any(|it| it.field == dest_field);
        if iterated
            || (!join_field
                && self
                    .edges
                    .iter()
                    .any(|e| e.dest_node == dest && e.dest_field == dest_field))
        {
            return Err(ConstructionError::DuplicateInput {
                node: dest.to_string(),
                field: dest_field.to_string(),
            }
            .into());
        }

        if source == dest || self.reaches(dest, source) {
            return Err(ConstructionError::CycleDetected(source.to_string()).into());
        }

        self.edges.push(Edge {
            source_node: source.to_string(),
            source_field: source_field.to_string(),
            dest_node: dest.to_string(),
            dest_field: dest_field.to_string(),
        });
        Ok(())
    }

    /// Replace the iterable declarations of a node
    pub fn set_iterables(&mut self, node_id: &str, iterables: Vec<Iterable>) -> Result<()> {
        self.require_node(node_id)?;
        for iterable in &iterables {
            self.check_unconnected(node_id, &iterable.field)?;
        }
        self.require_node_mut(node_id)?.iterables = iterables;
        Ok(())
    }

    /// Append one iterable declaration to a node
    pub fn add_iterable(
        &mut self,
        node_id: &str,
        field: impl Into<String>,
        values: Vec<serde_json::Value>,
    ) -> Result<()> {
        let field = field.into();
        self.require_node(node_id)?;
        self.check_unconnected(node_id, &field)?;
        self.require_node_mut(node_id)?
            .iterables
            .push(Iterable::new(field, values));
        Ok(())
    }

    /// An iterated field takes its values from the sweep, never from an edge
    fn check_unconnected(&self, node_id: &str, field: &str) -> Result<()> {
        if self
            .edges
            .iter()
            .any(|e| e.dest_node == node_id && e.dest_field == field)
        {
            return Err(ConstructionError::DuplicateInput {
                node: node_id.to_string(),
                field: field.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Preset an input value on a node
    pub fn set_input(&mut self, node_id: &str, field: &str, value: serde_json::Value) -> Result<()> {
        let node = self.require_node_mut(node_id)?;
        if node.input_field(field).is_none() {
            return Err(ConstructionError::UnknownField {
                node: node_id.to_string(),
                field: field.to_string(),
                direction: FieldDirection::Input,
            }
            .into());
        }
        node.inputs.insert(field.to_string(), value);
        Ok(())
    }

    /// Find a node by ID
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.dest_node == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source_node == node_id)
    }

    /// IDs of nodes this node depends on, without duplicates
    pub fn upstream(&self, node_id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.incoming_edges(node_id)
            .filter(|e| seen.insert(e.source_node.as_str()))
            .map(|e| e.source_node.clone())
            .collect()
    }

    /// IDs of nodes depending on this node, without duplicates
    pub fn downstream(&self, node_id: &str) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.outgoing_edges(node_id)
            .filter(|e| seen.insert(e.dest_node.as_str()))
            .map(|e| e.dest_node.clone())
            .collect()
    }

    /// Nodes ordered so every edge points forward
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let ids: Vec<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        let edges = self
            .edges
            .iter()
            .map(|e| (e.source_node.as_str(), e.dest_node.as_str()));
        topological_sort(&ids, edges)
            .map(|order| order.into_iter().map(str::to_string).collect())
            .map_err(|stuck| ConstructionError::CycleDetected(stuck.to_string()).into())
    }

    /// Whether `to` is reachable from `from` along edges
    pub(crate) fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            stack.extend(self.outgoing_edges(current).map(|e| e.dest_node.as_str()));
        }
        false
    }

    fn require_node(&self, id: &str) -> Result<&Node> {
        self.node(id)
            .ok_or_else(|| ConstructionError::UnknownNode(id.to_string()).into())
    }

    fn require_node_mut(&mut self, id: &str) -> Result<&mut Node> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(ConstructionError::UnknownNode(id.to_string()).into()),
        }
    }
}

/// Whether an output can feed an input.
///
/// A join field aggregates one value per branch, so the source must match the
/// element type of the destination collection.
fn edge_types_match(out: &Field, input: &Field, join_field: bool) -> bool {
    if !join_field {
        return out.field_type.is_compatible_with(&input.field_type);
    }
    match &input.field_type {
        FieldType::Any => true,
        collection => collection
            .item()
            .is_some_and(|item| out.field_type.is_compatible_with(item)),
    }
}
