//! Serializable workflow definitions
//!
//! A [`WorkflowDef`] is the JSON form of a connection graph:
//!
//! ```json
//! {
//!   "name": "sweep",
//!   "nodes": [
//!     { "id": "inputspec", "kind": "identity", "params": { "fields": ["n"] },
//!       "iterables": [{ "field": "n", "values": [1, 2] }] },
//!     { "id": "total", "kind": "sum", "join": { "source": "inputspec" } }
//!   ],
//!   "edges": [{ "from": "inputspec.n", "to": "total.values" }]
//! }
//! ```
//!
//! Building goes through the regular graph construction calls, so a
//! definition is checked exactly like a graph assembled in code.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::graph::ConnectionGraph;
use crate::node::{Iterable, JoinSpec, Node};
use crate::registry::NodeRegistry;
use crate::types::ValueMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDef {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDef {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Passed to the kind's factory
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub inputs: ValueMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iterables: Vec<Iterable>,
    /// Iterfields, making this a map node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinSpec>,
}

/// Edge between two `"node.field"` endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
}

/// Split `"node.field"` at the last dot
fn endpoint(spec: &str) -> Result<(&str, &str)> {
    match spec.rsplit_once('.') {
        Some((node, field)) if !node.is_empty() && !field.is_empty() => Ok((node, field)),
        _ => Err(EngineError::Definition(format!(
            "edge endpoint '{}' is not of the form 'node.field'",
            spec
        ))),
    }
}

impl WorkflowDef {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resolve every node kind through the registry and assemble the graph
    pub fn build(&self, registry: &NodeRegistry) -> Result<ConnectionGraph> {
        let mut graph = ConnectionGraph::new(&self.name);

        for def in &self.nodes {
            let executor = registry.build(&def.kind, &def.params)?;
            let mut node = match (&def.map, &def.join) {
                (Some(_), Some(_)) => {
                    return Err(EngineError::Definition(format!(
                        "node '{}' cannot be both a map node and a join node",
                        def.id
                    )))
                }
                (Some(iterfields), None) => Node::map(&def.id, executor, iterfields.clone()),
                (None, Some(join)) => Node::join(&def.id, executor, join.clone()),
                (None, None) => Node::new(&def.id, executor),
            };
            if let Some(name) = &def.name {
                node = node.with_name(name);
            }
            node.iterables = def.iterables.clone();
            graph.add_node(node)?;

            for (field, value) in &def.inputs {
                graph.set_input(&def.id, field, value.clone())?;
            }
        }

        for edge in &self.edges {
            let (source, source_field) = endpoint(&edge.from)?;
            let (dest, dest_field) = endpoint(&edge.to)?;
            graph.connect(source, source_field, dest, dest_field)?;
        }

        log::debug!(
            "Built workflow '{}' with {} nodes and {} edges",
            self.name,
            self.nodes.len(),
            self.edges.len()
        );
        Ok(graph)
    }
}
