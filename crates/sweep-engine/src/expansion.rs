//! Iterable expansion
//!
//! [`expand`] turns a template [`ConnectionGraph`] into a concrete
//! [`ExecutionGraph`] without touching the template.
//!
//! # Scopes
//!
//! Every node carrying iterables is an *iterable root*. A node's scope is the
//! set of roots whose branches reach it: the union of its upstream scopes,
//! plus itself if it is a root, minus the root a join node collapses. A node
//! is instantiated once per combination of its scope's roots, enumerated as
//! nested loops in topological root order (earlier roots vary slowest).
//!
//! Two paths that descend from the same root stay aligned: a node fed by
//! `a[r=0]` and `b[r=0]` becomes one instance bound to both, never a cross
//! product. Only independent roots multiply.
//!
//! Pass-through roots that only carry iterables are removed; their values are
//! substituted directly into the consuming inputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ExpansionError, Result};
use crate::executor::NodeExecutor;
use crate::graph::{ConnectionGraph, Edge};
use crate::node::{Iterable, Node, NodeKind};
use crate::types::{NodeId, ValueMap};
use crate::validation::topological_sort;

/// Selected branch per iterable root, as `(root, combination index)`
pub type Combination = Vec<(NodeId, usize)>;

/// Where one bound input value comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputSource {
    /// A concrete value known at expansion time
    Value { value: serde_json::Value },
    /// An output of another expanded node
    Output { node: NodeId, field: String },
}

/// How an input field of an expanded node gets its value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputBinding {
    Single { source: InputSource },
    /// Join field: one entry per branch, in enumeration order
    Aggregate { sources: Vec<InputSource> },
}

impl InputBinding {
    /// All sources feeding this binding
    pub fn sources(&self) -> &[InputSource] {
        match self {
            Self::Single { source } => std::slice::from_ref(source),
            Self::Aggregate { sources } => sources,
        }
    }
}

/// One concrete node instance in an execution graph
#[derive(Clone)]
pub struct ExecNode {
    pub id: NodeId,
    /// ID of the template node this instance was cloned from
    pub base_id: NodeId,
    pub kind: NodeKind,
    pub combination: Combination,
    pub bindings: BTreeMap<String, InputBinding>,
    executor: Arc<dyn NodeExecutor>,
}

impl std::fmt::Debug for ExecNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecNode")
            .field("id", &self.id)
            .field("base_id", &self.base_id)
            .field("kind", &self.kind)
            .field("combination", &self.combination)
            .field("bindings", &self.bindings)
            .finish()
    }
}

impl ExecNode {
    pub fn executor(&self) -> &Arc<dyn NodeExecutor> {
        &self.executor
    }

    /// IDs of expanded nodes this instance reads from
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        for binding in self.bindings.values() {
            for source in binding.sources() {
                if let InputSource::Output { node, .. } = source {
                    if !deps.contains(&node.as_str()) {
                        deps.push(node);
                    }
                }
            }
        }
        deps
    }
}

/// The concrete graph produced by expansion. Always acyclic.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    name: String,
    nodes: Vec<ExecNode>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    root_combinations: HashMap<NodeId, Vec<ValueMap>>,
}

impl ExecutionGraph {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Nodes in topological order
    pub fn nodes(&self) -> &[ExecNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&ExecNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All instances cloned from one template node
    pub fn instances_of<'a>(&'a self, base_id: &'a str) -> impl Iterator<Item = &'a ExecNode> + 'a {
        self.nodes.iter().filter(move |n| n.base_id == base_id)
    }

    /// Iterable values selected for an instance, keyed by field name
    pub fn parameters(&self, id: &str) -> ValueMap {
        let mut params = ValueMap::new();
        if let Some(node) = self.node(id) {
            for (root, index) in &node.combination {
                if let Some(values) = self
                    .root_combinations
                    .get(root)
                    .and_then(|combos| combos.get(*index))
                {
                    params.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
        }
        params
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
            .map_err(|stuck| {
                crate::error::ConstructionError::CycleDetected(stuck.to_string()).into()
            })
    }
}

/// Expand a template graph into a concrete execution graph.
pub fn expand(graph: &ConnectionGraph) -> Result<ExecutionGraph> {
    let order = graph.topological_order()?;
    let rank: HashMap<NodeId, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i))
        .collect();

    let mut combinations: HashMap<NodeId, Vec<ValueMap>> = HashMap::new();
    for node in graph.nodes().iter().filter(|n| !n.iterables.is_empty()) {
        if let Some(unknown) = node
            .iterables
            .iter()
            .find(|it| node.input_field(&it.field).is_none())
        {
            return Err(ExpansionError::UnknownIterableField {
                node: node.id.clone(),
                field: unknown.field.clone(),
            }
            .into());
        }
        combinations.insert(node.id.clone(), iterable_combinations(&node.iterables));
    }

    let mut expander = Expander {
        graph,
        rank,
        combinations,
        scopes: HashMap::new(),
    };
    for id in &order {
        expander.compute_scope(id)?;
    }

    let mut nodes = Vec::new();
    for id in &order {
        let Some(node) = graph.node(id) else { continue };
        if node.is_elidable() {
            log::debug!("Eliding pass-through iterable node '{}'", id);
            continue;
        }
        for combination in expander.instances(id) {
            nodes.push(expander.instantiate(node, combination));
        }
    }

    let mut edges = Vec::new();
    for node in &nodes {
        for (field, binding) in &node.bindings {
            for source in binding.sources() {
                if let InputSource::Output { node: source_node, field: source_field } = source {
                    edges.push(Edge {
                        source_node: source_node.clone(),
                        source_field: source_field.clone(),
                        dest_node: node.id.clone(),
                        dest_field: field.clone(),
                    });
                }
            }
        }
    }

    let index = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.clone(), i))
        .collect();

    log::info!(
        "Expanded graph '{}': {} template nodes -> {} instances ({} iterable roots)",
        graph.name(),
        graph.nodes().len(),
        nodes.len(),
        expander.combinations.len()
    );

    Ok(ExecutionGraph {
        name: graph.name().to_string(),
        nodes,
        index,
        edges,
        root_combinations: expander.combinations,
    })
}

/// Cartesian product of iterable declarations, first declaration slowest.
fn iterable_combinations(iterables: &[Iterable]) -> Vec<ValueMap> {
    let mut combos = vec![ValueMap::new()];
    for iterable in iterables {
        let mut next = Vec::with_capacity(combos.len() * iterable.values.len());
        for prefix in &combos {
            for value in &iterable.values {
                let mut combo = prefix.clone();
                combo.insert(iterable.field.clone(), value.clone());
                next.push(combo);
            }
        }
        combos = next;
    }
    combos
}

struct Expander<'a> {
    graph: &'a ConnectionGraph,
    rank: HashMap<NodeId, usize>,
    combinations: HashMap<NodeId, Vec<ValueMap>>,
    /// Iterable roots reaching each node, in rank order
    scopes: HashMap<NodeId, Vec<NodeId>>,
}

impl<'a> Expander<'a> {
    fn scope(&self, id: &str) -> &[NodeId] {
        self.scopes.get(id).map(|s| s.as_slice()).unwrap_or(&[])
    }

    fn is_root(&self, id: &str) -> bool {
        self.combinations.contains_key(id)
    }

    fn compute_scope(&mut self, id: &str) -> Result<()> {
        let Some(node) = self.graph.node(id) else {
            return Ok(());
        };

        let mut union: BTreeMap<usize, NodeId> = BTreeMap::new();
        let mut join_fed = false;

        for edge in self.graph.incoming_edges(id) {
            let upstream = self.scope(&edge.source_node);

            if let Some(join) = node.join_spec() {
                let carries_source = upstream.contains(&join.source);
                if node.is_join_field(&edge.dest_field) {
                    join_fed |= if self.is_root(&join.source) {
                        carries_source
                    } else {
                        self.graph.reaches(&join.source, &edge.source_node)
                    };
                } else if carries_source {
                    return Err(ExpansionError::IteratedJoinInput {
                        join: id.to_string(),
                        field: edge.dest_field.clone(),
                        source_node: edge.source_node.clone(),
                    }
                    .into());
                }
            }

            for root in upstream {
                union.insert(self.rank[root], root.clone());
            }
        }

        if let Some(join) = node.join_spec() {
            if !join_fed {
                return Err(ExpansionError::JoinSourceNotUpstream {
                    join: id.to_string(),
                    source_node: join.source.clone(),
                }
                .into());
            }
            union.retain(|_, root| *root != join.source);
        }

        if self.is_root(id) {
            union.insert(self.rank[id], id.to_string());
        }

        self.scopes
            .insert(id.to_string(), union.into_values().collect());
        Ok(())
    }

    /// Every combination a node is instantiated for, earlier roots slowest
    fn instances(&self, id: &str) -> Vec<Combination> {
        let mut combos: Vec<Combination> = vec![Vec::new()];
        for root in self.scope(id) {
            let count = self.combinations.get(root).map_or(0, |c| c.len());
            let mut next = Vec::with_capacity(combos.len() * count);
            for prefix in &combos {
                for index in 0..count {
                    let mut combo = prefix.clone();
                    combo.push((root.clone(), index));
                    next.push(combo);
                }
            }
            combos = next;
        }
        combos
    }

    /// Instance ID of `base` for the branch selected by `combination`
    fn instance_id(&self, base: &str, combination: &Combination) -> NodeId {
        let parts: Vec<String> = self
            .scope(base)
            .iter()
            .filter_map(|root| {
                combination
                    .iter()
                    .find(|(r, _)| r == root)
                    .map(|(r, i)| format!("{}={}", r, i))
            })
            .collect();
        if parts.is_empty() {
            base.to_string()
        } else {
            format!("{}[{}]", base, parts.join(","))
        }
    }

    fn root_values(&self, root: &str, combination: &Combination) -> Option<&ValueMap> {
        let (_, index) = combination.iter().find(|(r, _)| r == root)?;
        self.combinations.get(root)?.get(*index)
    }

    /// Resolve what feeds `source.field` for the given branch.
    ///
    /// Elided pass-through nodes are looked through: their iterated value,
    /// upstream edge, preset, or default is used directly.
    fn resolve_source(
        &self,
        source: &str,
        field: &str,
        combination: &Combination,
    ) -> Option<InputSource> {
        let node = self.graph.node(source)?;
        if !node.is_elidable() {
            return Some(InputSource::Output {
                node: self.instance_id(source, combination),
                field: field.to_string(),
            });
        }

        if let Some(value) = self
            .root_values(source, combination)
            .and_then(|values| values.get(field))
        {
            return Some(InputSource::Value {
                value: value.clone(),
            });
        }
        if let Some(edge) = self
            .graph
            .incoming_edges(source)
            .find(|e| e.dest_field == field)
        {
            return self.resolve_source(&edge.source_node, &edge.source_field, combination);
        }
        node.inputs
            .get(field)
            .cloned()
            .or_else(|| node.input_field(field).and_then(|f| f.default))
            .map(|value| InputSource::Value { value })
    }

    fn with_root(&self, combination: &Combination, root: &str, index: usize) -> Combination {
        let mut extended = combination.clone();
        extended.push((root.to_string(), index));
        extended.sort_by_key(|(r, _)| self.rank.get(r).copied().unwrap_or(usize::MAX));
        extended
    }

    fn instantiate(&self, node: &Node, combination: Combination) -> ExecNode {
        let mut bindings: BTreeMap<String, InputBinding> = node
            .inputs
            .iter()
            .map(|(field, value)| {
                (
                    field.clone(),
                    InputBinding::Single {
                        source: InputSource::Value {
                            value: value.clone(),
                        },
                    },
                )
            })
            .collect();

        let mut aggregates: BTreeMap<String, Vec<InputSource>> = BTreeMap::new();
        let join_edges: Vec<&Edge> = self
            .graph
            .incoming_edges(&node.id)
            .filter(|e| node.is_join_field(&e.dest_field))
            .collect();

        if let Some(join) = node.join_spec() {
            let branches: Vec<Combination> = match self.combinations.get(&join.source) {
                Some(combos) => (0..combos.len())
                    .map(|i| self.with_root(&combination, &join.source, i))
                    .collect(),
                None => vec![combination.clone()],
            };

            for edge in &join_edges {
                aggregates.entry(edge.dest_field.clone()).or_default();
            }
            for branch in &branches {
                for edge in &join_edges {
                    if let Some(source) =
                        self.resolve_source(&edge.source_node, &edge.source_field, branch)
                    {
                        aggregates
                            .entry(edge.dest_field.clone())
                            .or_default()
                            .push(source);
                    }
                }
            }
        }

        for edge in self
            .graph
            .incoming_edges(&node.id)
            .filter(|e| !node.is_join_field(&e.dest_field))
        {
            if let Some(source) =
                self.resolve_source(&edge.source_node, &edge.source_field, &combination)
            {
                bindings.insert(edge.dest_field.clone(), InputBinding::Single { source });
            }
        }

        for (field, sources) in aggregates {
            bindings.insert(field, InputBinding::Aggregate { sources });
        }

        if let Some(values) = self.root_values(&node.id, &combination) {
            for (field, value) in values {
                bindings.insert(
                    field.clone(),
                    InputBinding::Single {
                        source: InputSource::Value {
                            value: value.clone(),
                        },
                    },
                );
            }
        }

        ExecNode {
            id: self.instance_id(&node.id, &combination),
            base_id: node.id.clone(),
            kind: node.kind.clone(),
            combination,
            bindings,
            executor: node.executor().clone(),
        }
    }
}
