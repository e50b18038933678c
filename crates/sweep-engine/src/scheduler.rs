//! Run loop over an expanded graph
//!
//! The scheduler repeatedly collects every pending node whose dependencies
//! have all reached a terminal state, resolves its inputs, consults the cache,
//! and submits the misses to the backend as one concurrent batch. A node whose
//! required input comes from a failed or blocked node is marked `Blocked` and
//! never attempted; independent branches keep going.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::backend::{ExecutionBackend, InlineBackend, Job};
use crate::cache::{cache_key, ResultCache};
use crate::error::ExecutionFailure;
use crate::events::{EventSink, NullEventSink, WorkflowEvent};
use crate::executor::NodeExecutor;
use crate::expansion::{ExecNode, ExecutionGraph, InputBinding, InputSource};
use crate::join::{collect_branches, Branch, JoinPolicy, JoinState, JoinTracker};
use crate::map_node::MapExecutor;
use crate::node::NodeKind;
use crate::types::{NodeId, ValueMap};

/// Where a node instance ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum NodeStatus {
    Pending,
    Executed,
    /// Outputs were reused from the cache
    CacheHit,
    Failed { failure: ExecutionFailure },
    /// Never attempted because `cause` failed upstream
    Blocked { cause: NodeId },
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether the node has outputs downstream consumers can read
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Executed | Self::CacheHit)
    }
}

/// Per-status node counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub executed: usize,
    pub cache_hits: usize,
    pub failed: usize,
    pub blocked: usize,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.executed + self.cache_hits
    }
}

/// Outcome of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    /// The expanded graph that was executed
    pub graph: ExecutionGraph,
    pub statuses: BTreeMap<NodeId, NodeStatus>,
    pub outputs: BTreeMap<NodeId, ValueMap>,
}

impl RunReport {
    pub fn status(&self, node_id: &str) -> Option<&NodeStatus> {
        self.statuses.get(node_id)
    }

    pub fn outputs_of(&self, node_id: &str) -> Option<&ValueMap> {
        self.outputs.get(node_id)
    }

    /// One output value of one node instance
    pub fn output(&self, node_id: &str, field: &str) -> Option<&serde_json::Value> {
        self.outputs.get(node_id)?.get(field)
    }

    /// Outputs of every instance of a template node, in enumeration order
    pub fn outputs_for(&self, base_id: &str, field: &str) -> Vec<&serde_json::Value> {
        self.graph
            .instances_of(base_id)
            .filter_map(|node| self.output(&node.id, field))
            .collect()
    }

    fn ids_where(&self, pred: impl Fn(&NodeStatus) -> bool) -> Vec<&str> {
        self.statuses
            .iter()
            .filter(|(_, status)| pred(status))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn executed(&self) -> Vec<&str> {
        self.ids_where(|s| matches!(s, NodeStatus::Executed))
    }

    pub fn cache_hits(&self) -> Vec<&str> {
        self.ids_where(|s| matches!(s, NodeStatus::CacheHit))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.ids_where(|s| matches!(s, NodeStatus::Failed { .. }))
    }

    pub fn blocked(&self) -> Vec<&str> {
        self.ids_where(|s| matches!(s, NodeStatus::Blocked { .. }))
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for status in self.statuses.values() {
            match status {
                NodeStatus::Executed => summary.executed += 1,
                NodeStatus::CacheHit => summary.cache_hits += 1,
                NodeStatus::Failed { .. } => summary.failed += 1,
                NodeStatus::Blocked { .. } => summary.blocked += 1,
                NodeStatus::Pending => {}
            }
        }
        summary
    }

    /// Whether every node produced outputs
    pub fn is_success(&self) -> bool {
        self.statuses.values().all(NodeStatus::succeeded)
    }
}

/// What to do with a ready node
enum Prepared {
    Blocked(NodeId),
    Failed(ExecutionFailure),
    Cached(ValueMap),
    Submit { job: Job, cache_key: Option<String> },
}

/// Executes expanded graphs
pub struct Scheduler {
    backend: Arc<dyn ExecutionBackend>,
    cache: Option<ResultCache>,
    events: Arc<dyn EventSink>,
    join_policy: JoinPolicy,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(Arc::new(InlineBackend))
    }
}

impl Scheduler {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            cache: None,
            events: Arc::new(NullEventSink),
            join_policy: JoinPolicy::default(),
        }
    }

    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_join_policy(mut self, policy: JoinPolicy) -> Self {
        self.join_policy = policy;
        self
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.events.send(event) {
            log::debug!("Dropped run event: {}", e);
        }
    }

    /// Run every node of the graph to a terminal state
    pub async fn run(&self, graph: ExecutionGraph) -> RunReport {
        let run_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "Starting run {} of '{}' ({} nodes, {} backend)",
            run_id,
            graph.name(),
            graph.len(),
            self.backend.name()
        );
        self.emit(WorkflowEvent::RunStarted {
            workflow_id: graph.name().to_string(),
            run_id: run_id.clone(),
            node_count: graph.len(),
        });

        let mut statuses: BTreeMap<NodeId, NodeStatus> = graph
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), NodeStatus::Pending))
            .collect();
        let mut outputs: BTreeMap<NodeId, ValueMap> = BTreeMap::new();
        let mut joins: HashMap<NodeId, JoinTracker> = graph
            .nodes()
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Join(_)))
            .map(|n| (n.id.clone(), JoinTracker::new(aggregate_sources(n))))
            .collect();

        let mut pending: Vec<&ExecNode> = graph.nodes().iter().collect();
        while !pending.is_empty() {
            let (ready, waiting): (Vec<&ExecNode>, Vec<&ExecNode>) =
                pending.into_iter().partition(|node| {
                    let deps_done = node
                        .dependencies()
                        .iter()
                        .all(|dep| statuses.get(*dep).is_some_and(NodeStatus::is_terminal));
                    let join_ready = joins
                        .get(&node.id)
                        .map_or(true, |t| t.state() == JoinState::Ready);
                    deps_done && join_ready
                });
            pending = waiting;

            if ready.is_empty() {
                log::error!(
                    "Run {} stalled with {} unschedulable node(s)",
                    run_id,
                    pending.len()
                );
                for node in pending.drain(..) {
                    statuses.insert(
                        node.id.clone(),
                        NodeStatus::Failed {
                            failure: ExecutionFailure::Backend("node was never scheduled".to_string()),
                        },
                    );
                }
                break;
            }

            let mut batch = Vec::new();
            for node in ready {
                match self.prepare(node, &statuses, &outputs) {
                    Prepared::Blocked(cause) => {
                        log::debug!("Node '{}' blocked by '{}'", node.id, cause);
                        self.emit(WorkflowEvent::NodeBlocked {
                            node_id: node.id.clone(),
                            run_id: run_id.clone(),
                            cause: cause.clone(),
                        });
                        statuses.insert(node.id.clone(), NodeStatus::Blocked { cause });
                    }
                    Prepared::Failed(failure) => {
                        self.record_failure(&run_id, node, &failure);
                        statuses.insert(node.id.clone(), NodeStatus::Failed { failure });
                    }
                    Prepared::Cached(cached) => {
                        log::debug!("Cache hit for node '{}'", node.id);
                        self.emit(WorkflowEvent::NodeCompleted {
                            node_id: node.id.clone(),
                            run_id: run_id.clone(),
                            cached: true,
                        });
                        statuses.insert(node.id.clone(), NodeStatus::CacheHit);
                        outputs.insert(node.id.clone(), cached);
                    }
                    Prepared::Submit { job, cache_key } => {
                        log::debug!("Dispatching node '{}'", node.id);
                        self.emit(WorkflowEvent::NodeStarted {
                            node_id: node.id.clone(),
                            run_id: run_id.clone(),
                        });
                        batch.push((node, job, cache_key));
                    }
                }
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|(_, job, _)| self.backend.submit(job.clone())),
            )
            .await;

            for ((node, _, key), result) in batch.into_iter().zip(results) {
                match result {
                    Ok(produced) => {
                        if let (Some(cache), Some(key)) = (&self.cache, key) {
                            cache.insert(&key, &produced);
                        }
                        self.emit(WorkflowEvent::NodeCompleted {
                            node_id: node.id.clone(),
                            run_id: run_id.clone(),
                            cached: false,
                        });
                        statuses.insert(node.id.clone(), NodeStatus::Executed);
                        outputs.insert(node.id.clone(), produced);
                    }
                    Err(failure) => {
                        self.record_failure(&run_id, node, &failure);
                        statuses.insert(node.id.clone(), NodeStatus::Failed { failure });
                    }
                }
            }

            for (id, status) in &statuses {
                if !status.is_terminal() {
                    continue;
                }
                if let Some(tracker) = joins.get_mut(id) {
                    tracker.complete(status.succeeded());
                }
                for tracker in joins.values_mut() {
                    tracker.settle(id, status.succeeded());
                }
            }
        }

        let report = RunReport {
            run_id: run_id.clone(),
            graph,
            statuses,
            outputs,
        };
        let summary = report.summary();
        log::info!(
            "Run {} finished: {} executed, {} cached, {} failed, {} blocked",
            run_id,
            summary.executed,
            summary.cache_hits,
            summary.failed,
            summary.blocked
        );
        self.emit(WorkflowEvent::RunCompleted {
            workflow_id: report.graph.name().to_string(),
            run_id,
            succeeded: summary.succeeded(),
            failed: summary.failed,
            blocked: summary.blocked,
        });
        report
    }

    fn record_failure(&self, run_id: &str, node: &ExecNode, failure: &ExecutionFailure) {
        log::error!("Node '{}' failed: {}", node.id, failure);
        self.emit(WorkflowEvent::NodeFailed {
            node_id: node.id.clone(),
            run_id: run_id.to_string(),
            error: failure.to_string(),
        });
    }

    fn prepare(
        &self,
        node: &ExecNode,
        statuses: &BTreeMap<NodeId, NodeStatus>,
        outputs: &BTreeMap<NodeId, ValueMap>,
    ) -> Prepared {
        let executor = effective_executor(node);
        let inputs = match self.resolve_inputs(node, executor.as_ref(), statuses, outputs) {
            Ok(inputs) => inputs,
            Err(prepared) => return prepared,
        };

        let key = match &self.cache {
            Some(_) => match cache_key(&node.id, executor.kind(), executor.version(), &inputs) {
                Ok(key) => Some(key),
                Err(e) => {
                    log::warn!("Could not compute cache key for '{}': {}", node.id, e);
                    None
                }
            },
            None => None,
        };

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(cached) = cache.lookup(key) {
                return Prepared::Cached(cached);
            }
        }

        Prepared::Submit {
            job: Job {
                node_id: node.id.clone(),
                executor,
                inputs,
            },
            cache_key: key,
        }
    }

    /// Bind every input field of a node from its sources, defaults, and the
    /// declared field types.
    fn resolve_inputs(
        &self,
        node: &ExecNode,
        executor: &dyn NodeExecutor,
        statuses: &BTreeMap<NodeId, NodeStatus>,
        outputs: &BTreeMap<NodeId, ValueMap>,
    ) -> std::result::Result<ValueMap, Prepared> {
        let unique = match &node.kind {
            NodeKind::Join(spec) => spec.unique,
            _ => false,
        };

        let mut resolved = ValueMap::new();
        for field in &executor.field_spec().inputs {
            let bound = match node.bindings.get(&field.name) {
                None => None,
                Some(InputBinding::Single { source }) => match source {
                    InputSource::Value { value } => Some(value.clone()),
                    InputSource::Output { node: src, field: src_field } => {
                        match statuses.get(src) {
                            Some(status) if status.succeeded() => outputs
                                .get(src)
                                .and_then(|out| out.get(src_field))
                                .cloned(),
                            Some(status) if field.required => {
                                return Err(Prepared::Blocked(blocking_cause(src, status)));
                            }
                            _ => None,
                        }
                    }
                },
                Some(InputBinding::Aggregate { sources }) => {
                    let branches = sources
                        .iter()
                        .map(|source| branch_value(source, statuses, outputs))
                        .collect();
                    match collect_branches(&field.name, branches, unique, self.join_policy) {
                        Ok(list) => Some(list),
                        Err(failure) => return Err(Prepared::Failed(failure)),
                    }
                }
            };

            match bound.or_else(|| field.default.clone()) {
                Some(value) => match field.field_type.coerce(value) {
                    Some(value) => {
                        resolved.insert(field.name.clone(), value);
                    }
                    None => {
                        return Err(Prepared::Failed(ExecutionFailure::InvalidValue {
                            field: field.name.clone(),
                            expected: field.field_type.to_string(),
                        }))
                    }
                },
                None if field.required => {
                    return Err(Prepared::Failed(ExecutionFailure::MissingInput {
                        field: field.name.clone(),
                    }))
                }
                None => {}
            }
        }
        Ok(resolved)
    }
}

/// Executor that actually runs for a node, wrapping map nodes in their fan-out
fn effective_executor(node: &ExecNode) -> Arc<dyn NodeExecutor> {
    match &node.kind {
        NodeKind::Map { iterfields } => Arc::new(MapExecutor::new(
            node.executor().clone(),
            iterfields.clone(),
        )),
        _ => node.executor().clone(),
    }
}

/// Upstream instances feeding a node's aggregated fields
fn aggregate_sources(node: &ExecNode) -> Vec<NodeId> {
    node.bindings
        .values()
        .filter(|b| matches!(b, InputBinding::Aggregate { .. }))
        .flat_map(|b| b.sources())
        .filter_map(|source| match source {
            InputSource::Output { node, .. } => Some(node.clone()),
            InputSource::Value { .. } => None,
        })
        .collect()
}

/// The originally failed node behind a failed or blocked source
fn blocking_cause(src: &str, status: &NodeStatus) -> NodeId {
    match status {
        NodeStatus::Blocked { cause } => cause.clone(),
        _ => src.to_string(),
    }
}

fn branch_value(
    source: &InputSource,
    statuses: &BTreeMap<NodeId, NodeStatus>,
    outputs: &BTreeMap<NodeId, ValueMap>,
) -> Branch {
    match source {
        InputSource::Value { value } => Branch::Value(value.clone()),
        InputSource::Output { node, field } => {
            let delivered = statuses
                .get(node)
                .filter(|s| s.succeeded())
                .and_then(|_| outputs.get(node))
                .and_then(|out| out.get(field));
            match delivered {
                Some(value) => Branch::Value(value.clone()),
                None => Branch::Missing(node.clone()),
            }
        }
    }
}
