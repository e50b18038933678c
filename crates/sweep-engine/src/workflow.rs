//! Workflow facade
//!
//! [`Workflow`] bundles a template graph with the run-time pieces a run needs
//! (configuration, cache, backend, event sink). Each [`Workflow::run`] expands
//! the template afresh and executes the result.

use std::sync::Arc;

use crate::backend::{ExecutionBackend, InlineBackend, ParallelBackend};
use crate::cache::{CacheStore, DirectoryCache, MemoryCache, ResultCache};
use crate::config::EngineConfig;
use crate::definition::WorkflowDef;
use crate::error::Result;
use crate::events::{EventSink, NullEventSink};
use crate::expansion::{expand, ExecutionGraph};
use crate::graph::ConnectionGraph;
use crate::join::JoinPolicy;
use crate::node::{Iterable, Node};
use crate::registry::NodeRegistry;
use crate::scheduler::{RunReport, Scheduler};
use crate::types::NodeId;
use crate::validation::unbound_required_inputs;

pub struct Workflow {
    graph: ConnectionGraph,
    config: EngineConfig,
    cache: Option<ResultCache>,
    backend: Arc<dyn ExecutionBackend>,
    /// Set by [`Workflow::parallel`], so a later config can resize the pool
    parallel: bool,
    events: Arc<dyn EventSink>,
}

impl Workflow {
    /// Create an empty workflow with the default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_graph(ConnectionGraph::new(name))
    }

    /// Wrap an existing template graph
    pub fn from_graph(graph: ConnectionGraph) -> Self {
        Self {
            graph,
            config: EngineConfig::default(),
            cache: Some(ResultCache::new(Arc::new(MemoryCache::new()))),
            backend: Arc::new(InlineBackend),
            parallel: false,
            events: Arc::new(NullEventSink),
        }
    }

    /// Build the graph from a definition, resolving kinds through `registry`
    pub fn from_definition(def: &WorkflowDef, registry: &NodeRegistry) -> Result<Self> {
        Ok(Self::from_graph(def.build(registry)?))
    }

    /// Apply a configuration, opening the cache it asks for
    pub fn with_config(mut self, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        self.cache = match (&config.cache_dir, config.use_cache) {
            (_, false) => None,
            (Some(dir), true) => Some(ResultCache::new(Arc::new(DirectoryCache::open(dir)?))),
            (None, true) => Some(ResultCache::new(Arc::new(MemoryCache::new()))),
        };
        if self.parallel {
            self.backend = Arc::new(ParallelBackend::new(config.max_parallel));
        }
        self.config = config;
        Ok(self)
    }

    /// Use a caller-provided cache store
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(ResultCache::new(store));
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = backend;
        self.parallel = false;
        self
    }

    /// Run independent nodes on the tokio pool, up to `maxParallel` at once.
    ///
    /// The limit follows the configuration, whether it is applied before or
    /// after this call.
    pub fn parallel(mut self) -> Self {
        self.backend = Arc::new(ParallelBackend::new(self.config.max_parallel));
        self.parallel = true;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        self.graph.add_node(node)
    }

    pub fn connect(
        &mut self,
        source: &str,
        source_field: &str,
        dest: &str,
        dest_field: &str,
    ) -> Result<()> {
        self.graph.connect(source, source_field, dest, dest_field)
    }

    pub fn set_iterables(&mut self, node_id: &str, iterables: Vec<Iterable>) -> Result<()> {
        self.graph.set_iterables(node_id, iterables)
    }

    pub fn add_iterable(
        &mut self,
        node_id: &str,
        field: impl Into<String>,
        values: Vec<serde_json::Value>,
    ) -> Result<()> {
        self.graph.add_iterable(node_id, field, values)
    }

    pub fn set_input(&mut self, node_id: &str, field: &str, value: serde_json::Value) -> Result<()> {
        self.graph.set_input(node_id, field, value)
    }

    /// Expand the template without running it
    pub fn expand(&self) -> Result<ExecutionGraph> {
        expand(&self.graph)
    }

    /// Expand and execute the workflow.
    ///
    /// Construction and expansion problems are returned as errors; node
    /// failures are recorded in the report.
    pub async fn run(&self) -> Result<RunReport> {
        for (node, field) in unbound_required_inputs(&self.graph) {
            log::warn!("Node '{}' has nothing bound to required input '{}'", node, field);
        }
        let expanded = self.expand()?;
        let mut scheduler = Scheduler::new(self.backend.clone())
            .with_events(self.events.clone())
            .with_join_policy(JoinPolicy {
                on_failure: self.config.join_failure,
                on_empty: self.config.empty_join,
            });
        if let Some(cache) = &self.cache {
            scheduler = scheduler.with_cache(cache.clone());
        }
        Ok(scheduler.run(expanded).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmptyJoinPolicy;
    use crate::error::ExecutionFailure;
    use crate::executor::{FnExecutor, NodeExecutor, PassthroughExecutor};
    use crate::node::JoinSpec;
    use crate::scheduler::NodeStatus;
    use crate::types::{Field, FieldSpec, FieldType, ValueMap};
    use serde_json::json;

    fn holder() -> Arc<dyn NodeExecutor> {
        let fields = vec![Field::optional("n", FieldType::Int)];
        Arc::new(PassthroughExecutor::new(FieldSpec::new(fields.clone(), fields)))
    }

    fn count() -> Arc<dyn NodeExecutor> {
        let spec = FieldSpec::new(
            vec![Field::required("values", FieldType::list(FieldType::Int))],
            vec![Field::optional("count", FieldType::Int)],
        );
        FnExecutor::new("count", spec, |inputs| {
            let n = inputs["values"].as_array().map(Vec::len).unwrap_or_default();
            Ok(ValueMap::from([("count".to_string(), json!(n))]))
        })
        .shared()
    }

    fn empty_join_workflow() -> Workflow {
        let mut workflow = Workflow::new("empty");
        workflow
            .add_node(Node::new("inputspec", holder()).with_iterable("n", vec![]))
            .unwrap();
        workflow
            .add_node(Node::join("count", count(), JoinSpec::new("inputspec")))
            .unwrap();
        workflow.connect("inputspec", "n", "count", "values").unwrap();
        workflow
    }

    #[tokio::test]
    async fn test_empty_join_fails_by_default() {
        let report = empty_join_workflow().run().await.unwrap();
        assert!(matches!(
            report.status("count"),
            Some(NodeStatus::Failed {
                failure: ExecutionFailure::JoinIncomplete { .. }
            })
        ));
    }

    #[tokio::test]
    async fn test_empty_join_can_run_empty() {
        let config = EngineConfig {
            empty_join: EmptyJoinPolicy::RunEmpty,
            ..Default::default()
        };
        let workflow = empty_join_workflow().with_config(config).unwrap();
        let report = workflow.run().await.unwrap();
        assert_eq!(report.output("count", "count"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_iterables_can_change_between_runs() {
        let mut workflow = empty_join_workflow();
        workflow
            .set_iterables("inputspec", vec![Iterable::new("n", vec![json!(5), json!(6)])])
            .unwrap();
        let report = workflow.run().await.unwrap();
        assert_eq!(report.output("count", "count"), Some(&json!(2)));
        assert_eq!(report.graph.len(), 1);
    }

    #[tokio::test]
    async fn test_directory_cache_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let mut workflow = empty_join_workflow().with_config(config.clone()).unwrap();
        workflow
            .set_iterables("inputspec", vec![Iterable::new("n", vec![json!(1)])])
            .unwrap();

        let first = workflow.run().await.unwrap();
        assert_eq!(first.summary().executed, 1);

        let reopened = Workflow::from_graph(workflow.graph().clone())
            .with_config(config)
            .unwrap();
        let second = reopened.run().await.unwrap();
        assert_eq!(second.summary().cache_hits, 1);
        assert_eq!(second.output("count", "count"), Some(&json!(1)));
    }

    #[test]
    fn test_parallel_limit_follows_config_in_any_order() {
        let config = EngineConfig {
            max_parallel: 2,
            ..Default::default()
        };

        let before = Workflow::new("a").with_config(config.clone()).unwrap().parallel();
        assert_eq!(before.backend().concurrency(), Some(2));

        let after = Workflow::new("b").parallel().with_config(config.clone()).unwrap();
        assert_eq!(after.backend().concurrency(), Some(2));

        let inline = Workflow::new("c").with_config(config).unwrap();
        assert_eq!(inline.backend().name(), "inline");
        assert_eq!(inline.backend().concurrency(), None);
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let config = EngineConfig {
            use_cache: false,
            ..Default::default()
        };
        let mut workflow = empty_join_workflow().with_config(config).unwrap();
        workflow
            .set_iterables("inputspec", vec![Iterable::new("n", vec![json!(1)])])
            .unwrap();

        workflow.run().await.unwrap();
        let second = workflow.run().await.unwrap();
        assert_eq!(second.summary().executed, 1);
        assert_eq!(second.summary().cache_hits, 0);
    }
}
