//! Execution backends
//!
//! The scheduler hands every ready node to an [`ExecutionBackend`] as a
//! self-contained [`Job`]. Backends decide where the work runs; they never see
//! the graph.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::error::ExecutionFailure;
use crate::executor::NodeExecutor;
use crate::types::{NodeId, ValueMap};

/// Result of running one node
pub type NodeOutcome = std::result::Result<ValueMap, ExecutionFailure>;

/// A node instance ready to run, with fully resolved inputs
#[derive(Clone)]
pub struct Job {
    pub node_id: NodeId,
    pub executor: Arc<dyn NodeExecutor>,
    pub inputs: ValueMap,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("node_id", &self.node_id)
            .field("kind", &self.executor.kind())
            .field("inputs", &self.inputs)
            .finish()
    }
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Most jobs this backend runs at once, if it imposes a limit
    fn concurrency(&self) -> Option<usize> {
        None
    }

    /// Run a job to completion
    async fn submit(&self, job: Job) -> NodeOutcome;
}

/// Runs each job directly on the calling task
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineBackend;

#[async_trait]
impl ExecutionBackend for InlineBackend {
    fn name(&self) -> &str {
        "inline"
    }

    async fn submit(&self, job: Job) -> NodeOutcome {
        job.executor.execute(&job.inputs).await
    }
}

/// Spawns each job onto the tokio runtime, bounded by a worker limit
pub struct ParallelBackend {
    permits: Arc<Semaphore>,
    max_parallel: usize,
}

impl ParallelBackend {
    pub fn new(max_parallel: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}

#[async_trait]
impl ExecutionBackend for ParallelBackend {
    fn name(&self) -> &str {
        "parallel"
    }

    fn concurrency(&self) -> Option<usize> {
        Some(self.max_parallel)
    }

    async fn submit(&self, job: Job) -> NodeOutcome {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ExecutionFailure::Backend(e.to_string()))?;

        let node_id = job.node_id.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            job.executor.execute(&job.inputs).await
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => {
                log::error!("Worker for node '{}' panicked", node_id);
                Err(ExecutionFailure::Backend(format!(
                    "worker for node '{}' panicked",
                    node_id
                )))
            }
            Err(e) => Err(ExecutionFailure::Backend(format!(
                "worker for node '{}' was cancelled: {}",
                node_id, e
            ))),
        }
    }
}
