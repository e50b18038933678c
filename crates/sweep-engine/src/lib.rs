//! Sweep Engine - graph expansion and execution for parameter-sweep pipelines
//!
//! A workflow is a template graph of nodes connected field to field. Nodes
//! may declare iterables (parameter sweeps); the engine expands them into a
//! concrete execution graph, gathers branches back at join nodes, and runs
//! everything in dependency order with content-hash result caching.
//!
//! # Architecture
//!
//! - `ConnectionGraph`: the template, validated on every construction call
//! - `expand`: pure rewrite from template to `ExecutionGraph`
//! - `Scheduler`: batch run loop over ready nodes with failure propagation
//! - `ExecutionBackend`: where ready nodes actually run (inline or on the tokio pool)
//! - `ResultCache`: BLAKE3-keyed outputs over a pluggable `CacheStore`
//! - `EventSink`: progress events, independent of transport
//!
//! # Example
//!
//! ```ignore
//! use sweep_engine::{JoinSpec, Node, Workflow};
//!
//! let mut workflow = Workflow::new("sweep");
//! workflow.add_node(Node::new("inc", increment).with_iterable("input1", vec![json!(1), json!(2)]))?;
//! workflow.add_node(Node::join("total", sum, JoinSpec::new("inc").field("input1")))?;
//! workflow.connect("inc", "output1", "total", "input1")?;
//!
//! let report = workflow.run().await?;
//! assert_eq!(report.output("total", "output1"), Some(&json!(5)));
//! ```

pub mod backend;
pub mod builder;
pub mod cache;
pub mod config;
pub mod definition;
pub mod error;
pub mod events;
pub mod executor;
pub mod expansion;
pub mod graph;
pub mod join;
pub mod map_node;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod types;
pub mod validation;
pub mod workflow;

// Re-export key types
pub use backend::{ExecutionBackend, InlineBackend, Job, NodeOutcome, ParallelBackend};
pub use builder::WorkflowBuilder;
pub use cache::{cache_key, CacheStore, DirectoryCache, MemoryCache, ResultCache};
pub use config::{EmptyJoinPolicy, EngineConfig, JoinFailurePolicy};
pub use definition::{EdgeDef, NodeDef, WorkflowDef};
pub use error::{ConstructionError, EngineError, ExecutionFailure, ExpansionError, Result};
pub use events::{EventError, EventSink, NullEventSink, VecEventSink, WorkflowEvent};
pub use executor::{FnExecutor, NodeExecutor, PassthroughExecutor};
pub use expansion::{expand, ExecNode, ExecutionGraph, InputBinding, InputSource};
pub use graph::{ConnectionGraph, Edge};
pub use join::{JoinPolicy, JoinState};
pub use map_node::MapExecutor;
pub use node::{Iterable, JoinSpec, Node, NodeKind};
pub use registry::{NodeKindFn, NodeRegistry};
pub use scheduler::{NodeStatus, RunReport, RunSummary, Scheduler};
pub use types::{Field, FieldSpec, FieldType, NodeId, ValueMap};
pub use workflow::Workflow;
