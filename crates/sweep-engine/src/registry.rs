//! Node kind registry
//!
//! Maps kind names (e.g. `"identity"`) to factories that build an executor
//! from JSON parameters. Workflow definitions resolve their nodes through it.
//!
//! Node crates register their kinds at link time:
//!
//! ```ignore
//! inventory::submit!(sweep_engine::NodeKindFn {
//!     kind: "identity",
//!     build: identity::build,
//! });
//! ```
//!
//! and [`NodeRegistry::with_builtins`] collects every submission.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::executor::NodeExecutor;

/// Builds an executor from its JSON parameters
pub type BuildFn = fn(&serde_json::Value) -> std::result::Result<Arc<dyn NodeExecutor>, String>;

/// Link-time registration of a node kind
pub struct NodeKindFn {
    pub kind: &'static str,
    pub build: BuildFn,
}

inventory::collect!(NodeKindFn);

type Factory =
    dyn Fn(&serde_json::Value) -> std::result::Result<Arc<dyn NodeExecutor>, String> + Send + Sync;

/// Registry of node kinds
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<Factory>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with every kind submitted through [`NodeKindFn`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for entry in inventory::iter::<NodeKindFn> {
            let build = entry.build;
            registry.register(entry.kind, move |params| build(params));
        }
        log::debug!("Registered {} built-in node kinds", registry.factories.len());
        registry
    }

    /// Register (or replace) a node kind
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> std::result::Result<Arc<dyn NodeExecutor>, String>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Register a fixed executor that ignores parameters
    pub fn register_executor(&mut self, kind: impl Into<String>, executor: Arc<dyn NodeExecutor>) {
        self.register(kind, move |_| Ok(executor.clone()));
    }

    /// Build an executor for a kind
    pub fn build(&self, kind: &str, params: &serde_json::Value) -> Result<Arc<dyn NodeExecutor>> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| EngineError::UnknownKind(kind.to_string()))?;
        factory(params).map_err(|message| EngineError::InvalidParams {
            kind: kind.to_string(),
            message,
        })
    }

    pub fn has_kind(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Merge another registry into this one. Entries from `other` win.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.factories.extend(other.factories);
    }
}
