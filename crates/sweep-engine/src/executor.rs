//! The capability interface every node kind implements
//!
//! The engine only needs three things from a wrapped computation: its typed
//! [`FieldSpec`], a way to run it on concrete inputs, and a version marker
//! that is folded into cache keys. Executors must be deterministic for a given
//! set of inputs, otherwise cache reuse is unsound.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExecutionFailure;
use crate::types::{FieldSpec, ValueMap};

/// A wrapped computation
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Kind name (e.g., "identity", "merge")
    fn kind(&self) -> &str;

    /// Typed input/output fields
    fn field_spec(&self) -> &FieldSpec;

    /// Version marker folded into cache keys. Bump it when behavior changes.
    fn version(&self) -> &str {
        "1"
    }

    /// Pass-through executors only emit their inputs unchanged. When such a
    /// node merely holds iterables, expansion removes it from the graph.
    fn is_passthrough(&self) -> bool {
        false
    }

    /// Run the computation on fully resolved inputs
    async fn execute(&self, inputs: &ValueMap) -> std::result::Result<ValueMap, ExecutionFailure>;
}

type SyncCallback =
    dyn Fn(&ValueMap) -> std::result::Result<ValueMap, ExecutionFailure> + Send + Sync;

/// Synchronous closure-backed executor
///
/// Wraps a plain function as a node kind. Handy for small glue steps and
/// for tests.
pub struct FnExecutor {
    kind: String,
    version: String,
    spec: FieldSpec,
    callback: Box<SyncCallback>,
}

impl FnExecutor {
    pub fn new(
        kind: impl Into<String>,
        spec: FieldSpec,
        callback: impl Fn(&ValueMap) -> std::result::Result<ValueMap, ExecutionFailure>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            kind: kind.into(),
            version: "1".to_string(),
            spec,
            callback: Box::new(callback),
        }
    }

    /// Override the version marker
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Wrap into a shareable executor handle
    pub fn shared(self) -> Arc<dyn NodeExecutor> {
        Arc::new(self)
    }
}

#[async_trait]
impl NodeExecutor for FnExecutor {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn field_spec(&self) -> &FieldSpec {
        &self.spec
    }

    fn version(&self) -> &str {
        &self.version
    }

    async fn execute(&self, inputs: &ValueMap) -> std::result::Result<ValueMap, ExecutionFailure> {
        (self.callback)(inputs)
    }
}

/// Executor that forwards every input unchanged.
///
/// Inputs and outputs share the same field names. Used for iterable holders
/// and for joins that only gather values.
pub struct PassthroughExecutor {
    spec: FieldSpec,
}

impl PassthroughExecutor {
    pub fn new(spec: FieldSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl NodeExecutor for PassthroughExecutor {
    fn kind(&self) -> &str {
        "passthrough"
    }

    fn field_spec(&self) -> &FieldSpec {
        &self.spec
    }

    fn is_passthrough(&self) -> bool {
        true
    }

    async fn execute(&self, inputs: &ValueMap) -> std::result::Result<ValueMap, ExecutionFailure> {
        Ok(self
            .spec
            .outputs
            .iter()
            .filter_map(|f| inputs.get(&f.name).map(|v| (f.name.clone(), v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FieldType};
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_executor() {
        let spec = FieldSpec::new(
            vec![Field::required("x", FieldType::Int)],
            vec![Field::optional("y", FieldType::Int)],
        );
        let executor = FnExecutor::new("double", spec, |inputs| {
            let x = inputs["x"].as_i64().unwrap_or_default();
            Ok(ValueMap::from([("y".to_string(), json!(x * 2))]))
        })
        .with_version("2");

        let out = executor
            .execute(&ValueMap::from([("x".to_string(), json!(21))]))
            .await
            .unwrap();
        assert_eq!(out["y"], json!(42));
        assert_eq!(executor.kind(), "double");
        assert_eq!(executor.version(), "2");
        assert!(!executor.is_passthrough());
    }

    #[tokio::test]
    async fn test_passthrough_forwards_declared_fields() {
        let spec = FieldSpec::new(
            vec![Field::optional("a", FieldType::Any)],
            vec![Field::optional("a", FieldType::Any)],
        );
        let executor = PassthroughExecutor::new(spec);
        let inputs = ValueMap::from([
            ("a".to_string(), json!([1, 2])),
            ("extra".to_string(), json!(true)),
        ]);

        let out = executor.execute(&inputs).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["a"], json!([1, 2]));
        assert!(executor.is_passthrough());
    }
}
