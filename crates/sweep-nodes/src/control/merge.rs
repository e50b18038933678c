//! Merge Node
//!
//! Collects `in1..inN` into one list. Unset inputs are skipped. With
//! `ravel`, list inputs are flattened into the result instead of nested.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sweep_engine::{ExecutionFailure, Field, FieldSpec, FieldType, NodeExecutor, ValueMap};

fn default_numinputs() -> usize {
    2
}

/// Configuration for the merge node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Number of `inN` input fields
    #[serde(default = "default_numinputs")]
    pub numinputs: usize,
    /// Flatten list inputs into the output
    #[serde(default)]
    pub ravel: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            numinputs: default_numinputs(),
            ravel: false,
        }
    }
}

pub struct MergeNode {
    config: MergeConfig,
    spec: FieldSpec,
}

impl MergeNode {
    /// Field ID for the merged output
    pub const PORT_OUT: &'static str = "out";

    pub fn new(config: MergeConfig) -> Self {
        let inputs = (1..=config.numinputs)
            .map(|i| Field::optional(Self::input_port(i), FieldType::Any))
            .collect();
        let outputs = vec![Field::optional(
            Self::PORT_OUT,
            FieldType::list(FieldType::Any),
        )];
        Self {
            config,
            spec: FieldSpec::new(inputs, outputs),
        }
    }

    /// Name of the i-th input field (1-based)
    pub fn input_port(i: usize) -> String {
        format!("in{}", i)
    }

    pub fn shared(self) -> Arc<dyn NodeExecutor> {
        Arc::new(self)
    }
}

#[async_trait]
impl NodeExecutor for MergeNode {
    fn kind(&self) -> &str {
        "merge"
    }

    fn field_spec(&self) -> &FieldSpec {
        &self.spec
    }

    async fn execute(&self, inputs: &ValueMap) -> Result<ValueMap, ExecutionFailure> {
        let mut merged = Vec::new();
        for i in 1..=self.config.numinputs {
            match inputs.get(&Self::input_port(i)) {
                None | Some(serde_json::Value::Null) => {}
                Some(serde_json::Value::Array(items)) if self.config.ravel => {
                    merged.extend(items.iter().cloned())
                }
                Some(value) => merged.push(value.clone()),
            }
        }
        log::debug!("Merged {} value(s)", merged.len());
        Ok(ValueMap::from([(
            Self::PORT_OUT.to_string(),
            serde_json::Value::Array(merged),
        )]))
    }
}

fn build(params: &serde_json::Value) -> Result<Arc<dyn NodeExecutor>, String> {
    let config: MergeConfig = if params.is_null() {
        MergeConfig::default()
    } else {
        serde_json::from_value(params.clone()).map_err(|e| e.to_string())?
    };
    if config.numinputs == 0 {
        return Err("merge needs at least one input".to_string());
    }
    Ok(MergeNode::new(config).shared())
}

inventory::submit!(sweep_engine::NodeKindFn {
    kind: "merge",
    build,
});
