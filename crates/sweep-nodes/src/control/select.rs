//! Select Node
//!
//! Picks elements of `inlist` by position. A single index yields the element
//! itself; a list of indices yields a list.

use std::sync::Arc;

use async_trait::async_trait;
use sweep_engine::{ExecutionFailure, Field, FieldSpec, FieldType, NodeExecutor, ValueMap};

pub struct SelectNode {
    spec: FieldSpec,
}

impl SelectNode {
    pub const PORT_INLIST: &'static str = "inlist";
    pub const PORT_INDEX: &'static str = "index";
    pub const PORT_OUT: &'static str = "out";

    pub fn new() -> Self {
        Self {
            spec: FieldSpec::new(
                vec![
                    Field::required(Self::PORT_INLIST, FieldType::list(FieldType::Any)),
                    Field::required(Self::PORT_INDEX, FieldType::Any),
                ],
                vec![Field::optional(Self::PORT_OUT, FieldType::Any)],
            ),
        }
    }

    pub fn shared(self) -> Arc<dyn NodeExecutor> {
        Arc::new(self)
    }
}

impl Default for SelectNode {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid_index(expected: impl Into<String>) -> ExecutionFailure {
    ExecutionFailure::InvalidValue {
        field: SelectNode::PORT_INDEX.to_string(),
        expected: expected.into(),
    }
}

#[async_trait]
impl NodeExecutor for SelectNode {
    fn kind(&self) -> &str {
        "select"
    }

    fn field_spec(&self) -> &FieldSpec {
        &self.spec
    }

    async fn execute(&self, inputs: &ValueMap) -> Result<ValueMap, ExecutionFailure> {
        let list = inputs
            .get(Self::PORT_INLIST)
            .and_then(|v| v.as_array())
            .ok_or_else(|| ExecutionFailure::MissingInput {
                field: Self::PORT_INLIST.to_string(),
            })?;
        let index = inputs
            .get(Self::PORT_INDEX)
            .ok_or_else(|| ExecutionFailure::MissingInput {
                field: Self::PORT_INDEX.to_string(),
            })?;

        let pick = |value: &serde_json::Value| -> Result<serde_json::Value, ExecutionFailure> {
            let i = value
                .as_u64()
                .ok_or_else(|| invalid_index("non-negative integer"))? as usize;
            list.get(i)
                .cloned()
                .ok_or_else(|| invalid_index(format!("index below {}", list.len())))
        };

        let out = match index {
            serde_json::Value::Array(indices) => serde_json::Value::Array(
                indices.iter().map(pick).collect::<Result<Vec<_>, _>>()?,
            ),
            single => pick(single)?,
        };
        Ok(ValueMap::from([(Self::PORT_OUT.to_string(), out)]))
    }
}

fn build(_params: &serde_json::Value) -> Result<Arc<dyn NodeExecutor>, String> {
    Ok(SelectNode::new().shared())
}

inventory::submit!(sweep_engine::NodeKindFn {
    kind: "select",
    build,
});
