//! Map node fan-out
//!
//! [`MapExecutor`] wraps an element-wise executor. It splits the list inputs
//! on the iterfields into one sub-execution per element, runs them
//! concurrently, and gathers every output field back into a list. To the
//! graph it is a single node.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::error::ExecutionFailure;
use crate::executor::NodeExecutor;
use crate::types::{Field, FieldSpec, FieldType, ValueMap};

pub struct MapExecutor {
    inner: Arc<dyn NodeExecutor>,
    iterfields: Vec<String>,
    spec: FieldSpec,
}

impl MapExecutor {
    pub fn new(inner: Arc<dyn NodeExecutor>, iterfields: Vec<String>) -> Self {
        let inner_spec = inner.field_spec();
        let lift = |field: &Field| Field {
            field_type: FieldType::list(field.field_type.clone()),
            ..field.clone()
        };
        let inputs = inner_spec
            .inputs
            .iter()
            .map(|f| {
                if iterfields.contains(&f.name) {
                    lift(f)
                } else {
                    f.clone()
                }
            })
            .collect();
        let outputs = inner_spec.outputs.iter().map(lift).collect();

        Self {
            inner,
            iterfields,
            spec: FieldSpec::new(inputs, outputs),
        }
    }

    /// Split the inputs into one map per element
    fn split(&self, inputs: &ValueMap) -> std::result::Result<Vec<ValueMap>, ExecutionFailure> {
        let mut lists = Vec::with_capacity(self.iterfields.len());
        for field in &self.iterfields {
            match inputs.get(field) {
                Some(serde_json::Value::Array(items)) => lists.push((field, items)),
                Some(_) => {
                    return Err(ExecutionFailure::InvalidValue {
                        field: field.clone(),
                        expected: "list".to_string(),
                    })
                }
                None => return Err(ExecutionFailure::MissingInput { field: field.clone() }),
            }
        }

        let lengths: Vec<usize> = lists.iter().map(|(_, items)| items.len()).collect();
        if lengths.windows(2).any(|w| w[0] != w[1]) {
            return Err(ExecutionFailure::MapLengthMismatch { lengths });
        }
        let count = lengths.first().copied().unwrap_or(0);

        let shared: ValueMap = inputs
            .iter()
            .filter(|(name, _)| !self.iterfields.contains(name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok((0..count)
            .map(|i| {
                let mut element = shared.clone();
                for (field, items) in &lists {
                    element.insert((*field).clone(), items[i].clone());
                }
                element
            })
            .collect())
    }
}

#[async_trait]
impl NodeExecutor for MapExecutor {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn field_spec(&self) -> &FieldSpec {
        &self.spec
    }

    fn version(&self) -> &str {
        self.inner.version()
    }

    async fn execute(&self, inputs: &ValueMap) -> std::result::Result<ValueMap, ExecutionFailure> {
        let elements = self.split(inputs)?;
        log::debug!(
            "Map node '{}' fanning out {} element(s)",
            self.inner.kind(),
            elements.len()
        );

        let results = join_all(elements.iter().map(|element| self.inner.execute(element))).await;

        let mut outputs = ValueMap::new();
        let mut first_failure = None;
        for field in &self.inner.field_spec().outputs {
            let gathered: Vec<serde_json::Value> = results
                .iter()
                .map(|r| match r {
                    Ok(out) => out.get(&field.name).cloned().unwrap_or(serde_json::Value::Null),
                    Err(_) => serde_json::Value::Null,
                })
                .collect();
            outputs.insert(field.name.clone(), serde_json::Value::Array(gathered));
        }
        for (index, result) in results.iter().enumerate() {
            if let Err(failure) = result {
                first_failure = Some((index, failure));
                break;
            }
        }

        match first_failure {
            Some((index, failure)) => Err(ExecutionFailure::partial(
                format!("element {} failed: {}", index, failure),
                outputs,
            )),
            None => Ok(outputs),
        }
    }
}
