//! Identity Node
//!
//! Forwards every declared field unchanged. Two uses:
//! - as an iterable holder (`inputspec` style), which expansion removes
//! - as a join node that only gathers branch values into lists

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sweep_engine::{Field, FieldSpec, FieldType, NodeExecutor, PassthroughExecutor};

/// Parameters for the `identity` kind
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Field names, used for both inputs and outputs
    pub fields: Vec<String>,
}

/// Identity executor over the given fields
pub fn identity(fields: &[&str]) -> Arc<dyn NodeExecutor> {
    from_config(&IdentityConfig {
        fields: fields.iter().map(|f| f.to_string()).collect(),
    })
}

fn from_config(config: &IdentityConfig) -> Arc<dyn NodeExecutor> {
    let fields: Vec<Field> = config
        .fields
        .iter()
        .map(|name| Field::optional(name.clone(), FieldType::Any))
        .collect();
    Arc::new(PassthroughExecutor::new(FieldSpec::new(fields.clone(), fields)))
}

fn build(params: &serde_json::Value) -> Result<Arc<dyn NodeExecutor>, String> {
    let config: IdentityConfig =
        serde_json::from_value(params.clone()).map_err(|e| e.to_string())?;
    if config.fields.is_empty() {
        return Err("identity needs at least one field".to_string());
    }
    Ok(from_config(&config))
}

inventory::submit!(sweep_engine::NodeKindFn {
    kind: "identity",
    build,
});
