//! Core types for field specifications
//!
//! A node describes its inputs and outputs as typed [`Field`]s. Values moving
//! along edges are plain `serde_json::Value`s; field types decide which
//! connections are legal and how a bound value is checked before execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Concrete values keyed by field name.
///
/// Ordered so that hashing a node's resolved inputs is deterministic.
pub type ValueMap = BTreeMap<String, serde_json::Value>;

/// The data type of a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "item", rename_all = "snake_case")]
pub enum FieldType {
    /// Accepts any value
    Any,
    Bool,
    Int,
    Float,
    String,
    /// Ordered sequence
    List(Box<FieldType>),
    /// Sequence with duplicates removed, first occurrence kept
    Set(Box<FieldType>),
}

impl FieldType {
    pub fn list(item: FieldType) -> Self {
        Self::List(Box::new(item))
    }

    pub fn set(item: FieldType) -> Self {
        Self::Set(Box::new(item))
    }

    /// Element type for collection types
    pub fn item(&self) -> Option<&FieldType> {
        match self {
            Self::List(item) | Self::Set(item) => Some(item),
            _ => None,
        }
    }

    /// Check if a value of this type can flow into a field of `dest` type
    pub fn is_compatible_with(&self, dest: &FieldType) -> bool {
        match (self, dest) {
            (Self::Any, _) | (_, Self::Any) => true,
            // Ints widen to floats
            (Self::Int, Self::Float) => true,
            (Self::List(a) | Self::Set(a), Self::List(b) | Self::Set(b)) => a.is_compatible_with(b),
            _ => self == dest,
        }
    }

    /// Check a concrete value against this type and normalize it.
    ///
    /// Set-typed values are deduplicated keeping first occurrence. Returns
    /// `None` if the value does not fit.
    pub fn coerce(&self, value: serde_json::Value) -> Option<serde_json::Value> {
        use serde_json::Value;

        match (self, value) {
            (Self::Any, v) => Some(v),
            (Self::Bool, v @ Value::Bool(_)) => Some(v),
            (Self::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(Value::Number(n)),
            (Self::Float, Value::Number(n)) => Some(Value::Number(n)),
            (Self::String, v @ Value::String(_)) => Some(v),
            (Self::List(item), Value::Array(values)) => values
                .into_iter()
                .map(|v| item.coerce(v))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            (Self::Set(item), Value::Array(values)) => {
                let mut unique: Vec<Value> = Vec::with_capacity(values.len());
                for value in values {
                    let value = item.coerce(value)?;
                    if !unique.contains(&value) {
                        unique.push(value);
                    }
                }
                Some(Value::Array(unique))
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Bool => write!(f, "Bool"),
            Self::Int => write!(f, "Int"),
            Self::Float => write!(f, "Float"),
            Self::String => write!(f, "String"),
            Self::List(item) => write!(f, "List<{}>", item),
            Self::Set(item) => write!(f, "Set<{}>", item),
        }
    }
}

/// Definition of a single input or output field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    /// Whether execution requires a value (inputs only)
    pub required: bool,
    /// Value used when an optional input is left unbound
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl Field {
    /// Create a required field
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            default: None,
        }
    }

    /// Create an optional field
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default: None,
        }
    }

    /// Set a default value for this field
    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Typed inputs and outputs of a node. Immutable once a node is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub inputs: Vec<Field>,
    pub outputs: Vec<Field>,
}

impl FieldSpec {
    pub fn new(inputs: Vec<Field>, outputs: Vec<Field>) -> Self {
        Self { inputs, outputs }
    }

    /// Find an input field by name
    pub fn input(&self, name: &str) -> Option<&Field> {
        self.inputs.iter().find(|f| f.name == name)
    }

    /// Find an output field by name
    pub fn output(&self, name: &str) -> Option<&Field> {
        self.outputs.iter().find(|f| f.name == name)
    }
}
