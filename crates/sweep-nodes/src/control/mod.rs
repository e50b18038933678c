//! Control nodes
//!
//! Nodes that reshape lists flowing between steps.

mod merge;
mod select;

pub use merge::{MergeConfig, MergeNode};
pub use select::SelectNode;
