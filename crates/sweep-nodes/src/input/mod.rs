//! Input nodes
//!
//! Nodes that introduce values into a workflow.

mod identity;

pub use identity::{identity, IdentityConfig};
