//! Sweep Nodes
//!
//! Utility node kinds for the sweep engine. Each kind registers itself with
//! `inventory`, so `NodeRegistry::with_builtins()` picks them all up.
//!
//! # Categories
//!
//! - **Input**: `identity` forwards its fields unchanged (iterable holders,
//!   gathering joins)
//! - **Control**: `merge` collects `in1..inN` into one list, `select` picks
//!   list elements by index

pub mod control;
pub mod input;

pub use control::*;
pub use input::*;

#[cfg(test)]
mod scenarios;
