//! Join node aggregation
//!
//! A join waits for every branch instance feeding it (the [`JoinTracker`]
//! state machine), then materializes one list per join field from the
//! delivered values with [`collect_branches`].

use std::collections::BTreeMap;

use crate::config::{EmptyJoinPolicy, JoinFailurePolicy};
use crate::error::ExecutionFailure;
use crate::types::NodeId;

/// Lifecycle of a join node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// Waiting on upstream branches
    Pending,
    /// Every branch reached a terminal state
    Ready,
    Executed,
    Failed,
}

/// Tracks which upstream branch instances of a join have settled
#[derive(Debug, Clone)]
pub struct JoinTracker {
    /// Branch instance -> `Some(succeeded)` once terminal
    branches: BTreeMap<NodeId, Option<bool>>,
    state: JoinState,
}

impl JoinTracker {
    /// Track the given upstream branch instances. With none, the join is
    /// immediately ready.
    pub fn new(upstream: impl IntoIterator<Item = NodeId>) -> Self {
        let branches: BTreeMap<NodeId, Option<bool>> =
            upstream.into_iter().map(|id| (id, None)).collect();
        let state = if branches.is_empty() {
            JoinState::Ready
        } else {
            JoinState::Pending
        };
        Self { branches, state }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    /// Record the terminal status of one upstream instance.
    ///
    /// Moves `Pending -> Ready` once every branch has settled. Unknown
    /// instances are ignored.
    pub fn settle(&mut self, node: &str, succeeded: bool) -> JoinState {
        if let Some(slot) = self.branches.get_mut(node) {
            *slot = Some(succeeded);
        }
        if self.state == JoinState::Pending && self.branches.values().all(Option::is_some) {
            self.state = JoinState::Ready;
        }
        self.state
    }

    /// Upstream instances that settled without outputs
    pub fn failed_branches(&self) -> Vec<&str> {
        self.branches
            .iter()
            .filter(|(_, status)| **status == Some(false))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Record the outcome of the join's own execution. Only valid from `Ready`.
    pub fn complete(&mut self, succeeded: bool) -> JoinState {
        if self.state == JoinState::Ready {
            self.state = if succeeded {
                JoinState::Executed
            } else {
                JoinState::Failed
            };
        }
        self.state
    }
}

/// One branch contribution to a join field
#[derive(Debug, Clone, PartialEq)]
pub enum Branch {
    Value(serde_json::Value),
    /// The producing instance failed or was blocked
    Missing(NodeId),
}

/// Join policies in effect for a run
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinPolicy {
    pub on_failure: JoinFailurePolicy,
    pub on_empty: EmptyJoinPolicy,
}

/// Build the list for one join field from its branches, in enumeration
/// order. With `unique`, repeated values keep only their first occurrence.
pub fn collect_branches(
    field: &str,
    branches: Vec<Branch>,
    unique: bool,
    policy: JoinPolicy,
) -> std::result::Result<serde_json::Value, ExecutionFailure> {
    if branches.is_empty() && policy.on_empty == EmptyJoinPolicy::Fail {
        return Err(ExecutionFailure::JoinIncomplete {
            message: format!("no branches reached join field '{}'", field),
        });
    }

    let missing: Vec<&str> = branches
        .iter()
        .filter_map(|b| match b {
            Branch::Missing(node) => Some(node.as_str()),
            Branch::Value(_) => None,
        })
        .collect();
    if !missing.is_empty() {
        match policy.on_failure {
            JoinFailurePolicy::Abort => {
                return Err(ExecutionFailure::JoinIncomplete {
                    message: format!(
                        "join field '{}' is missing branches from {}",
                        field,
                        missing.join(", ")
                    ),
                });
            }
            JoinFailurePolicy::Partial => {
                log::warn!(
                    "Join field '{}' dropping {} missing branch(es): {}",
                    field,
                    missing.len(),
                    missing.join(", ")
                );
            }
        }
    }

    let values: Vec<serde_json::Value> = branches
        .into_iter()
        .filter_map(|b| match b {
            Branch::Value(v) => Some(v),
            Branch::Missing(_) => None,
        })
        .collect();

    Ok(serde_json::Value::Array(if unique {
        unique_values(values)
    } else {
        values
    }))
}

/// Remove repeated values, keeping first-seen order
pub fn unique_values(values: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    let mut seen: Vec<serde_json::Value> = Vec::with_capacity(values.len());
    for value in values {
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(items: &[i64]) -> Vec<Branch> {
        items.iter().map(|v| Branch::Value(json!(v))).collect()
    }

    #[test]
    fn test_tracker_transitions() {
        let mut tracker = JoinTracker::new(["a[r=0]".to_string(), "a[r=1]".to_string()]);
        assert_eq!(tracker.state(), JoinState::Pending);
        assert_eq!(tracker.settle("a[r=0]", true), JoinState::Pending);
        assert_eq!(tracker.settle("unrelated", true), JoinState::Pending);
        assert_eq!(tracker.settle("a[r=1]", false), JoinState::Ready);
        assert_eq!(tracker.failed_branches(), vec!["a[r=1]"]);
        assert_eq!(tracker.complete(false), JoinState::Failed);
    }

    #[test]
    fn test_tracker_without_branches_is_ready() {
        let mut tracker = JoinTracker::new(Vec::<NodeId>::new());
        assert_eq!(tracker.state(), JoinState::Ready);
        assert_eq!(tracker.complete(true), JoinState::Executed);
        // Terminal states stay put
        assert_eq!(tracker.complete(false), JoinState::Executed);
    }

    #[test]
    fn test_collect_preserves_order() {
        let list = collect_branches("in", values(&[3, 4]), false, JoinPolicy::default()).unwrap();
        assert_eq!(list, json!([3, 4]));
    }

    #[test]
    fn test_collect_unique_keeps_first_occurrence() {
        let list =
            collect_branches("in", values(&[4, 2, 3, 2, 4]), true, JoinPolicy::default()).unwrap();
        assert_eq!(list, json!([4, 2, 3]));
    }

    #[test]
    fn test_missing_branch_aborts_by_default() {
        let branches = vec![Branch::Value(json!(1)), Branch::Missing("inc[r=1]".to_string())];
        let err = collect_branches("in", branches, false, JoinPolicy::default()).unwrap_err();
        assert!(matches!(err, ExecutionFailure::JoinIncomplete { .. }));
    }

    #[test]
    fn test_partial_policy_drops_missing() {
        let policy = JoinPolicy {
            on_failure: JoinFailurePolicy::Partial,
            ..Default::default()
        };
        let branches = vec![
            Branch::Missing("inc[r=0]".to_string()),
            Branch::Value(json!(2)),
        ];
        assert_eq!(collect_branches("in", branches, false, policy).unwrap(), json!([2]));
    }

    #[test]
    fn test_empty_policy() {
        let err = collect_branches("in", vec![], false, JoinPolicy::default()).unwrap_err();
        assert!(matches!(err, ExecutionFailure::JoinIncomplete { .. }));

        let policy = JoinPolicy {
            on_empty: EmptyJoinPolicy::RunEmpty,
            ..Default::default()
        };
        assert_eq!(collect_branches("in", vec![], false, policy).unwrap(), json!([]));
    }
}
