//! Event types for streaming run progress
//!
//! The scheduler reports every state change of a run through an
//! [`EventSink`]. Consumers can forward them to a UI, a channel, or a log.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Trait for receiving run events
///
/// This abstracts over the transport (mpsc channel, websocket, etc.)
/// so the engine can be embedded in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone, Error)]
#[error("Event error: {message}")]
pub struct EventError {
    pub message: String,
}

/// Events emitted while a run progresses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkflowEvent {
    /// Run started on an expanded graph
    #[serde(rename_all = "camelCase")]
    RunStarted {
        workflow_id: String,
        run_id: String,
        node_count: usize,
    },

    /// A node instance was submitted for execution
    #[serde(rename_all = "camelCase")]
    NodeStarted { node_id: String, run_id: String },

    /// A node instance produced outputs, either fresh or from the cache
    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node_id: String,
        run_id: String,
        cached: bool,
    },

    /// A node instance failed
    #[serde(rename_all = "camelCase")]
    NodeFailed {
        node_id: String,
        run_id: String,
        error: String,
    },

    /// A node instance was skipped because a dependency failed
    #[serde(rename_all = "camelCase")]
    NodeBlocked {
        node_id: String,
        run_id: String,
        cause: String,
    },

    /// Every node reached a terminal state
    #[serde(rename_all = "camelCase")]
    RunCompleted {
        workflow_id: String,
        run_id: String,
        succeeded: usize,
        failed: usize,
        blocked: usize,
    },
}

impl WorkflowEvent {
    /// ID of the node instance this event concerns, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeBlocked { node_id, .. } => Some(node_id),
            Self::RunStarted { .. } | Self::RunCompleted { .. } => None,
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_collects_in_order() {
        let sink = VecEventSink::new();
        sink.send(WorkflowEvent::NodeStarted {
            node_id: "a".to_string(),
            run_id: "r".to_string(),
        })
        .unwrap();
        sink.send(WorkflowEvent::NodeCompleted {
            node_id: "a".to_string(),
            run_id: "r".to_string(),
            cached: false,
        })
        .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.node_id() == Some("a")));

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = WorkflowEvent::NodeBlocked {
            node_id: "b".to_string(),
            run_id: "r".to_string(),
            cause: "a".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "nodeBlocked");
        assert_eq!(json["nodeId"], "b");
    }
}
