//! Notifier (C9): change-only event fan-out to subscribers, plus
//! component health threshold crossings.
//!
//! Delivery is best-effort: a lagging subscriber drops older events
//! rather than stalling the sequencer, matching `tokio::sync::broadcast`'s
//! own semantics.

use crate::graph::NodeId;
use crate::types::Outcome;
use tokio::sync::broadcast;
use tracing::trace;

/// Default channel capacity; large enough to absorb one sequencer
/// burst without a slow subscriber forcing a resend.
const CHANNEL_CAPACITY: usize = 1024;

/// One notification event.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// A test or rule instance's result changed.
    ResultChanged {
        /// The node whose result changed.
        node: NodeId,
        /// Instance name; empty for the primary.
        instance_name: String,
        /// The new result.
        result: Outcome,
        /// Scalar payload, if `result` is `Value`.
        value: Option<i64>,
    },
    /// A component's aggregate health crossed a configured threshold.
    ComponentHealthChanged {
        /// The component.
        component: NodeId,
        /// Health after the crossing.
        health: i32,
    },
    /// A rule was confirmed as the root cause of a failure.
    RootCauseConfirmed {
        /// The rule node.
        rule: NodeId,
        /// Instance name; empty for the primary.
        instance_name: String,
    },
}

/// Owns the broadcast channel every subscriber listens on.
#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<NotifyEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Create a notifier with the default channel capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<NotifyEvent> {
        self.sender.subscribe()
    }

    /// Emit a result-changed event. A no-op if there are no
    /// subscribers (the only error `broadcast::Sender::send` returns).
    pub fn emit_result_changed(&self, node: NodeId, instance_name: &str, result: Outcome, value: Option<i64>) {
        let event = NotifyEvent::ResultChanged {
            node,
            instance_name: instance_name.to_string(),
            result,
            value,
        };
        if self.sender.send(event).is_err() {
            trace!(%node, "result change notification dropped, no subscribers");
        }
    }

    /// Emit one event per component whose health crossed a threshold
    /// this tick (see [`crate::health::HealthUpdate::crossed`]).
    pub fn emit_health_crossings(&self, crossed: &[NodeId], health_of: impl Fn(NodeId) -> i32) {
        for &component in crossed {
            let event = NotifyEvent::ComponentHealthChanged {
                component,
                health: health_of(component),
            };
            let _ = self.sender.send(event);
        }
    }

    /// Emit a root-cause-confirmed event.
    pub fn emit_root_cause(&self, rule: NodeId, instance_name: &str) {
        let event = NotifyEvent::RootCauseConfirmed {
            rule,
            instance_name: instance_name.to_string(),
        };
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphStore;
    use crate::types::ObjType;

    #[tokio::test]
    async fn subscriber_receives_result_changed_event() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        let mut graph = GraphStore::new(25);
        let node = graph.get_or_create("t", ObjType::Test).unwrap();
        notifier.emit_result_changed(node, "", Outcome::Fail, None);

        let event = rx.recv().await.unwrap();
        match event {
            NotifyEvent::ResultChanged { node: n, result, .. } => {
                assert_eq!(n, node);
                assert_eq!(result, Outcome::Fail);
            }
            _ => panic!("wrong event variant"),
        }
    }

    #[tokio::test]
    async fn emit_without_subscribers_does_not_panic() {
        let notifier = Notifier::new();
        let mut graph = GraphStore::new(25);
        let node = graph.get_or_create("t", ObjType::Test).unwrap();
        notifier.emit_result_changed(node, "", Outcome::Pass, None);
    }

    #[tokio::test]
    async fn health_crossings_emit_one_event_per_component() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();
        let mut graph = GraphStore::new(25);
        let comp = graph.get_or_create("c", ObjType::Component).unwrap();

        notifier.emit_health_crossings(&[comp], |_| 500);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, NotifyEvent::ComponentHealthChanged { health: 500, .. }));
    }
}
