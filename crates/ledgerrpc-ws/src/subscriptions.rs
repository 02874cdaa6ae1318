//! WebSocket subscription management.
//!
//! Tracks active subscriptions and forwards server-pushed notifications to
//! their channels. Notifications that arrive before their subscription is
//! registered (the node may push right after answering `subscribe`) are
//! parked in a small buffer and replayed on registration.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use ledgerrpc_core::transport::Event;

/// Notifications kept for not-yet-registered subscriptions.
const ORPHAN_LIMIT: usize = 64;

/// A subscription id assigned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SubscriptionId {
    /// Read a subscription id from a `subscribe` result or a notification's
    /// `params.subscription`: a string, a number, or an object carrying
    /// `subscription` / `id`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            Value::Object(map) => map
                .get("subscription")
                .or_else(|| map.get("id"))
                .and_then(Self::from_value),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Registry {
    closed: bool,
    entries: HashMap<SubscriptionId, mpsc::Sender<Event>>,
    orphans: VecDeque<(SubscriptionId, Event)>,
}

/// Manages active subscriptions; cheap to clone.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    inner: Arc<Mutex<Registry>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return its event channel.
    ///
    /// Returns `None` once the manager has been closed.
    pub fn register(&self, id: SubscriptionId, capacity: usize) -> Option<mpsc::Receiver<Event>> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut registry = self.inner.lock();
        if registry.closed {
            return None;
        }

        let mut kept = VecDeque::with_capacity(registry.orphans.len());
        for (orphan_id, event) in registry.orphans.drain(..) {
            if orphan_id == id {
                let _ = tx.try_send(event);
            } else {
                kept.push_back((orphan_id, event));
            }
        }
        registry.orphans = kept;

        registry.entries.insert(id, tx);
        Some(rx)
    }

    /// Forward a notification to its subscription without blocking.
    ///
    /// A full channel drops the event; a receiver that went away removes the
    /// subscription.
    pub fn dispatch(&self, id: &SubscriptionId, event: Event) {
        let mut registry = self.inner.lock();
        if registry.closed {
            return;
        }
        let Some(sender) = registry.entries.get(id) else {
            if registry.orphans.len() == ORPHAN_LIMIT {
                registry.orphans.pop_front();
            }
            registry.orphans.push_back((id.clone(), event));
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(subscription = %id, "subscriber lagging, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(subscription = %id, "subscriber gone");
                registry.entries.remove(id);
            }
        }
    }

    /// Remove a subscription, closing its channel. Returns `true` if it was
    /// still registered.
    pub fn remove(&self, id: &SubscriptionId) -> bool {
        self.inner.lock().entries.remove(id).is_some()
    }

    /// Close every channel and refuse further registrations.
    pub fn close_all(&self) -> usize {
        let mut registry = self.inner.lock();
        registry.closed = true;
        registry.orphans.clear();
        let count = registry.entries.len();
        registry.entries.clear();
        count
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if there are no active subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(sub: &str, n: u64) -> Event {
        Event {
            subscription: sub.into(),
            method: "subscription".into(),
            payload: json!({ "height": n }),
        }
    }

    #[test]
    fn register_and_dispatch() {
        let mgr = SubscriptionManager::new();
        let id = SubscriptionId("sub-1".into());
        let mut rx = mgr.register(id.clone(), 8).unwrap();

        mgr.dispatch(&id, event("sub-1", 1));

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.payload["height"], 1);
    }

    #[test]
    fn early_notifications_are_replayed() {
        let mgr = SubscriptionManager::new();
        let id = SubscriptionId("sub-9".into());
        mgr.dispatch(&id, event("sub-9", 1));
        mgr.dispatch(&SubscriptionId("other".into()), event("other", 2));

        let mut rx = mgr.register(id, 8).unwrap();
        assert_eq!(rx.try_recv().unwrap().payload["height"], 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let mgr = SubscriptionManager::new();
        let id = SubscriptionId("s".into());
        let mut rx = mgr.register(id.clone(), 1).unwrap();
        mgr.dispatch(&id, event("s", 1));
        mgr.dispatch(&id, event("s", 2));
        assert_eq!(rx.try_recv().unwrap().payload["height"], 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn dropped_receiver_unregisters() {
        let mgr = SubscriptionManager::new();
        let id = SubscriptionId("s".into());
        drop(mgr.register(id.clone(), 4).unwrap());
        mgr.dispatch(&id, event("s", 1));
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn close_all_ends_streams_and_refuses_new_ones() {
        let mgr = SubscriptionManager::new();
        let mut rx = mgr.register(SubscriptionId("a".into()), 4).unwrap();
        assert_eq!(mgr.close_all(), 1);
        assert!(rx.recv().await.is_none());
        assert!(mgr.register(SubscriptionId("b".into()), 4).is_none());
    }

    #[test]
    fn subscription_ids_from_results() {
        assert_eq!(SubscriptionId::from_value(&json!("0xab")), Some(SubscriptionId("0xab".into())));
        assert_eq!(SubscriptionId::from_value(&json!(17)), Some(SubscriptionId("17".into())));
        assert_eq!(
            SubscriptionId::from_value(&json!({"subscription": "s1"})),
            Some(SubscriptionId("s1".into()))
        );
        assert_eq!(SubscriptionId::from_value(&json!({"id": 4})), Some(SubscriptionId("4".into())));
        assert_eq!(SubscriptionId::from_value(&json!(null)), None);
        assert_eq!(SubscriptionId::from_value(&json!("")), None);
    }
}
