//! Connection registry and derived presence set.
//!
//! The registry owns the only shared mutable state outside the store: the
//! per-user set of live connection handles. It is generic over the outbound
//! event type so it carries no knowledge of the wire format.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Handle for one live transport session. Unique per open socket.
pub type ConnectionId = u64;

const TRANSITION_CHANNEL_CAPACITY: usize = 64;

/// Emitted exactly once per zero-to-nonzero or nonzero-to-zero transition of
/// a user's connection count, never per individual connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceChange {
    pub username: String,
    pub online: bool,
    pub timestamp: DateTime<Utc>,
}

/// Maps user identities to their live connection handles.
///
/// Each handle carries the sending half of that connection's outbound event
/// queue. Fan-out is fire-and-forget: a closed or saturated connection is
/// skipped without failing the rest of the fan-out.
pub struct ConnectionRegistry<E> {
    inner: Arc<Mutex<HashMap<String, HashMap<ConnectionId, mpsc::Sender<E>>>>>,
    next_id: Arc<AtomicU64>,
    transitions: broadcast::Sender<PresenceChange>,
}

impl<E> Clone for ConnectionRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            next_id: Arc::clone(&self.next_id),
            transitions: self.transitions.clone(),
        }
    }
}

impl<E> Default for ConnectionRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ConnectionRegistry<E> {
    pub fn new() -> Self {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            transitions,
        }
    }

    /// Add a connection to the user's set.
    ///
    /// Returns the allocated handle and, only when the user had no
    /// connections before, the offline-to-online presence change.
    pub fn register(
        &self,
        username: &str,
        sender: mpsc::Sender<E>,
    ) -> (ConnectionId, Option<PresenceChange>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let change = {
            let mut users = self.inner.lock().expect("registry lock poisoned");
            let connections = users.entry(username.to_string()).or_default();
            let was_offline = connections.is_empty();
            connections.insert(id, sender);

            was_offline.then(|| PresenceChange {
                username: username.to_string(),
                online: true,
                timestamp: Utc::now(),
            })
        };

        debug!(username, connection_id = id, "registered connection");
        if let Some(change) = &change {
            let _ = self.transitions.send(change.clone());
        }
        (id, change)
    }

    /// Remove a connection from its owner's set.
    ///
    /// Returns the online-to-offline presence change when this was the user's
    /// last connection.
    pub fn unregister(&self, username: &str, id: ConnectionId) -> Option<PresenceChange> {
        let change = {
            let mut users = self.inner.lock().expect("registry lock poisoned");
            let Some(connections) = users.get_mut(username) else {
                return None;
            };
            connections.remove(&id);

            if connections.is_empty() {
                users.remove(username);
                Some(PresenceChange {
                    username: username.to_string(),
                    online: false,
                    timestamp: Utc::now(),
                })
            } else {
                None
            }
        };

        debug!(username, connection_id = id, "unregistered connection");
        if let Some(change) = &change {
            let _ = self.transitions.send(change.clone());
        }
        change
    }

    /// Snapshot of the user's live connection senders; empty if offline.
    pub fn connections_of(&self, username: &str) -> Vec<mpsc::Sender<E>> {
        let users = self.inner.lock().expect("registry lock poisoned");
        users
            .get(username)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The derived presence set: every identity with at least one connection.
    pub fn online_users(&self) -> Vec<String> {
        let users = self.inner.lock().expect("registry lock poisoned");
        let mut online: Vec<String> = users.keys().cloned().collect();
        online.sort_unstable();
        online
    }

    pub fn is_online(&self, username: &str) -> bool {
        let users = self.inner.lock().expect("registry lock poisoned");
        users.get(username).is_some_and(|c| !c.is_empty())
    }

    /// Subscribe to presence transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.transitions.subscribe()
    }
}

impl<E: Clone> ConnectionRegistry<E> {
    /// Emit one event to every live connection of a user.
    ///
    /// Returns how many connections accepted the event. A connection whose
    /// queue is full or closed is skipped; delivery to the others proceeds.
    pub fn send_to_user(&self, username: &str, event: E) -> usize {
        let mut delivered = 0;
        for sender in self.connections_of(username) {
            if let Err(error) = sender.try_send(event.clone()) {
                warn!(username, %error, "dropping event for unreachable connection");
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    /// Emit one event to every connection of every online user.
    pub fn broadcast(&self, event: E) {
        self.broadcast_inner(event, None);
    }

    /// Broadcast to everyone except one connection, typically the origin.
    pub fn broadcast_except(&self, event: E, skip: ConnectionId) {
        self.broadcast_inner(event, Some(skip));
    }

    fn broadcast_inner(&self, event: E, skip: Option<ConnectionId>) {
        let senders: Vec<mpsc::Sender<E>> = {
            let users = self.inner.lock().expect("registry lock poisoned");
            users
                .values()
                .flat_map(|connections| connections.iter())
                .filter(|(id, _)| Some(**id) != skip)
                .map(|(_, sender)| sender.clone())
                .collect()
        };

        for sender in senders {
            if let Err(error) = sender.try_send(event.clone()) {
                warn!(%error, "dropping broadcast event for unreachable connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        mpsc::channel(8)
    }

    #[tokio::test]
    async fn presence_transitions_fire_once_per_zero_crossing() {
        let registry = ConnectionRegistry::<String>::new();

        let (tx1, _rx1) = channel();
        let (id1, change) = registry.register("alice", tx1);
        assert!(change.is_some_and(|c| c.online && c.username == "alice"));

        // second connection of the same user: no transition
        let (tx2, _rx2) = channel();
        let (id2, change) = registry.register("alice", tx2);
        assert!(change.is_none());

        // dropping one of two connections: still online
        assert!(registry.unregister("alice", id1).is_none());
        assert!(registry.is_online("alice"));

        // last connection gone: offline transition
        let change = registry.unregister("alice", id2).unwrap();
        assert!(!change.online);
        assert!(!registry.is_online("alice"));
        assert!(registry.online_users().is_empty());
    }

    #[tokio::test]
    async fn unregister_unknown_user_is_a_noop() {
        let registry = ConnectionRegistry::<String>::new();
        assert!(registry.unregister("ghost", 42).is_none());
    }

    #[tokio::test]
    async fn online_users_reflects_registered_identities() {
        let registry = ConnectionRegistry::<String>::new();

        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        registry.register("bob", tx1);
        registry.register("alice", tx2);

        assert_eq!(registry.online_users(), ["alice", "bob"]);
        assert!(registry.connections_of("carol").is_empty());
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_connection() {
        let registry = ConnectionRegistry::<String>::new();

        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register("alice", tx1);
        registry.register("alice", tx2);

        let delivered = registry.send_to_user("alice", "hello".to_string());
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap(), "hello");
        assert_eq!(rx2.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn saturated_connection_is_skipped_not_fatal() {
        let registry = ConnectionRegistry::<String>::new();

        let (full_tx, _full_rx) = mpsc::channel(1);
        full_tx.try_send("occupied".to_string()).unwrap();
        let (open_tx, mut open_rx) = channel();

        registry.register("alice", full_tx);
        registry.register("alice", open_tx);

        let delivered = registry.send_to_user("alice", "ping".to_string());
        assert_eq!(delivered, 1);
        assert_eq!(open_rx.recv().await.unwrap(), "ping");
    }

    #[tokio::test]
    async fn broadcast_reaches_all_users() {
        let registry = ConnectionRegistry::<String>::new();

        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        registry.register("alice", tx1);
        registry.register("bob", tx2);

        registry.broadcast("announcement".to_string());
        assert_eq!(rx1.recv().await.unwrap(), "announcement");
        assert_eq!(rx2.recv().await.unwrap(), "announcement");
    }

    #[tokio::test]
    async fn broadcast_except_skips_the_origin_connection() {
        let registry = ConnectionRegistry::<String>::new();

        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        let (origin_id, _) = registry.register("alice", tx1);
        registry.register("bob", tx2);

        registry.broadcast_except("typing".to_string(), origin_id);
        assert_eq!(rx2.recv().await.unwrap(), "typing");
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribers_observe_transitions() {
        let registry = ConnectionRegistry::<String>::new();
        let mut transitions = registry.subscribe();

        let (tx, _rx) = channel();
        let (id, _) = registry.register("alice", tx);

        let online = transitions.recv().await.unwrap();
        assert!(online.online);
        assert_eq!(online.username, "alice");

        registry.unregister("alice", id);
        let offline = transitions.recv().await.unwrap();
        assert!(!offline.online);
    }
}
