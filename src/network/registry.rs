//! Live socket sink registry.
//!
//! One entry per authenticated socket connection, keyed by session token.
//! Each entry holds the sending half of the connection's outgoing queue;
//! dropping an entry closes that queue, which the connection task observes
//! and winds down on. That is the whole kick mechanism.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::permission::Permission;
use crate::transport::ChatTransport;

struct SocketSink {
    username: String,
    tx: mpsc::Sender<String>,
}

/// Registry of live, authenticated socket connections.
///
/// Delivery is queue-based: lines are handed to each connection's bounded
/// outgoing queue with `try_send`, so one stalled client drops its own
/// traffic instead of blocking the rest of the room.
pub struct SinkRegistry {
    sinks: DashMap<String, SocketSink>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self {
            sinks: DashMap::new(),
        }
    }

    pub fn register(&self, token: &str, username: &str, tx: mpsc::Sender<String>) {
        self.sinks.insert(
            token.to_string(),
            SocketSink {
                username: username.to_string(),
                tx,
            },
        );
        debug!(username = %username, total = self.len(), "socket sink registered");
    }

    /// Idempotent; the connection task calls this on every exit path and
    /// a kick may already have removed the entry.
    pub fn unregister(&self, token: &str) -> bool {
        let removed = self.sinks.remove(token).is_some();
        if removed {
            debug!(total = self.len(), "socket sink unregistered");
        }
        removed
    }

    /// Hand a line to every sink. Returns how many queues accepted it.
    pub fn deliver_all(&self, line: &str) -> usize {
        let mut delivered = 0;
        for entry in self.sinks.iter() {
            match entry.value().tx.try_send(line.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    trace!(username = %entry.value().username, error = %e, "socket sink dropped a line");
                }
            }
        }
        delivered
    }

    /// Hand a line to every sink of `username`. Returns true when at least
    /// one queue accepted it.
    pub fn deliver_to(&self, username: &str, line: &str) -> bool {
        let mut delivered = false;
        for entry in self.sinks.iter() {
            if entry.value().username == username {
                delivered |= entry.value().tx.try_send(line.to_string()).is_ok();
            }
        }
        delivered
    }

    /// Drop every sink of `username`, closing the outgoing queues.
    ///
    /// Tokens are collected before removal; removing entries while holding
    /// iterator guards would deadlock on the shard lock.
    pub fn remove_by_username(&self, username: &str) -> bool {
        let tokens: Vec<String> = self
            .sinks
            .iter()
            .filter(|entry| entry.value().username == username)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = false;
        for token in tokens {
            removed |= self.sinks.remove(&token).is_some();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for SinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChatTransport for SinkRegistry {
    async fn broadcast(&self, text: &str, is_system: bool) -> usize {
        let line = if is_system && !text.starts_with("[SYSTEM]") {
            format!("[SYSTEM] {text}")
        } else {
            text.to_string()
        };
        self.deliver_all(&line)
    }

    async fn send_private(&self, username: &str, text: &str) -> bool {
        // Already-framed control plane messages pass through untouched.
        let line = if text.starts_with("[PM") || text.starts_with("[SYSTEM]") {
            text.to_string()
        } else {
            format!("[PM] {text}")
        };
        self.deliver_to(username, &line)
    }

    async fn kick(&self, username: &str, reason: &str) -> bool {
        // The farewell is queued first; the connection task drains its
        // queue before it observes the close.
        let notice = if reason.is_empty() {
            "[SYSTEM] you have been disconnected by an administrator".to_string()
        } else {
            format!("[SYSTEM] you have been disconnected: {reason}")
        };
        self.deliver_to(username, &notice);
        self.remove_by_username(username)
    }

    async fn notify_permission_change(&self, username: &str, permission: Permission) {
        let line = format!(
            "[SYSTEM] your permission level is now {} | PERM_UPDATE:{}",
            permission,
            permission.rank()
        );
        self.deliver_to(username, &line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(registry: &SinkRegistry, token: &str, username: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(8);
        registry.register(token, username, tx);
        rx
    }

    #[test]
    fn deliver_all_counts_accepting_queues() {
        let registry = SinkRegistry::new();
        let mut alice = sink(&registry, "TOKEN-A", "alice");
        let mut bob = sink(&registry, "TOKEN-B", "bob");

        assert_eq!(registry.deliver_all("[alice] hi"), 2);
        assert_eq!(alice.try_recv().unwrap(), "[alice] hi");
        assert_eq!(bob.try_recv().unwrap(), "[alice] hi");
    }

    #[test]
    fn full_queue_drops_only_its_own_line() {
        let registry = SinkRegistry::new();
        let (tx, _stalled_rx) = mpsc::channel(1);
        registry.register("TOKEN-S", "stalled", tx);
        let mut bob = sink(&registry, "TOKEN-B", "bob");

        assert_eq!(registry.deliver_all("first"), 2);
        // The stalled client's queue is now full; only bob accepts.
        assert_eq!(registry.deliver_all("second"), 1);
        assert_eq!(bob.try_recv().unwrap(), "first");
        assert_eq!(bob.try_recv().unwrap(), "second");
    }

    #[tokio::test]
    async fn kick_queues_notice_then_closes() {
        let registry = SinkRegistry::new();
        let mut alice = sink(&registry, "TOKEN-A", "alice");

        assert!(registry.kick("alice", "being rude").await);
        assert_eq!(
            alice.recv().await.unwrap(),
            "[SYSTEM] you have been disconnected: being rude"
        );
        // Queue is closed once the notice is drained.
        assert!(alice.recv().await.is_none());
        assert!(!registry.kick("alice", "again").await);
    }

    #[tokio::test]
    async fn system_framing_is_not_doubled() {
        let registry = SinkRegistry::new();
        let mut alice = sink(&registry, "TOKEN-A", "alice");

        registry.broadcast("[SYSTEM] maintenance", true).await;
        registry.broadcast("plain notice", true).await;
        assert_eq!(alice.try_recv().unwrap(), "[SYSTEM] maintenance");
        assert_eq!(alice.try_recv().unwrap(), "[SYSTEM] plain notice");
    }

    #[tokio::test]
    async fn private_framing() {
        let registry = SinkRegistry::new();
        let mut alice = sink(&registry, "TOKEN-A", "alice");

        assert!(registry.send_private("alice", "psst").await);
        assert!(registry.send_private("alice", "[PM - admin] formal").await);
        assert!(!registry.send_private("nobody", "psst").await);
        assert_eq!(alice.try_recv().unwrap(), "[PM] psst");
        assert_eq!(alice.try_recv().unwrap(), "[PM - admin] formal");
    }

    #[tokio::test]
    async fn permission_notice_carries_sentinel() {
        let registry = SinkRegistry::new();
        let mut alice = sink(&registry, "TOKEN-A", "alice");

        registry
            .notify_permission_change("alice", Permission::Moderator)
            .await;
        let line = alice.try_recv().unwrap();
        assert!(line.contains("PERM_UPDATE:1"));
        assert!(line.contains("MODERATOR"));
    }
}
