// crates/shoal-consensus/src/heartbeat.rs
//
// Node liveness tracking over the replicated store.
//
// Each node periodically refreshes its own liveness entry under the
// `"nodes"` key; everyone else reads those entries to decide which peers
// are active. Liveness gates the protocol both ways: only live peers may
// author commitments, and only live peers are valid scoring targets.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use shoal_core::crypto::Keypair;
use shoal_core::error::ShoalError;
use shoal_core::identity::PeerId;
use shoal_core::keys;
use shoal_core::records::NodeLivenessEntry;
use shoal_core::traits::ReplicatedStore;
use shoal_core::SignedEnvelope;

/// Refreshes this node's liveness entry and answers eligibility queries.
#[derive(Clone)]
pub struct HeartbeatTracker {
    store: Arc<dyn ReplicatedStore>,
    keypair: Arc<Keypair>,
    ttl_secs: u64,
}

impl HeartbeatTracker {
    /// The refresh interval must be strictly shorter than `ttl_secs` so a
    /// single missed refresh does not flap the node out of eligibility.
    pub fn new(store: Arc<dyn ReplicatedStore>, keypair: Arc<Keypair>, ttl_secs: u64) -> Self {
        HeartbeatTracker {
            store,
            keypair,
            ttl_secs,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// Write a fresh liveness entry for this node.
    ///
    /// Returns whether the store accepted the write. A rejected or failed
    /// refresh is retried on the next scheduled interval.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<bool, ShoalError> {
        let entry = NodeLivenessEntry {
            peer: self.peer_id(),
            last_heartbeat_at: now,
            ttl_secs: self.ttl_secs,
        };
        let expires_at = entry.expires_at();
        let envelope = SignedEnvelope::seal(&self.keypair, &entry, now)?;

        self.store
            .put(keys::NODES, &self.peer_id(), envelope, expires_at)
            .await
    }

    /// Peers with a valid, unexpired liveness entry at `at`.
    pub async fn live_peers(&self, at: DateTime<Utc>) -> Result<Vec<PeerId>, ShoalError> {
        let view = self.store.get(keys::NODES, at).await?;

        let mut peers = Vec::new();
        for (subkey, stored) in view {
            let entry: NodeLivenessEntry = match stored.envelope.open() {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping malformed liveness entry from {}: {}", subkey, e);
                    continue;
                }
            };

            // The entry's claimed peer must be the subkey owner.
            if entry.peer != subkey {
                tracing::debug!(
                    "skipping liveness entry claiming {} stored under {}",
                    entry.peer,
                    subkey
                );
                continue;
            }

            if entry.is_live(at) {
                peers.push(entry.peer);
            }
        }

        Ok(peers)
    }

    /// Whether `peer` has a live heartbeat at `at`.
    pub async fn is_eligible(&self, peer: &PeerId, at: DateTime<Utc>) -> Result<bool, ShoalError> {
        let Some(stored) = self.store.get_subkey(keys::NODES, peer, at).await? else {
            return Ok(false);
        };

        let entry: NodeLivenessEntry = match stored.envelope.open() {
            Ok(entry) => entry,
            Err(_) => return Ok(false),
        };

        Ok(entry.peer == *peer && entry.is_live(at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use shoal_store::MemoryStore;

    fn tracker(store: &Arc<MemoryStore>, ttl_secs: u64) -> HeartbeatTracker {
        HeartbeatTracker::new(
            store.clone() as Arc<dyn ReplicatedStore>,
            Arc::new(Keypair::generate()),
            ttl_secs,
        )
    }

    #[tokio::test]
    async fn test_refresh_then_eligible() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store, 30);
        let now = Utc::now();

        assert!(tracker.refresh(now).await.unwrap());
        assert!(tracker.is_eligible(&tracker.peer_id(), now).await.unwrap());
        assert_eq!(tracker.live_peers(now).await.unwrap(), vec![tracker.peer_id()]);
    }

    #[tokio::test]
    async fn test_unrefreshed_entry_expires() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store, 30);
        let now = Utc::now();

        tracker.refresh(now).await.unwrap();

        // Still live just inside the ttl, gone at and past it.
        let just_inside = now + Duration::seconds(29);
        assert!(tracker
            .is_eligible(&tracker.peer_id(), just_inside)
            .await
            .unwrap());

        let at_ttl = now + Duration::seconds(30);
        assert!(!tracker.is_eligible(&tracker.peer_id(), at_ttl).await.unwrap());
        assert!(tracker.live_peers(at_ttl).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_extends_liveness() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store, 30);
        let now = Utc::now();

        tracker.refresh(now).await.unwrap();
        tracker.refresh(now + Duration::seconds(20)).await.unwrap();

        // Expired relative to the first heartbeat, but refreshed since.
        let at = now + Duration::seconds(45);
        assert!(tracker.is_eligible(&tracker.peer_id(), at).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_peer_not_eligible() {
        let store = Arc::new(MemoryStore::new());
        let tracker = tracker(&store, 30);

        let stranger = PeerId::new("shoal1stranger");
        assert!(!tracker.is_eligible(&stranger, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_multiple_nodes_visible() {
        let store = Arc::new(MemoryStore::new());
        let a = tracker(&store, 30);
        let b = tracker(&store, 30);
        let now = Utc::now();

        a.refresh(now).await.unwrap();
        b.refresh(now).await.unwrap();

        let mut live = a.live_peers(now).await.unwrap();
        live.sort();
        let mut expected = vec![a.peer_id(), b.peer_id()];
        expected.sort();
        assert_eq!(live, expected);
    }
}
