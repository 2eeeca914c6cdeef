// crates/shoal-store/src/memory.rs
//
// In-memory implementation of the replicated store.
//
// Deterministic single-process backend used for tests and standalone runs,
// and as the local half of `RelayStore`. Enforces the same record rules a
// well-behaved swarm enforces collectively: signatures must verify, a peer
// may only write under its own subkey, expirations are capped per key, and
// per-peer write budgets bound how often a key may be rewritten. Concurrent
// writes to one `(key, subkey)` resolve last-writer-wins by the envelope's
// embedded timestamp.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use shoal_core::error::ShoalError;
use shoal_core::identity::PeerId;
use shoal_core::keys;
use shoal_core::traits::{ReplicatedStore, StoredEntry};
use shoal_core::SignedEnvelope;

/// Per-key write rules: how far in the future an entry may expire, and how
/// many writes one peer gets within a rolling window.
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    pub max_ttl_secs: i64,
    pub max_writes_per_window: usize,
    pub window_secs: i64,
}

/// Write policies per well-known key, with a fallback for everything else.
#[derive(Debug, Clone)]
pub struct StorePolicy {
    policies: HashMap<String, KeyPolicy>,
    default: KeyPolicy,
}

impl StorePolicy {
    /// Effectively-unlimited policy. Used by tests that exercise protocol
    /// logic rather than store limits.
    pub fn permissive() -> Self {
        StorePolicy {
            policies: HashMap::new(),
            default: KeyPolicy {
                max_ttl_secs: i64::MAX / 4,
                max_writes_per_window: usize::MAX,
                window_secs: i64::MAX / 4,
            },
        }
    }

    /// Policy scaled to the protocol's epoch length: heartbeats may be
    /// refreshed often but expire within ~1.1 epochs, while commit, reveal,
    /// and consensus records are written once per window and may linger for
    /// five epochs of history.
    pub fn for_epoch_secs(epoch_secs: u64) -> Self {
        let epoch = epoch_secs as i64;
        let mut policies = HashMap::new();
        policies.insert(
            keys::NODES.to_string(),
            KeyPolicy {
                max_ttl_secs: epoch + epoch / 10,
                max_writes_per_window: 100,
                window_secs: epoch,
            },
        );
        for key in [keys::COMMITS, keys::REVEALS, keys::CONSENSUS] {
            policies.insert(
                key.to_string(),
                KeyPolicy {
                    max_ttl_secs: epoch * 5,
                    max_writes_per_window: 1,
                    window_secs: epoch,
                },
            );
        }

        StorePolicy {
            policies,
            default: KeyPolicy {
                max_ttl_secs: epoch * 5,
                max_writes_per_window: 8,
                window_secs: epoch,
            },
        }
    }

    fn for_key(&self, key: &str) -> &KeyPolicy {
        self.policies.get(key).unwrap_or(&self.default)
    }
}

/// In-memory replicated store backend.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, BTreeMap<PeerId, StoredEntry>>>,
    /// (key, peer) -> (window index, writes in that window).
    write_counts: RwLock<HashMap<(String, PeerId), (i64, usize)>>,
    policy: StorePolicy,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_policy(StorePolicy::permissive())
    }

    pub fn with_policy(policy: StorePolicy) -> Self {
        MemoryStore {
            entries: RwLock::new(HashMap::new()),
            write_counts: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// Check and consume one unit of the peer's write budget for this key.
    async fn take_write_budget(&self, key: &str, peer: &PeerId, at: DateTime<Utc>) -> bool {
        let policy = self.policy.for_key(key);
        if policy.max_writes_per_window == usize::MAX {
            return true;
        }

        let window = at.timestamp().div_euclid(policy.window_secs);
        let mut counts = self.write_counts.write().await;
        let slot = counts
            .entry((key.to_string(), peer.clone()))
            .or_insert((window, 0));

        if slot.0 != window {
            // New window, old count no longer applies.
            *slot = (window, 0);
        }
        if slot.1 >= policy.max_writes_per_window {
            return false;
        }
        slot.1 += 1;
        true
    }

    /// Full unexpired view of the store, keyed by logical key then subkey.
    /// This is what the relay serving layer hands out for `record/dump`.
    pub async fn snapshot(
        &self,
        as_of: DateTime<Utc>,
    ) -> HashMap<String, BTreeMap<PeerId, StoredEntry>> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .map(|(key, subkeys)| {
                let live: BTreeMap<PeerId, StoredEntry> = subkeys
                    .iter()
                    .filter(|(_, entry)| entry.expires_at > as_of)
                    .map(|(peer, entry)| (peer.clone(), entry.clone()))
                    .collect();
                (key.clone(), live)
            })
            .filter(|(_, subkeys)| !subkeys.is_empty())
            .collect()
    }

    /// Drop entries already expired as of `now`. Expiration-on-read makes
    /// this optional; it only bounds memory on long-lived processes.
    pub async fn purge_expired(&self, now: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        for subkeys in entries.values_mut() {
            subkeys.retain(|_, entry| entry.expires_at > now);
        }
        entries.retain(|_, subkeys| !subkeys.is_empty());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplicatedStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        subkey: &PeerId,
        envelope: SignedEnvelope,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ShoalError> {
        if let Err(e) = envelope.verify() {
            tracing::debug!("rejecting write to {}: {}", key, e);
            return Ok(false);
        }

        if &envelope.author != subkey {
            tracing::debug!(
                "rejecting write to {}: {} attempted to write subkey {}",
                key,
                envelope.author,
                subkey
            );
            return Ok(false);
        }

        // A horizon that overflows the datetime range counts as unbounded.
        let policy = self.policy.for_key(key);
        let max_expiration = Duration::try_seconds(policy.max_ttl_secs)
            .and_then(|ttl| envelope.timestamp.checked_add_signed(ttl));
        if let Some(max_expiration) = max_expiration {
            if expires_at > max_expiration {
                tracing::debug!(
                    "rejecting write to {} from {}: expiration too far in the future",
                    key,
                    subkey
                );
                return Ok(false);
            }
        }

        let mut entries = self.entries.write().await;
        let subkeys = entries.entry(key.to_string()).or_default();

        // Last-writer-wins by the author's embedded timestamp, not by store
        // receipt order. Checked before the write budget so that replication
        // pulls of records we already hold do not consume it.
        if let Some(existing) = subkeys.get(subkey) {
            if existing.envelope.timestamp >= envelope.timestamp {
                tracing::debug!(
                    "ignoring stale write to {}/{} ({} <= {})",
                    key,
                    subkey,
                    envelope.timestamp,
                    existing.envelope.timestamp
                );
                return Ok(false);
            }
        }

        if !self.take_write_budget(key, subkey, envelope.timestamp).await {
            tracing::debug!(
                "rejecting write to {} from {}: over per-window store limit",
                key,
                subkey
            );
            return Ok(false);
        }

        subkeys.insert(subkey.clone(), StoredEntry {
            envelope,
            expires_at,
        });
        Ok(true)
    }

    async fn get(
        &self,
        key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeMap<PeerId, StoredEntry>, ShoalError> {
        let entries = self.entries.read().await;
        let Some(subkeys) = entries.get(key) else {
            return Ok(BTreeMap::new());
        };

        Ok(subkeys
            .iter()
            .filter(|(_, entry)| entry.expires_at > as_of)
            .map(|(peer, entry)| (peer.clone(), entry.clone()))
            .collect())
    }

    async fn get_subkey(
        &self,
        key: &str,
        subkey: &PeerId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<StoredEntry>, ShoalError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .and_then(|subkeys| subkeys.get(subkey))
            .filter(|entry| entry.expires_at > as_of)
            .cloned())
    }
}
