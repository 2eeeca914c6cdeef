// crates/shoal-core/src/traits.rs

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::SignedEnvelope;
use crate::error::ShoalError;
use crate::identity::PeerId;
use crate::records::{EpochSettlement, ScoreVector};

/// A stored value plus its expiration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub envelope: SignedEnvelope,
    pub expires_at: DateTime<Utc>,
}

/// The replicated key/subkey → value store shared by all peers.
///
/// Subkeys let many peers write distinct fields under one logical key
/// (key = `"nodes"`, subkey = peer id) without overwriting each other.
/// Writes are owner-only: the subkey must equal the envelope author's peer
/// id, and the envelope signature must verify. The store is eventually
/// consistent — a `get` may return a stale or partial view, and concurrent
/// writes to one `(key, subkey)` resolve last-writer-wins by the envelope's
/// embedded timestamp.
///
/// Implemented by shoal-store (`MemoryStore` for deterministic tests and
/// single-process runs, `RelayStore` for peer replication).
#[async_trait]
pub trait ReplicatedStore: Send + Sync {
    /// Store an envelope under `(key, subkey)` with the given expiration.
    ///
    /// Returns `Ok(false)` if the write was rejected by validation (bad
    /// signature, wrong owner, over a store limit) — rejection is a normal
    /// protocol outcome, not an error.
    async fn put(
        &self,
        key: &str,
        subkey: &PeerId,
        envelope: SignedEnvelope,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, ShoalError>;

    /// All unexpired subkey entries under `key`, as of `as_of`.
    async fn get(
        &self,
        key: &str,
        as_of: DateTime<Utc>,
    ) -> Result<BTreeMap<PeerId, StoredEntry>, ShoalError>;

    /// A single subkey entry, or `None` if absent or expired as of `as_of`.
    async fn get_subkey(
        &self,
        key: &str,
        subkey: &PeerId,
        as_of: DateTime<Utc>,
    ) -> Result<Option<StoredEntry>, ShoalError>;
}

/// Source of this node's own judgment of its peers.
///
/// How scores are computed is out of scope — the engine only requires an
/// opaque function from the eligible target set to a score vector.
pub trait ScoreSource: Send + Sync {
    fn observe(&self, epoch: u64, targets: &[PeerId]) -> Result<ScoreVector, ShoalError>;
}

/// Receives each epoch's immutable settlement.
///
/// Implemented by the external chain-submission collaborator; the daemon
/// ships a logging sink.
#[async_trait]
pub trait SettlementSink: Send + Sync {
    async fn submit(&self, settlement: &EpochSettlement) -> Result<(), ShoalError>;
}
