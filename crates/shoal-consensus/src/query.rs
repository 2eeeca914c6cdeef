// crates/shoal-consensus/src/query.rs
//
// Read-only query surface for external consumers (dashboards, gateways).
//
// Exposes the current liveness entries and the last N settled epochs
// without depending on engine or aggregator internals: liveness comes
// straight from the replicated store, settlements from the bounded local
// archive the daemon fills as epochs settle. The gateway's own API keys
// and rate limiting live entirely outside this crate.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use shoal_core::error::ShoalError;
use shoal_core::keys;
use shoal_core::records::{EpochSettlement, NodeLivenessEntry};
use shoal_core::traits::ReplicatedStore;

/// Bounded history of settled epochs. Settlements are immutable once
/// recorded; re-insertion of an already-settled epoch is ignored.
pub struct SettlementArchive {
    max_epochs: usize,
    settlements: BTreeMap<u64, EpochSettlement>,
}

impl SettlementArchive {
    pub fn new(max_epochs: usize) -> Self {
        SettlementArchive {
            max_epochs,
            settlements: BTreeMap::new(),
        }
    }

    /// Record a settled epoch, pruning history beyond the bound.
    pub fn insert(&mut self, settlement: EpochSettlement) {
        if self.settlements.contains_key(&settlement.epoch) {
            tracing::debug!(
                "epoch {} already archived; keeping the original settlement",
                settlement.epoch
            );
            return;
        }

        self.settlements.insert(settlement.epoch, settlement);
        while self.settlements.len() > self.max_epochs {
            let oldest = *self
                .settlements
                .keys()
                .next()
                .expect("non-empty archive has a first key");
            self.settlements.remove(&oldest);
        }
    }

    pub fn get(&self, epoch: u64) -> Option<&EpochSettlement> {
        self.settlements.get(&epoch)
    }

    /// The most recent `n` settlements, newest first.
    pub fn recent(&self, n: usize) -> Vec<EpochSettlement> {
        self.settlements.values().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.settlements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settlements.is_empty()
    }
}

/// Read-only accessors served to the external gateway.
#[derive(Clone)]
pub struct QueryApi {
    store: Arc<dyn ReplicatedStore>,
    archive: Arc<RwLock<SettlementArchive>>,
}

impl QueryApi {
    pub fn new(store: Arc<dyn ReplicatedStore>, archive: Arc<RwLock<SettlementArchive>>) -> Self {
        QueryApi { store, archive }
    }

    /// Current unexpired liveness entries under the `"nodes"` key.
    pub async fn live_nodes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NodeLivenessEntry>, ShoalError> {
        let view = self.store.get(keys::NODES, now).await?;

        let mut nodes = Vec::new();
        for (subkey, stored) in view {
            let entry: NodeLivenessEntry = match stored.envelope.open() {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping malformed liveness entry from {}: {}", subkey, e);
                    continue;
                }
            };
            if entry.peer == subkey && entry.is_live(now) {
                nodes.push(entry);
            }
        }
        Ok(nodes)
    }

    /// The last `n` settled epochs' consensus scores, newest first.
    pub async fn recent_settlements(&self, n: usize) -> Vec<EpochSettlement> {
        self.archive.read().await.recent(n)
    }
}
