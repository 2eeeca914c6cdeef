// crates/shoal-core/src/records.rs
//
// Record types stored in the replicated store and exchanged between peers:
// score vectors, commitments, reveals, liveness entries, and the per-epoch
// settlement handed to the chain client.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::SALT_LEN;
use crate::error::ShoalError;
use crate::identity::PeerId;

/// Ordered mapping from target peer id to a score in `[0.0, 1.0]`.
///
/// Bounds are enforced at construction and at deserialization, so a peer's
/// reveal with an out-of-range entry never makes it past decoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<PeerId, f64>",
    into = "BTreeMap<PeerId, f64>"
)]
pub struct ScoreVector(BTreeMap<PeerId, f64>);

impl ScoreVector {
    pub fn new() -> Self {
        ScoreVector(BTreeMap::new())
    }

    /// Insert a score for a target. Rejects values outside `[0.0, 1.0]`
    /// and non-finite values.
    pub fn insert(&mut self, target: PeerId, score: f64) -> Result<(), ShoalError> {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(ShoalError::InvalidRecord(format!(
                "score {} for {} outside [0.0, 1.0]",
                score, target
            )));
        }
        self.0.insert(target, score);
        Ok(())
    }

    pub fn get(&self, target: &PeerId) -> Option<f64> {
        self.0.get(target).copied()
    }

    pub fn targets(&self) -> impl Iterator<Item = &PeerId> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, f64)> {
        self.0.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical byte encoding used as digest input.
    ///
    /// JSON of the ordered map. BTreeMap iteration order is fixed, so every
    /// peer produces the same bytes for the same scores.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).expect("score map serialization cannot fail")
    }
}

impl TryFrom<BTreeMap<PeerId, f64>> for ScoreVector {
    type Error = ShoalError;

    fn try_from(map: BTreeMap<PeerId, f64>) -> Result<Self, Self::Error> {
        let mut scores = ScoreVector::new();
        for (target, score) in map {
            scores.insert(target, score)?;
        }
        Ok(scores)
    }
}

impl From<ScoreVector> for BTreeMap<PeerId, f64> {
    fn from(scores: ScoreVector) -> Self {
        scores.0
    }
}

/// A published commitment: the hash binding an author to a score vector and
/// salt without revealing them. Immutable once published; superseded only by
/// a later epoch's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub epoch: u64,
    pub author: PeerId,
    pub digest: [u8; 32],
    pub submitted_at: DateTime<Utc>,
}

/// The later disclosure of the salt and score vector behind a commitment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevealRecord {
    pub epoch: u64,
    pub author: PeerId,
    pub salt: [u8; SALT_LEN],
    pub scores: ScoreVector,
    pub submitted_at: DateTime<Utc>,
}

/// Liveness entry refreshed by its owning node under the `"nodes"` key.
/// Expires if not refreshed within `ttl_secs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLivenessEntry {
    pub peer: PeerId,
    pub last_heartbeat_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl NodeLivenessEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.last_heartbeat_at + Duration::seconds(self.ttl_secs as i64)
    }

    /// Whether this entry counts as live at `at`.
    pub fn is_live(&self, at: DateTime<Utc>) -> bool {
        at < self.expires_at()
    }
}

/// Outcome for one target peer in a settled epoch.
///
/// A target nobody validly scored yields `NoConsensus` — deliberately a
/// separate variant rather than a 0.0 score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TargetOutcome {
    Scored {
        /// Aggregate of all valid authors' scores for this target.
        score: f64,
        /// Fraction of authors within the tolerance band of the aggregate.
        agreement: f64,
        /// Number of valid scores aggregated.
        sample_size: usize,
    },
    NoConsensus,
}

/// Immutable per-epoch result of validation + aggregation, handed to the
/// external chain-submission collaborator and kept in the local archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSettlement {
    pub epoch: u64,
    pub settled_at: DateTime<Utc>,
    pub outcomes: BTreeMap<PeerId, TargetOutcome>,
}

impl EpochSettlement {
    /// The `(target, score, agreement)` tuples for targets that reached a
    /// consensus score, in stable target order.
    pub fn scored(&self) -> impl Iterator<Item = (&PeerId, f64, f64)> {
        self.outcomes.iter().filter_map(|(peer, outcome)| match outcome {
            TargetOutcome::Scored {
                score, agreement, ..
            } => Some((peer, *score, *agreement)),
            TargetOutcome::NoConsensus => None,
        })
    }
}
