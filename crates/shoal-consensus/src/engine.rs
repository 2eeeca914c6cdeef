// crates/shoal-consensus/src/engine.rs
//
// Commit-reveal engine for the Shoal subnet protocol.
//
// Per-epoch state machine driven by the epoch clock:
//
//   Idle -> Committed -> Revealed -> Settled
//
// At Commit-phase entry the engine scores the live peer set, publishes a
// salted commitment, and only then remembers the salt and scores. At
// Reveal-phase entry it discloses them — never without its own prior
// commitment, which is enforced by the engine's state rather than by the
// store. At Settled-phase entry any peer (participant or not) validates
// everyone's reveals against their commitments and aggregates the valid
// subset. A peer restarted mid-epoch recomputes its phase from the clock
// and skips windows that already elapsed instead of publishing late.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use shoal_core::crypto::{commitment_digest, generate_salt, Keypair, SALT_LEN};
use shoal_core::error::ShoalError;
use shoal_core::identity::PeerId;
use shoal_core::keys;
use shoal_core::records::{CommitmentRecord, EpochSettlement, NodeLivenessEntry, RevealRecord, ScoreVector};
use shoal_core::traits::{ReplicatedStore, ScoreSource, StoredEntry};
use shoal_core::SignedEnvelope;

use crate::aggregate::{aggregate_epoch, AggregatorConfig};
use crate::clock::{EpochClock, EpochPhase};
use crate::heartbeat::HeartbeatTracker;

/// Engine progress within the current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing published for this epoch yet.
    Idle,
    /// Our commitment is durably stored; salt and scores retained locally.
    Committed,
    /// Our reveal is published.
    Revealed,
    /// This epoch's reveals were validated and aggregated.
    Settled,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "Idle"),
            EngineState::Committed => write!(f, "Committed"),
            EngineState::Revealed => write!(f, "Revealed"),
            EngineState::Settled => write!(f, "Settled"),
        }
    }
}

/// The salt and scores behind our published commitment, held until reveal.
struct PendingCommit {
    epoch: u64,
    salt: [u8; SALT_LEN],
    scores: ScoreVector,
}

/// Drives one node's participation in the commit-reveal round and settles
/// epochs from the shared store.
pub struct CommitRevealEngine {
    store: Arc<dyn ReplicatedStore>,
    keypair: Arc<Keypair>,
    clock: EpochClock,
    heartbeat: HeartbeatTracker,
    score_source: Arc<dyn ScoreSource>,
    aggregator: AggregatorConfig,
    state: EngineState,
    current_epoch: Option<u64>,
    pending: Option<PendingCommit>,
}

impl CommitRevealEngine {
    pub fn new(
        store: Arc<dyn ReplicatedStore>,
        keypair: Arc<Keypair>,
        clock: EpochClock,
        heartbeat: HeartbeatTracker,
        score_source: Arc<dyn ScoreSource>,
        aggregator: AggregatorConfig,
    ) -> Self {
        CommitRevealEngine {
            store,
            keypair,
            clock,
            heartbeat,
            score_source,
            aggregator,
            state: EngineState::Idle,
            current_epoch: None,
            pending: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }

    /// Attempt a state transition, rejecting anything outside the
    /// Idle -> Committed -> Revealed chain (Settled is reachable from any
    /// state, since a peer settles epochs it did not participate in).
    fn transition(&mut self, new_state: EngineState) -> Result<(), ShoalError> {
        let valid = match (&self.state, &new_state) {
            (_, EngineState::Settled) => self.state != EngineState::Settled,
            (EngineState::Idle, EngineState::Committed) => true,
            (EngineState::Committed, EngineState::Revealed) => true,
            _ => false,
        };

        if valid {
            tracing::debug!("engine state: {} -> {}", self.state, new_state);
            self.state = new_state;
            Ok(())
        } else {
            Err(ShoalError::InvalidRecord(format!(
                "invalid engine transition: {} -> {}",
                self.state, new_state
            )))
        }
    }

    /// Advance the engine to `now`.
    ///
    /// Called periodically by the daemon's epoch task. Returns the epoch
    /// settlement when this tick performed settlement, `None` otherwise.
    /// Errors are store/clock failures; the caller logs them and retries
    /// on its next tick with the engine state unchanged.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<Option<EpochSettlement>, ShoalError> {
        let epoch = self.clock.epoch_at(now)?;
        let phase = self.clock.phase_at(now)?;

        if self.current_epoch != Some(epoch) {
            // New epoch (or first tick after start): per-epoch state resets.
            // An unrevealed pending commit from a previous epoch is dropped —
            // its reveal window is gone.
            self.current_epoch = Some(epoch);
            self.state = EngineState::Idle;
            self.pending = None;
        }

        match phase {
            EpochPhase::Commit => {
                if self.state == EngineState::Idle {
                    self.publish_commitment(now, epoch).await?;
                }
                Ok(None)
            }
            EpochPhase::Reveal => {
                match self.state {
                    EngineState::Committed => self.publish_reveal(now, epoch).await?,
                    EngineState::Idle => {
                        // Missed the commit window (late start or store
                        // trouble). Revealing now would be an unbacked
                        // reveal; sit this round out.
                        tracing::debug!("epoch {}: no commitment, skipping reveal", epoch);
                    }
                    _ => {}
                }
                Ok(None)
            }
            EpochPhase::Settled => {
                if self.state != EngineState::Settled {
                    let settlement = self.settle(now, epoch).await?;
                    return Ok(Some(settlement));
                }
                Ok(None)
            }
        }
    }

    /// Score the live peer set and publish a salted commitment.
    async fn publish_commitment(&mut self, now: DateTime<Utc>, epoch: u64) -> Result<(), ShoalError> {
        let me = self.peer_id();

        let mut targets = self.heartbeat.live_peers(now).await?;
        targets.retain(|peer| peer != &me);
        if targets.is_empty() {
            tracing::debug!("epoch {}: no live peers to score yet", epoch);
            return Ok(());
        }

        let scores = self.score_source.observe(epoch, &targets)?;
        let salt = generate_salt();
        let digest = commitment_digest(epoch, &me, &salt, &scores);

        let record = CommitmentRecord {
            epoch,
            author: me.clone(),
            digest,
            submitted_at: now,
        };
        let envelope = SignedEnvelope::seal(&self.keypair, &record, now)?;
        let expires_at = now + self.record_ttl();

        let accepted = self.store.put(keys::COMMITS, &me, envelope, expires_at).await?;
        if accepted {
            self.pending = Some(PendingCommit { epoch, salt, scores });
            self.transition(EngineState::Committed)?;
            tracing::info!("epoch {}: commitment published ({} targets)", epoch, targets.len());
        } else {
            tracing::warn!("epoch {}: commitment rejected by store", epoch);
        }
        Ok(())
    }

    /// Disclose the salt and scores behind our commitment.
    async fn publish_reveal(&mut self, now: DateTime<Utc>, epoch: u64) -> Result<(), ShoalError> {
        let me = self.peer_id();
        let Some(pending) = self.pending.as_ref().filter(|p| p.epoch == epoch) else {
            // Committed state without a matching pending commit cannot be
            // reached; treat defensively as "nothing to reveal".
            tracing::warn!("epoch {}: committed but no pending reveal data", epoch);
            return Ok(());
        };

        let record = RevealRecord {
            epoch,
            author: me.clone(),
            salt: pending.salt,
            scores: pending.scores.clone(),
            submitted_at: now,
        };
        let envelope = SignedEnvelope::seal(&self.keypair, &record, now)?;
        let expires_at = now + self.record_ttl();

        let accepted = self.store.put(keys::REVEALS, &me, envelope, expires_at).await?;
        if accepted {
            self.transition(EngineState::Revealed)?;
            tracing::info!("epoch {}: reveal published", epoch);
        } else {
            tracing::warn!("epoch {}: reveal rejected by store", epoch);
        }
        Ok(())
    }

    /// Validate everyone's reveals against their commitments and aggregate
    /// the valid subset into the epoch settlement.
    ///
    /// Settlement is a pure function of the observed store contents, so
    /// every peer performs it independently and redundantly; the external
    /// chain makes the binding determination.
    async fn settle(&mut self, now: DateTime<Utc>, epoch: u64) -> Result<EpochSettlement, ShoalError> {
        let commit_deadline = self.clock.phase_deadline(epoch, EpochPhase::Commit);

        // Eligibility is judged as of the commit deadline: a peer that went
        // dark after committing still gets its reveal counted, and a peer
        // that only appeared during reveal does not.
        let nodes = self.store.get(keys::NODES, commit_deadline).await?;
        let eligible = eligible_peers(&nodes, commit_deadline);

        let commits = self.store.get(keys::COMMITS, now).await?;
        let reveals = self.store.get(keys::REVEALS, now).await?;

        let valid = valid_reveals(&self.clock, epoch, &commits, &reveals, &eligible);
        let targets: Vec<PeerId> = eligible.iter().cloned().collect();
        let settlement = aggregate_epoch(epoch, &valid, &targets, &self.aggregator, now);

        tracing::info!(
            "epoch {}: settled with {} valid reveals over {} eligible peers",
            epoch,
            valid.len(),
            targets.len()
        );

        // Publish our copy of the settlement for external observers. Losing
        // this write degrades nothing — every peer derives the same result.
        let me = self.peer_id();
        let envelope = SignedEnvelope::seal(&self.keypair, &settlement, now)?;
        match self
            .store
            .put(keys::CONSENSUS, &me, envelope, now + self.record_ttl())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!("epoch {}: settlement write rejected", epoch),
            Err(e) => tracing::warn!("epoch {}: settlement write failed: {}", epoch, e),
        }

        self.transition(EngineState::Settled)?;
        Ok(settlement)
    }

    /// How long published records stay readable: five epochs of history,
    /// matching the store's expiration horizon for protocol keys.
    fn record_ttl(&self) -> chrono::Duration {
        self.clock.epoch_length() * 5
    }
}

/// Peers whose liveness entry was valid as of `at`.
fn eligible_peers(
    nodes: &BTreeMap<PeerId, StoredEntry>,
    at: DateTime<Utc>,
) -> BTreeSet<PeerId> {
    let mut eligible = BTreeSet::new();
    for (subkey, stored) in nodes {
        let entry: NodeLivenessEntry = match stored.envelope.open() {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("skipping malformed liveness entry from {}: {}", subkey, e);
                continue;
            }
        };
        if entry.peer == *subkey && entry.is_live(at) {
            eligible.insert(entry.peer);
        }
    }
    eligible
}

/// Build the valid reveal subset for one epoch.
///
/// A reveal survives only if its author was eligible at commit time, a
/// matching commitment exists, both records fall inside their phase
/// windows (grace-tolerant), and the recomputed digest equals the
/// committed one. Everything else is silently excluded — validation
/// failures are expected adversarial input, not errors.
pub fn valid_reveals(
    clock: &EpochClock,
    epoch: u64,
    commits: &BTreeMap<PeerId, StoredEntry>,
    reveals: &BTreeMap<PeerId, StoredEntry>,
    eligible: &BTreeSet<PeerId>,
) -> Vec<RevealRecord> {
    let mut valid = Vec::new();

    for (author, stored) in reveals {
        let reveal: RevealRecord = match stored.envelope.open() {
            Ok(reveal) => reveal,
            Err(e) => {
                tracing::debug!("epoch {}: malformed reveal from {}: {}", epoch, author, e);
                continue;
            }
        };

        if reveal.epoch != epoch || reveal.author != *author {
            tracing::debug!(
                "epoch {}: reveal from {} with mismatched epoch/author",
                epoch,
                author
            );
            continue;
        }

        if !eligible.contains(author) {
            tracing::debug!(
                "epoch {}: reveal from {} ineligible at commit time",
                epoch,
                author
            );
            continue;
        }

        let Some(commit_stored) = commits.get(author) else {
            tracing::debug!("epoch {}: reveal from {} without commitment", epoch, author);
            continue;
        };
        let commitment: CommitmentRecord = match commit_stored.envelope.open() {
            Ok(commitment) => commitment,
            Err(e) => {
                tracing::debug!("epoch {}: malformed commitment from {}: {}", epoch, author, e);
                continue;
            }
        };

        if commitment.epoch != epoch || commitment.author != *author {
            tracing::debug!(
                "epoch {}: commitment from {} with mismatched epoch/author",
                epoch,
                author
            );
            continue;
        }

        if !clock.within_phase(commitment.submitted_at, epoch, EpochPhase::Commit) {
            tracing::debug!("epoch {}: commitment from {} outside commit window", epoch, author);
            continue;
        }
        if !clock.within_phase(reveal.submitted_at, epoch, EpochPhase::Reveal) {
            tracing::debug!("epoch {}: reveal from {} outside reveal window", epoch, author);
            continue;
        }

        let digest = commitment_digest(epoch, author, &reveal.salt, &reveal.scores);
        if digest != commitment.digest {
            tracing::warn!(
                "epoch {}: reveal from {} does not match its commitment, excluding",
                epoch,
                author
            );
            continue;
        }

        valid.push(reveal);
    }

    valid
}
