// crates/shoal-daemon/tests/epoch_flow.rs
//
// Integration tests for the Shoal commit-reveal epoch flow.
//
// Drives several peers' engines against one shared in-memory store through
// complete epochs: heartbeats, commitments, reveals, settlement, and the
// read-only query surface. These tests use the public APIs of the
// underlying library crates directly (shoal-consensus, shoal-store,
// shoal-core) since the daemon is a binary crate with no lib.rs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::RwLock;

use shoal_consensus::{
    AggregatorConfig, CommitRevealEngine, EngineState, EpochClock, HeartbeatTracker, QueryApi,
    SettlementArchive,
};
use shoal_core::crypto::Keypair;
use shoal_core::error::ShoalError;
use shoal_core::identity::PeerId;
use shoal_core::keys;
use shoal_core::records::{ScoreVector, TargetOutcome};
use shoal_core::traits::{ReplicatedStore, ScoreSource};
use shoal_store::{MemoryStore, StorePolicy};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Score source returning fixed per-target values, restricted to whatever
/// target set the engine asks about.
struct FixedScores(BTreeMap<PeerId, f64>);

impl ScoreSource for FixedScores {
    fn observe(&self, _epoch: u64, targets: &[PeerId]) -> Result<ScoreVector, ShoalError> {
        let mut scores = ScoreVector::new();
        for target in targets {
            if let Some(score) = self.0.get(target) {
                scores.insert(target.clone(), *score)?;
            }
        }
        Ok(scores)
    }
}

fn test_clock() -> EpochClock {
    let genesis = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    EpochClock::new(
        genesis,
        Duration::seconds(60),
        Duration::seconds(60),
        Duration::seconds(60),
        Duration::seconds(3),
    )
    .unwrap()
}

struct Peer {
    heartbeat: HeartbeatTracker,
    engine: CommitRevealEngine,
}

fn make_peer(
    store: &Arc<MemoryStore>,
    clock: EpochClock,
    keypair: Arc<Keypair>,
    scores: BTreeMap<PeerId, f64>,
) -> Peer {
    let store_dyn = store.clone() as Arc<dyn ReplicatedStore>;
    let heartbeat = HeartbeatTracker::new(store_dyn.clone(), keypair.clone(), 120);
    let engine = CommitRevealEngine::new(
        store_dyn,
        keypair,
        clock,
        heartbeat.clone(),
        Arc::new(FixedScores(scores)),
        AggregatorConfig::default(),
    );
    Peer { heartbeat, engine }
}

/// Times of interest inside one epoch.
struct EpochTimes {
    commit: DateTime<Utc>,
    reveal: DateTime<Utc>,
    settle: DateTime<Utc>,
}

fn times(clock: &EpochClock, epoch: u64) -> EpochTimes {
    let start = clock.epoch_start(epoch);
    EpochTimes {
        commit: start + Duration::seconds(10),
        reveal: start + Duration::seconds(70),
        settle: start + Duration::seconds(130),
    }
}

// ===========================================================================
// Test 1: Full three-peer epoch
// ===========================================================================

/// Three peers run a complete epoch. Every peer settles independently to
/// the same result, and the settlement lands in the archive behind the
/// query surface.
#[tokio::test]
async fn test_full_epoch_three_peers() {
    let clock = test_clock();
    let store = Arc::new(MemoryStore::with_policy(StorePolicy::for_epoch_secs(180)));

    let ka = Arc::new(Keypair::generate());
    let kb = Arc::new(Keypair::generate());
    let kc = Arc::new(Keypair::generate());
    let (ida, idb, idc) = (ka.peer_id(), kb.peer_id(), kc.peer_id());

    let mut peers = vec![
        make_peer(
            &store,
            clock,
            ka,
            BTreeMap::from([(idb.clone(), 0.9), (idc.clone(), 0.8)]),
        ),
        make_peer(
            &store,
            clock,
            kb,
            BTreeMap::from([(ida.clone(), 0.7), (idc.clone(), 0.6)]),
        ),
        make_peer(
            &store,
            clock,
            kc,
            BTreeMap::from([(ida.clone(), 0.5), (idb.clone(), 0.5)]),
        ),
    ];

    let epoch = 10u64;
    let t = times(&clock, epoch);

    // Commit phase: everyone heartbeats, then commits.
    for peer in &peers {
        assert!(peer.heartbeat.refresh(t.commit).await.unwrap());
    }
    for peer in &mut peers {
        peer.engine.tick(t.commit).await.unwrap();
        assert_eq!(peer.engine.state(), EngineState::Committed);
    }

    // Reveal phase.
    for peer in &mut peers {
        peer.engine.tick(t.reveal).await.unwrap();
        assert_eq!(peer.engine.state(), EngineState::Revealed);
    }

    // Settled phase: each peer settles independently and identically.
    let mut settlements = Vec::new();
    for peer in &mut peers {
        let settlement = peer.engine.tick(t.settle).await.unwrap().unwrap();
        assert_eq!(settlement.epoch, epoch);
        settlements.push(settlement);
    }
    assert_eq!(settlements[0].outcomes, settlements[1].outcomes);
    assert_eq!(settlements[1].outcomes, settlements[2].outcomes);

    // Mean aggregates with tolerance 0.1:
    //   a <- {0.7, 0.5} -> 0.6, both within band -> agreement 1.0
    //   b <- {0.9, 0.5} -> 0.7, neither within band -> agreement 0.0
    //   c <- {0.8, 0.6} -> 0.7, both on the band edge -> agreement 1.0
    let outcomes = &settlements[0].outcomes;
    match outcomes[&ida] {
        TargetOutcome::Scored {
            score,
            agreement,
            sample_size,
        } => {
            assert!((score - 0.6).abs() < 1e-10);
            assert_eq!(agreement, 1.0);
            assert_eq!(sample_size, 2);
        }
        _ => panic!("target a should be scored"),
    }
    match outcomes[&idb] {
        TargetOutcome::Scored { score, agreement, .. } => {
            assert!((score - 0.7).abs() < 1e-10);
            assert_eq!(agreement, 0.0);
        }
        _ => panic!("target b should be scored"),
    }
    match outcomes[&idc] {
        TargetOutcome::Scored { score, agreement, .. } => {
            assert!((score - 0.7).abs() < 1e-10);
            assert_eq!(agreement, 1.0);
        }
        _ => panic!("target c should be scored"),
    }

    // Each peer also published its settlement copy for observers.
    let published = store.get(keys::CONSENSUS, t.settle).await.unwrap();
    assert_eq!(published.len(), 3);

    // The query surface serves the archived settlement without touching
    // engine state.
    let archive = Arc::new(RwLock::new(SettlementArchive::new(5)));
    archive.write().await.insert(settlements[0].clone());
    let query = QueryApi::new(store.clone() as Arc<dyn ReplicatedStore>, archive);

    let recent = query.recent_settlements(3).await;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].epoch, epoch);

    let live = query.live_nodes(t.commit).await.unwrap();
    assert_eq!(live.len(), 3);
}

// ===========================================================================
// Test 2: A peer that goes dark drops out of the next epoch
// ===========================================================================

/// Peer C heartbeats in epoch 10 but not in epoch 11. In epoch 11 it is
/// neither a scorer nor a target: the settlement covers only A and B.
#[tokio::test]
async fn test_lapsed_peer_excluded_next_epoch() {
    let clock = test_clock();
    let store = Arc::new(MemoryStore::with_policy(StorePolicy::for_epoch_secs(180)));

    let ka = Arc::new(Keypair::generate());
    let kb = Arc::new(Keypair::generate());
    let kc = Arc::new(Keypair::generate());
    let (ida, idb, idc) = (ka.peer_id(), kb.peer_id(), kc.peer_id());

    let mut peers = vec![
        make_peer(
            &store,
            clock,
            ka,
            BTreeMap::from([(idb.clone(), 0.9), (idc.clone(), 0.8)]),
        ),
        make_peer(
            &store,
            clock,
            kb,
            BTreeMap::from([(ida.clone(), 0.7), (idc.clone(), 0.6)]),
        ),
        make_peer(
            &store,
            clock,
            kc,
            BTreeMap::from([(ida.clone(), 0.5), (idb.clone(), 0.5)]),
        ),
    ];

    // Epoch 10: everyone participates.
    let t10 = times(&clock, 10);
    for peer in &peers {
        peer.heartbeat.refresh(t10.commit).await.unwrap();
    }
    for peer in &mut peers {
        peer.engine.tick(t10.commit).await.unwrap();
    }
    for peer in &mut peers {
        peer.engine.tick(t10.reveal).await.unwrap();
    }
    for peer in &mut peers {
        assert!(peer.engine.tick(t10.settle).await.unwrap().is_some());
    }

    // Epoch 11: C's heartbeat lapses (ttl 120s, and 11's commit window is
    // 180s after 10's). Only A and B refresh.
    let t11 = times(&clock, 11);
    peers[0].heartbeat.refresh(t11.commit).await.unwrap();
    peers[1].heartbeat.refresh(t11.commit).await.unwrap();

    for peer in &mut peers[..2] {
        peer.engine.tick(t11.commit).await.unwrap();
        assert_eq!(peer.engine.state(), EngineState::Committed);
    }
    for peer in &mut peers[..2] {
        peer.engine.tick(t11.reveal).await.unwrap();
    }

    let settlement = peers[0].engine.tick(t11.settle).await.unwrap().unwrap();
    assert_eq!(settlement.epoch, 11);

    // C is no longer an eligible target: no outcome at all, not even
    // NoConsensus.
    assert_eq!(settlement.outcomes.len(), 2);
    assert!(!settlement.outcomes.contains_key(&idc));
    match settlement.outcomes[&ida] {
        TargetOutcome::Scored {
            score, sample_size, ..
        } => {
            assert!((score - 0.7).abs() < 1e-10);
            assert_eq!(sample_size, 1);
        }
        _ => panic!("target a should be scored"),
    }
    match settlement.outcomes[&idb] {
        TargetOutcome::Scored { score, .. } => assert!((score - 0.9).abs() < 1e-10),
        _ => panic!("target b should be scored"),
    }
}

// ===========================================================================
// Test 3: Commit-then-crash never reveals
// ===========================================================================

/// A peer that commits and then restarts (fresh engine, same identity and
/// store) must not reveal for that epoch: its salt and scores are gone,
/// and the settlement silently drops its commitment.
#[tokio::test]
async fn test_commit_then_restart_drops_reveal() {
    let clock = test_clock();
    let store = Arc::new(MemoryStore::with_policy(StorePolicy::for_epoch_secs(180)));

    let ka = Arc::new(Keypair::generate());
    let kb = Arc::new(Keypair::generate());
    let (ida, idb) = (ka.peer_id(), kb.peer_id());

    let mut a = make_peer(
        &store,
        clock,
        ka.clone(),
        BTreeMap::from([(idb.clone(), 0.9)]),
    );
    let mut b = make_peer(&store, clock, kb, BTreeMap::from([(ida.clone(), 0.7)]));

    let epoch = 20u64;
    let t = times(&clock, epoch);

    a.heartbeat.refresh(t.commit).await.unwrap();
    b.heartbeat.refresh(t.commit).await.unwrap();
    a.engine.tick(t.commit).await.unwrap();
    b.engine.tick(t.commit).await.unwrap();

    // A "crashes": a fresh engine with the same keypair and store.
    let mut a_restarted = make_peer(&store, clock, ka, BTreeMap::from([(idb.clone(), 0.9)]));

    a_restarted.engine.tick(t.reveal).await.unwrap();
    b.engine.tick(t.reveal).await.unwrap();

    // A's restarted engine stayed idle through the reveal window.
    assert_eq!(a_restarted.engine.state(), EngineState::Idle);
    let reveals = store.get(keys::REVEALS, t.reveal).await.unwrap();
    assert_eq!(reveals.len(), 1);
    assert!(reveals.contains_key(&idb));

    // Settlement counts only B's reveal; A's unrevealed commitment is a
    // silent drop, and A as a target is scored by B.
    let settlement = b.engine.tick(t.settle).await.unwrap().unwrap();
    match settlement.outcomes[&ida] {
        TargetOutcome::Scored {
            score, sample_size, ..
        } => {
            assert!((score - 0.7).abs() < 1e-10);
            assert_eq!(sample_size, 1);
        }
        _ => panic!("target a should be scored by b"),
    }
    // Nobody validly scored B (A never revealed).
    assert_eq!(settlement.outcomes[&idb], TargetOutcome::NoConsensus);
}

// ===========================================================================
// Test 4: Engines progress across consecutive epochs
// ===========================================================================

/// The same engines keep working over multiple epochs, and the archive
/// retains a bounded, queryable history.
#[tokio::test]
async fn test_multi_epoch_progression_and_archive() {
    let clock = test_clock();
    let store = Arc::new(MemoryStore::with_policy(StorePolicy::for_epoch_secs(180)));

    let ka = Arc::new(Keypair::generate());
    let kb = Arc::new(Keypair::generate());
    let (ida, idb) = (ka.peer_id(), kb.peer_id());

    let mut a = make_peer(&store, clock, ka, BTreeMap::from([(idb.clone(), 0.8)]));
    let mut b = make_peer(&store, clock, kb, BTreeMap::from([(ida.clone(), 0.4)]));

    let archive = Arc::new(RwLock::new(SettlementArchive::new(2)));

    for epoch in 30..33u64 {
        let t = times(&clock, epoch);

        a.heartbeat.refresh(t.commit).await.unwrap();
        b.heartbeat.refresh(t.commit).await.unwrap();

        a.engine.tick(t.commit).await.unwrap();
        b.engine.tick(t.commit).await.unwrap();
        a.engine.tick(t.reveal).await.unwrap();
        b.engine.tick(t.reveal).await.unwrap();

        let settlement = a.engine.tick(t.settle).await.unwrap().unwrap();
        assert_eq!(settlement.epoch, epoch);
        archive.write().await.insert(settlement);

        // B settles too; its result is discarded here but must succeed.
        assert!(b.engine.tick(t.settle).await.unwrap().is_some());
    }

    // Bounded to the two most recent epochs, newest first.
    let query = QueryApi::new(store.clone() as Arc<dyn ReplicatedStore>, archive);
    let recent = query.recent_settlements(10).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].epoch, 32);
    assert_eq!(recent[1].epoch, 31);
}
