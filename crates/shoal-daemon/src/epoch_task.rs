// crates/shoal-daemon/src/epoch_task.rs
//
// Epoch-driven commit-reveal task.
//
// Polls the engine on a short interval, waking early when a phase boundary
// is closer than the poll interval so transitions are not missed — store
// reads near boundaries are repeated rather than issued exactly once. Each
// settlement is recorded in the local archive and handed to the settlement
// sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use shoal_consensus::{CommitRevealEngine, EpochClock, SettlementArchive};
use shoal_core::traits::SettlementSink;

/// Extra wake-up slack past a phase boundary, so the first tick after the
/// boundary lands inside the new phase rather than on its edge.
const BOUNDARY_SLACK_MS: u64 = 250;

pub struct EpochTask {
    engine: CommitRevealEngine,
    clock: EpochClock,
    archive: Arc<RwLock<SettlementArchive>>,
    sink: Arc<dyn SettlementSink>,
    poll_interval: Duration,
}

impl EpochTask {
    pub fn new(
        engine: CommitRevealEngine,
        clock: EpochClock,
        archive: Arc<RwLock<SettlementArchive>>,
        sink: Arc<dyn SettlementSink>,
        poll_interval_secs: u64,
    ) -> Self {
        EpochTask {
            engine,
            clock,
            archive,
            sink,
            poll_interval: Duration::from_secs(poll_interval_secs),
        }
    }

    /// Run the epoch loop until shutdown.
    pub async fn run(mut self) {
        tracing::info!(
            "Epoch task started (poll={}s, peer={})",
            self.poll_interval.as_secs(),
            self.engine.peer_id()
        );

        loop {
            let sleep = self.next_sleep();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Epoch task received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(sleep) => {
                    self.tick_once().await;
                }
            }
        }
    }

    /// One engine tick. Store or clock failures degrade this round only;
    /// the engine's state is unchanged and the next tick retries.
    async fn tick_once(&mut self) {
        let now = Utc::now();
        match self.engine.tick(now).await {
            Ok(Some(settlement)) => {
                {
                    let mut archive = self.archive.write().await;
                    archive.insert(settlement.clone());
                }
                if let Err(e) = self.sink.submit(&settlement).await {
                    tracing::warn!("settlement sink failed for epoch {}: {}", settlement.epoch, e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("epoch tick failed: {} (retrying next poll)", e);
            }
        }
    }

    /// Sleep until the next poll, or just past the next phase boundary if
    /// that comes sooner.
    fn next_sleep(&self) -> Duration {
        let now = Utc::now();
        let until_boundary = match self.clock.next_boundary(now) {
            Ok(boundary) => (boundary - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .saturating_add(Duration::from_millis(BOUNDARY_SLACK_MS)),
            // Before genesis the boundary is undefined; fall back to the
            // poll interval (startup already rejected pre-genesis clocks).
            Err(_) => self.poll_interval,
        };

        until_boundary.min(self.poll_interval)
    }
}
