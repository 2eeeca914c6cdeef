// crates/shoal-daemon/src/sink.rs
//
// Settlement sink shipped with the daemon.
//
// The real chain-submission client is an external collaborator; this sink
// logs each settled epoch's consensus tuples so operators can observe the
// protocol without one.

use async_trait::async_trait;

use shoal_core::error::ShoalError;
use shoal_core::records::{EpochSettlement, TargetOutcome};
use shoal_core::traits::SettlementSink;

pub struct LogSink;

#[async_trait]
impl SettlementSink for LogSink {
    async fn submit(&self, settlement: &EpochSettlement) -> Result<(), ShoalError> {
        for (target, score, agreement) in settlement.scored() {
            tracing::info!(
                "epoch {} consensus: target={} score={:.4} agreement={:.2}",
                settlement.epoch,
                target,
                score,
                agreement
            );
        }

        let no_consensus = settlement
            .outcomes
            .values()
            .filter(|outcome| matches!(outcome, TargetOutcome::NoConsensus))
            .count();
        if no_consensus > 0 {
            tracing::info!(
                "epoch {} consensus: {} target(s) without a consensus score",
                settlement.epoch,
                no_consensus
            );
        }

        Ok(())
    }
}
