// crates/shoal-daemon/src/heartbeat_task.rs
//
// Periodic heartbeat refresh task.
//
// Re-publishes this node's liveness entry on a fixed interval strictly
// shorter than the entry's ttl, so one missed refresh never flaps the node
// out of eligibility. Failures degrade a single round and are retried on
// the next tick.

use chrono::Utc;
use std::time::Duration;

use shoal_consensus::HeartbeatTracker;

/// Run the heartbeat refresh loop until shutdown.
pub async fn run_heartbeat_loop(tracker: HeartbeatTracker, interval_secs: u64) {
    tracing::info!(
        "Heartbeat task started (interval={}s, peer={})",
        interval_secs,
        tracker.peer_id()
    );

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Heartbeat task received shutdown signal");
                break;
            }
            _ = interval.tick() => {
                let now = Utc::now();
                match tracker.refresh(now).await {
                    Ok(true) => tracing::trace!("heartbeat refreshed"),
                    Ok(false) => tracing::warn!("heartbeat rejected by store"),
                    Err(e) => tracing::warn!("heartbeat refresh failed: {} (retrying next interval)", e),
                }
            }
        }
    }
}
