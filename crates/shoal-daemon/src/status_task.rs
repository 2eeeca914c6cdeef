// crates/shoal-daemon/src/status_task.rs
//
// Periodic operator status line, served from the same read-only query
// surface the external gateway consumes.

use std::time::Duration;

use chrono::Utc;

use shoal_consensus::QueryApi;

pub async fn run_status_loop(query: QueryApi, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Status task received shutdown signal");
                break;
            }
            _ = interval.tick() => {
                let now = Utc::now();
                let live = match query.live_nodes(now).await {
                    Ok(nodes) => nodes.len(),
                    Err(e) => {
                        tracing::warn!("status: could not read liveness entries: {}", e);
                        continue;
                    }
                };
                let settled = query.recent_settlements(1).await;
                match settled.first() {
                    Some(latest) => tracing::info!(
                        "status: {} live node(s), latest settled epoch {}",
                        live,
                        latest.epoch
                    ),
                    None => tracing::info!("status: {} live node(s), no settled epochs yet", live),
                }
            }
        }
    }
}
