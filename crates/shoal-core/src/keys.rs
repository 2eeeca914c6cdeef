// crates/shoal-core/src/keys.rs
//
// Well-known keys in the replicated store. Each peer writes only under its
// own subkey (= its peer id); records embed their epoch and readers filter
// by it.

/// Liveness entries, refreshed by each node's heartbeat.
pub const NODES: &str = "nodes";

/// Commitment records for the current commit-reveal round.
pub const COMMITS: &str = "commits";

/// Reveal records matching earlier commitments.
pub const REVEALS: &str = "reveals";

/// Published per-epoch settlements.
pub const CONSENSUS: &str = "consensus";
