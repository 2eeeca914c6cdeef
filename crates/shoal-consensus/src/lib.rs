// crates/shoal-consensus/src/lib.rs
//
// shoal-consensus: epoch clock, commit-reveal engine, heartbeat tracking,
// and score aggregation for the Shoal subnet protocol.
//
// This crate implements the epoch-scoped commit-reveal round over the
// replicated store: when to commit and reveal, which reveals are valid,
// and how valid reveals become per-peer consensus scores.

pub mod aggregate;
pub mod clock;
pub mod engine;
pub mod heartbeat;
pub mod query;

pub use aggregate::{aggregate_epoch, AggregationMethod, AggregatorConfig};
pub use clock::{EpochClock, EpochPhase};
pub use engine::{valid_reveals, CommitRevealEngine, EngineState};
pub use heartbeat::HeartbeatTracker;
pub use query::{QueryApi, SettlementArchive};
