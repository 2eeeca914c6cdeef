// crates/shoal-store/src/lib.rs
//
// shoal-store: replicated key/subkey store backends for the Shoal subnet
// protocol.
//
// `MemoryStore` is the deterministic in-process backend used in tests and
// standalone runs; `RelayStore` layers HTTP push/pull replication on top of
// it for multi-peer deployments.

pub mod memory;
pub mod relay;

pub use memory::{KeyPolicy, MemoryStore, StorePolicy};
pub use relay::{RelayPeerState, RelayStore};
