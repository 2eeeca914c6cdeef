// crates/shoal-daemon/src/main.rs
//
// Binary entrypoint for the Shoal subnet daemon.
//
// Initializes tracing, parses CLI arguments, loads configuration, checks
// the epoch clock against local time, constructs the replicated store and
// identity, and spawns the heartbeat, status, and epoch tasks.

mod config;
mod epoch_task;
mod heartbeat_task;
mod scores;
mod sink;
mod status_task;

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tokio::sync::RwLock;

use config::DaemonConfig;
use epoch_task::EpochTask;
use scores::UniformScores;
use sink::LogSink;

use shoal_consensus::{CommitRevealEngine, HeartbeatTracker, QueryApi, SettlementArchive};
use shoal_core::crypto::Keypair;
use shoal_core::traits::ReplicatedStore;
use shoal_store::{MemoryStore, RelayStore, StorePolicy};

/// Shoal subnet daemon — heartbeat, commit-reveal, and settlement tasks.
#[derive(Parser, Debug)]
#[command(name = "shoal-daemon", version = "0.1.0", about = "Shoal subnet node daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "~/.shoal/config.toml")]
    config: String,
}

/// Interval of the operator status line, seconds.
const STATUS_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber for structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration from TOML file, falling back to defaults if the
    // file is not found.
    let config_path = expand_tilde(&args.config);
    let config = match DaemonConfig::load(&config_path) {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", config_path);
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "Could not load config from {}: {}. Using defaults.",
                config_path,
                e
            );
            DaemonConfig::default()
        }
    };
    config.validate()?;

    let clock = config.clock()?;

    // A local clock before genesis is a configuration error, not epoch 0.
    let now = Utc::now();
    let epoch = clock.epoch_at(now)?;
    let phase = clock.phase_at(now)?;

    tracing::info!("Shoal Daemon v0.1.0");
    tracing::info!(
        "Epoch windows: commit={}s reveal={}s settle={}s (grace={}s)",
        config.commit_window_secs,
        config.reveal_window_secs,
        config.settle_window_secs,
        config.grace_secs
    );
    tracing::info!("Starting in epoch {} ({:?} phase)", epoch, phase);

    let keypair = Arc::new(load_keypair(&config));
    tracing::info!("Peer id: {}", keypair.peer_id());

    // Local store, optionally wrapped in the HTTP relay when peers are
    // configured.
    let memory = Arc::new(MemoryStore::with_policy(StorePolicy::for_epoch_secs(
        config.epoch_secs(),
    )));
    let store: Arc<dyn ReplicatedStore> = if config.peers.is_empty() {
        tracing::info!("No relay peers configured; running on the local store only");
        memory
    } else {
        tracing::info!("Store relay enabled: {} peer(s) configured", config.peers.len());
        let relay = Arc::new(RelayStore::new(memory, config.peers.clone()));
        tokio::spawn(
            relay
                .clone()
                .run_pull_loop(config.relay_pull_interval_secs),
        );
        relay
    };

    let heartbeat = HeartbeatTracker::new(store.clone(), keypair.clone(), config.heartbeat_ttl_secs);
    let archive = Arc::new(RwLock::new(SettlementArchive::new(config.archive_epochs)));
    let query = QueryApi::new(store.clone(), archive.clone());

    let engine = CommitRevealEngine::new(
        store,
        keypair,
        clock,
        heartbeat.clone(),
        Arc::new(UniformScores::default()),
        config.aggregator(),
    );

    // Spawn heartbeat refresh and status loops.
    tokio::spawn(heartbeat_task::run_heartbeat_loop(
        heartbeat,
        config.heartbeat_interval_secs,
    ));
    tokio::spawn(status_task::run_status_loop(query, STATUS_INTERVAL_SECS));

    // Run the epoch task in the foreground until shutdown.
    let task = EpochTask::new(engine, clock, archive, Arc::new(LogSink), config.epoch_poll_secs);
    task.run().await;

    tracing::info!("Shoal daemon shut down gracefully");
    Ok(())
}

/// Load the node keypair from the configured hex key file.
///
/// Generating identity files is handled by external tooling; when no key
/// file is present the daemon runs with a fresh ephemeral identity.
fn load_keypair(config: &DaemonConfig) -> Keypair {
    let key_path = expand_tilde(&config.key_path);

    match std::fs::read_to_string(&key_path) {
        Ok(hex_str) => match hex::decode(hex_str.trim()) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut secret = [0u8; 32];
                secret.copy_from_slice(&bytes);
                tracing::info!("Loaded signing key from {}", key_path);
                Keypair::from_secret_bytes(&secret)
            }
            _ => {
                tracing::warn!(
                    "Invalid signing key at {}; generating an ephemeral identity",
                    key_path
                );
                Keypair::generate()
            }
        },
        Err(_) => {
            tracing::warn!(
                "No signing key at {}; generating an ephemeral identity for this run",
                key_path
            );
            Keypair::generate()
        }
    }
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}
