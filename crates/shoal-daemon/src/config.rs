// crates/shoal-daemon/src/config.rs
//
// Runtime configuration for the Shoal daemon.
// Loaded from a TOML file or populated with sensible defaults.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::fs;

use shoal_consensus::{AggregationMethod, AggregatorConfig, EpochClock};
use shoal_core::error::ShoalError;

/// Runtime configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Protocol genesis as a unix timestamp (seconds). All peers must share
    /// this value or their epoch clocks will disagree.
    #[serde(default = "default_genesis_unix")]
    pub genesis_unix: i64,

    /// Commit window length in seconds.
    #[serde(default = "default_commit_window_secs")]
    pub commit_window_secs: u64,

    /// Reveal window length in seconds.
    #[serde(default = "default_reveal_window_secs")]
    pub reveal_window_secs: u64,

    /// Settlement window length in seconds.
    #[serde(default = "default_settle_window_secs")]
    pub settle_window_secs: u64,

    /// Clock-skew grace applied when validating peers' record timestamps.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Heartbeat refresh interval. Must be strictly shorter than the ttl.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Heartbeat time-to-live: liveness lapses this long after the last
    /// refresh.
    #[serde(default = "default_heartbeat_ttl_secs")]
    pub heartbeat_ttl_secs: u64,

    /// How per-target scores are aggregated: "mean" or "median".
    #[serde(default = "default_aggregation")]
    pub aggregation: AggregationMethod,

    /// Half-width of the agreement band around the aggregate.
    #[serde(default = "default_agreement_tolerance")]
    pub agreement_tolerance: f64,

    /// How many settled epochs the local archive retains for queries.
    #[serde(default = "default_archive_epochs")]
    pub archive_epochs: usize,

    /// Store-relay peer URLs. When empty (default), the node runs on its
    /// local store only.
    #[serde(default)]
    pub peers: Vec<String>,

    /// Interval for the relay pull loop, seconds.
    #[serde(default = "default_relay_pull_interval_secs")]
    pub relay_pull_interval_secs: u64,

    /// Polling interval for the epoch task, seconds. The task wakes early
    /// near phase boundaries regardless.
    #[serde(default = "default_epoch_poll_secs")]
    pub epoch_poll_secs: u64,

    /// Path to the hex-encoded ed25519 signing key file.
    #[serde(default = "default_key_path")]
    pub key_path: String,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_genesis_unix() -> i64 {
    // 2025-01-01T00:00:00Z
    1_735_689_600
}

fn default_commit_window_secs() -> u64 {
    60
}

fn default_reveal_window_secs() -> u64 {
    60
}

fn default_settle_window_secs() -> u64 {
    60
}

fn default_grace_secs() -> u64 {
    3
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_heartbeat_ttl_secs() -> u64 {
    30
}

fn default_aggregation() -> AggregationMethod {
    AggregationMethod::Mean
}

fn default_agreement_tolerance() -> f64 {
    0.1
}

fn default_archive_epochs() -> usize {
    5
}

fn default_relay_pull_interval_secs() -> u64 {
    30
}

fn default_epoch_poll_secs() -> u64 {
    5
}

fn default_key_path() -> String {
    "~/.shoal/hotkey".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            genesis_unix: default_genesis_unix(),
            commit_window_secs: default_commit_window_secs(),
            reveal_window_secs: default_reveal_window_secs(),
            settle_window_secs: default_settle_window_secs(),
            grace_secs: default_grace_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_ttl_secs: default_heartbeat_ttl_secs(),
            aggregation: default_aggregation(),
            agreement_tolerance: default_agreement_tolerance(),
            archive_epochs: default_archive_epochs(),
            peers: Vec::new(),
            relay_pull_interval_secs: default_relay_pull_interval_secs(),
            epoch_poll_secs: default_epoch_poll_secs(),
            key_path: default_key_path(),
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn genesis(&self) -> Result<DateTime<Utc>, ShoalError> {
        Utc.timestamp_opt(self.genesis_unix, 0)
            .single()
            .ok_or_else(|| {
                ShoalError::Clock(format!("invalid genesis timestamp {}", self.genesis_unix))
            })
    }

    /// Build the epoch clock from the configured windows.
    pub fn clock(&self) -> Result<EpochClock, ShoalError> {
        EpochClock::new(
            self.genesis()?,
            Duration::seconds(self.commit_window_secs as i64),
            Duration::seconds(self.reveal_window_secs as i64),
            Duration::seconds(self.settle_window_secs as i64),
            Duration::seconds(self.grace_secs as i64),
        )
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            method: self.aggregation,
            tolerance: self.agreement_tolerance,
        }
    }

    /// Full epoch length in seconds, for store policy scaling.
    pub fn epoch_secs(&self) -> u64 {
        self.commit_window_secs + self.reveal_window_secs + self.settle_window_secs
    }

    /// Reject configurations that cannot work: a heartbeat interval at or
    /// above the ttl would flap nodes out of eligibility on every missed
    /// refresh.
    pub fn validate(&self) -> Result<(), ShoalError> {
        if self.heartbeat_interval_secs >= self.heartbeat_ttl_secs {
            return Err(ShoalError::Clock(format!(
                "heartbeat_interval_secs ({}) must be strictly shorter than heartbeat_ttl_secs ({})",
                self.heartbeat_interval_secs, self.heartbeat_ttl_secs
            )));
        }
        if !(0.0..=1.0).contains(&self.agreement_tolerance) {
            return Err(ShoalError::Clock(format!(
                "agreement_tolerance ({}) must be within [0.0, 1.0]",
                self.agreement_tolerance
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaemonConfig::default();
        config.validate().unwrap();
        config.clock().unwrap();
        assert_eq!(config.epoch_secs(), 180);
    }

    #[test]
    fn test_heartbeat_interval_must_undershoot_ttl() {
        let config = DaemonConfig {
            heartbeat_interval_secs: 30,
            heartbeat_ttl_secs: 30,
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: DaemonConfig = toml::from_str(
            r#"
            commit_window_secs = 120
            aggregation = "median"
            peers = ["http://10.0.0.2:7700"]
            "#,
        )
        .unwrap();

        assert_eq!(config.commit_window_secs, 120);
        assert_eq!(config.aggregation, AggregationMethod::Median);
        assert_eq!(config.peers.len(), 1);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.reveal_window_secs, 60);
    }
}
