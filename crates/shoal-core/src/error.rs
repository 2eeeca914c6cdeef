use thiserror::Error;

/// Protocol-wide error types for Shoal.
#[derive(Debug, Error)]
pub enum ShoalError {
    /// Replicated store error (put/get failed, relay unreachable).
    #[error("Store error: {0}")]
    Store(String),

    /// Cryptographic error (key handling, signing, verification).
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Clock/configuration error (e.g. local time before genesis).
    #[error("Clock error: {0}")]
    Clock(String),

    /// A record failed validation (out-of-range score, bad owner, late write).
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl From<serde_json::Error> for ShoalError {
    fn from(e: serde_json::Error) -> Self {
        ShoalError::Serialization(e.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for ShoalError {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        ShoalError::Crypto(e.to_string())
    }
}
