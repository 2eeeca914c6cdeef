// crates/shoal-core/src/identity.rs

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Stable identifier of a peer on the subnet.
///
/// Derived from the peer's ed25519 public key (hex of the key's SHA-256,
/// truncated), so a peer cannot claim an id it does not hold the key for.
/// Tests construct arbitrary ids directly with [`PeerId::new`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        PeerId(id.into())
    }

    /// Derive the peer id from an ed25519 public key.
    pub fn from_public_key(public_key: &[u8; 32]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(public_key);
        let digest = hasher.finalize();
        PeerId(format!("shoal1{}", hex::encode(&digest[..20])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_from_public_key_is_stable() {
        let key = [3u8; 32];
        assert_eq!(PeerId::from_public_key(&key), PeerId::from_public_key(&key));
        assert_ne!(
            PeerId::from_public_key(&key),
            PeerId::from_public_key(&[4u8; 32])
        );
    }

    #[test]
    fn test_peer_id_ordering_is_stable() {
        let mut ids = vec![PeerId::new("c"), PeerId::new("a"), PeerId::new("b")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
        assert_eq!(ids[2].as_str(), "c");
    }
}
