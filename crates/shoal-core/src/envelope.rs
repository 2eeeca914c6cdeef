// crates/shoal-core/src/envelope.rs
//
// Owner-signed payloads for the replicated store.
//
// Every value a peer writes travels inside a SignedEnvelope: the payload,
// the author's peer id and public key, the author's claimed timestamp, and
// an ed25519 signature over all of it. The store verifies the signature and
// the key-to-peer-id binding before accepting a write, so no peer can
// overwrite another peer's record under the same subkey. The embedded
// timestamp is also what last-writer-wins resolution compares — never the
// store's receipt order.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::{verify_signature, Keypair};
use crate::error::ShoalError;
use crate::identity::PeerId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEnvelope {
    pub author: PeerId,
    pub public_key: [u8; 32],
    /// The author's claimed write time. Used for last-writer-wins.
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub signature: Vec<u8>,
}

impl SignedEnvelope {
    /// Serialize and sign a payload, producing an envelope authored by the
    /// given keypair's peer id.
    pub fn seal<T: Serialize>(
        keypair: &Keypair,
        payload: &T,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ShoalError> {
        let author = keypair.peer_id();
        let public_key = keypair.public_key_bytes();
        let payload = serde_json::to_value(payload)?;
        let message = signing_bytes(&author, timestamp, &payload)?;
        let signature = keypair.sign(&message);

        Ok(SignedEnvelope {
            author,
            public_key,
            timestamp,
            payload,
            signature,
        })
    }

    /// Check the key-to-peer-id binding and the signature.
    pub fn verify(&self) -> Result<(), ShoalError> {
        if PeerId::from_public_key(&self.public_key) != self.author {
            return Err(ShoalError::InvalidRecord(format!(
                "envelope author {} does not match its public key",
                self.author
            )));
        }

        let message = signing_bytes(&self.author, self.timestamp, &self.payload)?;
        if !verify_signature(&self.public_key, &message, &self.signature)? {
            return Err(ShoalError::InvalidRecord(format!(
                "bad signature on envelope from {}",
                self.author
            )));
        }
        Ok(())
    }

    /// Deserialize the payload into a concrete record type.
    pub fn open<T: DeserializeOwned>(&self) -> Result<T, ShoalError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Canonical bytes covered by the signature. The timestamp is rendered as
/// RFC 3339 so the encoding is identical on every peer.
fn signing_bytes(
    author: &PeerId,
    timestamp: DateTime<Utc>,
    payload: &serde_json::Value,
) -> Result<Vec<u8>, ShoalError> {
    Ok(serde_json::to_vec(&(
        author.as_str(),
        timestamp.to_rfc3339(),
        payload,
    ))?)
}
