// crates/shoal-core/src/crypto.rs

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::ShoalError;
use crate::identity::PeerId;
use crate::records::ScoreVector;

/// Byte width of the commitment salt.
pub const SALT_LEN: usize = 16;

/// An ed25519 keypair for signing and verification.
pub struct Keypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Keypair {
    /// Generate a new random ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Keypair {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct a keypair from the 32-byte signing key.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Keypair {
            signing_key,
            verifying_key,
        }
    }

    /// Get the public key bytes (32 bytes).
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// The peer id derived from this keypair's public key.
    pub fn peer_id(&self) -> PeerId {
        PeerId::from_public_key(&self.public_key_bytes())
    }

    /// Sign a message and return the signature bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature = self.signing_key.sign(message);
        signature.to_bytes().to_vec()
    }
}

/// Verify an ed25519 signature.
///
/// Returns `true` if the signature is valid for the given message and public key.
pub fn verify_signature(
    public_key_bytes: &[u8; 32],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<bool, ShoalError> {
    let verifying_key = VerifyingKey::from_bytes(public_key_bytes)
        .map_err(|e| ShoalError::Crypto(format!("Invalid public key: {}", e)))?;

    let signature_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| ShoalError::Crypto("Signature must be exactly 64 bytes".to_string()))?;

    let signature = ed25519_dalek::Signature::from_bytes(&signature_array);

    match verifying_key.verify(message, &signature) {
        Ok(()) => Ok(true),
        Err(_) => Ok(false),
    }
}

/// Compute SHA-256 hash of the given bytes.
///
/// Returns a 32-byte hash.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Draw a fresh random commitment salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Compute the commitment digest binding an author to a score vector.
///
/// The digest covers the epoch, the author's peer id, the salt, and the
/// canonical encoding of the score vector. Every peer recomputes this exact
/// hash when checking a reveal against its earlier commitment, so the input
/// encoding must be identical on all nodes.
pub fn commitment_digest(
    epoch: u64,
    author: &PeerId,
    salt: &[u8; SALT_LEN],
    scores: &ScoreVector,
) -> [u8; 32] {
    let mut data = Vec::new();
    data.extend_from_slice(&epoch.to_be_bytes());
    data.extend_from_slice(author.as_str().as_bytes());
    data.extend_from_slice(salt);
    data.extend_from_slice(&scores.canonical_bytes());
    hash_bytes(&data)
}
