//! # Prover Keys
//!
//! Ed25519 keypair used by the local proof backend to attest statements it
//! has checked. The verifying half is all a verifier needs; it can be
//! published alongside the node configuration.
//!
//! ## Security considerations
//!
//! - Signing keys are zeroized on drop (thanks, ed25519-dalek).
//! - Key generation uses `OsRng`.
//! - Key bytes are never logged.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors that can occur while loading key material.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: expected 32 bytes of hex")]
    InvalidSecretKey,
}

/// Signing key of a local prover.
///
/// Intentionally not `Serialize`: exporting the secret is an explicit act
/// through [`ProverKeypair::secret_hex`].
pub struct ProverKeypair {
    signing_key: SigningKey,
}

impl ProverKeypair {
    /// Generate a fresh keypair using the OS cryptographic RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Tests and fixtures only;
    /// a weak seed gives a weak key.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded 32-byte secret.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Hex-encoded secret key, for writing the key file at init time.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// The public half.
    pub fn verifying_key(&self) -> ProverPublicKey {
        ProverPublicKey(self.signing_key.verifying_key())
    }

    /// Sign a statement. Deterministic per RFC 8032.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Verifying key of a local prover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProverPublicKey(VerifyingKey);

impl ProverPublicKey {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// Check a 64-byte signature. Malformed input is simply `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        self.0.verify(message, &Signature::from_bytes(&bytes)).is_ok()
    }
}
