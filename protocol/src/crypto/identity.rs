//! # Identity Secrets
//!
//! The only private input of the whole scheme. An identity secret is an
//! opaque byte string generated once when the identity is created and
//! destroyed with it. It determines every nullifier the identity can
//! produce, so it is:
//!
//! - never serialized by this crate (no `Serialize` impl on purpose),
//! - never printed (`Debug` is redacted),
//! - zeroized when dropped.
//!
//! The only exits are the one-way outputs in [`super::hash`] and the
//! private-input channel to a proof backend.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::RlnError;

/// Length of freshly generated secrets.
pub const IDENTITY_SECRET_LENGTH: usize = 32;

/// Opaque secret owned by a single group participant.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct IdentitySecret {
    bytes: Vec<u8>,
}

impl IdentitySecret {
    /// Generate a fresh secret from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; IDENTITY_SECRET_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wrap existing secret material. Empty secrets are rejected.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, RlnError> {
        if bytes.is_empty() {
            return Err(RlnError::InvalidInput("identity secret must not be empty".into()));
        }
        Ok(Self { bytes })
    }

    /// Parse a hex-encoded secret (as handed over by a UI layer).
    pub fn from_hex(s: &str) -> Result<Self, RlnError> {
        let bytes = hex::decode(s.trim())
            .map_err(|_| RlnError::InvalidInput("identity secret is not valid hex".into()))?;
        Self::from_bytes(bytes)
    }

    /// Raw secret bytes. Callers must not log or persist the result.
    pub fn expose_secret(&self) -> &[u8] {
        &self.bytes
    }

    /// Hex encoding for the private-input channel of a proof backend.
    pub(crate) fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for IdentitySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentitySecret(<redacted>)")
    }
}
