//! # Proof Backends
//!
//! The engine treats "generate a proof" and "verify a proof" as a
//! capability supplied by a [`ProofBackend`]. Two implementations conform
//! to the same contract and are chosen once, from configuration:
//!
//! ```text
//! local.rs: embedded prover; Ed25519-attested statements, random blinding
//! remote.rs: HTTP client for an external proof service, retry + fallback
//! wire.rs: JSON bodies of the proof service protocol
//! ```
//!
//! ## Public signals
//!
//! Every `membership_rln` statement carries exactly four public signals,
//! each the hex of a canonical 32-byte BN254 scalar:
//!
//! ```text
//! [ nullifier, epoch, content_commitment, group ]
//! ```
//!
//! `verify` checks this shape first and rejects malformed signals before
//! any cryptographic work.

pub mod local;
pub mod remote;
pub mod wire;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ProofBackendConfig, PUBLIC_SIGNAL_COUNT};
use crate::crypto::hash::{epoch_element, epoch_from_element, field_from_bytes, group_element};
use crate::crypto::IdentitySecret;
use crate::error::{RlnError, RlnResult};
use crate::types::{Commitment, Epoch, GroupId, Nullifier};

pub use local::LocalBackend;
pub use remote::RemoteBackend;

// ---------------------------------------------------------------------------
// Statement
// ---------------------------------------------------------------------------

/// Typed public statement of an RLN proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicSignals {
    pub nullifier: Nullifier,
    pub epoch: Epoch,
    pub content_commitment: Commitment,
    pub group: [u8; 32],
}

impl PublicSignals {
    pub fn new(
        nullifier: Nullifier,
        epoch: Epoch,
        content_commitment: Commitment,
        group: &GroupId,
    ) -> Self {
        Self {
            nullifier,
            epoch,
            content_commitment,
            group: group_element(group),
        }
    }

    /// Field elements in wire order.
    fn elements(&self) -> [[u8; 32]; PUBLIC_SIGNAL_COUNT] {
        [
            self.nullifier.0,
            epoch_element(self.epoch),
            self.content_commitment.0,
            self.group,
        ]
    }

    /// Hex strings in wire order.
    pub fn to_strings(&self) -> Vec<String> {
        self.elements().iter().map(hex::encode).collect()
    }

    /// Concatenated canonical encodings; what a prover attests to.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.elements().concat()
    }

    /// Structural validation of wire signals: exact count, each a canonical
    /// field element, epoch within `u64`.
    pub fn parse(signals: &[String]) -> RlnResult<Self> {
        if signals.len() != PUBLIC_SIGNAL_COUNT {
            return Err(RlnError::InvalidInput(format!(
                "expected {PUBLIC_SIGNAL_COUNT} public signals, got {}",
                signals.len()
            )));
        }

        let mut elements = [[0u8; 32]; PUBLIC_SIGNAL_COUNT];
        for (i, (signal, slot)) in signals.iter().zip(elements.iter_mut()).enumerate() {
            let bytes = hex::decode(signal)
                .map_err(|_| RlnError::InvalidInput(format!("public signal {i} is not hex")))?;
            let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                RlnError::InvalidInput(format!("public signal {i} is not 32 bytes"))
            })?;
            if field_from_bytes(&arr).is_none() {
                return Err(RlnError::InvalidInput(format!(
                    "public signal {i} is not a canonical field element"
                )));
            }
            *slot = arr;
        }

        let epoch = epoch_from_element(&elements[1])
            .ok_or_else(|| RlnError::InvalidInput("epoch signal exceeds u64".into()))?;

        Ok(Self {
            nullifier: Nullifier(elements[0]),
            epoch,
            content_commitment: Commitment(elements[2]),
            group: elements[3],
        })
    }
}

/// Private witness of an RLN proof. Never leaves the prover except to a
/// configured remote proof service.
#[derive(Debug, Clone)]
pub struct PrivateInputs {
    pub identity_secret: IdentitySecret,
    pub epoch: Epoch,
    pub group: GroupId,
    pub content_commitment: Commitment,
}

// ---------------------------------------------------------------------------
// Artifact
// ---------------------------------------------------------------------------

/// Which prover produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProverKind {
    Local,
    Remote,
}

impl fmt::Display for ProverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProverKind::Local => f.write_str("local"),
            ProverKind::Remote => f.write_str("remote"),
        }
    }
}

/// Opaque proof plus the public signals it was produced for. Not mutated
/// after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArtifact {
    pub circuit_id: String,
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
    pub public_signals: Vec<String>,
    pub prover: ProverKind,
}

/// Reported by [`ProofBackend::health`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: String,
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// A proving system, local or remote.
///
/// `verify` must be a pure function of its arguments. Malformed signals and
/// a rejected proof are `Ok(false)`; `Err` is reserved for a backend that
/// could not answer (or a circuit it does not serve).
#[async_trait]
pub trait ProofBackend: Send + Sync + fmt::Debug {
    /// Short name for logs and metrics.
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        circuit_id: &str,
        private: &PrivateInputs,
        public: &PublicSignals,
    ) -> RlnResult<ProofArtifact>;

    async fn verify(
        &self,
        circuit_id: &str,
        artifact: &ProofArtifact,
        public_signals: &[String],
    ) -> RlnResult<bool>;

    async fn health(&self) -> RlnResult<BackendHealth>;

    /// Circuit identifiers this backend serves.
    async fn circuits(&self) -> RlnResult<Vec<String>>;
}

/// Construct the configured backend. The local backend doubles as the
/// fallback prover of a remote backend configured with `fallback = local`.
pub fn build_backend(
    config: &ProofBackendConfig,
    local: Arc<LocalBackend>,
) -> RlnResult<Arc<dyn ProofBackend>> {
    match config {
        ProofBackendConfig::Local => Ok(local),
        ProofBackendConfig::Remote(remote) => Ok(Arc::new(RemoteBackend::new(remote, local)?)),
    }
}

/// Proof bytes travel as lowercase hex.
pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}
