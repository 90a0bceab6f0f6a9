//! # Local Proof Backend
//!
//! Self-contained prover for development, tests, and as the fallback of a
//! remote backend. It produces an *attested statement*, not a
//! zero-knowledge proof:
//!
//! 1. The witness is checked against the statement. The nullifier and the
//!    content commitment are re-derived from the private inputs and must
//!    match the public signals, and the group must hash to the group signal.
//! 2. The prover key signs `circuit_id ‖ 0x00 ‖ signals ‖ blinding`, where
//!    `blinding` is 32 fresh random bytes.
//!
//! ```text
//! proof = signature (64 bytes) ‖ blinding (32 bytes)
//! ```
//!
//! The blinding makes every artifact distinct but never touches the public
//! signals or the verification outcome. Verification needs only the
//! verifying key and is a pure function of `(artifact, signals)`.

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use super::{BackendHealth, PrivateInputs, ProofArtifact, ProofBackend, ProverKind, PublicSignals};
use crate::config::RLN_CIRCUIT_ID;
use crate::crypto::hash::group_element;
use crate::crypto::{derive_nullifier, ProverKeypair, ProverPublicKey};
use crate::error::{RlnError, RlnResult};

const SIGNATURE_LENGTH: usize = 64;
const BLINDING_LENGTH: usize = 32;
const PROOF_LENGTH: usize = SIGNATURE_LENGTH + BLINDING_LENGTH;

/// Embedded prover and verifier.
pub struct LocalBackend {
    keypair: ProverKeypair,
    verifying_key: ProverPublicKey,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("verifying_key", &self.verifying_key.to_hex())
            .finish()
    }
}

impl LocalBackend {
    pub fn new(keypair: ProverKeypair) -> Self {
        let verifying_key = keypair.verifying_key();
        Self {
            keypair,
            verifying_key,
        }
    }

    /// Backend with a fresh, ephemeral prover key. Artifacts it produces
    /// only verify against this instance.
    pub fn ephemeral() -> Self {
        Self::new(ProverKeypair::generate())
    }

    pub fn verifying_key(&self) -> ProverPublicKey {
        self.verifying_key
    }

    fn ensure_circuit(circuit_id: &str) -> RlnResult<()> {
        if circuit_id != RLN_CIRCUIT_ID {
            return Err(RlnError::UnsupportedCircuit(circuit_id.to_string()));
        }
        Ok(())
    }

    fn message(circuit_id: &str, signals: &[u8], blinding: &[u8]) -> Vec<u8> {
        let mut msg = Vec::with_capacity(circuit_id.len() + 1 + signals.len() + blinding.len());
        msg.extend_from_slice(circuit_id.as_bytes());
        msg.push(0);
        msg.extend_from_slice(signals);
        msg.extend_from_slice(blinding);
        msg
    }

    fn check_witness(private: &PrivateInputs, public: &PublicSignals) -> RlnResult<()> {
        if private.epoch != public.epoch {
            return Err(RlnError::VerificationFailed(
                "witness epoch does not match the epoch signal".into(),
            ));
        }
        if derive_nullifier(&private.identity_secret, private.epoch) != public.nullifier {
            return Err(RlnError::VerificationFailed(
                "witness does not derive the nullifier signal".into(),
            ));
        }
        if private.content_commitment != public.content_commitment {
            return Err(RlnError::VerificationFailed(
                "witness commitment does not match the commitment signal".into(),
            ));
        }
        if group_element(&private.group) != public.group {
            return Err(RlnError::VerificationFailed(
                "witness group does not match the group signal".into(),
            ));
        }
        Ok(())
    }

    /// Synchronous core of `generate`.
    pub fn prove(
        &self,
        circuit_id: &str,
        private: &PrivateInputs,
        public: &PublicSignals,
    ) -> RlnResult<ProofArtifact> {
        Self::ensure_circuit(circuit_id)?;
        Self::check_witness(private, public)?;

        let mut blinding = [0u8; BLINDING_LENGTH];
        OsRng.fill_bytes(&mut blinding);

        let signature = self
            .keypair
            .sign(&Self::message(circuit_id, &public.to_bytes(), &blinding));

        let mut proof = Vec::with_capacity(PROOF_LENGTH);
        proof.extend_from_slice(&signature);
        proof.extend_from_slice(&blinding);

        debug!(circuit = circuit_id, epoch = public.epoch.0, "local proof generated");

        Ok(ProofArtifact {
            circuit_id: circuit_id.to_string(),
            proof,
            public_signals: public.to_strings(),
            prover: ProverKind::Local,
        })
    }

    /// Synchronous core of `verify`.
    pub fn check(
        &self,
        circuit_id: &str,
        artifact: &ProofArtifact,
        public_signals: &[String],
    ) -> RlnResult<bool> {
        Self::ensure_circuit(circuit_id)?;

        // Structure first; it is cheap.
        let Ok(statement) = PublicSignals::parse(public_signals) else {
            return Ok(false);
        };
        if artifact.circuit_id != circuit_id
            || artifact.public_signals != public_signals
            || artifact.proof.len() != PROOF_LENGTH
        {
            return Ok(false);
        }

        let (signature, blinding) = artifact.proof.split_at(SIGNATURE_LENGTH);
        let msg = Self::message(circuit_id, &statement.to_bytes(), blinding);
        Ok(self.verifying_key.verify(&msg, signature))
    }
}

#[async_trait]
impl ProofBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn generate(
        &self,
        circuit_id: &str,
        private: &PrivateInputs,
        public: &PublicSignals,
    ) -> RlnResult<ProofArtifact> {
        self.prove(circuit_id, private, public)
    }

    async fn verify(
        &self,
        circuit_id: &str,
        artifact: &ProofArtifact,
        public_signals: &[String],
    ) -> RlnResult<bool> {
        self.check(circuit_id, artifact, public_signals)
    }

    async fn health(&self) -> RlnResult<BackendHealth> {
        Ok(BackendHealth {
            backend: self.name().to_string(),
            healthy: true,
            detail: None,
        })
    }

    async fn circuits(&self) -> RlnResult<Vec<String>> {
        Ok(vec![RLN_CIRCUIT_ID.to_string()])
    }
}
