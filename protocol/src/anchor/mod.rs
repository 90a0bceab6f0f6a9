//! # Anchoring
//!
//! Durable, cross-process record of which nullifiers were used in which
//! epoch. The local ledger only protects one process; an anchoring adapter
//! is what stops the same `(nullifier, epoch)` being spent against two
//! independent verifiers.
//!
//! ```text
//! stub.rs: in-process guarded map, optionally journaled to sled
//! external.rs: JSON-RPC client for a shared ledger service
//! rpc.rs: the ledger JSON-RPC protocol (client + server dispatch)
//! ```
//!
//! ## Guarantees
//!
//! - At most one [`AnchoredRecord`] per `(nullifier, epoch)`.
//! - `anchor` is atomic with respect to `is_used`: once `anchor` returns a
//!   reference, `is_used` is `true` for that pair in every process sharing
//!   the store.
//! - `anchor` is idempotent: repeating an identical request returns the
//!   existing reference. A request for a taken pair with a *different*
//!   commitment is an `AnchoringConflict`.
//! - `anchor` says who won. [`AnchorOutcome::created`] is `true` only for
//!   the request id that wrote the record, so two verifiers anchoring the
//!   same report concurrently cannot both treat it as fresh.

pub mod external;
pub mod rpc;
pub mod stub;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AnchoringConfig;
use crate::crypto::hash::blake3_hash_multi;
use crate::error::RlnResult;
use crate::proof::{hex_bytes, ProofArtifact};
use crate::storage::RlnDb;
use crate::types::{Commitment, Epoch, Nullifier};

pub use external::ExternalAnchor;
pub use stub::StubAnchor;

/// Everything needed to anchor one use of a nullifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRequest {
    /// Chosen by the caller per anchoring attempt. Retries of one attempt
    /// reuse it.
    pub request_id: String,
    pub commitment: Commitment,
    pub nullifier: Nullifier,
    pub epoch: Epoch,
    pub proof: ProofArtifact,
    /// Opaque application payload (e.g. an encrypted report).
    #[serde(with = "hex_bytes", default)]
    pub payload: Vec<u8>,
}

/// A durably recorded use of a nullifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchoredRecord {
    pub reference: String,
    /// Id of the request that wrote this record.
    pub request_id: String,
    pub commitment: Commitment,
    pub nullifier: Nullifier,
    pub epoch: Epoch,
    pub proof: ProofArtifact,
    #[serde(with = "hex_bytes", default)]
    pub payload: Vec<u8>,
    pub anchored_at: DateTime<Utc>,
}

impl AnchoredRecord {
    /// Whether `request` asks for exactly this record again.
    pub fn matches(&self, request: &AnchorRequest) -> bool {
        self.commitment == request.commitment
            && self.nullifier == request.nullifier
            && self.epoch == request.epoch
    }

    /// The answer `anchor` gives `request` when this record already holds
    /// its pair with the same content.
    pub fn outcome_for(&self, request: &AnchorRequest) -> AnchorOutcome {
        AnchorOutcome {
            reference: self.reference.clone(),
            created: self.request_id == request.request_id,
        }
    }
}

/// Answer to a successful `anchor` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorOutcome {
    pub reference: String,
    /// `false` when a different request had already anchored the same
    /// content for the pair.
    pub created: bool,
}

/// Deterministic reference for a `(nullifier, epoch)` pair.
pub fn reference_for(nullifier: &Nullifier, epoch: Epoch) -> String {
    let digest = blake3_hash_multi(&[nullifier.as_bytes(), &epoch.to_be_bytes()]);
    format!("anchor-{}", hex::encode(&digest[..16]))
}

/// A durable store of anchored records.
#[async_trait]
pub trait AnchoringAdapter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Record `request`, returning its durable reference.
    async fn anchor(&self, request: AnchorRequest) -> RlnResult<AnchorOutcome>;

    /// Whether any record exists for the pair.
    async fn is_used(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<bool>;

    /// The record anchored for the pair, if any.
    async fn find(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<Option<AnchoredRecord>>;

    async fn lookup(&self, reference: &str) -> RlnResult<Option<AnchoredRecord>>;

    /// Nullifiers anchored in `epoch`, in no particular order.
    async fn epoch_nullifiers(&self, epoch: Epoch) -> RlnResult<Vec<Nullifier>>;

    /// Whether the adapter can currently accept writes.
    async fn is_ready(&self) -> bool;

    /// Drop records for epochs before `epoch`, returning how many went.
    /// Adapters whose retention is managed elsewhere keep this no-op.
    async fn prune_before(&self, _epoch: Epoch) -> RlnResult<usize> {
        Ok(0)
    }
}

/// Construct the configured adapter. A stub built with `db` replays and
/// journals its records there.
pub fn build_adapter(
    config: &AnchoringConfig,
    db: Option<RlnDb>,
) -> RlnResult<Arc<dyn AnchoringAdapter>> {
    match config {
        AnchoringConfig::Stub => match db {
            Some(db) => Ok(Arc::new(StubAnchor::with_store(db)?)),
            None => Ok(Arc::new(StubAnchor::new())),
        },
        AnchoringConfig::External(external) => Ok(Arc::new(ExternalAnchor::new(external)?)),
    }
}

#[cfg(test)]
pub(crate) fn test_request(nullifier_byte: u8, epoch: u64, commitment_byte: u8) -> AnchorRequest {
    use crate::proof::ProverKind;

    AnchorRequest {
        request_id: format!("req-{nullifier_byte}-{epoch}-{commitment_byte}"),
        commitment: Commitment([commitment_byte; 32]),
        nullifier: Nullifier([nullifier_byte; 32]),
        epoch: Epoch(epoch),
        proof: ProofArtifact {
            circuit_id: crate::config::RLN_CIRCUIT_ID.into(),
            proof: vec![0x01; 96],
            public_signals: vec![],
            prover: ProverKind::Local,
        },
        payload: b"report".to_vec(),
    }
}

#[cfg(test)]
pub(crate) fn test_record(nullifier_byte: u8, epoch: u64, commitment_byte: u8) -> AnchoredRecord {
    let request = test_request(nullifier_byte, epoch, commitment_byte);
    AnchoredRecord {
        reference: reference_for(&request.nullifier, request.epoch),
        request_id: request.request_id,
        commitment: request.commitment,
        nullifier: request.nullifier,
        epoch: request.epoch,
        proof: request.proof,
        payload: request.payload,
        anchored_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_is_deterministic_per_pair() {
        let n = Nullifier([4; 32]);
        assert_eq!(reference_for(&n, Epoch(1)), reference_for(&n, Epoch(1)));
        assert_ne!(reference_for(&n, Epoch(1)), reference_for(&n, Epoch(2)));
        assert!(reference_for(&n, Epoch(1)).starts_with("anchor-"));
        assert_eq!(reference_for(&n, Epoch(1)).len(), "anchor-".len() + 32);
    }

    #[test]
    fn record_survives_bincode() {
        let record = test_record(1, 2, 3);
        let bytes = bincode::serialize(&record).unwrap();
        let back: AnchoredRecord = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn matches_compares_commitment() {
        let record = test_record(1, 2, 3);
        assert!(record.matches(&test_request(1, 2, 3)));
        assert!(!record.matches(&test_request(1, 2, 4)));
    }

    #[test]
    fn only_the_writing_request_is_told_created() {
        let record = test_record(1, 2, 3);
        assert!(record.outcome_for(&test_request(1, 2, 3)).created);

        let other = AnchorRequest {
            request_id: "someone-else".into(),
            ..test_request(1, 2, 3)
        };
        let outcome = record.outcome_for(&other);
        assert!(!outcome.created);
        assert_eq!(outcome.reference, record.reference);
    }
}
