//! Error types for the rate-limiting nullifier engine.
//!
//! Every fallible operation in the crate returns an [`RlnError`]. The
//! variants mirror how a caller is expected to react: rate-limit and replay
//! errors go back to the end user, backend errors are retried or escalated
//! by policy, conflicts are treated as detected replays.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::DbError;
use crate::types::{Epoch, Nullifier};

/// Errors produced by the RLN engine, its backends, and its adapters.
#[derive(Debug, Error)]
pub enum RlnError {
    /// The nullifier already spent its whole budget for this epoch.
    #[error("rate limit exceeded: nullifier {nullifier} used {limit}/{limit} messages in epoch {epoch}")]
    RateLimitExceeded {
        nullifier: Nullifier,
        epoch: Epoch,
        limit: u32,
    },

    /// Single-use policy: the nullifier was already consumed this epoch.
    #[error("nullifier {nullifier} already used in epoch {epoch}")]
    NullifierReplay { nullifier: Nullifier, epoch: Epoch },

    /// The epoch rolled over between nullifier derivation and admission.
    #[error("epoch {epoch} expired before admission (ledger is at epoch {current})")]
    EpochExpired { epoch: Epoch, current: Epoch },

    /// The proof backend could not be reached within its budget.
    #[error("proof backend `{backend}` unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// The proof (or the witness offered to the prover) was rejected.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// The circuit identifier is not served by the backend.
    #[error("unsupported circuit: {0}")]
    UnsupportedCircuit(String),

    /// A different record is already anchored for this nullifier and epoch.
    #[error("nullifier {nullifier} already anchored in epoch {epoch} as {existing_reference}")]
    AnchoringConflict {
        nullifier: Nullifier,
        epoch: Epoch,
        existing_reference: String,
    },

    /// The anchoring backend could not durably record or answer.
    #[error("anchoring backend unavailable: {0}")]
    AnchoringUnavailable(String),

    /// Malformed caller input (bad hex, empty group id, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] DbError),
}

impl RlnError {
    /// Short, stable label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RlnError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            RlnError::NullifierReplay { .. } => "nullifier_replay",
            RlnError::EpochExpired { .. } => "epoch_expired",
            RlnError::BackendUnavailable { .. } => "backend_unavailable",
            RlnError::VerificationFailed(_) => "verification_failed",
            RlnError::UnsupportedCircuit(_) => "unsupported_circuit",
            RlnError::AnchoringConflict { .. } => "anchoring_conflict",
            RlnError::AnchoringUnavailable(_) => "anchoring_unavailable",
            RlnError::InvalidInput(_) => "invalid_input",
            RlnError::Config(_) => "config",
            RlnError::Storage(_) => "storage",
        }
    }

    /// Attach epoch and nullifier context to backend failures.
    pub(crate) fn in_epoch(self, epoch: Epoch, nullifier: &Nullifier) -> Self {
        match self {
            RlnError::BackendUnavailable { backend, reason } => RlnError::BackendUnavailable {
                backend,
                reason: format!("{reason} (epoch {epoch}, nullifier {nullifier})"),
            },
            RlnError::VerificationFailed(reason) => RlnError::VerificationFailed(format!(
                "{reason} (epoch {epoch}, nullifier {nullifier})"
            )),
            other => other,
        }
    }
}

pub type RlnResult<T> = Result<T, RlnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_includes_epoch() {
        let err = RlnError::RateLimitExceeded {
            nullifier: Nullifier([0xaa; 32]),
            epoch: Epoch(12),
            limit: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("epoch 12"));
        assert!(msg.contains("3/3"));
        assert_eq!(err.kind(), "rate_limit_exceeded");
    }

    #[test]
    fn replay_and_rate_limit_have_distinct_kinds() {
        let replay = RlnError::NullifierReplay {
            nullifier: Nullifier([0; 32]),
            epoch: Epoch(1),
        };
        assert_eq!(replay.kind(), "nullifier_replay");
    }

    #[test]
    fn backend_context_is_appended() {
        let err = RlnError::BackendUnavailable {
            backend: "remote".into(),
            reason: "timed out".into(),
        }
        .in_epoch(Epoch(9), &Nullifier([0x42; 32]));
        let msg = err.to_string();
        assert!(msg.contains("epoch 9"));
        assert!(msg.contains("4242424242424242"));
        assert_eq!(err.kind(), "backend_unavailable");
    }

    #[test]
    fn conflict_names_existing_reference() {
        let err = RlnError::AnchoringConflict {
            nullifier: Nullifier([1; 32]),
            epoch: Epoch(2),
            existing_reference: "anchor-00".into(),
        };
        assert_eq!(err.kind(), "anchoring_conflict");
        assert!(err.to_string().contains("anchor-00"));
    }
}
