//! # Report Service
//!
//! Rate-limited anonymous reports: the engine proves, the anchoring adapter
//! makes the nullifier use durable across verifiers.
//!
//! Whether "proved but not yet anchored" is acceptable is the caller's
//! decision. [`AnchorMode`] is a required argument:
//!
//! - `Required`: an anchoring failure fails the submission.
//! - `Optimistic`: the receipt comes back with [`AnchorState::Pending`] and
//!   the reason, for the caller to retry or surface.
//!
//! An `AnchoringConflict` is a detected replay in either mode and is always
//! an error. That includes an anchor call answered with an existing record
//! written by a different request: whoever wrote the record owns the report.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::anchor::{AnchorRequest, AnchoringAdapter};
use crate::crypto::{commit_content, IdentitySecret};
use crate::engine::{RlnEngine, RlnProof, Verdict};
use crate::error::{RlnError, RlnResult};
use crate::types::{Commitment, Epoch, GroupId};

/// How a submission treats anchoring failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorMode {
    Required,
    Optimistic,
}

/// Where a report stands with the anchoring store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum AnchorState {
    Anchored { reference: String },
    Pending { reason: String },
}

/// Result of a submitted or accepted report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportReceipt {
    pub proof: RlnProof,
    pub commitment: Commitment,
    pub anchor: AnchorState,
}

/// Engine plus anchoring adapter.
#[derive(Debug, Clone)]
pub struct RlnService {
    engine: Arc<RlnEngine>,
    anchoring: Arc<dyn AnchoringAdapter>,
}

impl RlnService {
    pub fn new(engine: Arc<RlnEngine>, anchoring: Arc<dyn AnchoringAdapter>) -> Self {
        Self { engine, anchoring }
    }

    pub fn engine(&self) -> &Arc<RlnEngine> {
        &self.engine
    }

    pub fn anchoring(&self) -> &Arc<dyn AnchoringAdapter> {
        &self.anchoring
    }

    /// Prove and anchor a report.
    pub async fn submit_report(
        &self,
        secret: &IdentitySecret,
        content: &[u8],
        group: &GroupId,
        payload: Vec<u8>,
        mode: AnchorMode,
    ) -> RlnResult<ReportReceipt> {
        let proof = self.engine.send(secret, content, group).await?;
        let commitment = commit_content(content);
        let anchor = self.anchor(&proof, commitment, payload, mode).await?;
        Ok(ReportReceipt {
            proof,
            commitment,
            anchor,
        })
    }

    /// Verify a report received from someone else and anchor it.
    ///
    /// A pair that is already anchored is rejected before any verification
    /// work, as a detected replay. Otherwise the proof is checked without
    /// touching the local ledger, anchored, and admitted only once the
    /// anchor is ours: a failed anchor costs the sender nothing here, and
    /// an anchor another verifier won is a conflict.
    pub async fn accept_report(
        &self,
        proof: &RlnProof,
        content: &[u8],
        group: &GroupId,
        payload: Vec<u8>,
    ) -> RlnResult<ReportReceipt> {
        if let Some(existing) = self.anchoring.find(&proof.nullifier, proof.epoch).await? {
            return Err(Self::replayed(proof, existing.reference));
        }

        if let Some(rejected) = self.engine.precheck(proof, content, group).await? {
            return Err(self.rejection(proof, rejected));
        }

        let commitment = commit_content(content);
        let anchor = self
            .anchor(proof, commitment, payload, AnchorMode::Required)
            .await?;

        match self.engine.admit_checked(proof)? {
            Verdict::Accepted { .. } => {}
            rejected => {
                warn!(
                    nullifier = %proof.nullifier,
                    epoch = proof.epoch.0,
                    verdict = rejected.as_str(),
                    "report anchored but refused by the local ledger"
                );
                return Err(self.rejection(proof, rejected));
            }
        }

        Ok(ReportReceipt {
            proof: proof.clone(),
            commitment,
            anchor,
        })
    }

    /// Drop anchored records no verifier can still accept a proof for.
    /// Called on epoch rollover.
    pub async fn prune_anchors(&self) -> RlnResult<usize> {
        let current = self.engine.current_epoch();
        let skew = self.engine.config().epoch_skew_tolerance;
        let cutoff = Epoch(current.0.saturating_sub(skew));
        self.anchoring.prune_before(cutoff).await
    }

    fn replayed(proof: &RlnProof, existing_reference: String) -> RlnError {
        warn!(
            nullifier = %proof.nullifier,
            epoch = proof.epoch.0,
            existing = %existing_reference,
            "report replays an anchored nullifier"
        );
        RlnError::AnchoringConflict {
            nullifier: proof.nullifier,
            epoch: proof.epoch,
            existing_reference,
        }
    }

    fn rejection(&self, proof: &RlnProof, verdict: Verdict) -> RlnError {
        match verdict {
            Verdict::RateLimited => RlnError::RateLimitExceeded {
                nullifier: proof.nullifier,
                epoch: proof.epoch,
                limit: self.engine.config().max_messages_per_epoch,
            },
            Verdict::LocalReplay => RlnError::NullifierReplay {
                nullifier: proof.nullifier,
                epoch: proof.epoch,
            },
            rejected => {
                RlnError::VerificationFailed(format!("report rejected: {}", rejected.as_str()))
            }
        }
    }

    async fn anchor(
        &self,
        proof: &RlnProof,
        commitment: Commitment,
        payload: Vec<u8>,
        mode: AnchorMode,
    ) -> RlnResult<AnchorState> {
        let request = AnchorRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            commitment,
            nullifier: proof.nullifier,
            epoch: proof.epoch,
            proof: proof.artifact.clone(),
            payload,
        };

        match self.anchoring.anchor(request).await {
            Ok(outcome) if outcome.created => {
                info!(reference = %outcome.reference, epoch = proof.epoch.0, "report anchored");
                Ok(AnchorState::Anchored {
                    reference: outcome.reference,
                })
            }
            Ok(outcome) => Err(Self::replayed(proof, outcome.reference)),
            Err(e @ RlnError::AnchoringConflict { .. }) => Err(e),
            Err(e) => match mode {
                AnchorMode::Required => Err(e),
                AnchorMode::Optimistic => {
                    warn!(
                        nullifier = %proof.nullifier,
                        epoch = proof.epoch.0,
                        error = %e,
                        "report accepted locally, anchoring pending"
                    );
                    Ok(AnchorState::Pending {
                        reason: e.to_string(),
                    })
                }
            },
        }
    }
}
