//! # RLN Protocol Engine
//!
//! Orchestrates the epoch clock, the nullifier ledger, and the proof
//! backend to answer two questions:
//!
//! - **send**: may this identity send this content to this group now? If
//!   so, produce the proof.
//! - **verify**: is this proof for this content and group acceptable now?
//!   If so, count it against the nullifier's budget locally too.
//!
//! ## Ordering
//!
//! `send` takes exactly one epoch reading and uses it for nullifier
//! derivation, the public signals, and ledger admission:
//!
//! ```text
//! epoch ─▶ nullifier ─▶ ledger.check ─▶ commit ─▶ prove (bounded) ─▶ ledger.admit(epoch)
//! ```
//!
//! Admission happens only after the proof exists. A `send` that fails or
//! is cancelled during proving consumes no budget. The pre-check is an
//! early exit for exhausted identities; the atomic `admit` at the end is
//! what decides, so two racing senders still cannot overspend.
//!
//! `verify` checks, cheapest first: epoch window, statement shape and
//! binding to content and group, local ledger threshold, the backend.
//! Only a proof the backend accepts is admitted. [`RlnEngine::precheck`]
//! and [`RlnEngine::admit_checked`] expose the two halves separately for
//! callers that must act in between; the report service anchors there.
//!
//! ## Epoch skew
//!
//! With `epoch_skew_tolerance = 0` (strict, the default) a proof is only
//! accepted in the epoch it was made for. A non-zero tolerance accepts
//! proofs up to that many epochs away; such proofs are counted in the
//! verifier's current window, so a lenient verifier may admit the same
//! sender once per epoch of slack. The active mode is logged at startup.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{RlnConfig, RLN_CIRCUIT_ID};
use crate::crypto::{commit_content, derive_nullifier, IdentitySecret};
use crate::epoch::EpochClock;
use crate::error::{RlnError, RlnResult};
use crate::ledger::NullifierLedger;
use crate::proof::{PrivateInputs, ProofArtifact, ProofBackend, PublicSignals};
use crate::storage::RlnDb;
use crate::types::{Epoch, GroupId, Nullifier};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Output of a successful `send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlnProof {
    pub nullifier: Nullifier,
    pub epoch: Epoch,
    pub artifact: ProofArtifact,
}

impl RlnProof {
    pub fn public_signals(&self) -> &[String] {
        &self.artifact.public_signals
    }
}

/// Detailed outcome of `verify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Accepted and admitted; `count` is the nullifier's post-admission use.
    Accepted { count: u32 },
    /// Proof epoch is outside the accepted window.
    StaleEpoch { proof_epoch: Epoch, current: Epoch },
    /// Signals do not bind this content, group, nullifier, and epoch.
    SignalMismatch,
    /// Single-use policy: this verifier already saw the nullifier.
    LocalReplay,
    /// The nullifier's budget is spent in this verifier's window.
    RateLimited,
    /// The backend rejected the proof.
    ProofRejected,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accepted { .. } => "accepted",
            Verdict::StaleEpoch { .. } => "stale_epoch",
            Verdict::SignalMismatch => "signal_mismatch",
            Verdict::LocalReplay => "local_replay",
            Verdict::RateLimited => "rate_limited",
            Verdict::ProofRejected => "proof_rejected",
        }
    }
}

/// Quota and cadence summary for UI layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub current_epoch: Epoch,
    pub active_nullifiers: usize,
    pub total_messages: u64,
    pub epoch_time_remaining_ms: u64,
    pub max_messages_per_epoch: u32,
    pub replay_policy: &'static str,
    pub verification_mode: String,
    pub proof_backend: &'static str,
}

// ---------------------------------------------------------------------------
// RlnEngine
// ---------------------------------------------------------------------------

/// The engine. Owns its ledger; share it behind an `Arc`.
#[derive(Debug)]
pub struct RlnEngine {
    config: RlnConfig,
    clock: EpochClock,
    ledger: NullifierLedger,
    backend: Arc<dyn ProofBackend>,
}

impl RlnEngine {
    /// Engine with an in-memory ledger.
    pub fn new(
        config: RlnConfig,
        clock: EpochClock,
        backend: Arc<dyn ProofBackend>,
    ) -> RlnResult<Self> {
        config.validate()?;
        let ledger = NullifierLedger::new(
            config.max_messages_per_epoch,
            config.replay_policy,
            clock.current_epoch(),
        );
        Ok(Self::assemble(config, clock, ledger, backend))
    }

    /// Engine whose ledger is journaled to `db`. The journal is replayed
    /// before this returns.
    pub fn with_journal(
        config: RlnConfig,
        clock: EpochClock,
        backend: Arc<dyn ProofBackend>,
        db: RlnDb,
    ) -> RlnResult<Self> {
        config.validate()?;
        let ledger = NullifierLedger::with_journal(
            config.max_messages_per_epoch,
            config.replay_policy,
            clock.current_epoch(),
            db,
        )?;
        Ok(Self::assemble(config, clock, ledger, backend))
    }

    fn assemble(
        config: RlnConfig,
        clock: EpochClock,
        ledger: NullifierLedger,
        backend: Arc<dyn ProofBackend>,
    ) -> Self {
        info!(
            epoch_duration_ms = config.epoch_duration.as_millis() as u64,
            max_messages = config.max_messages_per_epoch,
            replay_policy = config.replay_policy.as_str(),
            verification = %config.skew_mode(),
            backend = backend.name(),
            "rln engine ready"
        );
        Self {
            config,
            clock,
            ledger,
            backend,
        }
    }

    pub fn config(&self) -> &RlnConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ProofBackend> {
        &self.backend
    }

    pub fn current_epoch(&self) -> Epoch {
        self.clock.current_epoch()
    }

    /// Time left in the current epoch. A hint, not a correctness input.
    pub fn epoch_time_remaining(&self) -> Duration {
        self.clock.time_remaining()
    }

    /// Messages `secret` may still send in the current epoch.
    pub fn remaining_budget(&self, secret: &IdentitySecret) -> u32 {
        let epoch = self.clock.current_epoch();
        self.ledger.remaining(&derive_nullifier(secret, epoch), epoch)
    }

    pub fn stats(&self) -> EngineStats {
        let snapshot = self.ledger.snapshot(self.clock.current_epoch());
        EngineStats {
            current_epoch: snapshot.epoch,
            active_nullifiers: snapshot.active_nullifiers,
            total_messages: snapshot.total_messages,
            epoch_time_remaining_ms: self.clock.time_remaining().as_millis() as u64,
            max_messages_per_epoch: self.config.max_messages_per_epoch,
            replay_policy: self.config.replay_policy.as_str(),
            verification_mode: self.config.skew_mode(),
            proof_backend: self.backend.name(),
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = RlnResult<T>>,
    ) -> RlnResult<T> {
        tokio::time::timeout(self.config.proof_timeout, fut)
            .await
            .map_err(|_| RlnError::BackendUnavailable {
                backend: self.backend.name().to_string(),
                reason: format!("no answer within {:?}", self.config.proof_timeout),
            })?
    }

    /// Produce a rate-limited proof for `content` in `group`.
    pub async fn send(
        &self,
        secret: &IdentitySecret,
        content: &[u8],
        group: &GroupId,
    ) -> RlnResult<RlnProof> {
        let epoch = self.clock.current_epoch();
        let nullifier = derive_nullifier(secret, epoch);

        self.ledger.check(&nullifier, epoch)?;

        let commitment = commit_content(content);
        let public = PublicSignals::new(nullifier, epoch, commitment, group);
        let private = PrivateInputs {
            identity_secret: secret.clone(),
            epoch,
            group: group.clone(),
            content_commitment: commitment,
        };

        let artifact = self
            .bounded(self.backend.generate(RLN_CIRCUIT_ID, &private, &public))
            .await
            .map_err(|e| e.in_epoch(epoch, &nullifier))?;

        let count = self.ledger.admit(&nullifier, epoch)?;
        info!(
            nullifier = %nullifier,
            epoch = epoch.0,
            count,
            prover = %artifact.prover,
            "message proof issued"
        );

        Ok(RlnProof {
            nullifier,
            epoch,
            artifact,
        })
    }

    /// Whether `proof` is acceptable for `content` in `group` right now.
    /// An accepted proof is admitted into the local ledger.
    pub async fn verify(
        &self,
        proof: &RlnProof,
        content: &[u8],
        group: &GroupId,
    ) -> RlnResult<bool> {
        Ok(self.verify_detailed(proof, content, group).await?.is_accepted())
    }

    /// `verify` with the reason for a rejection.
    pub async fn verify_detailed(
        &self,
        proof: &RlnProof,
        content: &[u8],
        group: &GroupId,
    ) -> RlnResult<Verdict> {
        let current = self.clock.current_epoch();
        if let Some(rejected) = self.screen(proof, content, group, current).await? {
            return Ok(rejected);
        }
        self.admit_at(proof, current)
    }

    /// Every check `verify_detailed` makes, without admitting anything.
    /// `None` means the proof would be accepted right now.
    pub async fn precheck(
        &self,
        proof: &RlnProof,
        content: &[u8],
        group: &GroupId,
    ) -> RlnResult<Option<Verdict>> {
        self.screen(proof, content, group, self.clock.current_epoch())
            .await
    }

    /// Admit a proof that already passed [`precheck`](Self::precheck).
    /// The epoch window is re-checked against a fresh clock reading.
    pub fn admit_checked(&self, proof: &RlnProof) -> RlnResult<Verdict> {
        let current = self.clock.current_epoch();
        if let Some(stale) = self.outside_window(proof, current) {
            return Ok(stale);
        }
        self.admit_at(proof, current)
    }

    fn outside_window(&self, proof: &RlnProof, current: Epoch) -> Option<Verdict> {
        if proof.epoch.distance(current) > self.config.epoch_skew_tolerance {
            debug!(proof_epoch = proof.epoch.0, current = current.0, "proof epoch outside window");
            return Some(Verdict::StaleEpoch {
                proof_epoch: proof.epoch,
                current,
            });
        }
        None
    }

    /// Checks in cost order; the first failing one names the verdict.
    async fn screen(
        &self,
        proof: &RlnProof,
        content: &[u8],
        group: &GroupId,
        current: Epoch,
    ) -> RlnResult<Option<Verdict>> {
        if let Some(stale) = self.outside_window(proof, current) {
            return Ok(Some(stale));
        }

        let expected =
            PublicSignals::new(proof.nullifier, proof.epoch, commit_content(content), group)
                .to_strings();
        if proof.artifact.circuit_id != RLN_CIRCUIT_ID || proof.artifact.public_signals != expected {
            debug!(nullifier = %proof.nullifier, "proof signals do not bind content and group");
            return Ok(Some(Verdict::SignalMismatch));
        }

        if let Err(e) = self.ledger.check(&proof.nullifier, current) {
            return Self::refusal(e).map(Some);
        }

        let valid = self
            .bounded(self.backend.verify(RLN_CIRCUIT_ID, &proof.artifact, &expected))
            .await
            .map_err(|e| e.in_epoch(proof.epoch, &proof.nullifier))?;
        if !valid {
            info!(nullifier = %proof.nullifier, epoch = proof.epoch.0, "proof rejected by backend");
            return Ok(Some(Verdict::ProofRejected));
        }
        Ok(None)
    }

    fn admit_at(&self, proof: &RlnProof, current: Epoch) -> RlnResult<Verdict> {
        let count = match self.ledger.admit(&proof.nullifier, current) {
            Ok(count) => count,
            Err(e) => return Self::refusal(e),
        };
        debug!(nullifier = %proof.nullifier, epoch = proof.epoch.0, count, "proof accepted");
        Ok(Verdict::Accepted { count })
    }

    /// Rate-limit and replay refusals become verdicts; anything else is an
    /// error.
    fn refusal(err: RlnError) -> RlnResult<Verdict> {
        match err {
            RlnError::NullifierReplay { .. } => Ok(Verdict::LocalReplay),
            RlnError::RateLimitExceeded { .. } => Ok(Verdict::RateLimited),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplayPolicy;
    use crate::epoch::ManualClock;
    use crate::proof::{BackendHealth, LocalBackend};
    use async_trait::async_trait;

    const EPOCH: Duration = Duration::from_secs(60);

    fn config(max: u32, policy: ReplayPolicy) -> RlnConfig {
        RlnConfig {
            epoch_duration: EPOCH,
            max_messages_per_epoch: max,
            replay_policy: policy,
            ..RlnConfig::default()
        }
    }

    fn engine_with(
        config: RlnConfig,
        backend: Arc<dyn ProofBackend>,
    ) -> (RlnEngine, ManualClock) {
        let manual = ManualClock::new(Duration::from_secs(600));
        let clock = EpochClock::new(config.epoch_duration, Arc::new(manual.clone()));
        (RlnEngine::new(config, clock, backend).unwrap(), manual)
    }

    fn group() -> GroupId {
        GroupId::new("lobby").unwrap()
    }

    /// Never answers.
    #[derive(Debug)]
    struct StalledBackend;

    #[async_trait]
    impl ProofBackend for StalledBackend {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn generate(
            &self,
            _: &str,
            _: &PrivateInputs,
            _: &PublicSignals,
        ) -> RlnResult<ProofArtifact> {
            std::future::pending().await
        }

        async fn verify(&self, _: &str, _: &ProofArtifact, _: &[String]) -> RlnResult<bool> {
            std::future::pending().await
        }

        async fn health(&self) -> RlnResult<BackendHealth> {
            Ok(BackendHealth {
                backend: "stalled".into(),
                healthy: false,
                detail: None,
            })
        }

        async fn circuits(&self) -> RlnResult<Vec<String>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn send_counts_against_budget() {
        let (engine, _) =
            engine_with(config(2, ReplayPolicy::BoundedReuse), Arc::new(LocalBackend::ephemeral()));
        let secret = IdentitySecret::generate();

        assert_eq!(engine.remaining_budget(&secret), 2);
        let proof = engine.send(&secret, b"one", &group()).await.unwrap();
        assert_eq!(proof.epoch, Epoch(10));
        assert_eq!(proof.nullifier, derive_nullifier(&secret, Epoch(10)));
        assert_eq!(proof.public_signals().len(), 4);
        assert_eq!(engine.remaining_budget(&secret), 1);

        engine.send(&secret, b"two", &group()).await.unwrap();
        assert!(matches!(
            engine.send(&secret, b"three", &group()).await,
            Err(RlnError::RateLimitExceeded { .. })
        ));

        let stats = engine.stats();
        assert_eq!(stats.active_nullifiers, 1);
        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.verification_mode, "strict");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_backend_times_out_without_admitting() {
        let cfg = RlnConfig {
            proof_timeout: Duration::from_secs(1),
            ..config(1, ReplayPolicy::BoundedReuse)
        };
        let (engine, _) = engine_with(cfg, Arc::new(StalledBackend));
        let secret = IdentitySecret::generate();

        let err = engine.send(&secret, b"m", &group()).await.unwrap_err();
        match err {
            RlnError::BackendUnavailable { backend, reason } => {
                assert_eq!(backend, "stalled");
                assert!(reason.contains("epoch 10"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(engine.remaining_budget(&secret), 1);
    }

    #[tokio::test]
    async fn hung_proof_service_still_reaches_local_fallback() {
        use crate::config::{ProofBackendConfig, RemoteFallback, RemoteProofConfig};
        use crate::proof::{ProverKind, RemoteBackend};
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let remote_cfg = RemoteProofConfig {
            url: server.uri(),
            timeout: Duration::from_millis(300),
            retries: 1,
            fallback: RemoteFallback::Local,
        };
        // Shorter than two attempts plus backoff: refused up front.
        let too_tight = RlnConfig {
            proof_timeout: Duration::from_millis(400),
            proof_backend: ProofBackendConfig::Remote(remote_cfg.clone()),
            ..config(3, ReplayPolicy::BoundedReuse)
        };
        assert!(too_tight.validate().is_err());

        let cfg = RlnConfig {
            proof_timeout: Duration::from_secs(2),
            ..too_tight
        };
        let remote = Arc::new(
            RemoteBackend::new(&remote_cfg, Arc::new(LocalBackend::ephemeral())).unwrap(),
        );
        let (engine, _) = engine_with(cfg, remote.clone());
        let secret = IdentitySecret::generate();

        let proof = engine.send(&secret, b"late", &group()).await.unwrap();
        assert_eq!(proof.artifact.prover, ProverKind::Local);
        assert_eq!(remote.fallback_count(), 1);
        assert!(engine.verify(&proof, b"late", &group()).await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_send_consumes_nothing() {
        let (engine, _) = engine_with(config(1, ReplayPolicy::BoundedReuse), Arc::new(StalledBackend));
        let secret = IdentitySecret::generate();
        let attempt = tokio::time::timeout(
            Duration::from_millis(20),
            engine.send(&secret, b"m", &group()),
        )
        .await;
        assert!(attempt.is_err());
        assert_eq!(engine.remaining_budget(&secret), 1);
    }

    #[tokio::test]
    async fn verifier_admits_only_valid_proofs() {
        let local = Arc::new(LocalBackend::ephemeral());
        let (sender, _) = engine_with(config(5, ReplayPolicy::BoundedReuse), local.clone());
        let (verifier, _) = engine_with(config(5, ReplayPolicy::BoundedReuse), local);
        let secret = IdentitySecret::generate();

        let proof = sender.send(&secret, b"hello", &group()).await.unwrap();

        assert_eq!(
            verifier.verify_detailed(&proof, b"hello!", &group()).await.unwrap(),
            Verdict::SignalMismatch
        );
        let other_group = GroupId::new("elsewhere").unwrap();
        assert!(!verifier.verify(&proof, b"hello", &other_group).await.unwrap());
        assert_eq!(verifier.stats().total_messages, 0);

        assert_eq!(
            verifier.verify_detailed(&proof, b"hello", &group()).await.unwrap(),
            Verdict::Accepted { count: 1 }
        );

        let mut forged = proof.clone();
        forged.artifact.proof[0] ^= 0xff;
        assert_eq!(
            verifier.verify_detailed(&forged, b"hello", &group()).await.unwrap(),
            Verdict::ProofRejected
        );
        assert_eq!(verifier.stats().total_messages, 1);
    }

    #[tokio::test]
    async fn precheck_leaves_the_ledger_alone() {
        let local = Arc::new(LocalBackend::ephemeral());
        let (sender, _) = engine_with(config(5, ReplayPolicy::BoundedReuse), local.clone());
        let (verifier, verifier_clock) = engine_with(config(5, ReplayPolicy::BoundedReuse), local);
        let secret = IdentitySecret::generate();

        let proof = sender.send(&secret, b"quiet", &group()).await.unwrap();
        assert_eq!(verifier.precheck(&proof, b"quiet", &group()).await.unwrap(), None);
        assert_eq!(
            verifier.precheck(&proof, b"loud", &group()).await.unwrap(),
            Some(Verdict::SignalMismatch)
        );
        assert_eq!(verifier.stats().total_messages, 0);

        assert_eq!(verifier.admit_checked(&proof).unwrap(), Verdict::Accepted { count: 1 });
        assert_eq!(verifier.stats().total_messages, 1);

        // The window moved on between check and admission.
        verifier_clock.advance(EPOCH);
        assert!(matches!(
            verifier.admit_checked(&proof).unwrap(),
            Verdict::StaleEpoch { .. }
        ));
    }

    #[tokio::test]
    async fn single_use_verifier_reports_local_replay() {
        let local = Arc::new(LocalBackend::ephemeral());
        let (sender, _) = engine_with(config(5, ReplayPolicy::BoundedReuse), local.clone());
        let (verifier, _) = engine_with(config(5, ReplayPolicy::SingleUse), local);
        let secret = IdentitySecret::generate();

        let first = sender.send(&secret, b"a", &group()).await.unwrap();
        let second = sender.send(&secret, b"b", &group()).await.unwrap();
        assert!(verifier.verify(&first, b"a", &group()).await.unwrap());
        assert_eq!(
            verifier.verify_detailed(&second, b"b", &group()).await.unwrap(),
            Verdict::LocalReplay
        );
    }

    #[tokio::test]
    async fn lenient_window_accepts_previous_epoch() {
        let local = Arc::new(LocalBackend::ephemeral());
        let cfg = RlnConfig {
            epoch_skew_tolerance: 1,
            ..config(5, ReplayPolicy::BoundedReuse)
        };
        let (sender, _) = engine_with(cfg.clone(), local.clone());
        let (verifier, verifier_clock) = engine_with(cfg, local);
        let secret = IdentitySecret::generate();

        let proof = sender.send(&secret, b"late", &group()).await.unwrap();
        verifier_clock.advance(EPOCH);
        assert!(verifier.verify(&proof, b"late", &group()).await.unwrap());

        verifier_clock.advance(EPOCH);
        assert_eq!(
            verifier.verify_detailed(&proof, b"late", &group()).await.unwrap(),
            Verdict::StaleEpoch {
                proof_epoch: Epoch(10),
                current: Epoch(12)
            }
        );
    }

    #[tokio::test]
    async fn verify_errors_are_not_false() {
        let local = Arc::new(LocalBackend::ephemeral());
        let (sender, _) = engine_with(config(5, ReplayPolicy::BoundedReuse), local);
        let cfg = RlnConfig {
            proof_timeout: Duration::from_millis(20),
            ..config(5, ReplayPolicy::BoundedReuse)
        };
        let (verifier, _) = engine_with(cfg, Arc::new(StalledBackend));
        let secret = IdentitySecret::generate();

        let proof = sender.send(&secret, b"x", &group()).await.unwrap();
        assert!(matches!(
            verifier.verify(&proof, b"x", &group()).await,
            Err(RlnError::BackendUnavailable { .. })
        ));
    }
}
