//! # Remote Proof Backend
//!
//! Client for an external proof service speaking the protocol in
//! [`super::wire`]. Every request has a timeout and a small retry budget.
//! Once the budget is spent the configured [`RemoteFallback`] decides what
//! happens, and both outcomes are observable:
//!
//! - `fail`: the caller gets `BackendUnavailable`.
//! - `local`: a WARN is logged, the fallback counter moves, and the
//!   artifact is produced by the local backend with `prover = local`.
//!
//! A proof is never fabricated. A service that answers `success: false`
//! gets `VerificationFailed`, never a fallback. Neither does a 4xx: the
//! request itself was refused, and asking the local prover instead would
//! hide that.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::wire::{
    CircuitInputs, CircuitsResponse, GenerateProofRequest, GenerateProofResponse, HealthResponse,
    VerifyProofRequest, VerifyProofResponse, REQUEST_ID_HEADER,
};
use super::{
    BackendHealth, LocalBackend, PrivateInputs, ProofArtifact, ProofBackend, ProverKind,
    PublicSignals,
};
use crate::config::{RemoteFallback, RemoteProofConfig};
use crate::error::{RlnError, RlnResult};
use crate::retry::{send_with_retry, RetryPolicy};

/// HTTP client for a remote proof service.
#[derive(Debug)]
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    fallback: RemoteFallback,
    local: Arc<LocalBackend>,
    fallbacks: AtomicU64,
}

impl RemoteBackend {
    /// Build the client. `local` is used only when `fallback = local`, and
    /// to check artifacts that a fallback produced.
    pub fn new(config: &RemoteProofConfig, local: Arc<LocalBackend>) -> RlnResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RlnError::BackendUnavailable {
                backend: "remote".into(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::new(config.retries),
            fallback: config.fallback,
            local,
            fallbacks: AtomicU64::new(0),
        })
    }

    /// Override the base backoff delay.
    pub fn with_retry_delay(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }

    /// Times generation fell back to the local prover.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn unavailable(reason: impl Into<String>) -> RlnError {
        RlnError::BackendUnavailable {
            backend: "remote".into(),
            reason: reason.into(),
        }
    }

    async fn request_generate(
        &self,
        circuit_id: &str,
        private: &PrivateInputs,
        public: &PublicSignals,
    ) -> RlnResult<ProofArtifact> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let body = GenerateProofRequest {
            circuit_name: circuit_id.to_string(),
            inputs: CircuitInputs::new(private, public),
            request_id: request_id.clone(),
        };
        let url = self.url("/generate-proof");

        let resp = send_with_retry(&self.retry, "proof-service", || {
            self.client
                .post(&url)
                .header(REQUEST_ID_HEADER, &request_id)
                .json(&body)
                .send()
        })
        .await
        .map_err(|e| Self::unavailable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RlnError::UnsupportedCircuit(circuit_id.to_string()));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| Self::unavailable(format!("failed to read response (HTTP {status}): {e}")))?;
        let parsed: GenerateProofResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) if status.is_client_error() => {
                return Err(RlnError::InvalidInput(format!(
                    "proof service refused request (HTTP {status})"
                )))
            }
            Err(e) => {
                return Err(Self::unavailable(format!("invalid response (HTTP {status}): {e}")))
            }
        };

        if !parsed.success {
            return Err(RlnError::VerificationFailed(
                parsed
                    .error
                    .unwrap_or_else(|| format!("proof service refused request (HTTP {status})")),
            ));
        }
        let proof = parsed
            .proof
            .ok_or_else(|| Self::unavailable("successful response carried no proof"))?;

        if proof.public_signals != public.to_strings() {
            return Err(RlnError::VerificationFailed(
                "proof service returned different public signals".into(),
            ));
        }
        let bytes = hex::decode(proof.proof.trim_start_matches("0x"))
            .map_err(|_| Self::unavailable("proof service returned non-hex proof"))?;

        debug!(
            request_id = %request_id,
            processing_ms = parsed.processing_time.unwrap_or_default(),
            "remote proof generated"
        );

        Ok(ProofArtifact {
            circuit_id: circuit_id.to_string(),
            proof: bytes,
            public_signals: proof.public_signals,
            prover: ProverKind::Remote,
        })
    }
}

#[async_trait]
impl ProofBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn generate(
        &self,
        circuit_id: &str,
        private: &PrivateInputs,
        public: &PublicSignals,
    ) -> RlnResult<ProofArtifact> {
        match self.request_generate(circuit_id, private, public).await {
            Err(RlnError::BackendUnavailable { reason, .. })
                if self.fallback == RemoteFallback::Local =>
            {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                warn!(
                    url = %self.base_url,
                    reason = %reason,
                    "proof service unavailable, falling back to local prover"
                );
                self.local.generate(circuit_id, private, public).await
            }
            other => other,
        }
    }

    async fn verify(
        &self,
        circuit_id: &str,
        artifact: &ProofArtifact,
        public_signals: &[String],
    ) -> RlnResult<bool> {
        // Shape first; never spend a round trip on a malformed statement.
        if PublicSignals::parse(public_signals).is_err() {
            return Ok(false);
        }
        if artifact.prover == ProverKind::Local && self.fallback == RemoteFallback::Local {
            return self.local.verify(circuit_id, artifact, public_signals).await;
        }

        let body = VerifyProofRequest {
            circuit_name: circuit_id.to_string(),
            proof: hex::encode(&artifact.proof),
            public_signals: public_signals.to_vec(),
        };
        let url = self.url("/verify-proof");

        let resp = send_with_retry(&self.retry, "proof-service", || {
            self.client.post(&url).json(&body).send()
        })
        .await
        .map_err(|e| Self::unavailable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RlnError::UnsupportedCircuit(circuit_id.to_string()));
        }
        if status.is_client_error() {
            return Err(RlnError::InvalidInput(format!(
                "proof service refused verify-proof (HTTP {status})"
            )));
        }
        if !status.is_success() {
            return Err(Self::unavailable(format!("verify-proof returned HTTP {status}")));
        }
        let parsed: VerifyProofResponse = resp
            .json()
            .await
            .map_err(|e| Self::unavailable(format!("invalid verify response: {e}")))?;
        Ok(parsed.valid)
    }

    async fn health(&self) -> RlnResult<BackendHealth> {
        let url = self.url("/health");
        let outcome = send_with_retry(&self.retry, "proof-service", || {
            self.client.get(&url).send()
        })
        .await;

        let health = match outcome {
            Ok(resp) if resp.status().is_success() => match resp.json::<HealthResponse>().await {
                Ok(body) => BackendHealth {
                    backend: self.name().into(),
                    healthy: body.status == "healthy",
                    detail: Some(body.status),
                },
                Err(e) => BackendHealth {
                    backend: self.name().into(),
                    healthy: false,
                    detail: Some(format!("invalid health response: {e}")),
                },
            },
            Ok(resp) => BackendHealth {
                backend: self.name().into(),
                healthy: false,
                detail: Some(format!("HTTP {}", resp.status())),
            },
            Err(e) => BackendHealth {
                backend: self.name().into(),
                healthy: false,
                detail: Some(e.to_string()),
            },
        };
        Ok(health)
    }

    async fn circuits(&self) -> RlnResult<Vec<String>> {
        let url = self.url("/circuits");
        let resp = send_with_retry(&self.retry, "proof-service", || {
            self.client.get(&url).send()
        })
        .await
        .map_err(|e| Self::unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Self::unavailable(format!("circuits returned HTTP {}", resp.status())));
        }
        let body: CircuitsResponse = resp
            .json()
            .await
            .map_err(|e| Self::unavailable(format!("invalid circuits response: {e}")))?;
        Ok(body.circuits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RLN_CIRCUIT_ID;
    use crate::crypto::{commit_content, derive_nullifier, IdentitySecret};
    use crate::proof::wire::WireProof;
    use crate::types::{Epoch, GroupId};

    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn inputs() -> (PrivateInputs, PublicSignals) {
        let secret = IdentitySecret::from_bytes(vec![3; 32]).unwrap();
        let epoch = Epoch(10);
        let group = GroupId::new("ops").unwrap();
        let commitment = commit_content(b"payload");
        let public = PublicSignals::new(derive_nullifier(&secret, epoch), epoch, commitment, &group);
        (
            PrivateInputs {
                identity_secret: secret,
                epoch,
                group,
                content_commitment: commitment,
            },
            public,
        )
    }

    fn backend(url: &str, retries: u32, fallback: RemoteFallback) -> RemoteBackend {
        let config = RemoteProofConfig {
            url: url.to_string(),
            timeout: Duration::from_secs(2),
            retries,
            fallback,
        };
        RemoteBackend::new(&config, Arc::new(LocalBackend::ephemeral()))
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn generate_round_trips_through_service() {
        let server = MockServer::start().await;
        let (private, public) = inputs();
        let body = GenerateProofResponse {
            success: true,
            proof: Some(WireProof {
                proof: "abcdef".into(),
                public_signals: public.to_strings(),
            }),
            error: None,
            processing_time: Some(12),
        };
        Mock::given(method("POST"))
            .and(path("/generate-proof"))
            .and(header_exists(REQUEST_ID_HEADER))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .expect(1)
            .mount(&server)
            .await;

        let remote = backend(&server.uri(), 0, RemoteFallback::Fail);
        let artifact = remote.generate(RLN_CIRCUIT_ID, &private, &public).await.unwrap();
        assert_eq!(artifact.prover, ProverKind::Remote);
        assert_eq!(artifact.proof, vec![0xab, 0xcd, 0xef]);
    }

    #[tokio::test]
    async fn exhaustion_fails_explicitly_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-proof"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let remote = backend(&server.uri(), 2, RemoteFallback::Fail);
        let (private, public) = inputs();
        let err = remote.generate(RLN_CIRCUIT_ID, &private, &public).await.unwrap_err();
        assert!(matches!(err, RlnError::BackendUnavailable { .. }));
        assert_eq!(remote.fallback_count(), 0);
    }

    #[tokio::test]
    async fn exhaustion_falls_back_to_local_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let remote = backend(&server.uri(), 1, RemoteFallback::Local);
        let (private, public) = inputs();
        let artifact = remote.generate(RLN_CIRCUIT_ID, &private, &public).await.unwrap();
        assert_eq!(artifact.prover, ProverKind::Local);
        assert_eq!(remote.fallback_count(), 1);

        // The fallback artifact is checked locally, not sent to the service.
        assert!(remote
            .verify(RLN_CIRCUIT_ID, &artifact, &public.to_strings())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn refused_witness_is_not_a_fallback() {
        let server = MockServer::start().await;
        let body = GenerateProofResponse {
            success: false,
            proof: None,
            error: Some("constraint unsatisfied".into()),
            processing_time: None,
        };
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let remote = backend(&server.uri(), 0, RemoteFallback::Local);
        let (private, public) = inputs();
        let err = remote.generate(RLN_CIRCUIT_ID, &private, &public).await.unwrap_err();
        assert!(matches!(err, RlnError::VerificationFailed(_)));
        assert_eq!(remote.fallback_count(), 0);
    }

    #[tokio::test]
    async fn client_error_is_not_a_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate-proof"))
            .respond_with(ResponseTemplate::new(413).set_body_string("payload too large"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/verify-proof"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let remote = backend(&server.uri(), 2, RemoteFallback::Local);
        let (private, public) = inputs();
        let err = remote.generate(RLN_CIRCUIT_ID, &private, &public).await.unwrap_err();
        assert!(matches!(err, RlnError::InvalidInput(_)), "got {err:?}");
        assert_eq!(remote.fallback_count(), 0);

        let artifact = ProofArtifact {
            circuit_id: RLN_CIRCUIT_ID.into(),
            proof: vec![1],
            public_signals: public.to_strings(),
            prover: ProverKind::Remote,
        };
        assert!(matches!(
            remote.verify(RLN_CIRCUIT_ID, &artifact, &public.to_strings()).await,
            Err(RlnError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn verify_asks_the_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify-proof"))
            .respond_with(ResponseTemplate::new(200).set_body_json(VerifyProofResponse { valid: true }))
            .expect(1)
            .mount(&server)
            .await;

        let remote = backend(&server.uri(), 0, RemoteFallback::Fail);
        let (_, public) = inputs();
        let artifact = ProofArtifact {
            circuit_id: RLN_CIRCUIT_ID.into(),
            proof: vec![1, 2, 3],
            public_signals: public.to_strings(),
            prover: ProverKind::Remote,
        };
        assert!(remote
            .verify(RLN_CIRCUIT_ID, &artifact, &public.to_strings())
            .await
            .unwrap());
        // Malformed statements never reach the service.
        assert!(!remote.verify(RLN_CIRCUIT_ID, &artifact, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn health_reports_unreachable_service() {
        let remote = backend("http://127.0.0.1:1", 0, RemoteFallback::Fail);
        let health = remote.health().await.unwrap();
        assert!(!health.healthy);
    }

    #[tokio::test]
    async fn lists_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/circuits"))
            .respond_with(ResponseTemplate::new(200).set_body_json(CircuitsResponse {
                circuits: vec![RLN_CIRCUIT_ID.into()],
            }))
            .mount(&server)
            .await;

        let remote = backend(&server.uri(), 0, RemoteFallback::Fail);
        assert_eq!(remote.circuits().await.unwrap(), vec![RLN_CIRCUIT_ID.to_string()]);
    }
}
