//! # REST API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path              | Description                               |
//! |--------|-------------------|-------------------------------------------|
//! | GET    | `/health`         | Liveness check (proof service format)     |
//! | GET    | `/status`         | Engine stats, backend and ledger health   |
//! | GET    | `/rln/epoch`      | Current epoch and time remaining          |
//! | POST   | `/rln/send`       | Issue a rate-limited proof                |
//! | POST   | `/rln/verify`     | Verify a proof against content and group  |
//! | POST   | `/rln/budget`     | Messages left for an identity this epoch  |
//! | POST   | `/reports`        | Prove and anchor a report                 |
//! | POST   | `/reports/accept` | Verify and anchor someone else's report   |
//! | GET    | `/circuits`       | Circuits served by the embedded prover    |
//! | POST   | `/generate-proof` | Proof service: generate                   |
//! | POST   | `/verify-proof`   | Proof service: verify                     |
//! | POST   | `/anchor-rpc`     | Anchoring ledger JSON-RPC 2.0 (bearer)    |
//!
//! The proof service and ledger routes let one node act as the remote
//! prover or shared anchoring ledger of others. The ledger route only
//! answers callers presenting the configured anchor RPC token; a node
//! started without one refuses every call there.

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use rln_protocol::anchor::rpc::{self, RpcRequest, RpcResponse};
use rln_protocol::crypto::IdentitySecret;
use rln_protocol::engine::EngineStats;
use rln_protocol::proof::wire::{
    CircuitsResponse, GenerateProofRequest, GenerateProofResponse, HealthResponse,
    VerifyProofRequest, VerifyProofResponse, WireProof, REQUEST_ID_HEADER,
};
use rln_protocol::proof::{BackendHealth, LocalBackend, ProofArtifact, ProofBackend, ProverKind};
use rln_protocol::service::{AnchorMode, AnchorState, ReportReceipt, RlnService};
use rln_protocol::types::{Epoch, GroupId};
use rln_protocol::{RlnError, RlnProof, Verdict};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
///
/// Cheap to clone: everything behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    /// Engine plus anchoring adapter.
    pub service: Arc<RlnService>,
    /// Embedded prover behind the proof service routes.
    pub prover: Arc<LocalBackend>,
    pub metrics: SharedMetrics,
    /// Bearer token peers must present on `/anchor-rpc`. `None` closes it.
    pub anchor_rpc_token: Option<Arc<str>>,
}

impl AppState {
    /// Count a refusal and wrap it for the response.
    fn refuse(&self, err: RlnError) -> ApiError {
        self.metrics.reject(err.kind());
        ApiError(err)
    }

    fn record_proof(&self, proof: &RlnProof) {
        self.metrics.proofs_generated_total.inc();
        let engine = self.service.engine();
        if proof.artifact.prover == ProverKind::Local && engine.backend().name() == "remote" {
            self.metrics.proof_fallbacks_total.inc();
        }
        self.record_epoch();
    }

    fn record_epoch(&self) -> EngineStats {
        let stats = self.service.engine().stats();
        self.metrics.current_epoch.set(stats.current_epoch.0 as i64);
        self.metrics
            .active_nullifiers
            .set(stats.active_nullifiers as i64);
        stats
    }

    fn record_receipt(&self, receipt: &ReportReceipt) {
        match receipt.anchor {
            AnchorState::Anchored { .. } => self.metrics.anchors_total.inc(),
            AnchorState::Pending { .. } => self.metrics.anchors_pending_total.inc(),
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rln/epoch", get(epoch_handler))
        .route("/rln/send", post(send_handler))
        .route("/rln/verify", post(verify_handler))
        .route("/rln/budget", post(budget_handler))
        .route("/reports", post(submit_report_handler))
        .route("/reports/accept", post(accept_report_handler))
        .route("/circuits", get(circuits_handler))
        .route("/generate-proof", post(generate_proof_handler))
        .route("/verify-proof", post(verify_proof_handler))
        .route("/anchor-rpc", post(anchor_rpc_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable kind, e.g. `rate_limit_exceeded`.
    pub kind: String,
}

/// An [`RlnError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(RlnError);

impl From<RlnError> for ApiError {
    fn from(err: RlnError) -> Self {
        Self(err)
    }
}

fn status_for(err: &RlnError) -> StatusCode {
    match err {
        RlnError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        RlnError::NullifierReplay { .. }
        | RlnError::AnchoringConflict { .. }
        | RlnError::EpochExpired { .. } => StatusCode::CONFLICT,
        RlnError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RlnError::VerificationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        RlnError::UnsupportedCircuit(_) => StatusCode::NOT_FOUND,
        RlnError::BackendUnavailable { .. } | RlnError::AnchoringUnavailable(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RlnError::Config(_) | RlnError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
        };
        (status_for(&self.0), Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------
//
// Request bodies carrying an identity secret deliberately do not derive
// `Debug`.

/// Body of `POST /rln/send`.
#[derive(Deserialize)]
pub struct SendRequest {
    /// Hex-encoded identity secret.
    pub identity_secret: String,
    pub content: String,
    pub group: String,
}

/// Body of `POST /rln/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub proof: RlnProof,
    pub content: String,
    pub group: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(flatten)]
    pub verdict: Verdict,
}

/// Body of `POST /rln/budget`.
#[derive(Deserialize)]
pub struct BudgetRequest {
    pub identity_secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BudgetResponse {
    pub epoch: Epoch,
    pub remaining: u32,
    pub max_messages_per_epoch: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EpochResponse {
    pub epoch: Epoch,
    pub epoch_duration_ms: u64,
    pub time_remaining_ms: u64,
}

/// Body of `POST /reports`.
#[derive(Deserialize)]
pub struct SubmitReportRequest {
    pub identity_secret: String,
    pub content: String,
    pub group: String,
    /// Hex-encoded opaque payload stored with the anchor.
    #[serde(default)]
    pub payload: String,
    pub mode: AnchorMode,
}

/// Body of `POST /reports/accept`.
#[derive(Debug, Deserialize)]
pub struct AcceptReportRequest {
    pub proof: RlnProof,
    pub content: String,
    pub group: String,
    #[serde(default)]
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct AnchoringStatus {
    pub adapter: &'static str,
    pub ready: bool,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub engine: EngineStats,
    pub proof_backend: BackendHealth,
    pub anchoring: AnchoringStatus,
    /// RFC 3339 timestamp of the response.
    pub timestamp: String,
}

fn decode_payload(hex_payload: &str) -> Result<Vec<u8>, RlnError> {
    hex::decode(hex_payload.trim_start_matches("0x"))
        .map_err(|e| RlnError::InvalidInput(format!("payload is not hex: {e}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: returns 200 while the process is up.
///
/// Shaped as the proof service health body so remote backend clients can
/// check a node directly.
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".into(),
    })
}

/// `GET /status`: engine stats plus the health of both backends.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.service.engine();
    let stats = state.record_epoch();

    let proof_backend = match engine.backend().health().await {
        Ok(health) => health,
        Err(e) => BackendHealth {
            backend: engine.backend().name().to_string(),
            healthy: false,
            detail: Some(e.to_string()),
        },
    };
    let anchoring = state.service.anchoring();

    Json(StatusResponse {
        version: state.version.clone(),
        engine: stats,
        proof_backend,
        anchoring: AnchoringStatus {
            adapter: anchoring.name(),
            ready: anchoring.is_ready().await,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /rln/epoch`
async fn epoch_handler(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.service.engine();
    Json(EpochResponse {
        epoch: engine.current_epoch(),
        epoch_duration_ms: engine.config().epoch_duration.as_millis() as u64,
        time_remaining_ms: engine.epoch_time_remaining().as_millis() as u64,
    })
}

/// `POST /rln/send`: 429 once the identity's budget for the epoch is spent.
async fn send_handler(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<RlnProof>, ApiError> {
    let secret = IdentitySecret::from_hex(&req.identity_secret).map_err(|e| state.refuse(e))?;
    let group = GroupId::new(req.group).map_err(|e| state.refuse(e))?;

    let timer = state.metrics.proof_latency_seconds.start_timer();
    let proof = state
        .service
        .engine()
        .send(&secret, req.content.as_bytes(), &group)
        .await
        .map_err(|e| state.refuse(e))?;
    timer.observe_duration();

    state.record_proof(&proof);
    Ok(Json(proof))
}

/// `POST /rln/verify`: a rejected proof is a 200 with `valid: false`.
/// Backend failures are errors.
async fn verify_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let group = GroupId::new(req.group).map_err(|e| state.refuse(e))?;
    let verdict = state
        .service
        .engine()
        .verify_detailed(&req.proof, req.content.as_bytes(), &group)
        .await
        .map_err(|e| state.refuse(e))?;

    state
        .metrics
        .verifications_total
        .with_label_values(&[verdict.as_str()])
        .inc();

    Ok(Json(VerifyResponse {
        valid: verdict.is_accepted(),
        verdict,
    }))
}

/// `POST /rln/budget`
async fn budget_handler(
    State(state): State<AppState>,
    Json(req): Json<BudgetRequest>,
) -> Result<Json<BudgetResponse>, ApiError> {
    let secret = IdentitySecret::from_hex(&req.identity_secret).map_err(|e| state.refuse(e))?;
    let engine = state.service.engine();
    Ok(Json(BudgetResponse {
        epoch: engine.current_epoch(),
        remaining: engine.remaining_budget(&secret),
        max_messages_per_epoch: engine.config().max_messages_per_epoch,
    }))
}

/// `POST /reports`
async fn submit_report_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitReportRequest>,
) -> Result<Json<ReportReceipt>, ApiError> {
    let secret = IdentitySecret::from_hex(&req.identity_secret).map_err(|e| state.refuse(e))?;
    let group = GroupId::new(req.group).map_err(|e| state.refuse(e))?;
    let payload = decode_payload(&req.payload).map_err(|e| state.refuse(e))?;

    let receipt = state
        .service
        .submit_report(&secret, req.content.as_bytes(), &group, payload, req.mode)
        .await
        .map_err(|e| state.refuse(e))?;

    state.record_proof(&receipt.proof);
    state.record_receipt(&receipt);
    Ok(Json(receipt))
}

/// `POST /reports/accept`: 409 when the nullifier is already anchored.
async fn accept_report_handler(
    State(state): State<AppState>,
    Json(req): Json<AcceptReportRequest>,
) -> Result<Json<ReportReceipt>, ApiError> {
    let group = GroupId::new(req.group).map_err(|e| state.refuse(e))?;
    let payload = decode_payload(&req.payload).map_err(|e| state.refuse(e))?;

    let receipt = state
        .service
        .accept_report(&req.proof, req.content.as_bytes(), &group, payload)
        .await
        .map_err(|e| state.refuse(e))?;

    state.record_receipt(&receipt);
    Ok(Json(receipt))
}

/// `GET /circuits`
async fn circuits_handler(
    State(state): State<AppState>,
) -> Result<Json<CircuitsResponse>, ApiError> {
    let circuits = state.prover.circuits().await?;
    Ok(Json(CircuitsResponse { circuits }))
}

/// `POST /generate-proof`: proof service generation.
///
/// An unknown circuit is a 404. A refused witness is a 200 with
/// `success: false`, which clients treat as final.
async fn generate_proof_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GenerateProofRequest>,
) -> Response {
    let started = Instant::now();
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(&req.request_id)
        .to_string();

    let circuit = req.circuit_name;
    let outcome = req
        .inputs
        .into_parts()
        .and_then(|(private, public)| state.prover.prove(&circuit, &private, &public));

    let refused = |status: StatusCode, err: RlnError| {
        state.metrics.reject(err.kind());
        let body = GenerateProofResponse {
            success: false,
            proof: None,
            error: Some(err.to_string()),
            processing_time: None,
        };
        (status, Json(body)).into_response()
    };

    match outcome {
        Ok(artifact) => {
            let processing_ms = started.elapsed().as_millis() as u64;
            debug!(request_id = %request_id, processing_ms, "proof served");
            state.metrics.proofs_generated_total.inc();
            Json(GenerateProofResponse {
                success: true,
                proof: Some(WireProof {
                    proof: hex::encode(&artifact.proof),
                    public_signals: artifact.public_signals,
                }),
                error: None,
                processing_time: Some(processing_ms),
            })
            .into_response()
        }
        Err(e @ RlnError::UnsupportedCircuit(_)) => refused(StatusCode::NOT_FOUND, e),
        Err(e @ RlnError::InvalidInput(_)) => refused(StatusCode::BAD_REQUEST, e),
        Err(e) => refused(StatusCode::OK, e),
    }
}

/// `POST /verify-proof`: proof service verification.
async fn verify_proof_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifyProofRequest>,
) -> Result<Json<VerifyProofResponse>, ApiError> {
    let Ok(proof) = hex::decode(req.proof.trim_start_matches("0x")) else {
        return Ok(Json(VerifyProofResponse { valid: false }));
    };
    let artifact = ProofArtifact {
        circuit_id: req.circuit_name.clone(),
        proof,
        public_signals: req.public_signals.clone(),
        prover: ProverKind::Local,
    };
    let valid = state
        .prover
        .check(&req.circuit_name, &artifact, &req.public_signals)
        .map_err(|e| state.refuse(e))?;
    Ok(Json(VerifyProofResponse { valid }))
}

/// Compares digests so the check takes the same time wherever the
/// presented token first differs.
fn bearer_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|presented| {
            blake3::hash(presented.as_bytes()) == blake3::hash(expected.as_bytes())
        })
}

/// `POST /anchor-rpc`: serves this node's anchoring store to peers.
///
/// Unauthorized callers get 401 with an `UNAUTHORIZED` envelope. Everything
/// else answers 200 with a JSON-RPC envelope, including bodies that do not
/// parse.
async fn anchor_rpc_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorized = state
        .anchor_rpc_token
        .as_deref()
        .is_some_and(|token| bearer_matches(&headers, token));
    if !authorized {
        warn!("anchor rpc call refused: missing or wrong bearer token");
        let refusal = RpcResponse::failure(
            Value::Null,
            rpc::UNAUTHORIZED,
            "missing or wrong bearer token",
            None,
        );
        return (StatusCode::UNAUTHORIZED, Json(refusal)).into_response();
    }

    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            let failure =
                RpcResponse::failure(Value::Null, rpc::PARSE_ERROR, format!("parse error: {e}"), None);
            return Json(failure).into_response();
        }
    };
    Json(rpc::dispatch(state.service.anchoring().as_ref(), request).await).into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
