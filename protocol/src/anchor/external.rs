//! # External Ledger Anchor
//!
//! Anchors nullifiers in a shared ledger service over JSON-RPC (see
//! [`super::rpc`]). The ledger owns the uniqueness constraint on
//! `(nullifier, epoch)`. This client only has to map its answers onto the
//! adapter contract.
//!
//! ## Partial failure
//!
//! If the ledger commits an anchor but the response is lost, the client
//! cannot tell that apart from a failed write. It retries the identical
//! request, with the same request id. The ledger answers it with the
//! existing reference and `created: true`, so the retry converges on the
//! record that was written instead of erroring, writing twice, or looking
//! like someone else's anchor.
//!
//! ## Security
//!
//! The bearer credential is sent on every call and never logged.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::rpc::{
    RpcError, RpcRequest, RpcResponse, ANCHOR_CONFLICT, INVALID_PARAMS, METHOD_ANCHOR,
    METHOD_EPOCH_NULLIFIERS, METHOD_FIND, METHOD_HEALTH, METHOD_IS_USED, METHOD_LOOKUP,
};
use super::{AnchorOutcome, AnchorRequest, AnchoredRecord, AnchoringAdapter};
use crate::config::ExternalAnchorConfig;
use crate::error::{RlnError, RlnResult};
use crate::retry::{send_with_retry, RetryPolicy};
use crate::types::{Epoch, Nullifier};

/// Why an RPC call did not produce a result.
#[derive(Debug)]
enum CallFailure {
    Transport(String),
    Rpc(RpcError),
}

/// JSON-RPC anchoring adapter.
pub struct ExternalAnchor {
    client: reqwest::Client,
    url: String,
    credential: Option<String>,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl fmt::Debug for ExternalAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalAnchor")
            .field("url", &self.url)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("retries", &self.retry.retries)
            .finish()
    }
}

impl ExternalAnchor {
    pub fn new(config: &ExternalAnchorConfig) -> RlnResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                RlnError::AnchoringUnavailable(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self {
            client,
            url: config.url.clone(),
            credential: config.credential.clone(),
            retry: RetryPolicy::new(config.retries),
            next_id: AtomicU64::new(1),
        })
    }

    /// Override the base backoff delay.
    pub fn with_retry_delay(mut self, base_delay: std::time::Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }

    async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, CallFailure> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest::new(method, params, id);

        let resp = send_with_retry(&self.retry, "anchor-ledger", || {
            let mut req = self.client.post(&self.url).json(&body);
            if let Some(token) = &self.credential {
                req = req.bearer_auth(token);
            }
            req.send()
        })
        .await
        .map_err(|e| CallFailure::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CallFailure::Transport(format!("{method}: HTTP {status}")));
        }

        let parsed: RpcResponse = resp
            .json()
            .await
            .map_err(|e| CallFailure::Transport(format!("{method}: invalid JSON response: {e}")))?;

        if let Some(error) = parsed.error {
            return Err(CallFailure::Rpc(error));
        }
        // `"result": null` and an absent result both decode to `None`.
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> RlnResult<T> {
        let value = self.rpc_call(method, params).await.map_err(Self::plain_error)?;
        serde_json::from_value(value)
            .map_err(|e| RlnError::AnchoringUnavailable(format!("{method}: unexpected result: {e}")))
    }

    fn plain_error(failure: CallFailure) -> RlnError {
        match failure {
            CallFailure::Transport(msg) => RlnError::AnchoringUnavailable(msg),
            CallFailure::Rpc(e) if e.code == INVALID_PARAMS => RlnError::InvalidInput(e.message),
            CallFailure::Rpc(e) => {
                RlnError::AnchoringUnavailable(format!("ledger error {}: {}", e.code, e.message))
            }
        }
    }
}

#[async_trait]
impl AnchoringAdapter for ExternalAnchor {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn anchor(&self, request: AnchorRequest) -> RlnResult<AnchorOutcome> {
        let params = serde_json::to_value(&request)
            .map_err(|e| RlnError::InvalidInput(format!("unencodable anchor request: {e}")))?;

        match self.rpc_call(METHOD_ANCHOR, params).await {
            Ok(result) => {
                let outcome: AnchorOutcome = serde_json::from_value(result).map_err(|e| {
                    RlnError::AnchoringUnavailable(format!("rln_anchor: unexpected result: {e}"))
                })?;
                debug!(
                    reference = %outcome.reference,
                    created = outcome.created,
                    epoch = request.epoch.0,
                    "nullifier anchored in ledger"
                );
                Ok(outcome)
            }
            Err(CallFailure::Rpc(e)) if e.code == ANCHOR_CONFLICT => {
                let existing_reference = e
                    .data
                    .as_ref()
                    .and_then(|d| d.get("existingReference"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                warn!(
                    nullifier = %request.nullifier,
                    epoch = request.epoch.0,
                    existing = %existing_reference,
                    "ledger reports anchoring conflict"
                );
                Err(RlnError::AnchoringConflict {
                    nullifier: request.nullifier,
                    epoch: request.epoch,
                    existing_reference,
                })
            }
            Err(other) => Err(Self::plain_error(other)),
        }
    }

    async fn is_used(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<bool> {
        self.call(METHOD_IS_USED, json!({ "nullifier": nullifier, "epoch": epoch }))
            .await
    }

    async fn find(&self, nullifier: &Nullifier, epoch: Epoch) -> RlnResult<Option<AnchoredRecord>> {
        self.call(METHOD_FIND, json!({ "nullifier": nullifier, "epoch": epoch }))
            .await
    }

    async fn lookup(&self, reference: &str) -> RlnResult<Option<AnchoredRecord>> {
        self.call(METHOD_LOOKUP, json!({ "reference": reference })).await
    }

    async fn epoch_nullifiers(&self, epoch: Epoch) -> RlnResult<Vec<Nullifier>> {
        self.call(METHOD_EPOCH_NULLIFIERS, json!({ "epoch": epoch })).await
    }

    async fn is_ready(&self) -> bool {
        match self.call::<Value>(METHOD_HEALTH, Value::Null).await {
            Ok(body) => body.get("status").and_then(Value::as_str) == Some("healthy"),
            Err(e) => {
                debug!(error = %e, "anchor ledger not ready");
                false
            }
        }
    }
}
