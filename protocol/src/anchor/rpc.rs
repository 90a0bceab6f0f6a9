//! JSON-RPC 2.0 protocol of a shared anchoring ledger.
//!
//! | Method                | Params                        | Result                     |
//! |-----------------------|-------------------------------|----------------------------|
//! | `rln_anchor`          | [`AnchorRequest`]             | `{ reference, created }`   |
//! | `rln_isUsed`          | `{ nullifier, epoch }`        | `bool`                     |
//! | `rln_find`            | `{ nullifier, epoch }`        | [`AnchoredRecord`] or null |
//! | `rln_lookup`          | `{ reference }`               | [`AnchoredRecord`] or null |
//! | `rln_epochNullifiers` | `{ epoch }`                   | `[nullifier]`              |
//! | `rln_health`          | none                          | `{ "status": "healthy" }`  |
//!
//! A taken pair answers `rln_anchor` with error [`ANCHOR_CONFLICT`] and
//! `data.existingReference`. [`dispatch`] serves the protocol from any
//! [`AnchoringAdapter`], which is how a node exposes its store to peers.
//! Servers that require a bearer credential answer a missing or wrong one
//! with [`UNAUTHORIZED`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{AnchorRequest, AnchoringAdapter};
use crate::error::RlnError;
use crate::types::{Epoch, Nullifier};

pub const METHOD_ANCHOR: &str = "rln_anchor";
pub const METHOD_IS_USED: &str = "rln_isUsed";
pub const METHOD_FIND: &str = "rln_find";
pub const METHOD_LOOKUP: &str = "rln_lookup";
pub const METHOD_EPOCH_NULLIFIERS: &str = "rln_epochNullifiers";
pub const METHOD_HEALTH: &str = "rln_health";

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// The `(nullifier, epoch)` pair is already anchored with different content.
pub const ANCHOR_CONFLICT: i64 = -32010;
/// The ledger cannot durably record right now.
pub const LEDGER_UNAVAILABLE: i64 = -32011;
/// Missing or wrong bearer credential.
pub const UNAUTHORIZED: i64 = -32012;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

impl RpcRequest {
    pub fn new(method: &str, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: json!(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data,
            }),
            id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PairParams {
    pub nullifier: Nullifier,
    pub epoch: Epoch,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReferenceParams {
    pub reference: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EpochParams {
    pub epoch: Epoch,
}

fn params<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError {
        code: INVALID_PARAMS,
        message: format!("invalid params: {e}"),
        data: None,
    })
}

fn to_rpc_error(err: RlnError) -> RpcError {
    match err {
        RlnError::AnchoringConflict {
            existing_reference, ..
        } => RpcError {
            code: ANCHOR_CONFLICT,
            message: "nullifier already anchored for this epoch".into(),
            data: Some(json!({ "existingReference": existing_reference })),
        },
        RlnError::InvalidInput(msg) => RpcError {
            code: INVALID_PARAMS,
            message: msg,
            data: None,
        },
        RlnError::AnchoringUnavailable(msg) => RpcError {
            code: LEDGER_UNAVAILABLE,
            message: msg,
            data: None,
        },
        other => RpcError {
            code: INTERNAL_ERROR,
            message: other.to_string(),
            data: None,
        },
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError {
        code: INTERNAL_ERROR,
        message: e.to_string(),
        data: None,
    })
}

/// Serve one request from `adapter`.
pub async fn dispatch(adapter: &dyn AnchoringAdapter, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();
    if request.jsonrpc != "2.0" {
        return RpcResponse::failure(id, PARSE_ERROR, "jsonrpc must be \"2.0\"", None);
    }

    let outcome: Result<Value, RpcError> = match request.method.as_str() {
        METHOD_ANCHOR => match params::<AnchorRequest>(request.params) {
            Ok(req) => match adapter.anchor(req).await {
                Ok(outcome) => encode(outcome),
                Err(e) => Err(to_rpc_error(e)),
            },
            Err(e) => Err(e),
        },
        METHOD_IS_USED => match params::<PairParams>(request.params) {
            Ok(p) => adapter
                .is_used(&p.nullifier, p.epoch)
                .await
                .map(Value::Bool)
                .map_err(to_rpc_error),
            Err(e) => Err(e),
        },
        METHOD_FIND => match params::<PairParams>(request.params) {
            Ok(p) => match adapter.find(&p.nullifier, p.epoch).await {
                Ok(record) => encode(record),
                Err(e) => Err(to_rpc_error(e)),
            },
            Err(e) => Err(e),
        },
        METHOD_LOOKUP => match params::<ReferenceParams>(request.params) {
            Ok(p) => match adapter.lookup(&p.reference).await {
                Ok(record) => encode(record),
                Err(e) => Err(to_rpc_error(e)),
            },
            Err(e) => Err(e),
        },
        METHOD_EPOCH_NULLIFIERS => match params::<EpochParams>(request.params) {
            Ok(p) => match adapter.epoch_nullifiers(p.epoch).await {
                Ok(list) => encode(list),
                Err(e) => Err(to_rpc_error(e)),
            },
            Err(e) => Err(e),
        },
        METHOD_HEALTH => {
            let status = if adapter.is_ready().await { "healthy" } else { "unavailable" };
            Ok(json!({ "status": status }))
        }
        other => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: format!("method not found: {other}"),
            data: None,
        }),
    };

    match outcome {
        Ok(result) => RpcResponse::ok(id, result),
        Err(error) => RpcResponse::failure(id, error.code, error.message, error.data),
    }
}
