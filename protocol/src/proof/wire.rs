//! Request and response bodies of the proof service protocol.
//!
//! | Method | Path              | Body                       | Response                  |
//! |--------|-------------------|----------------------------|---------------------------|
//! | GET    | `/health`         |                            | [`HealthResponse`]        |
//! | GET    | `/circuits`       |                            | [`CircuitsResponse`]      |
//! | POST   | `/generate-proof` | [`GenerateProofRequest`]   | [`GenerateProofResponse`] |
//! | POST   | `/verify-proof`   | [`VerifyProofRequest`]     | [`VerifyProofResponse`]   |
//!
//! Generation requests also carry the request id in an `X-Request-ID`
//! header. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use super::{PrivateInputs, PublicSignals};
use crate::crypto::IdentitySecret;
use crate::error::{RlnError, RlnResult};
use crate::types::{Commitment, Epoch, GroupId};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Circuit inputs: the private witness plus the expected public signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitInputs {
    pub identity_secret: String,
    pub epoch: u64,
    pub group_id: String,
    pub content_commitment: Commitment,
    pub public_signals: Vec<String>,
}

impl CircuitInputs {
    pub fn new(private: &PrivateInputs, public: &PublicSignals) -> Self {
        Self {
            identity_secret: private.identity_secret.to_hex(),
            epoch: private.epoch.0,
            group_id: private.group.as_str().to_string(),
            content_commitment: private.content_commitment,
            public_signals: public.to_strings(),
        }
    }

    /// Split back into witness and statement, validating both.
    pub fn into_parts(self) -> RlnResult<(PrivateInputs, PublicSignals)> {
        let public = PublicSignals::parse(&self.public_signals)?;
        let private = PrivateInputs {
            identity_secret: IdentitySecret::from_hex(&self.identity_secret)?,
            epoch: Epoch(self.epoch),
            group: GroupId::new(self.group_id).map_err(|_| {
                RlnError::InvalidInput("circuit inputs carry an empty group id".into())
            })?,
            content_commitment: self.content_commitment,
        };
        Ok((private, public))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofRequest {
    pub circuit_name: String,
    pub inputs: CircuitInputs,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireProof {
    pub proof: String,
    pub public_signals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateProofResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<WireProof>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyProofRequest {
    pub circuit_name: String,
    pub proof: String,
    pub public_signals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyProofResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitsResponse {
    pub circuits: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{commit_content, derive_nullifier};

    #[test]
    fn request_uses_camel_case() {
        let secret = IdentitySecret::from_bytes(vec![1; 32]).unwrap();
        let group = GroupId::new("g").unwrap();
        let commitment = commit_content(b"m");
        let private = PrivateInputs {
            identity_secret: secret.clone(),
            epoch: Epoch(3),
            group: group.clone(),
            content_commitment: commitment,
        };
        let public =
            PublicSignals::new(derive_nullifier(&secret, Epoch(3)), Epoch(3), commitment, &group);

        let req = GenerateProofRequest {
            circuit_name: "membership_rln".into(),
            inputs: CircuitInputs::new(&private, &public),
            request_id: "r-1".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["circuitName"], "membership_rln");
        assert_eq!(json["requestId"], "r-1");
        assert_eq!(json["inputs"]["publicSignals"].as_array().unwrap().len(), 4);

        let parsed: GenerateProofRequest = serde_json::from_value(json).unwrap();
        let (p, s) = parsed.inputs.into_parts().unwrap();
        assert_eq!(s, public);
        assert_eq!(p.epoch, Epoch(3));
        assert_eq!(p.identity_secret, secret);
    }

    #[test]
    fn failure_response_omits_proof() {
        let resp = GenerateProofResponse {
            success: false,
            proof: None,
            error: Some("witness rejected".into()),
            processing_time: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("proof\""));
        assert!(json.contains("witness rejected"));
    }
}
