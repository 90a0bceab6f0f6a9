//! # Engine Configuration & Constants
//!
//! Every tunable of the rate-limiting engine lives here, together with the
//! protocol constants that must agree between provers, verifiers, and
//! anchoring ledgers. If two nodes disagree on a constant in this file they
//! will disagree on nullifiers, and then nothing else matters.
//!
//! Configuration is plain serde data so it can be loaded from a JSON file
//! and overridden from the command line by the node binary. Backends are
//! chosen here, once, at construction time. Nothing in the engine flips to
//! a different backend behind the caller's back.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Constants
// ---------------------------------------------------------------------------

/// Default epoch length: one hour, as in the original group-chat deployment.
pub const DEFAULT_EPOCH_DURATION: Duration = Duration::from_secs(60 * 60);

/// Default message budget per nullifier per epoch.
pub const DEFAULT_MAX_MESSAGES_PER_EPOCH: u32 = 50;

/// Circuit identifier for the membership + rate-limit statement.
pub const RLN_CIRCUIT_ID: &str = "membership_rln";

/// Number of public signals carried by an RLN proof:
/// `[nullifier, epoch, content_commitment, group]`.
pub const PUBLIC_SIGNAL_COUNT: usize = 4;

/// Upper bound for a single proof generation or verification call made by
/// the engine, regardless of backend. With a remote backend it must exceed
/// the remote retry budget (see [`RemoteProofConfig::retry_budget`]).
pub const DEFAULT_PROOF_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout for the remote proof service. Four attempts plus
/// backoff stay under [`DEFAULT_PROOF_TIMEOUT`].
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry attempts after the first failed request to a remote service.
pub const DEFAULT_REMOTE_RETRIES: u32 = 3;

/// Base backoff between retries; doubles every attempt (200ms, 400ms, 800ms).
pub const RETRY_BASE_DELAY_MS: u64 = 200;

/// Hard ceiling on configured retries. A retry budget beyond this turns a
/// bounded call into an unbounded one in practice.
pub const MAX_RETRIES: u32 = 8;

/// Default proof service location (matches the reference proof server).
pub const DEFAULT_PROOF_SERVER_URL: &str = "http://localhost:8080";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Problems loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// What the ledger does when a nullifier shows up again within budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayPolicy {
    /// Repeat use is allowed and counted, up to `max_messages_per_epoch`.
    #[default]
    BoundedReuse,
    /// Any repeat within the epoch is a `NullifierReplay`.
    SingleUse,
}

impl ReplayPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplayPolicy::BoundedReuse => "bounded-reuse",
            ReplayPolicy::SingleUse => "single-use",
        }
    }
}

impl FromStr for ReplayPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bounded-reuse" => Ok(ReplayPolicy::BoundedReuse),
            "single-use" => Ok(ReplayPolicy::SingleUse),
            other => Err(ConfigError::Invalid(format!("unknown replay policy `{other}`"))),
        }
    }
}

/// What the remote proof backend does once its retry budget is spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteFallback {
    /// Surface `BackendUnavailable` to the caller.
    #[default]
    Fail,
    /// Prove with the embedded local backend. Logged and marked on the artifact.
    Local,
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Settings for the remote proof service client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProofConfig {
    pub url: String,
    #[serde(with = "duration_ms", default = "default_remote_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default)]
    pub fallback: RemoteFallback,
}

impl RemoteProofConfig {
    /// Longest the client can spend before giving up on the service: every
    /// attempt timing out, plus the backoff between them.
    pub fn retry_budget(&self) -> Duration {
        let attempts = self.retries.saturating_add(1);
        let backoff_ms = RETRY_BASE_DELAY_MS.saturating_mul((1u64 << self.retries.min(32)) - 1);
        self.timeout
            .saturating_mul(attempts)
            .saturating_add(Duration::from_millis(backoff_ms))
    }
}

impl Default for RemoteProofConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_PROOF_SERVER_URL.to_string(),
            timeout: DEFAULT_REMOTE_TIMEOUT,
            retries: DEFAULT_REMOTE_RETRIES,
            fallback: RemoteFallback::Fail,
        }
    }
}

/// Which proof backend the engine is built with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProofBackendConfig {
    #[default]
    Local,
    Remote(RemoteProofConfig),
}

/// Settings for the external anchoring ledger client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAnchorConfig {
    pub url: String,
    /// Bearer credential presented to the ledger. Never logged.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(with = "duration_ms", default = "default_remote_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
}

/// Which anchoring adapter the service is built with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnchoringConfig {
    #[default]
    Stub,
    External(ExternalAnchorConfig),
}

// ---------------------------------------------------------------------------
// RlnConfig
// ---------------------------------------------------------------------------

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlnConfig {
    /// Length of one epoch.
    #[serde(with = "duration_ms")]
    pub epoch_duration: Duration,
    /// Message budget per nullifier per epoch.
    pub max_messages_per_epoch: u32,
    /// Repeat-use semantics within an epoch.
    pub replay_policy: ReplayPolicy,
    /// Epochs of slack accepted by `verify` (0 = strict).
    pub epoch_skew_tolerance: u64,
    /// Bound on each proof generation / verification call.
    #[serde(with = "duration_ms")]
    pub proof_timeout: Duration,
    pub proof_backend: ProofBackendConfig,
    pub anchoring_backend: AnchoringConfig,
}

impl Default for RlnConfig {
    fn default() -> Self {
        Self {
            epoch_duration: DEFAULT_EPOCH_DURATION,
            max_messages_per_epoch: DEFAULT_MAX_MESSAGES_PER_EPOCH,
            replay_policy: ReplayPolicy::default(),
            epoch_skew_tolerance: 0,
            proof_timeout: DEFAULT_PROOF_TIMEOUT,
            proof_backend: ProofBackendConfig::default(),
            anchoring_backend: AnchoringConfig::default(),
        }
    }
}

impl RlnConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: RlnConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty JSON, used by `rln-node init` to write a starter config.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations the engine cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epoch_duration.as_millis() == 0 {
            return Err(ConfigError::Invalid("epoch_duration must be non-zero".into()));
        }
        if self.max_messages_per_epoch == 0 {
            return Err(ConfigError::Invalid(
                "max_messages_per_epoch must be at least 1".into(),
            ));
        }
        if self.proof_timeout.is_zero() {
            return Err(ConfigError::Invalid("proof_timeout must be non-zero".into()));
        }
        if let ProofBackendConfig::Remote(remote) = &self.proof_backend {
            validate_endpoint("proof_backend.url", &remote.url)?;
            validate_budget("proof_backend", remote.timeout, remote.retries)?;
            // The engine's bound must leave room for every retry and for
            // the local fallback after them.
            let budget = remote.retry_budget();
            if self.proof_timeout <= budget {
                return Err(ConfigError::Invalid(format!(
                    "proof_timeout ({:?}) must exceed the remote retry budget ({:?}: {} attempt(s) of {:?} plus backoff)",
                    self.proof_timeout,
                    budget,
                    remote.retries + 1,
                    remote.timeout
                )));
            }
        }
        if let AnchoringConfig::External(external) = &self.anchoring_backend {
            validate_endpoint("anchoring_backend.url", &external.url)?;
            validate_budget("anchoring_backend", external.timeout, external.retries)?;
        }
        Ok(())
    }

    /// Human-readable verification mode, logged at startup.
    pub fn skew_mode(&self) -> String {
        if self.epoch_skew_tolerance == 0 {
            "strict".to_string()
        } else {
            format!("lenient(±{} epochs)", self.epoch_skew_tolerance)
        }
    }
}

fn validate_endpoint(field: &str, url: &str) -> Result<(), ConfigError> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Invalid(format!(
            "{field} must be an http(s) URL, got `{url}`"
        )));
    }
    Ok(())
}

fn validate_budget(field: &str, timeout: Duration, retries: u32) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::Invalid(format!("{field}.timeout must be non-zero")));
    }
    if retries > MAX_RETRIES {
        return Err(ConfigError::Invalid(format!(
            "{field}.retries must be at most {MAX_RETRIES}, got {retries}"
        )));
    }
    Ok(())
}

fn default_remote_timeout() -> Duration {
    DEFAULT_REMOTE_TIMEOUT
}

fn default_retries() -> u32 {
    DEFAULT_REMOTE_RETRIES
}

/// Durations travel as integer milliseconds in config files.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
