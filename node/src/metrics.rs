//! # Prometheus Metrics
//!
//! Operational metrics for the node, scraped at `/metrics` on the metrics
//! port. Rejections are labelled by error kind (`RlnError::kind`) and
//! verifications by verdict, so a spike in `nullifier_replay` is visible
//! separately from ordinary rate limiting.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] with the `rln`
//! prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Proofs issued by `send` and report submission.
    pub proofs_generated_total: IntCounter,
    /// Proofs produced by the local prover because the remote service was down.
    pub proof_fallbacks_total: IntCounter,
    /// Refused operations, by error kind.
    pub rejections_total: IntCounterVec,
    /// Verification outcomes, by verdict.
    pub verifications_total: IntCounterVec,
    /// Reports durably anchored.
    pub anchors_total: IntCounter,
    /// Reports accepted with anchoring still pending.
    pub anchors_pending_total: IntCounter,
    /// Current epoch index.
    pub current_epoch: IntGauge,
    /// Distinct nullifiers admitted in the current epoch.
    pub active_nullifiers: IntGauge,
    /// Wall time of proof generation in `send`.
    pub proof_latency_seconds: Histogram,
}

fn register<C: Collector + Clone + 'static>(registry: &Registry, metric: C) -> prometheus::Result<C> {
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("rln".into()), None)?;

        let proofs_generated_total = register(
            &registry,
            IntCounter::new("proofs_generated_total", "Proofs issued by this node")?,
        )?;
        let proof_fallbacks_total = register(
            &registry,
            IntCounter::new(
                "proof_fallbacks_total",
                "Proofs generated locally after the remote proof service failed",
            )?,
        )?;
        let rejections_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("rejections_total", "Refused operations by error kind"),
                &["kind"],
            )?,
        )?;
        let verifications_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("verifications_total", "Proof verifications by verdict"),
                &["verdict"],
            )?,
        )?;
        let anchors_total = register(
            &registry,
            IntCounter::new("anchors_total", "Reports durably anchored")?,
        )?;
        let anchors_pending_total = register(
            &registry,
            IntCounter::new(
                "anchors_pending_total",
                "Reports accepted optimistically with anchoring pending",
            )?,
        )?;
        let current_epoch = register(
            &registry,
            IntGauge::new("current_epoch", "Current epoch index")?,
        )?;
        let active_nullifiers = register(
            &registry,
            IntGauge::new(
                "active_nullifiers",
                "Distinct nullifiers admitted in the current epoch",
            )?,
        )?;
        let proof_latency_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new(
                    "proof_latency_seconds",
                    "Proof generation latency in seconds",
                )
                .buckets(vec![
                    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ]),
            )?,
        )?;

        Ok(Self {
            registry,
            proofs_generated_total,
            proof_fallbacks_total,
            rejections_total,
            verifications_total,
            anchors_total,
            anchors_pending_total,
            current_epoch,
            active_nullifiers,
            proof_latency_seconds,
        })
    }

    /// Count a refused operation.
    pub fn reject(&self, kind: &str) {
        self.rejections_total.with_label_values(&[kind]).inc();
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
