//! # Prometheus Metrics
//!
//! Operational metrics for the relief node, scraped at the `/metrics`
//! endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`]
//! under the `amparo` namespace so they do not collide with any default
//! global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are internally ref-counted) so it
/// can be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total zones created through this node.
    pub zones_created_total: IntCounter,
    /// Total vouchers issued.
    pub vouchers_issued_total: IntCounter,
    /// Redemption commands that confirmed.
    pub redemptions_confirmed_total: IntCounter,
    /// Redemption commands rejected with a typed reason.
    pub redemptions_rejected_total: IntCounter,
    /// Relief funds disbursed through confirmed redemptions, in cents.
    pub funds_disbursed_cents_total: IntCounter,
    /// Proof-of-aid submissions attached to redemptions.
    pub proofs_attached_total: IntCounter,
    /// Fraud alerts raised by the analyzer.
    pub fraud_alerts_total: IntCounter,
    /// Unused, unexpired vouchers currently in circulation.
    pub outstanding_vouchers: IntGauge,
    /// Unused vouchers past expiry, as of the last sweep.
    pub expired_vouchers: IntGauge,
    /// End-to-end latency of the redeem command in seconds.
    pub redemption_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("amparo".into()), None)
            .expect("failed to create prometheus registry");

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::new(name, help).expect("metric creation");
            registry.register(Box::new(c.clone())).expect("metric registration");
            c
        }

        fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let g = IntGauge::new(name, help).expect("metric creation");
            registry.register(Box::new(g.clone())).expect("metric registration");
            g
        }

        let zones_created_total =
            counter(&registry, "zones_created_total", "Total disaster zones created");
        let vouchers_issued_total =
            counter(&registry, "vouchers_issued_total", "Total vouchers issued");
        let redemptions_confirmed_total = counter(
            &registry,
            "redemptions_confirmed_total",
            "Redemption commands that confirmed",
        );
        let redemptions_rejected_total = counter(
            &registry,
            "redemptions_rejected_total",
            "Redemption commands rejected with a typed reason",
        );
        let funds_disbursed_cents_total = counter(
            &registry,
            "funds_disbursed_cents_total",
            "Relief funds disbursed through confirmed redemptions, in cents",
        );
        let proofs_attached_total = counter(
            &registry,
            "proofs_attached_total",
            "Proof-of-aid submissions attached to redemptions",
        );
        let fraud_alerts_total = counter(
            &registry,
            "fraud_alerts_total",
            "Fraud alerts raised by the analyzer",
        );
        let outstanding_vouchers = gauge(
            &registry,
            "outstanding_vouchers",
            "Unused, unexpired vouchers currently in circulation",
        );
        let expired_vouchers = gauge(
            &registry,
            "expired_vouchers",
            "Unused vouchers past expiry, as of the last sweep",
        );

        let redemption_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "redemption_latency_seconds",
                "End-to-end latency of the redeem command in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(redemption_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            zones_created_total,
            vouchers_issued_total,
            redemptions_confirmed_total,
            redemptions_rejected_total,
            funds_disbursed_cents_total,
            proofs_attached_total,
            fraud_alerts_total,
            outstanding_vouchers,
            expired_vouchers,
            redemption_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition
    /// format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics handle passed to axum handlers via state.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
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
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
