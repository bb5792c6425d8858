//! # Prometheus Metrics
//!
//! Exposes operational metrics for a `bcache` peer. Scraped by Prometheus
//! at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it can
/// be shared across request handlers and background tasks.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Current number of entries held by the LRU (live and not-yet-purged
    /// tombstones).
    pub cache_size: IntGauge,
    /// Total `Get` calls that found a visible entry.
    pub gets_hit_total: IntCounter,
    /// Total `Get` calls that found nothing (absent, expired, or
    /// tombstoned).
    pub gets_miss_total: IntCounter,
    /// Total local `Set` calls.
    pub sets_total: IntCounter,
    /// Total local `Delete` calls that found an existing key.
    pub deletes_total: IntCounter,
    /// Total entries purged at read time (expired or tombstoned) or by LRU
    /// eviction.
    pub evictions_total: IntCounter,
    /// Total gossip merges (broadcast, pull, and unicast combined) that
    /// accepted at least one entry.
    pub gossip_merges_applied_total: IntCounter,
    /// Total single-flight filler invocations (one per cold-key miss,
    /// regardless of how many concurrent callers shared the outcome).
    pub filler_invocations_total: IntCounter,
    /// Number of currently connected mesh peers.
    pub connected_peers: IntGauge,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("bcache".into()), None)
            .expect("failed to create prometheus registry");

        let cache_size = IntGauge::new("cache_size", "Current number of entries held by the LRU")
            .expect("metric creation");
        registry
            .register(Box::new(cache_size.clone()))
            .expect("metric registration");

        let gets_hit_total = IntCounter::new("gets_hit_total", "Total Get calls that hit")
            .expect("metric creation");
        registry
            .register(Box::new(gets_hit_total.clone()))
            .expect("metric registration");

        let gets_miss_total = IntCounter::new("gets_miss_total", "Total Get calls that missed")
            .expect("metric creation");
        registry
            .register(Box::new(gets_miss_total.clone()))
            .expect("metric registration");

        let sets_total =
            IntCounter::new("sets_total", "Total local Set calls").expect("metric creation");
        registry
            .register(Box::new(sets_total.clone()))
            .expect("metric registration");

        let deletes_total = IntCounter::new(
            "deletes_total",
            "Total local Delete calls that found an existing key",
        )
        .expect("metric creation");
        registry
            .register(Box::new(deletes_total.clone()))
            .expect("metric registration");

        let evictions_total = IntCounter::new(
            "evictions_total",
            "Total entries purged by read-time expiry/tombstone checks or LRU eviction",
        )
        .expect("metric creation");
        registry
            .register(Box::new(evictions_total.clone()))
            .expect("metric registration");

        let gossip_merges_applied_total = IntCounter::new(
            "gossip_merges_applied_total",
            "Total gossip merges that accepted at least one entry",
        )
        .expect("metric creation");
        registry
            .register(Box::new(gossip_merges_applied_total.clone()))
            .expect("metric registration");

        let filler_invocations_total = IntCounter::new(
            "filler_invocations_total",
            "Total single-flight filler invocations",
        )
        .expect("metric creation");
        registry
            .register(Box::new(filler_invocations_total.clone()))
            .expect("metric registration");

        let connected_peers =
            IntGauge::new("connected_peers", "Number of currently connected mesh peers")
                .expect("metric creation");
        registry
            .register(Box::new(connected_peers.clone()))
            .expect("metric registration");

        Self {
            registry,
            cache_size,
            gets_hit_total,
            gets_miss_total,
            sets_total,
            deletes_total,
            evictions_total,
            gossip_merges_applied_total,
            filler_invocations_total,
            connected_peers,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
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

/// Shared metrics state passed to axum handlers via extension.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_encode_without_panicking() {
        let metrics = NodeMetrics::new();
        metrics.sets_total.inc();
        metrics.gets_hit_total.inc();
        metrics.cache_size.set(3);
        let text = metrics.encode().expect("encode");
        assert!(text.contains("bcache_sets_total"));
        assert!(text.contains("bcache_cache_size"));
    }
}
