// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for gate decisions and store round trips.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Metrics owned by one gateway instance.
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    store_failures: IntCounterVec,
    round_trips: HistogramVec,
}

impl GatewayMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new("gateway_decisions_total", "Gate decisions by outcome"),
            &["outcome"],
        )?;
        let store_failures = IntCounterVec::new(
            Opts::new(
                "gateway_store_failures_total",
                "Failed or timed out shared store round trips",
            ),
            &["component"],
        )?;
        let round_trips = HistogramVec::new(
            HistogramOpts::new(
                "gateway_store_round_trip_seconds",
                "Shared store round trip latency",
            )
            .buckets(vec![0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]),
            &["operation"],
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(store_failures.clone()))?;
        registry.register(Box::new(round_trips.clone()))?;

        Ok(Self {
            registry,
            decisions,
            store_failures,
            round_trips,
        })
    }

    /// Count one gate decision (`admitted`, `unprotected`, `unauthenticated`, `throttled`).
    pub fn record_decision(&self, outcome: &str) {
        self.decisions.with_label_values(&[outcome]).inc();
    }

    pub fn record_store_failure(&self, component: &str) {
        self.store_failures.with_label_values(&[component]).inc();
    }

    pub fn observe_round_trip(&self, operation: &str, elapsed: Duration) {
        self.round_trips
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    pub fn decision_count(&self, outcome: &str) -> u64 {
        self.decisions.with_label_values(&[outcome]).get()
    }

    pub fn store_failure_count(&self, component: &str) -> u64 {
        self.store_failures.with_label_values(&[component]).get()
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_values() {
        let metrics = GatewayMetrics::new().unwrap();
        metrics.record_decision("throttled");
        metrics.record_decision("throttled");
        metrics.record_store_failure("admission");
        metrics.observe_round_trip("admission_script", Duration::from_millis(2));

        assert_eq!(metrics.decision_count("throttled"), 2);
        assert_eq!(metrics.store_failure_count("admission"), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("gateway_decisions_total{outcome=\"throttled\"} 2"));
        assert!(text.contains("gateway_store_failures_total{component=\"admission\"} 1"));
        assert!(text.contains("gateway_store_round_trip_seconds_count{operation=\"admission_script\"} 1"));
    }
}
