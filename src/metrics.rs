// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics collection for TCE Proxy.
//!
//! Tracks request volume, upstream health and how often payloads need repair.

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

use crate::error::AppError;

/// Metrics collector for the proxy
#[derive(Clone)]
pub struct Metrics {
    pub registry: Arc<Registry>,

    // Request metrics
    pub requests_total: IntCounter,

    // Upstream metrics
    pub upstream_requests: IntCounter,
    pub upstream_failures: IntCounter,
    pub upstream_latency: Histogram,

    // Payload metrics
    pub payload_repairs: IntCounter,
    pub payload_parse_failures: IntCounter,
}

fn metric_error(e: prometheus::Error) -> AppError {
    AppError::Internal(anyhow::anyhow!("Failed to create metric: {}", e))
}

impl Metrics {
    pub fn new() -> Result<Self, AppError> {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "tce_proxy_requests_total",
            "Total number of proxied API requests",
        ))
        .map_err(metric_error)?;

        let upstream_requests = IntCounter::with_opts(Opts::new(
            "tce_proxy_upstream_requests_total",
            "Total number of upstream fetches, each possibly spanning several attempts",
        ))
        .map_err(metric_error)?;

        let upstream_failures = IntCounter::with_opts(Opts::new(
            "tce_proxy_upstream_failures_total",
            "Total number of upstream fetches that failed or returned a non-2xx status",
        ))
        .map_err(metric_error)?;

        let upstream_latency = Histogram::with_opts(
            HistogramOpts::new(
                "tce_proxy_upstream_latency_seconds",
                "Duration of upstream fetches in seconds, retries included",
            )
            .buckets(vec![
                0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 70.0,
            ]),
        )
        .map_err(metric_error)?;

        let payload_repairs = IntCounter::with_opts(Opts::new(
            "tce_proxy_payload_repairs_total",
            "Total number of upstream payloads that only parsed after repair",
        ))
        .map_err(metric_error)?;

        let payload_parse_failures = IntCounter::with_opts(Opts::new(
            "tce_proxy_payload_parse_failures_total",
            "Total number of upstream payloads that could not be parsed",
        ))
        .map_err(metric_error)?;

        let collectors: [Box<dyn prometheus::core::Collector>; 6] = [
            Box::new(requests_total.clone()),
            Box::new(upstream_requests.clone()),
            Box::new(upstream_failures.clone()),
            Box::new(upstream_latency.clone()),
            Box::new(payload_repairs.clone()),
            Box::new(payload_parse_failures.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to register metric: {}", e))
            })?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            upstream_requests,
            upstream_failures,
            upstream_latency,
            payload_repairs,
            payload_parse_failures,
        })
    }

    /// Record an incoming API request
    pub fn record_request(&self) {
        self.requests_total.inc();
    }

    /// Record an upstream fetch
    pub fn record_upstream_request(&self) {
        self.upstream_requests.inc();
    }

    /// Record a failed upstream fetch
    pub fn record_upstream_failure(&self) {
        self.upstream_failures.inc();
    }

    /// Observe latency for an upstream fetch in seconds
    pub fn record_upstream_latency(&self, seconds: f64) {
        self.upstream_latency.observe(seconds);
    }

    pub fn record_payload_repair(&self) {
        self.payload_repairs.inc();
    }

    pub fn record_payload_parse_failure(&self) {
        self.payload_parse_failures.inc();
    }

    /// Export metrics in Prometheus format
    pub fn export(&self) -> Result<String, AppError> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode metrics: {}", e)))?;

        String::from_utf8(buffer).map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to convert metrics to string: {}",
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_contains_recorded_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request();
        metrics.record_payload_repair();
        metrics.record_upstream_latency(0.3);

        let text = metrics.export().unwrap();

        assert!(text.contains("tce_proxy_requests_total 1"));
        assert!(text.contains("tce_proxy_payload_repairs_total 1"));
        assert!(text.contains("tce_proxy_upstream_latency_seconds_count 1"));
    }
}
