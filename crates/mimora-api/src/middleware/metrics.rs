//! # Prometheus Metrics
//!
//! HTTP-level metrics (request counts, latency, errors) are recorded in
//! middleware. KYC domain counters (provider calls, webhook outcomes,
//! request status transitions) are recorded by the KYC handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_errors_total: IntCounterVec,

    kyc_provider_calls_total: IntCounterVec,
    kyc_webhooks_total: IntCounterVec,
    kyc_transitions_total: IntCounterVec,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .finish()
    }
}

fn sum_counters(vec: &IntCounterVec) -> u64 {
    vec.collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

impl ApiMetrics {
    /// Create a new metrics instance with a fresh Prometheus registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("mimora_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "mimora_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["method", "path"],
        )?;
        let http_errors_total = IntCounterVec::new(
            Opts::new("mimora_http_errors_total", "Total HTTP errors (4xx and 5xx)"),
            &["method", "path", "status"],
        )?;
        let kyc_provider_calls_total = IntCounterVec::new(
            Opts::new(
                "mimora_kyc_provider_calls_total",
                "KYC provider session requests by workflow and outcome",
            ),
            &["workflow", "outcome"],
        )?;
        let kyc_webhooks_total = IntCounterVec::new(
            Opts::new("mimora_kyc_webhooks_total", "KYC provider callbacks by outcome"),
            &["outcome"],
        )?;
        let kyc_transitions_total = IntCounterVec::new(
            Opts::new(
                "mimora_kyc_transitions_total",
                "Verification request status after each state change",
            ),
            &["status"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(http_errors_total.clone()))?;
        registry.register(Box::new(kyc_provider_calls_total.clone()))?;
        registry.register(Box::new(kyc_webhooks_total.clone()))?;
        registry.register(Box::new(kyc_transitions_total.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_errors_total,
                kyc_provider_calls_total,
                kyc_webhooks_total,
                kyc_transitions_total,
            }),
        })
    }

    /// Total request count across all labels.
    pub fn requests(&self) -> u64 {
        sum_counters(&self.inner.http_requests_total)
    }

    /// Total error count across all labels.
    pub fn errors(&self) -> u64 {
        sum_counters(&self.inner.http_errors_total)
    }

    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();

        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);

        if status >= 400 {
            self.inner
                .http_errors_total
                .with_label_values(&[method, path, &status_str])
                .inc();
        }
    }

    /// Count one provider session request.
    pub fn record_provider_call(&self, workflow: &str, outcome: &str) {
        self.inner
            .kyc_provider_calls_total
            .with_label_values(&[workflow, outcome])
            .inc();
    }

    /// Count one inbound provider callback.
    pub fn record_webhook(&self, outcome: &str) {
        self.inner
            .kyc_webhooks_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count a request reaching `status`.
    pub fn record_transition(&self, status: &str) {
        self.inner
            .kyc_transitions_total
            .with_label_values(&[status])
            .inc();
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer).map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

/// Replace UUID path segments with `{id}` to bound label cardinality.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.len() == 36
                && segment.chars().enumerate().all(|(i, c)| {
                    if i == 8 || i == 13 || i == 18 || i == 23 {
                        c == '-'
                    } else {
                        c.is_ascii_hexdigit()
                    }
                })
            {
                "{id}"
            } else if segment.len() == 32 && segment.chars().all(|c| c.is_ascii_hexdigit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware that records HTTP request metrics.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        let duration = start.elapsed().as_secs_f64();
        m.record_request(&method, &path, response.status().as_u16(), duration);
    }

    response
}
