// Admission metrics
//
// Every resolved admission decision is reported to a MetricsProvider owned by
// the throttler. Providers are fire-and-forget: they see (consumer, priority,
// result) after the admission state has settled and cannot influence it.
//
// Providers:
// - NoopMetrics: the default, discards everything
// - PrometheusMetrics: throttle_results_total{consumer, priority, result}

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::fmt;

use crate::throttle::{AdmissionResult, Priority};

/// Label value used when a request carried no consumer or priority
pub const ABSENT_LABEL: &str = "none";

/// Sink for admission outcomes
pub trait MetricsProvider: fmt::Debug + Send + Sync {
    /// Called once per admission decision. Must not block.
    fn record_admission(
        &self,
        consumer: Option<&str>,
        priority: Option<Priority>,
        result: AdmissionResult,
    );
}

/// Discards every observation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsProvider for NoopMetrics {
    fn record_admission(&self, _: Option<&str>, _: Option<Priority>, _: AdmissionResult) {}
}

/// Counts admission outcomes in a Prometheus counter vector
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    results: IntCounterVec,
}

impl PrometheusMetrics {
    /// Create the `throttle_results_total` counter
    pub fn new() -> prometheus::Result<Self> {
        Self::with_name("throttle_results_total")
    }

    /// Create a counter with a custom metric name
    pub fn with_name(name: &str) -> prometheus::Result<Self> {
        let results = IntCounterVec::new(
            Opts::new(name, "Admission decisions by consumer, priority and result"),
            &["consumer", "priority", "result"],
        )?;
        Ok(Self { results })
    }

    /// Register the counter with `registry`
    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.results.clone()))
    }

    /// Current count for one label combination
    pub fn count(
        &self,
        consumer: Option<&str>,
        priority: Option<Priority>,
        result: AdmissionResult,
    ) -> u64 {
        self.results
            .with_label_values(&labels(consumer, priority, result))
            .get()
    }
}

impl MetricsProvider for PrometheusMetrics {
    fn record_admission(
        &self,
        consumer: Option<&str>,
        priority: Option<Priority>,
        result: AdmissionResult,
    ) {
        self.results
            .with_label_values(&labels(consumer, priority, result))
            .inc();
    }
}

fn labels(
    consumer: Option<&str>,
    priority: Option<Priority>,
    result: AdmissionResult,
) -> [&str; 3] {
    [
        consumer.unwrap_or(ABSENT_LABEL),
        priority.map_or(ABSENT_LABEL, |p| p.as_str()),
        result.reason(),
    ]
}

/// Gather all metrics of `registry` in Prometheus text format
pub fn gather_metrics(registry: &Registry) -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
