//! Request and latency statistics for the prediction service.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Latency samples kept before the oldest half is dropped.
const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Metrics collector shared by all request handlers
pub struct ServingMetrics {
    /// Successful predictions
    pub predictions_served: AtomicU64,
    /// Failed prediction requests
    pub predictions_failed: AtomicU64,
    /// Failures by kind (validation, configuration, inference, not_found, ...)
    failures_by_kind: RwLock<BTreeMap<String, u64>>,
    /// Successful predictions per model tag
    predictions_by_model: RwLock<BTreeMap<String, u64>>,
    /// End-to-end prediction latency (in microseconds)
    latencies: RwLock<Vec<u64>>,
    start_time: Instant,
    started_at: DateTime<Utc>,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            predictions_failed: AtomicU64::new(0),
            failures_by_kind: RwLock::new(BTreeMap::new()),
            predictions_by_model: RwLock::new(BTreeMap::new()),
            latencies: RwLock::new(Vec::with_capacity(1000)),
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Record a successful prediction
    pub fn record_prediction(&self, model_tag: &str, latency: Duration) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_model) = self.predictions_by_model.write() {
            *by_model.entry(model_tag.to_string()).or_insert(0) += 1;
        }

        if let Ok(mut times) = self.latencies.write() {
            times.push(latency.as_micros() as u64);
            if times.len() > MAX_LATENCY_SAMPLES {
                times.drain(0..MAX_LATENCY_SAMPLES / 2);
            }
        }
    }

    /// Record a failed prediction request
    pub fn record_failure(&self, kind: &str) {
        self.predictions_failed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut by_kind) = self.failures_by_kind.write() {
            *by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    /// Latency statistics over the retained samples
    pub fn latency_stats(&self) -> LatencyStats {
        let Ok(times) = self.latencies.read() else {
            return LatencyStats::default();
        };
        if times.is_empty() {
            return LatencyStats::default();
        }

        let mut sorted = times.clone();
        drop(times);
        sorted.sort_unstable();

        let count = sorted.len();
        let sum: u64 = sorted.iter().sum();
        let at = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];

        LatencyStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: at(0.50),
            p95_us: at(0.95),
            p99_us: at(0.99),
            max_us: sorted[count - 1],
        }
    }

    pub fn failures_by_kind(&self) -> BTreeMap<String, u64> {
        self.failures_by_kind
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn predictions_by_model(&self) -> BTreeMap<String, u64> {
        self.predictions_by_model
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Successful predictions per second since startup
    pub fn throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.predictions_served.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Prometheus text exposition of the counters and latency quantiles.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        let served = self.predictions_served.load(Ordering::Relaxed);
        let failed = self.predictions_failed.load(Ordering::Relaxed);

        let _ = writeln!(out, "# TYPE model_serving_predictions_total counter");
        for (model, count) in self.predictions_by_model() {
            let _ = writeln!(
                out,
                "model_serving_predictions_total{{model=\"{}\"}} {}",
                escape_label(&model),
                count
            );
        }
        let _ = writeln!(out, "# TYPE model_serving_predictions_served counter");
        let _ = writeln!(out, "model_serving_predictions_served {}", served);

        let _ = writeln!(out, "# TYPE model_serving_failures_total counter");
        let _ = writeln!(out, "model_serving_failures_total {}", failed);
        for (kind, count) in self.failures_by_kind() {
            let _ = writeln!(
                out,
                "model_serving_failures_total{{kind=\"{}\"}} {}",
                escape_label(&kind),
                count
            );
        }

        let stats = self.latency_stats();
        let _ = writeln!(out, "# TYPE model_serving_latency_us summary");
        for (q, v) in [("0.5", stats.p50_us), ("0.95", stats.p95_us), ("0.99", stats.p99_us)] {
            let _ = writeln!(out, "model_serving_latency_us{{quantile=\"{}\"}} {}", q, v);
        }
        let _ = writeln!(out, "model_serving_latency_us_count {}", stats.count);

        let _ = writeln!(out, "# TYPE model_serving_start_time_seconds gauge");
        let _ = writeln!(
            out,
            "model_serving_start_time_seconds {}",
            self.started_at.timestamp()
        );
        out
    }

    /// Log a summary of everything recorded so far
    pub fn print_summary(&self) {
        let served = self.predictions_served.load(Ordering::Relaxed);
        let failed = self.predictions_failed.load(Ordering::Relaxed);
        let total = served + failed;
        let failure_rate = if total > 0 {
            (failed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let latency = self.latency_stats();

        info!(
            served,
            failed,
            failure_rate = format!("{:.1}%", failure_rate),
            throughput = format!("{:.2} req/s", self.throughput()),
            up_since = %self.started_at.to_rfc3339(),
            "Prediction metrics"
        );
        info!(
            mean_us = latency.mean_us,
            p50_us = latency.p50_us,
            p95_us = latency.p95_us,
            p99_us = latency.p99_us,
            max_us = latency.max_us,
            "Prediction latency"
        );
        for (model, count) in self.predictions_by_model() {
            info!(model = %model, count, "Predictions by model");
        }
        for (kind, count) in self.failures_by_kind() {
            info!(kind = %kind, count, "Failures by kind");
        }
    }
}

/// Escape a Prometheus label value.
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

impl Default for ServingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LatencyStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodically logs a metrics summary
pub struct MetricsReporter {
    metrics: Arc<ServingMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<ServingMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Run the reporting loop. Returns immediately when the interval is 0.
    pub async fn start(self) {
        if self.interval_secs == 0 {
            return;
        }
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}
