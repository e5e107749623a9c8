// Evaluation metrics
//
// Counters, gauges, and histograms for:
// - Evaluation outcomes (OK, FAULT, STDERR, IE)
// - Verdict causes
// - Capability degradation (best-effort modules skipped)
// - Output truncation
// - Evaluation latency

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::{ExecutionStatus, VerdictCause};

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized for in-process evaluation: most programs finish in
    /// well under a millisecond.
    pub fn new_latency() -> Self {
        let bucket_bounds = vec![
            0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0,
        ];

        let buckets = bucket_bounds
            .into_iter()
            .map(|le| HistogramBucket {
                le,
                count: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        let micros = value.as_micros() as u64;

        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.00001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        for bucket in &self.buckets {
            bucket.count.store(0, Ordering::Relaxed);
        }
    }
}

/// Global metrics registry
#[derive(Debug)]
pub struct MetricsRegistry {
    // Evaluation outcome counters
    pub evaluations_total: Counter,
    pub evaluations_ok: Counter,
    pub evaluations_fault: Counter,
    pub evaluations_stderr: Counter,
    pub evaluations_ie: Counter,

    // Verdict cause counters
    pub cause_syntax_fault: Counter,
    pub cause_worker_spawn_failed: Counter,
    pub cause_worker_panicked: Counter,

    // Capability and output degradation
    pub modules_skipped: Counter,
    pub output_truncated: Counter,

    pub active_evaluations: Gauge,

    pub evaluation_duration: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            evaluations_total: Counter::new(),
            evaluations_ok: Counter::new(),
            evaluations_fault: Counter::new(),
            evaluations_stderr: Counter::new(),
            evaluations_ie: Counter::new(),

            cause_syntax_fault: Counter::new(),
            cause_worker_spawn_failed: Counter::new(),
            cause_worker_panicked: Counter::new(),

            modules_skipped: Counter::new(),
            output_truncated: Counter::new(),

            active_evaluations: Gauge::new(),

            evaluation_duration: Histogram::new_latency(),
        }
    }

    /// Record evaluation outcome
    pub fn record_execution(&self, status: ExecutionStatus) {
        self.evaluations_total.inc();

        match status {
            ExecutionStatus::Ok => self.evaluations_ok.inc(),
            ExecutionStatus::Fault => self.evaluations_fault.inc(),
            ExecutionStatus::StderrOutput => self.evaluations_stderr.inc(),
            ExecutionStatus::EvaluatorFailure => self.evaluations_ie.inc(),
        }
    }

    /// Record verdict cause
    pub fn record_verdict_cause(&self, cause: VerdictCause) {
        match cause {
            VerdictCause::SyntaxFault => self.cause_syntax_fault.inc(),
            VerdictCause::WorkerSpawnFailed => self.cause_worker_spawn_failed.inc(),
            VerdictCause::WorkerPanicked => self.cause_worker_panicked.inc(),
            _ => {} // tracked via status counters
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP pybox_evaluations_total Total number of evaluations\n");
        output.push_str("# TYPE pybox_evaluations_total counter\n");
        output.push_str(&format!(
            "pybox_evaluations_total {}\n",
            self.evaluations_total.get()
        ));

        output.push_str("# HELP pybox_evaluations_by_status Evaluations by status\n");
        output.push_str("# TYPE pybox_evaluations_by_status counter\n");
        for (status, counter) in [
            (ExecutionStatus::Ok, &self.evaluations_ok),
            (ExecutionStatus::Fault, &self.evaluations_fault),
            (ExecutionStatus::StderrOutput, &self.evaluations_stderr),
            (ExecutionStatus::EvaluatorFailure, &self.evaluations_ie),
        ] {
            output.push_str(&format!(
                "pybox_evaluations_by_status{{status=\"{}\"}} {}\n",
                status,
                counter.get()
            ));
        }

        output.push_str("# HELP pybox_verdict_cause_total Evaluations by notable cause\n");
        output.push_str("# TYPE pybox_verdict_cause_total counter\n");
        output.push_str(&format!(
            "pybox_verdict_cause_total{{cause=\"syntax_fault\"}} {}\n",
            self.cause_syntax_fault.get()
        ));
        output.push_str(&format!(
            "pybox_verdict_cause_total{{cause=\"worker_spawn_failed\"}} {}\n",
            self.cause_worker_spawn_failed.get()
        ));
        output.push_str(&format!(
            "pybox_verdict_cause_total{{cause=\"worker_panicked\"}} {}\n",
            self.cause_worker_panicked.get()
        ));

        output.push_str("# HELP pybox_modules_skipped_total Best-effort modules left out\n");
        output.push_str("# TYPE pybox_modules_skipped_total counter\n");
        output.push_str(&format!(
            "pybox_modules_skipped_total {}\n",
            self.modules_skipped.get()
        ));

        output.push_str("# HELP pybox_output_truncated_total Evaluations that hit an output cap\n");
        output.push_str("# TYPE pybox_output_truncated_total counter\n");
        output.push_str(&format!(
            "pybox_output_truncated_total {}\n",
            self.output_truncated.get()
        ));

        output.push_str("# HELP pybox_active_evaluations Currently running evaluations\n");
        output.push_str("# TYPE pybox_active_evaluations gauge\n");
        output.push_str(&format!(
            "pybox_active_evaluations {}\n",
            self.active_evaluations.get()
        ));

        output.push_str("# HELP pybox_evaluation_duration_seconds Evaluation latency\n");
        output.push_str("# TYPE pybox_evaluation_duration_seconds histogram\n");
        for bucket in &self.evaluation_duration.buckets {
            output.push_str(&format!(
                "pybox_evaluation_duration_seconds_bucket{{le=\"{}\"}} {}\n",
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "pybox_evaluation_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
            self.evaluation_duration.get_count()
        ));
        output.push_str(&format!(
            "pybox_evaluation_duration_seconds_sum {}\n",
            self.evaluation_duration.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!(
            "pybox_evaluation_duration_seconds_count {}\n",
            self.evaluation_duration.get_count()
        ));

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        gauge.set(10);
        gauge.inc();
        assert_eq!(gauge.get(), 11);
        gauge.dec();
        assert_eq!(gauge.get(), 10);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new_latency();

        histogram.observe(Duration::from_micros(50));
        histogram.observe(Duration::from_millis(3));
        histogram.observe(Duration::from_millis(80));

        assert_eq!(histogram.get_count(), 3);

        // cumulative
        assert_eq!(histogram.get_bucket_count(0.0001), 1);
        assert_eq!(histogram.get_bucket_count(0.005), 2);
        assert_eq!(histogram.get_bucket_count(0.1), 3);
        assert_eq!(histogram.get_bucket_count(0.42), 0);

        histogram.reset();
        assert_eq!(histogram.get_count(), 0);
    }

    #[test]
    fn test_metrics_registry_execution() {
        let metrics = MetricsRegistry::new();

        metrics.record_execution(ExecutionStatus::Ok);
        metrics.record_execution(ExecutionStatus::Fault);
        metrics.record_execution(ExecutionStatus::Fault);
        metrics.record_execution(ExecutionStatus::StderrOutput);

        assert_eq!(metrics.evaluations_total.get(), 4);
        assert_eq!(metrics.evaluations_ok.get(), 1);
        assert_eq!(metrics.evaluations_fault.get(), 2);
        assert_eq!(metrics.evaluations_stderr.get(), 1);
        assert_eq!(metrics.evaluations_ie.get(), 0);
    }

    #[test]
    fn test_metrics_registry_causes() {
        let metrics = MetricsRegistry::new();

        metrics.record_verdict_cause(VerdictCause::SyntaxFault);
        metrics.record_verdict_cause(VerdictCause::WorkerPanicked);
        metrics.record_verdict_cause(VerdictCause::CleanRun);

        assert_eq!(metrics.cause_syntax_fault.get(), 1);
        assert_eq!(metrics.cause_worker_panicked.get(), 1);
        assert_eq!(metrics.cause_worker_spawn_failed.get(), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();

        metrics.record_execution(ExecutionStatus::Ok);
        metrics.record_execution(ExecutionStatus::EvaluatorFailure);
        metrics.modules_skipped.add(2);
        metrics.evaluation_duration.observe(Duration::from_millis(2));

        let output = metrics.export_prometheus();

        assert!(output.contains("pybox_evaluations_total 2"));
        assert!(output.contains("pybox_evaluations_by_status{status=\"OK\"} 1"));
        assert!(output.contains("pybox_evaluations_by_status{status=\"IE\"} 1"));
        assert!(output.contains("pybox_modules_skipped_total 2"));
        assert!(output.contains("pybox_evaluation_duration_seconds_count 1"));
    }

    #[test]
    fn test_global_metrics() {
        let metrics1 = get_metrics();
        let metrics2 = get_metrics();

        assert!(Arc::ptr_eq(&metrics1, &metrics2));
    }
}
