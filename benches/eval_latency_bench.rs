// End-to-end latency of one evaluate() call: worker spawn, capability
// set construction, parse, run, verdict.
// Target: p50 < 5ms, p95 < 20ms for small programs

use pybox::Evaluator;
use std::time::{Duration, Instant};

const ITERATIONS: usize = 200;
const WARMUP_ITERATIONS: usize = 20;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    p99: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = (len as f64 * 0.95) as usize;
        let p99_idx = (len as f64 * 0.99) as usize;

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            p99: samples[p99_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  p99: {:?}", self.p99);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    passed: bool,
    reason: Option<String>,
}

impl BenchmarkResult {
    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");

        match &self.reason {
            None => println!("PASS"),
            Some(reason) => println!("FAIL: {}", reason),
        }
    }
}

fn benchmark(
    evaluator: &Evaluator,
    scenario: &str,
    code: &str,
    p50_budget: Duration,
    p95_budget: Duration,
) -> BenchmarkResult {
    for _ in 0..WARMUP_ITERATIONS {
        let _ = evaluator.evaluate(code);
    }

    let mut samples = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        let result = evaluator.evaluate(code);
        samples.push(start.elapsed());
        assert!(result.success || scenario.contains("fault"), "{}", result.error);
    }

    let stats = LatencyStats::from_samples(samples);
    let passed = stats.p50 < p50_budget && stats.p95 < p95_budget;
    let reason = if !passed {
        Some(format!(
            "p50={:?} (target <{:?}), p95={:?} (target <{:?})",
            stats.p50, p50_budget, stats.p95, p95_budget
        ))
    } else {
        None
    };

    BenchmarkResult {
        scenario: scenario.to_string(),
        stats,
        passed,
        reason,
    }
}

fn main() {
    println!("=== pybox Evaluation Latency Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let evaluator = Evaluator::default();
    let results = vec![
        benchmark(
            &evaluator,
            "Hello World",
            r#"print("Hello, World!")"#,
            Duration::from_millis(5),
            Duration::from_millis(20),
        ),
        benchmark(
            &evaluator,
            "Loop with math",
            "import math\ntotal = 0.0\nfor i in range(1000):\n    total += math.sqrt(i)\nprint(int(total))",
            Duration::from_millis(20),
            Duration::from_millis(50),
        ),
        benchmark(
            &evaluator,
            "Uncaught fault with trace",
            "def f(n):\n    return 1 / n\nf(0)",
            Duration::from_millis(5),
            Duration::from_millis(20),
        ),
    ];

    for result in &results {
        result.print();
    }

    let passed_count = results.iter().filter(|r| r.passed).count();
    let total_count = results.len();

    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, total_count);

    if passed_count == total_count {
        println!("All latency budgets met");
        std::process::exit(0);
    } else {
        println!("Some latency budgets exceeded");
        std::process::exit(1);
    }
}
