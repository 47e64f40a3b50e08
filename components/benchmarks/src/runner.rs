//! Benchmark runner and result types
//!
//! Provides infrastructure for running heap workloads and collecting results.

use memory_manager::{GcConfig, Heap, HeapError};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Segment size used by every benchmark heap.
pub const SEGMENT_SIZE: usize = 1 << 20;

/// A workload run against a fresh heap for the given number of iterations.
pub type Workload = fn(&mut Heap, u64) -> Result<(), HeapError>;

/// A single benchmark
#[derive(Debug, Clone)]
pub struct Benchmark {
    /// Name of the benchmark
    pub name: String,
    /// Description of what the benchmark measures
    pub description: String,
    /// Heap configuration
    pub config: GcConfig,
    /// Iterations handed to the workload
    pub iterations: u64,
    /// Workload to execute
    pub workload: Workload,
}

/// Result of running a benchmark
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Name of the benchmark
    pub name: String,
    /// Description of the benchmark
    pub description: String,
    /// Duration in milliseconds
    pub duration_ms: f64,
    /// Iterations per second
    pub ops_per_sec: Option<f64>,
    /// Young collections performed
    pub young_collections: u64,
    /// Full collections performed
    pub full_collections: u64,
    /// Longest collection pause in milliseconds
    pub max_pause_ms: f64,
    /// Whether the benchmark completed successfully
    pub success: bool,
    /// Error message if failed
    pub error: Option<String>,
}

impl Benchmark {
    /// Creates a benchmark with the default heap configuration.
    pub fn new(name: &str, description: &str, iterations: u64, workload: Workload) -> Self {
        Benchmark {
            name: name.to_string(),
            description: description.to_string(),
            config: GcConfig::default().with_name(name),
            iterations,
            workload,
        }
    }

    /// Replaces the heap configuration, keeping the benchmark name.
    pub fn with_config(mut self, config: GcConfig) -> Self {
        self.config = config.with_name(self.name.clone());
        self
    }

    /// Run this benchmark on a fresh heap
    ///
    /// # Returns
    /// A `BenchmarkResult` containing timing, GC and success information
    pub fn run(&self) -> BenchmarkResult {
        let mut heap = match Heap::with_default_provider(self.config.clone(), SEGMENT_SIZE) {
            Ok(heap) => heap,
            Err(e) => return self.failed(0.0, e),
        };

        let start = Instant::now();
        let result = (self.workload)(&mut heap, self.iterations);
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        if let Err(e) = result {
            return self.failed(duration_ms, e);
        }
        let stats = heap.cumulative_stats();
        log::debug!("{}: {:?}", self.name, heap.info());
        BenchmarkResult {
            name: self.name.clone(),
            description: self.description.clone(),
            duration_ms,
            ops_per_sec: (duration_ms > 0.0)
                .then(|| self.iterations as f64 / (duration_ms / 1000.0)),
            young_collections: stats.young_collections,
            full_collections: stats.full_collections,
            max_pause_ms: stats.max_pause.as_secs_f64() * 1000.0,
            success: true,
            error: None,
        }
    }

    /// Run this benchmark multiple times and return the average
    ///
    /// # Returns
    /// A `BenchmarkResult` with averaged timing information, or the first
    /// failure
    pub fn run_multiple(&self, iterations: usize) -> BenchmarkResult {
        let mut total_duration_ms = 0.0;
        let mut last_result = None;

        for _ in 0..iterations.max(1) {
            let result = self.run();
            if !result.success {
                return result;
            }
            total_duration_ms += result.duration_ms;
            last_result = Some(result);
        }

        match last_result {
            Some(mut result) => {
                result.duration_ms = total_duration_ms / iterations.max(1) as f64;
                result
            }
            None => self.run(),
        }
    }

    fn failed(&self, duration_ms: f64, error: HeapError) -> BenchmarkResult {
        log::warn!("{} failed: {}", self.name, error);
        BenchmarkResult {
            name: self.name.clone(),
            description: self.description.clone(),
            duration_ms,
            ops_per_sec: None,
            young_collections: 0,
            full_collections: 0,
            max_pause_ms: 0.0,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Suite of benchmarks
pub struct BenchmarkSuite {
    /// Name of the suite
    pub name: String,
    /// Benchmarks in this suite
    pub benchmarks: Vec<Benchmark>,
}

impl BenchmarkSuite {
    /// Create a new benchmark suite
    pub fn new(name: String) -> Self {
        Self {
            name,
            benchmarks: Vec::new(),
        }
    }

    /// Add a benchmark to this suite
    pub fn add(&mut self, benchmark: Benchmark) {
        self.benchmarks.push(benchmark);
    }

    /// Run all benchmarks in this suite
    pub fn run(&self) -> Vec<BenchmarkResult> {
        self.benchmarks.iter().map(|b| b.run()).collect()
    }

    /// Run all benchmarks multiple times and average
    pub fn run_multiple(&self, iterations: usize) -> Vec<BenchmarkResult> {
        self.benchmarks
            .iter()
            .map(|b| b.run_multiple(iterations))
            .collect()
    }
}

/// Format benchmark results as a human-readable table
pub fn format_results(results: &[BenchmarkResult]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "\n{:<32} {:>13} {:>7} {:>6} {:>11}  {:<8}\n",
        "Benchmark", "Duration (ms)", "Young", "Full", "Pause (ms)", "Status"
    ));
    output.push_str(&format!("{}\n", "=".repeat(84)));

    for result in results {
        let status = if result.success { "PASS" } else { "FAIL" };
        output.push_str(&format!(
            "{:<32} {:>13.2} {:>7} {:>6} {:>11.3}  {:<8}\n",
            result.name,
            result.duration_ms,
            result.young_collections,
            result.full_collections,
            result.max_pause_ms,
            status
        ));

        if let Some(error) = &result.error {
            output.push_str(&format!("  Error: {}\n", error));
        }
    }

    output
}

/// Format benchmark results as JSON
pub fn format_results_json(results: &[BenchmarkResult]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(results)
}
