//! Benchmark infrastructure for the Corten garbage collector
//!
//! This crate provides benchmarking tools to measure allocation throughput
//! and collection pauses. It includes:
//!
//! - Micro-benchmarks for single heap operations
//! - Mixed workloads that resemble a running program
//! - Benchmark runner with timing, GC statistics and result formatting
//!
//! # Examples
//!
//! ```rust,no_run
//! use benchmarks::micro;
//!
//! let results = micro::run_all();
//! for result in results {
//!     println!("{}: {:.2}ms", result.name, result.duration_ms);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod micro;
pub mod runner;
pub mod workloads;

pub use runner::{Benchmark, BenchmarkResult, BenchmarkSuite};
