//! Corten GC Benchmark CLI
//!
//! Runs the heap benchmark suites and prints a table or JSON.

use benchmarks::runner::{self, BenchmarkResult};
use benchmarks::{micro, workloads};
use std::process;

const USAGE: &str = "\
Corten Garbage Collector Benchmark Tool

Usage:
  corten-gc-bench [--json] [--repeat <n>] <micro|workloads|all>

Options:
  --json          Print results as JSON
  --repeat <n>    Average every benchmark over n runs
  -h, --help      Show this message

Set RUST_LOG=debug to log every collection.";

/// Parsed command line.
struct Options {
    json: bool,
    repeat: usize,
    suite: String,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        json: false,
        repeat: 1,
        suite: String::new(),
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--json" => options.json = true,
            "--repeat" => {
                options.repeat = args
                    .next()
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|&n| n > 0)
                    .ok_or("--repeat needs a positive count")?;
            }
            "-h" | "--help" => {
                println!("{}", USAGE);
                process::exit(0);
            }
            _ if arg.starts_with('-') => return Err(format!("unknown option '{}'", arg)),
            _ => options.suite = arg,
        }
    }
    if options.suite.is_empty() {
        return Err("no benchmark suite given".to_string());
    }
    Ok(options)
}

fn run_suite(name: &str, repeat: usize) -> Option<Vec<BenchmarkResult>> {
    let micro = || -> Vec<BenchmarkResult> {
        micro::create_benchmarks()
            .iter()
            .map(|b| b.run_multiple(repeat))
            .collect()
    };
    let mixed = || workloads::create_suite().run_multiple(repeat);
    match name {
        "micro" => Some(micro()),
        "workloads" => Some(mixed()),
        "all" => {
            let mut results = micro();
            results.extend(mixed());
            Some(results)
        }
        _ => None,
    }
}

fn print_summary(results: &[BenchmarkResult]) {
    let failed = results.iter().filter(|r| !r.success).count();
    let total_ms: f64 = results.iter().map(|r| r.duration_ms).sum();
    let young: u64 = results.iter().map(|r| r.young_collections).sum();
    let full: u64 = results.iter().map(|r| r.full_collections).sum();
    let worst_pause = results.iter().map(|r| r.max_pause_ms).fold(0.0, f64::max);

    println!("\nSummary:");
    println!("  Benchmarks: {} ({} failed)", results.len(), failed);
    println!("  Collections: {} young, {} full", young, full);
    println!("  Worst pause: {:.3} ms", worst_pause);
    println!("  Total time: {:.2} ms", total_ms);
}

fn main() {
    env_logger::init();

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("Error: {}\n\n{}", message, USAGE);
            process::exit(1);
        }
    };

    let Some(results) = run_suite(&options.suite, options.repeat) else {
        eprintln!(
            "Error: unknown benchmark suite '{}' (expected micro, workloads or all)",
            options.suite
        );
        process::exit(1);
    };

    if options.json {
        match runner::format_results_json(&results) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error formatting JSON: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    println!("{}", runner::format_results(&results));
    print_summary(&results);
    if results.iter().any(|r| !r.success) {
        process::exit(1);
    }
}
