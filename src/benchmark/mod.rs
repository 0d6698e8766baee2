//! Batch evaluation over an MM-Vet style dataset.
//!
//! Runs every question through the pipeline, persists answers after each
//! one so an interrupted run can resume, and scores them against the
//! ground truth.

pub mod runner;
pub mod scoring;

pub use runner::{run_benchmark, BenchmarkOptions, BenchmarkSummary};
