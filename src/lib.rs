#![deny(missing_docs)]

//! Core library for the ragprobe RAG service QA harness.

/// HTTP client for the service under test.
pub mod client;
/// Layered YAML configuration and environment handling.
pub mod config;
/// OpenAPI and response-shape contract checks.
pub mod contract;
/// Seed document and gold-set loaders.
pub mod datasets;
/// Gold-set evaluation and quality gating.
pub mod eval;
/// End-to-end functional checks.
pub mod functional;
/// Structured logging and tracing setup.
pub mod logging;
/// k6 load-test launcher.
pub mod perf;
/// Eventual-consistency polling.
pub mod polling;

#[cfg(test)]
mod testing;
