//! Gold-set evaluation driver.
//!
//! Each gold question is sent through the client and turned into an [`EvalRecord`]. Scoring is
//! delegated to a [`MetricScorer`]; the driver only averages, persists, and enforces thresholds.

pub mod report;
pub mod scorer;

use crate::client::{ClientError, QueryResult, RagApi};
use crate::config::{ConfigError, require_var};
use crate::datasets::GoldRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use report::{EvalReport, Summary, ThresholdFailure, check_thresholds, summarize};
pub use scorer::{CommandScorer, DEFAULT_METRICS, MetricScorer, SampleScores, ScorerError};

/// Environment variable the metrics library needs.
pub const SCORER_CREDENTIAL_ENV: &str = "OPENAI_API_KEY";
/// Default report location.
pub const DEFAULT_REPORT_PATH: &str = "evals/metrics.json";

/// Errors raised by an evaluation run.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Required configuration or environment was missing.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A gold question could not be answered.
    #[error("Query failed during evaluation: {0}")]
    Client(#[from] ClientError),
    /// The scorer failed.
    #[error(transparent)]
    Scorer(#[from] ScorerError),
    /// The report could not be written.
    #[error("Failed to write report {path}: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// At least one metric mean fell below its threshold.
    #[error("Quality thresholds not met ({}): {summary}", join_failures(.failures))]
    ThresholdsNotMet {
        /// Metrics that failed.
        failures: Vec<ThresholdFailure>,
        /// Summary rendered as JSON for diagnosis.
        summary: String,
    },
}

fn join_failures(failures: &[ThresholdFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Record handed to the scorer for one gold question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalRecord {
    /// Question asked.
    pub question: String,
    /// Answer returned by the service.
    pub answer: String,
    /// Contexts returned by the service.
    pub contexts: Vec<String>,
    /// Expected answer as a singleton list, or empty when the gold answer is blank.
    pub ground_truth: Vec<String>,
}

impl EvalRecord {
    /// Combine a gold record with the service's result.
    pub fn new(gold: &GoldRecord, result: QueryResult) -> Self {
        let truth = gold.ground_truth.trim();
        Self {
            question: gold.question.trim().to_string(),
            answer: result.answer,
            contexts: result.contexts,
            ground_truth: if truth.is_empty() {
                Vec::new()
            } else {
                vec![truth.to_string()]
            },
        }
    }
}

/// Fail fast when the metrics library cannot authenticate.
pub fn ensure_scorer_credentials() -> Result<(), ConfigError> {
    scorer_credentials(|name| std::env::var(name).ok())
}

fn scorer_credentials<F>(lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    require_var(SCORER_CREDENTIAL_ENV, lookup).map(|_| ())
}

/// Query every gold question in order and assemble evaluation records.
pub async fn collect_records<A>(api: &A, gold: &[GoldRecord]) -> Result<Vec<EvalRecord>, ClientError>
where
    A: RagApi + ?Sized,
{
    let total = gold.len();
    let mut records = Vec::with_capacity(total);
    for (idx, item) in gold.iter().enumerate() {
        let result = api.query(item.question.trim()).await?;
        tracing::info!(
            progress = format_args!("{}/{total}", idx + 1),
            contexts = result.contexts.len(),
            "Collected evaluation sample"
        );
        records.push(EvalRecord::new(item, result));
    }
    Ok(records)
}

/// Inputs for [`run_evaluation`].
pub struct EvalRun<'a> {
    /// Gold questions.
    pub gold: &'a [GoldRecord],
    /// Minimum acceptable mean per metric.
    pub thresholds: &'a BTreeMap<String, f64>,
    /// Metrics requested from the scorer.
    pub metrics: &'a [&'a str],
    /// Report destination.
    pub out: &'a Path,
    /// Environment name recorded in the report.
    pub env: &'a str,
}

/// Run the gold set, score it, write the report, and enforce thresholds.
///
/// The report is written before thresholds are checked so a failing run still leaves its
/// per-sample results behind.
pub async fn run_evaluation<A>(
    api: &A,
    scorer: &dyn MetricScorer,
    run: EvalRun<'_>,
) -> Result<EvalReport, EvalError>
where
    A: RagApi + ?Sized,
{
    let records = collect_records(api, run.gold).await?;
    let rows = scorer.score(&records, run.metrics).await?;
    let summary = summarize(run.metrics, &rows);
    let report = report::build_report(records, rows, summary, run.env);

    report::write_report(run.out, &report).map_err(|source| EvalError::Write {
        path: run.out.to_path_buf(),
        source,
    })?;
    tracing::info!(
        path = %run.out.display(),
        samples = report.summary.num_samples,
        "Evaluation report written"
    );

    let failures = check_thresholds(&report.summary, run.thresholds);
    if !failures.is_empty() {
        let summary = serde_json::to_string(&report.summary).unwrap_or_default();
        tracing::error!(failed = failures.len(), summary = %summary, "Quality thresholds not met");
        return Err(EvalError::ThresholdsNotMet { failures, summary });
    }

    tracing::info!("Quality thresholds met");
    Ok(report)
}
