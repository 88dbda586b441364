//! Delegation of metric computation to an external scorer.
//!
//! The harness never computes faithfulness, relevancy, precision, or recall itself. A
//! [`MetricScorer`] receives the assembled records and returns one score row per record.

use crate::eval::EvalRecord;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Metrics requested from the scorer.
pub const DEFAULT_METRICS: [&str; 4] = [
    "faithfulness",
    "answer_relevancy",
    "context_precision",
    "context_recall",
];

/// Metric values for one record; `None` when the scorer produced no usable number.
pub type SampleScores = BTreeMap<String, Option<f64>>;

/// Errors raised while obtaining scores.
#[derive(Debug, Error)]
pub enum ScorerError {
    /// No scorer command was configured.
    #[error("No scorer command configured; set eval.scorer_command")]
    NotConfigured,
    /// The scorer process could not be started.
    #[error("Failed to launch scorer '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Communication with the scorer process failed.
    #[error("Scorer I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The scorer exited unsuccessfully.
    #[error("Scorer exited with {status}: {stderr}")]
    Failed {
        /// Exit status of the process.
        status: ExitStatus,
        /// Captured standard error.
        stderr: String,
    },
    /// Records could not be serialized for the scorer.
    #[error("Failed to encode scorer input: {0}")]
    Encode(#[source] serde_json::Error),
    /// Scorer output was not the expected JSON.
    #[error("Failed to parse scorer output: {0}")]
    Decode(String),
    /// Scorer returned a different number of rows than records sent.
    #[error("Scorer returned {actual} rows for {expected} records")]
    RowCount {
        /// Records sent.
        expected: usize,
        /// Rows received.
        actual: usize,
    },
}

/// Computes quality metrics for evaluation records.
#[async_trait]
pub trait MetricScorer: Send + Sync {
    /// Score each record for every metric in `metrics`, returning rows in record order.
    async fn score(
        &self,
        records: &[EvalRecord],
        metrics: &[&str],
    ) -> Result<Vec<SampleScores>, ScorerError>;
}

#[derive(Serialize)]
struct ScorerInput<'a> {
    metrics: &'a [&'a str],
    samples: &'a [EvalRecord],
}

/// Scorer that runs an external program.
///
/// The program receives `{"metrics": [...], "samples": [...]}` on stdin and must print either a
/// JSON array of per-record objects or `{"per_sample": [...]}` on stdout. Each object carries
/// one numeric field per metric. The process inherits the environment, so credentials such as
/// `OPENAI_API_KEY` reach the metrics library.
#[derive(Debug, Clone)]
pub struct CommandScorer {
    program: String,
    args: Vec<String>,
}

impl CommandScorer {
    /// Build a scorer from `[program, args...]`.
    pub fn from_command(command: &[String]) -> Result<Self, ScorerError> {
        let (program, args) = command.split_first().ok_or(ScorerError::NotConfigured)?;
        if program.trim().is_empty() {
            return Err(ScorerError::NotConfigured);
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl MetricScorer for CommandScorer {
    async fn score(
        &self,
        records: &[EvalRecord],
        metrics: &[&str],
    ) -> Result<Vec<SampleScores>, ScorerError> {
        let payload = encode_input(records, metrics)?;

        tracing::info!(
            program = %self.program,
            records = records.len(),
            metrics = ?metrics,
            "Running external scorer"
        );
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ScorerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            ScorerError::Io(std::io::Error::other("scorer stdin was not captured"))
        })?;
        let feed = async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;

        if !output.status.success() {
            return Err(ScorerError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        // A scorer may exit before draining stdin; its exit status is authoritative.
        if let Err(err) = fed {
            tracing::debug!(error = %err, "Scorer closed stdin early");
        }

        let rows = parse_scores(&output.stdout, metrics)?;
        if rows.len() != records.len() {
            return Err(ScorerError::RowCount {
                expected: records.len(),
                actual: rows.len(),
            });
        }
        Ok(rows)
    }
}

fn encode_input(records: &[EvalRecord], metrics: &[&str]) -> Result<Vec<u8>, ScorerError> {
    serde_json::to_vec(&ScorerInput {
        metrics,
        samples: records,
    })
    .map_err(ScorerError::Encode)
}

/// Extract per-record metric values from scorer output.
pub(crate) fn parse_scores(stdout: &[u8], metrics: &[&str]) -> Result<Vec<SampleScores>, ScorerError> {
    let value: Value =
        serde_json::from_slice(stdout).map_err(|err| ScorerError::Decode(err.to_string()))?;
    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(map) => map
            .get("per_sample")
            .and_then(Value::as_array)
            .ok_or_else(|| ScorerError::Decode("object output lacks a 'per_sample' list".into()))?,
        _ => return Err(ScorerError::Decode("expected a JSON array of rows".into())),
    };

    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            let row = row
                .as_object()
                .ok_or_else(|| ScorerError::Decode(format!("row {idx} is not an object")))?;
            let scores: SampleScores = metrics
                .iter()
                .map(|metric| {
                    let score = row
                        .get(*metric)
                        .and_then(Value::as_f64)
                        .filter(|score| score.is_finite());
                    (metric.to_string(), score)
                })
                .collect();
            Ok(scores)
        })
        .collect()
}
