//! Aggregation, threshold checks, and report output.

use crate::eval::EvalRecord;
use crate::eval::scorer::SampleScores;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use time::OffsetDateTime;

/// One evaluated record together with its scores.
#[derive(Debug, Clone, Serialize)]
pub struct SampleResult {
    /// Record sent to the scorer.
    #[serde(flatten)]
    pub record: EvalRecord,
    /// Scores returned for the record.
    #[serde(flatten)]
    pub scores: SampleScores,
}

/// Per-metric means over all samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Mean per metric; `None` when no sample produced a value.
    #[serde(flatten)]
    pub means: BTreeMap<String, Option<f64>>,
    /// Number of evaluated samples.
    pub num_samples: usize,
}

/// Report persisted after an evaluation run.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    /// Per-record results.
    pub per_sample: Vec<SampleResult>,
    /// Aggregated means.
    pub summary: Summary,
    /// Settings environment the run targeted.
    pub env: String,
    /// RFC 3339 timestamp of report creation.
    pub generated_at: String,
}

/// A metric whose mean fell short of its configured minimum.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdFailure {
    /// Metric name.
    pub metric: String,
    /// Configured minimum.
    pub minimum: f64,
    /// Observed mean, or `None` when the metric produced no values.
    pub actual: Option<f64>,
}

impl fmt::Display for ThresholdFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(f, "{} = {actual:.4} < {:.4}", self.metric, self.minimum),
            None => write!(f, "{} has no value (minimum {:.4})", self.metric, self.minimum),
        }
    }
}

/// Average each metric over the rows, skipping missing values.
pub fn summarize(metrics: &[&str], rows: &[SampleScores]) -> Summary {
    let means = metrics
        .iter()
        .map(|metric| {
            let values: Vec<f64> = rows
                .iter()
                .filter_map(|row| row.get(*metric).copied().flatten())
                .filter(|value| value.is_finite())
                .collect();
            let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
            (metric.to_string(), mean)
        })
        .collect();

    Summary {
        means,
        num_samples: rows.len(),
    }
}

/// Compare every configured threshold against the summary.
///
/// A threshold for a metric missing from the summary, or whose mean is `None`, is a failure.
pub fn check_thresholds(
    summary: &Summary,
    thresholds: &BTreeMap<String, f64>,
) -> Vec<ThresholdFailure> {
    thresholds
        .iter()
        .filter_map(|(metric, &minimum)| {
            let actual = summary.means.get(metric).copied().flatten();
            match actual {
                Some(value) if value >= minimum => None,
                _ => Some(ThresholdFailure {
                    metric: metric.clone(),
                    minimum,
                    actual,
                }),
            }
        })
        .collect()
}

/// Assemble a report stamped with the current time.
pub fn build_report(
    records: Vec<EvalRecord>,
    rows: Vec<SampleScores>,
    summary: Summary,
    env: &str,
) -> EvalReport {
    let per_sample = records
        .into_iter()
        .zip(rows)
        .map(|(record, scores)| SampleResult { record, scores })
        .collect();

    EvalReport {
        per_sample,
        summary,
        env: env.to_string(),
        generated_at: current_timestamp_rfc3339(),
    }
}

/// Write `report` as pretty JSON, creating parent directories.
pub fn write_report(path: &Path, report: &EvalReport) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(std::io::Error::other)?;
    std::fs::write(path, json)
}

fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(values: &[(&str, Option<f64>)]) -> SampleScores {
        values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn means_skip_missing_values() {
        let rows = vec![
            row(&[("faithfulness", Some(1.0)), ("context_recall", None)]),
            row(&[("faithfulness", Some(0.5)), ("context_recall", None)]),
        ];
        let summary = summarize(&["faithfulness", "context_recall"], &rows);

        assert_eq!(summary.num_samples, 2);
        assert_eq!(summary.means["faithfulness"], Some(0.75));
        assert_eq!(summary.means["context_recall"], None);
    }

    #[test]
    fn thresholds_flag_low_and_missing_metrics() {
        let summary = Summary {
            means: BTreeMap::from([
                ("faithfulness".to_string(), Some(0.8)),
                ("answer_relevancy".to_string(), Some(0.4)),
                ("context_recall".to_string(), None),
            ]),
            num_samples: 3,
        };
        let thresholds = BTreeMap::from([
            ("faithfulness".to_string(), 0.8),
            ("answer_relevancy".to_string(), 0.7),
            ("context_recall".to_string(), 0.6),
            ("context_precision".to_string(), 0.6),
        ]);

        let failures = check_thresholds(&summary, &thresholds);
        let names: Vec<_> = failures.iter().map(|f| f.metric.as_str()).collect();
        assert_eq!(
            names,
            vec!["answer_relevancy", "context_precision", "context_recall"]
        );
        assert_eq!(failures[0].to_string(), "answer_relevancy = 0.4000 < 0.7000");
    }

    #[test]
    fn report_serializes_flat_rows_and_summary() {
        let record = EvalRecord {
            question: "What is the capital of India?".into(),
            answer: "New Delhi".into(),
            contexts: vec!["The capital of India is New Delhi.".into()],
            ground_truth: vec!["New Delhi".into()],
        };
        let rows = vec![row(&[("faithfulness", Some(1.0))])];
        let summary = summarize(&["faithfulness"], &rows);
        let report = build_report(vec![record], rows, summary, "dev");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("evals").join("metrics.json");
        write_report(&path, &report).expect("write report");

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(written["summary"], json!({ "faithfulness": 1.0, "num_samples": 1 }));
        assert_eq!(written["per_sample"][0]["question"], "What is the capital of India?");
        assert_eq!(written["per_sample"][0]["faithfulness"], 1.0);
        assert_eq!(written["per_sample"][0]["ground_truth"], json!(["New Delhi"]));
        assert_eq!(written["env"], "dev");
    }
}
