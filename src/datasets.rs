//! Seed documents and gold question sets.

use crate::client::Document;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default location of the seed document list.
pub const DEFAULT_SEED_DOCS: &str = "data/seed_docs.json";
/// Default location of the gold dataset.
pub const DEFAULT_GOLD: &str = "data/gold.csv";

/// Errors raised while loading datasets from disk.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// File could not be read.
    #[error("Failed to read dataset {path}: {source}")]
    Read {
        /// File we attempted to open.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// JSON file did not match the expected `[{id, text}]` shape.
    #[error("Failed to parse seed documents {path}: {source}")]
    Json {
        /// File that failed to parse.
        path: PathBuf,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// CSV file was malformed.
    #[error("Malformed CSV {path} at line {line}: {reason}")]
    Csv {
        /// File that failed to parse.
        path: PathBuf,
        /// One-based line where the problem was detected.
        line: usize,
        /// Description of the problem.
        reason: String,
    },
    /// CSV header lacked a required column.
    #[error("Dataset {path} is missing required column '{column}'")]
    MissingColumn {
        /// File that failed validation.
        path: PathBuf,
        /// Column that was expected.
        column: &'static str,
    },
}

/// One reference question with its expected answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoldRecord {
    /// Question sent to the service.
    pub question: String,
    /// Expected answer; empty when the dataset leaves it blank.
    pub ground_truth: String,
}

/// Load the seed document list from a JSON array of `{id, text}` records.
///
/// Duplicate identifiers are logged but not rejected; the service treats them as upserts.
pub fn load_seed_docs(path: &Path) -> Result<Vec<Document>, DatasetError> {
    let contents = read(path)?;
    let docs: Vec<Document> =
        serde_json::from_str(&contents).map_err(|source| DatasetError::Json {
            path: path.to_path_buf(),
            source,
        })?;

    let mut seen = HashSet::new();
    for doc in &docs {
        if !seen.insert(doc.id.as_str()) {
            tracing::warn!(id = %doc.id, path = %path.display(), "Duplicate document id in seed batch");
        }
    }
    tracing::debug!(count = docs.len(), path = %path.display(), "Loaded seed documents");
    Ok(docs)
}

/// Load the gold dataset from a CSV file with `question` and `ground_truth` columns.
///
/// Missing cells become empty strings and every value is trimmed.
pub fn load_gold(path: &Path) -> Result<Vec<GoldRecord>, DatasetError> {
    let contents = read(path)?;
    let records = parse_gold(&contents).map_err(|(line, reason)| match reason {
        GoldParseError::MissingColumn(column) => DatasetError::MissingColumn {
            path: path.to_path_buf(),
            column,
        },
        GoldParseError::Malformed(reason) => DatasetError::Csv {
            path: path.to_path_buf(),
            line,
            reason,
        },
    })?;
    tracing::debug!(count = records.len(), path = %path.display(), "Loaded gold dataset");
    Ok(records)
}

enum GoldParseError {
    MissingColumn(&'static str),
    Malformed(String),
}

fn parse_gold(contents: &str) -> Result<Vec<GoldRecord>, (usize, GoldParseError)> {
    let rows = parse_csv(contents).map_err(|(line, reason)| (line, GoldParseError::Malformed(reason)))?;
    let mut rows = rows.into_iter();
    let Some((_, header)) = rows.next() else {
        return Err((1, GoldParseError::MissingColumn("question")));
    };

    let column = |name: &'static str| {
        header
            .iter()
            .position(|cell| cell.trim().trim_start_matches('\u{feff}') == name)
            .ok_or((1, GoldParseError::MissingColumn(name)))
    };
    let question_idx = column("question")?;
    let truth_idx = column("ground_truth")?;

    let cell = |row: &[String], idx: usize| row.get(idx).map(|value| value.trim().to_string());
    Ok(rows
        .map(|(_, row)| GoldRecord {
            question: cell(&row, question_idx).unwrap_or_default(),
            ground_truth: cell(&row, truth_idx).unwrap_or_default(),
        })
        .collect())
}

/// Split CSV text into rows of cells, honouring double-quoted fields.
///
/// Quoted fields may contain commas, newlines, and `""` escapes. Blank lines are skipped. Each
/// row is paired with the one-based line on which it starts.
fn parse_csv(contents: &str) -> Result<Vec<(usize, Vec<String>)>, (usize, String)> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut row_start = 1;
    let mut chars = contents.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(ch);
                }
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                finish_row(&mut rows, &mut row, &mut field, row_start);
                line += 1;
                row_start = line;
            }
            _ => field.push(ch),
        }
    }

    if in_quotes {
        return Err((row_start, "unterminated quoted field".into()));
    }
    finish_row(&mut rows, &mut row, &mut field, row_start);
    Ok(rows)
}

fn finish_row(
    rows: &mut Vec<(usize, Vec<String>)>,
    row: &mut Vec<String>,
    field: &mut String,
    start: usize,
) {
    row.push(std::mem::take(field));
    let cells = std::mem::take(row);
    if cells.len() == 1 && cells[0].trim().is_empty() {
        return;
    }
    rows.push((start, cells));
}

fn read(path: &Path) -> Result<String, DatasetError> {
    fs::read_to_string(path).map_err(|source| DatasetError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gold_rows_handle_quotes_and_blanks() {
        let csv = "question,ground_truth\r\n\
                   \"What is the capital of India?\",New Delhi\r\n\
                   \"Say \"\"hi\"\", please\",\r\n\
                   \n\
                   How do I authenticate?\r\n";
        let records = parse_gold(csv).ok().expect("gold rows");

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].question, "What is the capital of India?");
        assert_eq!(records[0].ground_truth, "New Delhi");
        assert_eq!(records[1].question, "Say \"hi\", please");
        assert_eq!(records[1].ground_truth, "");
        assert_eq!(records[2].question, "How do I authenticate?");
        assert_eq!(records[2].ground_truth, "");
    }

    #[test]
    fn gold_columns_are_found_by_name() {
        let csv = "id,ground_truth,question\n1,  RAG grounds answers ,What does RAG do?\n";
        let records = parse_gold(csv).ok().expect("gold rows");
        assert_eq!(
            records,
            vec![GoldRecord {
                question: "What does RAG do?".into(),
                ground_truth: "RAG grounds answers".into(),
            }]
        );
    }

    #[test]
    fn quoted_fields_may_span_lines() {
        let rows = parse_csv("a,b\n\"multi\nline\",x\nlast,y\n").expect("rows");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].1, vec!["multi\nline", "x"]);
        assert_eq!(rows[2].0, 4);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let err = parse_csv("question,ground_truth\n\"open,x\n").expect_err("malformed");
        assert_eq!(err.0, 2);
    }

    #[test]
    fn missing_column_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gold.csv");
        fs::write(&path, "question,answer\nq,a\n").expect("write");

        let err = load_gold(&path).expect_err("missing column");
        assert!(matches!(
            err,
            DatasetError::MissingColumn {
                column: "ground_truth",
                ..
            }
        ));
    }

    #[test]
    fn seed_docs_load_from_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seed_docs.json");
        fs::write(
            &path,
            r#"[{"id": "k6-1", "text": "The OpenAPI spec is at /openapi.json."},
                {"id": "k6-1", "text": "Duplicate ids are tolerated."}]"#,
        )
        .expect("write");

        let docs = load_seed_docs(&path).expect("docs");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "k6-1");
    }

    #[test]
    fn seed_docs_without_text_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("seed_docs.json");
        fs::write(&path, r#"[{"id": "missing-text"}]"#).expect("write");

        let err = load_seed_docs(&path).expect_err("invalid docs");
        assert!(matches!(err, DatasetError::Json { .. }));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_gold(Path::new("does/not/exist.csv")).expect_err("missing");
        assert!(matches!(err, DatasetError::Read { .. }));
    }
}
