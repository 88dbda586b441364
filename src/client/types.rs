//! Request and response types exchanged with the RAG service.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors returned while talking to the RAG service.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid service URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Service responded with a non-success status code.
    #[error("Unexpected service response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Response body was not valid JSON.
    #[error("Failed to decode service response: {source}")]
    Decode {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
    /// Request payload could not be serialized.
    #[error("Failed to encode request payload: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Unit of ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier, expected to be unique within a batch.
    pub id: String,
    /// Document body.
    pub text: String,
}

impl Document {
    /// Convenience constructor.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Status and body of a response the caller inspects itself.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status returned by the service.
    pub status: StatusCode,
    /// Response body as text.
    pub body: String,
}

impl RawResponse {
    /// Whether the service accepted an ingest batch (200, 201 or 202).
    pub fn is_accepted(&self) -> bool {
        matches!(self.status.as_u16(), 200 | 201 | 202)
    }

    /// Whether the service rejected the payload as invalid (400 or 422).
    pub fn is_validation_error(&self) -> bool {
        matches!(self.status.as_u16(), 400 | 422)
    }

    /// Body truncated to `limit` characters for log and report output.
    pub fn body_preview(&self, limit: usize) -> String {
        self.body.chars().take(limit).collect()
    }
}

/// Answer and retrieved contexts for one question.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Generated answer; empty when absent or not a string.
    pub answer: String,
    /// Retrieved passages in service order.
    pub contexts: Vec<String>,
    /// Full response payload.
    pub raw: Value,
}

impl QueryResult {
    /// Build a result from a response payload, tolerating missing or mistyped fields.
    ///
    /// A missing or non-string `answer` becomes `""`. A missing or non-array `contexts` becomes
    /// an empty list, and non-string entries inside it are dropped.
    pub fn from_payload(raw: Value) -> Self {
        let answer = raw
            .get("answer")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let contexts = raw
            .get("contexts")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            answer,
            contexts,
            raw,
        }
    }

    /// Contexts joined with single spaces.
    pub fn joined_contexts(&self) -> String {
        self.contexts.join(" ")
    }

    /// Whether `needle` occurs literally in the answer or in the joined contexts.
    pub fn mentions(&self, needle: &str) -> bool {
        self.answer.contains(needle) || self.joined_contexts().contains(needle)
    }
}
