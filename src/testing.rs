//! Test doubles shared by unit tests.

use crate::client::{ClientError, QueryResult, RagApi, RawResponse};
use crate::polling::Sleeper;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub(crate) fn answer(answer: &str, contexts: &[&str]) -> QueryResult {
    QueryResult::from_payload(json!({ "answer": answer, "contexts": contexts }))
}

/// In-memory service that replays scripted query results.
///
/// Once the script is exhausted every query returns `fallback`. Ingest accepts documents that
/// carry a string `text` and rejects the batch with 422 otherwise, unless `lenient_ingest` is set.
pub(crate) struct StubApi {
    script: Mutex<VecDeque<Result<QueryResult, ClientError>>>,
    fallback: QueryResult,
    pub(crate) lenient_ingest: bool,
    pub(crate) questions: Mutex<Vec<String>>,
    pub(crate) ingested: Mutex<Vec<Value>>,
}

impl StubApi {
    pub(crate) fn new(fallback: QueryResult) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            lenient_ingest: false,
            questions: Mutex::new(Vec::new()),
            ingested: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn then(self, result: Result<QueryResult, ClientError>) -> Self {
        self.script.lock().expect("script lock").push_back(result);
        self
    }

    pub(crate) fn query_count(&self) -> usize {
        self.questions.lock().expect("questions lock").len()
    }

    pub(crate) fn ingested_docs(&self) -> Vec<Value> {
        self.ingested.lock().expect("ingested lock").clone()
    }
}

#[async_trait]
impl RagApi for StubApi {
    async fn ingest_raw(&self, docs: Value) -> Result<RawResponse, ClientError> {
        let valid = docs.as_array().is_some_and(|items| {
            items
                .iter()
                .all(|doc| doc.get("text").and_then(Value::as_str).is_some())
        });
        if let Some(items) = docs.as_array() {
            self.ingested
                .lock()
                .expect("ingested lock")
                .extend(items.iter().cloned());
        }
        let status = if valid || self.lenient_ingest {
            StatusCode::ACCEPTED
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        Ok(RawResponse {
            status,
            body: String::new(),
        })
    }

    async fn query(&self, question: &str) -> Result<QueryResult, ClientError> {
        self.questions
            .lock()
            .expect("questions lock")
            .push(question.to_string());
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Sleeper that records requested naps instead of sleeping.
#[derive(Default)]
pub(crate) struct RecordingSleeper {
    naps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub(crate) fn naps(&self) -> Vec<Duration> {
        self.naps.lock().expect("naps lock").clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.naps.lock().expect("naps lock").push(duration);
    }
}
