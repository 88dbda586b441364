//! End-to-end functional checks against a live service.
//!
//! The suite seeds the service, then runs three checks: an ingest-then-query round trip through
//! the polling verifier, a well-typed response for an unanswerable question, and rejection of a
//! document without text.

use crate::client::{ClientError, Document, RagApi, RawResponse};
use crate::contract::check_query_shape;
use crate::polling::{PollOptions, Sleeper, verify};
use reqwest::StatusCode;
use serde_json::json;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Question used by the round-trip check.
pub const ROUNDTRIP_QUESTION: &str = "What is the capital of India?";
/// Text the round-trip check expects to retrieve.
pub const ROUNDTRIP_EXPECTED: &str = "New Delhi";
/// Question with no meaningful answer.
pub const EDGE_QUESTION: &str = "Ping?";

/// Errors raised while seeding.
#[derive(Debug, Error)]
pub enum SeedError {
    /// The service answered with a status other than 200, 201 or 202.
    #[error("Seed ingest rejected ({status}): {body}")]
    Rejected {
        /// Status returned by the service.
        status: StatusCode,
        /// Leading part of the response body.
        body: String,
    },
    /// Transport failure.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Ingest `docs` and require the service to accept them.
pub async fn seed<A>(api: &A, docs: &[Document]) -> Result<RawResponse, SeedError>
where
    A: RagApi + ?Sized,
{
    let response = api.ingest(docs).await?;
    if !response.is_accepted() {
        let error = SeedError::Rejected {
            status: response.status,
            body: response.body_preview(200),
        };
        tracing::error!(error = %error, "Seeding failed");
        return Err(error);
    }
    tracing::info!(
        documents = docs.len(),
        status = %response.status,
        "Seed documents accepted"
    );
    Ok(response)
}

/// Outcome of one functional check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    /// Stable check name.
    pub name: &'static str,
    /// Whether the check passed.
    pub passed: bool,
    /// Human readable explanation.
    pub detail: String,
}

impl CheckOutcome {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        let outcome = Self {
            name,
            passed: false,
            detail: detail.into(),
        };
        tracing::error!(check = name, detail = %outcome.detail, "Functional check failed");
        outcome
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "{verdict} {}: {}", self.name, self.detail)
    }
}

/// Results of a full suite run.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    /// Outcomes in execution order.
    pub checks: Vec<CheckOutcome>,
}

impl SuiteReport {
    /// Whether every check passed.
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|check| check.passed)
    }

    /// Checks that failed.
    pub fn failures(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.checks.iter().filter(|check| !check.passed)
    }
}

/// Ingest a uniquely tagged fact and poll until it is retrievable.
pub async fn ingest_and_query_roundtrip<A>(
    api: &A,
    sleeper: &dyn Sleeper,
    options: &PollOptions,
) -> CheckOutcome
where
    A: RagApi + ?Sized,
{
    const NAME: &str = "ingest_and_query_roundtrip";

    let uniq: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
    let fact = format!("The capital of India is New Delhi. [seed:{uniq}]");
    let doc = Document::new(format!("doc-{uniq}"), fact);

    let response = match api.ingest(std::slice::from_ref(&doc)).await {
        Ok(response) => response,
        Err(err) => return CheckOutcome::fail(NAME, format!("ingest failed: {err}")),
    };
    if !response.is_accepted() {
        return CheckOutcome::fail(
            NAME,
            format!(
                "ingest returned {}: {}",
                response.status,
                response.body_preview(200)
            ),
        );
    }

    match verify(api, sleeper, ROUNDTRIP_QUESTION, ROUNDTRIP_EXPECTED, options).await {
        Ok(outcome) if outcome.is_success() => CheckOutcome::pass(
            NAME,
            format!(
                "'{ROUNDTRIP_EXPECTED}' retrieved for {} after {} attempt(s)",
                doc.id,
                outcome.attempts()
            ),
        ),
        Ok(outcome) => CheckOutcome::fail(
            NAME,
            outcome
                .into_result(ROUNDTRIP_QUESTION, ROUNDTRIP_EXPECTED)
                .err()
                .map(|err| err.to_string())
                .unwrap_or_default(),
        ),
        Err(err) => CheckOutcome::fail(NAME, format!("query failed: {err}")),
    }
}

/// Ask an unanswerable question and require a well-typed response.
///
/// Absent `answer`/`contexts` keys are tolerated and only logged; keys of the wrong type fail.
pub async fn query_schema_and_edges<A>(api: &A) -> CheckOutcome
where
    A: RagApi + ?Sized,
{
    const NAME: &str = "query_schema_and_edges";

    let result = match api.query(EDGE_QUESTION).await {
        Ok(result) => result,
        Err(err) => return CheckOutcome::fail(NAME, format!("query failed: {err}")),
    };

    let shape = check_query_shape(&result.raw);
    if !shape.violations.is_empty() {
        return CheckOutcome::fail(NAME, shape.violations.join("; "));
    }
    if !shape.missing.is_empty() {
        tracing::warn!(missing = ?shape.missing, "Query response omitted expected keys");
    }
    CheckOutcome::pass(
        NAME,
        format!(
            "answer is a string ({} chars), contexts is a list ({} items)",
            result.answer.chars().count(),
            result.contexts.len()
        ),
    )
}

/// Ingest a document without `text` and require a 400 or 422 rejection.
pub async fn bad_ingest_validation<A>(api: &A) -> CheckOutcome
where
    A: RagApi + ?Sized,
{
    const NAME: &str = "bad_ingest_validation";

    match api.ingest_raw(json!([{ "id": "missing-text" }])).await {
        Ok(response) if response.is_validation_error() => {
            CheckOutcome::pass(NAME, format!("rejected with {}", response.status))
        }
        Ok(response) => CheckOutcome::fail(
            NAME,
            format!("expected 400/422, got {}", response.status.as_u16()),
        ),
        Err(err) => CheckOutcome::fail(NAME, format!("ingest failed: {err}")),
    }
}

/// Run every functional check in order.
pub async fn run_suite<A>(api: &A, sleeper: &dyn Sleeper, options: &PollOptions) -> SuiteReport
where
    A: RagApi + ?Sized,
{
    let checks = vec![
        ingest_and_query_roundtrip(api, sleeper, options).await,
        query_schema_and_edges(api).await,
        bad_ingest_validation(api).await,
    ];
    let report = SuiteReport { checks };
    tracing::info!(
        passed = report.checks.iter().filter(|check| check.passed).count(),
        failed = report.failures().count(),
        "Functional suite finished"
    );
    report
}
