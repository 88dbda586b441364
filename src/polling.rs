//! Eventual-consistency polling.
//!
//! A freshly ingested fact may not be queryable until the service finishes indexing it. The
//! verifier re-issues the same question at a fixed interval until the expected text shows up in
//! the answer or the retrieved contexts, or the attempt budget runs out. Wall-clock work is
//! bounded by `max_attempts × interval`.

use crate::client::{ClientError, QueryResult, RagApi};
use crate::config::Settings;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Suspension used between polling attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Pause for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the Tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Attempt budget and fixed delay for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Upper bound on attempts; zero performs no work.
    pub max_attempts: u32,
    /// Delay between consecutive failed attempts.
    pub interval: Duration,
}

impl PollOptions {
    /// Build options from explicit values.
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Polling defaults taken from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.verify_max_attempts, settings.verify_interval)
    }

    /// Total time spent sleeping when every attempt fails.
    pub fn window(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Result of a bounded polling loop.
#[derive(Debug, Clone)]
pub enum PollOutcome<T = QueryResult> {
    /// An attempt satisfied the condition.
    Satisfied {
        /// Attempts issued, including the successful one.
        attempts: u32,
        /// Value produced by the successful attempt.
        value: T,
    },
    /// The budget ran out first.
    Exhausted {
        /// Attempts issued.
        attempts: u32,
        /// Value produced by the final attempt, if any attempt ran.
        last: Option<T>,
    },
}

impl<T> PollOutcome<T> {
    /// Whether an attempt satisfied the condition.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }

    /// Number of attempts issued.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Satisfied { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

impl PollOutcome<QueryResult> {
    /// Turn exhaustion into a [`PollError::NotVisible`] naming the question and expected text.
    pub fn into_result(self, question: &str, expected: &str) -> Result<QueryResult, PollError> {
        match self {
            Self::Satisfied { value, .. } => Ok(value),
            Self::Exhausted { attempts, last } => Err(PollError::NotVisible {
                question: question.to_string(),
                expected: expected.to_string(),
                attempts,
                last_answer: last.map(|result| result.answer).unwrap_or_default(),
            }),
        }
    }
}

/// Consistency-window failures, distinct from transport errors.
#[derive(Debug, Error)]
pub enum PollError {
    /// The expected text never appeared within the polling window.
    #[error(
        "fact not retrievable within the polling window: {expected:?} not found for {question:?} after {attempts} attempts (last answer: {last_answer:?})"
    )]
    NotVisible {
        /// Question that was polled.
        question: String,
        /// Text that was expected in the answer or contexts.
        expected: String,
        /// Attempts issued before giving up.
        attempts: u32,
        /// Answer returned by the final attempt.
        last_answer: String,
    },
}

/// Run `attempt` up to `options.max_attempts` times.
///
/// Each attempt yields `(done, value)`. The loop stops at the first `done`; otherwise it sleeps
/// `options.interval` before the next attempt. No sleep follows the final attempt. Errors from
/// `attempt` abort the loop immediately.
pub async fn retry<T, E, F, Fut>(
    options: &PollOptions,
    sleeper: &dyn Sleeper,
    mut attempt: F,
) -> Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(bool, T), E>>,
{
    let mut last = None;
    for attempt_no in 1..=options.max_attempts {
        let (done, value) = attempt().await?;
        if done {
            return Ok(PollOutcome::Satisfied {
                attempts: attempt_no,
                value,
            });
        }
        last = Some(value);
        if attempt_no < options.max_attempts {
            sleeper.sleep(options.interval).await;
        }
    }

    Ok(PollOutcome::Exhausted {
        attempts: options.max_attempts,
        last,
    })
}

/// Poll `question` until `expected` appears in the answer or the joined contexts.
///
/// Transport errors propagate as [`ClientError`]; an exhausted budget is reported as
/// [`PollOutcome::Exhausted`].
pub async fn verify<A>(
    api: &A,
    sleeper: &dyn Sleeper,
    question: &str,
    expected: &str,
    options: &PollOptions,
) -> Result<PollOutcome, ClientError>
where
    A: RagApi + ?Sized,
{
    if options.max_attempts == 0 {
        tracing::warn!(question, "Polling budget is zero; no query issued");
    }

    let outcome = retry(options, sleeper, move || async move {
        let result = api.query(question).await?;
        let found = result.mentions(expected);
        tracing::debug!(question, expected, found, "Polled query");
        Ok::<_, ClientError>((found, result))
    })
    .await?;

    if outcome.is_success() {
        tracing::info!(
            question,
            attempts = outcome.attempts(),
            "Fact visible through query path"
        );
    } else {
        tracing::warn!(
            question,
            expected,
            attempts = outcome.attempts(),
            window_ms = options.window().as_millis() as u64,
            "Fact not visible within polling window"
        );
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingSleeper, StubApi, answer};
    use reqwest::StatusCode;

    const QUESTION: &str = "What is the capital of India?";

    fn options(max_attempts: u32) -> PollOptions {
        PollOptions::new(max_attempts, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn synchronous_index_is_visible_on_first_attempt() {
        let api = StubApi::new(answer("New Delhi.", &[]));
        let sleeper = RecordingSleeper::default();

        let outcome = verify(&api, &sleeper, QUESTION, "New Delhi", &options(10))
            .await
            .expect("verify");

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(api.query_count(), 1);
        assert!(sleeper.naps().is_empty());
    }

    #[tokio::test]
    async fn zero_budget_issues_no_query() {
        let api = StubApi::new(answer("New Delhi", &[]));
        let sleeper = RecordingSleeper::default();

        let outcome = verify(&api, &sleeper, QUESTION, "New Delhi", &options(0))
            .await
            .expect("verify");

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 0);
        assert_eq!(api.query_count(), 0);
        assert!(sleeper.naps().is_empty());
        assert!(matches!(outcome, PollOutcome::Exhausted { last: None, .. }));
    }

    #[tokio::test]
    async fn context_order_does_not_change_outcome() {
        let orders = [
            ["Delhi is large.", "The capital of India is New Delhi."],
            ["The capital of India is New Delhi.", "Delhi is large."],
        ];
        for contexts in orders {
            let api = StubApi::new(answer("", &contexts));
            let sleeper = RecordingSleeper::default();
            let outcome = verify(&api, &sleeper, QUESTION, "New Delhi", &options(1))
                .await
                .expect("verify");
            assert!(outcome.is_success(), "order {contexts:?} should match");
        }
    }

    #[tokio::test]
    async fn retries_at_fixed_interval_until_visible() {
        let api = StubApi::new(answer("New Delhi", &[]))
            .then(Ok(answer("I don't know.", &[])))
            .then(Ok(answer("I don't know.", &["Unrelated passage."])));
        let sleeper = RecordingSleeper::default();
        let interval = Duration::from_millis(250);

        let outcome = verify(
            &api,
            &sleeper,
            QUESTION,
            "New Delhi",
            &PollOptions::new(5, interval),
        )
        .await
        .expect("verify");

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(sleeper.naps(), vec![interval, interval]);
    }

    #[tokio::test]
    async fn exhausted_budget_is_not_a_transport_error() {
        let api = StubApi::new(answer("I don't know.", &[]));
        let sleeper = RecordingSleeper::default();

        let outcome = verify(&api, &sleeper, QUESTION, "New Delhi", &options(4))
            .await
            .expect("verify");

        assert!(!outcome.is_success());
        assert_eq!(outcome.attempts(), 4);
        assert_eq!(api.query_count(), 4);
        assert_eq!(sleeper.naps().len(), 3);

        let err = outcome
            .into_result(QUESTION, "New Delhi")
            .expect_err("not visible");
        let PollError::NotVisible {
            attempts,
            last_answer,
            ..
        } = err;
        assert_eq!(attempts, 4);
        assert_eq!(last_answer, "I don't know.");
    }

    #[tokio::test]
    async fn empty_contexts_and_non_string_answers_never_match() {
        let malformed = QueryResult::from_payload(serde_json::json!({
            "answer": { "text": "New Delhi" },
            "contexts": []
        }));
        let api = StubApi::new(malformed);
        let sleeper = RecordingSleeper::default();

        let outcome = verify(&api, &sleeper, QUESTION, "New Delhi", &options(2))
            .await
            .expect("verify");

        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn transport_errors_abort_polling() {
        let api = StubApi::new(answer("New Delhi", &[])).then(Err(ClientError::UnexpectedStatus {
            status: StatusCode::BAD_GATEWAY,
            body: "upstream down".into(),
        }));
        let sleeper = RecordingSleeper::default();

        let err = verify(&api, &sleeper, QUESTION, "New Delhi", &options(5))
            .await
            .expect_err("transport error");

        assert!(matches!(err, ClientError::UnexpectedStatus { .. }));
        assert_eq!(api.query_count(), 1);
        assert!(sleeper.naps().is_empty());
    }

    #[test]
    fn window_counts_sleeps_between_attempts() {
        assert_eq!(options(10).window(), Duration::from_secs(9));
        assert_eq!(options(0).window(), Duration::ZERO);
    }
}
