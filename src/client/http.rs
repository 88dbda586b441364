//! HTTP client wrapper for the RAG service under test.

use crate::client::types::{ClientError, Document, QueryResult, RawResponse};
use crate::config::Settings;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};

/// Operations the harness performs against a RAG service.
///
/// Implemented by [`RagClient`] for real services and by stubs in tests.
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Send an arbitrary `docs` array to the ingest endpoint and return the response unchecked.
    async fn ingest_raw(&self, docs: Value) -> Result<RawResponse, ClientError>;

    /// Ingest a batch of documents. The status is not checked; the caller decides.
    async fn ingest(&self, docs: &[Document]) -> Result<RawResponse, ClientError> {
        let payload = serde_json::to_value(docs).map_err(ClientError::Encode)?;
        self.ingest_raw(payload).await
    }

    /// Ask a question, failing on non-success statuses and parsing the body leniently.
    async fn query(&self, question: &str) -> Result<QueryResult, ClientError>;
}

/// Thin HTTP client for the ingest, query, and OpenAPI endpoints.
pub struct RagClient {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) token: Option<String>,
    pub(crate) ingest_path: String,
    pub(crate) query_path: String,
    pub(crate) openapi_path: String,
}

impl RagClient {
    /// Construct a client from resolved settings.
    pub fn new(settings: &Settings) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(concat!("ragprobe/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()?;

        let base_url = normalize_base_url(&settings.base_url).map_err(ClientError::InvalidUrl)?;
        let token = Some(settings.token.clone()).filter(|token| !token.is_empty());
        tracing::debug!(
            url = %base_url,
            has_token = token.is_some(),
            timeout_ms = settings.timeout.as_millis() as u64,
            "Initialized RAG HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            token,
            ingest_path: settings.ingest_path.clone(),
            query_path: settings.query_path.clone(),
            openapi_path: settings.openapi_path.clone(),
        })
    }

    /// Absolute URL of the OpenAPI document.
    pub fn openapi_url(&self) -> String {
        format_endpoint(&self.base_url, &self.openapi_path)
    }

    /// Fetch the OpenAPI document without interpreting the status.
    pub async fn fetch_openapi(&self) -> Result<RawResponse, ClientError> {
        let response = self
            .request(Method::GET, &self.openapi_path)
            .send()
            .await?;
        into_raw(response).await
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl RagApi for RagClient {
    async fn ingest_raw(&self, docs: Value) -> Result<RawResponse, ClientError> {
        let count = docs.as_array().map_or(0, Vec::len);
        let response = self
            .request(Method::POST, &self.ingest_path)
            .json(&json!({ "docs": docs }))
            .send()
            .await?;

        let raw = into_raw(response).await?;
        tracing::debug!(documents = count, status = %raw.status, "Ingest request completed");
        Ok(raw)
    }

    async fn query(&self, question: &str) -> Result<QueryResult, ClientError> {
        let response = self
            .request(Method::POST, &self.query_path)
            .json(&json!({ "question": question }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = ClientError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Query request failed");
            return Err(error);
        }

        let bytes = response.bytes().await?;
        let raw: Value =
            serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode { source })?;
        let result = QueryResult::from_payload(raw);
        tracing::debug!(
            answer_chars = result.answer.chars().count(),
            contexts = result.contexts.len(),
            "Query answered"
        );
        Ok(result)
    }
}

async fn into_raw(response: reqwest::Response) -> Result<RawResponse, ClientError> {
    let status = response.status();
    let body = response.text().await?;
    Ok(RawResponse { status, body })
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
