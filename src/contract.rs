//! API contract checks.
//!
//! The OpenAPI document must be served with status 200 and declare `post` operations for the
//! ingest and query paths. [`check_query_shape`] validates query payloads strictly, as a
//! counterpart to the client's lenient parsing.

use crate::client::{ClientError, RagClient};
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by contract checks.
#[derive(Debug, Error)]
pub enum ContractError {
    /// Transport failure while fetching the document.
    #[error(transparent)]
    Client(#[from] ClientError),
    /// The document endpoint did not answer with 200.
    #[error("OpenAPI document not accessible at {url}: status {status}")]
    Unavailable {
        /// URL that was requested.
        url: String,
        /// Status returned by the service.
        status: StatusCode,
    },
    /// The body was neither JSON nor YAML.
    #[error("OpenAPI document at {url} could not be parsed: {reason}")]
    Unparseable {
        /// URL that was requested.
        url: String,
        /// Parser error message.
        reason: String,
    },
    /// The document parsed but is missing required structure.
    #[error("OpenAPI document violates the expected contract: {}", .violations.join("; "))]
    Violations {
        /// Every violation found.
        violations: Vec<String>,
    },
}

/// Facts extracted from a valid OpenAPI document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenApiSummary {
    /// Value of the `openapi` (or legacy `swagger`) field.
    pub version: String,
    /// `info.title`, when present.
    pub title: Option<String>,
    /// Number of declared paths.
    pub path_count: usize,
}

/// Result of a strict query payload check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryShape {
    /// Expected keys that were absent.
    pub missing: Vec<&'static str>,
    /// Keys present with the wrong type.
    pub violations: Vec<String>,
}

impl QueryShape {
    /// Whether every expected key is present and well typed.
    pub fn is_strictly_valid(&self) -> bool {
        self.missing.is_empty() && self.violations.is_empty()
    }
}

/// Fetch the OpenAPI document and validate it against the configured endpoints.
pub async fn check_openapi(client: &RagClient) -> Result<OpenApiSummary, ContractError> {
    let url = client.openapi_url();
    let response = client.fetch_openapi().await?;
    if response.status != StatusCode::OK {
        let error = ContractError::Unavailable {
            url,
            status: response.status,
        };
        tracing::error!(error = %error, "OpenAPI availability check failed");
        return Err(error);
    }

    let document = parse_document(&response.body)
        .map_err(|reason| ContractError::Unparseable { url: url.clone(), reason })?;
    let required = [client.ingest_path.as_str(), client.query_path.as_str()];
    let summary = validate_document(&document, &required)
        .map_err(|violations| ContractError::Violations { violations })?;

    tracing::info!(
        url = %url,
        version = %summary.version,
        paths = summary.path_count,
        "OpenAPI document available"
    );
    Ok(summary)
}

/// Check that `document` looks like an OpenAPI description declaring `post` on each path.
pub fn validate_document(
    document: &Value,
    required_post_paths: &[&str],
) -> Result<OpenApiSummary, Vec<String>> {
    let mut violations = Vec::new();

    let version = document
        .get("openapi")
        .or_else(|| document.get("swagger"))
        .and_then(Value::as_str)
        .map(str::to_string);
    if version.is_none() {
        violations.push("missing string field 'openapi'".to_string());
    }

    let paths = document.get("paths").and_then(Value::as_object);
    match paths {
        None => violations.push("missing object field 'paths'".to_string()),
        Some(paths) => {
            for path in required_post_paths {
                match paths.get(*path) {
                    None => violations.push(format!("path '{path}' is not declared")),
                    Some(item) if item.get("post").is_none() => {
                        violations.push(format!("path '{path}' has no 'post' operation"));
                    }
                    Some(_) => {}
                }
            }
        }
    }

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(OpenApiSummary {
        version: version.unwrap_or_default(),
        title: document
            .pointer("/info/title")
            .and_then(Value::as_str)
            .map(str::to_string),
        path_count: paths.map_or(0, |paths| paths.len()),
    })
}

/// Strictly check a query payload: `answer` must be a string and `contexts` a list of strings.
pub fn check_query_shape(raw: &Value) -> QueryShape {
    let mut shape = QueryShape::default();
    if !raw.is_object() {
        shape
            .violations
            .push("response body is not a JSON object".to_string());
        return shape;
    }

    match raw.get("answer") {
        None => shape.missing.push("answer"),
        Some(Value::String(_)) => {}
        Some(other) => shape
            .violations
            .push(format!("'answer' should be a string, got {}", type_name(other))),
    }

    match raw.get("contexts") {
        None => shape.missing.push("contexts"),
        Some(Value::Array(items)) => {
            if let Some((idx, item)) = items.iter().enumerate().find(|(_, item)| !item.is_string()) {
                shape.violations.push(format!(
                    "'contexts[{idx}]' should be a string, got {}",
                    type_name(item)
                ));
            }
        }
        Some(other) => shape
            .violations
            .push(format!("'contexts' should be a list, got {}", type_name(other))),
    }

    shape
}

fn parse_document(body: &str) -> Result<Value, String> {
    match serde_json::from_str(body) {
        Ok(value) => Ok(value),
        // Some services publish the document as YAML.
        Err(json_err) => serde_yaml::from_str(body)
            .map_err(|yaml_err| format!("not JSON ({json_err}) nor YAML ({yaml_err})")),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
