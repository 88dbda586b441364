//! RAG service HTTP client.

pub mod http;
pub mod types;

pub use http::{RagApi, RagClient};
pub use types::{ClientError, Document, QueryResult, RawResponse};
