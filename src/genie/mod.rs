pub mod client;
pub mod extract;
pub mod models;

use async_trait::async_trait;
use std::error::Error;
use std::fmt;

pub use client::GenieClient;
pub use models::{ConversationHandle, PollResult, QueryReport, QueryRequest};

#[derive(Debug)]
pub enum GenieError {
    /// Missing instance/space/token, caught once at construction.
    ConfigError(String),
    /// Non-2xx, non-429 response; carries the full explainer string.
    HttpError(String),
    /// Transport-level failure with no response to inspect.
    RequestError(String),
    /// Anything else, e.g. an undecodable body. Aborts a poll loop.
    UnexpectedError(String),
}

impl fmt::Display for GenieError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenieError::ConfigError(msg) => write!(f, "Genie configuration error: {}", msg),
            GenieError::HttpError(msg) => write!(f, "{}", msg),
            GenieError::RequestError(msg) => write!(f, "Genie request error: {}", msg),
            GenieError::UnexpectedError(msg) => write!(f, "Unexpected Genie error: {}", msg),
        }
    }
}

impl Error for GenieError {}

/// Seam between the orchestrating layer and the Genie round trip. The report
/// is always a displayable string; expected failures never surface as errors.
#[async_trait]
pub trait ConversationalQuery: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> String;
}
