use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::genie::extract::Attachment;

pub const NOT_AVAILABLE: &str = "Not available";

// One natural-language question plus the knobs for the round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub natural_language_query: String,
    pub conversation_id: Option<String>,
    pub fetch_query_results: bool,
    pub polling_interval_seconds: u64,
    pub polling_timeout_seconds: u64,
}

impl QueryRequest {
    pub fn new(natural_language_query: impl Into<String>) -> Self {
        Self {
            natural_language_query: natural_language_query.into(),
            ..Default::default()
        }
    }
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self {
            natural_language_query: String::new(),
            conversation_id: None,
            fetch_query_results: false,
            polling_interval_seconds: 5,
            polling_timeout_seconds: 600,
        }
    }
}

/// Identifiers returned by the submit step; both are required before polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHandle {
    pub conversation_id: String,
    pub message_id: String,
}

impl ConversationHandle {
    pub fn is_complete(&self) -> bool {
        !self.conversation_id.is_empty() && !self.message_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Unknown(String),
}

impl MessageStatus {
    pub fn parse(label: &str) -> Self {
        match label {
            "IN_PROGRESS" => MessageStatus::InProgress,
            "COMPLETED" => MessageStatus::Completed,
            "FAILED" => MessageStatus::Failed,
            "CANCELLED" => MessageStatus::Cancelled,
            other => MessageStatus::Unknown(other.to_string()),
        }
    }
}

/// One parsed polling response, tagged by terminal-ness.
#[derive(Debug)]
pub enum PollResult {
    InProgress,
    Completed {
        attachments: Vec<Attachment>,
        raw_content: Option<Value>,
    },
    Failed {
        details: String,
    },
    Cancelled {
        details: String,
    },
    Unknown {
        label: String,
    },
}

impl PollResult {
    /// Classifies a message payload. A missing status field counts as unknown,
    /// not an error, so the poll loop keeps going.
    pub fn from_payload(payload: &Value) -> Self {
        let label = payload.get("status").and_then(Value::as_str).unwrap_or("");
        match MessageStatus::parse(label) {
            MessageStatus::InProgress => PollResult::InProgress,
            MessageStatus::Completed => {
                let attachments = payload
                    .get("attachments")
                    .and_then(Value::as_array)
                    .map(|items| items.iter().map(Attachment::from_value).collect())
                    .unwrap_or_default();
                PollResult::Completed {
                    attachments,
                    raw_content: payload.get("content").cloned(),
                }
            }
            MessageStatus::Failed => PollResult::Failed {
                details: error_details(payload),
            },
            MessageStatus::Cancelled => PollResult::Cancelled {
                details: error_details(payload),
            },
            MessageStatus::Unknown(label) => PollResult::Unknown { label },
        }
    }
}

fn error_details(payload: &Value) -> String {
    match payload.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "Unknown error".to_string(),
    }
}

/// The final artifact of one round trip. `render` produces the only string
/// callers ever see.
#[derive(Debug, Clone)]
pub struct QueryReport {
    pub conversation_id: String,
    pub message_id: String,
    pub response_text: Option<String>,
    pub generated_sql: Option<String>,
    pub query_results: String,
    pub notes: Vec<String>,
}

impl QueryReport {
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Conversation ID: {}", self.conversation_id),
            format!("Message ID: {}", self.message_id),
            format!(
                "Genie's Textual Response: {}",
                self.response_text.as_deref().unwrap_or(NOT_AVAILABLE)
            ),
            format!(
                "Generated SQL Query: {}",
                self.generated_sql.as_deref().unwrap_or(NOT_AVAILABLE)
            ),
            format!("Query Results: {}", self.query_results),
        ];

        // Operational context rides along with a partial success instead of
        // getting dropped; hard failures return the notes alone before a
        // report is ever built.
        let noteworthy = self
            .notes
            .iter()
            .any(|n| n.contains("Error") || n.contains("Warning"));
        if noteworthy && (self.response_text.is_some() || self.generated_sql.is_some()) {
            let mut prefixed = self.notes.clone();
            prefixed.push("---".to_string());
            prefixed.append(&mut lines);
            return prefixed.join("\n");
        }

        lines.join("\n")
    }
}
