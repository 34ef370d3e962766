use serde_json::Value;
use tracing::debug;

/// One structured result unit of a completed message, reduced to the fields
/// the report needs. Genie emits several shapes; `from_value` runs the probes
/// in a fixed order and records whatever each one yields.
#[derive(Debug, Clone, Default)]
pub struct Attachment {
    pub attachment_id: Option<String>,
    pub query_description: Option<String>,
    pub query_sql: Option<String>,
    pub text_content: Option<String>,
}

/// The shapes the `text` field has been observed to take.
#[derive(Debug, PartialEq)]
enum TextShape {
    Plain(String),
    Wrapped(String),
    Opaque(String),
}

impl TextShape {
    fn probe(value: &Value) -> Self {
        match value {
            Value::String(s) => TextShape::Plain(s.clone()),
            Value::Object(map) => match map.get("content").and_then(Value::as_str) {
                Some(content) => TextShape::Wrapped(content.to_string()),
                None => TextShape::Opaque(value.to_string()),
            },
            other => TextShape::Opaque(other.to_string()),
        }
    }

    fn into_string(self) -> String {
        match self {
            TextShape::Plain(s) | TextShape::Wrapped(s) | TextShape::Opaque(s) => s,
        }
    }
}

impl Attachment {
    pub fn from_value(value: &Value) -> Self {
        let mut attachment = Attachment {
            attachment_id: value
                .get("attachment_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            ..Default::default()
        };

        // Probe 1: a nested query object supplies both explanation and SQL.
        if let Some(query_obj) = value.get("query").filter(|q| q.is_object()) {
            attachment.query_description = query_obj
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            attachment.query_sql = query_obj
                .get("query")
                .and_then(Value::as_str)
                .map(str::to_string);
        }

        // Probe 2: a bare text field, in any of its shapes.
        if let Some(text) = value.get("text") {
            attachment.text_content = Some(TextShape::probe(text).into_string());
        }

        attachment
    }

    /// Explanation text, preferring the query description over the loose text
    /// field. The text fallback only applies when no description was found.
    pub fn explanation(&self) -> Option<String> {
        self.query_description
            .clone()
            .or_else(|| self.text_content.clone())
    }
}

/// Accumulates the best-known response text and SQL across an ordered
/// attachment scan. Later real values overwrite earlier ones; a missing value
/// never clobbers one already found.
#[derive(Debug, Default)]
pub struct Extraction {
    pub response_text: Option<String>,
    pub generated_sql: Option<String>,
    pub result_attachment_id: Option<String>,
}

impl Extraction {
    pub fn absorb(&mut self, attachment: &Attachment, want_results: bool) {
        if let Some(text) = attachment.explanation() {
            self.response_text = Some(text);
        }
        if let Some(sql) = &attachment.query_sql {
            self.generated_sql = Some(sql.clone());
            // The result id is only worth keeping when this attachment is the
            // one that produced runnable SQL.
            if want_results {
                if let Some(id) = &attachment.attachment_id {
                    self.result_attachment_id = Some(id.clone());
                }
            }
        }
        debug!(
            have_text = self.response_text.is_some(),
            have_sql = self.generated_sql.is_some(),
            "absorbed attachment"
        );
    }

    /// Earliest-match policy: once both pieces exist the scan stops, even if a
    /// later attachment might carry a richer answer.
    pub fn is_complete(&self) -> bool {
        self.response_text.is_some() && self.generated_sql.is_some()
    }

    pub fn scan(attachments: &[Attachment], want_results: bool) -> Self {
        let mut extraction = Extraction::default();
        for attachment in attachments {
            extraction.absorb(attachment, want_results);
            if extraction.is_complete() {
                break;
            }
        }
        extraction
    }

    /// Fallback for a completed message with no attachments: use the message's
    /// own content, unless it merely echoes the question back.
    pub fn absorb_bare_content(&mut self, content: &Value, question: &str) -> bool {
        match content {
            Value::String(s) => {
                if s.to_lowercase() == question.to_lowercase() {
                    return false;
                }
                self.response_text = Some(s.clone());
                true
            }
            Value::Object(map) => match map.get("content").and_then(Value::as_str) {
                Some(inner) => {
                    self.response_text = Some(inner.to_string());
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn query_object_supplies_description_and_sql() {
        let attachment = Attachment::from_value(&json!({
            "attachment_id": "att-1",
            "query": {
                "description": "Counts rows per region",
                "query": "SELECT region, COUNT(*) FROM sales GROUP BY region"
            }
        }));
        assert_eq!(attachment.attachment_id.as_deref(), Some("att-1"));
        assert_eq!(
            attachment.explanation().as_deref(),
            Some("Counts rows per region")
        );
        assert!(attachment.query_sql.as_deref().unwrap().starts_with("SELECT"));
    }

    #[test]
    fn text_field_shapes_all_reduce_to_strings() {
        let plain = Attachment::from_value(&json!({"text": "plain answer"}));
        assert_eq!(plain.text_content.as_deref(), Some("plain answer"));

        let wrapped = Attachment::from_value(&json!({"text": {"content": "wrapped answer"}}));
        assert_eq!(wrapped.text_content.as_deref(), Some("wrapped answer"));

        let opaque = Attachment::from_value(&json!({"text": {"spans": [1, 2]}}));
        assert_eq!(opaque.text_content.as_deref(), Some(r#"{"spans":[1,2]}"#));

        let null = Attachment::from_value(&json!({"text": null}));
        assert_eq!(null.text_content.as_deref(), Some("null"));
    }

    #[test]
    fn description_wins_over_text_fallback() {
        let attachment = Attachment::from_value(&json!({
            "query": {"description": "described"},
            "text": "loose text"
        }));
        assert_eq!(attachment.explanation().as_deref(), Some("described"));
    }

    #[test]
    fn later_sql_overwrites_nothing_found_earlier() {
        let first = Attachment::from_value(&json!({"text": "explanation only"}));
        let second = Attachment::from_value(&json!({
            "attachment_id": "att-2",
            "query": {"query": "SELECT 1"}
        }));
        let extraction = Extraction::scan(&[first, second], true);
        assert_eq!(extraction.response_text.as_deref(), Some("explanation only"));
        assert_eq!(extraction.generated_sql.as_deref(), Some("SELECT 1"));
        assert_eq!(extraction.result_attachment_id.as_deref(), Some("att-2"));
    }

    #[test]
    fn empty_attachment_never_clobbers_found_values() {
        let full = Attachment::from_value(&json!({
            "query": {"description": "desc", "query": "SELECT 1"}
        }));
        let empty = Attachment::from_value(&json!({}));
        let mut extraction = Extraction::default();
        extraction.absorb(&full, false);
        extraction.absorb(&empty, false);
        assert_eq!(extraction.response_text.as_deref(), Some("desc"));
        assert_eq!(extraction.generated_sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn scan_stops_at_first_sufficient_attachment() {
        let first = Attachment::from_value(&json!({
            "query": {"description": "first", "query": "SELECT 1"}
        }));
        let second = Attachment::from_value(&json!({
            "query": {"description": "second", "query": "SELECT 2"}
        }));
        let extraction = Extraction::scan(&[first, second], false);
        assert_eq!(extraction.response_text.as_deref(), Some("first"));
        assert_eq!(extraction.generated_sql.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn result_id_requires_sql_on_the_same_attachment() {
        let id_only = Attachment::from_value(&json!({
            "attachment_id": "att-bare",
            "text": "no sql here"
        }));
        let mut extraction = Extraction::default();
        extraction.absorb(&id_only, true);
        assert!(extraction.result_attachment_id.is_none());
    }

    #[test]
    fn bare_content_guards_against_echoing_the_question() {
        let mut extraction = Extraction::default();
        let absorbed = extraction
            .absorb_bare_content(&json!("How Many Rows?"), "how many rows?");
        assert!(!absorbed);
        assert!(extraction.response_text.is_none());

        let absorbed = extraction.absorb_bare_content(&json!("42 rows"), "how many rows?");
        assert!(absorbed);
        assert_eq!(extraction.response_text.as_deref(), Some("42 rows"));

        let mut extraction = Extraction::default();
        let absorbed = extraction
            .absorb_bare_content(&json!({"content": "wrapped"}), "how many rows?");
        assert!(absorbed);
        assert_eq!(extraction.response_text.as_deref(), Some("wrapped"));
    }
}
