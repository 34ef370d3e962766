use crate::config::GenieConfig;
use crate::genie::extract::Extraction;
use crate::genie::models::{ConversationHandle, PollResult, QueryReport, QueryRequest};
use crate::genie::{ConversationalQuery, GenieError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const BACKOFF_FACTOR: u64 = 2;
const REQUEST_TIMEOUT_SECS: u64 = 10;
const BODY_TRUNCATE_CHARS: usize = 600;

/// Drives one natural-language-to-SQL round trip against a Genie space:
/// submit, poll to a terminal status, extract, optionally fetch results,
/// render the report.
pub struct GenieClient {
    http: reqwest::Client,
    base_url: String,
}

impl GenieClient {
    pub fn new(config: &GenieConfig) -> Result<Self, GenieError> {
        if config.databricks_instance.trim().is_empty() {
            return Err(GenieError::ConfigError(
                "DATABRICKS_INSTANCE is required".to_string(),
            ));
        }
        if config.genie_space_id.trim().is_empty() {
            return Err(GenieError::ConfigError(
                "GENIE_SPACE_ID is required".to_string(),
            ));
        }
        if config.databricks_token.trim().is_empty() {
            return Err(GenieError::ConfigError(
                "DATABRICKS_TOKEN is required".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let mut bearer =
            HeaderValue::from_str(&format!("Bearer {}", config.databricks_token.trim()))
                .map_err(|e| {
                    GenieError::ConfigError(format!("DATABRICKS_TOKEN is not a valid header: {}", e))
                })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("genie-nlq/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| GenieError::RequestError(e.to_string()))?;

        let base_url = format!(
            "{}/api/2.0/genie/spaces/{}",
            normalize_instance(&config.databricks_instance),
            config.genie_space_id.trim()
        );

        Ok(Self { http, base_url })
    }

    pub async fn execute(&self, request: &QueryRequest) -> String {
        let mut notes: Vec<String> = Vec::new();

        let handle = match self.submit(request, &mut notes).await {
            Ok(handle) => handle,
            Err(text) => return text,
        };
        if !handle.is_complete() {
            return "Error: Failed to obtain message or conversation ID.".to_string();
        }

        let extraction = match self.poll(&handle, request, &mut notes).await {
            Some(extraction) => extraction,
            // A terminal failure, timeout, or unexpected error; the notes
            // already tell the whole story.
            None => return notes.join("\n"),
        };

        let query_results = if request.fetch_query_results {
            match (&extraction.generated_sql, &extraction.result_attachment_id) {
                (Some(_), Some(attachment_id)) => {
                    self.fetch_results(&handle, attachment_id).await
                }
                (None, _) => "Not fetched; no SQL query was generated.".to_string(),
                (Some(_), None) => "Not fetched; no attachment_id for results.".to_string(),
            }
        } else {
            "Not fetched.".to_string()
        };

        QueryReport {
            conversation_id: handle.conversation_id,
            message_id: handle.message_id,
            response_text: extraction.response_text,
            generated_sql: extraction.generated_sql,
            query_results,
            notes,
        }
        .render()
    }

    /// Starts a new conversation or sends a follow-up to an existing one.
    /// Failures come back as the user-facing string, never as an error.
    async fn submit(
        &self,
        request: &QueryRequest,
        notes: &mut Vec<String>,
    ) -> Result<ConversationHandle, String> {
        let payload = json!({"content": request.natural_language_query});

        if let Some(conversation_id) = &request.conversation_id {
            let url = format!("{}/conversations/{}/messages", self.base_url, conversation_id);
            info!(conversation_id = %conversation_id, "sending follow-up message");
            match self.rate_limited_request(Method::POST, &url, Some(&payload)).await {
                Ok(Some(data)) => {
                    // The message id shows up at the top level or nested under
                    // `message`, depending on the endpoint revision.
                    let message_id = data
                        .get("id")
                        .and_then(Value::as_str)
                        .or_else(|| data.pointer("/message/id").and_then(Value::as_str))
                        .map(str::to_string);
                    match message_id {
                        Some(message_id) => {
                            notes.push(format!("Follow-up sent. New Message ID: {}", message_id));
                            Ok(ConversationHandle {
                                conversation_id: conversation_id.clone(),
                                message_id,
                            })
                        }
                        None => Err(format!(
                            "Error: Could not get message_id from follow-up. Response: {}",
                            data
                        )),
                    }
                }
                Ok(None) => Err("Error: Failed to get response when sending follow-up.".to_string()),
                Err(e) => Err(format!("Error sending follow-up: {}", e)),
            }
        } else {
            let url = format!("{}/start-conversation", self.base_url);
            info!("starting new Genie conversation");
            match self.rate_limited_request(Method::POST, &url, Some(&payload)).await {
                Ok(Some(data)) => {
                    let conversation_id = data
                        .pointer("/conversation/id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    let message_id = data
                        .pointer("/message/id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    match (conversation_id, message_id) {
                        (Some(conversation_id), Some(message_id)) => {
                            notes.push(format!(
                                "New conversation. ID: {}, Message ID: {}",
                                conversation_id, message_id
                            ));
                            Ok(ConversationHandle {
                                conversation_id,
                                message_id,
                            })
                        }
                        _ => Err(format!(
                            "Error: Missing conversation_id or message_id. Response: {}",
                            data
                        )),
                    }
                }
                Ok(None) => {
                    Err("Error: Failed to get response when starting conversation.".to_string())
                }
                Err(e) => Err(format!("Error starting conversation: {}", e)),
            }
        }
    }

    /// Polls the message until a terminal status or the wall-clock budget runs
    /// out. Returns the extraction on completion; `None` means the notes hold
    /// a terminal error and the report stops there.
    async fn poll(
        &self,
        handle: &ConversationHandle,
        request: &QueryRequest,
        notes: &mut Vec<String>,
    ) -> Option<Extraction> {
        let poll_url = format!(
            "{}/conversations/{}/messages/{}",
            self.base_url, handle.conversation_id, handle.message_id
        );
        let started = Instant::now();
        let budget = Duration::from_secs(request.polling_timeout_seconds);
        let interval = Duration::from_secs(request.polling_interval_seconds);

        loop {
            if started.elapsed() > budget {
                warn!(message_id = %handle.message_id, "polling timed out");
                notes.push("Error: Polling timed out.".to_string());
                return None;
            }

            match self.rate_limited_request(Method::GET, &poll_url, None).await {
                Ok(Some(payload)) => match PollResult::from_payload(&payload) {
                    PollResult::Completed {
                        attachments,
                        raw_content,
                    } => {
                        info!(attachments = attachments.len(), "Genie processing completed");
                        notes.push("Genie processing completed.".to_string());
                        if !attachments.is_empty() {
                            return Some(Extraction::scan(
                                &attachments,
                                request.fetch_query_results,
                            ));
                        }
                        let mut extraction = Extraction::default();
                        let absorbed = raw_content
                            .as_ref()
                            .map(|content| {
                                extraction
                                    .absorb_bare_content(content, &request.natural_language_query)
                            })
                            .unwrap_or(false);
                        if absorbed {
                            notes.push(
                                "No attachments; used message content for response.".to_string(),
                            );
                        } else {
                            notes.push(
                                "No attachments or suitable main content for response."
                                    .to_string(),
                            );
                        }
                        return Some(extraction);
                    }
                    PollResult::Failed { details } => {
                        notes.push(format!("Error: Genie processing FAILED. Details: {}", details));
                        return None;
                    }
                    PollResult::Cancelled { details } => {
                        notes.push(format!(
                            "Error: Genie processing CANCELLED. Details: {}",
                            details
                        ));
                        return None;
                    }
                    PollResult::InProgress => {
                        debug!(message_id = %handle.message_id, "still in progress");
                    }
                    PollResult::Unknown { label } => {
                        notes.push(format!("Info: Genie API status update - '{}'.", label));
                    }
                },
                // Retry budget spent on 429s; treat like a degraded poll.
                Ok(None) => {
                    notes.push("Error: Failed to get polling response.".to_string());
                }
                // Isolated fetch errors are survivable; keep polling.
                Err(e @ (GenieError::HttpError(_) | GenieError::RequestError(_))) => {
                    notes.push(format!("Error during polling: {}", e));
                }
                Err(e) => {
                    notes.push(format!("Unexpected error during polling: {}", e));
                    return None;
                }
            }

            tokio::time::sleep(interval).await;
        }
    }

    async fn fetch_results(&self, handle: &ConversationHandle, attachment_id: &str) -> String {
        let url = format!(
            "{}/conversations/{}/messages/{}/attachments/{}/query-result",
            self.base_url, handle.conversation_id, handle.message_id, attachment_id
        );
        info!(attachment_id, "fetching query results");
        match self.rate_limited_request(Method::GET, &url, None).await {
            Ok(Some(data)) => format!("Successfully fetched: {}", data),
            Ok(None) => "Error: Failed to get query results.".to_string(),
            Err(e @ (GenieError::HttpError(_) | GenieError::RequestError(_))) => {
                format!("Error fetching results: {}", e)
            }
            Err(e) => format!("Error processing results: {}", e),
        }
    }

    /// One JSON request with the 429 retry policy: up to three retries with
    /// 2s/4s/8s backoff. `Ok(None)` means the retry budget was spent. Any
    /// other non-2xx status fails immediately with the explained error.
    async fn rate_limited_request(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
    ) -> Result<Option<Value>, GenieError> {
        let mut retry_count = 0;
        loop {
            let mut builder = self.http.request(method.clone(), url);
            if let Some(body) = payload {
                builder = builder.json(body);
            }
            let response = builder
                .send()
                .await
                .map_err(|e| GenieError::RequestError(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                let body = response
                    .text()
                    .await
                    .map_err(|e| GenieError::RequestError(e.to_string()))?;
                let value: Value = serde_json::from_str(&body).map_err(|e| {
                    GenieError::UnexpectedError(format!(
                        "undecodable response body from {}: {}",
                        url, e
                    ))
                })?;
                return Ok(Some(value));
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                retry_count += 1;
                if retry_count > MAX_RETRIES {
                    warn!(url, "rate limit retries exhausted");
                    return Ok(None);
                }
                let wait = BACKOFF_FACTOR.pow(retry_count);
                warn!(url, attempt = retry_count, wait_secs = wait, "rate limited, backing off");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(GenieError::HttpError(explain_http_error(
                status, url, &body, &headers,
            )));
        }
    }
}

#[async_trait]
impl ConversationalQuery for GenieClient {
    async fn execute(&self, request: &QueryRequest) -> String {
        GenieClient::execute(self, request).await
    }
}

fn normalize_instance(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    // Plain http is only meaningful for local test servers; Databricks hosts
    // are bare hostnames or https URLs.
    if trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed.strip_prefix("https://").unwrap_or(trimmed))
    }
}

fn truncate_body(text: &str) -> String {
    if text.chars().count() <= BODY_TRUNCATE_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(BODY_TRUNCATE_CHARS - 3).collect();
    format!("{}...", kept)
}

fn request_ids(headers: &HeaderMap) -> String {
    let request_id = headers
        .get("x-request-id")
        .or_else(|| headers.get("x-databricks-request-id"))
        .and_then(|v| v.to_str().ok());
    let org_id = headers
        .get("x-databricks-org-id")
        .and_then(|v| v.to_str().ok());

    let mut parts = Vec::new();
    if let Some(id) = request_id {
        parts.push(format!("request_id={}", id));
    }
    if let Some(id) = org_id {
        parts.push(format!("org_id={}", id));
    }
    parts.join(" ")
}

/// Renders a non-2xx response as one descriptive line: status, URL, truncated
/// body, any request/org ids from the headers, and a remediation hint keyed
/// off the status code.
fn explain_http_error(status: StatusCode, url: &str, body: &str, headers: &HeaderMap) -> String {
    let mut hints: Vec<&str> = Vec::new();
    match status.as_u16() {
        401 => {
            hints.push(
                "Invalid or expired token. Ensure DATABRICKS_TOKEN is a valid workspace PAT for this instance.",
            );
            hints.push("If you recently rotated the token, re-export it and restart.");
        }
        403 => {
            hints.push("Forbidden. The token likely lacks permission on the Genie space or workspace.");
            hints.push(
                "Verify: Genie Space -> Configure -> Permissions; the user needs at least 'Can Use'.",
            );
        }
        404 => {
            hints.push(
                "Not found. Check GENIE_SPACE_ID and that DATABRICKS_INSTANCE is the correct host (no protocol in host).",
            );
        }
        429 => {
            hints.push("Rate limit. Retried with backoff. Consider a longer polling interval.");
        }
        500..=599 => {
            hints.push("Server error. Try again shortly.");
        }
        _ => {}
    }

    let base = format!("HTTP {} calling {}", status.as_u16(), url);
    let details = format!("Response body: {}", truncate_body(body));
    let meta = request_ids(headers);

    let mut message = [base, details, meta]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");
    if !hints.is_empty() {
        message.push_str(" Hints: ");
        message.push_str(&hints.join(" "));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_normalization() {
        assert_eq!(
            normalize_instance("adb-123.4.azuredatabricks.net"),
            "https://adb-123.4.azuredatabricks.net"
        );
        assert_eq!(
            normalize_instance("https://adb-123.4.azuredatabricks.net/"),
            "https://adb-123.4.azuredatabricks.net"
        );
        assert_eq!(
            normalize_instance("http://127.0.0.1:9999"),
            "http://127.0.0.1:9999"
        );
    }

    #[test]
    fn truncation_keeps_short_bodies_and_ellipsizes_long_ones() {
        let short = "x".repeat(600);
        assert_eq!(truncate_body(&short), short);

        let long = "y".repeat(601);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), 600);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn explainer_includes_status_url_and_hint() {
        let message = explain_http_error(
            StatusCode::NOT_FOUND,
            "https://host/api/2.0/genie/spaces/s1/start-conversation",
            "{\"error_code\":\"RESOURCE_DOES_NOT_EXIST\"}",
            &HeaderMap::new(),
        );
        assert!(message.contains("HTTP 404 calling https://host/api/2.0/genie/spaces/s1/start-conversation"));
        assert!(message.contains("RESOURCE_DOES_NOT_EXIST"));
        assert!(message.contains("Check GENIE_SPACE_ID"));
    }

    #[test]
    fn explainer_surfaces_request_and_org_ids() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-9"));
        headers.insert("x-databricks-org-id", HeaderValue::from_static("org-3"));
        let message = explain_http_error(StatusCode::UNAUTHORIZED, "https://h/u", "", &headers);
        assert!(message.contains("request_id=req-9"));
        assert!(message.contains("org_id=org-3"));
        assert!(message.contains("Invalid or expired token"));
    }

    #[test]
    fn explainer_hint_for_server_errors() {
        let message =
            explain_http_error(StatusCode::BAD_GATEWAY, "https://h/u", "oops", &HeaderMap::new());
        assert!(message.contains("HTTP 502"));
        assert!(message.contains("Server error. Try again shortly."));
    }

    #[test]
    fn construction_rejects_missing_configuration() {
        let config = GenieConfig {
            databricks_instance: "host".into(),
            genie_space_id: "".into(),
            databricks_token: "tok".into(),
        };
        let err = GenieClient::new(&config)
            .err()
            .expect("construction should fail");
        match err {
            GenieError::ConfigError(msg) => assert!(msg.contains("GENIE_SPACE_ID")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}
