//! Remote uploader: multipart POST with Basic Auth.
//!
//! Wire contract:
//! - `POST <endpoint>` as `multipart/form-data`
//! - a binary `file` field (original basename as filename) and a text `tag`
//!   field, plus any configured fixed fields
//! - `Authorization: Basic <base64(username:password)>`
//! - any 2xx status is success
//!
//! The response body is inspected best-effort: JSON `task_id` (or `id`) and
//! `status` are surfaced for logging, and on failure `error`, `message` or
//! `detail` supply the error text.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;

use super::error::UploadError;
use crate::config::UploadConfig;

/// Longest body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 200;

/// What the remote endpoint said about an accepted upload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadOutcome {
    pub status: u16,
    pub task_id: Option<String>,
    pub remote_status: Option<String>,
}

/// Sends a file with its tag to a remote endpoint.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &Path, tag: &str) -> Result<UploadOutcome, UploadError>;
}

/// `reqwest`-backed uploader built once from [`UploadConfig`].
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
    file_field: String,
    tag_field: String,
    fields: BTreeMap<String, String>,
}

impl HttpUploader {
    /// Build the client: connect timeout = `timeout_seconds`, total = twice that.
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let timeout = Duration::from_secs(config.timeout_seconds.max(1));
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout * 2)
            .user_agent(concat!("filerelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Client {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            file_field: config.file_field.clone(),
            tag_field: config.tag_field.clone(),
            fields: config.fields.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn build_form(&self, file: &Path, tag: &str) -> Result<Form, UploadError> {
        let bytes = tokio::fs::read(file).await.map_err(|source| UploadError::Io {
            path: file.to_path_buf(),
            source,
        })?;

        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let part = Part::bytes(bytes)
            .file_name(filename)
            .mime_str("application/octet-stream")
            .map_err(|e| UploadError::Client {
                reason: e.to_string(),
            })?;

        let mut form = Form::new()
            .part(self.file_field.clone(), part)
            .text(self.tag_field.clone(), tag.to_string());
        for (name, value) in &self.fields {
            form = form.text(name.clone(), value.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, file: &Path, tag: &str) -> Result<UploadOutcome, UploadError> {
        let form = self.build_form(file, tag).await?;

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport {
                endpoint: self.endpoint.clone(),
                reason: transport_reason(&e),
            })?;

        let status = response.status();
        // A body that cannot be read is treated as empty
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            Ok(parse_outcome(status.as_u16(), &body))
        } else {
            Err(UploadError::Status {
                status: status.as_u16(),
                message: error_message(&body)
                    .unwrap_or_else(|| status.canonical_reason().unwrap_or("no body").to_string()),
            })
        }
    }
}

fn transport_reason(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pull `task_id`/`id` and `status` out of a JSON body, if there is one.
pub(crate) fn parse_outcome(status: u16, body: &str) -> UploadOutcome {
    let json: Option<Value> = serde_json::from_str(body).ok();
    let field = |name: &str| json.as_ref().and_then(|v| v.get(name)).and_then(json_string);

    UploadOutcome {
        status,
        task_id: field("task_id").or_else(|| field("id")),
        remote_status: field("status"),
    }
}

/// Best-effort error text from a failed response body.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        for key in ["error", "message", "detail"] {
            match json.get(key) {
                Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
                Some(Value::Object(inner)) => {
                    if let Some(Value::String(s)) = inner.get("message") {
                        return Some(s.clone());
                    }
                }
                _ => {}
            }
        }
    }

    let excerpt: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
    if excerpt.len() < trimmed.len() {
        Some(format!("{excerpt}..."))
    } else {
        Some(excerpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_outcome_prefers_task_id() {
        let outcome = parse_outcome(202, r#"{"task_id":"t-9","id":"ignored","status":"queued"}"#);
        assert_eq!(outcome.status, 202);
        assert_eq!(outcome.task_id.as_deref(), Some("t-9"));
        assert_eq!(outcome.remote_status.as_deref(), Some("queued"));
    }

    #[test]
    fn test_parse_outcome_numeric_id() {
        let outcome = parse_outcome(200, r#"{"id":1234}"#);
        assert_eq!(outcome.task_id.as_deref(), Some("1234"));
        assert!(outcome.remote_status.is_none());
    }

    #[test]
    fn test_parse_outcome_non_json_is_fine() {
        let outcome = parse_outcome(200, "OK");
        assert_eq!(outcome, UploadOutcome { status: 200, ..Default::default() });
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error":"quota exceeded"}"#).as_deref(), Some("quota exceeded"));
        assert_eq!(
            error_message(r#"{"error":{"code":7,"message":"bad tag"}}"#).as_deref(),
            Some("bad tag")
        );
        assert_eq!(error_message(r#"{"detail":"Not authenticated"}"#).as_deref(), Some("Not authenticated"));
        assert_eq!(error_message("Internal Server Error").as_deref(), Some("Internal Server Error"));
        assert_eq!(error_message("   "), None);
    }

    #[test]
    fn test_error_message_truncates_long_bodies() {
        let body = "x".repeat(500);
        let message = error_message(&body).unwrap();
        assert_eq!(message.len(), MAX_ERROR_BODY + 3);
        assert!(message.ends_with("..."));
    }
}
