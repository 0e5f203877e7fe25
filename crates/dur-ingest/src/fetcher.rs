//! Upstream page fetcher
//!
//! One request per call against the DUR open-data endpoint. Retries are the
//! caller's business (see [`crate::retry::RetryPolicy`]).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};

/// Timeout applied to each upstream request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Result code the upstream uses for a successful call
const RESULT_OK: &str = "00";

/// Longest slice of an error body kept in error messages
const BODY_SNIPPET_LEN: usize = 200;

/// Source of raw upstream pages
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Fetch one page (1-based) of `num_of_rows` records as raw JSON.
    async fn fetch_page(&self, page_no: u32, num_of_rows: u32) -> Result<Value>;
}

#[derive(Serialize)]
struct PageQuery<'a> {
    #[serde(rename = "serviceKey")]
    service_key: &'a str,
    #[serde(rename = "pageNo")]
    page_no: u32,
    #[serde(rename = "numOfRows")]
    num_of_rows: u32,
    #[serde(rename = "type")]
    response_type: &'static str,
}

/// HTTP implementation of [`PageSource`]
pub struct HttpPageFetcher {
    client: Client,
    base_url: String,
    service_key: String,
}

impl HttpPageFetcher {
    pub fn new(
        base_url: impl Into<String>,
        service_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            service_key: service_key.into(),
        })
    }

    pub fn from_config(config: &IngestConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            config.service_key.clone(),
            config.request_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl PageSource for HttpPageFetcher {
    async fn fetch_page(&self, page_no: u32, num_of_rows: u32) -> Result<Value> {
        debug!(page = page_no, num_of_rows, "Requesting upstream page");

        let query = PageQuery {
            service_key: &self.service_key,
            page_no,
            num_of_rows,
            response_type: "json",
        };

        let response = self
            .client
            .get(&self.base_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| IngestError::network(page_no, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IngestError::Fetch {
                page: page_no,
                status: status.as_u16(),
                message: snippet(&body),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| IngestError::network(page_no, &e))?;

        let body: Value = serde_json::from_str(&text).map_err(|e| IngestError::Decode {
            page: page_no,
            message: format!("{} (body starts with {:?})", e, snippet(&text)),
        })?;

        check_result_code(page_no, &body)?;
        Ok(body)
    }
}

/// Reject bodies whose `header.resultCode` is present and not `"00"`.
pub fn check_result_code(page_no: u32, body: &Value) -> Result<()> {
    let Some(header) = body.get("header") else {
        return Ok(());
    };

    let code = match header.get("resultCode") {
        Some(Value::String(code)) => code.trim().to_string(),
        Some(Value::Number(code)) => format!("{:02}", code.as_u64().unwrap_or(u64::MAX)),
        _ => return Ok(()),
    };

    if code == RESULT_OK {
        return Ok(());
    }

    let message = header
        .get("resultMsg")
        .and_then(Value::as_str)
        .unwrap_or("no result message");

    Err(IngestError::Fetch {
        page: page_no,
        status: 200,
        message: format!("result code {}: {}", code, message),
    })
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_SNIPPET_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_code_ok_or_absent() {
        assert!(check_result_code(1, &json!({"body": {}})).is_ok());
        assert!(check_result_code(1, &json!({"header": {"resultCode": "00"}})).is_ok());
        assert!(check_result_code(1, &json!({"header": {"resultCode": 0}})).is_ok());
        assert!(check_result_code(1, &json!({"header": {}})).is_ok());
    }

    #[test]
    fn test_result_code_failure() {
        let err = check_result_code(
            4,
            &json!({"header": {"resultCode": "30", "resultMsg": "SERVICE_KEY_IS_NOT_REGISTERED_ERROR"}}),
        )
        .unwrap_err();

        match err {
            IngestError::Fetch {
                page,
                status,
                message,
            } => {
                assert_eq!(page, 4);
                assert_eq!(status, 200);
                assert!(message.contains("SERVICE_KEY_IS_NOT_REGISTERED_ERROR"));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_snippet_truncates_on_char_boundary() {
        let long = "가".repeat(BODY_SNIPPET_LEN + 10);
        let cut = snippet(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), BODY_SNIPPET_LEN + 3);
        assert_eq!(snippet("  short  "), "short");
    }
}
