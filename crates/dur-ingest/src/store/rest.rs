//! Supabase / PostgREST store
//!
//! Batches are POSTed to `{url}/rest/v1/{table}` with
//! `Prefer: resolution=merge-duplicates`, which PostgREST turns into
//! `INSERT ... ON CONFLICT DO UPDATE` on the `on_conflict` columns.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{dedupe_by_natural_key, MixtureStore};
use crate::error::{IngestError, Result};
use crate::models::{MixtureRecord, NATURAL_KEY};

const UPSERT_PREFER: &str = "resolution=merge-duplicates,return=minimal";

pub struct RestMixtureStore {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl RestMixtureStore {
    pub fn new(url: &str, api_key: &str, table: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IngestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
            api_key: api_key.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl MixtureStore for RestMixtureStore {
    fn kind(&self) -> &'static str {
        "rest"
    }

    async fn ensure_table(&self) -> Result<()> {
        let response = self
            .request(self.client.get(&self.endpoint))
            .query(&[("select", NATURAL_KEY[0]), ("limit", "1")])
            .send()
            .await
            .map_err(|e| IngestError::config(format!("Failed to reach {}: {}", self.endpoint, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let reason = if status == StatusCode::NOT_FOUND {
            "destination table does not exist".to_string()
        } else {
            format!("status {}", status.as_u16())
        };
        Err(IngestError::config(format!(
            "Cannot use {}: {} {}",
            self.endpoint,
            reason,
            body.trim()
        )))
    }

    async fn upsert(&self, rows: &[MixtureRecord]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let unique = dedupe_by_natural_key(rows);
        debug!(rows = unique.len(), endpoint = %self.endpoint, "Posting batch");

        let response = self
            .request(self.client.post(&self.endpoint))
            .query(&[("on_conflict", NATURAL_KEY.join(","))])
            .header("Prefer", UPSERT_PREFER)
            .json(&unique)
            .send()
            .await
            .map_err(|e| IngestError::upsert(true, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Err(IngestError::upsert(
                retryable,
                format!("status {}: {}", status.as_u16(), body.trim()),
            ));
        }

        Ok(unique.len() as u64)
    }
}
