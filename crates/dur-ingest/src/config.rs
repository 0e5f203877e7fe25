//! Ingestion configuration
//!
//! [`IngestConfig`] is built once at startup (from the environment or the
//! builder methods) and handed to the orchestrator. Nothing below this module
//! reads environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::batcher::DEFAULT_BATCH_SIZE;
use crate::collector::DEFAULT_PAGE_DELAY;
use crate::error::{IngestError, Result};
use crate::fetcher::DEFAULT_REQUEST_TIMEOUT;
use crate::retry::RetryPolicy;
use crate::store::validate_table_name;

/// Records requested per upstream page
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Destination table
pub const DEFAULT_TABLE: &str = "mixtures";

pub const DEFAULT_CHECKPOINT_PATH: &str = "data/checkpoints/mixtures.json";

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Where normalized rows are written
#[derive(Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Postgres {
        database_url: String,
        max_connections: u32,
    },
    /// Supabase / PostgREST project URL and API key
    Rest { url: String, api_key: String },
    Memory,
}

impl std::fmt::Debug for StoreConfig {
    // Credentials stay out of log output.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres {
                max_connections, ..
            } => f
                .debug_struct("Postgres")
                .field("max_connections", max_connections)
                .finish_non_exhaustive(),
            Self::Rest { url, .. } => f.debug_struct("Rest").field("url", url).finish_non_exhaustive(),
            Self::Memory => f.write_str("Memory"),
        }
    }
}

#[derive(Clone)]
pub struct IngestConfig {
    /// Upstream endpoint (full URL of the mixture-contraindication operation)
    pub base_url: String,
    /// data.go.kr service key, sent as `serviceKey`
    pub service_key: String,
    /// `numOfRows` per page request
    pub page_size: u32,
    /// Rows per upsert
    pub batch_size: usize,
    pub table: String,
    pub request_timeout: Duration,
    pub page_delay: Duration,
    pub retry: RetryPolicy,
    /// Raw snapshot target, if one should be written during a run
    pub snapshot_path: Option<PathBuf>,
    pub checkpoint_path: PathBuf,
    pub store: Option<StoreConfig>,
}

impl std::fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &"<redacted>")
            .field("page_size", &self.page_size)
            .field("batch_size", &self.batch_size)
            .field("table", &self.table)
            .field("request_timeout", &self.request_timeout)
            .field("page_delay", &self.page_delay)
            .field("retry", &self.retry)
            .field("snapshot_path", &self.snapshot_path)
            .field("checkpoint_path", &self.checkpoint_path)
            .field("store", &self.store)
            .finish()
    }
}

impl IngestConfig {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            service_key: service_key.into(),
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            table: DEFAULT_TABLE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_delay: DEFAULT_PAGE_DELAY,
            retry: RetryPolicy::default(),
            snapshot_path: None,
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            store: None,
        }
    }

    /// Load settings from the process environment, reading `.env` first.
    ///
    /// `MIXTURE_API_BASE_URL` and `MIXTURE_API_SERVICE_KEY` may be absent here;
    /// commands that call the upstream check them with
    /// [`IngestConfig::validate_upstream`]. The store is PostgreSQL when
    /// `DATABASE_URL` is set, otherwise PostgREST when both `SUPABASE_URL` and
    /// `SUPABASE_KEY` are set.
    pub fn from_env() -> Result<Self> {
        // A missing .env is fine; real environment variables still apply.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`IngestConfig::from_env`] over an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut config = Self::new(
            var("MIXTURE_API_BASE_URL").unwrap_or_default(),
            var("MIXTURE_API_SERVICE_KEY").unwrap_or_default(),
        );

        if let Some(raw) = var("MIXTURE_API_NUM_OF_ROWS") {
            config.page_size = parse_number("MIXTURE_API_NUM_OF_ROWS", &raw)?;
        }
        if let Some(raw) = var("MIXTURE_BATCH_SIZE") {
            config.batch_size = parse_number("MIXTURE_BATCH_SIZE", &raw)?;
        }
        if let Some(table) = var("MIXTURE_TABLE") {
            config.table = table;
        }
        if let Some(raw) = var("MIXTURE_PAGE_DELAY_MS") {
            config.page_delay = Duration::from_millis(parse_number("MIXTURE_PAGE_DELAY_MS", &raw)?);
        }

        config.store = match (var("DATABASE_URL"), var("SUPABASE_URL"), var("SUPABASE_KEY")) {
            (Some(database_url), _, _) => Some(StoreConfig::Postgres {
                database_url,
                max_connections: DEFAULT_MAX_CONNECTIONS,
            }),
            (None, Some(url), Some(api_key)) => Some(StoreConfig::Rest { url, api_key }),
            _ => None,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = Some(store);
        self
    }

    /// Check the settings every command needs.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(IngestError::config("Page size must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(IngestError::config("Batch size must be at least 1"));
        }
        Ok(())
    }

    /// Check the settings needed to call the upstream API (`run` and `fetch`).
    pub fn validate_upstream(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(IngestError::config("MIXTURE_API_BASE_URL is not set"));
        }
        if self.service_key.trim().is_empty() {
            return Err(IngestError::config("MIXTURE_API_SERVICE_KEY is not set"));
        }
        self.validate()
    }

    /// Check the settings needed to write: a store and a usable table name.
    pub fn validate_write_settings(&self) -> Result<&StoreConfig> {
        validate_table_name(&self.table)?;
        if self.batch_size == 0 {
            return Err(IngestError::config("Batch size must be at least 1"));
        }
        self.store.as_ref().ok_or_else(|| {
            IngestError::config("No destination store configured; set DATABASE_URL or SUPABASE_URL and SUPABASE_KEY")
        })
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| IngestError::config(format!("{} must be a non-negative integer, got '{}'", name, raw)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("MIXTURE_API_BASE_URL", "https://apis.example.kr/DURPrdlstInfoService/getUsjntTabooInfoList"),
        ("MIXTURE_API_SERVICE_KEY", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.table, "mixtures");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.page_delay, Duration::from_millis(300));
        assert_eq!(config.retry, RetryPolicy::new(3, Duration::from_secs(2)));
        assert_eq!(config.checkpoint_path, PathBuf::from("data/checkpoints/mixtures.json"));
        assert!(config.store.is_none());
    }

    #[test]
    fn test_missing_upstream_values() {
        let config = IngestConfig::from_lookup(lookup(&[("MIXTURE_API_SERVICE_KEY", "k")])).unwrap();
        let err = config.validate_upstream().unwrap_err();
        assert!(err.to_string().contains("MIXTURE_API_BASE_URL"));

        let config = IngestConfig::from_lookup(lookup(&[
            ("MIXTURE_API_BASE_URL", "https://x"),
            ("MIXTURE_API_SERVICE_KEY", "   "),
        ]))
        .unwrap();
        let err = config.validate_upstream().unwrap_err();
        assert!(matches!(err, IngestError::Config(msg) if msg.contains("MIXTURE_API_SERVICE_KEY")));

        assert!(IngestConfig::from_lookup(lookup(&REQUIRED))
            .unwrap()
            .validate_upstream()
            .is_ok());
    }

    #[test]
    fn test_write_side_settings_without_upstream() {
        let config = IngestConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/dur"),
            ("MIXTURE_BATCH_SIZE", "250"),
        ]))
        .unwrap();

        assert_eq!(config.batch_size, 250);
        assert!(matches!(
            config.validate_write_settings().unwrap(),
            StoreConfig::Postgres { max_connections: 5, .. }
        ));
        assert!(config.validate_upstream().is_err());
    }

    #[test]
    fn test_overrides_and_store_selection() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("MIXTURE_API_NUM_OF_ROWS", "50"),
            ("MIXTURE_BATCH_SIZE", "200"),
            ("MIXTURE_PAGE_DELAY_MS", "0"),
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_KEY", "anon"),
        ]);
        let config = IngestConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.page_delay, Duration::ZERO);
        assert!(matches!(config.store, Some(StoreConfig::Rest { .. })));

        vars.push(("DATABASE_URL", "postgres://localhost/dur"));
        let config = IngestConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(matches!(config.store, Some(StoreConfig::Postgres { .. })));
    }

    #[test]
    fn test_invalid_numbers() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("MIXTURE_API_NUM_OF_ROWS", "abc"));
        assert!(IngestConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("MIXTURE_BATCH_SIZE", "0"));
        assert!(IngestConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn test_write_settings() {
        let config = IngestConfig::new("https://x", "k");
        assert!(config.validate_write_settings().is_err());

        let config = config.with_store(StoreConfig::Memory);
        assert_eq!(config.validate_write_settings().unwrap(), &StoreConfig::Memory);

        let config = config.with_table("bad table");
        assert!(config.validate_write_settings().is_err());
    }

    #[test]
    fn test_debug_hides_credentials() {
        let config = IngestConfig::new("https://x", "very-secret").with_store(StoreConfig::Postgres {
            database_url: "postgres://user:pw@host/db".into(),
            max_connections: 5,
        });
        let printed = format!("{:?}", config);
        assert!(!printed.contains("very-secret"));
        assert!(!printed.contains("pw@host"));
    }
}
