//! Destination stores for normalized mixture rows
//!
//! - **postgres**: direct `INSERT ... ON CONFLICT` through `sqlx`
//! - **rest**: Supabase / PostgREST upsert over HTTP
//! - **memory**: in-process map, used for dry runs and tests
//!
//! The `mixtures` table and its unique key on [`NATURAL_KEY`] are provisioned
//! out of band (see `sql/mixtures.sql`). Stores only check that it exists.

pub mod memory;
pub mod postgres;
pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::{IngestError, Result};
use crate::models::{MixtureRecord, NATURAL_KEY};

pub use memory::MemoryMixtureStore;
pub use postgres::PgMixtureStore;
pub use rest::RestMixtureStore;

/// Upsert target for mixture rows
#[async_trait]
pub trait MixtureStore: Send + Sync {
    /// Short name for log lines
    fn kind(&self) -> &'static str;

    /// Fail with a configuration error when the destination table is missing
    async fn ensure_table(&self) -> Result<()>;

    /// Insert-or-update `rows` keyed by [`NATURAL_KEY`]; returns rows sent.
    async fn upsert(&self, rows: &[MixtureRecord]) -> Result<u64>;
}

/// Open the store described by `config`
pub async fn connect(
    config: &StoreConfig,
    table: &str,
    timeout: Duration,
) -> Result<Arc<dyn MixtureStore>> {
    let store: Arc<dyn MixtureStore> = match config {
        StoreConfig::Postgres {
            database_url,
            max_connections,
        } => Arc::new(PgMixtureStore::connect(database_url, *max_connections, table).await?),
        StoreConfig::Rest { url, api_key } => {
            Arc::new(RestMixtureStore::new(url, api_key, table, timeout)?)
        },
        StoreConfig::Memory => Arc::new(MemoryMixtureStore::new()),
    };
    Ok(store)
}

/// Keep only the last row for each natural key, in order of those last rows.
///
/// PostgreSQL refuses an `ON CONFLICT DO UPDATE` statement that touches the
/// same row twice, so duplicate keys inside one batch must be collapsed. Last
/// wins, the same outcome as upserting the rows one by one.
pub fn dedupe_by_natural_key(rows: &[MixtureRecord]) -> Vec<&MixtureRecord> {
    let mut last_index = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        last_index.insert(row.natural_key(), i);
    }

    rows.iter()
        .enumerate()
        .filter(|(i, row)| last_index.get(&row.natural_key()) == Some(i))
        .map(|(_, row)| row)
        .collect()
}

/// `"TYPE_NAME","INGR_CODE","MIXTURE_INGR_CODE"`
pub fn conflict_columns() -> String {
    NATURAL_KEY
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Double-quote an identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`public.mixtures`)
pub fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

/// Table names accepted by the stores: `name` or `schema.name`, ASCII
/// identifier characters only.
pub fn validate_table_name(table: &str) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(())
    } else {
        Err(IngestError::config(format!("Invalid table name '{}'", table)))
    }
}
