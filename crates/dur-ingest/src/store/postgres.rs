//! PostgreSQL store
//!
//! One multi-row `INSERT ... ON CONFLICT DO UPDATE` per batch. A 500-row batch
//! binds 9,500 parameters, well under the 65,535 limit.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};

use super::{conflict_columns, dedupe_by_natural_key, quote_ident, quote_table, MixtureStore};
use crate::error::{IngestError, Result};
use crate::models::{ColumnValue, MixtureRecord, MIXTURE_COLUMNS, NATURAL_KEY};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PgMixtureStore {
    pool: PgPool,
    table: String,
}

impl PgMixtureStore {
    pub async fn connect(database_url: &str, max_connections: u32, table: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(|e| IngestError::config(format!("Failed to connect to database: {}", e)))?;

        info!(table, max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool, table))
    }

    pub fn from_pool(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

#[async_trait]
impl MixtureStore for PgMixtureStore {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn ensure_table(&self) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1::text) IS NOT NULL")
            .bind(regclass_name(&self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IngestError::config(format!("Failed to look up table: {}", e)))?;

        if exists {
            Ok(())
        } else {
            Err(IngestError::config(format!(
                "Destination table '{}' does not exist; create it with sql/mixtures.sql",
                self.table
            )))
        }
    }

    async fn upsert(&self, rows: &[MixtureRecord]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let unique = dedupe_by_natural_key(rows);
        if unique.len() < rows.len() {
            debug!(
                rows = rows.len(),
                unique = unique.len(),
                "Collapsed duplicate natural keys in batch"
            );
        }

        let mut query = build_upsert(&self.table, &unique);
        query
            .build()
            .execute(&self.pool)
            .await
            .map_err(classify_error)?;

        Ok(unique.len() as u64)
    }
}

/// `to_regclass` argument naming the same relation `build_upsert` writes to.
/// Unquoted names would be folded to lower case.
fn regclass_name(table: &str) -> String {
    quote_table(table)
}

/// Build the batch upsert statement for `rows`.
pub fn build_upsert<'r>(table: &str, rows: &[&'r MixtureRecord]) -> QueryBuilder<'r, Postgres> {
    let columns = MIXTURE_COLUMNS
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let mut query = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote_table(table),
        columns
    ));

    query.push_values(rows.iter().copied(), |mut b, row| {
        for value in row.column_values() {
            match value {
                ColumnValue::Text(text) => {
                    b.push_bind(text);
                },
                ColumnValue::Date(date) => {
                    b.push_bind(date).push_unseparated("::date");
                },
                ColumnValue::Flag(flag) => {
                    b.push_bind(flag);
                },
            }
        }
    });

    let updates = MIXTURE_COLUMNS
        .iter()
        .filter(|c| !NATURAL_KEY.contains(c))
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ");

    query.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {}",
        conflict_columns(),
        updates
    ));
    query
}

/// Connection-level failures, serialization conflicts and admin shutdowns are
/// worth another attempt; constraint and type errors are not.
fn classify_error(err: sqlx::Error) -> IngestError {
    let retryable = match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| is_transient_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    };
    IngestError::upsert(retryable, err.to_string())
}

fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, "40001" | "40P01" | "57P01" | "53300") || code.starts_with("08")
}
