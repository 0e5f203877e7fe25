//! DUR Ingest Library
//!
//! Pulls drug mixture contraindication records (DUR "병용금기") from the
//! public data portal, normalizes them into the fixed 19-column `mixtures`
//! schema and upserts them into PostgreSQL or a Supabase/PostgREST project.
//!
//! # Pipeline
//!
//! - [`collector`]: probe `totalCount`, walk the pages in order
//! - [`normalizer`]: raw record to [`MixtureRecord`]
//! - [`batcher`]: fixed-size batches, one upsert each
//! - [`orchestrator`]: ties the stages together with checkpoint and resume
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dur_ingest::{IngestConfig, Orchestrator, RunOptions};
//! use dur_ingest::store::MemoryMixtureStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let report = Orchestrator::from_config(config)?
//!         .with_store(Arc::new(MemoryMixtureStore::new()))
//!         .run(RunOptions::default())
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod batcher;
pub mod checkpoint;
pub mod collector;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use config::{IngestConfig, StoreConfig};
pub use error::{IngestError, Result};
pub use models::{MixtureRecord, RawRecord};
pub use normalizer::RecordNormalizer;
pub use orchestrator::{load_snapshot, IngestReport, Orchestrator, RunOptions};
