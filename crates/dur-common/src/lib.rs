//! DUR Common Library
//!
//! Pieces shared by the DUR workspace members.
//!
//! - **Logging**: `tracing` subscriber setup driven by `DUR_LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use dur_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod logging;

pub use logging::{init_logging, LogConfig};
