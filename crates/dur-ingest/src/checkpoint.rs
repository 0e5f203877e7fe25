//! Run checkpoint
//!
//! After every committed batch the orchestrator rewrites a small JSON file with
//! the number of batches and records already upserted. A later run with the
//! same page and batch sizes picks up right after the last committed batch.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub table: String,
    pub page_size: u32,
    pub batch_size: usize,
    /// Upstream `totalCount` when the run started
    pub total_count: u64,
    pub batches_committed: usize,
    pub records_committed: u64,
    pub updated_at: DateTime<Utc>,
}

/// Where a resumed run starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePosition {
    /// First page to fetch (1-based)
    pub start_page: u32,
    /// Records of `start_page` that were already committed
    pub skip_records: usize,
}

impl ResumePosition {
    pub fn beginning() -> Self {
        Self {
            start_page: 1,
            skip_records: 0,
        }
    }
}

impl Checkpoint {
    pub fn new(table: impl Into<String>, page_size: u32, batch_size: usize, total_count: u64) -> Self {
        Self {
            table: table.into(),
            page_size,
            batch_size,
            total_count,
            batches_committed: 0,
            records_committed: 0,
            updated_at: Utc::now(),
        }
    }

    /// Read a checkpoint; a missing file is `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let checkpoint = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "Loaded checkpoint");
        Ok(Some(checkpoint))
    }

    /// Write atomically (temp file + rename), creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Remove the checkpoint file if present
    pub fn clear(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether a run with these settings can continue from this checkpoint
    pub fn is_compatible(
        &self,
        table: &str,
        page_size: u32,
        batch_size: usize,
        total_count: u64,
    ) -> bool {
        let compatible = self.table == table
            && self.page_size == page_size
            && self.batch_size == batch_size
            && self.total_count == total_count;

        if !compatible {
            warn!(
                checkpoint_page_size = self.page_size,
                checkpoint_batch_size = self.batch_size,
                checkpoint_total = self.total_count,
                page_size,
                batch_size,
                total_count,
                "Checkpoint does not match this run, starting from the beginning"
            );
        }
        compatible
    }

    pub fn resume_position(&self) -> ResumePosition {
        if self.page_size == 0 {
            return ResumePosition::beginning();
        }
        let page_size = u64::from(self.page_size);
        ResumePosition {
            start_page: u32::try_from(self.records_committed / page_size + 1).unwrap_or(u32::MAX),
            skip_records: (self.records_committed % page_size) as usize,
        }
    }

    pub fn record_batch(&mut self, rows: usize) {
        self.batches_committed += 1;
        self.records_committed += rows as u64;
        self.updated_at = Utc::now();
    }
}
