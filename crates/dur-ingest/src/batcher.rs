//! Batched upserts
//!
//! Normalized records are cut into contiguous, order-preserving batches and
//! written one batch at a time. [`BatchBuffer`] produces the same partition
//! incrementally for the streaming pipeline.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::Result;
use crate::models::MixtureRecord;
use crate::retry::RetryPolicy;
use crate::store::MixtureStore;

/// Rows per upsert request
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Number of batches `records` splits into
pub fn batch_count(records: usize, batch_size: usize) -> usize {
    if batch_size == 0 {
        return 0;
    }
    records.div_ceil(batch_size)
}

/// Totals of a [`UpsertBatcher::write`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub batches: usize,
    pub rows: u64,
}

pub struct UpsertBatcher {
    store: Arc<dyn MixtureStore>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl UpsertBatcher {
    pub fn new(store: Arc<dyn MixtureStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Contiguous batches of at most `batch_size` records, in order
    pub fn partition<'a>(&self, records: &'a [MixtureRecord]) -> Vec<&'a [MixtureRecord]> {
        records.chunks(self.batch_size).collect()
    }

    /// Upsert every record, one batch after another.
    ///
    /// Stops at the first failing batch; earlier batches stay committed.
    pub async fn write(&self, records: &[MixtureRecord]) -> Result<WriteStats> {
        let mut stats = WriteStats::default();
        if records.is_empty() {
            debug!("No records to write");
            return Ok(stats);
        }

        let total_batches = batch_count(records.len(), self.batch_size);
        for (i, batch) in self.partition(records).into_iter().enumerate() {
            let batch_no = i + 1;
            stats.rows += self.write_batch(batch_no, batch).await?;
            stats.batches += 1;
            info!(batch = batch_no, total_batches, rows = batch.len(), "Batch committed");
        }

        Ok(stats)
    }

    /// Upsert one batch with retries; errors are labelled with `batch_no`.
    pub async fn write_batch(&self, batch_no: usize, rows: &[MixtureRecord]) -> Result<u64> {
        let store = &self.store;
        self.retry
            .run("upsert batch", move || store.upsert(rows))
            .await
            .map_err(|e| e.at_batch(batch_no))
    }
}

/// Accumulates records and hands out full batches
#[derive(Debug)]
pub struct BatchBuffer {
    batch_size: usize,
    pending: Vec<MixtureRecord>,
}

impl BatchBuffer {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
        }
    }

    /// Add a record; returns a batch once `batch_size` records are buffered.
    pub fn push(&mut self, record: MixtureRecord) -> Option<Vec<MixtureRecord>> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            Some(std::mem::replace(
                &mut self.pending,
                Vec::with_capacity(self.batch_size),
            ))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remaining partial batch, if any
    pub fn finish(self) -> Option<Vec<MixtureRecord>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending)
        }
    }
}
