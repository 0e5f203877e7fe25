//! In-memory store
//!
//! Keeps rows in a map keyed by natural key, so repeated upserts behave like
//! the real table. Clones share the same map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::MixtureStore;
use crate::error::Result;
use crate::models::{MixtureRecord, NaturalKey};

#[derive(Default)]
struct Inner {
    rows: HashMap<NaturalKey, MixtureRecord>,
    upsert_calls: usize,
}

#[derive(Clone, Default)]
pub struct MemoryMixtureStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryMixtureStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().rows.is_empty()
    }

    pub fn get(&self, key: &NaturalKey) -> Option<MixtureRecord> {
        self.lock().rows.get(key).cloned()
    }

    /// All rows sorted by natural key
    pub fn rows(&self) -> Vec<MixtureRecord> {
        let mut rows: Vec<_> = self.lock().rows.values().cloned().collect();
        rows.sort_by_key(MixtureRecord::natural_key);
        rows
    }

    /// Number of non-empty batches received
    pub fn upsert_calls(&self) -> usize {
        self.lock().upsert_calls
    }
}

#[async_trait]
impl MixtureStore for MemoryMixtureStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn ensure_table(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, rows: &[MixtureRecord]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let mut inner = self.lock();
        inner.upsert_calls += 1;
        for row in rows {
            inner.rows.insert(row.natural_key(), row.clone());
        }
        Ok(rows.len() as u64)
    }
}
