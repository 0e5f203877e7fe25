//! Ingestion orchestrator
//!
//! Runs the pipeline page by page:
//! 1. Check that the destination table exists
//! 2. Probe the upstream for `totalCount` and plan the pages
//! 3. Resume from a compatible checkpoint, if any
//! 4. For each page: append raw records to the snapshot, normalize them and
//!    upsert every full batch, saving the checkpoint after each commit
//! 5. Flush the last partial batch, close the snapshot, drop the checkpoint
//!
//! Memory stays bounded by one page plus one batch.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::batcher::{batch_count, BatchBuffer, UpsertBatcher, WriteStats};
use crate::checkpoint::{Checkpoint, ResumePosition};
use crate::collector::{CollectionPlan, Collector, PageCursor};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::fetcher::{HttpPageFetcher, PageSource};
use crate::models::{MixtureRecord, RawRecord};
use crate::normalizer::RecordNormalizer;
use crate::snapshot::{read_snapshot, write_snapshot, SnapshotWriter};
use crate::store::{validate_table_name, MixtureStore};

/// Options of a single [`Orchestrator::run`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Ignore and remove any existing checkpoint
    pub fresh: bool,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub total_count: u64,
    pub pages_fetched: u32,
    /// Raw records processed by this run (resumed runs skip committed ones)
    pub records_collected: usize,
    /// Rows sent to the store after in-batch de-duplication
    pub records_written: u64,
    pub batches_committed: usize,
    /// First page of a resumed run
    pub resumed_from: Option<u32>,
    /// Records written to the raw snapshot, when one was requested
    pub snapshot_records: Option<usize>,
}

impl IngestReport {
    pub fn summary(&self) -> String {
        let resumed = match self.resumed_from {
            Some(page) => format!(" (resumed at page {})", page),
            None => String::new(),
        };
        format!(
            "Ingested {} of {} records in {} batches from {} pages{}",
            self.records_written,
            self.total_count,
            self.batches_committed,
            self.pages_fetched,
            resumed
        )
    }
}

/// Logs each unknown upstream key once per run
#[derive(Default)]
struct DriftLog {
    seen: HashSet<String>,
}

impl DriftLog {
    fn observe(&mut self, normalizer: &RecordNormalizer, raw: &RawRecord) {
        for key in normalizer.unknown_keys(raw) {
            if self.seen.insert(key.to_string()) {
                warn!(key, "Upstream record has an unrecognized field");
            }
        }
    }
}

/// Mutable state of a streaming run
struct RunState {
    report: IngestReport,
    checkpoint: Checkpoint,
    buffer: BatchBuffer,
    snapshot: Option<SnapshotWriter>,
    drift: DriftLog,
    total_batches: usize,
}

pub struct Orchestrator<S> {
    config: IngestConfig,
    collector: Collector<S>,
    normalizer: RecordNormalizer,
    store: Option<Arc<dyn MixtureStore>>,
}

impl Orchestrator<HttpPageFetcher> {
    /// Validate `config` and build the HTTP-backed pipeline.
    pub fn from_config(config: IngestConfig) -> Result<Self> {
        config.validate_upstream()?;
        let fetcher = HttpPageFetcher::from_config(&config)?;
        Ok(Self::new(config, fetcher))
    }
}

impl<S: PageSource> Orchestrator<S> {
    pub fn new(config: IngestConfig, source: S) -> Self {
        let collector = Collector::new(source, config.page_size)
            .with_page_delay(config.page_delay)
            .with_retry(config.retry);

        Self {
            config,
            collector,
            normalizer: RecordNormalizer::new(),
            store: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn MixtureStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn require_store(&self) -> Result<Arc<dyn MixtureStore>> {
        validate_table_name(&self.config.table)?;
        self.store
            .clone()
            .ok_or_else(|| IngestError::config("No destination store configured"))
    }

    /// Full ingestion: collect, normalize and upsert with checkpointing.
    pub async fn run(&self, options: RunOptions) -> Result<IngestReport> {
        let store = self.require_store()?;

        info!(store = store.kind(), table = %self.config.table, "Phase 1: Checking destination table");
        store.ensure_table().await?;

        info!("Phase 2: Planning collection");
        let plan = self.collector.plan().await?;

        let checkpoint_path = self.config.checkpoint_path.as_path();
        if options.fresh {
            Checkpoint::clear(checkpoint_path)?;
        }
        let (checkpoint, resume) = self.resume_point(&plan);

        let snapshot = match &self.config.snapshot_path {
            Some(path) => {
                if resume.start_page > 1 || resume.skip_records > 0 {
                    warn!(
                        path = %path.display(),
                        "Resumed run: snapshot will only hold records fetched by this run"
                    );
                }
                Some(SnapshotWriter::create(path.clone())?)
            },
            None => None,
        };

        let mut state = RunState {
            report: IngestReport {
                total_count: plan.total_count,
                resumed_from: (resume.start_page > 1 || resume.skip_records > 0)
                    .then_some(resume.start_page),
                ..IngestReport::default()
            },
            checkpoint,
            buffer: BatchBuffer::new(self.config.batch_size),
            snapshot,
            drift: DriftLog::default(),
            total_batches: batch_count(
                usize::try_from(plan.total_count).unwrap_or(usize::MAX),
                self.config.batch_size,
            ),
        };

        let batcher =
            UpsertBatcher::new(store, self.config.batch_size).with_retry(self.config.retry);

        info!(
            start_page = resume.start_page,
            total_pages = plan.total_pages,
            "Phase 3: Streaming pages into {}",
            self.config.table
        );
        let mut cursor = self.collector.pages(plan, resume.start_page);

        if let Err(e) = self
            .stream(&mut cursor, resume.skip_records, &batcher, &mut state)
            .await
        {
            error!(
                error = %e,
                next_page = cursor.next_page_no(),
                pages_fetched = state.report.pages_fetched,
                batches_committed = state.checkpoint.batches_committed,
                records_committed = state.checkpoint.records_committed,
                "Ingestion stopped; rerun to resume after the last committed batch"
            );
            if let Some(snapshot) = state.snapshot.take() {
                if let Err(close_err) = snapshot.finish() {
                    warn!(error = %close_err, "Failed to close raw snapshot");
                }
            }
            return Err(e);
        }

        if let Some(snapshot) = state.snapshot.take() {
            state.report.snapshot_records = Some(snapshot.finish()?);
        }

        Checkpoint::clear(checkpoint_path)?;

        info!(
            pages = state.report.pages_fetched,
            records = state.report.records_collected,
            rows = state.report.records_written,
            batches = state.report.batches_committed,
            "Phase 4: Ingestion complete"
        );
        Ok(state.report)
    }

    async fn stream(
        &self,
        cursor: &mut PageCursor<'_, S>,
        mut skip: usize,
        batcher: &UpsertBatcher,
        state: &mut RunState,
    ) -> Result<()> {
        while let Some(page) = cursor.next_page().await? {
            state.report.pages_fetched += 1;

            let mut records = page.records;
            if skip > 0 {
                let already_committed = skip.min(records.len());
                records.drain(..already_committed);
                skip -= already_committed;
            }
            state.report.records_collected += records.len();

            for raw in &records {
                if let Some(snapshot) = state.snapshot.as_mut() {
                    snapshot.append(raw)?;
                }
                state.drift.observe(&self.normalizer, raw);

                if let Some(batch) = state.buffer.push(self.normalizer.normalize(raw)) {
                    self.commit(batcher, batch, state).await?;
                }
            }
        }

        let remainder = std::mem::replace(&mut state.buffer, BatchBuffer::new(batcher.batch_size()));
        if let Some(batch) = remainder.finish() {
            self.commit(batcher, batch, state).await?;
        }
        Ok(())
    }

    async fn commit(
        &self,
        batcher: &UpsertBatcher,
        batch: Vec<MixtureRecord>,
        state: &mut RunState,
    ) -> Result<()> {
        let batch_no = state.checkpoint.batches_committed + 1;
        let rows = batcher.write_batch(batch_no, &batch).await?;

        state.checkpoint.record_batch(batch.len());
        state.checkpoint.save(&self.config.checkpoint_path)?;
        state.report.records_written += rows;
        state.report.batches_committed += 1;

        info!(
            batch = batch_no,
            total_batches = state.total_batches,
            rows = batch.len(),
            records_committed = state.checkpoint.records_committed,
            "Batch committed"
        );
        Ok(())
    }

    /// Checkpoint to continue from, or a fresh one when there is none or it
    /// belongs to a different plan.
    fn resume_point(&self, plan: &CollectionPlan) -> (Checkpoint, ResumePosition) {
        let path = self.config.checkpoint_path.as_path();
        let existing = match Checkpoint::load(path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable checkpoint");
                None
            },
        };

        if let Some(checkpoint) = existing {
            if checkpoint.records_committed > 0
                && checkpoint.is_compatible(
                    &self.config.table,
                    plan.page_size,
                    self.config.batch_size,
                    plan.total_count,
                )
            {
                let position = checkpoint.resume_position();
                info!(
                    batches_committed = checkpoint.batches_committed,
                    records_committed = checkpoint.records_committed,
                    start_page = position.start_page,
                    skip_records = position.skip_records,
                    "Resuming from checkpoint"
                );
                return (checkpoint, position);
            }
        }

        (
            Checkpoint::new(
                self.config.table.clone(),
                plan.page_size,
                self.config.batch_size,
                plan.total_count,
            ),
            ResumePosition::beginning(),
        )
    }

    /// Collect every raw record and save them to `output`, store untouched.
    pub async fn fetch_only(&self, output: &Path) -> Result<usize> {
        info!(output = %output.display(), "Fetching raw records");
        let records = self.collector.collect().await?;
        write_snapshot(output, &records)
    }

    /// Normalize a saved raw snapshot and upsert it.
    pub async fn load_snapshot(&self, input: &Path) -> Result<WriteStats> {
        load_snapshot(&self.config, self.require_store()?, input).await
    }
}

/// Normalize a saved raw snapshot and upsert it into `store`.
///
/// Needs no upstream settings and makes no upstream requests.
pub async fn load_snapshot(
    config: &IngestConfig,
    store: Arc<dyn MixtureStore>,
    input: &Path,
) -> Result<WriteStats> {
    config.validate()?;
    validate_table_name(&config.table)?;
    store.ensure_table().await?;

    let raw = read_snapshot(input)?;
    info!(input = %input.display(), records = raw.len(), "Loaded raw snapshot");

    let records = normalize_all(&RecordNormalizer::new(), &raw);
    let stats = UpsertBatcher::new(store, config.batch_size)
        .with_retry(config.retry)
        .write(&records)
        .await?;

    info!(batches = stats.batches, rows = stats.rows, "Snapshot loaded");
    Ok(stats)
}

/// Normalize a batch of raw records, logging unknown fields once each.
pub fn normalize_all(normalizer: &RecordNormalizer, raw: &[RawRecord]) -> Vec<MixtureRecord> {
    let mut drift = DriftLog::default();
    raw.iter()
        .map(|record| {
            drift.observe(normalizer, record);
            normalizer.normalize(record)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryMixtureStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::TempDir;

    fn raw(ingr: &str, mixture: &str) -> Value {
        json!({
            "TYPE_NAME": "병용금기",
            "INGR_CODE": ingr,
            "MIXTURE_INGR_CODE": mixture,
            "NOTIFICATION_DATE": "20230115",
            "DEL_YN": "정상"
        })
    }

    struct StaticPages {
        pages: Vec<Vec<Value>>,
    }

    #[async_trait]
    impl PageSource for StaticPages {
        async fn fetch_page(&self, page_no: u32, num_of_rows: u32) -> Result<Value> {
            let total: usize = self.pages.iter().map(Vec::len).sum();
            if num_of_rows == 1 {
                return Ok(json!({"body": {"totalCount": total, "items": []}}));
            }
            let items = self.pages.get(page_no as usize - 1).cloned().unwrap_or_default();
            Ok(json!({"body": {"totalCount": total, "items": items}}))
        }
    }

    fn orchestrator(dir: &TempDir, pages: Vec<Vec<Value>>) -> Orchestrator<StaticPages> {
        let config = IngestConfig::new("http://unused", "key")
            .with_page_size(2)
            .with_batch_size(3)
            .with_page_delay(Duration::ZERO)
            .with_checkpoint_path(dir.path().join("checkpoint.json"));
        Orchestrator::new(config, StaticPages { pages })
    }

    #[tokio::test]
    async fn test_run_requires_store() {
        let dir = TempDir::new().unwrap();
        let err = orchestrator(&dir, vec![])
            .run(RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[tokio::test]
    async fn test_run_streams_all_pages() {
        let dir = TempDir::new().unwrap();
        let store = MemoryMixtureStore::new();
        let pages = vec![
            vec![raw("A", "1"), raw("B", "1")],
            vec![raw("C", "1"), raw("D", "1")],
            vec![raw("E", "1")],
        ];

        let report = orchestrator(&dir, pages)
            .with_store(Arc::new(store.clone()))
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total_count, 5);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.records_collected, 5);
        assert_eq!(report.records_written, 5);
        assert_eq!(report.batches_committed, 2);
        assert_eq!(report.resumed_from, None);
        assert_eq!(store.len(), 5);
        assert_eq!(store.upsert_calls(), 2);
        assert!(!dir.path().join("checkpoint.json").exists());

        let first = &store.rows()[0];
        assert_eq!(first.notification_date.as_deref(), Some("2023-01-15"));
        assert!(!first.del_yn);
    }

    #[tokio::test]
    async fn test_run_resumes_from_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = MemoryMixtureStore::new();
        let pages = vec![
            vec![raw("A", "1"), raw("B", "1")],
            vec![raw("C", "1"), raw("D", "1")],
            vec![raw("E", "1")],
        ];

        let mut checkpoint = Checkpoint::new("mixtures", 2, 3, 5);
        checkpoint.record_batch(3);
        checkpoint.save(&dir.path().join("checkpoint.json")).unwrap();

        let report = orchestrator(&dir, pages)
            .with_store(Arc::new(store.clone()))
            .run(RunOptions::default())
            .await
            .unwrap();

        assert_eq!(report.resumed_from, Some(2));
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.records_collected, 2);
        let codes: Vec<_> = store.rows().into_iter().map(|r| r.ingr_code).collect();
        assert_eq!(codes, vec!["D", "E"]);
    }

    #[tokio::test]
    async fn test_fresh_run_ignores_checkpoint() {
        let dir = TempDir::new().unwrap();
        let store = MemoryMixtureStore::new();

        let mut checkpoint = Checkpoint::new("mixtures", 2, 3, 2);
        checkpoint.record_batch(2);
        checkpoint.save(&dir.path().join("checkpoint.json")).unwrap();

        let report = orchestrator(&dir, vec![vec![raw("A", "1"), raw("B", "1")]])
            .with_store(Arc::new(store.clone()))
            .run(RunOptions { fresh: true })
            .await
            .unwrap();

        assert_eq!(report.resumed_from, None);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_only_and_load_snapshot() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("raw/mixture_raw.json");
        let pages = vec![vec![raw("A", "1"), raw("B", "1")], vec![raw("A", "1")]];
        let store = MemoryMixtureStore::new();
        let orchestrator = orchestrator(&dir, pages).with_store(Arc::new(store.clone()));

        let saved = orchestrator.fetch_only(&output).await.unwrap();
        assert_eq!(saved, 3);
        assert_eq!(store.upsert_calls(), 0);

        let stats = orchestrator.load_snapshot(&output).await.unwrap();
        assert_eq!(stats, WriteStats { batches: 1, rows: 3 });
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_load_snapshot_without_upstream_settings() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("mixture_raw.json");
        write_snapshot(&input, &[raw("A", "1"), raw("B", "1"), raw("A", "1")]).unwrap();

        let config = IngestConfig::new("", "").with_batch_size(2);
        assert!(config.validate_upstream().is_err());

        let store = MemoryMixtureStore::new();
        let stats = load_snapshot(&config, Arc::new(store.clone()), &input)
            .await
            .unwrap();

        assert_eq!(stats, WriteStats { batches: 2, rows: 3 });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_report_summary() {
        let report = IngestReport {
            total_count: 1201,
            pages_fetched: 7,
            records_collected: 701,
            records_written: 701,
            batches_committed: 2,
            resumed_from: Some(6),
            snapshot_records: None,
        };
        assert_eq!(
            report.summary(),
            "Ingested 701 of 1201 records in 2 batches from 7 pages (resumed at page 6)"
        );
    }
}
