//! Paginated collection of raw upstream records
//!
//! The total record count is unknown up front, so collection starts with a
//! one-row probe of page 1, derives the page plan from `totalCount`, then walks
//! the pages in order with a fixed pause between requests.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::Result;
use crate::fetcher::PageSource;
use crate::models::{Page, RawRecord};
use crate::retry::RetryPolicy;

/// Default pause between page requests
pub const DEFAULT_PAGE_DELAY: Duration = Duration::from_millis(300);

/// Progress is logged every this many pages, and on the last page
const PROGRESS_EVERY: u32 = 10;

/// Number of pages needed for `total_count` records.
///
/// Never less than 1 so an empty dataset still gets one (empty) page read.
pub fn total_pages(total_count: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 1;
    }
    let pages = total_count.div_ceil(u64::from(page_size)).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

/// Page plan derived from the probe request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionPlan {
    pub total_count: u64,
    pub page_size: u32,
    pub total_pages: u32,
}

impl CollectionPlan {
    pub fn new(total_count: u64, page_size: u32) -> Self {
        Self {
            total_count,
            page_size,
            total_pages: total_pages(total_count, page_size),
        }
    }
}

/// One fetched page of unwrapped records
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub page_no: u32,
    pub records: Vec<RawRecord>,
}

/// Drives a [`PageSource`] over every page of the dataset.
pub struct Collector<S> {
    source: S,
    page_size: u32,
    page_delay: Duration,
    retry: RetryPolicy,
}

impl<S: PageSource> Collector<S> {
    pub fn new(source: S, page_size: u32) -> Self {
        Self {
            source,
            page_size,
            page_delay: DEFAULT_PAGE_DELAY,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Probe page 1 with a single row to learn `totalCount`.
    pub async fn plan(&self) -> Result<CollectionPlan> {
        let body = self
            .retry
            .run("probe total count", move || self.source.fetch_page(1, 1))
            .await?;
        let total_count = Page::from_value(body).total_count;
        let plan = CollectionPlan::new(total_count, self.page_size);

        info!(
            total_count = plan.total_count,
            total_pages = plan.total_pages,
            page_size = plan.page_size,
            "Discovered upstream dataset size"
        );
        Ok(plan)
    }

    /// Cursor over pages `start_page..=plan.total_pages`
    pub fn pages(&self, plan: CollectionPlan, start_page: u32) -> PageCursor<'_, S> {
        PageCursor {
            collector: self,
            plan,
            next_page: start_page.max(1),
            pages_fetched: 0,
            records_seen: 0,
        }
    }

    /// Collect every record of the dataset in page order.
    pub async fn collect(&self) -> Result<Vec<RawRecord>> {
        let plan = self.plan().await?;
        let mut cursor = self.pages(plan, 1);
        let mut records = Vec::with_capacity(usize::try_from(plan.total_count).unwrap_or(0));

        while let Some(page) = cursor.next_page().await? {
            records.extend(page.records);
        }

        info!(records = records.len(), "Collection complete");
        Ok(records)
    }
}

/// Sequential page reader created by [`Collector::pages`].
pub struct PageCursor<'a, S> {
    collector: &'a Collector<S>,
    plan: CollectionPlan,
    next_page: u32,
    pages_fetched: u32,
    records_seen: usize,
}

impl<S: PageSource> PageCursor<'_, S> {
    pub fn plan(&self) -> &CollectionPlan {
        &self.plan
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Page number the next call will request
    pub fn next_page_no(&self) -> u32 {
        self.next_page
    }

    /// Fetch the next page, or `None` once the plan is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<FetchedPage>> {
        if self.next_page > self.plan.total_pages {
            return Ok(None);
        }

        if self.pages_fetched > 0 && !self.collector.page_delay.is_zero() {
            tokio::time::sleep(self.collector.page_delay).await;
        }

        let page_no = self.next_page;
        let page_size = self.plan.page_size;
        let source = &self.collector.source;
        let body = self
            .collector
            .retry
            .run("fetch page", move || source.fetch_page(page_no, page_size))
            .await?;

        let page = Page::from_value(body);
        if page.total_count != self.plan.total_count {
            warn!(
                page = page_no,
                expected = self.plan.total_count,
                reported = page.total_count,
                "Upstream totalCount changed during collection"
            );
        }

        self.next_page += 1;
        self.pages_fetched += 1;
        self.records_seen += page.items.len();

        if page_no % PROGRESS_EVERY == 0 || page_no == self.plan.total_pages {
            info!(
                page = page_no,
                total_pages = self.plan.total_pages,
                records = self.records_seen,
                "Collection progress"
            );
        }

        Ok(Some(FetchedPage {
            page_no,
            records: page.items,
        }))
    }
}
