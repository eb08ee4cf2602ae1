use std::collections::HashSet;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

use crate::error::{PipelineError, WriteError};
use crate::resolver::Resolver;
use crate::traits::{RecordHandler, SourceFetcher, UnresolvedLog, UpsertWriter};
use crate::types::{
    IngestionReport, IngestionSummary, Page, PersistedId, RunOutcome, SourceKind, SourceRecord,
};
use crate::unresolved::UnresolvedName;

/// Longest record fragment included in a write-failure log line.
const PAYLOAD_FRAGMENT_CHARS: usize = 300;

#[derive(Debug, Clone, TypedBuilder)]
pub struct DriverConfig {
    /// Requested records per page. Clamped to the fetcher's maximum.
    #[builder(default = 1_000)]
    pub page_size: usize,
    /// Attempts per page before the run is fatal. 2 means one retry.
    #[builder(default = 2)]
    pub fetch_attempts: u32,
    #[builder(default = Duration::from_secs(2))]
    pub retry_delay: Duration,
    /// Pause between page fetches for scraped sources.
    #[builder(default = Duration::from_secs(1))]
    pub courtesy_delay: Duration,
    /// Stop once this many records have been processed.
    #[builder(default, setter(strip_option))]
    pub record_budget: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    FetchingPage,
    ProcessingRecords,
    Draining,
    Done,
}

/// Runs fetch → resolve → persist over every page of one source.
///
/// One page is fetched and fully processed before the next. Per-record
/// failures are counted and skipped; only a page that keeps failing or a
/// store that has gone away ends the run early.
pub struct Driver<F, H, W, L> {
    fetcher: F,
    handler: H,
    resolver: Resolver,
    writer: W,
    unresolved: L,
    config: DriverConfig,
    cancel: CancellationToken,
}

/// Mutable state of one run.
struct Run {
    summary: IngestionSummary,
    seen_unresolved: HashSet<String>,
    pages_fetched: u64,
}

impl<F, H, W, L> Driver<F, H, W, L>
where
    F: SourceFetcher,
    H: RecordHandler,
    W: UpsertWriter,
    L: UnresolvedLog,
{
    pub fn new(
        fetcher: F,
        handler: H,
        resolver: Resolver,
        writer: W,
        unresolved: L,
        config: DriverConfig,
    ) -> Self {
        Self {
            fetcher,
            handler,
            resolver,
            writer,
            unresolved,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop cooperatively when `token` is cancelled. Checked between pages.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub async fn run(&self) -> IngestionReport {
        let started = Instant::now();
        let source = self.fetcher.name().to_string();
        let page_size = self
            .config
            .page_size
            .clamp(1, self.fetcher.max_page_size().max(1));
        let scrape = self.fetcher.kind() == SourceKind::Scrape;

        let mut run = Run {
            summary: IngestionSummary::default(),
            seen_unresolved: HashSet::new(),
            pages_fetched: 0,
        };
        let mut state = DriverState::Idle;
        let mut page_index = 0usize;
        let mut page = Page::empty();
        let mut outcome = RunOutcome::Completed;

        info!(source = %source, page_size, "Ingestion run starting");

        while state != DriverState::Done {
            state = match state {
                DriverState::Idle => DriverState::FetchingPage,

                DriverState::FetchingPage => {
                    if self.cancel.is_cancelled() {
                        info!(source = %source, page = page_index, "Ingestion cancelled between pages");
                        outcome = RunOutcome::Cancelled;
                        DriverState::Draining
                    } else {
                        if scrape && page_index > 0 && !self.config.courtesy_delay.is_zero() {
                            tokio::time::sleep(self.config.courtesy_delay).await;
                        }
                        match self.fetch_with_retry(page_index, page_size).await {
                            Ok(fetched) => {
                                run.pages_fetched += 1;
                                page = fetched;
                                DriverState::ProcessingRecords
                            }
                            Err(e) => {
                                warn!(source = %source, error = %e, "Ingestion run failed");
                                outcome = RunOutcome::Fatal(e.to_string());
                                DriverState::Draining
                            }
                        }
                    }
                }

                DriverState::ProcessingRecords => {
                    let records = std::mem::take(&mut page.records);
                    if records.is_empty() {
                        debug!(source = %source, page = page_index, "Empty page, source exhausted");
                        DriverState::Draining
                    } else {
                        debug!(source = %source, page = page_index, records = records.len(), "Processing page");
                        match self.process_page(&source, &records, &mut run).await {
                            Err(e) => {
                                warn!(source = %source, page = page_index, error = %e, "Ingestion run failed");
                                outcome = RunOutcome::Fatal(e.to_string());
                                DriverState::Draining
                            }
                            Ok(()) if self.finished(page.total_count, &run.summary) => {
                                DriverState::Draining
                            }
                            Ok(()) => {
                                page_index += 1;
                                DriverState::FetchingPage
                            }
                        }
                    }
                }

                DriverState::Draining => {
                    run.summary.duration_ms = started.elapsed().as_millis() as u64;
                    info!(
                        source = %source,
                        pages = run.pages_fetched,
                        summary = %run.summary,
                        outcome = ?outcome,
                        "Ingestion run finished"
                    );
                    DriverState::Done
                }

                DriverState::Done => DriverState::Done,
            };
        }

        IngestionReport {
            source,
            pages_fetched: run.pages_fetched,
            summary: run.summary,
            outcome,
        }
    }

    /// The source's reported total, or the caller's budget, has been reached.
    fn finished(&self, total_count: Option<u64>, summary: &IngestionSummary) -> bool {
        let total_reached = total_count.is_some_and(|total| summary.total_seen >= total);
        let budget_spent = self
            .config
            .record_budget
            .is_some_and(|budget| summary.total_seen >= budget);
        total_reached || budget_spent
    }

    async fn fetch_with_retry(&self, page_index: usize, page_size: usize) -> Result<Page, PipelineError> {
        let attempts = self.config.fetch_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetcher.fetch_page(page_index, page_size).await {
                Ok(page) => return Ok(page),
                Err(e) if attempt < attempts => {
                    warn!(
                        source = self.fetcher.name(),
                        page = page_index,
                        attempt,
                        error = %e,
                        "Page fetch failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    return Err(PipelineError::FetchFailed {
                        page: page_index,
                        attempts: attempt,
                        source: e,
                    })
                }
            }
        }
    }

    /// Every record of the page is attempted unless the store goes away.
    async fn process_page(
        &self,
        source: &str,
        records: &[SourceRecord],
        run: &mut Run,
    ) -> Result<(), PipelineError> {
        for record in records {
            self.process_record(source, record, run).await?;
        }
        Ok(())
    }

    async fn process_record(
        &self,
        source: &str,
        record: &SourceRecord,
        run: &mut Run,
    ) -> Result<(), PipelineError> {
        run.summary.total_seen += 1;

        if let Some(result) = self.handler.register(record, &self.writer).await {
            run.summary.resolved += 1;
            return self.count_write(source, record, result, run);
        }

        let candidates = self.handler.entity_names(record);
        let matched = candidates
            .iter()
            .find_map(|name| Some((name, self.resolver.resolve_with_tier(name)?)));
        let Some((raw_name, resolution)) = matched else {
            let raw_name = candidates.first().cloned().unwrap_or_default();
            run.summary.unresolved += 1;
            let context = self.handler.context(record);
            debug!(source, raw_name = %raw_name, context = %context, "Unresolved entity name");
            if run.seen_unresolved.insert(raw_name.trim().to_lowercase()) {
                self.unresolved
                    .record(&UnresolvedName::new(raw_name, source, context))
                    .await;
            }
            return Ok(());
        };

        run.summary.resolved += 1;
        debug!(
            source,
            raw_name = %raw_name,
            entity = %resolution.id,
            tier = resolution.tier.as_str(),
            "Resolved entity name"
        );

        let result = self.handler.persist(resolution.id, record, &self.writer).await;
        self.count_write(source, record, result, run)
    }

    /// Tally one record's write. Only a lost store is fatal.
    fn count_write(
        &self,
        source: &str,
        record: &SourceRecord,
        result: Result<PersistedId, WriteError>,
        run: &mut Run,
    ) -> Result<(), PipelineError> {
        match result {
            Ok(_) => {
                run.summary.written += 1;
                Ok(())
            }
            Err(WriteError::StoreUnavailable(message)) => {
                run.summary.errors += 1;
                Err(PipelineError::StoreUnavailable(message))
            }
            Err(e) => {
                run.summary.errors += 1;
                warn!(
                    source,
                    context = %self.handler.context(record),
                    payload = %record.fragment(PAYLOAD_FRAGMENT_CHARS),
                    error = %e,
                    "Record write failed, skipping"
                );
                Ok(())
            }
        }
    }
}
