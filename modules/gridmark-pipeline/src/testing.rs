//! Scripted fetchers, handlers and writers for driver tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{FetchError, WriteError};
use crate::traits::{RecordHandler, SourceFetcher, UpsertWriter};
use crate::types::{EntityId, Page, PersistedId, SourceKind, SourceRecord};
use crate::writer::{Fields, NaturalKey, UpsertTarget};

enum Step {
    Page(Page),
    Fail(String),
}

/// Replays a fixed script of pages and failures, one step per call.
/// Once the script runs out every call returns an empty page.
pub struct ScriptedFetcher {
    name: String,
    kind: SourceKind,
    max_page_size: usize,
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(usize, usize)>>,
}

impl ScriptedFetcher {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: SourceKind::Api,
            max_page_size: 1_000,
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn scrape(mut self) -> Self {
        self.kind = SourceKind::Scrape;
        self
    }

    pub fn max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max;
        self
    }

    pub fn page(self, records: Vec<serde_json::Value>) -> Self {
        self.push(Step::Page(Page::new(
            records.into_iter().map(SourceRecord::new).collect(),
        )))
    }

    pub fn page_with_total(self, records: Vec<serde_json::Value>, total: u64) -> Self {
        self.push(Step::Page(
            Page::new(records.into_iter().map(SourceRecord::new).collect()).with_total(total),
        ))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Step::Fail(message.to_string()))
    }

    fn push(self, step: Step) -> Self {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(step);
        self
    }

    /// `(page_index, page_size)` of every call, in order.
    pub fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn max_page_size(&self) -> usize {
        self.max_page_size
    }

    async fn fetch_page(&self, page_index: usize, page_size: usize) -> Result<Page, FetchError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((page_index, page_size));

        let step = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match step {
            Some(Step::Page(page)) => Ok(page),
            Some(Step::Fail(message)) => Err(FetchError::Transport(message)),
            None => Ok(Page::empty()),
        }
    }
}

/// Destination used by [`PriceHandler`].
pub const TEST_PRICES: UpsertTarget = UpsertTarget::new("test_prices", &["gpu_id", "provider"]);

/// Reads `{name, price, provider?}` records and upserts one price row per
/// `(gpu_id, provider)`. `provider` defaults to `"test"`.
#[derive(Default)]
pub struct PriceHandler;

#[async_trait]
impl RecordHandler for PriceHandler {
    fn entity_name(&self, record: &SourceRecord) -> Option<String> {
        record.text("name")
    }

    /// `name`, then `model` when the record carries one.
    fn entity_names(&self, record: &SourceRecord) -> Vec<String> {
        record.text("name").into_iter().chain(record.text("model")).collect()
    }

    fn context(&self, record: &SourceRecord) -> String {
        format!(
            "provider={}",
            record.text("provider").unwrap_or_else(|| "test".into())
        )
    }

    async fn persist(
        &self,
        entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        let key = NaturalKey::new().with("gpu_id", entity).with(
            "provider",
            record.text("provider").unwrap_or_else(|| "test".into()),
        );
        let fields = Fields::new().with("price", record.raw().get("price").and_then(|p| p.as_f64()));
        writer.upsert(&TEST_PRICES, &key, &fields, record.raw()).await
    }
}

/// How [`FlakyWriter`] fails a scripted call.
#[derive(Debug, Clone, Copy)]
pub enum Flake {
    WriteFailed,
    StoreUnavailable,
}

/// Delegates to `inner` except on scripted call numbers (1-based).
pub struct FlakyWriter<W> {
    inner: W,
    failures: Vec<(usize, Flake)>,
    calls: AtomicUsize,
}

impl<W: UpsertWriter> FlakyWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            failures: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_on(mut self, call: usize, flake: Flake) -> Self {
        self.failures.push((call, flake));
        self
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<W: UpsertWriter> UpsertWriter for FlakyWriter<W> {
    async fn upsert(
        &self,
        target: &UpsertTarget,
        key: &NaturalKey,
        fields: &Fields,
        payload: &serde_json::Value,
    ) -> Result<PersistedId, WriteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.failures.iter().find(|(n, _)| *n == call) {
            Some((_, Flake::WriteFailed)) => Err(WriteError::write_failed(
                target.table,
                key.to_string(),
                "duplicate key value violates unique constraint",
            )),
            Some((_, Flake::StoreUnavailable)) => Err(WriteError::StoreUnavailable(
                "pool timed out while waiting for an open connection".into(),
            )),
            None => self.inner.upsert(target, key, fields, payload).await,
        }
    }
}

/// Names seen by a handler, for asserting which records reached `persist`.
#[derive(Default)]
pub struct RecordingHandler {
    persisted: Mutex<Vec<String>>,
    skip: HashSet<String>,
}

impl RecordingHandler {
    pub fn persisted(&self) -> Vec<String> {
        self.persisted.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Report no entity name for records named `name`.
    pub fn without_name_for(mut self, name: &str) -> Self {
        self.skip.insert(name.to_string());
        self
    }
}

#[async_trait]
impl RecordHandler for RecordingHandler {
    fn entity_name(&self, record: &SourceRecord) -> Option<String> {
        record.text("name").filter(|n| !self.skip.contains(n))
    }

    async fn persist(
        &self,
        entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        self.persisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.text("name").unwrap_or_default());
        PriceHandler.persist(entity, record, writer).await
    }
}
