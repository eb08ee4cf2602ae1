use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{FetchError, WriteError};
use crate::types::{EntityId, Page, PersistedId, SourceKind, SourceRecord};
use crate::unresolved::UnresolvedName;
use crate::writer::{Fields, NaturalKey, UpsertTarget};

/// Retrieves one page of records from an external source.
///
/// Exhaustion is signalled with an empty page, never with an error.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Short identifier used in logs, the unresolved log and archive lines.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind {
        SourceKind::Api
    }

    /// Largest page size the source accepts.
    fn max_page_size(&self) -> usize;

    async fn fetch_page(&self, page_index: usize, page_size: usize) -> Result<Page, FetchError>;
}

/// Source-specific knowledge of what a record means and where it goes.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    /// Free-text entity name to resolve. `None` when the record carries none.
    fn entity_name(&self, record: &SourceRecord) -> Option<String>;

    /// Names to try in order; the first one that resolves wins. Defaults to
    /// the single `entity_name`.
    fn entity_names(&self, record: &SourceRecord) -> Vec<String> {
        self.entity_name(record).into_iter().collect()
    }

    /// Short identifying context for logs (`machine_id=… offer=…`).
    fn context(&self, _record: &SourceRecord) -> String {
        String::new()
    }

    /// Persist a resolved record. May issue several upserts; returns the id
    /// of the row that represents the record.
    async fn persist(
        &self,
        entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError>;

    /// Write a record that creates canonical entities instead of resolving
    /// to one. Registry feeds return `Some`; the default `None` sends the
    /// record through the resolver and `persist`.
    async fn register(
        &self,
        _record: &SourceRecord,
        _writer: &dyn UpsertWriter,
    ) -> Option<Result<PersistedId, WriteError>> {
        None
    }
}

/// Idempotent insert-or-update keyed by a natural key.
#[async_trait]
pub trait UpsertWriter: Send + Sync {
    /// Write one row. `payload` is the unmodified source record, stored alongside
    /// the structured columns when the target declares a payload column.
    async fn upsert(
        &self,
        target: &UpsertTarget,
        key: &NaturalKey,
        fields: &Fields,
        payload: &serde_json::Value,
    ) -> Result<PersistedId, WriteError>;
}

/// Append-only sink for names that matched nothing. Best-effort.
#[async_trait]
pub trait UnresolvedLog: Send + Sync {
    async fn record(&self, entry: &UnresolvedName);
}

#[async_trait]
impl<T: SourceFetcher + ?Sized> SourceFetcher for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> SourceKind {
        (**self).kind()
    }

    fn max_page_size(&self) -> usize {
        (**self).max_page_size()
    }

    async fn fetch_page(&self, page_index: usize, page_size: usize) -> Result<Page, FetchError> {
        (**self).fetch_page(page_index, page_size).await
    }
}

#[async_trait]
impl<T: RecordHandler + ?Sized> RecordHandler for Arc<T> {
    fn entity_name(&self, record: &SourceRecord) -> Option<String> {
        (**self).entity_name(record)
    }

    fn entity_names(&self, record: &SourceRecord) -> Vec<String> {
        (**self).entity_names(record)
    }

    fn context(&self, record: &SourceRecord) -> String {
        (**self).context(record)
    }

    async fn persist(
        &self,
        entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        (**self).persist(entity, record, writer).await
    }

    async fn register(
        &self,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Option<Result<PersistedId, WriteError>> {
        (**self).register(record, writer).await
    }
}

#[async_trait]
impl<T: UpsertWriter + ?Sized> UpsertWriter for Arc<T> {
    async fn upsert(
        &self,
        target: &UpsertTarget,
        key: &NaturalKey,
        fields: &Fields,
        payload: &serde_json::Value,
    ) -> Result<PersistedId, WriteError> {
        (**self).upsert(target, key, fields, payload).await
    }
}

#[async_trait]
impl<T: UnresolvedLog + ?Sized> UnresolvedLog for Arc<T> {
    async fn record(&self, entry: &UnresolvedName) {
        (**self).record(entry).await
    }
}
