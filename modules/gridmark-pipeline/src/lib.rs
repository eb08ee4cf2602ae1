//! Entity-resolution and ingestion pipeline.
//!
//! A [`Driver`] pages through a [`SourceFetcher`], resolves each record's
//! free-text entity name against a read-only [`CanonicalRegistry`] and hands
//! resolved records to a [`RecordHandler`], which persists them through an
//! idempotent [`UpsertWriter`]. Names that resolve to nothing are appended to
//! an [`UnresolvedLog`] for offline triage.

pub mod archive;
pub mod driver;
pub mod error;
pub mod migrate;
pub mod registry;
pub mod resolver;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod types;
pub mod unresolved;
pub mod writer;

pub use archive::ArchivingFetcher;
pub use driver::{Driver, DriverConfig, DriverState};
pub use error::{FetchError, PipelineError, WriteError};
pub use migrate::run_migrations;
pub use registry::{plant_alias, CanonicalEntity, CanonicalRegistry, RegistryFileError};
pub use resolver::{MatchTier, Resolution, Resolver};
pub use traits::{RecordHandler, SourceFetcher, UnresolvedLog, UpsertWriter};
pub use types::{
    EntityId, IngestionReport, IngestionSummary, Page, PersistedId, RunOutcome, SourceKind,
    SourceRecord,
};
pub use unresolved::{FileUnresolvedLog, MemoryUnresolvedLog, UnresolvedName};
pub use writer::{
    build_upsert_sql, Columns, FieldValue, Fields, MemoryUpsertWriter, NaturalKey, PgUpsertWriter,
    StoredRow, UpsertStatement, UpsertTarget,
};
