use std::fmt;

use serde::{Deserialize, Serialize};

/// Id of a canonical entity in the registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of the destination row an upsert touched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct PersistedId(pub i64);

impl fmt::Display for PersistedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row returned by a fetcher. Fields belong to the external source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(serde_json::Value);

impl SourceRecord {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_raw(self) -> serde_json::Value {
        self.0
    }

    /// String field, or a number rendered as a string.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Compact JSON, cut to `max_chars`, for log lines.
    pub fn fragment(&self, max_chars: usize) -> String {
        let full = self.0.to_string();
        if full.chars().count() <= max_chars {
            return full;
        }
        let head: String = full.chars().take(max_chars).collect();
        format!("{head}…")
    }
}

impl From<serde_json::Value> for SourceRecord {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// One page of fetcher output. An empty `records` list means the source is exhausted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<SourceRecord>,
    /// Total records the source reports for the whole query, when it reports one.
    pub total_count: Option<u64>,
}

impl Page {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records,
            total_count: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total_count = Some(total);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Whether a fetcher talks to a first-party API or scrapes someone's site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Api,
    Scrape,
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionSummary {
    pub total_seen: u64,
    pub resolved: u64,
    pub unresolved: u64,
    pub written: u64,
    pub errors: u64,
    pub duration_ms: u64,
}

impl fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seen={} resolved={} unresolved={} written={} errors={} duration={}ms",
            self.total_seen,
            self.resolved,
            self.unresolved,
            self.written,
            self.errors,
            self.duration_ms
        )
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "cause", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Fatal(String),
}

impl RunOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunOutcome::Fatal(_))
    }
}

/// Result of a driver run. The summary is present whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub source: String,
    pub pages_fetched: u64,
    pub summary: IngestionSummary,
    pub outcome: RunOutcome,
}
