use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::traits::UnresolvedLog;

const COLUMNS: [&str; 4] = ["timestamp", "source", "context", "raw_name"];

/// A name that matched no canonical entity. Serializes as one CSV row in
/// `timestamp,source,context,raw_name` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedName {
    #[serde(rename = "timestamp")]
    pub first_seen: DateTime<Utc>,
    pub source: String,
    pub context: String,
    pub raw_name: String,
}

impl UnresolvedName {
    pub fn new(raw_name: impl Into<String>, source: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            first_seen: Utc::now(),
            source: source.into(),
            context: context.into(),
            raw_name: raw_name.into(),
        }
    }
}

fn header_bytes() -> std::io::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    writer.into_inner().map_err(|e| e.into_error())
}

fn row_bytes(entry: &UnresolvedName) -> std::io::Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(entry)?;
    writer.into_inner().map_err(|e| e.into_error())
}

/// CSV log for manual triage.
pub struct FileUnresolvedLog {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileUnresolvedLog {
    /// Open the log, truncating it and writing the header when `reset` is set
    /// or the file does not exist yet.
    pub async fn open(path: impl Into<PathBuf>, reset: bool) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        if reset || !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, header_bytes()?).await?;
        }
        Ok(Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, entry: &UnresolvedName) -> std::io::Result<()> {
        let row = row_bytes(entry)?;
        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(&row).await?;
        file.flush().await
    }
}

#[async_trait]
impl UnresolvedLog for FileUnresolvedLog {
    async fn record(&self, entry: &UnresolvedName) {
        if let Err(e) = self.append(entry).await {
            tracing::warn!(
                path = %self.path.display(),
                raw_name = %entry.raw_name,
                error = %e,
                "Failed to append to unresolved-name log"
            );
        }
    }
}

/// Keeps entries in memory.
#[derive(Default)]
pub struct MemoryUnresolvedLog {
    entries: Mutex<Vec<UnresolvedName>>,
}

impl MemoryUnresolvedLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<UnresolvedName> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn raw_names(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.raw_name).collect()
    }
}

#[async_trait]
impl UnresolvedLog for MemoryUnresolvedLog {
    async fn record(&self, entry: &UnresolvedName) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
    }
}
