use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::error::FetchError;
use crate::traits::SourceFetcher;
use crate::types::{Page, SourceKind, SourceRecord};

#[derive(Serialize)]
struct ArchiveLine<'a> {
    source: &'a str,
    page: usize,
    fetched_at: String,
    record: &'a SourceRecord,
}

/// Wraps a fetcher and appends every fetched record to a JSONL file.
///
/// Archive failures are logged and never change what the fetch returns.
pub struct ArchivingFetcher<F> {
    inner: F,
    path: Option<PathBuf>,
    lock: tokio::sync::Mutex<()>,
}

impl<F: SourceFetcher> ArchivingFetcher<F> {
    /// Truncates `path`. If it cannot be created, archiving is disabled for the run.
    pub async fn create(inner: F, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let ready = async {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, b"").await
        }
        .await;

        let path = match ready {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(
                    source = inner.name(),
                    path = %path.display(),
                    error = %e,
                    "Raw page archive disabled"
                );
                None
            }
        };

        Self {
            inner,
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    async fn append(&self, path: &Path, page_index: usize, page: &Page) -> std::io::Result<()> {
        let fetched_at = Utc::now().to_rfc3339();
        let mut buf = String::new();
        for record in &page.records {
            let line = ArchiveLine {
                source: self.inner.name(),
                page: page_index,
                fetched_at: fetched_at.clone(),
                record,
            };
            buf.push_str(&serde_json::to_string(&line)?);
            buf.push('\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl<F: SourceFetcher> SourceFetcher for ArchivingFetcher<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> SourceKind {
        self.inner.kind()
    }

    fn max_page_size(&self) -> usize {
        self.inner.max_page_size()
    }

    async fn fetch_page(&self, page_index: usize, page_size: usize) -> Result<Page, FetchError> {
        let page = self.inner.fetch_page(page_index, page_size).await?;

        if let Some(path) = &self.path {
            if !page.records.is_empty() {
                if let Err(e) = self.append(path, page_index, &page).await {
                    tracing::warn!(
                        source = self.inner.name(),
                        page = page_index,
                        error = %e,
                        "Failed to archive raw page"
                    );
                }
            }
        }

        Ok(page)
    }
}
