//! Wires one source, its registry and a writer into a driver run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use browserless_client::BrowserlessClient;
use eia_client::EiaClient;
use gridmark_common::{AppConfig, FileConfig, GridmarkError};
use gridmark_pipeline::{
    ArchivingFetcher, CanonicalRegistry, Driver, DriverConfig, FileUnresolvedLog,
    IngestionReport, MemoryUpsertWriter, PgUpsertWriter, RecordHandler, Resolver, SourceFetcher,
    UpsertWriter,
};
use gridmark_sources::{
    EiaCapacityFetcher, EiaCapacityHandler, EiaGenerationFetcher, EiaGenerationHandler, PricingHandler, PricingPageFetcher,
    VastOfferFetcher, VastOfferHandler,
};
use vast_client::VastClient;

use crate::{connect, load_resolver, RegistryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum SourceArg {
    Vast,
    EiaCapacity,
    EiaGeneration,
    Pricing,
}

impl SourceArg {
    /// Registry the source resolves against. Capacity rows build the plant
    /// registry instead of reading it.
    fn registry_kind(self) -> Option<RegistryKind> {
        match self {
            Self::Vast | Self::Pricing => Some(RegistryKind::Gpu),
            Self::EiaGeneration => Some(RegistryKind::Plant),
            Self::EiaCapacity => None,
        }
    }
}

pub(crate) struct IngestOptions {
    pub source: SourceArg,
    pub platform: Option<String>,
    pub dry_run: bool,
    pub registry: Option<PathBuf>,
    pub limit: Option<u64>,
}

/// Everything a run needs besides the source itself.
struct Sinks {
    resolver: Resolver,
    writer: Arc<dyn UpsertWriter>,
    config: DriverConfig,
    data_dir: PathBuf,
    cancel: CancellationToken,
}

pub(crate) async fn run(
    app: &AppConfig,
    file: &FileConfig,
    options: IngestOptions,
    cancel: CancellationToken,
) -> Result<IngestionReport> {
    let pool = if options.dry_run {
        info!("Dry run, writes go to an in-memory store");
        None
    } else {
        Some(connect(app).await?)
    };

    let resolver = match options.source.registry_kind() {
        Some(kind) => {
            load_resolver(app, kind, options.registry.as_deref(), pool.as_ref()).await?
        }
        None => Resolver::new(Arc::new(CanonicalRegistry::new(Vec::new()))),
    };

    let sinks = Sinks {
        resolver,
        writer: writer_for(pool.as_ref()),
        config: driver_config(file, options.limit),
        data_dir: app.data_dir.clone(),
        cancel,
    };

    let report = match options.source {
        SourceArg::Vast => {
            let fetcher = Arc::new(
                VastOfferFetcher::new(VastClient::new())
                    .with_limit(vast_search_limit(file.vast.search_limit, options.limit)),
            );
            let report = drive(fetcher.clone(), VastOfferHandler, &sinks).await?;

            let stats = fetcher.stats();
            let stats_path = sinks.data_dir.join("vast_stats.json");
            match stats.write_json(&stats_path) {
                Ok(()) => info!(gpus = stats.len(), path = %stats_path.display(), "Price statistics written"),
                Err(e) => warn!(error = %e, path = %stats_path.display(), "Failed to write price statistics"),
            }
            report
        }

        SourceArg::EiaCapacity | SourceArg::EiaGeneration => {
            let client = EiaClient::new(app.require_eia_key()?.to_string());
            let config = DriverConfig {
                page_size: file.eia.page_size,
                ..sinks.config.clone()
            };
            let sinks = Sinks { config, ..sinks };
            if options.source == SourceArg::EiaCapacity {
                drive(EiaCapacityFetcher::new(client), EiaCapacityHandler, &sinks).await?
            } else {
                drive(EiaGenerationFetcher::new(client), EiaGenerationHandler, &sinks).await?
            }
        }

        SourceArg::Pricing => {
            let name = options
                .platform
                .ok_or_else(|| GridmarkError::Config("--platform is required for pricing".into()))?;
            let platform = file
                .pricing
                .get(&name)
                .cloned()
                .ok_or_else(|| GridmarkError::UnknownPlatform(name.clone()))?;
            let renderer = BrowserlessClient::new(
                app.require_browserless_url()?,
                app.browserless_token.as_deref(),
            )?;
            let fetcher = PricingPageFetcher::new(&name, platform, renderer)?;
            drive(fetcher, PricingHandler, &sinks).await?
        }
    };

    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(report)
}

async fn drive<F, H>(fetcher: F, handler: H, sinks: &Sinks) -> Result<IngestionReport>
where
    F: SourceFetcher,
    H: RecordHandler,
{
    let source = fetcher.name().to_string();
    let archive = ArchivingFetcher::create(
        fetcher,
        sinks.data_dir.join("raw").join(format!("{source}_pages.jsonl")),
    )
    .await;

    let unresolved_path = sinks.data_dir.join("unresolved").join(format!("{source}.csv"));
    let unresolved = FileUnresolvedLog::open(unresolved_path.clone(), true)
        .await
        .with_context(|| format!("Failed to open {}", unresolved_path.display()))?;

    info!(source = %source, "Starting ingestion");
    let driver = Driver::new(
        archive,
        handler,
        sinks.resolver.clone(),
        sinks.writer.clone(),
        unresolved,
        sinks.config.clone(),
    )
    .with_cancellation(sinks.cancel.clone());

    Ok(driver.run().await)
}

fn writer_for(pool: Option<&PgPool>) -> Arc<dyn UpsertWriter> {
    match pool {
        Some(pool) => Arc::new(PgUpsertWriter::new(pool.clone())),
        None => Arc::new(MemoryUpsertWriter::new()),
    }
}

/// Offers requested from Vast: the configured limit, lowered by `--limit`.
fn vast_search_limit(configured: u32, limit: Option<u64>) -> u32 {
    match limit {
        Some(limit) => u32::try_from(limit).unwrap_or(u32::MAX).min(configured),
        None => configured,
    }
}

fn driver_config(file: &FileConfig, limit: Option<u64>) -> DriverConfig {
    let settings = &file.driver;
    let mut config = DriverConfig::builder()
        .fetch_attempts(settings.fetch_attempts.max(1))
        .retry_delay(Duration::from_millis(settings.retry_delay_ms))
        .courtesy_delay(Duration::from_millis(settings.courtesy_delay_ms))
        .build();
    config.record_budget = limit;
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_limit_lowers_the_vast_request_limit() {
        assert_eq!(vast_search_limit(64, None), 64);
        assert_eq!(vast_search_limit(64, Some(5)), 5);
        assert_eq!(vast_search_limit(64, Some(500)), 64);
        assert_eq!(vast_search_limit(64, Some(u64::MAX)), 64);
    }

    #[test]
    fn capacity_runs_without_a_registry() {
        assert_eq!(SourceArg::EiaCapacity.registry_kind(), None);
        assert_eq!(SourceArg::EiaGeneration.registry_kind(), Some(RegistryKind::Plant));
    }
}
