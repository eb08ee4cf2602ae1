use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use gridmark_pipeline::{
    EntityId, FetchError, Fields, NaturalKey, Page, PersistedId, RecordHandler, SourceFetcher,
    SourceRecord, UpsertTarget, UpsertWriter, WriteError,
};
use serde::Serialize;
use vast_client::{VastClient, VastOffer, DEFAULT_SEARCH_LIMIT};

use crate::clients::{vast_fetch_error, OfferSearch};

pub const SOURCE_NAME: &str = "vast";

pub const VAST_SYSTEM: UpsertTarget = UpsertTarget::new("gpu_vast_system", &["vast_system_id"]);
pub const VAST_OFFER: UpsertTarget = UpsertTarget::new("gpu_vast_offer", &["offer_id"]);
pub const VAST_SYSTEM_UPDATE: UpsertTarget = UpsertTarget::new(
    "gpu_vast_system_update",
    &["gpu_vast_system_id", "latest_offer_id"],
);

// ---------------------------------------------------------------------------
// Price statistics
// ---------------------------------------------------------------------------

/// Hourly price spread for one GPU model across all fetched offers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GpuPriceStats {
    pub total_offers: u64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_price: Option<f64>,
    #[serde(skip)]
    priced: u64,
    #[serde(skip)]
    sum: f64,
}

impl GpuPriceStats {
    fn new() -> Self {
        Self {
            total_offers: 0,
            min_price: None,
            max_price: None,
            avg_price: None,
            priced: 0,
            sum: 0.0,
        }
    }

    fn observe(&mut self, price: Option<f64>) {
        self.total_offers += 1;
        let Some(price) = price.filter(|p| p.is_finite()) else {
            return;
        };
        self.priced += 1;
        self.sum += price;
        self.min_price = Some(self.min_price.map_or(price, |m| m.min(price)));
        self.max_price = Some(self.max_price.map_or(price, |m| m.max(price)));
        self.avg_price = Some(self.sum / self.priced as f64);
    }
}

/// Per-GPU `dph_total` statistics keyed by the raw marketplace name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PriceStats(BTreeMap<String, GpuPriceStats>);

impl PriceStats {
    pub fn observe(&mut self, gpu_name: &str, dph_total: Option<f64>) {
        self.0
            .entry(gpu_name.to_string())
            .or_insert_with(GpuPriceStats::new)
            .observe(dph_total);
    }

    pub fn get(&self, gpu_name: &str) -> Option<&GpuPriceStats> {
        self.0.get(gpu_name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// All rentable asks in one request. Page 0 carries every offer and the
/// total; any later page is empty.
pub struct VastOfferFetcher<S = VastClient> {
    search: S,
    limit: u32,
    stats: Mutex<PriceStats>,
}

impl<S: OfferSearch> VastOfferFetcher<S> {
    pub fn new(search: S) -> Self {
        Self {
            search,
            limit: DEFAULT_SEARCH_LIMIT,
            stats: Mutex::new(PriceStats::default()),
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Statistics over every offer fetched so far.
    pub fn stats(&self) -> PriceStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl<S: OfferSearch> SourceFetcher for VastOfferFetcher<S> {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn max_page_size(&self) -> usize {
        self.limit as usize
    }

    async fn fetch_page(&self, page_index: usize, _page_size: usize) -> Result<Page, FetchError> {
        if page_index > 0 {
            return Ok(Page::empty());
        }

        let offers = self
            .search
            .search_asks(self.limit)
            .await
            .map_err(vast_fetch_error)?;

        {
            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
            for offer in &offers {
                if let Some(name) = offer.get("gpu_name").and_then(|v| v.as_str()) {
                    stats.observe(name, offer.get("dph_total").and_then(|v| v.as_f64()));
                }
            }
        }

        let total = offers.len() as u64;
        tracing::info!(offers = total, "Fetched Vast.ai marketplace");
        Ok(Page::new(offers.into_iter().map(SourceRecord::new).collect()).with_total(total))
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Persists an offer as machine, offer and machine-state rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct VastOfferHandler;

fn parse_offer(record: &SourceRecord) -> Result<VastOffer, WriteError> {
    serde_json::from_value(record.raw().clone()).map_err(|e| {
        WriteError::write_failed(
            VAST_SYSTEM.table,
            record.text("machine_id").unwrap_or_default(),
            format!("malformed offer: {e}"),
        )
    })
}

#[async_trait]
impl RecordHandler for VastOfferHandler {
    fn entity_name(&self, record: &SourceRecord) -> Option<String> {
        record.text("gpu_name")
    }

    fn context(&self, record: &SourceRecord) -> String {
        format!(
            "machine_id={} offer={}",
            record.text("machine_id").unwrap_or_default(),
            record.text("id").unwrap_or_default()
        )
    }

    async fn persist(
        &self,
        entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        let offer = parse_offer(record)?;
        let payload = record.raw();

        let system_id = writer
            .upsert(
                &VAST_SYSTEM,
                &NaturalKey::new().with("vast_system_id", offer.machine_id),
                &system_fields(entity, &offer),
                payload,
            )
            .await?;

        let offer_id = writer
            .upsert(
                &VAST_OFFER,
                &NaturalKey::new().with("offer_id", offer.id),
                &Fields::new()
                    .with("offer_url", offer.url.clone())
                    .with("offer_url_id", offer.url_id()),
                payload,
            )
            .await?;

        writer
            .upsert(
                &VAST_SYSTEM_UPDATE,
                &NaturalKey::new()
                    .with("gpu_vast_system_id", system_id)
                    .with("latest_offer_id", offer_id),
                &update_fields(&offer),
                payload,
            )
            .await
    }
}

fn system_fields(entity: EntityId, offer: &VastOffer) -> Fields {
    Fields::new()
        .with("gpu_id", entity)
        .with("name", offer.hostname.clone())
        .with("num_gpus", offer.num_gpus)
        .with("memory", offer.gpu_ram)
        .with("cpu_name", offer.cpu_name.clone())
        .with("cpu_cores", offer.cpu_cores)
        .with("cpu_speed_ghz", offer.cpu_ghz)
        .with("cuda_version", offer.cuda_max_good.clone())
        .with("driver_version", offer.driver_version.clone())
        .with("geolocation", offer.geolocation.clone())
        .with("geolocode", offer.geolocode)
        .with("pci_gen", offer.pci_gen)
        .with("vms_enabled", offer.vms_enabled)
        .with("mobo_name", offer.motherboard())
}

fn update_fields(offer: &VastOffer) -> Fields {
    Fields::new()
        .with("reliability", offer.reliability)
        .with("score", offer.score)
        .with("disk_space", offer.storage_total)
        .with("inet_up", offer.inet_up)
        .with("inet_up_cost", offer.inet_up_cost)
        .with("inet_down", offer.inet_down)
        .with("inet_down_cost", offer.inet_down_cost)
        .with("is_bid", offer.is_bid)
        .with("min_bid", offer.min_bid)
        .with("storage_cost", offer.storage_cost)
        .with("storage_total_cost", offer.storage_total_cost())
        .with("total_flops", offer.dlperf)
        .with("cost_per_hour", offer.dph_total)
        .with("disk_per_hour", offer.storage_cost)
        .with("time_remaining", offer.duration.clone())
        .with("time_remaining_isbid", offer.duration.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_min_max_avg_per_gpu() {
        let mut stats = PriceStats::default();
        stats.observe("RTX 4090", Some(0.40));
        stats.observe("RTX 4090", Some(0.20));
        stats.observe("RTX 4090", None);
        stats.observe("H100 SXM", Some(2.5));

        let rtx = stats.get("RTX 4090").unwrap();
        assert_eq!(rtx.total_offers, 3);
        assert_eq!(rtx.min_price, Some(0.20));
        assert_eq!(rtx.max_price, Some(0.40));
        assert!((rtx.avg_price.unwrap() - 0.30).abs() < 1e-9);
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn stats_serialize_as_a_map_of_gpu_names() {
        let mut stats = PriceStats::default();
        stats.observe("A100", Some(1.0));
        let value = serde_json::to_value(&stats).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "A100": {"total_offers": 1, "min_price": 1.0, "max_price": 1.0, "avg_price": 1.0}
            })
        );
    }

    #[test]
    fn offer_without_machine_id_is_a_write_failure() {
        let record = SourceRecord::new(serde_json::json!({"id": 1, "gpu_name": "A100"}));
        assert!(matches!(
            parse_offer(&record),
            Err(WriteError::WriteFailed { .. })
        ));
    }
}
