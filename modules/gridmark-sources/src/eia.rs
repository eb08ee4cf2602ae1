use async_trait::async_trait;
use eia_client::{EiaClient, FacilityFuelRow, FACILITY_FUEL_MEASURES, MAX_PAGE_LENGTH};
use gridmark_pipeline::{
    plant_alias, EntityId, FetchError, Fields, NaturalKey, Page, PersistedId, RecordHandler,
    SourceFetcher, SourceRecord, UpsertTarget, UpsertWriter, WriteError,
};

use crate::clients::{eia_fetch_error, GenerationSource};

pub const SOURCE_NAME: &str = "eia-generation";

pub const PLANT_GENERATION: UpsertTarget = UpsertTarget::new(
    "eia_plant_generation",
    &["plant_id", "period", "fuel_type", "prime_mover"],
);

/// Monthly facility-fuel rows, `offset = page * size`.
pub struct EiaGenerationFetcher<S = EiaClient> {
    source: S,
}

impl<S: GenerationSource> EiaGenerationFetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: GenerationSource> SourceFetcher for EiaGenerationFetcher<S> {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn max_page_size(&self) -> usize {
        MAX_PAGE_LENGTH
    }

    async fn fetch_page(&self, page_index: usize, page_size: usize) -> Result<Page, FetchError> {
        let offset = page_index * page_size;
        let page = self
            .source
            .facility_fuel_page(offset, page_size)
            .await
            .map_err(eia_fetch_error)?;

        tracing::info!(
            page = page_index,
            offset,
            rows = page.data.len(),
            total = ?page.total,
            "Fetched EIA generation page"
        );

        let records = page.data.into_iter().map(SourceRecord::new).collect();
        Ok(match page.total {
            Some(total) => Page::new(records).with_total(total),
            None => Page::new(records),
        })
    }
}

/// Writes one `eia_plant_generation` row per plant, period, fuel and prime mover.
#[derive(Debug, Default, Clone, Copy)]
pub struct EiaGenerationHandler;

fn parse_row(record: &SourceRecord) -> Result<FacilityFuelRow, WriteError> {
    serde_json::from_value(record.raw().clone()).map_err(|e| {
        WriteError::write_failed(
            PLANT_GENERATION.table,
            record.text("plantCode").unwrap_or_default(),
            format!("malformed facility-fuel row: {e}"),
        )
    })
}

#[async_trait]
impl RecordHandler for EiaGenerationHandler {
    /// Plant code when present, else `"<plant name> (<state>)"`.
    fn entity_name(&self, record: &SourceRecord) -> Option<String> {
        self.entity_names(record).into_iter().next()
    }

    /// Plant code first, then `"<plant name> (<state>)"` for rows whose code
    /// is missing or unknown to the registry.
    fn entity_names(&self, record: &SourceRecord) -> Vec<String> {
        let code = record.text("plantCode").filter(|c| !c.trim().is_empty());
        let alias = record.text("plantName").map(|name| {
            let state = record.text("stateCode").or_else(|| record.text("state"));
            plant_alias(&name, state.as_deref())
        });
        code.into_iter().chain(alias).collect()
    }

    fn context(&self, record: &SourceRecord) -> String {
        format!(
            "period={} fuel={} prime_mover={}",
            record.text("period").unwrap_or_default(),
            record.text("fuel2002").unwrap_or_default(),
            record.text("primeMover").unwrap_or_default()
        )
    }

    async fn persist(
        &self,
        entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        let row = parse_row(record)?;

        let key = NaturalKey::new()
            .with("plant_id", entity)
            .with("period", row.period.clone())
            .with("fuel_type", row.fuel_type.clone())
            .with("prime_mover", row.prime_mover.clone());

        writer
            .upsert(&PLANT_GENERATION, &key, &generation_fields(&row), record.raw())
            .await
    }
}

fn generation_fields(row: &FacilityFuelRow) -> Fields {
    let mut fields = Fields::new();
    for measure in FACILITY_FUEL_MEASURES {
        let column = measure.replace('-', "_");
        fields.push(&column, row.measure(measure));
        fields.push(&format!("{column}_units"), row.units(measure));
    }
    fields.push("source_timestamp", row.period_start());
    fields
}
