//! EIA operating-generator capacity. This feed creates the utilities and
//! power plants that generation rows are later matched against, so its
//! records are registered rather than resolved.

use async_trait::async_trait;
use eia_client::{EiaClient, GeneratorCapacityRow, MAX_PAGE_LENGTH};
use gridmark_pipeline::{
    EntityId, FetchError, Fields, NaturalKey, Page, PersistedId, RecordHandler, SourceFetcher,
    SourceRecord, UpsertTarget, UpsertWriter, WriteError,
};

use crate::clients::{eia_fetch_error, CapacitySource};

pub const SOURCE_NAME: &str = "eia-capacity";

pub const EIA_ENTITIES: UpsertTarget = UpsertTarget::new("eia_entities", &["api_entity_id"]);
pub const POWER_PLANTS: UpsertTarget = UpsertTarget::new("eia_power_plants", &["api_plant_id"]);
pub const PLANT_CAPACITY: UpsertTarget = UpsertTarget::new(
    "eia_plant_capacity",
    &["plant_id", "generator_id", "data_period"],
);

/// Monthly generator rows, `offset = page * size`.
pub struct EiaCapacityFetcher<S = EiaClient> {
    source: S,
}

impl<S: CapacitySource> EiaCapacityFetcher<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

#[async_trait]
impl<S: CapacitySource> SourceFetcher for EiaCapacityFetcher<S> {
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
            .operating_capacity_page(offset, page_size)
            .await
            .map_err(eia_fetch_error)?;

        tracing::info!(
            page = page_index,
            offset,
            rows = page.data.len(),
            total = ?page.total,
            "Fetched EIA capacity page"
        );

        let records = page.data.into_iter().map(SourceRecord::new).collect();
        Ok(match page.total {
            Some(total) => Page::new(records).with_total(total),
            None => Page::new(records),
        })
    }
}

/// Upserts the utility, the plant and one capacity row per generator and month.
#[derive(Debug, Default, Clone, Copy)]
pub struct EiaCapacityHandler;

fn parse_row(record: &SourceRecord) -> Result<GeneratorCapacityRow, WriteError> {
    serde_json::from_value(record.raw().clone()).map_err(|e| {
        WriteError::write_failed(
            POWER_PLANTS.table,
            record.text("plantid").unwrap_or_default(),
            format!("malformed capacity row: {e}"),
        )
    })
}

impl EiaCapacityHandler {
    async fn write(
        &self,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        let row = parse_row(record)?;
        let payload = record.raw();

        let utility = match row.entity_id.as_deref() {
            Some(api_entity_id) => {
                let name = row.entity_name.as_deref().unwrap_or(api_entity_id);
                let id = writer
                    .upsert(
                        &EIA_ENTITIES,
                        &NaturalKey::new().with("api_entity_id", api_entity_id),
                        &Fields::new().with("name", name),
                        payload,
                    )
                    .await?;
                Some(id)
            }
            None => None,
        };

        let plant_id = writer
            .upsert(
                &POWER_PLANTS,
                &NaturalKey::new().with("api_plant_id", row.plant_id.clone()),
                &plant_fields(&row, utility),
                payload,
            )
            .await?;

        let key = NaturalKey::new()
            .with("plant_id", plant_id)
            .with("generator_id", row.generatorid.clone())
            .with("data_period", row.period.clone());
        writer
            .upsert(&PLANT_CAPACITY, &key, &capacity_fields(&row), payload)
            .await
    }
}

#[async_trait]
impl RecordHandler for EiaCapacityHandler {
    fn entity_name(&self, record: &SourceRecord) -> Option<String> {
        record.text("plantid")
    }

    fn context(&self, record: &SourceRecord) -> String {
        format!(
            "plant={} generator={} period={}",
            record.text("plantid").unwrap_or_default(),
            record.text("generatorid").unwrap_or_default(),
            record.text("period").unwrap_or_default()
        )
    }

    async fn persist(
        &self,
        _entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        self.write(record, writer).await
    }

    async fn register(
        &self,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Option<Result<PersistedId, WriteError>> {
        Some(self.write(record, writer).await)
    }
}

fn plant_fields(row: &GeneratorCapacityRow, utility: Option<PersistedId>) -> Fields {
    // A row without a plant name still gets a matchable name.
    let name = row
        .plant_name
        .clone()
        .or_else(|| row.plant_id.clone())
        .unwrap_or_default();
    Fields::new()
        .with("name", name)
        .with("state", row.state())
        .with("county", row.county.clone())
        .with("latitude", row.measure("latitude"))
        .with("longitude", row.measure("longitude"))
        .with("operating_status", row.operating_status())
        .with("entity_id", utility)
}

fn capacity_fields(row: &GeneratorCapacityRow) -> Fields {
    Fields::new()
        .with("fuel_type", row.fuel_type())
        .with("prime_mover", row.prime_mover.clone())
        .with("nameplate_capacity_mw", row.measure("nameplate-capacity-mw"))
        .with("net_summer_capacity_mw", row.measure("net-summer-capacity-mw"))
        .with("net_winter_capacity_mw", row.measure("net-winter-capacity-mw"))
        .with("operating_year_month", row.month("operating-year-month"))
        .with("source_timestamp", row.period_start())
}
