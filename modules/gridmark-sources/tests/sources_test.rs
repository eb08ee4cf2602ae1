//! Sources driven end to end against scripted upstreams and in-memory stores.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessError, ContentRequest};
use eia_client::{DataPage, EiaError};
use gridmark_common::PricingPlatform;
use gridmark_pipeline::{
    plant_alias, CanonicalEntity, CanonicalRegistry, Driver, DriverConfig, EntityId, FieldValue,
    MemoryUnresolvedLog, MemoryUpsertWriter, NaturalKey, Resolver, RunOutcome,
};
use gridmark_sources::capacity::{EIA_ENTITIES, PLANT_CAPACITY, POWER_PLANTS};
use gridmark_sources::eia::PLANT_GENERATION;
use gridmark_sources::pricing::PLATFORM_PRICING;
use gridmark_sources::vast::{VAST_OFFER, VAST_SYSTEM, VAST_SYSTEM_UPDATE};
use gridmark_sources::{
    CapacitySource, EiaCapacityFetcher, EiaCapacityHandler, EiaGenerationFetcher,
    EiaGenerationHandler, GenerationSource, OfferSearch, PageRenderer,
    PricingHandler, PricingPageFetcher, VastOfferFetcher, VastOfferHandler,
};
use serde_json::json;
use vast_client::VastError;

fn gpu_resolver() -> Resolver {
    Resolver::new(Arc::new(CanonicalRegistry::new(vec![
        CanonicalEntity {
            id: EntityId(1),
            name: "H100 SXM".into(),
            aliases: vec![],
        },
        CanonicalEntity {
            id: EntityId(2),
            name: "RTX 4090".into(),
            aliases: vec![],
        },
    ])))
}

fn config() -> DriverConfig {
    DriverConfig::builder()
        .retry_delay(Duration::ZERO)
        .courtesy_delay(Duration::ZERO)
        .build()
}

// ---------------------------------------------------------------------------
// Vast
// ---------------------------------------------------------------------------

struct FakeMarketplace {
    offers: Result<Vec<serde_json::Value>, ()>,
    calls: Mutex<u32>,
}

#[async_trait]
impl OfferSearch for FakeMarketplace {
    async fn search_asks(&self, _limit: u32) -> Result<Vec<serde_json::Value>, VastError> {
        *self.calls.lock().unwrap() += 1;
        self.offers.clone().map_err(|_| VastError::HtmlBody)
    }
}

fn offer(id: i64, machine_id: i64, gpu_name: &str, dph_total: f64) -> serde_json::Value {
    json!({
        "id": id,
        "machine_id": machine_id,
        "gpu_name": gpu_name,
        "num_gpus": 8,
        "gpu_ram": 81559,
        "hostname": "host-a",
        "cuda_max_good": 12.2,
        "url": format!("https://cloud.vast.ai/offers/{id}"),
        "storage_cost": 0.1,
        "storage_total": 200.0,
        "dph_total": dph_total
    })
}

#[tokio::test]
async fn vast_offer_writes_three_linked_rows() {
    let marketplace = FakeMarketplace {
        offers: Ok(vec![
            offer(1001, 77, "H100 SXM", 2.40),
            offer(1002, 78, "Quantum GPU", 9.0),
            offer(1003, 79, "RTX 4090", 0.35),
        ]),
        calls: Mutex::new(0),
    };
    let fetcher = Arc::new(VastOfferFetcher::new(marketplace));
    let writer = Arc::new(MemoryUpsertWriter::new());
    let log = Arc::new(MemoryUnresolvedLog::new());
    let driver = Driver::new(
        fetcher.clone(),
        VastOfferHandler,
        gpu_resolver(),
        writer.clone(),
        log.clone(),
        config(),
    );

    let report = driver.run().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.summary.total_seen, 3);
    assert_eq!(report.summary.written, 2);
    assert_eq!(report.summary.unresolved, 1);
    assert_eq!(log.raw_names(), vec!["Quantum GPU"]);
    assert_eq!(log.entries()[0].context, "machine_id=78 offer=1002");

    let system = writer
        .row(&VAST_SYSTEM, &NaturalKey::new().with("vast_system_id", 77))
        .unwrap();
    assert_eq!(system.fields.get("gpu_id"), Some(&FieldValue::Int(1)));
    assert_eq!(system.fields.get("cuda_version"), Some(&FieldValue::Text("12.2".into())));

    let offer_row = writer
        .row(&VAST_OFFER, &NaturalKey::new().with("offer_id", 1001))
        .unwrap();
    assert_eq!(offer_row.fields.get("offer_url_id"), Some(&FieldValue::Text("1001".into())));

    let update = writer
        .row(
            &VAST_SYSTEM_UPDATE,
            &NaturalKey::new()
                .with("gpu_vast_system_id", system.id)
                .with("latest_offer_id", offer_row.id),
        )
        .unwrap();
    assert_eq!(update.fields.get("cost_per_hour"), Some(&FieldValue::Float(2.40)));
    let FieldValue::Float(storage_total_cost) = update.fields.get("storage_total_cost").unwrap() else {
        panic!("storage_total_cost should be a float");
    };
    assert!((storage_total_cost - 20.0).abs() < 1e-9);

    let stats = fetcher.stats();
    assert_eq!(stats.len(), 3);
    assert_eq!(stats.get("Quantum GPU").unwrap().max_price, Some(9.0));
}

#[tokio::test]
async fn vast_html_error_page_is_fatal_after_one_retry() {
    let marketplace = Arc::new(FakeMarketplace {
        offers: Err(()),
        calls: Mutex::new(0),
    });

    struct Shared(Arc<FakeMarketplace>);

    #[async_trait]
    impl OfferSearch for Shared {
        async fn search_asks(&self, limit: u32) -> Result<Vec<serde_json::Value>, VastError> {
            self.0.search_asks(limit).await
        }
    }

    let driver = Driver::new(
        VastOfferFetcher::new(Shared(marketplace.clone())),
        VastOfferHandler,
        gpu_resolver(),
        MemoryUpsertWriter::new(),
        MemoryUnresolvedLog::new(),
        config(),
    );

    let report = driver.run().await;

    assert!(report.outcome.is_fatal());
    assert_eq!(*marketplace.calls.lock().unwrap(), 2);
    assert_eq!(report.summary.total_seen, 0);
}

// ---------------------------------------------------------------------------
// EIA
// ---------------------------------------------------------------------------

struct FakeEia {
    rows: Vec<serde_json::Value>,
    requests: Mutex<Vec<(usize, usize)>>,
}

#[async_trait]
impl GenerationSource for FakeEia {
    async fn facility_fuel_page(&self, offset: usize, length: usize) -> Result<DataPage, EiaError> {
        self.requests.lock().unwrap().push((offset, length));
        let data = self.rows.iter().skip(offset).take(length).cloned().collect();
        Ok(DataPage {
            total: Some(self.rows.len() as u64),
            data,
        })
    }
}

fn generation_row(plant: &str, fuel: Option<&str>, generation: &str) -> serde_json::Value {
    json!({
        "period": "2024-05",
        "plantCode": plant,
        "plantName": "Barry",
        "state": "AL",
        "fuel2002": fuel,
        "primeMover": "CT",
        "generation": generation,
        "generation-units": "megawatthours"
    })
}

fn plant_resolver() -> Resolver {
    Resolver::new(Arc::new(CanonicalRegistry::new(vec![CanonicalEntity {
        id: EntityId(40),
        name: "3".into(),
        aliases: vec!["Barry (AL)".into()],
    }])))
    .without_partial()
}

#[tokio::test]
async fn eia_pages_by_offset_until_total() {
    let mut gadsden = generation_row("998", Some("NG"), "5");
    gadsden["plantName"] = json!("Gadsden");

    let eia = Arc::new(FakeEia {
        rows: vec![
            generation_row("3", Some("NG"), "100.5"),
            generation_row("3", Some("BIT"), "200"),
            generation_row("3", None, "300"),
            generation_row("999", Some("NG"), "1"),
            generation_row("3", Some("NG"), "150.25"),
            gadsden,
        ],
        requests: Mutex::new(Vec::new()),
    });

    struct Shared(Arc<FakeEia>);

    #[async_trait]
    impl GenerationSource for Shared {
        async fn facility_fuel_page(&self, offset: usize, length: usize) -> Result<DataPage, EiaError> {
            self.0.facility_fuel_page(offset, length).await
        }
    }

    let writer = Arc::new(MemoryUpsertWriter::new());
    let driver = Driver::new(
        EiaGenerationFetcher::new(Shared(eia.clone())),
        EiaGenerationHandler,
        plant_resolver(),
        writer.clone(),
        MemoryUnresolvedLog::new(),
        DriverConfig::builder()
            .page_size(2)
            .retry_delay(Duration::ZERO)
            .build(),
    );

    let report = driver.run().await;

    assert_eq!(*eia.requests.lock().unwrap(), vec![(0, 2), (2, 2), (4, 2)]);
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.summary.total_seen, 6);
    // Unknown code "999" still matches Barry by name and state; Gadsden matches nothing.
    assert_eq!(report.summary.unresolved, 1);
    // The row without a fuel type has an incomplete key.
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.written, 4);

    // Same plant, period, fuel and prime mover: the later row wins.
    let rows = writer.rows(PLANT_GENERATION.table);
    assert_eq!(rows.len(), 2);
    let key = NaturalKey::new()
        .with("plant_id", 40)
        .with("period", "2024-05")
        .with("fuel_type", "NG")
        .with("prime_mover", "CT");
    let ng = writer.row(&PLANT_GENERATION, &key).unwrap();
    assert_eq!(ng.fields.get("generation"), Some(&FieldValue::Float(150.25)));
    assert_eq!(ng.writes, 3);
}

#[tokio::test]
async fn unknown_plant_code_falls_back_to_name_and_state() {
    let eia = FakeEia {
        rows: vec![json!({
            "period": "2024-05",
            "plantCode": "999",
            "plantName": "Barry",
            "stateCode": "AL",
            "fuel2002": "NG",
            "primeMover": "CT",
            "generation": "12"
        })],
        requests: Mutex::new(Vec::new()),
    };

    let writer = Arc::new(MemoryUpsertWriter::new());
    let unresolved = Arc::new(MemoryUnresolvedLog::new());
    let driver = Driver::new(
        EiaGenerationFetcher::new(eia),
        EiaGenerationHandler,
        plant_resolver(),
        writer.clone(),
        unresolved.clone(),
        config(),
    );

    let report = driver.run().await;

    assert_eq!(report.summary.resolved, 1);
    assert_eq!(report.summary.unresolved, 0);
    assert_eq!(report.summary.written, 1);
    assert!(unresolved.raw_names().is_empty());

    let key = NaturalKey::new()
        .with("plant_id", 40)
        .with("period", "2024-05")
        .with("fuel_type", "NG")
        .with("prime_mover", "CT");
    assert!(writer.row(&PLANT_GENERATION, &key).is_some());
}

struct FakeCapacity {
    rows: Vec<serde_json::Value>,
}

#[async_trait]
impl CapacitySource for FakeCapacity {
    async fn operating_capacity_page(
        &self,
        offset: usize,
        length: usize,
    ) -> Result<DataPage, EiaError> {
        Ok(DataPage {
            total: Some(self.rows.len() as u64),
            data: self.rows.iter().skip(offset).take(length).cloned().collect(),
        })
    }
}

fn capacity_row(plant: Option<&str>, generator: &str, nameplate: &str) -> serde_json::Value {
    json!({
        "period": "2024-06",
        "plantid": plant,
        "plantName": "Barry",
        "stateid": "AL",
        "generatorid": generator,
        "entityid": 195,
        "entityName": "Alabama Power Co",
        "energy_source_code": "NG",
        "prime_mover_code": "CT",
        "status": "OP",
        "county": "Mobile",
        "latitude": "31.0069",
        "longitude": "-88.0103",
        "nameplate-capacity-mw": nameplate,
        "operating-year-month": "2000-05"
    })
}

fn text(value: Option<&FieldValue>) -> String {
    match value {
        Some(FieldValue::Text(v)) => v.clone(),
        other => panic!("expected text, got {other:?}"),
    }
}

#[tokio::test]
async fn capacity_rows_register_plants_that_generation_then_resolves() {
    let writer = Arc::new(MemoryUpsertWriter::new());
    let capacity = Driver::new(
        EiaCapacityFetcher::new(FakeCapacity {
            rows: vec![
                capacity_row(Some("3"), "A1", "153.1"),
                capacity_row(Some("3"), "A2", "170"),
                capacity_row(None, "B1", "10"),
            ],
        }),
        EiaCapacityHandler,
        Resolver::new(Arc::new(CanonicalRegistry::new(vec![]))),
        writer.clone(),
        MemoryUnresolvedLog::new(),
        config(),
    );

    let report = capacity.run().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.summary.total_seen, 3);
    assert_eq!(report.summary.unresolved, 0);
    // The row without a plant id has no plant to attach to.
    assert_eq!(report.summary.errors, 1);
    assert_eq!(report.summary.written, 2);

    let utilities = writer.rows(EIA_ENTITIES.table);
    assert_eq!(utilities.len(), 1);
    assert_eq!(text(utilities[0].fields.get("name")), "Alabama Power Co");

    let plants = writer.rows(POWER_PLANTS.table);
    assert_eq!(plants.len(), 1);
    let plant = &plants[0];
    assert_eq!(plant.writes, 2);
    assert_eq!(
        plant.fields.get("entity_id"),
        Some(&FieldValue::Int(utilities[0].id.0))
    );
    assert_eq!(writer.rows(PLANT_CAPACITY.table).len(), 2);

    // The written plants are exactly what the plant registry is built from.
    let registry = CanonicalRegistry::new(
        plants
            .iter()
            .map(|row| CanonicalEntity {
                id: EntityId(row.id.0),
                name: text(row.key.get("api_plant_id")),
                aliases: vec![plant_alias(
                    &text(row.fields.get("name")),
                    Some(&text(row.fields.get("state"))),
                )],
            })
            .collect(),
    );

    let generation = Driver::new(
        EiaGenerationFetcher::new(FakeEia {
            rows: vec![
                generation_row("3", Some("NG"), "100"),
                generation_row("999", Some("BIT"), "50"),
            ],
            requests: Mutex::new(Vec::new()),
        }),
        EiaGenerationHandler,
        Resolver::new(Arc::new(registry)).without_partial(),
        writer.clone(),
        MemoryUnresolvedLog::new(),
        config(),
    );

    let report = generation.run().await;

    assert_eq!(report.summary.resolved, 2);
    assert_eq!(report.summary.written, 2);
    let generated = writer.rows(PLANT_GENERATION.table);
    assert_eq!(generated.len(), 2);
    for row in generated {
        assert_eq!(row.key.get("plant_id"), Some(&FieldValue::Int(plant.id.0)));
    }
}

// ---------------------------------------------------------------------------
// Pricing pages
// ---------------------------------------------------------------------------

struct FakeBrowser {
    pages: BTreeMap<String, String>,
}

#[async_trait]
impl PageRenderer for FakeBrowser {
    async fn render(&self, request: &ContentRequest) -> Result<String, BrowserlessError> {
        self.pages
            .get(&request.url)
            .cloned()
            .ok_or_else(|| BrowserlessError::Api {
                status: 404,
                message: request.url.clone(),
            })
    }
}

fn platform(urls: &[&str]) -> PricingPlatform {
    PricingPlatform {
        provider: "examplecloud".into(),
        urls: urls.iter().map(|u| u.to_string()).collect(),
        row: "table.gpus tbody tr".into(),
        name: "td.name".into(),
        price: "td.price".into(),
        tier: Some("td.tier".into()),
        wait_for: Some("table.gpus".into()),
    }
}

const SECURE_PAGE: &str = r#"
<html><body>
<table class="gpus"><tbody>
  <tr><td class="name">H100 SXM</td><td class="price">$2.69/hr</td><td class="tier">Secure Cloud</td></tr>
  <tr><td class="name">RTX 4090</td><td class="price">$0.44/hr</td><td class="tier">Secure Cloud</td></tr>
  <tr><td class="name">Mystery Accelerator</td><td class="price">$9.99/hr</td><td class="tier">Secure Cloud</td></tr>
  <tr><td class="price">$1.00/hr</td></tr>
</tbody></table>
</body></html>
"#;

const COMMUNITY_PAGE: &str = r#"
<html><body>
<table class="gpus"><tbody>
  <tr><td class="name">NVIDIA H100 SXM 80GB</td><td class="price">from $1.99 / hour</td><td class="tier">Community Cloud</td></tr>
  <tr><td class="name">RTX 4090</td><td class="price">Sold out</td></tr>
</tbody></table>
</body></html>
"#;

#[tokio::test]
async fn pricing_pages_are_scraped_and_upserted() {
    let browser = FakeBrowser {
        pages: BTreeMap::from([
            ("https://example.com/secure".to_string(), SECURE_PAGE.to_string()),
            ("https://example.com/community".to_string(), COMMUNITY_PAGE.to_string()),
        ]),
    };
    let fetcher = PricingPageFetcher::new(
        "examplecloud",
        platform(&["https://example.com/secure", "https://example.com/community"]),
        browser,
    )
    .unwrap();
    let writer = Arc::new(MemoryUpsertWriter::new());
    let driver = Driver::new(
        fetcher,
        PricingHandler,
        gpu_resolver(),
        writer.clone(),
        MemoryUnresolvedLog::new(),
        config(),
    );

    let report = driver.run().await;

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.source, "pricing-examplecloud");
    assert_eq!(report.pages_fetched, 3);
    assert_eq!(report.summary.total_seen, 5);
    assert_eq!(report.summary.unresolved, 1);
    assert_eq!(report.summary.written, 4);

    let key = |gpu: i64, tier: &str| {
        NaturalKey::new()
            .with("gpu_id", gpu)
            .with("provider", "examplecloud")
            .with("pricing_tier", tier)
    };
    let secure = writer.row(&PLATFORM_PRICING, &key(1, "secure_cloud")).unwrap();
    assert_eq!(secure.fields.get("hourly_price"), Some(&FieldValue::Float(2.69)));
    assert_eq!(secure.fields.get("currency"), Some(&FieldValue::Text("USD".into())));

    let community = writer.row(&PLATFORM_PRICING, &key(1, "community_cloud")).unwrap();
    assert_eq!(community.fields.get("hourly_price"), Some(&FieldValue::Float(1.99)));

    let sold_out = writer.row(&PLATFORM_PRICING, &key(2, "on_demand")).unwrap();
    assert_eq!(sold_out.fields.get("hourly_price"), Some(&FieldValue::Null));
}

#[tokio::test]
async fn page_without_matching_rows_is_fatal() {
    let browser = FakeBrowser {
        pages: BTreeMap::from([(
            "https://example.com/secure".to_string(),
            "<html><body><p>We moved our pricing</p></body></html>".to_string(),
        )]),
    };
    let fetcher =
        PricingPageFetcher::new("examplecloud", platform(&["https://example.com/secure"]), browser)
            .unwrap();
    let driver = Driver::new(
        fetcher,
        PricingHandler,
        gpu_resolver(),
        MemoryUpsertWriter::new(),
        MemoryUnresolvedLog::new(),
        config(),
    );

    let report = driver.run().await;

    let RunOutcome::Fatal(cause) = report.outcome else {
        panic!("expected fatal outcome");
    };
    assert!(cause.contains("no rows matched"));
}

#[test]
fn bad_selector_is_rejected_at_construction() {
    let mut bad = platform(&["https://example.com/secure"]);
    bad.row = "table[".into();
    let result = PricingPageFetcher::new(
        "examplecloud",
        bad,
        FakeBrowser {
            pages: BTreeMap::new(),
        },
    );
    assert!(result.is_err());
}
