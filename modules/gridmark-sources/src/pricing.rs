use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, ContentRequest};
use chrono::Utc;
use gridmark_common::PricingPlatform;
use gridmark_pipeline::{
    EntityId, FetchError, Fields, NaturalKey, Page, PersistedId, RecordHandler, SourceFetcher,
    SourceKind, SourceRecord, UpsertTarget, UpsertWriter, WriteError,
};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use url::Url;

use crate::clients::{browserless_fetch_error, PageRenderer};
use crate::error::SourceSetupError;

pub const PLATFORM_PRICING: UpsertTarget = UpsertTarget::new(
    "gpu_platform_pricing",
    &["gpu_id", "provider", "pricing_tier"],
);

/// Tier recorded when a platform lists a single price per GPU.
pub const DEFAULT_TIER: &str = "on_demand";

const WAIT_FOR_TIMEOUT: Duration = Duration::from_secs(15);

/// First dollar amount in a price cell: `"$2.49/hr"` → 2.49.
pub fn parse_price(text: &str) -> Option<f64> {
    static PRICE: OnceLock<Regex> = OnceLock::new();
    let re = PRICE.get_or_init(|| {
        Regex::new(r"(\d{1,3}(?:,\d{3})+|\d+)(\.\d+)?").expect("valid price regex")
    });
    let caps = re.captures(text)?;
    let whole = caps.get(1)?.as_str().replace(',', "");
    let frac = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    format!("{whole}{frac}").parse().ok()
}

struct Selectors {
    row: Selector,
    name: Selector,
    price: Selector,
    tier: Option<Selector>,
}

fn parse_selector(field: &'static str, css: &str) -> Result<Selector, SourceSetupError> {
    Selector::parse(css).map_err(|e| SourceSetupError::InvalidSelector {
        field,
        selector: css.to_string(),
        message: e.to_string(),
    })
}

/// Scraped pricing tables. Each configured URL is one page.
pub struct PricingPageFetcher<R = BrowserlessClient> {
    name: String,
    renderer: R,
    platform: PricingPlatform,
    urls: Vec<Url>,
    selectors: Selectors,
}

impl<R: PageRenderer> PricingPageFetcher<R> {
    /// Validates URLs and compiles selectors up front so a bad config fails
    /// before any page is fetched.
    pub fn new(name: &str, platform: PricingPlatform, renderer: R) -> Result<Self, SourceSetupError> {
        if platform.urls.is_empty() {
            return Err(SourceSetupError::NoUrls(name.to_string()));
        }
        let urls = platform
            .urls
            .iter()
            .map(|u| {
                Url::parse(u).map_err(|e| SourceSetupError::InvalidUrl {
                    url: u.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let selectors = Selectors {
            row: parse_selector("row", &platform.row)?,
            name: parse_selector("name", &platform.name)?,
            price: parse_selector("price", &platform.price)?,
            tier: platform
                .tier
                .as_deref()
                .map(|css| parse_selector("tier", css))
                .transpose()?,
        };

        Ok(Self {
            name: format!("pricing-{name}"),
            renderer,
            platform,
            urls,
            selectors,
        })
    }

    fn extract_rows(&self, html: &str, url: &Url) -> Vec<serde_json::Value> {
        let document = Html::parse_document(html);
        let mut rows = Vec::new();

        for row in document.select(&self.selectors.row) {
            let Some(name) = first_text(&row, &self.selectors.name) else {
                continue;
            };
            let price_text = first_text(&row, &self.selectors.price);
            let tier = self
                .selectors
                .tier
                .as_ref()
                .and_then(|sel| first_text(&row, sel))
                .map(|t| normalize_tier(&t))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TIER.to_string());

            rows.push(json!({
                "name": name,
                "price_text": price_text,
                "hourly_price": price_text.as_deref().and_then(parse_price),
                "tier": tier,
                "provider": self.platform.provider,
                "source_url": url.as_str(),
            }));
        }
        rows
    }
}

fn first_text(row: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    let element = row.select(selector).next()?;
    let text = element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

fn normalize_tier(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl<R: PageRenderer> SourceFetcher for PricingPageFetcher<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Scrape
    }

    fn max_page_size(&self) -> usize {
        usize::MAX
    }

    async fn fetch_page(&self, page_index: usize, _page_size: usize) -> Result<Page, FetchError> {
        let Some(url) = self.urls.get(page_index) else {
            return Ok(Page::empty());
        };

        let mut request = ContentRequest::new(url.as_str());
        if let Some(selector) = &self.platform.wait_for {
            request = request.wait_for(selector, WAIT_FOR_TIMEOUT);
        }
        let html = self
            .renderer
            .render(&request)
            .await
            .map_err(browserless_fetch_error)?;

        let rows = self.extract_rows(&html, url);
        if rows.is_empty() {
            return Err(FetchError::Malformed(format!(
                "no rows matched {:?} on {url}",
                self.platform.row
            )));
        }

        tracing::info!(source = %self.name, url = %url, rows = rows.len(), "Scraped pricing page");
        Ok(Page::new(rows.into_iter().map(SourceRecord::new).collect()))
    }
}

/// Writes one `gpu_platform_pricing` row per GPU, provider and tier.
#[derive(Debug, Default, Clone, Copy)]
pub struct PricingHandler;

#[async_trait]
impl RecordHandler for PricingHandler {
    fn entity_name(&self, record: &SourceRecord) -> Option<String> {
        record.text("name")
    }

    fn context(&self, record: &SourceRecord) -> String {
        format!(
            "provider={} tier={} url={}",
            record.text("provider").unwrap_or_default(),
            record.text("tier").unwrap_or_default(),
            record.text("source_url").unwrap_or_default()
        )
    }

    async fn persist(
        &self,
        entity: EntityId,
        record: &SourceRecord,
        writer: &dyn UpsertWriter,
    ) -> Result<PersistedId, WriteError> {
        let key = NaturalKey::new()
            .with("gpu_id", entity)
            .with("provider", record.text("provider"))
            .with("pricing_tier", record.text("tier"));

        let price_text = record.text("price_text");
        let currency = price_text
            .as_deref()
            .filter(|t| t.contains('$'))
            .map(|_| "USD");

        let fields = Fields::new()
            .with(
                "hourly_price",
                record.raw().get("hourly_price").and_then(|v| v.as_f64()),
            )
            .with("currency", currency)
            .with("raw_name", record.text("name"))
            .with("source_url", record.text("source_url"))
            .with("observed_at", Utc::now());

        writer
            .upsert(&PLATFORM_PRICING, &key, &fields, record.raw())
            .await
    }
}
