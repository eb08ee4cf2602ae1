pub mod error;
pub mod types;

pub use error::{EiaError, Result};
pub use types::{DataPage, FacilityFuelRow, GeneratorCapacityRow};

use types::ApiEnvelope;

const BASE_URL: &str = "https://api.eia.gov/v2";

/// Route for monthly plant-level generation and fuel consumption.
const FACILITY_FUEL_ROUTE: &str = "electricity/facility-fuel/data";

/// Route for monthly per-generator operating capacity. Carries plant,
/// utility and location columns alongside the measures.
const OPERATING_CAPACITY_ROUTE: &str = "electricity/operating-generator-capacity/data";

/// Largest `length` the v2 API accepts for JSON output.
pub const MAX_PAGE_LENGTH: usize = 5000;

/// Measures requested from the facility-fuel route.
pub const FACILITY_FUEL_MEASURES: [&str; 7] = [
    "average-heat-content",
    "consumption-for-eg",
    "consumption-for-eg-btu",
    "generation",
    "gross-generation",
    "total-consumption",
    "total-consumption-btu",
];

/// Columns requested from the operating-generator-capacity route.
pub const OPERATING_CAPACITY_COLUMNS: [&str; 7] = [
    "county",
    "latitude",
    "longitude",
    "nameplate-capacity-mw",
    "net-summer-capacity-mw",
    "net-winter-capacity-mw",
    "operating-year-month",
];

pub struct EiaClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl EiaClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch one page of monthly facility-fuel rows, newest period first.
    pub async fn facility_fuel_page(&self, offset: usize, length: usize) -> Result<DataPage> {
        self.data_page(FACILITY_FUEL_ROUTE, &FACILITY_FUEL_MEASURES, offset, length)
            .await
    }

    /// Fetch one page of monthly operating-generator-capacity rows, newest
    /// period first.
    pub async fn operating_capacity_page(&self, offset: usize, length: usize) -> Result<DataPage> {
        self.data_page(OPERATING_CAPACITY_ROUTE, &OPERATING_CAPACITY_COLUMNS, offset, length)
            .await
    }

    async fn data_page(
        &self,
        route: &str,
        columns: &[&str],
        offset: usize,
        length: usize,
    ) -> Result<DataPage> {
        let length = length.min(MAX_PAGE_LENGTH);
        let url = format!("{}/{}", self.base_url, route);

        let mut query: Vec<(String, String)> = vec![
            ("api_key".into(), self.api_key.clone()),
            ("offset".into(), offset.to_string()),
            ("length".into(), length.to_string()),
            ("frequency".into(), "monthly".into()),
            ("sort[0][column]".into(), "period".into()),
            ("sort[0][direction]".into(), "desc".into()),
        ];
        for (i, column) in columns.iter().enumerate() {
            query.push((format!("data[{i}]"), (*column).to_string()));
        }

        tracing::debug!(route, offset, length, "Requesting EIA data page");

        let resp = self.client.get(&url).query(&query).send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(EiaError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        parse_page_body(&body)
    }
}

/// Parse a v2 response body into a page.
///
/// EIA's gateway sometimes answers with an HTML error page and a 200 status,
/// so the body is inspected before it is handed to the JSON parser. A body
/// without a `response` object is an empty page.
pub fn parse_page_body(body: &str) -> Result<DataPage> {
    if body.trim_start().starts_with('<') {
        let preview: String = body.chars().take(200).collect();
        tracing::error!(body = %preview, "EIA API returned HTML error page");
        return Err(EiaError::HtmlBody(preview));
    }

    let envelope: ApiEnvelope = serde_json::from_str(body)?;
    Ok(match envelope.response {
        Some(r) => DataPage {
            total: r.total,
            data: r.data,
        },
        None => DataPage::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_body_is_rejected() {
        let body = "<html><head><title>504 Gateway Time-out</title></head></html>";
        assert!(matches!(parse_page_body(body), Err(EiaError::HtmlBody(_))));
    }

    #[test]
    fn markup_in_a_data_value_is_not_an_error_page() {
        let body = r#"{"response":{"data":[{"plantName":"<html> Energy Center"}]}}"#;
        let page = parse_page_body(body).unwrap();
        assert_eq!(page.data.len(), 1);
    }

    #[test]
    fn string_total_is_parsed() {
        let body = r#"{"response":{"total":"12","data":[{"period":"2024-01"}]}}"#;
        let page = parse_page_body(body).unwrap();
        assert_eq!(page.total, Some(12));
        assert_eq!(page.data.len(), 1);
    }

    #[test]
    fn missing_response_is_empty_page() {
        let page = parse_page_body(r#"{"request":{}}"#).unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, None);
    }

    #[test]
    fn truncated_json_is_parse_error() {
        assert!(matches!(
            parse_page_body(r#"{"response":{"data":["#),
            Err(EiaError::Parse(_))
        ));
    }
}
