pub mod error;
pub mod types;

pub use error::{Result, VastError};
pub use types::{SearchAsksInput, SearchAsksResponse, SearchQuery, VastOffer};

const BASE_URL: &str = "https://console.vast.ai/api/v0";

/// Default result cap for a full marketplace dump.
pub const DEFAULT_SEARCH_LIMIT: u32 = 100_000;

pub struct VastClient {
    client: reqwest::Client,
    base_url: String,
}

impl VastClient {
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Point the client at a different host (mirrors, local fixtures).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Search all rentable asks. Returns each offer as raw JSON.
    ///
    /// The body is inspected before parsing: the marketplace occasionally
    /// answers with an HTML error page and a 200 status.
    pub async fn search_asks(&self, limit: u32) -> Result<Vec<serde_json::Value>> {
        tracing::info!(limit, "Searching Vast.ai asks");

        let input = SearchAsksInput {
            q: SearchQuery { limit },
        };

        let url = format!("{}/search/asks/", self.base_url);
        let resp = self
            .client
            .put(&url)
            .header("Accept", "application/json")
            .json(&input)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(VastError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed = parse_search_body(&body)?;
        tracing::info!(count = parsed.offers.len(), "Fetched Vast.ai offers");

        Ok(parsed.offers)
    }
}

impl Default for VastClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a search response body, rejecting HTML error pages.
pub fn parse_search_body(body: &str) -> Result<SearchAsksResponse> {
    if body.trim_start().starts_with('<') {
        return Err(VastError::HtmlBody);
    }
    Ok(serde_json::from_str(body)?)
}
