// Seams between the source adapters and their HTTP clients.
//
// Each adapter is generic over one of these traits so tests can script the
// upstream responses without a network.

use async_trait::async_trait;
use browserless_client::{BrowserlessClient, BrowserlessError, ContentRequest};
use eia_client::{DataPage, EiaClient, EiaError};
use gridmark_pipeline::FetchError;
use vast_client::{VastClient, VastError};

// ---------------------------------------------------------------------------
// Vast.ai marketplace
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OfferSearch: Send + Sync {
    async fn search_asks(&self, limit: u32) -> Result<Vec<serde_json::Value>, VastError>;
}

#[async_trait]
impl OfferSearch for VastClient {
    async fn search_asks(&self, limit: u32) -> Result<Vec<serde_json::Value>, VastError> {
        VastClient::search_asks(self, limit).await
    }
}

pub(crate) fn vast_fetch_error(err: VastError) -> FetchError {
    match err {
        VastError::Network(e) => FetchError::Transport(e.to_string()),
        VastError::Api { status, message } => {
            FetchError::Transport(format!("HTTP {status}: {}", preview(&message)))
        }
        VastError::Parse(e) => FetchError::Malformed(e.to_string()),
        VastError::HtmlBody => FetchError::Malformed("HTML body instead of JSON".into()),
    }
}

// ---------------------------------------------------------------------------
// EIA v2
// ---------------------------------------------------------------------------

#[async_trait]
pub trait GenerationSource: Send + Sync {
    async fn facility_fuel_page(&self, offset: usize, length: usize) -> Result<DataPage, EiaError>;
}

#[async_trait]
impl GenerationSource for EiaClient {
    async fn facility_fuel_page(&self, offset: usize, length: usize) -> Result<DataPage, EiaError> {
        EiaClient::facility_fuel_page(self, offset, length).await
    }
}

#[async_trait]
pub trait CapacitySource: Send + Sync {
    async fn operating_capacity_page(&self, offset: usize, length: usize) -> Result<DataPage, EiaError>;
}

#[async_trait]
impl CapacitySource for EiaClient {
    async fn operating_capacity_page(&self, offset: usize, length: usize) -> Result<DataPage, EiaError> {
        EiaClient::operating_capacity_page(self, offset, length).await
    }
}

pub(crate) fn eia_fetch_error(err: EiaError) -> FetchError {
    match err {
        EiaError::Network(e) => FetchError::Transport(e.to_string()),
        EiaError::Api { status, message } => {
            FetchError::Transport(format!("HTTP {status}: {}", preview(&message)))
        }
        EiaError::Parse(e) => FetchError::Malformed(e.to_string()),
        EiaError::HtmlBody(body) => FetchError::Malformed(format!("HTML body: {body}")),
    }
}

// ---------------------------------------------------------------------------
// Browserless
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, request: &ContentRequest) -> Result<String, BrowserlessError>;
}

#[async_trait]
impl PageRenderer for BrowserlessClient {
    async fn render(&self, request: &ContentRequest) -> Result<String, BrowserlessError> {
        BrowserlessClient::render(self, request).await
    }
}

pub(crate) fn browserless_fetch_error(err: BrowserlessError) -> FetchError {
    FetchError::Transport(err.to_string())
}

fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}
