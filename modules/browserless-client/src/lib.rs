pub mod error;

pub use error::{BrowserlessError, Result};

use std::time::Duration;

use serde::Serialize;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BrowserlessClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Body for `POST /content`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRequest {
    pub url: String,
    pub goto_options: GotoOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_selector: Option<WaitForSelector>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoOptions {
    pub wait_until: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaitForSelector {
    pub selector: String,
    pub timeout: u64,
}

impl ContentRequest {
    /// Render `url` and return once the network is idle.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            goto_options: GotoOptions {
                wait_until: "networkidle2".to_string(),
            },
            wait_for_selector: None,
        }
    }

    /// Also wait until `selector` matches, for pages that fill in
    /// their tables client-side after load.
    pub fn wait_for(mut self, selector: &str, timeout: Duration) -> Self {
        self.wait_for_selector = Some(WaitForSelector {
            selector: selector.to_string(),
            timeout: timeout.as_millis() as u64,
        });
        self
    }
}

impl BrowserlessClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrowserlessError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    /// Fetch fully-rendered HTML via the /content endpoint.
    pub async fn render(&self, request: &ContentRequest) -> Result<String> {
        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        tracing::debug!(url = %request.url, "Rendering page via Browserless");

        let resp = self
            .client
            .post(&endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrowserlessError::Timeout(request.url.clone())
                } else {
                    BrowserlessError::from(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BrowserlessError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_request_serializes_browserless_shape() {
        let req = ContentRequest::new("https://example.com/pricing")
            .wait_for("table tr", Duration::from_secs(5));
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["url"], "https://example.com/pricing");
        assert_eq!(value["gotoOptions"]["waitUntil"], "networkidle2");
        assert_eq!(value["waitForSelector"]["selector"], "table tr");
        assert_eq!(value["waitForSelector"]["timeout"], 5000);
    }

    #[test]
    fn wait_for_selector_omitted_by_default() {
        let value = serde_json::to_value(ContentRequest::new("https://example.com")).unwrap();
        assert!(value.get("waitForSelector").is_none());
    }
}
