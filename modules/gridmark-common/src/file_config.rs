use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, DB URL) stay as env vars.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub vast: VastSettings,
    #[serde(default)]
    pub eia: EiaSettings,
    /// Scraped pricing platforms, keyed by the name used on the command line.
    #[serde(default)]
    pub pricing: BTreeMap<String, PricingPlatform>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DriverSettings {
    pub fetch_attempts: u32,
    pub retry_delay_ms: u64,
    pub courtesy_delay_ms: u64,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            fetch_attempts: 2,
            retry_delay_ms: 2_000,
            courtesy_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct VastSettings {
    pub search_limit: u32,
}

impl Default for VastSettings {
    fn default() -> Self {
        Self {
            search_limit: 100_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EiaSettings {
    pub page_size: usize,
}

impl Default for EiaSettings {
    fn default() -> Self {
        Self { page_size: 5_000 }
    }
}

/// CSS selectors for one scraped pricing platform.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingPlatform {
    /// Provider identifier stored with each price row.
    pub provider: String,
    /// Pages to scrape, in order. Each URL is one fetch.
    pub urls: Vec<String>,
    /// Selector matching one element per GPU offering.
    pub row: String,
    /// Selector (relative to the row) for the GPU name.
    pub name: String,
    /// Selector (relative to the row) for the hourly price text.
    pub price: String,
    /// Optional selector for a tier label ("secure", "community", …).
    #[serde(default)]
    pub tier: Option<String>,
    /// Wait for this selector before reading the DOM.
    #[serde(default)]
    pub wait_for: Option<String>,
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}
