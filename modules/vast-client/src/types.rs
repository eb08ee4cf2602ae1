use serde::{Deserialize, Deserializer, Serialize};

// --- Search request ---

/// Body for `PUT /search/asks/`. Only the result limit is set; the
/// marketplace applies its default filters otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct SearchAsksInput {
    pub q: SearchQuery,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub limit: u32,
}

/// Raw search response. Offers stay as JSON so callers can keep the
/// unmodified payload next to whatever they extract from it.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchAsksResponse {
    #[serde(default)]
    pub offers: Vec<serde_json::Value>,
}

// --- Offer ---

/// A single rentable ask from the marketplace.
///
/// Only the columns the ingestion tables use are typed. Several fields are
/// reported as numbers by the live API but as strings in older dumps, so they
/// go through `string_or_number`.
#[derive(Debug, Clone, Deserialize)]
pub struct VastOffer {
    pub id: i64,
    pub machine_id: i64,
    pub gpu_name: String,
    #[serde(default)]
    pub num_gpus: Option<i64>,
    #[serde(default)]
    pub gpu_ram: Option<f64>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub cpu_name: Option<String>,
    #[serde(default)]
    pub cpu_cores: Option<i64>,
    #[serde(default)]
    pub cpu_ghz: Option<f64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub cuda_max_good: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub driver_version: Option<String>,
    #[serde(default)]
    pub geolocation: Option<String>,
    #[serde(default)]
    pub geolocode: Option<i64>,
    #[serde(default)]
    pub pci_gen: Option<f64>,
    #[serde(default)]
    pub vms_enabled: Option<bool>,
    #[serde(default)]
    pub motherboard_name: Option<String>,
    #[serde(default)]
    pub mobo_name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,

    // Pricing / availability snapshot
    #[serde(default)]
    pub reliability: Option<f64>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub storage_total: Option<f64>,
    #[serde(default)]
    pub inet_up: Option<f64>,
    #[serde(default)]
    pub inet_up_cost: Option<f64>,
    #[serde(default)]
    pub inet_down: Option<f64>,
    #[serde(default)]
    pub inet_down_cost: Option<f64>,
    #[serde(default)]
    pub is_bid: Option<bool>,
    #[serde(default)]
    pub min_bid: Option<f64>,
    #[serde(default)]
    pub storage_cost: Option<f64>,
    #[serde(default)]
    pub dlperf: Option<f64>,
    #[serde(default)]
    pub dph_total: Option<f64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub duration: Option<String>,
}

impl VastOffer {
    /// Motherboard name, whichever of the two keys the API filled in.
    pub fn motherboard(&self) -> Option<&str> {
        self.motherboard_name
            .as_deref()
            .or(self.mobo_name.as_deref())
    }

    /// Trailing path segment of the offer URL, used as a short external id.
    pub fn url_id(&self) -> Option<&str> {
        self.url
            .as_deref()
            .and_then(|u| u.trim_end_matches('/').rsplit('/').next())
            .filter(|s| !s.is_empty())
    }

    /// Total storage cost for the offer (`storage_cost * storage_total`).
    pub fn storage_total_cost(&self) -> Option<f64> {
        Some(self.storage_cost? * self.storage_total?)
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}
