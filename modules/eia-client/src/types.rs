use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};

// --- Envelope ---

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiEnvelope {
    pub response: Option<ApiResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default, deserialize_with = "total_count")]
    pub total: Option<u64>,
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// One page of `facility-fuel` rows. Rows are kept as raw JSON.
#[derive(Debug, Clone, Default)]
pub struct DataPage {
    /// Total rows matching the query, as reported by the API.
    pub total: Option<u64>,
    pub data: Vec<serde_json::Value>,
}

// --- facility-fuel row ---

/// Typed view of a single `electricity/facility-fuel` row.
///
/// The API reports every measure as a string; `measure()` converts them.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilityFuelRow {
    pub period: Option<String>,
    #[serde(rename = "plantCode", default, deserialize_with = "string_or_number")]
    pub plant_code: Option<String>,
    #[serde(rename = "plantName")]
    pub plant_name: Option<String>,
    #[serde(alias = "stateCode")]
    pub state: Option<String>,
    #[serde(rename = "fuel2002")]
    pub fuel_type: Option<String>,
    #[serde(rename = "primeMover")]
    pub prime_mover: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl FacilityFuelRow {
    /// Parse a measure column (`"generation"`, `"total-consumption"`, …).
    pub fn measure(&self, column: &str) -> Option<f64> {
        number(self.rest.get(column)?)
    }

    /// Unit label for a measure column (`"<column>-units"`).
    pub fn units(&self, column: &str) -> Option<&str> {
        self.rest
            .get(&format!("{column}-units"))
            .and_then(|v| v.as_str())
    }

    /// First day of the `YYYY-MM` reporting period.
    pub fn period_start(&self) -> Option<NaiveDate> {
        year_month(self.period.as_deref()?)
    }
}

// --- operating-generator-capacity row ---

/// Typed view of a single `electricity/operating-generator-capacity` row:
/// one generator of one plant in one month.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorCapacityRow {
    pub period: Option<String>,
    #[serde(rename = "plantid", default, deserialize_with = "string_or_number")]
    pub plant_id: Option<String>,
    #[serde(rename = "plantName")]
    pub plant_name: Option<String>,
    #[serde(rename = "stateid")]
    pub state_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub generatorid: Option<String>,
    #[serde(rename = "entityid", default, deserialize_with = "string_or_number")]
    pub entity_id: Option<String>,
    #[serde(rename = "entityName")]
    pub entity_name: Option<String>,
    pub energy_source_code: Option<String>,
    #[serde(rename = "prime_mover_code")]
    pub prime_mover: Option<String>,
    pub status: Option<String>,
    pub county: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl GeneratorCapacityRow {
    /// State code, else the state name.
    pub fn state(&self) -> Option<&str> {
        self.state_id.as_deref().or_else(|| self.text("stateName"))
    }

    /// Energy source code, else its description.
    pub fn fuel_type(&self) -> Option<&str> {
        self.energy_source_code
            .as_deref()
            .or_else(|| self.text("energy-source-desc"))
    }

    /// Status code, else its description.
    pub fn operating_status(&self) -> Option<&str> {
        self.status
            .as_deref()
            .or_else(|| self.text("statusDescription"))
    }

    fn text(&self, column: &str) -> Option<&str> {
        self.rest.get(column)?.as_str()
    }

    /// Parse a numeric column (`"nameplate-capacity-mw"`, `"latitude"`, …).
    pub fn measure(&self, column: &str) -> Option<f64> {
        number(self.rest.get(column)?)
    }

    /// First day of a `YYYY-MM` column such as `"operating-year-month"`.
    pub fn month(&self, column: &str) -> Option<NaiveDate> {
        year_month(self.rest.get(column)?.as_str()?)
    }

    /// First day of the `YYYY-MM` reporting period.
    pub fn period_start(&self) -> Option<NaiveDate> {
        year_month(self.period.as_deref()?)
    }
}

fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn year_month(value: &str) -> Option<NaiveDate> {
    let (year, month) = value.trim().split_once('-')?;
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// EIA reports `total` as a string on some routes and a number on others.
fn total_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn row_parses_string_measures() {
        let row: FacilityFuelRow = serde_json::from_value(json!({
            "period": "2024-07",
            "plantCode": "3",
            "plantName": "Barry",
            "state": "AL",
            "fuel2002": "NG",
            "primeMover": "CT",
            "generation": "123456.7",
            "generation-units": "megawatthours",
            "total-consumption": null
        }))
        .unwrap();

        assert_eq!(row.plant_code.as_deref(), Some("3"));
        assert_eq!(row.measure("generation"), Some(123456.7));
        assert_eq!(row.units("generation"), Some("megawatthours"));
        assert_eq!(row.measure("total-consumption"), None);
        assert_eq!(row.period_start(), NaiveDate::from_ymd_opt(2024, 7, 1));
    }

    #[test]
    fn numeric_plant_code_and_state_code_alias() {
        let row: FacilityFuelRow = serde_json::from_value(json!({
            "period": "bad",
            "plantCode": 7,
            "plantName": "Gadsden",
            "stateCode": "AL"
        }))
        .unwrap();

        assert_eq!(row.plant_code.as_deref(), Some("7"));
        assert_eq!(row.state.as_deref(), Some("AL"));
        assert_eq!(row.period_start(), None);
    }

    #[test]
    fn capacity_row_parses_plant_and_generator_columns() {
        let row: GeneratorCapacityRow = serde_json::from_value(json!({
            "period": "2024-06",
            "plantid": 3,
            "plantName": "Barry",
            "stateid": "AL",
            "generatorid": "1",
            "entityid": 195,
            "entityName": "Alabama Power Co",
            "energy_source_code": "NG",
            "prime_mover_code": "CT",
            "statusDescription": "Operating",
            "county": "Mobile",
            "latitude": "31.0069",
            "longitude": -88.0103,
            "nameplate-capacity-mw": "153.1",
            "operating-year-month": "1954-03"
        }))
        .unwrap();

        assert_eq!(row.plant_id.as_deref(), Some("3"));
        assert_eq!(row.entity_id.as_deref(), Some("195"));
        assert_eq!(row.state(), Some("AL"));
        assert_eq!(row.fuel_type(), Some("NG"));
        assert_eq!(row.operating_status(), Some("Operating"));
        assert_eq!(row.measure("latitude"), Some(31.0069));
        assert_eq!(row.measure("longitude"), Some(-88.0103));
        assert_eq!(row.measure("nameplate-capacity-mw"), Some(153.1));
        assert_eq!(row.month("operating-year-month"), NaiveDate::from_ymd_opt(1954, 3, 1));
        assert_eq!(row.period_start(), NaiveDate::from_ymd_opt(2024, 6, 1));
    }
}
