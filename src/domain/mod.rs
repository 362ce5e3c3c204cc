use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured decomposition of a free-text address into postal components.
///
/// Every component is optional; the parser fills what it can and reports the
/// remaining uncertainty through `confidence_score`. Component values are
/// canonicalized uppercase (suffix/directional/unit abbreviations applied).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedAddress {
    pub house_number: Option<String>,
    pub pre_directional: Option<String>,
    pub street_name: Option<String>,
    pub street_suffix: Option<String>,
    pub post_directional: Option<String>,
    pub unit_designator: Option<String>,
    pub unit_number: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    /// Reliability estimate in [0, 1], additive from field-level evidence.
    pub confidence_score: f64,
    /// Which parsing tier produced this decomposition.
    pub parsing_method: ParsingMethod,
}

/// The parsing tier that produced a `ParsedAddress`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingMethod {
    /// Structured comma-aware decomposition succeeded.
    Primary,
    /// Layered pattern extraction over the raw string.
    FallbackRegex,
    /// No structured shape matched; independent field extraction only.
    Partial,
    /// Blank or whitespace-only input.
    #[default]
    EmptyInput,
}

impl ParsedAddress {
    /// Reassemble the canonical single-line form of this address.
    /// Parsing the output again yields the same structured fields.
    pub fn formatted(&self) -> String {
        let mut street = Vec::new();
        if let Some(v) = &self.house_number {
            street.push(v.clone());
        }
        if let Some(v) = &self.pre_directional {
            street.push(v.clone());
        }
        if let Some(v) = &self.street_name {
            street.push(v.clone());
        }
        if let Some(v) = &self.street_suffix {
            street.push(v.clone());
        }
        if let Some(v) = &self.post_directional {
            street.push(v.clone());
        }
        if let (Some(d), Some(n)) = (&self.unit_designator, &self.unit_number) {
            if d == "#" {
                street.push(format!("#{}", n));
            } else {
                street.push(d.clone());
                street.push(n.clone());
            }
        }
        let mut parts = Vec::new();
        if !street.is_empty() {
            parts.push(street.join(" "));
        }
        if let Some(city) = &self.city {
            parts.push(city.clone());
        }
        let mut tail = Vec::new();
        if let Some(state) = &self.state {
            tail.push(state.clone());
        }
        if let Some(zip) = &self.postal_code {
            tail.push(zip.clone());
        }
        if !tail.is_empty() {
            parts.push(tail.join(" "));
        }
        parts.join(", ")
    }
}

/// Geographic coordinates in WGS84 decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Which service resolved an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Free community geocoding service (throttled).
    Osm,
    /// Metered commercial geocoding service.
    Commercial,
    /// Served from the local geocode cache.
    Cache,
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderId::Osm => write!(f, "osm"),
            ProviderId::Commercial => write!(f, "commercial"),
            ProviderId::Cache => write!(f, "cache"),
        }
    }
}

/// Terminal state of a geocode attempt. Callers branch on this field;
/// no error type crosses the public boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeStatus {
    /// Coordinates resolved. Implies `coordinates` is set and
    /// `confidence_score > 0`.
    Success,
    /// Reserved terminal state: components resolved without coordinates.
    Partial,
    /// No provider resolved the address.
    Failed,
    /// Throttled, either by the local token bucket or an upstream 429.
    RateLimited,
    /// Commercial metering exhausted for the day.
    QuotaExceeded,
    /// Provider bypassed due to recent failure history.
    CircuitOpen,
}

/// Qualitative indicator of coordinate exactness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// Resolved to the building itself.
    Rooftop,
    /// Interpolated along the street segment.
    Interpolated,
    /// Centroid of a larger area (street, postal code, city).
    Approximate,
}

/// The unit of exchange between this crate and its callers: the outcome of
/// one geocode attempt, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub coordinates: Option<Coordinates>,
    pub formatted_address: String,
    /// Reliability estimate in [0, 1]; zero unless `status` is `Success`.
    pub confidence_score: f64,
    pub provider: ProviderId,
    pub status: GeocodeStatus,
    /// Structured components of the input address, attached by the
    /// orchestrator regardless of outcome.
    pub parsed: Option<ParsedAddress>,
    pub precision: Option<Precision>,
    pub response_time_ms: u64,
    /// True when served from the geocode cache.
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

impl GeocodeResult {
    /// A non-success outcome carrying no coordinates.
    pub fn unresolved(provider: ProviderId, status: GeocodeStatus) -> Self {
        Self {
            coordinates: None,
            formatted_address: String::new(),
            confidence_score: 0.0,
            provider,
            status,
            parsed: None,
            precision: None,
            response_time_ms: 0,
            cached: false,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == GeocodeStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_joins_present_components() {
        let parsed = ParsedAddress {
            house_number: Some("1234".to_string()),
            pre_directional: Some("N".to_string()),
            street_name: Some("HIGHLAND".to_string()),
            street_suffix: Some("AVE".to_string()),
            city: Some("LOS ANGELES".to_string()),
            state: Some("CA".to_string()),
            postal_code: Some("90028".to_string()),
            ..Default::default()
        };
        assert_eq!(parsed.formatted(), "1234 N HIGHLAND AVE, LOS ANGELES, CA 90028");
    }

    #[test]
    fn formatted_renders_hash_units_without_space() {
        let parsed = ParsedAddress {
            house_number: Some("12".to_string()),
            street_name: Some("OAK".to_string()),
            street_suffix: Some("ST".to_string()),
            unit_designator: Some("#".to_string()),
            unit_number: Some("4B".to_string()),
            ..Default::default()
        };
        assert_eq!(parsed.formatted(), "12 OAK ST #4B");
    }

    #[test]
    fn status_tags_serialize_snake_case() {
        let json = serde_json::to_string(&GeocodeStatus::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        let json = serde_json::to_string(&ProviderId::Cache).unwrap();
        assert_eq!(json, "\"cache\"");
        let json = serde_json::to_string(&ParsingMethod::EmptyInput).unwrap();
        assert_eq!(json, "\"empty_input\"");
    }
}
