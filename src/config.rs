use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::common::error::{GeoError, Result};

/// Env var that overrides `[providers.commercial].api_key`.
pub const COMMERCIAL_API_KEY_ENV: &str = "PROPGEO_COMMERCIAL_API_KEY";
/// Env var that overrides `[cache].path`.
pub const CACHE_PATH_ENV: &str = "PROPGEO_CACHE_PATH";

/// Top-level configuration. Every section has defaults, so a missing config
/// file yields a working geocoder (free provider only, caching disabled).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GeocoderConfig {
    #[serde(default)]
    pub geocoder: GeocoderSettings,
    #[serde(default)]
    pub default_region: RegionDefault,
    #[serde(default)]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// Orchestrator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderSettings {
    /// Additional attempts per provider after the first (so each provider is
    /// tried up to `max_retries + 1` times).
    pub max_retries: u32,
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Pause between sequential batches to smooth provider load.
    pub batch_pause_ms: u64,
    pub cache_enabled: bool,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            batch_size: 25,
            max_concurrency: 5,
            batch_pause_ms: 500,
            cache_enabled: true,
        }
    }
}

/// City/state filled in when an address parses to a house number and street
/// but carries no locality. Deployment-specific; set either field to an
/// empty string to disable the fill-in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionDefault {
    pub city: String,
    pub state: String,
}

impl Default for RegionDefault {
    fn default() -> Self {
        Self { city: "LOS ANGELES".to_string(), state: "CA".to_string() }
    }
}

impl RegionDefault {
    pub fn is_enabled(&self) -> bool {
        !self.city.is_empty() && !self.state.is_empty()
    }
}

/// Target region for geocoding requests. Providers pass it as a viewbox and
/// reject coordinates that land outside it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Default for BoundingBox {
    // Greater Los Angeles
    fn default() -> Self {
        Self {
            min_latitude: 33.70,
            max_latitude: 34.35,
            min_longitude: -118.67,
            max_longitude: -117.65,
        }
    }
}

impl BoundingBox {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.min_latitude
            && latitude <= self.max_latitude
            && longitude >= self.min_longitude
            && longitude <= self.max_longitude
    }

    /// `min_lon,min_lat,max_lon,max_lat` as geocoding search APIs expect.
    pub fn viewbox_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_longitude, self.min_latitude, self.max_longitude, self.max_latitude
        )
    }
}

/// Geocode cache settings. No path means caching is disabled, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub path: Option<PathBuf>,
    pub ttl_days: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { path: None, ttl_days: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub osm: OsmProviderConfig,
    #[serde(default)]
    pub commercial: CommercialProviderConfig,
}

/// Free community provider (Nominatim-style search API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsmProviderConfig {
    pub base_url: String,
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub timeout_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for OsmProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org/search".to_string(),
            // Community usage policy: one request per second, no bursts to
            // speak of.
            requests_per_second: 1.0,
            burst_size: 1,
            timeout_ms: 10_000,
            breaker_threshold: 5,
            breaker_cooldown_secs: 60,
        }
    }
}

/// Metered commercial provider. Absent `api_key` disables the provider and
/// the chain degrades to the free tier only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommercialProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub daily_quota: u64,
    pub requests_per_second: f64,
    pub burst_size: u32,
    pub timeout_ms: u64,
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for CommercialProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://us1.locationiq.com/v1/search".to_string(),
            api_key: None,
            daily_quota: 5_000,
            requests_per_second: 2.0,
            burst_size: 10,
            timeout_ms: 10_000,
            breaker_threshold: 5,
            breaker_cooldown_secs: 60,
        }
    }
}

impl GeocoderConfig {
    /// Load from a TOML file, then apply env overrides. A missing path means
    /// defaults; a present but unreadable/invalid file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)?;
                toml::from_str(&raw).map_err(|e| GeoError::Config {
                    message: format!("{}: {}", p.display(), e),
                })?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Env vars take precedence over file values for the credential and the
    /// cache location, so deployments never write secrets into the TOML.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(COMMERCIAL_API_KEY_ENV) {
            if !key.is_empty() {
                self.providers.commercial.api_key = Some(key);
            }
        }
        if let Ok(path) = std::env::var(CACHE_PATH_ENV) {
            if !path.is_empty() {
                self.cache.path = Some(PathBuf::from(path));
            }
        }
    }
}
