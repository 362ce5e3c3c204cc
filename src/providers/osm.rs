use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::common::error::Result;
use crate::config::{BoundingBox, OsmProviderConfig};
use crate::domain::{GeocodeResult, GeocodeStatus, Precision, ProviderId};
use crate::observability::metrics;
use crate::providers::{preflight, GeocodeProvider, SearchHit};
use crate::resilience::{BreakerState, CircuitBreaker, TokenBucket};

/// Identify ourselves to the community service per its usage policy.
const USER_AGENT: &str = concat!("propgeo/", env!("CARGO_PKG_VERSION"));

/// Client for the free community geocoding service (Nominatim-style search
/// API). Heavily throttled upstream, so the local token bucket defaults to
/// one request per second with no burst headroom.
pub struct OsmProvider {
    client: reqwest::Client,
    base_url: String,
    bounding_box: BoundingBox,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
}

impl OsmProvider {
    pub fn new(config: &OsmProviderConfig, bounding_box: BoundingBox) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            bounding_box,
            limiter: TokenBucket::new(config.requests_per_second, config.burst_size),
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
        })
    }

    /// Translate the community service's result taxonomy into a precision
    /// tag and confidence score.
    fn classify(hit: &SearchHit) -> (Precision, f64) {
        let kind = hit.kind.as_str();
        if hit.class == "building" || matches!(kind, "house" | "building" | "residential" | "apartments") {
            return (Precision::Rooftop, 0.9);
        }
        if kind.contains("interpolation") {
            return (Precision::Interpolated, 0.75);
        }
        let importance = hit.importance.unwrap_or(0.5).clamp(0.0, 1.0);
        (Precision::Approximate, (0.45 + importance * 0.3).min(0.7))
    }

    fn outcome(&self, status: GeocodeStatus, started: Instant) -> GeocodeResult {
        let mut result = GeocodeResult::unresolved(ProviderId::Osm, status);
        result.response_time_ms = started.elapsed().as_millis() as u64;
        result
    }
}

#[async_trait]
impl GeocodeProvider for OsmProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Osm
    }

    async fn geocode(&self, address: &str) -> GeocodeResult {
        let started = Instant::now();
        if let Some(rejected) = preflight(ProviderId::Osm, &self.breaker, &self.limiter) {
            return rejected;
        }

        metrics::provider::request(ProviderId::Osm);
        let viewbox = self.bounding_box.viewbox_param();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("q", address),
                ("format", "json"),
                ("limit", "1"),
                ("viewbox", viewbox.as_str()),
                ("bounded", "1"),
            ])
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // Timeouts and transport faults are transient provider
                // ill-health; they count against the breaker.
                warn!("osm request failed: {}", e);
                self.breaker.record_failure();
                metrics::provider::failure(ProviderId::Osm);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!("osm throttled us upstream");
            self.breaker.record_failure();
            metrics::provider::rate_limited(ProviderId::Osm);
            return self.outcome(GeocodeStatus::RateLimited, started);
        }
        if !response.status().is_success() {
            warn!("osm returned status {}", response.status());
            self.breaker.record_failure();
            metrics::provider::failure(ProviderId::Osm);
            return self.outcome(GeocodeStatus::Failed, started);
        }

        let hits: Vec<SearchHit> = match response.json().await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("osm response body malformed: {}", e);
                self.breaker.record_failure();
                metrics::provider::failure(ProviderId::Osm);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };

        // The service answered; an unresolvable address is not ill-health.
        self.breaker.record_success();

        let hit = match hits.first() {
            Some(hit) => hit,
            None => {
                debug!("osm found no match for '{}'", address);
                metrics::provider::failure(ProviderId::Osm);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };
        let coordinates = match hit.coordinates() {
            Some(c) if self.bounding_box.contains(c.latitude, c.longitude) => c,
            _ => {
                debug!("osm match for '{}' fell outside the target region", address);
                metrics::provider::failure(ProviderId::Osm);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };

        let (precision, confidence) = Self::classify(hit);
        metrics::provider::success(ProviderId::Osm);
        metrics::provider::duration(ProviderId::Osm, started.elapsed().as_secs_f64());
        GeocodeResult {
            coordinates: Some(coordinates),
            formatted_address: hit.display_name.clone(),
            confidence_score: confidence,
            provider: ProviderId::Osm,
            status: GeocodeStatus::Success,
            parsed: None,
            precision: Some(precision),
            response_time_ms: started.elapsed().as_millis() as u64,
            cached: false,
            timestamp: Utc::now(),
        }
    }

    fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    fn retry_after(&self) -> Duration {
        let hint = self.limiter.time_until_available(1);
        if hint.is_zero() {
            // Upstream throttled us even though the local bucket had room;
            // wait one refill interval before trying again.
            self.limiter.refill_interval()
        } else {
            hint
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(class: &str, kind: &str, importance: Option<f64>) -> SearchHit {
        SearchHit {
            lat: "34.0".to_string(),
            lon: "-118.3".to_string(),
            display_name: String::new(),
            class: class.to_string(),
            kind: kind.to_string(),
            importance,
        }
    }

    #[test]
    fn classify_maps_buildings_to_rooftop() {
        let (precision, confidence) = OsmProvider::classify(&hit("place", "house", None));
        assert_eq!(precision, Precision::Rooftop);
        assert!(confidence >= 0.9);

        let (precision, _) = OsmProvider::classify(&hit("building", "yes", None));
        assert_eq!(precision, Precision::Rooftop);
    }

    #[test]
    fn classify_maps_interpolation() {
        let (precision, confidence) =
            OsmProvider::classify(&hit("place", "address_interpolation", None));
        assert_eq!(precision, Precision::Interpolated);
        assert!(confidence > 0.7 && confidence < 0.9);
    }

    #[test]
    fn classify_scales_approximate_with_importance() {
        let (precision, low) = OsmProvider::classify(&hit("place", "suburb", Some(0.1)));
        assert_eq!(precision, Precision::Approximate);
        let (_, high) = OsmProvider::classify(&hit("place", "suburb", Some(0.9)));
        assert!(high > low);
        assert!(high <= 0.7);
    }

    #[test]
    fn search_hit_coordinates_parse_from_strings() {
        let parsed = hit("place", "house", None).coordinates().unwrap();
        assert_eq!(parsed.latitude, 34.0);
        assert_eq!(parsed.longitude, -118.3);

        let bad = SearchHit {
            lat: "not-a-number".to_string(),
            lon: "-118.3".to_string(),
            display_name: String::new(),
            class: String::new(),
            kind: String::new(),
            importance: None,
        };
        assert!(bad.coordinates().is_none());
    }
}
