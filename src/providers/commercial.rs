use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::StatusCode;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::common::error::Result;
use crate::config::{BoundingBox, CommercialProviderConfig};
use crate::domain::{GeocodeResult, GeocodeStatus, Precision, ProviderId};
use crate::observability::metrics;
use crate::providers::{preflight, GeocodeProvider, QuotaSnapshot, SearchHit};
use crate::resilience::{BreakerState, CircuitBreaker, TokenBucket};

/// Client for the metered commercial geocoding service. Key-authenticated
/// and quota-limited per calendar day; the client meters its own usage so
/// an exhausted quota never burns an HTTP round trip.
///
/// Quota exhaustion is not a transient fault: it produces
/// `QuotaExceeded` without touching the circuit breaker.
pub struct CommercialProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bounding_box: BoundingBox,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    daily_quota: u64,
    usage: Mutex<QuotaUsage>,
}

#[derive(Debug)]
struct QuotaUsage {
    day: NaiveDate,
    used: u64,
}

impl CommercialProvider {
    /// Returns `Ok(None)` when no credential is configured: the provider is
    /// disabled and the chain degrades to the free tier only.
    pub fn from_config(
        config: &CommercialProviderConfig,
        bounding_box: BoundingBox,
    ) -> Result<Option<Self>> {
        let api_key = match &config.api_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => return Ok(None),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Some(Self {
            client,
            base_url: config.base_url.clone(),
            api_key,
            bounding_box,
            limiter: TokenBucket::new(config.requests_per_second, config.burst_size),
            breaker: CircuitBreaker::new(
                config.breaker_threshold,
                Duration::from_secs(config.breaker_cooldown_secs),
            ),
            daily_quota: config.daily_quota,
            usage: Mutex::new(QuotaUsage { day: Utc::now().date_naive(), used: 0 }),
        }))
    }

    /// Debit one metered call, rolling the counter over at midnight UTC.
    /// Returns false when today's quota is already spent.
    fn try_consume_quota(&self) -> bool {
        let mut usage = self.usage.lock().expect("quota lock poisoned");
        let today = Utc::now().date_naive();
        if usage.day != today {
            usage.day = today;
            usage.used = 0;
        }
        if usage.used >= self.daily_quota {
            return false;
        }
        usage.used += 1;
        true
    }

    /// The commercial service resolves more precisely than the community
    /// one, so its tiers score higher.
    fn classify(hit: &SearchHit) -> (Precision, f64) {
        let kind = hit.kind.as_str();
        if hit.class == "building" || matches!(kind, "house" | "building" | "residential" | "apartments") {
            return (Precision::Rooftop, 0.95);
        }
        if kind.contains("interpolation") {
            return (Precision::Interpolated, 0.85);
        }
        let importance = hit.importance.unwrap_or(0.5).clamp(0.0, 1.0);
        (Precision::Approximate, (0.5 + importance * 0.3).min(0.75))
    }

    fn outcome(&self, status: GeocodeStatus, started: Instant) -> GeocodeResult {
        let mut result = GeocodeResult::unresolved(ProviderId::Commercial, status);
        result.response_time_ms = started.elapsed().as_millis() as u64;
        result
    }
}

#[async_trait]
impl GeocodeProvider for CommercialProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Commercial
    }

    async fn geocode(&self, address: &str) -> GeocodeResult {
        let started = Instant::now();
        if let Some(rejected) = preflight(ProviderId::Commercial, &self.breaker, &self.limiter) {
            return rejected;
        }
        if !self.try_consume_quota() {
            debug!("commercial quota exhausted for the day");
            metrics::provider::quota_exceeded(ProviderId::Commercial);
            return self.outcome(GeocodeStatus::QuotaExceeded, started);
        }

        metrics::provider::request(ProviderId::Commercial);
        let viewbox = self.bounding_box.viewbox_param();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("key", self.api_key.as_str()),
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
                warn!("commercial request failed: {}", e);
                self.breaker.record_failure();
                metrics::provider::failure(ProviderId::Commercial);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                warn!("commercial provider throttled us upstream");
                self.breaker.record_failure();
                metrics::provider::rate_limited(ProviderId::Commercial);
                return self.outcome(GeocodeStatus::RateLimited, started);
            }
            // Metering rejections from the vendor's side of the ledger.
            StatusCode::PAYMENT_REQUIRED | StatusCode::FORBIDDEN => {
                warn!("commercial provider rejected the call as over quota");
                metrics::provider::quota_exceeded(ProviderId::Commercial);
                return self.outcome(GeocodeStatus::QuotaExceeded, started);
            }
            status if !status.is_success() => {
                warn!("commercial provider returned status {}", status);
                self.breaker.record_failure();
                metrics::provider::failure(ProviderId::Commercial);
                return self.outcome(GeocodeStatus::Failed, started);
            }
            _ => {}
        }

        let hits: Vec<SearchHit> = match response.json().await {
            Ok(hits) => hits,
            Err(e) => {
                warn!("commercial response body malformed: {}", e);
                self.breaker.record_failure();
                metrics::provider::failure(ProviderId::Commercial);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };

        self.breaker.record_success();

        let hit = match hits.first() {
            Some(hit) => hit,
            None => {
                debug!("commercial provider found no match for '{}'", address);
                metrics::provider::failure(ProviderId::Commercial);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };
        let coordinates = match hit.coordinates() {
            Some(c) if self.bounding_box.contains(c.latitude, c.longitude) => c,
            _ => {
                debug!("commercial match for '{}' fell outside the target region", address);
                metrics::provider::failure(ProviderId::Commercial);
                return self.outcome(GeocodeStatus::Failed, started);
            }
        };

        let (precision, confidence) = Self::classify(hit);
        metrics::provider::success(ProviderId::Commercial);
        metrics::provider::duration(ProviderId::Commercial, started.elapsed().as_secs_f64());
        GeocodeResult {
            coordinates: Some(coordinates),
            formatted_address: hit.display_name.clone(),
            confidence_score: confidence,
            provider: ProviderId::Commercial,
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
            self.limiter.refill_interval()
        } else {
            hint
        }
    }

    fn quota(&self) -> Option<QuotaSnapshot> {
        let usage = self.usage.lock().expect("quota lock poisoned");
        Some(QuotaSnapshot { used: usage.used, daily_limit: self.daily_quota })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_quota(daily_quota: u64) -> CommercialProvider {
        let config = CommercialProviderConfig {
            api_key: Some("test-key".to_string()),
            daily_quota,
            ..Default::default()
        };
        CommercialProvider::from_config(&config, BoundingBox::default())
            .unwrap()
            .expect("provider enabled")
    }

    #[test]
    fn missing_credential_disables_the_provider() {
        let config = CommercialProviderConfig::default();
        assert!(CommercialProvider::from_config(&config, BoundingBox::default())
            .unwrap()
            .is_none());

        let config =
            CommercialProviderConfig { api_key: Some(String::new()), ..Default::default() };
        assert!(CommercialProvider::from_config(&config, BoundingBox::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn quota_meters_per_call_and_reports_usage() {
        let provider = provider_with_quota(2);
        assert!(provider.try_consume_quota());
        assert!(provider.try_consume_quota());
        assert!(!provider.try_consume_quota());

        let snapshot = provider.quota().unwrap();
        assert_eq!(snapshot.used, 2);
        assert_eq!(snapshot.daily_limit, 2);
    }

    #[tokio::test]
    async fn exhausted_quota_short_circuits_without_breaker_penalty() {
        let provider = provider_with_quota(0);
        let result = provider.geocode("1234 N HIGHLAND AVE").await;
        assert_eq!(result.status, GeocodeStatus::QuotaExceeded);
        assert_eq!(provider.breaker_state(), BreakerState::Closed);
        assert_eq!(provider.breaker.failure_count(), 0);
    }

    #[test]
    fn quota_counter_rolls_over_at_midnight() {
        let provider = provider_with_quota(1);
        assert!(provider.try_consume_quota());
        assert!(!provider.try_consume_quota());
        {
            let mut usage = provider.usage.lock().unwrap();
            usage.day = usage.day.pred_opt().unwrap();
        }
        assert!(provider.try_consume_quota());
    }

    #[test]
    fn classify_scores_higher_than_community_tiers() {
        let hit = SearchHit {
            lat: "34.0".to_string(),
            lon: "-118.3".to_string(),
            display_name: String::new(),
            class: "place".to_string(),
            kind: "house".to_string(),
            importance: None,
        };
        let (precision, confidence) = CommercialProvider::classify(&hit);
        assert_eq!(precision, Precision::Rooftop);
        assert!(confidence >= 0.95);
    }
}
