//! End-to-end orchestrator behavior against deterministic fake providers:
//! cache short-circuiting, provider fallback ordering, retry policy, batch
//! ordering, and fault isolation.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use propgeo::domain::{Coordinates, GeocodeResult, GeocodeStatus, Precision, ProviderId};
use propgeo::providers::GeocodeProvider;
use propgeo::resilience::BreakerState;
use propgeo::{GeocoderConfig, HierarchicalGeocoder};

fn success_result(id: ProviderId, address: &str) -> GeocodeResult {
    GeocodeResult {
        coordinates: Some(Coordinates { latitude: 34.0522, longitude: -118.2437 }),
        formatted_address: address.to_string(),
        confidence_score: 0.9,
        provider: id,
        status: GeocodeStatus::Success,
        parsed: None,
        precision: Some(Precision::Rooftop),
        response_time_ms: 1,
        cached: false,
        timestamp: Utc::now(),
    }
}

/// Replays a scripted sequence of statuses, then sits on a default.
struct ScriptedProvider {
    id: ProviderId,
    script: Mutex<VecDeque<GeocodeStatus>>,
    default: GeocodeStatus,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(id: ProviderId, script: Vec<GeocodeStatus>, default: GeocodeStatus) -> Self {
        Self { id, script: Mutex::new(script.into()), default, calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GeocodeProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn geocode(&self, address: &str) -> GeocodeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self.script.lock().unwrap().pop_front().unwrap_or(self.default);
        match status {
            GeocodeStatus::Success => success_result(self.id, address),
            other => GeocodeResult::unresolved(self.id, other),
        }
    }

    fn breaker_state(&self) -> BreakerState {
        BreakerState::Closed
    }

    fn retry_after(&self) -> Duration {
        Duration::ZERO
    }
}

/// Completes later for lower-numbered addresses, so completion order is the
/// reverse of submission order.
struct ReverseLatencyProvider;

#[async_trait]
impl GeocodeProvider for ReverseLatencyProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Osm
    }

    async fn geocode(&self, address: &str) -> GeocodeResult {
        let index: u64 = address
            .rsplit(' ')
            .next()
            .and_then(|token| token.parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(60 * (3 - index.min(3)))).await;
        success_result(ProviderId::Osm, address)
    }

    fn breaker_state(&self) -> BreakerState {
        BreakerState::Closed
    }

    fn retry_after(&self) -> Duration {
        Duration::ZERO
    }
}

/// Panics on a marker address; everything else succeeds.
struct PanickyProvider;

#[async_trait]
impl GeocodeProvider for PanickyProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Osm
    }

    async fn geocode(&self, address: &str) -> GeocodeResult {
        if address.contains("BOOM") {
            panic!("provider blew up on purpose");
        }
        success_result(ProviderId::Osm, address)
    }

    fn breaker_state(&self) -> BreakerState {
        BreakerState::Closed
    }

    fn retry_after(&self) -> Duration {
        Duration::ZERO
    }
}

fn test_config() -> GeocoderConfig {
    let mut config = GeocoderConfig::default();
    config.geocoder.cache_enabled = false;
    config.geocoder.max_retries = 2;
    config.geocoder.batch_pause_ms = 0;
    config
}

fn geocoder_with(
    config: GeocoderConfig,
    providers: Vec<Arc<dyn GeocodeProvider>>,
) -> Arc<HierarchicalGeocoder> {
    Arc::new(HierarchicalGeocoder::with_providers(config, providers))
}

#[tokio::test]
async fn second_lookup_is_served_entirely_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.geocoder.cache_enabled = true;
    config.cache.path = Some(dir.path().join("geocode.db"));

    let provider =
        Arc::new(ScriptedProvider::new(ProviderId::Osm, vec![], GeocodeStatus::Success));
    let geocoder = geocoder_with(config, vec![provider.clone()]);

    let first = geocoder.geocode("1234 N Highland Ave, Los Angeles, CA 90028").await;
    assert_eq!(first.status, GeocodeStatus::Success);
    assert!(!first.cached);
    assert_eq!(first.provider, ProviderId::Osm);
    assert_eq!(provider.calls(), 1);

    let second = geocoder.geocode("1234 N Highland Ave, Los Angeles, CA 90028").await;
    assert_eq!(second.status, GeocodeStatus::Success);
    assert!(second.cached);
    assert_eq!(second.provider, ProviderId::Cache);
    assert_eq!(second.coordinates, first.coordinates);
    // Zero additional provider calls were issued.
    assert_eq!(provider.calls(), 1);

    let stats = geocoder.stats();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.total_requests, 2);
}

#[tokio::test]
async fn chain_falls_back_to_secondary_after_primary_exhausts_retries() {
    let primary =
        Arc::new(ScriptedProvider::new(ProviderId::Osm, vec![], GeocodeStatus::Failed));
    let secondary = Arc::new(ScriptedProvider::new(
        ProviderId::Commercial,
        vec![],
        GeocodeStatus::Success,
    ));
    let geocoder =
        geocoder_with(test_config(), vec![primary.clone(), secondary.clone()]);

    let result = geocoder.geocode("500 W 2nd St, Los Angeles, CA").await;
    assert_eq!(result.status, GeocodeStatus::Success);
    assert_eq!(result.provider, ProviderId::Commercial);
    // Transient failures consume the whole retry budget on the primary.
    assert_eq!(primary.calls(), 3);
    assert_eq!(secondary.calls(), 1);

    let stats = geocoder.stats();
    assert_eq!(stats.provider_success.get("commercial"), Some(&1));
    assert_eq!(stats.breaker_states.get("osm").map(String::as_str), Some("closed"));
}

#[tokio::test]
async fn rate_limited_attempts_back_off_and_retry() {
    let provider = Arc::new(ScriptedProvider::new(
        ProviderId::Osm,
        vec![GeocodeStatus::RateLimited],
        GeocodeStatus::Success,
    ));
    let geocoder = geocoder_with(test_config(), vec![provider.clone()]);

    let result = geocoder.geocode("6000 Sunset Blvd, Los Angeles, CA").await;
    assert_eq!(result.status, GeocodeStatus::Success);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn circuit_open_is_terminal_for_the_provider() {
    let open = Arc::new(ScriptedProvider::new(
        ProviderId::Osm,
        vec![],
        GeocodeStatus::CircuitOpen,
    ));
    let backup = Arc::new(ScriptedProvider::new(
        ProviderId::Commercial,
        vec![],
        GeocodeStatus::Success,
    ));
    let geocoder = geocoder_with(test_config(), vec![open.clone(), backup.clone()]);

    let result = geocoder.geocode("111 S Grand Ave, Los Angeles, CA").await;
    assert_eq!(result.status, GeocodeStatus::Success);
    assert_eq!(result.provider, ProviderId::Commercial);
    // No retries against a deliberately bypassed provider.
    assert_eq!(open.calls(), 1);
}

#[tokio::test]
async fn quota_exhaustion_is_not_retried_within_the_call() {
    let metered = Arc::new(ScriptedProvider::new(
        ProviderId::Commercial,
        vec![],
        GeocodeStatus::QuotaExceeded,
    ));
    let geocoder = geocoder_with(test_config(), vec![metered.clone()]);

    let result = geocoder.geocode("333 S Hope St, Los Angeles, CA").await;
    assert_eq!(result.status, GeocodeStatus::Failed);
    assert_eq!(metered.calls(), 1);

    let stats = geocoder.stats();
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn batch_results_keep_input_order_regardless_of_completion_order() {
    let geocoder =
        geocoder_with(test_config(), vec![Arc::new(ReverseLatencyProvider)]);

    let addresses: Vec<String> =
        (0..3).map(|i| format!("100 Spring St {}", i)).collect();
    let results = Arc::clone(&geocoder).geocode_batch(&addresses, 10, 3).await;

    assert_eq!(results.len(), 3);
    for (index, result) in results.iter().enumerate() {
        assert_eq!(result.status, GeocodeStatus::Success);
        assert!(
            result.formatted_address.ends_with(&index.to_string()),
            "slot {} held '{}'",
            index,
            result.formatted_address
        );
    }
}

#[tokio::test]
async fn batch_isolates_item_faults() {
    let geocoder = geocoder_with(test_config(), vec![Arc::new(PanickyProvider)]);

    let addresses = vec![
        "1 First St".to_string(),
        "2 BOOM Ave".to_string(),
        "3 Third St".to_string(),
    ];
    let results = Arc::clone(&geocoder).geocode_batch(&addresses, 10, 2).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].status, GeocodeStatus::Success);
    assert_eq!(results[1].status, GeocodeStatus::Failed);
    assert_eq!(results[2].status, GeocodeStatus::Success);
}

#[tokio::test]
async fn batch_partitions_into_sequential_batches() {
    let provider =
        Arc::new(ScriptedProvider::new(ProviderId::Osm, vec![], GeocodeStatus::Success));
    let geocoder = geocoder_with(test_config(), vec![provider.clone()]);

    let addresses: Vec<String> =
        (0..5).map(|i| format!("{} Figueroa St", 100 + i)).collect();
    let results = Arc::clone(&geocoder).geocode_batch(&addresses, 2, 2).await;

    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.status == GeocodeStatus::Success));
    assert_eq!(provider.calls(), 5);

    let stats = geocoder.stats();
    assert_eq!(stats.total_requests, 5);
    assert_eq!(stats.successes, 5);
}
