//! The hierarchical geocoder: cache-first lookup, ordered provider chain
//! with retry/backoff, bounded-concurrency batch execution, statistics.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::GeocodeCache;
use crate::common::error::Result;
use crate::config::GeocoderConfig;
use crate::domain::{GeocodeResult, GeocodeStatus, ProviderId};
use crate::observability::metrics;
use crate::parsing::{normalize, AddressParser};
use crate::providers::{CommercialProvider, GeocodeProvider, OsmProvider, QuotaSnapshot};

/// Ceiling on a single rate-limit backoff sleep, so a pathological hint
/// cannot stall a request indefinitely.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Composes the cache, rate limiters, circuit breakers, and provider chain
/// into a single-request and batch-request API.
///
/// Providers are owned and injected at construction; there is no ambient
/// state, so tests substitute fakes freely via [`Self::with_providers`].
pub struct HierarchicalGeocoder {
    parser: AddressParser,
    cache: Option<GeocodeCache>,
    providers: Vec<Arc<dyn GeocodeProvider>>,
    max_retries: u32,
    batch_pause: Duration,
    stats: Mutex<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    total_requests: u64,
    cache_hits: u64,
    failures: u64,
    provider_success: HashMap<ProviderId, u64>,
}

/// Point-in-time observability snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct GeocoderStats {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    /// Successful resolutions per provider id.
    pub provider_success: HashMap<String, u64>,
    /// Current breaker position per provider id.
    pub breaker_states: HashMap<String, String>,
    /// Metering usage of the commercial provider, when configured.
    pub commercial_quota: Option<QuotaSnapshot>,
}

impl HierarchicalGeocoder {
    /// Wire the real provider chain from configuration: the free community
    /// service first, the commercial service behind it when a credential is
    /// present.
    pub fn new(config: GeocoderConfig) -> Result<Self> {
        let mut providers: Vec<Arc<dyn GeocodeProvider>> =
            vec![Arc::new(OsmProvider::new(&config.providers.osm, config.bounding_box)?)];
        match CommercialProvider::from_config(&config.providers.commercial, config.bounding_box)? {
            Some(commercial) => providers.push(Arc::new(commercial)),
            None => info!("no commercial credential configured; free provider only"),
        }
        Ok(Self::with_providers(config, providers))
    }

    /// Wire an arbitrary provider chain. This is the seam tests use to
    /// substitute deterministic fakes.
    pub fn with_providers(
        config: GeocoderConfig,
        providers: Vec<Arc<dyn GeocodeProvider>>,
    ) -> Self {
        let cache = if config.geocoder.cache_enabled {
            match &config.cache.path {
                Some(path) => {
                    let ttl = Duration::from_secs(config.cache.ttl_days * 24 * 60 * 60);
                    match GeocodeCache::open(path, ttl) {
                        Ok(cache) => Some(cache),
                        Err(e) => {
                            // Cache trouble must never take geocoding down.
                            warn!("cache unavailable, continuing without: {}", e);
                            None
                        }
                    }
                }
                None => {
                    debug!("no cache path configured; caching disabled");
                    None
                }
            }
        } else {
            None
        };

        Self {
            parser: AddressParser::new(config.default_region.clone()),
            cache,
            providers,
            max_retries: config.geocoder.max_retries,
            batch_pause: Duration::from_millis(config.geocoder.batch_pause_ms),
            stats: Mutex::new(StatsInner::default()),
        }
    }

    /// Resolve one address. Total: every outcome, including an empty input
    /// or a fully failed provider chain, is a status-tagged result.
    pub async fn geocode(&self, address: &str) -> GeocodeResult {
        let started = Instant::now();
        metrics::geocode::request();
        {
            let mut stats = self.stats.lock().expect("stats lock poisoned");
            stats.total_requests += 1;
        }

        let trimmed = address.trim();
        if trimmed.is_empty() {
            self.note_failure();
            return self.failed_result(started);
        }

        let normalized = normalize(trimmed);
        if let Some(cache) = &self.cache {
            if let Some(mut hit) = cache.get(&normalized) {
                debug!("cache hit for '{}'", normalized);
                metrics::cache::hit();
                metrics::geocode::success();
                {
                    let mut stats = self.stats.lock().expect("stats lock poisoned");
                    stats.cache_hits += 1;
                }
                hit.response_time_ms = started.elapsed().as_millis() as u64;
                return hit;
            }
            metrics::cache::miss();
        }

        let parsed = self.parser.parse(trimmed);

        for provider in &self.providers {
            let mut result = self.try_provider(provider.as_ref(), &normalized).await;
            if result.status == GeocodeStatus::Success {
                result.parsed = Some(parsed);
                result.response_time_ms = started.elapsed().as_millis() as u64;
                if let Some(cache) = &self.cache {
                    cache.put(&normalized, &result);
                    metrics::cache::write();
                }
                {
                    let mut stats = self.stats.lock().expect("stats lock poisoned");
                    *stats.provider_success.entry(result.provider).or_insert(0) += 1;
                }
                metrics::geocode::success();
                metrics::geocode::duration(started.elapsed().as_secs_f64());
                return result;
            }
            debug!(
                "provider {} gave up on '{}' with status {:?}",
                provider.id(),
                normalized,
                result.status
            );
        }

        warn!("no provider resolved '{}'", normalized);
        self.note_failure();
        let mut result = self.failed_result(started);
        result.parsed = Some(parsed);
        result
    }

    /// One provider's slice of the request: up to `max_retries + 1`
    /// attempts. Rate-limited outcomes sleep for the provider's suggested
    /// wait and retry; failed outcomes (timeouts and transport faults fold
    /// into these) retry immediately; circuit-open and quota-exceeded
    /// outcomes are not transient and end the attempts at once.
    async fn try_provider(
        &self,
        provider: &dyn GeocodeProvider,
        address: &str,
    ) -> GeocodeResult {
        let mut last = GeocodeResult::unresolved(provider.id(), GeocodeStatus::Failed);
        for attempt in 0..=self.max_retries {
            let result = provider.geocode(address).await;
            match result.status {
                GeocodeStatus::RateLimited => {
                    last = result;
                    if attempt < self.max_retries {
                        let wait = provider.retry_after().min(MAX_BACKOFF);
                        debug!(
                            "provider {} rate limited, backing off {:?} (attempt {}/{})",
                            provider.id(),
                            wait,
                            attempt + 1,
                            self.max_retries + 1
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
                GeocodeStatus::Failed => {
                    last = result;
                }
                _ => return result,
            }
        }
        last
    }

    /// Resolve many addresses. Input is partitioned into sequential
    /// batches; within a batch up to `max_concurrency` requests run
    /// concurrently under a semaphore. Output order always matches input
    /// order, and a panicked item becomes a failed result instead of
    /// aborting the batch.
    pub async fn geocode_batch(
        self: Arc<Self>,
        addresses: &[String],
        batch_size: usize,
        max_concurrency: usize,
    ) -> Vec<GeocodeResult> {
        let run_id = Uuid::new_v4();
        let batch_size = batch_size.max(1);
        let total_batches = addresses.len().div_ceil(batch_size);
        info!(
            "batch run {} starting: {} addresses in {} batches, concurrency {}",
            run_id,
            addresses.len(),
            total_batches,
            max_concurrency.max(1)
        );
        metrics::batch::size(addresses.len());

        let mut results = Vec::with_capacity(addresses.len());
        for (index, chunk) in addresses.chunks(batch_size).enumerate() {
            let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
            let mut handles = Vec::with_capacity(chunk.len());
            for address in chunk {
                let geocoder = Arc::clone(&self);
                let semaphore = Arc::clone(&semaphore);
                let address = address.clone();
                handles.push(tokio::spawn(async move {
                    let _permit =
                        semaphore.acquire_owned().await.expect("semaphore closed");
                    geocoder.geocode(&address).await
                }));
            }
            // Awaiting handles in spawn order binds each output slot to its
            // input index no matter how completion interleaves.
            for handle in handles {
                match handle.await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        warn!("batch item fault: {}", e);
                        metrics::batch::item_fault();
                        self.note_failure();
                        results.push(GeocodeResult::unresolved(
                            self.chain_head(),
                            GeocodeStatus::Failed,
                        ));
                    }
                }
            }
            metrics::batch::processed();
            if index + 1 < total_batches && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }
        info!("batch run {} finished: {} results", run_id, results.len());
        results
    }

    /// Aggregate statistics for operational monitoring.
    pub fn stats(&self) -> GeocoderStats {
        let inner = self.stats.lock().expect("stats lock poisoned");
        let provider_success: HashMap<String, u64> = inner
            .provider_success
            .iter()
            .map(|(id, count)| (id.to_string(), *count))
            .collect();
        let successes =
            inner.cache_hits + inner.provider_success.values().sum::<u64>();
        let cache_hit_rate = if inner.total_requests > 0 {
            inner.cache_hits as f64 / inner.total_requests as f64
        } else {
            0.0
        };

        let mut breaker_states = HashMap::new();
        let mut commercial_quota = None;
        for provider in &self.providers {
            breaker_states
                .insert(provider.id().to_string(), provider.breaker_state().to_string());
            if provider.id() == ProviderId::Commercial {
                commercial_quota = provider.quota();
            }
        }

        GeocoderStats {
            total_requests: inner.total_requests,
            successes,
            failures: inner.failures,
            cache_hits: inner.cache_hits,
            cache_hit_rate,
            provider_success,
            breaker_states,
            commercial_quota,
        }
    }

    /// Delete expired cache rows; a no-op without a cache.
    pub fn purge_cache(&self) -> usize {
        match &self.cache {
            Some(cache) => {
                let purged = cache.purge_expired();
                metrics::cache::purged_rows(purged);
                purged
            }
            None => 0,
        }
    }

    fn chain_head(&self) -> ProviderId {
        self.providers.first().map(|p| p.id()).unwrap_or(ProviderId::Osm)
    }

    fn note_failure(&self) {
        metrics::geocode::failure();
        let mut stats = self.stats.lock().expect("stats lock poisoned");
        stats.failures += 1;
    }

    fn failed_result(&self, started: Instant) -> GeocodeResult {
        let mut result =
            GeocodeResult::unresolved(self.chain_head(), GeocodeStatus::Failed);
        result.response_time_ms = started.elapsed().as_millis() as u64;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_geocoder() -> Arc<HierarchicalGeocoder> {
        let mut config = GeocoderConfig::default();
        config.geocoder.cache_enabled = false;
        config.geocoder.batch_pause_ms = 0;
        Arc::new(HierarchicalGeocoder::with_providers(config, Vec::new()))
    }

    #[tokio::test]
    async fn empty_input_fails_immediately() {
        let geocoder = bare_geocoder();
        let result = geocoder.geocode("   ").await;
        assert_eq!(result.status, GeocodeStatus::Failed);
        assert!(result.coordinates.is_none());

        let stats = geocoder.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.successes, 0);
    }

    #[tokio::test]
    async fn empty_chain_reports_failure_with_parse_attached() {
        let geocoder = bare_geocoder();
        let result = geocoder.geocode("1234 N Highland Ave, Los Angeles, CA 90028").await;
        assert_eq!(result.status, GeocodeStatus::Failed);
        let parsed = result.parsed.expect("parsed components attached");
        assert_eq!(parsed.house_number.as_deref(), Some("1234"));
    }

    #[test]
    fn stats_start_at_zero() {
        let geocoder = bare_geocoder();
        let stats = geocoder.stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.cache_hit_rate, 0.0);
        assert!(stats.breaker_states.is_empty());
        assert!(stats.commercial_quota.is_none());
    }
}
