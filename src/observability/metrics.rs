//! Metrics catalog for the geocoding core.
//!
//! Provides a straightforward API for recording metrics using the standard
//! Prometheus naming conventions. All names live in one enum so there are
//! no magic strings at call sites.

use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::fmt;

/// Enum representing all metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Geocode request lifecycle
    GeocodeRequests,
    GeocodeSuccess,
    GeocodeFailures,
    GeocodeDuration,

    // Cache
    CacheHits,
    CacheMisses,
    CacheWrites,
    CachePurgedRows,

    // Providers
    ProviderRequests,
    ProviderSuccess,
    ProviderFailures,
    ProviderRateLimited,
    ProviderCircuitOpen,
    ProviderQuotaExceeded,
    ProviderDuration,

    // Batch execution
    BatchesProcessed,
    BatchSize,
    BatchItemFaults,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricName::GeocodeRequests => "propgeo_geocode_requests_total",
            MetricName::GeocodeSuccess => "propgeo_geocode_success_total",
            MetricName::GeocodeFailures => "propgeo_geocode_failures_total",
            MetricName::GeocodeDuration => "propgeo_geocode_duration_seconds",

            MetricName::CacheHits => "propgeo_cache_hits_total",
            MetricName::CacheMisses => "propgeo_cache_misses_total",
            MetricName::CacheWrites => "propgeo_cache_writes_total",
            MetricName::CachePurgedRows => "propgeo_cache_purged_rows_total",

            MetricName::ProviderRequests => "propgeo_provider_requests_total",
            MetricName::ProviderSuccess => "propgeo_provider_success_total",
            MetricName::ProviderFailures => "propgeo_provider_failures_total",
            MetricName::ProviderRateLimited => "propgeo_provider_rate_limited_total",
            MetricName::ProviderCircuitOpen => "propgeo_provider_circuit_open_total",
            MetricName::ProviderQuotaExceeded => "propgeo_provider_quota_exceeded_total",
            MetricName::ProviderDuration => "propgeo_provider_duration_seconds",

            MetricName::BatchesProcessed => "propgeo_batches_processed_total",
            MetricName::BatchSize => "propgeo_batch_size",
            MetricName::BatchItemFaults => "propgeo_batch_item_faults_total",
        };
        write!(f, "{}", name)
    }
}

static EXPORTER: OnceCell<()> = OnceCell::new();

/// Install the Prometheus exporter. Safe to call more than once; failure to
/// bind the exporter is logged and recording becomes a no-op.
pub fn init_metrics() {
    EXPORTER.get_or_init(|| {
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("metrics exporter not installed: {}", e);
        }
    });
}

pub mod geocode {
    use super::MetricName;

    pub fn request() {
        metrics::counter!(MetricName::GeocodeRequests.to_string()).increment(1);
    }

    pub fn success() {
        metrics::counter!(MetricName::GeocodeSuccess.to_string()).increment(1);
    }

    pub fn failure() {
        metrics::counter!(MetricName::GeocodeFailures.to_string()).increment(1);
    }

    pub fn duration(seconds: f64) {
        metrics::histogram!(MetricName::GeocodeDuration.to_string()).record(seconds);
    }
}

pub mod cache {
    use super::MetricName;

    pub fn hit() {
        metrics::counter!(MetricName::CacheHits.to_string()).increment(1);
    }

    pub fn miss() {
        metrics::counter!(MetricName::CacheMisses.to_string()).increment(1);
    }

    pub fn write() {
        metrics::counter!(MetricName::CacheWrites.to_string()).increment(1);
    }

    pub fn purged_rows(count: usize) {
        metrics::counter!(MetricName::CachePurgedRows.to_string()).increment(count as u64);
    }
}

pub mod provider {
    use super::MetricName;
    use crate::domain::ProviderId;

    pub fn request(id: ProviderId) {
        metrics::counter!(MetricName::ProviderRequests.to_string(), "provider" => id.to_string())
            .increment(1);
    }

    pub fn success(id: ProviderId) {
        metrics::counter!(MetricName::ProviderSuccess.to_string(), "provider" => id.to_string())
            .increment(1);
    }

    pub fn failure(id: ProviderId) {
        metrics::counter!(MetricName::ProviderFailures.to_string(), "provider" => id.to_string())
            .increment(1);
    }

    pub fn rate_limited(id: ProviderId) {
        metrics::counter!(MetricName::ProviderRateLimited.to_string(), "provider" => id.to_string())
            .increment(1);
    }

    pub fn circuit_open(id: ProviderId) {
        metrics::counter!(MetricName::ProviderCircuitOpen.to_string(), "provider" => id.to_string())
            .increment(1);
    }

    pub fn quota_exceeded(id: ProviderId) {
        metrics::counter!(MetricName::ProviderQuotaExceeded.to_string(), "provider" => id.to_string())
            .increment(1);
    }

    pub fn duration(id: ProviderId, seconds: f64) {
        metrics::histogram!(MetricName::ProviderDuration.to_string(), "provider" => id.to_string())
            .record(seconds);
    }
}

pub mod batch {
    use super::MetricName;

    pub fn processed() {
        metrics::counter!(MetricName::BatchesProcessed.to_string()).increment(1);
    }

    pub fn size(count: usize) {
        metrics::histogram!(MetricName::BatchSize.to_string()).record(count as f64);
    }

    pub fn item_fault() {
        metrics::counter!(MetricName::BatchItemFaults.to_string()).increment(1);
    }
}
