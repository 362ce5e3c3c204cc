//! Provider clients implementing the uniform geocode contract.
//!
//! The provider set is closed: the orchestrator composes a fixed chain of
//! `GeocodeProvider` implementations rather than dispatching on names. Each
//! client exclusively owns its rate limiter and circuit breaker; callers
//! only ever see status-tagged `GeocodeResult`s.

pub mod commercial;
pub mod osm;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::{Coordinates, GeocodeResult, GeocodeStatus, ProviderId};
use crate::observability::metrics;
use crate::resilience::{BreakerState, CircuitBreaker, TokenBucket};

pub use commercial::CommercialProvider;
pub use osm::OsmProvider;

/// Uniform geocode contract. One call, one status-tagged result; providers
/// never surface transport faults to callers.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn geocode(&self, address: &str) -> GeocodeResult;

    /// Current breaker position, for the statistics snapshot.
    fn breaker_state(&self) -> BreakerState;

    /// Suggested wait before retrying after a rate-limited outcome.
    fn retry_after(&self) -> Duration;

    /// Metering usage, for providers that have any.
    fn quota(&self) -> Option<QuotaSnapshot> {
        None
    }
}

/// Point-in-time metering usage of a commercial provider.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct QuotaSnapshot {
    pub used: u64,
    pub daily_limit: u64,
}

/// One result row from a Nominatim-style search API. Coordinates arrive as
/// strings on the wire.
#[derive(Debug, Deserialize)]
pub(crate) struct SearchHit {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub class: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub importance: Option<f64>,
}

impl SearchHit {
    pub(crate) fn coordinates(&self) -> Option<Coordinates> {
        let latitude = self.lat.parse().ok()?;
        let longitude = self.lon.parse().ok()?;
        Some(Coordinates { latitude, longitude })
    }
}

/// Breaker and limiter gate shared by every client: a cheap short-circuit
/// before any network work. A local limiter refusal is not a breaker
/// failure; the provider was never called.
pub(crate) fn preflight(
    id: ProviderId,
    breaker: &CircuitBreaker,
    limiter: &TokenBucket,
) -> Option<GeocodeResult> {
    if !breaker.call_allowed() {
        metrics::provider::circuit_open(id);
        return Some(GeocodeResult::unresolved(id, GeocodeStatus::CircuitOpen));
    }
    if !limiter.acquire(1) {
        metrics::provider::rate_limited(id);
        return Some(GeocodeResult::unresolved(id, GeocodeStatus::RateLimited));
    }
    None
}
