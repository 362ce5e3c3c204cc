use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker positions.
///
/// Closed → Open once `failure_count` reaches the threshold;
/// Open → HalfOpen after the cooldown, admitting exactly one probe;
/// HalfOpen → Closed on probe success, back to Open on probe failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Per-provider failure-isolation guard. One instance per provider client;
/// all mutation goes through the single internal lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether a call may proceed. While Open, the first check after the
    /// cooldown flips to HalfOpen and admits a single probe; further checks
    /// are rejected until the probe reports back.
    pub fn call_allowed(&self) -> bool {
        self.call_allowed_at(Instant::now())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Current position without side effects. An expired cooldown still
    /// reads Open here; only `call_allowed` performs the half-open
    /// transition.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("circuit breaker lock poisoned").state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().expect("circuit breaker lock poisoned").failure_count
    }

    pub(crate) fn call_allowed_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at) >= self.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub(crate) fn record_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure = Some(now);
        if inner.state == BreakerState::HalfOpen || inner.failure_count >= self.threshold {
            inner.state = BreakerState::Open;
        }
    }
}
