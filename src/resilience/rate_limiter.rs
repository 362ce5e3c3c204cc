use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-provider token bucket. Capacity is the burst size; tokens refill
/// continuously at the configured rate, recomputed from elapsed time on
/// every acquisition attempt. Deliberately approximate: bursts up to the
/// full capacity are tolerated.
///
/// `acquire` is non-blocking; callers that want to wait use
/// `time_until_available` as a backoff hint and sleep on their own runtime.
#[derive(Debug)]
pub struct TokenBucket {
    // tokens per second
    rate: f64,
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size.max(1));
        Self {
            rate: requests_per_second.max(f64::MIN_POSITIVE),
            capacity,
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    /// Debit `n` tokens if available. Never blocks; returns false when the
    /// bucket cannot cover the request right now.
    pub fn acquire(&self, n: u32) -> bool {
        self.acquire_at(n, Instant::now())
    }

    /// How long until `n` tokens will have accumulated. Zero when they are
    /// already available.
    pub fn time_until_available(&self, n: u32) -> Duration {
        self.time_until_available_at(n, Instant::now())
    }

    /// Time one token takes to accumulate at the configured rate.
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate)
    }

    pub(crate) fn acquire_at(&self, n: u32, now: Instant) -> bool {
        let cost = f64::from(n);
        let mut state = self.state.lock().expect("token bucket lock poisoned");
        Self::refill(&mut state, self.rate, self.capacity, now);
        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    pub(crate) fn time_until_available_at(&self, n: u32, now: Instant) -> Duration {
        let cost = f64::from(n).min(self.capacity);
        let mut state = self.state.lock().expect("token bucket lock poisoned");
        Self::refill(&mut state, self.rate, self.capacity, now);
        if state.tokens >= cost {
            return Duration::ZERO;
        }
        let deficit = cost - state.tokens;
        Duration::from_secs_f64(deficit / self.rate)
    }

    fn refill(state: &mut BucketState, rate: f64, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.last_refill = now;
    }
}
