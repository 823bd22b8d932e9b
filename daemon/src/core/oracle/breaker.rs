// Circuit breaker guarding the external price provider.
//
// Closed while calls succeed; opens after a run of consecutive failures and
// rejects attempts for a cooldown window; then admits a single half-open
// probe whose outcome closes or re-opens it.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::config::{BREAKER_FAILURE_THRESHOLD, BREAKER_OPEN_SECS};

#[derive(Debug, Default)]
struct BreakerInner {
    consecutive_failures: u32,
    last_failure_time: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    open_for: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            BREAKER_FAILURE_THRESHOLD,
            Duration::from_secs(BREAKER_OPEN_SECS),
        )
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner::default()),
            failure_threshold,
            open_for,
        }
    }

    /// Whether a provider call may be attempted right now.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.opened_at {
            None => true,
            Some(opened_at) => {
                if opened_at.elapsed() >= self.open_for && !inner.probe_in_flight {
                    // Half-open: let exactly one probe through
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures += 1;
        inner.last_failure_time = Some(Instant::now());
        inner.probe_in_flight = false;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .consecutive_failures
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .expect("breaker lock poisoned")
            .opened_at
            .is_some()
    }
}
