use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_after: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, success_threshold: 3, reset_after: Duration::from_secs(30) }
    }
}

/// Stops calling the model after repeated transient failures and lets a probe
/// through once `reset_after` has passed.
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure: Mutex<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure: Mutex::new(None),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_allowed(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure
                    .lock()
                    .ok()
                    .and_then(|guard| *guard)
                    .is_some_and(|last| last.elapsed() >= self.config.reset_after);
                if cooled_down {
                    self.state.store(CircuitState::HalfOpen as u8, Ordering::SeqCst);
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        if self.state() == CircuitState::HalfOpen {
            let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
            if successes >= self.config.success_threshold {
                self.state.store(CircuitState::Closed as u8, Ordering::SeqCst);
                self.success_count.store(0, Ordering::SeqCst);
            }
        }
    }

    pub fn record_failure(&self) {
        self.success_count.store(0, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_failure.lock() {
            *guard = Some(Instant::now());
        }

        // A failed probe reopens immediately.
        if self.state() == CircuitState::HalfOpen {
            self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
            return;
        }

        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
            if self.state() != CircuitState::Open {
                tracing::warn!(
                    event_name = "llm.circuit.opened",
                    failures,
                    "model circuit breaker opened"
                );
            }
            self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Relaxed))
            .field("success_count", &self.success_count.load(Ordering::Relaxed))
            .finish()
    }
}
