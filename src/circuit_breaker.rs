//! Per-task-class circuit breaker, implemented with lock-free atomics so the
//! hot path (admission check) never blocks on a mutex.

use crate::clock::{Clock, MonotonicClock};
use crate::error::OrchestratorError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Config per §4.2. `disabled()` yields a breaker that never trips, used for
/// task classes that opt out of circuit protection.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self { failure_threshold, recovery_timeout, half_open_max_calls: 1 }
    }

    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            recovery_timeout: Duration::from_secs(0),
            half_open_max_calls: usize::MAX,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

struct CircuitBreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            half_open_calls: AtomicUsize::new(0),
        }
    }
}

/// Gate around one task class's invocations. Cloning shares the underlying
/// atomic state (cheap `Arc` clone) so a single policy can be held by every
/// concurrent task of that class.
#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    task_class: String,
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    pub fn new(task_class: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            task_class: task_class.into(),
            state: Arc::new(CircuitBreakerState::new()),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn task_class(&self) -> &str {
        &self.task_class
    }

    pub fn state(&self) -> CircuitState {
        match self.state.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Reset to CLOSED with a clean failure count; used for operational recovery.
    pub fn reset(&self) {
        self.state.state.store(STATE_CLOSED, Ordering::Release);
        self.state.failure_count.store(0, Ordering::Release);
        self.state.opened_at_millis.store(0, Ordering::Release);
        self.state.half_open_calls.store(0, Ordering::Release);
    }

    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, OrchestratorError>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, OrchestratorError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        loop {
            let current_state = self.state.state.load(Ordering::Acquire);

            match current_state {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);

                    if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!(task_class = %self.task_class, "circuit breaker -> half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("invalid circuit breaker state transition"),
                        }
                    } else {
                        return Err(OrchestratorError::CircuitOpen {
                            task_class: self.task_class.clone(),
                        });
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return Err(OrchestratorError::CircuitOpen {
                            task_class: self.task_class.clone(),
                        });
                    }
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("invalid circuit breaker state"),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let result = operation().await;

        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }

        result
    }

    fn on_success(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_CLOSED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!(task_class = %self.task_class, "circuit breaker -> closed");
                }
            }
            STATE_CLOSED => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(STATE_HALF_OPEN, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                    tracing::warn!(task_class = %self.task_class, failures, "circuit breaker: probe failed -> open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold {
                    if self
                        .state
                        .state
                        .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.state.opened_at_millis.store(self.now_millis(), Ordering::Release);
                        tracing::error!(
                            task_class = %self.task_class,
                            failures,
                            threshold = self.config.failure_threshold,
                            "circuit breaker -> open"
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    async fn ok(counter: &Arc<AtomicUsize>) -> Result<u32, OrchestratorError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(42)
    }

    async fn fail(counter: &Arc<AtomicUsize>) -> Result<u32, OrchestratorError> {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(OrchestratorError::TaskFailed {
            task_id: "x".into(),
            message: "boom".into(),
            category: crate::error::ErrorCategory::ServerError,
        })
    }

    #[tokio::test]
    async fn starts_closed_and_admits_calls() {
        let breaker = CircuitBreakerPolicy::new("EC2_METRICS", CircuitBreakerConfig::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        let counter = Arc::new(AtomicUsize::new(0));
        let result = breaker.execute(|| ok(&counter)).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn opens_after_failure_threshold_and_rejects_without_invoking() {
        let breaker = CircuitBreakerPolicy::new(
            "S3_METRICS",
            CircuitBreakerConfig::new(2, Duration::from_secs(60)),
        );
        let counter = Arc::new(AtomicUsize::new(0));

        let _ = breaker.execute(|| fail(&counter)).await;
        let _ = breaker.execute(|| fail(&counter)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let result = breaker.execute(|| ok(&counter)).await;
        assert!(matches!(result, Err(OrchestratorError::CircuitOpen { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 2, "rejected call must not invoke the function");
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_recovery_timeout_and_recovers() {
        let clock = ManualClock::new();
        let breaker = CircuitBreakerPolicy::new(
            "RDS_METRICS",
            CircuitBreakerConfig::new(1, Duration::from_secs(1)),
        )
        .with_clock(clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let _ = breaker.execute(|| fail(&counter)).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(1_100);
        let result = breaker.execute(|| ok(&counter)).await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let clock = ManualClock::new();
        let breaker = CircuitBreakerPolicy::new(
            "LAMBDA_METRICS",
            CircuitBreakerConfig::new(1, Duration::from_millis(500)),
        )
        .with_clock(clock.clone());
        let counter = Arc::new(AtomicUsize::new(0));

        let _ = breaker.execute(|| fail(&counter)).await;
        clock.advance(600);
        let _ = breaker.execute(|| fail(&counter)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn disabled_config_never_trips() {
        let breaker = CircuitBreakerPolicy::new("REPORT_GENERATION", CircuitBreakerConfig::disabled());
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let _ = breaker.execute(|| fail(&counter)).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn reset_returns_to_closed() {
        let breaker = CircuitBreakerPolicy::new("X", CircuitBreakerConfig::new(1, Duration::from_secs(60)));
        breaker.state.state.store(STATE_OPEN, Ordering::SeqCst);
        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
