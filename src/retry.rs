//! Retry engine: error classification, decision rules, and exponential
//! backoff with jitter around a single task invocation.

use crate::backoff::Backoff;
use crate::cancellation::CancellationToken;
use crate::error::{ErrorCategory, OrchestratorError, RetryDecision, TaskError};
use crate::jitter::Jitter;
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A predicate over a task error, used to force a retry/stop decision ahead
/// of the category-based default.
pub type RetryPredicate = Arc<dyn Fn(&dyn TaskError) -> bool + Send + Sync>;

/// Per-task-class retry configuration (§4.1).
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    retryable_exceptions: Option<RetryPredicate>,
    non_retryable_exceptions: Option<RetryPredicate>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Rules 2-6 of §4.1 (rule 1, the attempt-count check, is applied by the
    /// caller since it needs the running attempt count, not just the error).
    fn classify(&self, err: &dyn TaskError) -> RetryDecision {
        if let Some(pred) = &self.non_retryable_exceptions {
            if pred(err) {
                return RetryDecision::Stop;
            }
        }
        if let Some(pred) = &self.retryable_exceptions {
            if pred(err) {
                return RetryDecision::RetryWithBackoff;
            }
        }
        if let Some(retryable) = err.retryable() {
            return if retryable { RetryDecision::RetryWithBackoff } else { RetryDecision::Stop };
        }
        match err.category() {
            ErrorCategory::ClientError | ErrorCategory::Validation => RetryDecision::Stop,
            _ => RetryDecision::RetryWithBackoff,
        }
    }

    /// Delay before the attempt that follows a zero-indexed failed attempt.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.jitter.apply(self.backoff.delay(attempt))
    }

    /// Run `operation` (receiving the 1-indexed attempt number) until it
    /// succeeds, a non-retryable error is hit, or retries are exhausted.
    /// A backoff sleep is raced against `cancellation`, so the engine never
    /// sleeps through a cancellation signal (§4.1, §5).
    pub async fn execute<T, E, Fut, Op>(
        &self,
        task_id: &str,
        cancellation: CancellationToken,
        mut operation: Op,
    ) -> Result<T, OrchestratorError>
    where
        E: TaskError,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut(usize) -> Fut + Send,
    {
        let mut attempt = 0usize;
        loop {
            if cancellation.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries + 1 {
                        return Err(OrchestratorError::RetryExhausted {
                            task_id: task_id.to_string(),
                            attempts: attempt,
                            message: err.to_string(),
                            category: err.category(),
                        });
                    }
                    match self.classify(&err) {
                        RetryDecision::Stop => {
                            return Err(OrchestratorError::TaskFailed {
                                task_id: task_id.to_string(),
                                message: err.to_string(),
                                category: err.category(),
                            });
                        }
                        RetryDecision::RetryImmediately => {}
                        RetryDecision::RetryWithBackoff => {
                            tokio::select! {
                                _ = self.sleeper.sleep(self.delay_for(attempt - 1)) => {}
                                _ = cancellation.cancelled() => return Err(OrchestratorError::Cancelled),
                            }
                        }
                    }
                }
            }
        }
    }
}

pub struct RetryPolicyBuilder {
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    retryable_exceptions: Option<RetryPredicate>,
    non_retryable_exceptions: Option<RetryPredicate>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            backoff: Backoff::default(),
            jitter: Jitter::default(),
            retryable_exceptions: None,
            non_retryable_exceptions: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_retries(mut self, n: usize) -> Self {
        self.max_retries = n;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn retryable_exceptions<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn TaskError) -> bool + Send + Sync + 'static,
    {
        self.retryable_exceptions = Some(Arc::new(predicate));
        self
    }

    pub fn non_retryable_exceptions<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn TaskError) -> bool + Send + Sync + 'static,
    {
        self.non_retryable_exceptions = Some(Arc::new(predicate));
        self
    }

    pub fn sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.backoff,
            jitter: self.jitter,
            retryable_exceptions: self.retryable_exceptions,
            non_retryable_exceptions: self.non_retryable_exceptions,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
