//! Resilient Executor (C4): wraps one task invocation with idempotency,
//! circuit breaking, retries, timeout and cancellation (§4.4).

use crate::cancellation::CancellationToken;
use crate::circuit_registry::CircuitBreakerRegistry;
use crate::config::PolicyTable;
use crate::error::{ErrorCategory, OrchestratorError, TaskError};
use crate::model::{CheckpointStatus, OpaqueMap, TaskClass};
use crate::store::StateBackend;
use chrono::Utc;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Narrow interface handed to a task function (§6.1): cooperative
/// cancellation plus a progress-reporting callback. Does not expose the
/// full execution record, only this task's own slice of it.
#[derive(Clone)]
pub struct TaskContext {
    store: Arc<dyn StateBackend>,
    execution_id: String,
    account_id: String,
    service_name: String,
    cancellation: CancellationToken,
}

impl TaskContext {
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Best-effort progress update; failures are logged by the caller and do
    /// not fail the task (§4.4 "optionally, periodic progress updates").
    pub async fn report_progress(
        &self,
        items_processed: u64,
        items_total: u64,
        last_processed_id: Option<String>,
    ) -> Result<(), crate::error::StoreError> {
        let service_name = self.service_name.clone();
        crate::store::update_with_retry(self.store.as_ref(), &self.execution_id, &self.account_id, move |exec, now| {
            if let Some(checkpoint) = exec.checkpoints.get_mut(&service_name) {
                checkpoint.record_progress(items_processed, items_total, last_processed_id.clone(), now);
            }
        })
        .await?;
        Ok(())
    }

    /// Bump `retry_count` for this checkpoint; called once per actual
    /// invocation of the task function (never for cache-hits or circuit
    /// rejections, since those never reach this point). Best-effort: a
    /// transient store failure here must not fail the task itself.
    async fn record_invocation(&self) {
        let service_name = self.service_name.clone();
        let _ = crate::store::update_with_retry(self.store.as_ref(), &self.execution_id, &self.account_id, move |exec, _now| {
            if let Some(checkpoint) = exec.checkpoints.get_mut(&service_name) {
                checkpoint.retry_count += 1;
            }
        })
        .await;
    }
}

/// Wraps a task's own error with a timeout variant so the retry engine can
/// classify a deadline miss as TIMEOUT without the task needing to know
/// about timeouts at all.
enum AttemptError<E> {
    Timeout(Duration),
    Task(E),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Timeout(d) => write!(f, "task timed out after {d:?}"),
            AttemptError::Task(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Timeout(d) => write!(f, "AttemptError::Timeout({d:?})"),
            AttemptError::Task(e) => write!(f, "AttemptError::Task({e:?})"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for AttemptError<E> {}

impl<E: TaskError> TaskError for AttemptError<E> {
    fn category(&self) -> ErrorCategory {
        match self {
            AttemptError::Timeout(_) => ErrorCategory::Timeout,
            AttemptError::Task(e) => e.category(),
        }
    }

    fn retryable(&self) -> Option<bool> {
        match self {
            AttemptError::Timeout(_) => Some(true),
            AttemptError::Task(e) => e.retryable(),
        }
    }
}

pub struct ResilientExecutor {
    store: Arc<dyn StateBackend>,
    circuits: Arc<CircuitBreakerRegistry>,
    policies: PolicyTable,
}

impl ResilientExecutor {
    pub fn new(store: Arc<dyn StateBackend>, circuits: Arc<CircuitBreakerRegistry>, policies: PolicyTable) -> Self {
        Self { store, circuits, policies }
    }

    /// Execute one task per the seven-step contract of §4.4.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute<F, Fut, E>(
        &self,
        execution_id: &str,
        account_id: &str,
        service_name: &str,
        task_class: TaskClass,
        timeout: Option<Duration>,
        cancellation: CancellationToken,
        func: F,
    ) -> Result<OpaqueMap, OrchestratorError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<OpaqueMap, E>> + Send,
        E: TaskError,
    {
        // Step 1: idempotency short-circuit.
        let exec = self.store.get(execution_id, account_id).await?;
        if let Some(checkpoint) = exec.checkpoints.get(service_name) {
            if checkpoint.status == CheckpointStatus::Completed {
                tracing::debug!(execution_id, service_name, "cache hit, skipping invocation");
                return Ok(checkpoint.result_summary.clone().unwrap_or_default());
            }
        }

        // Step 2: circuit check. Admission (including the Open -> HalfOpen
        // probe once `recovery_timeout` elapses) is gated inside step 4's
        // `breaker.execute()` call below; `state()` is a plain snapshot and
        // must never be used to reject a call before `execute()` gets a
        // chance to run its own time-based transition.
        let breaker = self.circuits.get(task_class);

        // Step 3: transition to RUNNING.
        crate::store::update_with_retry(self.store.as_ref(), execution_id, account_id, |exec, now| {
            if let Some(checkpoint) = exec.checkpoints.get_mut(service_name) {
                checkpoint.start(now);
            }
        })
        .await?;

        let task_id = format!("{execution_id}/{service_name}");
        let retry_policy = self.policies.retry_policy(task_class);
        let ctx = TaskContext {
            store: self.store.clone(),
            execution_id: execution_id.to_string(),
            account_id: account_id.to_string(),
            service_name: service_name.to_string(),
            cancellation: cancellation.clone(),
        };

        // Step 4: invoke with retries and timeout, gated by the circuit breaker.
        let result = breaker
            .execute(|| {
                let ctx = ctx.clone();
                let func = &func;
                let task_id = task_id.clone();
                async move {
                    if cancellation.is_cancelled() {
                        return Err(OrchestratorError::Cancelled);
                    }
                    retry_policy
                        .execute(&task_id, cancellation.clone(), |_attempt| {
                            let ctx = ctx.clone();
                            async move {
                                ctx.record_invocation().await;
                                match timeout {
                                    Some(duration) => match tokio::time::timeout(duration, func(ctx)).await {
                                        Ok(Ok(v)) => Ok(v),
                                        Ok(Err(e)) => Err(AttemptError::Task(e)),
                                        Err(_) => Err(AttemptError::Timeout(duration)),
                                    },
                                    None => func(ctx).await.map_err(AttemptError::Task),
                                }
                            }
                        })
                        .await
                }
            })
            .await;

        // Steps 5-7: record the outcome.
        crate::store::update_with_retry(self.store.as_ref(), execution_id, account_id, |exec, now| {
            match &result {
                Ok(summary) => {
                    if let Some(checkpoint) = exec.checkpoints.get_mut(service_name) {
                        checkpoint.complete(summary.clone(), now);
                    }
                }
                Err(OrchestratorError::Cancelled) => {}
                Err(OrchestratorError::CircuitOpen { .. }) => {
                    if let Some(checkpoint) = exec.checkpoints.get_mut(service_name) {
                        checkpoint.skip("circuit breaker open", now);
                    }
                }
                Err(err) => {
                    if let Some(checkpoint) = exec.checkpoints.get_mut(service_name) {
                        checkpoint.fail(err.to_string(), now);
                    }
                }
            }
        })
        .await?;

        match &result {
            Ok(_) => tracing::info!(execution_id, service_name, "task completed"),
            Err(OrchestratorError::Cancelled) => {
                tracing::warn!(execution_id, service_name, "task cancelled, leaving RUNNING for resume");
            }
            Err(OrchestratorError::CircuitOpen { .. }) => {
                tracing::warn!(execution_id, service_name, "task skipped, circuit breaker open");
            }
            Err(err) => tracing::warn!(execution_id, service_name, error = %err, "task failed"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::model::{Checkpoint, Execution, ServiceCategory};
    use crate::store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Boom(ErrorCategory);

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }
    impl std::error::Error for Boom {}
    impl TaskError for Boom {
        fn category(&self) -> ErrorCategory {
            self.0
        }
    }

    async fn seeded_executor(service: &str) -> (ResilientExecutor, Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let mut exec = Execution::new("e1", "acct-1", "us-east-1", now + chrono::Duration::days(30), now);
        exec.checkpoints.insert(service.to_string(), Checkpoint::pending(service, ServiceCategory::Compute, now));
        store.create(exec).await.unwrap();

        let mut circuits_cfg = HashMap::new();
        circuits_cfg.insert(TaskClass::Ec2Metrics, CircuitBreakerConfig::new(2, Duration::from_secs(60)));
        let circuits = Arc::new(CircuitBreakerRegistry::new(circuits_cfg));
        let executor = ResilientExecutor::new(store.clone(), circuits, PolicyTable::default());
        (executor, store, "e1".to_string())
    }

    #[tokio::test]
    async fn successful_task_completes_checkpoint() {
        let (executor, store, exec_id) = seeded_executor("ec2").await;
        let result = executor
            .execute(&exec_id, "acct-1", "ec2", TaskClass::Ec2Metrics, None, CancellationToken::new(), |_ctx| async {
                let mut summary = OpaqueMap::new();
                summary.insert("items".into(), serde_json::json!(3));
                Ok::<_, Boom>(summary)
            })
            .await;
        assert!(result.is_ok());
        let exec = store.get(&exec_id, "acct-1").await.unwrap();
        assert_eq!(exec.checkpoints["ec2"].status, CheckpointStatus::Completed);
    }

    #[tokio::test]
    async fn completed_checkpoint_short_circuits_without_invoking() {
        let (executor, store, exec_id) = seeded_executor("ec2").await;
        let calls = Arc::new(AtomicUsize::new(0));

        let mut exec = store.get(&exec_id, "acct-1").await.unwrap();
        let mut summary = OpaqueMap::new();
        summary.insert("cached".into(), serde_json::json!(true));
        exec.checkpoints.get_mut("ec2").unwrap().complete(summary, Utc::now());
        store.update(exec, None).await.unwrap();

        let calls_clone = calls.clone();
        let result = executor
            .execute(&exec_id, "acct-1", "ec2", TaskClass::Ec2Metrics, None, CancellationToken::new(), move |_ctx| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Boom>(OpaqueMap::new()) }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "idempotent completed checkpoint must not re-invoke");
    }

    #[tokio::test]
    async fn permanent_failure_marks_checkpoint_failed() {
        let (executor, store, exec_id) = seeded_executor("ec2").await;
        let result = executor
            .execute(&exec_id, "acct-1", "ec2", TaskClass::Ec2Metrics, None, CancellationToken::new(), |_ctx| async {
                Err::<OpaqueMap, _>(Boom(ErrorCategory::ClientError))
            })
            .await;
        assert!(result.is_err());
        let exec = store.get(&exec_id, "acct-1").await.unwrap();
        assert_eq!(exec.checkpoints["ec2"].status, CheckpointStatus::Failed);
        assert_eq!(exec.checkpoints["ec2"].retry_count, 1, "a single permanent attempt still counts as one invocation");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_classified_and_retried() {
        let (executor, store, exec_id) = seeded_executor("ec2").await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result = executor
            .execute(
                &exec_id,
                "acct-1",
                "ec2",
                TaskClass::Ec2Metrics,
                Some(Duration::from_millis(10)),
                CancellationToken::new(),
                move |_ctx| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<_, Boom>(OpaqueMap::new())
                    }
                },
            )
            .await;
        assert!(result.is_err());
        let invocations = calls.load(Ordering::SeqCst);
        assert!(invocations > 1, "timeout should be retried");
        let exec = store.get(&exec_id, "acct-1").await.unwrap();
        assert_eq!(exec.checkpoints["ec2"].retry_count, invocations, "retry_count mirrors actual invocation count");
    }
}
