//! Dependency Scheduler (C5): resolves or resumes an execution, then drives
//! it wave-by-wave to completion under a bounded-concurrency gate (§4.5).

use crate::cancellation::CancellationToken;
use crate::error::{BoxTaskError, OrchestratorError};
use crate::executor::{ResilientExecutor, TaskContext};
use crate::model::{Checkpoint, CheckpointStatus, Execution, ExecutionStatus, OpaqueMap, ServiceCategory, TaskClass};
use crate::store::StateBackend;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased task callable so the scheduler can hold a heterogeneous set
/// of task functions behind one dependency graph (§6.1).
pub type TaskFn = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<OpaqueMap, BoxTaskError>> + Send + Sync>;

#[derive(Clone)]
struct TaskDef {
    service_name: String,
    category: ServiceCategory,
    task_class: TaskClass,
    dependencies: Vec<TaskClass>,
    func: TaskFn,
}

pub struct DependencyScheduler {
    store: Arc<dyn StateBackend>,
    executor: Arc<ResilientExecutor>,
    max_concurrent: usize,
    stale_threshold: Duration,
    ttl: Duration,
    per_task_timeout: Option<Duration>,
    tasks: Vec<TaskDef>,
}

impl DependencyScheduler {
    pub fn new(store: Arc<dyn StateBackend>, executor: Arc<ResilientExecutor>, config: &crate::config::OrchestratorConfig) -> Self {
        Self {
            store,
            executor,
            max_concurrent: config.max_concurrent.max(1),
            stale_threshold: config.stale_threshold,
            ttl: config.ttl,
            per_task_timeout: config.per_task_timeout,
            tasks: Vec::new(),
        }
    }

    /// Register one task class's service and its dependency edges. Order of
    /// registration does not matter; the wave algorithm resolves readiness
    /// from the dependency list alone.
    pub fn add_task<F, Fut>(
        mut self,
        task_class: TaskClass,
        service_name: impl Into<String>,
        category: ServiceCategory,
        dependencies: Vec<TaskClass>,
        func: F,
    ) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<OpaqueMap, BoxTaskError>> + Send + 'static,
    {
        self.tasks.push(TaskDef {
            service_name: service_name.into(),
            category,
            task_class,
            dependencies,
            func: Arc::new(move |ctx| Box::pin(func(ctx))),
        });
        self
    }

    /// Resolve (or resume) the account's execution and drive it to a
    /// terminal state. Returns the final execution snapshot.
    pub async fn run(
        &self,
        account_id: &str,
        region: &str,
        cancellation: CancellationToken,
    ) -> Result<Execution, OrchestratorError> {
        let now = Utc::now();
        let mut exec = self.resolve_execution(account_id, region, now).await?;

        loop {
            if !exec.checkpoints.values().any(|cp| !cp.status.is_terminal()) {
                break;
            }
            if cancellation.is_cancelled() {
                tracing::warn!(execution_id = %exec.id, "cancelled, leaving execution RUNNING for resume");
                return Err(OrchestratorError::Cancelled);
            }

            let ready = self.ready_tasks(&exec);
            if ready.is_empty() {
                let remaining: Vec<String> = exec
                    .checkpoints
                    .iter()
                    .filter(|(_, cp)| !cp.status.is_terminal())
                    .map(|(name, _)| name.clone())
                    .collect();
                tracing::error!(execution_id = %exec.id, ?remaining, "dependency deadlock");
                return Err(OrchestratorError::Deadlock { tasks: remaining });
            }

            tracing::info!(execution_id = %exec.id, wave_size = ready.len(), "starting wave");
            self.run_wave(&exec, account_id, ready, cancellation.clone()).await;
            exec = self.store.get(&exec.id, account_id).await?;
        }

        let exec = crate::store::update_with_retry(self.store.as_ref(), &exec.id, account_id, |exec, now| {
            let final_status = exec.derive_final_status();
            exec.finish(final_status, now);
        })
        .await?;
        tracing::info!(execution_id = %exec.id, status = ?exec.status, "execution finished");
        Ok(exec)
    }

    async fn run_wave(&self, exec: &Execution, account_id: &str, ready: Vec<TaskDef>, cancellation: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();

        for task in ready {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let execution_id = exec.id.clone();
            let account_id = account_id.to_string();
            let timeout = self.per_task_timeout;
            let cancellation = cancellation.clone();

            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
                executor
                    .execute(
                        &execution_id,
                        &account_id,
                        &task.service_name,
                        task.task_class,
                        timeout,
                        cancellation,
                        move |ctx| (task.func)(ctx),
                    )
                    .await
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(join_error) = joined {
                tracing::error!(error = %join_error, "task panicked inside wave");
            }
        }
    }

    fn ready_tasks(&self, exec: &Execution) -> Vec<TaskDef> {
        self.tasks
            .iter()
            .filter(|task| {
                let checkpoint = match exec.checkpoints.get(&task.service_name) {
                    Some(cp) => cp,
                    None => return false,
                };
                if checkpoint.status.is_terminal() {
                    return false;
                }
                task.dependencies.iter().all(|dep_class| {
                    self.tasks
                        .iter()
                        .find(|d| d.task_class == *dep_class)
                        .map(|d| {
                            exec.checkpoints
                                .get(&d.service_name)
                                .map(|cp| cp.status.is_terminal())
                                .unwrap_or(true)
                        })
                        .unwrap_or(true)
                })
            })
            .cloned()
            .collect()
    }

    async fn resolve_execution(&self, account_id: &str, region: &str, now: DateTime<Utc>) -> Result<Execution, OrchestratorError> {
        match self.store.get_latest_by_account(account_id).await? {
            Some(existing) if existing.status == ExecutionStatus::Running => {
                let age = now.signed_duration_since(existing.last_updated);
                let stale_threshold = chrono::Duration::from_std(self.stale_threshold).unwrap_or(chrono::Duration::hours(2));
                if age < stale_threshold {
                    tracing::info!(execution_id = %existing.id, "resuming in-flight execution");
                    Ok(existing)
                } else {
                    tracing::warn!(execution_id = %existing.id, "execution stale, replacing");
                    self.replace_stale(&existing.id, account_id).await?;
                    self.create_execution(account_id, region, now).await
                }
            }
            _ => self.create_execution(account_id, region, now).await,
        }
    }

    async fn replace_stale(&self, execution_id: &str, account_id: &str) -> Result<(), OrchestratorError> {
        crate::store::update_with_retry(self.store.as_ref(), execution_id, account_id, |stale, now| {
            stale
                .metadata
                .insert("error_summary".into(), serde_json::json!({"message": "Execution timeout - replaced by new execution"}));
            stale.finish(ExecutionStatus::Failed, now);
        })
        .await?;
        Ok(())
    }

    async fn create_execution(&self, account_id: &str, region: &str, now: DateTime<Utc>) -> Result<Execution, OrchestratorError> {
        let id = Self::generate_execution_id(now);
        let ttl = now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::days(30));
        let mut exec = Execution::new(id, account_id, region, ttl, now);
        exec.status = ExecutionStatus::Running;
        for task in &self.tasks {
            exec.checkpoints
                .insert(task.service_name.clone(), Checkpoint::pending(task.service_name.clone(), task.category, now));
        }
        self.store.create(exec.clone()).await?;
        tracing::info!(execution_id = %exec.id, account_id, "created new execution");
        Ok(exec)
    }

    fn generate_execution_id(now: DateTime<Utc>) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("exec_{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
    }
}
