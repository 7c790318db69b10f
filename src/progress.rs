//! Progress/status surface (§6.3): read-only views over a stored execution,
//! plus operational controls that don't go through the scheduler's wave loop.

use crate::circuit_breaker::CircuitState;
use crate::circuit_registry::CircuitBreakerRegistry;
use crate::error::OrchestratorError;
use crate::model::{Execution, ExecutionStatus, TaskClass};
use crate::store::StateBackend;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time snapshot of one execution's progress, derived from its
/// checkpoints (never stored separately).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub execution_id: String,
    pub account_id: String,
    pub status: ExecutionStatus,
    pub total_services: usize,
    pub completed_services: usize,
    pub failed_services: usize,
    pub skipped_services: usize,
    pub pending_services: usize,
    pub running_services: usize,
    pub total_items_processed: u64,
    pub elapsed: Duration,
}

impl ProgressReport {
    pub fn from_execution(exec: &Execution, now: DateTime<Utc>) -> Self {
        let elapsed = exec.completed_at.unwrap_or(now).signed_duration_since(exec.started_at);
        Self {
            execution_id: exec.id.clone(),
            account_id: exec.account_id.clone(),
            status: exec.status,
            total_services: exec.total_services(),
            completed_services: exec.completed_services(),
            failed_services: exec.failed_services(),
            skipped_services: exec.skipped_services(),
            pending_services: exec.pending_services(),
            running_services: exec.running_services(),
            total_items_processed: exec.total_items_processed(),
            elapsed: elapsed.to_std().unwrap_or(Duration::ZERO),
        }
    }

    /// `100 * completed / total`, or 100 when there's nothing to do.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_services == 0 {
            100.0
        } else {
            100.0 * (self.completed_services + self.failed_services + self.skipped_services) as f64 / self.total_services as f64
        }
    }
}

/// Per-service retry counters, for surfacing "which services needed retries".
pub fn retry_metrics(exec: &Execution) -> HashMap<String, u32> {
    exec.checkpoints.iter().map(|(name, cp)| (name.clone(), cp.retry_count)).collect()
}

/// Read-only inspection plus cancellation signalling over a running
/// orchestrator, independent of the scheduler driving it.
pub struct ProgressTracker {
    store: Arc<dyn StateBackend>,
    circuits: Arc<CircuitBreakerRegistry>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn StateBackend>, circuits: Arc<CircuitBreakerRegistry>) -> Self {
        Self { store, circuits }
    }

    pub async fn progress(&self, execution_id: &str, account_id: &str) -> Result<ProgressReport, OrchestratorError> {
        let exec = self.store.get(execution_id, account_id).await?;
        Ok(ProgressReport::from_execution(&exec, Utc::now()))
    }

    pub async fn list_recent(&self, account_id: &str, limit: usize) -> Result<Vec<ProgressReport>, OrchestratorError> {
        let executions = self.store.list_recent_by_account(account_id, limit).await?;
        let now = Utc::now();
        Ok(executions.iter().map(|exec| ProgressReport::from_execution(exec, now)).collect())
    }

    pub async fn retry_metrics_for(&self, execution_id: &str, account_id: &str) -> Result<HashMap<String, u32>, OrchestratorError> {
        let exec = self.store.get(execution_id, account_id).await?;
        Ok(retry_metrics(&exec))
    }

    /// Sorted snapshot of every task class's circuit breaker state.
    pub fn circuit_snapshot(&self) -> Vec<(TaskClass, CircuitState)> {
        self.circuits.snapshot()
    }

    pub fn reset_circuit(&self, class: TaskClass) {
        self.circuits.reset(class);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Checkpoint, ServiceCategory};
    use crate::store::MemoryStore;
    use std::collections::HashMap as StdHashMap;

    fn sample_execution() -> Execution {
        let now = Utc::now();
        let mut exec = Execution::new("e1", "acct-1", "us-east-1", now + chrono::Duration::days(30), now);
        let mut done = Checkpoint::pending("ec2", ServiceCategory::Compute, now);
        done.complete(crate::model::OpaqueMap::new(), now);
        let mut failed = Checkpoint::pending("rds", ServiceCategory::Database, now);
        failed.retry_count = 2;
        failed.fail("boom", now);
        exec.checkpoints.insert("ec2".into(), done);
        exec.checkpoints.insert("rds".into(), failed);
        exec
    }

    #[tokio::test]
    async fn progress_reports_counts_from_checkpoints() {
        let store = Arc::new(MemoryStore::new());
        store.create(sample_execution()).await.unwrap();
        let circuits = Arc::new(CircuitBreakerRegistry::new(StdHashMap::new()));
        let tracker = ProgressTracker::new(store, circuits);

        let report = tracker.progress("e1", "acct-1").await.unwrap();
        assert_eq!(report.total_services, 2);
        assert_eq!(report.completed_services, 1);
        assert_eq!(report.failed_services, 1);
        assert_eq!(report.progress_percentage(), 100.0);
    }

    #[tokio::test]
    async fn retry_metrics_reports_per_service_counts() {
        let store = Arc::new(MemoryStore::new());
        store.create(sample_execution()).await.unwrap();
        let circuits = Arc::new(CircuitBreakerRegistry::new(StdHashMap::new()));
        let tracker = ProgressTracker::new(store, circuits);

        let metrics = tracker.retry_metrics_for("e1", "acct-1").await.unwrap();
        assert_eq!(metrics["rds"], 2);
        assert_eq!(metrics["ec2"], 0);
    }

    #[test]
    fn empty_execution_reports_full_progress() {
        let now = Utc::now();
        let exec = Execution::new("e2", "acct-1", "us-east-1", now + chrono::Duration::days(30), now);
        let report = ProgressReport::from_execution(&exec, now);
        assert_eq!(report.progress_percentage(), 100.0);
    }
}
