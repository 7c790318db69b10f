//! Core data model: executions, checkpoints, and the static task-class
//! enumeration the scheduler drives against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque, order-preserving JSON object used for `metadata` and
/// `result_summary`. Backed by `serde_json::Value` with the
/// `arbitrary_precision` feature so monetary figures round-trip exactly
/// instead of drifting through an `f64`.
pub type OpaqueMap = serde_json::Map<String, serde_json::Value>;

/// Static enumeration the scheduler uses to apply per-class retry and
/// circuit-breaker policy (§3 "Task Class"). Extend this list alongside the
/// dependency graph in [`crate::scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskClass {
    CostAnalysis,
    Ec2Metrics,
    Ec2Recommendations,
    LambdaMetrics,
    LambdaRecommendations,
    RdsMetrics,
    RdsRecommendations,
    S3Metrics,
    S3Recommendations,
    ReportGeneration,
}

impl TaskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskClass::CostAnalysis => "COST_ANALYSIS",
            TaskClass::Ec2Metrics => "EC2_METRICS",
            TaskClass::Ec2Recommendations => "EC2_RECOMMENDATIONS",
            TaskClass::LambdaMetrics => "LAMBDA_METRICS",
            TaskClass::LambdaRecommendations => "LAMBDA_RECOMMENDATIONS",
            TaskClass::RdsMetrics => "RDS_METRICS",
            TaskClass::RdsRecommendations => "RDS_RECOMMENDATIONS",
            TaskClass::S3Metrics => "S3_METRICS",
            TaskClass::S3Recommendations => "S3_RECOMMENDATIONS",
            TaskClass::ReportGeneration => "REPORT_GENERATION",
        }
    }
}

impl std::fmt::Display for TaskClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory grouping for a checkpoint's service; used only for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceCategory {
    Compute,
    Storage,
    Database,
    Networking,
    Analytics,
    MachineLearning,
    Management,
    Security,
    Cost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::PartiallyCompleted
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

impl CheckpointStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointStatus::Completed | CheckpointStatus::Failed | CheckpointStatus::Skipped
        )
    }
}

/// Per-`(execution, service_name)` progress record (§3 "Checkpoint").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub service_name: String,
    pub category: ServiceCategory,
    pub status: CheckpointStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: DateTime<Utc>,
    pub items_processed: u64,
    pub items_total: u64,
    pub last_processed_id: Option<String>,
    pub result_summary: Option<OpaqueMap>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

impl Checkpoint {
    pub fn pending(service_name: impl Into<String>, category: ServiceCategory, now: DateTime<Utc>) -> Self {
        Self {
            service_name: service_name.into(),
            category,
            status: CheckpointStatus::Pending,
            started_at: None,
            completed_at: None,
            last_checkpoint_at: now,
            items_processed: 0,
            items_total: 0,
            last_processed_id: None,
            result_summary: None,
            error_message: None,
            retry_count: 0,
        }
    }

    /// `100 * items_processed / items_total`, or 0 when `items_total == 0`.
    pub fn progress_percentage(&self) -> f64 {
        if self.items_total == 0 {
            0.0
        } else {
            100.0 * (self.items_processed as f64) / (self.items_total as f64)
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) {
        self.status = CheckpointStatus::Running;
        self.started_at = Some(now);
        self.last_checkpoint_at = now;
    }

    pub fn complete(&mut self, result: OpaqueMap, now: DateTime<Utc>) {
        self.status = CheckpointStatus::Completed;
        self.completed_at = Some(now);
        self.last_checkpoint_at = now;
        self.result_summary = Some(result);
        self.error_message = None;
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = CheckpointStatus::Failed;
        self.completed_at = Some(now);
        self.last_checkpoint_at = now;
        self.error_message = Some(message.into());
    }

    pub fn skip(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = CheckpointStatus::Skipped;
        self.completed_at = Some(now);
        self.last_checkpoint_at = now;
        self.error_message = Some(reason.into());
    }

    pub fn record_progress(&mut self, items_processed: u64, items_total: u64, last_id: Option<String>, now: DateTime<Utc>) {
        self.items_processed = items_processed;
        self.items_total = items_total;
        if last_id.is_some() {
            self.last_processed_id = last_id;
        }
        self.last_checkpoint_at = now;
    }
}

/// One analysis run for one account (§3 "Execution").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub account_id: String,
    pub region: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ttl: DateTime<Utc>,
    pub checkpoints: BTreeMap<String, Checkpoint>,
    pub metadata: OpaqueMap,
}

impl Execution {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        region: impl Into<String>,
        ttl: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            region: region.into(),
            status: ExecutionStatus::Pending,
            started_at: now,
            last_updated: now,
            completed_at: None,
            ttl,
            checkpoints: BTreeMap::new(),
            metadata: OpaqueMap::new(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        debug_assert!(now >= self.last_updated, "last_updated must be monotonic");
        self.last_updated = now.max(self.last_updated);
    }

    pub fn finish(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal(), "finish() requires a terminal status");
        self.status = status;
        self.completed_at = Some(now);
        self.touch(now);
    }

    pub fn total_services(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn completed_services(&self) -> usize {
        self.count_status(CheckpointStatus::Completed)
    }

    pub fn failed_services(&self) -> usize {
        self.count_status(CheckpointStatus::Failed)
    }

    pub fn skipped_services(&self) -> usize {
        self.count_status(CheckpointStatus::Skipped)
    }

    pub fn pending_services(&self) -> usize {
        self.count_status(CheckpointStatus::Pending)
    }

    pub fn running_services(&self) -> usize {
        self.checkpoints
            .values()
            .filter(|c| matches!(c.status, CheckpointStatus::Running | CheckpointStatus::Retrying))
            .count()
    }

    pub fn total_items_processed(&self) -> u64 {
        self.checkpoints.values().map(|c| c.items_processed).sum()
    }

    fn count_status(&self, status: CheckpointStatus) -> usize {
        self.checkpoints.values().filter(|c| c.status == status).count()
    }

    /// Derive the terminal execution status from current checkpoint states.
    pub fn derive_final_status(&self) -> ExecutionStatus {
        if self.failed_services() > 0 && self.completed_services() > 0 {
            ExecutionStatus::PartiallyCompleted
        } else if self.failed_services() > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        }
    }
}
