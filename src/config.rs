//! Orchestrator-wide and per-task-class configuration (§6.5).

use crate::backoff::Backoff;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::jitter::Jitter;
use crate::model::TaskClass;
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::time::Duration;

/// Scheduler/executor-wide knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent: usize,
    pub stale_threshold: Duration,
    pub ttl: Duration,
    pub per_task_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            stale_threshold: Duration::from_secs(2 * 3600),
            ttl: Duration::from_secs(30 * 24 * 3600),
            per_task_timeout: None,
        }
    }
}

/// Per-task-class retry and circuit-breaker policy, built up from tuned
/// defaults (ported from the original per-service configuration) and
/// overridable per class.
#[derive(Clone)]
pub struct PolicyTable {
    retry: HashMap<TaskClass, RetryPolicy>,
    circuit: HashMap<TaskClass, CircuitBreakerConfig>,
}

impl PolicyTable {
    pub fn retry_policy(&self, class: TaskClass) -> RetryPolicy {
        self.retry.get(&class).cloned().unwrap_or_else(|| RetryPolicy::builder().build())
    }

    pub fn circuit_configs(&self) -> HashMap<TaskClass, CircuitBreakerConfig> {
        self.circuit.clone()
    }

    pub fn set_retry_policy(&mut self, class: TaskClass, policy: RetryPolicy) {
        self.retry.insert(class, policy);
    }

    pub fn set_circuit_config(&mut self, class: TaskClass, config: CircuitBreakerConfig) {
        self.circuit.insert(class, config);
    }
}

impl std::fmt::Debug for PolicyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyTable")
            .field("classes_with_retry_overrides", &self.retry.len())
            .field("classes_with_circuit_overrides", &self.circuit.len())
            .finish()
    }
}

impl Default for PolicyTable {
    /// Defaults mirror the original per-service tuning: metric collectors
    /// hitting rate-limited APIs (S3, RDS) get longer backoff and a tighter
    /// breaker than cheap calls (cost analysis); the final report step gets
    /// no circuit breaker since it has no external dependency to protect.
    fn default() -> Self {
        let mut retry = HashMap::new();
        let mut circuit = HashMap::new();

        retry.insert(
            TaskClass::CostAnalysis,
            RetryPolicy::builder()
                .max_retries(3)
                .backoff(Backoff::new(Duration::from_millis(500), Duration::from_secs(10), 2.0))
                .jitter(Jitter::new(0.1))
                .build(),
        );
        circuit.insert(TaskClass::CostAnalysis, CircuitBreakerConfig::new(5, Duration::from_secs(60)));

        for class in [TaskClass::Ec2Metrics, TaskClass::LambdaMetrics, TaskClass::RdsMetrics] {
            retry.insert(
                class,
                RetryPolicy::builder()
                    .max_retries(3)
                    .backoff(Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 2.0))
                    .jitter(Jitter::new(0.1))
                    .build(),
            );
            circuit.insert(class, CircuitBreakerConfig::new(5, Duration::from_secs(60)));
        }

        // S3 APIs throttle more aggressively; give the class more headroom
        // before it trips and a longer backoff ceiling.
        retry.insert(
            TaskClass::S3Metrics,
            RetryPolicy::builder()
                .max_retries(4)
                .backoff(Backoff::new(Duration::from_secs(2), Duration::from_secs(60), 2.0))
                .jitter(Jitter::new(0.2))
                .build(),
        );
        circuit.insert(TaskClass::S3Metrics, CircuitBreakerConfig::new(8, Duration::from_secs(120)));

        for class in [
            TaskClass::Ec2Recommendations,
            TaskClass::LambdaRecommendations,
            TaskClass::RdsRecommendations,
            TaskClass::S3Recommendations,
        ] {
            retry.insert(
                class,
                RetryPolicy::builder()
                    .max_retries(2)
                    .backoff(Backoff::new(Duration::from_millis(500), Duration::from_secs(15), 2.0))
                    .jitter(Jitter::new(0.1))
                    .build(),
            );
            circuit.insert(class, CircuitBreakerConfig::new(5, Duration::from_secs(60)));
        }

        retry.insert(
            TaskClass::ReportGeneration,
            RetryPolicy::builder()
                .max_retries(1)
                .backoff(Backoff::new(Duration::from_millis(200), Duration::from_secs(5), 2.0))
                .jitter(Jitter::none())
                .build(),
        );
        circuit.insert(TaskClass::ReportGeneration, CircuitBreakerConfig::disabled());

        Self { retry, circuit }
    }
}
