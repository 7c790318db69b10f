//! Resilient, checkpointed task orchestration for the FinOps analysis
//! pipeline.
//!
//! The crate is built from five cooperating pieces:
//!
//! - [`retry`] / [`circuit_breaker`] / [`backoff`] / [`jitter`]: the
//!   resilience primitives applied around every task invocation.
//! - [`store`]: durable, pluggable persistence for [`model::Execution`] state.
//! - [`executor`]: wraps one task invocation with idempotency, circuit
//!   breaking, retries and cancellation.
//! - [`scheduler`]: drives a dependency graph of tasks to completion,
//!   resuming or replacing a stale execution as needed.
//! - [`progress`]: read-only inspection and operational controls over a
//!   running or finished execution.
//!
//! ```no_run
//! use finops_orchestrator_core::cancellation::CancellationToken;
//! use finops_orchestrator_core::circuit_registry::CircuitBreakerRegistry;
//! use finops_orchestrator_core::config::{OrchestratorConfig, PolicyTable};
//! use finops_orchestrator_core::executor::ResilientExecutor;
//! use finops_orchestrator_core::model::{OpaqueMap, ServiceCategory, TaskClass};
//! use finops_orchestrator_core::scheduler::DependencyScheduler;
//! use finops_orchestrator_core::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), finops_orchestrator_core::error::OrchestratorError> {
//! let store = Arc::new(MemoryStore::new());
//! let circuits = Arc::new(CircuitBreakerRegistry::new(Default::default()));
//! let executor = Arc::new(ResilientExecutor::new(store.clone(), circuits, PolicyTable::default()));
//! let config = OrchestratorConfig::default();
//!
//! let scheduler = DependencyScheduler::new(store, executor, &config).add_task(
//!     TaskClass::Ec2Metrics,
//!     "ec2_metrics",
//!     ServiceCategory::Compute,
//!     vec![],
//!     |_ctx| async { Ok::<_, finops_orchestrator_core::error::BoxTaskError>(OpaqueMap::new()) },
//! );
//!
//! let execution = scheduler.run("123456789012", "us-east-1", CancellationToken::new()).await?;
//! println!("execution finished with status {:?}", execution.status);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cancellation;
pub mod circuit_breaker;
pub mod circuit_registry;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod jitter;
pub mod model;
pub mod progress;
pub mod retry;
pub mod scheduler;
pub mod sleeper;
pub mod store;
pub mod telemetry;

pub mod prelude {
    //! The common subset of types needed to wire up an orchestrator.
    pub use crate::cancellation::CancellationToken;
    pub use crate::circuit_registry::CircuitBreakerRegistry;
    pub use crate::config::{OrchestratorConfig, PolicyTable};
    pub use crate::error::{BoxTaskError, OrchestratorError, TaskError};
    pub use crate::executor::{ResilientExecutor, TaskContext};
    pub use crate::model::{Execution, OpaqueMap, ServiceCategory, TaskClass};
    pub use crate::progress::ProgressTracker;
    pub use crate::scheduler::DependencyScheduler;
    pub use crate::store::{MemoryStore, StateBackend};
}
