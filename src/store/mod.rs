//! State Store (C3): durable, atomic persistence for [`Execution`] records,
//! behind a single backend-agnostic interface (§4.3, §6.2).

mod document;
mod memory;
mod object;

pub use document::DocumentStore;
pub use memory::MemoryStore;
pub use object::ObjectStore;

use crate::error::StoreError;
use crate::model::Execution;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Backend-agnostic durable store for executions. Implementors must satisfy
/// the conformance suite in `tests/conformance_store.rs`.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Create a new execution record. Fails with `AlreadyExists` if the
    /// `(execution_id, account_id)` pair is already present.
    async fn create(&self, record: Execution) -> Result<(), StoreError>;

    /// Fetch one execution by its primary key.
    async fn get(&self, execution_id: &str, account_id: &str) -> Result<Execution, StoreError>;

    /// Fetch the most recently started execution for an account, if any.
    async fn get_latest_by_account(&self, account_id: &str) -> Result<Option<Execution>, StoreError>;

    /// Overwrite the full record. `if_unchanged_since` attaches an optimistic
    /// concurrency check against the stored `last_updated`; pass `None` to
    /// write unconditionally.
    async fn update(
        &self,
        record: Execution,
        if_unchanged_since: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// List execution summaries for an account, most recent first, capped at `limit`.
    async fn list_recent_by_account(&self, account_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError>;

    /// Delete every execution whose `ttl` is at or before `before`. Returns the count removed.
    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Bound on conflict retries in [`update_with_retry`], to fail loudly under
/// pathological contention rather than spin forever.
const MAX_CONFLICT_RETRIES: usize = 25;

/// Read-modify-write an execution under optimistic concurrency (§4.3, C1):
/// `mutate` runs against a freshly-read snapshot and the result is written
/// back guarded by `if_unchanged_since`. When another writer wins the race,
/// `update` reports `ConcurrencyConflict` and this loop re-reads the new
/// snapshot and re-applies `mutate` rather than clobbering the other
/// writer's change with a stale whole-record overwrite.
pub async fn update_with_retry<F>(
    backend: &dyn StateBackend,
    execution_id: &str,
    account_id: &str,
    mut mutate: F,
) -> Result<Execution, StoreError>
where
    F: FnMut(&mut Execution, DateTime<Utc>) + Send,
{
    for _ in 0..MAX_CONFLICT_RETRIES {
        let mut exec = backend.get(execution_id, account_id).await?;
        let last_updated = exec.last_updated;
        let now = Utc::now();
        mutate(&mut exec, now);
        exec.touch(now);
        match backend.update(exec.clone(), Some(last_updated)).await {
            Ok(()) => return Ok(exec),
            Err(StoreError::ConcurrencyConflict(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(StoreError::ConcurrencyConflict(execution_id.to_string()))
}
