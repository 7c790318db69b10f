//! Object-store backend: durability via whole-record blobs plus pointer
//! objects, for backends that offer only flat key/blob storage (§4.3, §6.4).
//!
//! Layout, rooted at `base_dir`:
//! - `executions/<execution_id>/state.json` — full record
//! - `accounts/<account_id>/latest_execution.json` — `{execution_id, last_updated, status}` pointer
//! - `accounts/<account_id>/index.json` — `[{execution_id, started_at}]`, newest first
//!
//! Every mutation round-trips through `tokio::fs`; a single async mutex
//! serializes index updates since plain object storage offers no
//! server-side conditional list semantics.

use crate::error::StoreError;
use crate::model::{Execution, ExecutionStatus};
use crate::store::StateBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

#[derive(Debug, Serialize, Deserialize)]
struct LatestPointer {
    execution_id: String,
    last_updated: DateTime<Utc>,
    status: ExecutionStatus,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct IndexEntry {
    execution_id: String,
    started_at: DateTime<Utc>,
}

pub struct ObjectStore {
    base_dir: PathBuf,
    index_lock: Mutex<()>,
}

impl ObjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into(), index_lock: Mutex::new(()) }
    }

    fn execution_path(&self, execution_id: &str) -> PathBuf {
        self.base_dir.join("executions").join(execution_id).join("state.json")
    }

    fn account_dir(&self, account_id: &str) -> PathBuf {
        self.base_dir.join("accounts").join(account_id)
    }

    fn latest_pointer_path(&self, account_id: &str) -> PathBuf {
        self.account_dir(account_id).join("latest_execution.json")
    }

    fn index_path(&self, account_id: &str) -> PathBuf {
        self.account_dir(account_id).join("index.json")
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        Self::read_json(&self.execution_path(execution_id)).await
    }

    async fn upsert_index(&self, account_id: &str, execution_id: &str, started_at: DateTime<Utc>) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock().await;
        let path = self.index_path(account_id);
        let mut entries: Vec<IndexEntry> = Self::read_json(&path).await?.unwrap_or_default();
        if !entries.iter().any(|e| e.execution_id == execution_id) {
            entries.push(IndexEntry { execution_id: execution_id.to_string(), started_at });
        }
        entries.sort_by_key(|e| std::cmp::Reverse(e.started_at));
        Self::write_json(&path, &entries).await
    }

    async fn remove_from_index(&self, account_id: &str, execution_id: &str) -> Result<(), StoreError> {
        let _guard = self.index_lock.lock().await;
        let path = self.index_path(account_id);
        let Some(mut entries): Option<Vec<IndexEntry>> = Self::read_json(&path).await? else { return Ok(()) };
        entries.retain(|e| e.execution_id != execution_id);
        Self::write_json(&path, &entries).await
    }
}

#[async_trait]
impl StateBackend for ObjectStore {
    async fn create(&self, record: Execution) -> Result<(), StoreError> {
        if self.read_execution(&record.id).await?.is_some() {
            return Err(StoreError::AlreadyExists(record.id));
        }
        Self::write_json(&self.execution_path(&record.id), &record).await?;
        Self::write_json(
            &self.latest_pointer_path(&record.account_id),
            &LatestPointer {
                execution_id: record.id.clone(),
                last_updated: record.last_updated,
                status: record.status,
            },
        )
        .await?;
        self.upsert_index(&record.account_id, &record.id, record.started_at).await
    }

    async fn get(&self, execution_id: &str, account_id: &str) -> Result<Execution, StoreError> {
        self.read_execution(execution_id)
            .await?
            .filter(|r| r.account_id == account_id)
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
    }

    async fn get_latest_by_account(&self, account_id: &str) -> Result<Option<Execution>, StoreError> {
        let Some(pointer): Option<LatestPointer> = Self::read_json(&self.latest_pointer_path(account_id)).await? else {
            return Ok(None);
        };
        self.read_execution(&pointer.execution_id).await
    }

    async fn update(
        &self,
        record: Execution,
        if_unchanged_since: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let existing = self
            .read_execution(&record.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        if let Some(expected) = if_unchanged_since {
            if existing.last_updated != expected {
                return Err(StoreError::ConcurrencyConflict(record.id));
            }
        }
        Self::write_json(&self.execution_path(&record.id), &record).await?;
        let pointer: Option<LatestPointer> = Self::read_json(&self.latest_pointer_path(&record.account_id)).await?;
        let is_latest = pointer.as_ref().map(|p| p.execution_id == record.id).unwrap_or(true)
            || pointer.map(|p| p.last_updated <= record.last_updated).unwrap_or(true);
        if is_latest {
            Self::write_json(
                &self.latest_pointer_path(&record.account_id),
                &LatestPointer {
                    execution_id: record.id.clone(),
                    last_updated: record.last_updated,
                    status: record.status,
                },
            )
            .await?;
        }
        self.upsert_index(&record.account_id, &record.id, record.started_at).await
    }

    async fn list_recent_by_account(&self, account_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let entries: Vec<IndexEntry> = Self::read_json(&self.index_path(account_id)).await?.unwrap_or_default();
        let mut out = Vec::with_capacity(limit.min(entries.len()));
        for entry in entries.into_iter().take(limit) {
            if let Some(record) = self.read_execution(&entry.execution_id).await? {
                out.push(record);
            }
        }
        Ok(out)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut removed = 0usize;
        let executions_dir = self.base_dir.join("executions");
        let mut entries = match fs::read_dir(&executions_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let execution_id = entry.file_name().to_string_lossy().into_owned();
            if let Some(record) = self.read_execution(&execution_id).await? {
                if record.ttl <= before {
                    fs::remove_dir_all(entry.path()).await?;
                    self.remove_from_index(&record.account_id, &execution_id).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
