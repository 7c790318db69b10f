//! In-memory `StateBackend`, the default for tests and for embedding this
//! crate in a process that doesn't need cross-process durability.

use super::StateBackend;
use crate::error::StoreError;
use crate::model::Execution;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, Execution>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryStore {
    async fn create(&self, record: Execution) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("memory store mutex poisoned");
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, execution_id: &str, account_id: &str) -> Result<Execution, StoreError> {
        let records = self.records.lock().expect("memory store mutex poisoned");
        records
            .get(execution_id)
            .filter(|r| r.account_id == account_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
    }

    async fn get_latest_by_account(&self, account_id: &str) -> Result<Option<Execution>, StoreError> {
        let records = self.records.lock().expect("memory store mutex poisoned");
        Ok(records
            .values()
            .filter(|r| r.account_id == account_id)
            .max_by_key(|r| r.started_at)
            .cloned())
    }

    async fn update(
        &self,
        record: Execution,
        if_unchanged_since: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("memory store mutex poisoned");
        if let Some(expected) = if_unchanged_since {
            match records.get(&record.id) {
                Some(existing) if existing.last_updated != expected => {
                    return Err(StoreError::ConcurrencyConflict(record.id));
                }
                None => return Err(StoreError::NotFound(record.id)),
                _ => {}
            }
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_recent_by_account(&self, account_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let records = self.records.lock().expect("memory store mutex poisoned");
        let mut matches: Vec<_> = records.values().filter(|r| r.account_id == account_id).cloned().collect();
        matches.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock().expect("memory store mutex poisoned");
        let before_len = records.len();
        records.retain(|_, r| r.ttl > before);
        Ok(before_len - records.len())
    }
}
