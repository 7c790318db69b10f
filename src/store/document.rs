//! Document-store backend: native primary key plus a secondary
//! account-ordered index, with compare-and-swap updates (§4.3 "preferred
//! when available").
//!
//! Modeled on a single-node document store (e.g. a table with a primary key
//! and a global secondary index) using `dashmap` for lock-free concurrent
//! access to both maps.

use super::StateBackend;
use crate::error::StoreError;
use crate::model::Execution;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// account_id -> execution_ids, kept in descending `started_at` order.
type AccountIndex = DashMap<String, Vec<String>>;

#[derive(Default)]
pub struct DocumentStore {
    records: DashMap<String, Execution>,
    by_account: AccountIndex,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_insert(&self, account_id: &str, execution_id: &str, started_at: DateTime<Utc>) {
        let mut ids = self.by_account.entry(account_id.to_string()).or_default();
        if !ids.contains(&execution_id.to_string()) {
            ids.push(execution_id.to_string());
        }
        ids.sort_by_key(|id| {
            std::cmp::Reverse(
                self.records.get(id).map(|r| r.started_at).unwrap_or(started_at),
            )
        });
    }
}

#[async_trait]
impl StateBackend for DocumentStore {
    async fn create(&self, record: Execution) -> Result<(), StoreError> {
        if self.records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        let (account_id, execution_id, started_at) =
            (record.account_id.clone(), record.id.clone(), record.started_at);
        self.records.insert(execution_id.clone(), record);
        self.index_insert(&account_id, &execution_id, started_at);
        Ok(())
    }

    async fn get(&self, execution_id: &str, account_id: &str) -> Result<Execution, StoreError> {
        self.records
            .get(execution_id)
            .filter(|r| r.account_id == account_id)
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound(execution_id.to_string()))
    }

    async fn get_latest_by_account(&self, account_id: &str) -> Result<Option<Execution>, StoreError> {
        let Some(ids) = self.by_account.get(account_id) else { return Ok(None) };
        Ok(ids.first().and_then(|id| self.records.get(id).map(|r| r.clone())))
    }

    async fn update(
        &self,
        record: Execution,
        if_unchanged_since: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut occupied) => {
                if let Some(expected) = if_unchanged_since {
                    if occupied.get().last_updated != expected {
                        return Err(StoreError::ConcurrencyConflict(record.id));
                    }
                }
                occupied.insert(record);
                Ok(())
            }
            Entry::Vacant(_) => Err(StoreError::NotFound(record.id)),
        }
    }

    async fn list_recent_by_account(&self, account_id: &str, limit: usize) -> Result<Vec<Execution>, StoreError> {
        let Some(ids) = self.by_account.get(account_id) else { return Ok(Vec::new()) };
        Ok(ids
            .iter()
            .take(limit)
            .filter_map(|id| self.records.get(id).map(|r| r.clone()))
            .collect())
    }

    async fn delete_expired(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let expired: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.value().ttl <= before)
            .map(|entry| entry.key().clone())
            .collect();
        for id in &expired {
            if let Some((_, record)) = self.records.remove(id) {
                if let Some(mut ids) = self.by_account.get_mut(&record.account_id) {
                    ids.retain(|x| x != id);
                }
            }
        }
        Ok(expired.len())
    }
}
