//! Durable per-step restore progress

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

/// Errors raised by a progress store backend.
#[derive(Error, Debug)]
pub enum ProgressError {
    /// The backing store could not be read or written
    #[error("Progress store failure: {0}")]
    Storage(String),
}

/// Durable record of which steps of a restore run already completed.
///
/// Keys follow the single idempotency discipline `(restoreRunId, stepKey)`
/// where the step key is `create:<sourceId>` or `attach:<sourceId>`; the
/// value is the id the step produced or operated on. The executor consults
/// the store before every creation, which is what makes re-running an
/// interrupted restore with the same run id safe.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Mark a step durable-complete.
    async fn record(
        &self,
        run_id: &str,
        step_key: &str,
        new_id: &str,
    ) -> Result<(), ProgressError>;

    /// Look up one step's completion record.
    async fn lookup(&self, run_id: &str, step_key: &str) -> Result<Option<String>, ProgressError>;

    /// Every completed step of a run, step key to id.
    async fn completed(&self, run_id: &str) -> Result<HashMap<String, String>, ProgressError>;
}

/// Progress store backed by process memory. Durable only for the lifetime
/// of the process; production runs want a real backend behind the trait.
#[derive(Debug, Default)]
pub struct InMemoryProgressStore {
    records: DashMap<(String, String), String>,
}

impl InMemoryProgressStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn record(
        &self,
        run_id: &str,
        step_key: &str,
        new_id: &str,
    ) -> Result<(), ProgressError> {
        self.records.insert(
            (run_id.to_string(), step_key.to_string()),
            new_id.to_string(),
        );
        Ok(())
    }

    async fn lookup(&self, run_id: &str, step_key: &str) -> Result<Option<String>, ProgressError> {
        Ok(self
            .records
            .get(&(run_id.to_string(), step_key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn completed(&self, run_id: &str) -> Result<HashMap<String, String>, ProgressError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.key().0 == run_id)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_are_scoped_by_run() {
        let store = InMemoryProgressStore::new();
        store.record("run-1", "create:vpc-1", "vpc-a").await.unwrap();
        store.record("run-2", "create:vpc-1", "vpc-b").await.unwrap();

        assert_eq!(
            store.lookup("run-1", "create:vpc-1").await.unwrap().as_deref(),
            Some("vpc-a")
        );
        let run2 = store.completed("run-2").await.unwrap();
        assert_eq!(run2.len(), 1);
        assert_eq!(run2["create:vpc-1"], "vpc-b");
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = InMemoryProgressStore::new();
        assert!(store.lookup("run-1", "create:x").await.unwrap().is_none());
        assert!(store.completed("run-1").await.unwrap().is_empty());
    }
}
