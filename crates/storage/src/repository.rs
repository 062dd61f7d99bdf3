use assess_core::model::{AttemptId, ProgressKey, ProgressSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape for a progress snapshot.
///
/// The snapshot body is kept as JSON next to the columns adapters need for
/// lookups and housekeeping, so the domain type stays free of storage
/// concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub key: String,
    pub attempt_id: Option<AttemptId>,
    pub payload: String,
    pub saved_at: DateTime<Utc>,
}

impl SnapshotRecord {
    /// Serialize a snapshot under the given key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the snapshot cannot be encoded.
    pub fn from_snapshot(
        key: &ProgressKey,
        snapshot: &ProgressSnapshot,
    ) -> Result<Self, StorageError> {
        let payload = serde_json::to_string(snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Self {
            key: key.storage_key(),
            attempt_id: snapshot.attempt_id.clone(),
            payload,
            saved_at: snapshot.timestamp,
        })
    }

    /// Decode the record back into a domain snapshot.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the payload is not a valid
    /// snapshot or its counters are inconsistent.
    pub fn into_snapshot(self) -> Result<ProgressSnapshot, StorageError> {
        let snapshot: ProgressSnapshot = serde_json::from_str(&self.payload)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        snapshot
            .validate()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(snapshot)
    }
}

/// Repository contract for in-progress attempt snapshots.
///
/// Writes are last-writer-wins per key; two clients saving the same key race
/// without coordination.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Persist or replace the snapshot stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save_snapshot(
        &self,
        key: &ProgressKey,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StorageError>;

    /// Fetch the snapshot stored under `key`, if any.
    ///
    /// No freshness check happens here; retention is a service concern.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for backend or decoding failures.
    async fn load_snapshot(
        &self,
        key: &ProgressKey,
    ) -> Result<Option<ProgressSnapshot>, StorageError>;

    /// Remove the snapshot under `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for backend failures.
    async fn clear_snapshot(&self, key: &ProgressKey) -> Result<(), StorageError>;

    /// Remove every snapshot saved before `cutoff`, returning how many went.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for backend failures.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    snapshots: Arc<Mutex<HashMap<String, SnapshotRecord>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.len())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn save_snapshot(
        &self,
        key: &ProgressKey,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StorageError> {
        let record = SnapshotRecord::from_snapshot(key, snapshot)?;
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(record.key.clone(), record);
        Ok(())
    }

    async fn load_snapshot(
        &self,
        key: &ProgressKey,
    ) -> Result<Option<ProgressSnapshot>, StorageError> {
        let record = {
            let guard = self
                .snapshots
                .lock()
                .map_err(|e| StorageError::Connection(e.to_string()))?;
            guard.get(&key.storage_key()).cloned()
        };
        record.map(SnapshotRecord::into_snapshot).transpose()
    }

    async fn clear_snapshot(&self, key: &ProgressKey) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&key.storage_key());
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let before = guard.len();
        guard.retain(|_, record| record.saved_at >= cutoff);
        Ok(u64::try_from(before - guard.len()).unwrap_or(u64::MAX))
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let progress: Arc<dyn ProgressRepository> = Arc::new(InMemoryRepository::new());
        Self { progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::{AssessmentRef, LearnerId, QuestionId};
    use assess_core::time::fixed_now;

    fn snapshot() -> ProgressSnapshot {
        ProgressSnapshot {
            attempt_id: Some(AttemptId::new("att-1")),
            mastery_score: 42,
            authoritative: false,
            correct: 2,
            total: 3,
            streak: 1,
            credit: 20,
            answered_ids: vec![QuestionId::new("q1"), QuestionId::new("q2"), QuestionId::new("q3")],
            timestamp: fixed_now(),
        }
    }

    #[tokio::test]
    async fn round_trips_snapshot_by_key() {
        let repo = InMemoryRepository::new();
        let key = ProgressKey::Attempt(AttemptId::new("att-1"));
        repo.save_snapshot(&key, &snapshot()).await.unwrap();

        let loaded = repo.load_snapshot(&key).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot());

        let other = ProgressKey::for_learner(&LearnerId::new("u1"), &AssessmentRef::new("quiz"));
        assert!(repo.load_snapshot(&other).await.unwrap().is_none());

        repo.clear_snapshot(&key).await.unwrap();
        assert!(repo.load_snapshot(&key).await.unwrap().is_none());
        repo.clear_snapshot(&key).await.unwrap();
    }

    #[tokio::test]
    async fn learner_keys_with_separators_stay_apart() {
        let repo = InMemoryRepository::new();
        let first = ProgressKey::for_learner(&LearnerId::new("a:b"), &AssessmentRef::new("c"));
        let second = ProgressKey::for_learner(&LearnerId::new("a"), &AssessmentRef::new("b:c"));
        repo.save_snapshot(&first, &snapshot()).await.unwrap();
        assert!(repo.load_snapshot(&second).await.unwrap().is_none());
        assert!(repo.load_snapshot(&first).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_drops_old_records_only() {
        let repo = InMemoryRepository::new();
        let old_key = ProgressKey::Attempt(AttemptId::new("old"));
        let mut old = snapshot();
        old.timestamp = fixed_now() - chrono::Duration::days(10);
        repo.save_snapshot(&old_key, &old).await.unwrap();
        let new_key = ProgressKey::Attempt(AttemptId::new("new"));
        repo.save_snapshot(&new_key, &snapshot()).await.unwrap();

        let purged = repo
            .purge_older_than(fixed_now() - chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[test]
    fn record_rejects_inconsistent_payload() {
        let mut bad = snapshot();
        bad.correct = 9;
        let key = ProgressKey::Attempt(AttemptId::new("att-1"));
        let record = SnapshotRecord::from_snapshot(&key, &bad).unwrap();
        assert!(matches!(
            record.into_snapshot(),
            Err(StorageError::Serialization(_))
        ));
    }
}
