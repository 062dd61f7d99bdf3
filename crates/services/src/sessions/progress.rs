use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use assess_core::Clock;
use assess_core::model::{
    AnsweredIdSet, AssessmentRef, AttemptId, LearnerId, MasteryScore, ProgressKey,
    ProgressSnapshot, ScoreState,
};
use storage::repository::{ProgressRepository, StorageError};

/// Where an attempt is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Questions are being served and answered.
    Active,
    /// The sequencer reported termination; the attempt awaits finalize.
    Complete,
    /// The outcome has been computed and cached.
    Finalized,
    /// Local state was reset; nothing is pending.
    Idle,
}

/// Aggregated view of attempt progress, useful for UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProgress {
    pub answered: usize,
    pub correct: u32,
    pub score: MasteryScore,
    pub streak: u32,
    pub credit: u32,
    /// Question count for fixed-length or static attempts.
    pub planned: Option<usize>,
    pub phase: SessionPhase,
}

impl SessionProgress {
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        self.planned.map(|planned| planned.saturating_sub(self.answered))
    }
}

/// Snapshot persistence with retention and key fallback.
#[derive(Clone)]
pub struct ProgressTracker {
    repo: Arc<dyn ProgressRepository>,
    clock: Clock,
    retention: Duration,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(repo: Arc<dyn ProgressRepository>, clock: Clock, retention: Duration) -> Self {
        Self {
            repo,
            clock,
            retention,
        }
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Snapshot the scoring state under `key`, stamped with the clock's now.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the repository write fails.
    pub async fn save(
        &self,
        key: &ProgressKey,
        attempt_id: Option<&AttemptId>,
        state: &ScoreState,
        answered: &AnsweredIdSet,
    ) -> Result<(), StorageError> {
        let snapshot = ProgressSnapshot::capture(attempt_id, state, answered, self.clock.now());
        self.repo.save_snapshot(key, &snapshot).await?;
        debug!(key = %key, answered = answered.len(), score = snapshot.mastery_score, "progress saved");
        Ok(())
    }

    /// Load the snapshot under `key`.
    ///
    /// Snapshots past the retention window or that fail to decode are cleared
    /// and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for backend failures.
    pub async fn restore(&self, key: &ProgressKey) -> Result<Option<ProgressSnapshot>, StorageError> {
        let snapshot = match self.repo.load_snapshot(key).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(StorageError::Serialization(reason)) => {
                warn!(key = %key, %reason, "discarding unreadable progress snapshot");
                self.repo.clear_snapshot(key).await?;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if !snapshot.is_fresh(self.clock.now(), self.retention) {
            info!(key = %key, saved_at = %snapshot.timestamp, "discarding stale progress snapshot");
            self.repo.clear_snapshot(key).await?;
            return Ok(None);
        }
        Ok(Some(snapshot))
    }

    /// Restore progress for an attempt, preferring the attempt key and falling
    /// back to the learner key.
    ///
    /// A snapshot found under the learner key is only used if it belongs to
    /// this attempt (or predates attempt ids); it is then moved to the attempt
    /// key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for backend failures.
    pub async fn restore_for(
        &self,
        attempt_id: Option<&AttemptId>,
        learner: &LearnerId,
        assessment: &AssessmentRef,
    ) -> Result<Option<(ProgressKey, ProgressSnapshot)>, StorageError> {
        let legacy_key = ProgressKey::for_learner(learner, assessment);
        let Some(attempt_id) = attempt_id else {
            return Ok(self
                .restore(&legacy_key)
                .await?
                .map(|snapshot| (legacy_key, snapshot)));
        };

        let key = ProgressKey::Attempt(attempt_id.clone());
        if let Some(snapshot) = self.restore(&key).await? {
            return Ok(Some((key, snapshot)));
        }

        let Some(mut snapshot) = self.restore(&legacy_key).await? else {
            return Ok(None);
        };
        if snapshot.attempt_id.as_ref().is_some_and(|id| id != attempt_id) {
            debug!(key = %legacy_key, "learner snapshot belongs to another attempt");
            return Ok(None);
        }

        snapshot.attempt_id = Some(attempt_id.clone());
        self.repo.save_snapshot(&key, &snapshot).await?;
        self.repo.clear_snapshot(&legacy_key).await?;
        info!(from = %legacy_key, to = %key, "migrated progress snapshot to attempt key");
        Ok(Some((key, snapshot)))
    }

    /// # Errors
    ///
    /// Returns `StorageError` for backend failures.
    pub async fn clear(&self, key: &ProgressKey) -> Result<(), StorageError> {
        self.repo.clear_snapshot(key).await
    }

    /// Drop every snapshot older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` for backend failures.
    pub async fn purge_expired(&self) -> Result<u64, StorageError> {
        let removed = self
            .repo
            .purge_older_than(self.clock.now() - self.retention)
            .await?;
        if removed > 0 {
            info!(removed, "purged expired progress snapshots");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::QuestionId;
    use assess_core::time::{fixed_clock, fixed_now};
    use storage::repository::InMemoryRepository;

    fn tracker_at(repo: &InMemoryRepository, days: i64) -> ProgressTracker {
        ProgressTracker::new(
            Arc::new(repo.clone()),
            fixed_clock().advanced(Duration::days(days)),
            Duration::days(7),
        )
    }

    fn state() -> (ScoreState, AnsweredIdSet) {
        let snapshot = ProgressSnapshot {
            attempt_id: None,
            mastery_score: 58,
            authoritative: false,
            correct: 2,
            total: 3,
            streak: 1,
            credit: 30,
            answered_ids: vec![QuestionId::new("q1"), QuestionId::new("q2"), QuestionId::new("q3")],
            timestamp: fixed_now(),
        };
        snapshot.rehydrate()
    }

    #[tokio::test]
    async fn restore_honours_retention_window() {
        let repo = InMemoryRepository::new();
        let key = ProgressKey::Attempt(AttemptId::new("att-1"));
        let (score, answered) = state();
        tracker_at(&repo, 0)
            .save(&key, Some(&AttemptId::new("att-1")), &score, &answered)
            .await
            .unwrap();

        let restored = tracker_at(&repo, 6).restore(&key).await.unwrap().unwrap();
        assert_eq!(restored.mastery_score, 58);
        assert_eq!(restored.answered_ids.len(), 3);

        assert!(tracker_at(&repo, 8).restore(&key).await.unwrap().is_none());
        assert_eq!(repo.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn learner_snapshot_migrates_to_attempt_key() {
        let repo = InMemoryRepository::new();
        let tracker = tracker_at(&repo, 0);
        let learner = LearnerId::new("u1");
        let assessment = AssessmentRef::new("quiz");
        let (score, answered) = state();
        tracker
            .save(&ProgressKey::for_learner(&learner, &assessment), None, &score, &answered)
            .await
            .unwrap();

        let attempt = AttemptId::new("att-9");
        let (key, snapshot) = tracker
            .restore_for(Some(&attempt), &learner, &assessment)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, ProgressKey::Attempt(attempt.clone()));
        assert_eq!(snapshot.attempt_id, Some(attempt.clone()));
        assert!(
            tracker
                .restore(&ProgressKey::for_learner(&learner, &assessment))
                .await
                .unwrap()
                .is_none()
        );
        assert!(tracker.restore(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn learner_snapshot_of_other_attempt_is_ignored() {
        let repo = InMemoryRepository::new();
        let tracker = tracker_at(&repo, 0);
        let learner = LearnerId::new("u1");
        let assessment = AssessmentRef::new("quiz");
        let (score, answered) = state();
        tracker
            .save(
                &ProgressKey::for_learner(&learner, &assessment),
                Some(&AttemptId::new("old")),
                &score,
                &answered,
            )
            .await
            .unwrap();

        let found = tracker
            .restore_for(Some(&AttemptId::new("new")), &learner, &assessment)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn purge_uses_retention_cutoff() {
        let repo = InMemoryRepository::new();
        let (score, answered) = state();
        tracker_at(&repo, 0)
            .save(&ProgressKey::Attempt(AttemptId::new("a")), None, &score, &answered)
            .await
            .unwrap();
        tracker_at(&repo, 5)
            .save(&ProgressKey::Attempt(AttemptId::new("b")), None, &score, &answered)
            .await
            .unwrap();

        assert_eq!(tracker_at(&repo, 10).purge_expired().await.unwrap(), 1);
        assert_eq!(repo.len().unwrap(), 1);
    }
}
