use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::ids::{AssessmentRef, AttemptId, LearnerId, QuestionId};
use crate::model::score::{AnsweredIdSet, MasteryScore, ScoreState};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("snapshot records {correct} correct answers out of {total}")]
    CountMismatch { correct: u32, total: u32 },

    #[error("snapshot score {0} is outside 0..=100")]
    ScoreOutOfRange(u8),
}

//
// ─── KEY ───────────────────────────────────────────────────────────────────────
//

/// Where an in-progress attempt is stored.
///
/// The provider's attempt id is stable across reloads and is preferred; the
/// learner/assessment pair is used until an attempt id is known.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProgressKey {
    Attempt(AttemptId),
    Learner {
        learner: LearnerId,
        assessment: AssessmentRef,
    },
}

impl ProgressKey {
    #[must_use]
    pub fn for_learner(learner: &LearnerId, assessment: &AssessmentRef) -> Self {
        Self::Learner {
            learner: learner.clone(),
            assessment: assessment.clone(),
        }
    }

    /// Pick the attempt key when an attempt id exists, the learner key otherwise.
    #[must_use]
    pub fn derive(
        attempt: Option<&AttemptId>,
        learner: &LearnerId,
        assessment: &AssessmentRef,
    ) -> Self {
        match attempt {
            Some(id) => Self::Attempt(id.clone()),
            None => Self::for_learner(learner, assessment),
        }
    }

    /// Flat string form used by storage adapters.
    ///
    /// Ids are opaque and may contain `:`, so the learner id is length-prefixed
    /// to keep every pair on its own key.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            ProgressKey::Attempt(id) => format!("assess:attempt:{id}"),
            ProgressKey::Learner {
                learner,
                assessment,
            } => format!(
                "assess:learner:{}:{learner}:{assessment}",
                learner.as_str().len()
            ),
        }
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

//
// ─── SNAPSHOT ──────────────────────────────────────────────────────────────────
//

/// Serializable projection of an attempt's scoring state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub attempt_id: Option<AttemptId>,
    pub mastery_score: u8,
    /// Whether `mastery_score` came from the provider.
    #[serde(default)]
    pub authoritative: bool,
    pub correct: u32,
    pub total: u32,
    pub streak: u32,
    pub credit: u32,
    pub answered_ids: Vec<QuestionId>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressSnapshot {
    /// Capture the persistable part of an attempt.
    ///
    /// The stored score is the canonical one: the last provider score when one
    /// was received, the local estimate otherwise.
    #[must_use]
    pub fn capture(
        attempt_id: Option<&AttemptId>,
        state: &ScoreState,
        answered: &AnsweredIdSet,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            attempt_id: attempt_id.cloned(),
            mastery_score: state.canonical().value(),
            authoritative: state.authoritative().is_some(),
            correct: state.correct(),
            total: state.total(),
            streak: state.streak(),
            credit: state.credit(),
            answered_ids: answered.as_slice().to_vec(),
            timestamp: at,
        }
    }

    /// A snapshot is usable while its age is within the retention window.
    /// Timestamps in the future (clock skew) count as fresh.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        now.signed_duration_since(self.timestamp) <= retention
    }

    /// Check internal consistency of a snapshot read back from storage.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotError` for impossible counters or scores.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.correct > self.total {
            return Err(SnapshotError::CountMismatch {
                correct: self.correct,
                total: self.total,
            });
        }
        if self.mastery_score > crate::model::score::MAX_SCORE {
            return Err(SnapshotError::ScoreOutOfRange(self.mastery_score));
        }
        Ok(())
    }

    /// Rebuild the scoring state and answered set.
    #[must_use]
    pub fn rehydrate(&self) -> (ScoreState, AnsweredIdSet) {
        let state = ScoreState::from_persisted(
            MasteryScore::new(self.mastery_score),
            self.authoritative,
            self.correct,
            self.total,
            self.streak,
            self.credit,
        );
        let answered = self.answered_ids.iter().cloned().collect();
        (state, answered)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn snapshot_at(at: DateTime<Utc>) -> ProgressSnapshot {
        ProgressSnapshot {
            attempt_id: Some(AttemptId::new("att-1")),
            mastery_score: 55,
            authoritative: false,
            correct: 4,
            total: 6,
            streak: 2,
            credit: 40,
            answered_ids: vec![QuestionId::new("q1"), QuestionId::new("q2")],
            timestamp: at,
        }
    }

    #[test]
    fn key_prefers_attempt_id() {
        let learner = LearnerId::new("u1");
        let quiz = AssessmentRef::new("quiz-9");
        let key = ProgressKey::derive(Some(&AttemptId::new("att-1")), &learner, &quiz);
        assert_eq!(key.storage_key(), "assess:attempt:att-1");

        let key = ProgressKey::derive(None, &learner, &quiz);
        assert_eq!(key.storage_key(), "assess:learner:2:u1:quiz-9");
    }

    #[test]
    fn learner_keys_do_not_collide_on_separators() {
        let first = ProgressKey::for_learner(&LearnerId::new("a:b"), &AssessmentRef::new("c"));
        let second = ProgressKey::for_learner(&LearnerId::new("a"), &AssessmentRef::new("b:c"));
        assert_ne!(first.storage_key(), second.storage_key());
    }

    #[test]
    fn freshness_follows_retention_window() {
        let saved = fixed_now();
        let snapshot = snapshot_at(saved);
        let retention = Duration::days(7);
        assert!(snapshot.is_fresh(saved + Duration::days(6), retention));
        assert!(snapshot.is_fresh(saved + Duration::days(7), retention));
        assert!(!snapshot.is_fresh(saved + Duration::days(8), retention));
        assert!(snapshot.is_fresh(saved - Duration::hours(1), retention));
    }

    #[test]
    fn validate_rejects_impossible_counts() {
        let mut snapshot = snapshot_at(fixed_now());
        snapshot.correct = 7;
        assert_eq!(
            snapshot.validate().unwrap_err(),
            SnapshotError::CountMismatch {
                correct: 7,
                total: 6
            }
        );
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let snapshot = snapshot_at(fixed_now());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["attemptId"], "att-1");
        assert_eq!(json["masteryScore"], 55);
        assert_eq!(json["answeredIds"][1], "q2");

        let back: ProgressSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn rehydrate_restores_counters() {
        let (state, answered) = snapshot_at(fixed_now()).rehydrate();
        assert_eq!(state.mastery().value(), 55);
        assert_eq!(state.correct(), 4);
        assert_eq!(state.total(), 6);
        assert_eq!(state.streak(), 2);
        assert_eq!(state.credit(), 40);
        assert!(answered.contains(&QuestionId::new("q2")));
    }
}
