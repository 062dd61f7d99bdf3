use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::attempt::Attempt;
use crate::model::ids::{AssessmentRef, AttemptId, LearnerId};
use crate::model::score::{MasteryScore, ScoreState};

/// Whether `correct` out of `total` reaches `threshold_pct` percent.
///
/// Integer arithmetic keeps exact boundaries exact (80/100 at 80% passes).
#[must_use]
pub fn meets_accuracy_threshold(correct: u32, total: u32, threshold_pct: u8) -> bool {
    if total == 0 {
        return false;
    }
    u64::from(correct) * 100 >= u64::from(total) * u64::from(threshold_pct)
}

/// Final result of a completed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalOutcome {
    pub attempt_id: Option<AttemptId>,
    pub learner: LearnerId,
    pub assessment: AssessmentRef,
    pub mastery_score: MasteryScore,
    pub correct: u32,
    pub total: u32,
    pub accuracy: f64,
    /// Credit kept after the accuracy gate.
    pub credit: u32,
    /// Credit accumulated during the attempt before the gate.
    pub credit_accumulated: u32,
    /// Completion alone passes an attempt; accuracy does not gate progression.
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
}

impl FinalOutcome {
    /// Compute the outcome of a completed attempt.
    ///
    /// Credit is zeroed when accuracy is below `credit_threshold_pct`.
    #[must_use]
    pub fn compute(
        attempt: &Attempt,
        state: &ScoreState,
        credit_threshold_pct: u8,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let keeps_credit =
            meets_accuracy_threshold(state.correct(), state.total(), credit_threshold_pct);
        Self {
            attempt_id: attempt.id().cloned(),
            learner: attempt.learner().clone(),
            assessment: attempt.assessment().clone(),
            mastery_score: state.canonical(),
            correct: state.correct(),
            total: state.total(),
            accuracy: state.accuracy(),
            credit: if keeps_credit { state.credit() } else { 0 },
            credit_accumulated: state.credit(),
            passed: true,
            completed_at,
        }
    }

    #[must_use]
    pub fn credit_forfeited(&self) -> bool {
        self.credit < self.credit_accumulated
    }
}
