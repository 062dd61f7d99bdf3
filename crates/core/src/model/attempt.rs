use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{AssessmentRef, AttemptId, LearnerId};
use crate::model::question::{Difficulty, Question};

/// How questions are sequenced and when an attempt terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SequencingMode {
    /// The provider picks each question and reports completion.
    Adaptive,
    /// A bank fetched once is walked in order until exhausted.
    StaticBank,
    /// Terminates after exactly `count` questions, whatever the score.
    FixedLength { count: u32 },
}

/// How question difficulty maps onto the stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "profile", content = "tier", rename_all = "snake_case")]
pub enum DifficultyProfile {
    /// Use each question's tag, defaulting to medium.
    #[default]
    Tagged,
    /// Score every question at one tier.
    Uniform(Difficulty),
}

impl DifficultyProfile {
    #[must_use]
    pub fn resolve(self, question: &Question) -> Difficulty {
        match self {
            DifficultyProfile::Tagged => question.difficulty(),
            DifficultyProfile::Uniform(tier) => tier,
        }
    }
}

/// One learner's pass through one assessment.
///
/// `id` is assigned by the provider; static-bank attempts never get one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    id: Option<AttemptId>,
    learner: LearnerId,
    assessment: AssessmentRef,
    subject: Option<String>,
    difficulty_profile: DifficultyProfile,
    mode: SequencingMode,
    started_at: DateTime<Utc>,
}

impl Attempt {
    #[must_use]
    pub fn new(
        id: Option<AttemptId>,
        learner: LearnerId,
        assessment: AssessmentRef,
        mode: SequencingMode,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            learner,
            assessment,
            subject: None,
            difficulty_profile: DifficultyProfile::default(),
            mode,
            started_at,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: Option<String>) -> Self {
        self.subject = subject;
        self
    }

    #[must_use]
    pub fn with_difficulty_profile(mut self, profile: DifficultyProfile) -> Self {
        self.difficulty_profile = profile;
        self
    }

    #[must_use]
    pub fn id(&self) -> Option<&AttemptId> {
        self.id.as_ref()
    }

    #[must_use]
    pub fn learner(&self) -> &LearnerId {
        &self.learner
    }

    #[must_use]
    pub fn assessment(&self) -> &AssessmentRef {
        &self.assessment
    }

    /// Subject key the attempt was started for, if any.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    #[must_use]
    pub fn difficulty_profile(&self) -> DifficultyProfile {
        self.difficulty_profile
    }

    #[must_use]
    pub fn mode(&self) -> SequencingMode {
        self.mode
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::QuestionId;
    use crate::model::question::{Choice, QuestionDraft};

    fn question(tag: Option<Difficulty>) -> Question {
        QuestionDraft {
            prompt: "Q".into(),
            choices: vec![Choice::new("a", "A")],
            difficulty: tag,
            ..QuestionDraft::default()
        }
        .validate(QuestionId::new("q"))
        .unwrap()
    }

    #[test]
    fn tagged_profile_defaults_to_medium() {
        let profile = DifficultyProfile::Tagged;
        assert_eq!(profile.resolve(&question(None)), Difficulty::Medium);
        assert_eq!(profile.resolve(&question(Some(Difficulty::Hard))), Difficulty::Hard);
    }

    #[test]
    fn uniform_profile_ignores_tags() {
        let profile = DifficultyProfile::Uniform(Difficulty::Easy);
        assert_eq!(profile.resolve(&question(Some(Difficulty::Hard))), Difficulty::Easy);
    }
}
