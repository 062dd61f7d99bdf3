//! Contracts for the remote systems an attempt talks to.
//!
//! The provider selects and judges questions; the bank serves a fixed question
//! list when no provider attempt can be established; the directory backs
//! search-style lookups.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use assess_core::model::{
    AssessmentRef, AttemptId, BankQuestion, LearnerId, Question, QuestionId, Response,
};

use crate::error::ProviderError;

mod http;

pub use http::HttpAssessmentProvider;

//
// ─── REQUESTS AND REPLIES ──────────────────────────────────────────────────────
//

/// Parameters for starting (or restarting) a provider attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub learner: LearnerId,
    pub assessment: AssessmentRef,
    pub subject: Option<String>,
    pub grade_level: Option<String>,
    /// Ask the provider to discard any existing attempt and start over.
    pub retry: bool,
}

impl StartRequest {
    #[must_use]
    pub fn new(learner: LearnerId, assessment: AssessmentRef) -> Self {
        Self {
            learner,
            assessment,
            subject: None,
            grade_level: None,
            retry: false,
        }
    }

    #[must_use]
    pub fn retrying(mut self) -> Self {
        self.retry = true;
        self
    }
}

/// Provider reply to a start request.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedAttempt {
    pub attempt_id: AttemptId,
    pub has_existing_progress: bool,
    pub answered_count: Option<u32>,
    /// Size of the question bank behind the attempt, when reported.
    pub question_count: Option<u32>,
    /// Provider's mastery score for a resumed attempt.
    pub score: Option<f64>,
}

impl StartedAttempt {
    #[must_use]
    pub fn new(attempt_id: AttemptId) -> Self {
        Self {
            attempt_id,
            has_existing_progress: false,
            answered_count: None,
            question_count: None,
            score: None,
        }
    }

    /// An attempt the provider says has no questions at all.
    #[must_use]
    pub fn has_empty_bank(&self) -> bool {
        self.question_count == Some(0)
    }
}

/// What the provider serves next.
#[derive(Debug, Clone, PartialEq)]
pub enum NextQuestion {
    Question(Question),
    Complete {
        total_questions: Option<u32>,
        answered_questions: u32,
    },
}

/// Provider judgement of one response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Judgement {
    pub is_correct: bool,
    pub feedback: Option<String>,
    pub xp_earned: Option<u32>,
    pub authoritative_score: Option<f64>,
}

/// One entry of an assessment search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentSummary {
    pub reference: AssessmentRef,
    pub title: String,
    pub subject: Option<String>,
    pub question_count: Option<u32>,
}

//
// ─── TRAITS ────────────────────────────────────────────────────────────────────
//

/// Remote assessment provider.
#[async_trait]
pub trait AssessmentProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `ProviderError` if the attempt cannot be started.
    async fn start_attempt(&self, request: &StartRequest) -> Result<StartedAttempt, ProviderError>;

    /// Ask for the next question, excluding `skip`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` on transport or payload failures.
    async fn next_question(
        &self,
        attempt: &AttemptId,
        skip: &[QuestionId],
    ) -> Result<NextQuestion, ProviderError>;

    /// # Errors
    ///
    /// Returns `ProviderError` on transport or payload failures.
    async fn submit_response(
        &self,
        attempt: &AttemptId,
        question: &QuestionId,
        response: &Response,
    ) -> Result<Judgement, ProviderError>;

    /// Tell the provider the attempt is over.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` on transport failures; callers do not block on it.
    async fn finalize_attempt(&self, attempt: &AttemptId) -> Result<(), ProviderError>;
}

/// Source of static question banks with local answer keys.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// # Errors
    ///
    /// Returns `ProviderError` if the bank cannot be fetched.
    async fn fetch_bank(&self, assessment: &AssessmentRef)
    -> Result<Vec<BankQuestion>, ProviderError>;
}

/// Search-style lookup of assessments.
#[async_trait]
pub trait AssessmentDirectory: Send + Sync {
    /// # Errors
    ///
    /// Returns `ProviderError` on transport or payload failures.
    async fn search(&self, query: &str) -> Result<Vec<AssessmentSummary>, ProviderError>;
}
