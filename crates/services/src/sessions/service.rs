use tokio_util::sync::CancellationToken;

use assess_core::model::{
    AnsweredIdSet, Attempt, DifficultyProfile, FinalOutcome, Passage, ProgressKey, Question,
    ScoreState, SequencingMode,
};

use super::progress::{SessionPhase, SessionProgress};
use super::sequencer::QuestionSequencer;
use crate::provider::StartRequest;

//
// ─── OPTIONS ───────────────────────────────────────────────────────────────────
//

/// Caller choices for starting an attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub subject: Option<String>,
    pub grade_level: Option<String>,
    pub mode: SequencingMode,
    pub difficulty_profile: DifficultyProfile,
    /// Use the static bank when no provider attempt can be established.
    pub allow_static_fallback: bool,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            subject: None,
            grade_level: None,
            mode: SequencingMode::Adaptive,
            difficulty_profile: DifficultyProfile::default(),
            allow_static_fallback: true,
        }
    }
}

impl StartOptions {
    #[must_use]
    pub fn fixed_length(count: u32) -> Self {
        Self {
            mode: SequencingMode::FixedLength { count },
            ..Self::default()
        }
    }

    #[must_use]
    pub fn static_bank() -> Self {
        Self {
            mode: SequencingMode::StaticBank,
            ..Self::default()
        }
    }
}

/// What the learner should see next.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStep {
    Question(Question),
    Complete,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingState {
    Open,
    Submitting,
    Answered,
}

/// One learner's live attempt.
///
/// Owned by the caller and driven through `AttemptService`; no other
/// component mutates the score or the answered set.
pub struct AssessmentSession {
    pub(crate) attempt: Attempt,
    pub(crate) request: StartRequest,
    pub(crate) options: StartOptions,
    pub(crate) sequencer: QuestionSequencer,
    pub(crate) score: ScoreState,
    pub(crate) answered: AnsweredIdSet,
    pub(crate) current: Option<Question>,
    pub(crate) pending: PendingState,
    pub(crate) corrupt_retry_used: bool,
    pub(crate) phase: SessionPhase,
    pub(crate) outcome: Option<FinalOutcome>,
    pub(crate) progress_key: ProgressKey,
    pub(crate) cancel: CancellationToken,
}

impl AssessmentSession {
    pub(crate) fn new(
        attempt: Attempt,
        request: StartRequest,
        options: StartOptions,
        sequencer: QuestionSequencer,
    ) -> Self {
        let progress_key =
            ProgressKey::derive(attempt.id(), attempt.learner(), attempt.assessment());
        Self {
            attempt,
            request,
            options,
            sequencer,
            score: ScoreState::new(),
            answered: AnsweredIdSet::new(),
            current: None,
            pending: PendingState::Answered,
            corrupt_retry_used: false,
            phase: SessionPhase::Active,
            outcome: None,
            progress_key,
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn present(&mut self, question: Question) {
        self.current = Some(question);
        self.pending = PendingState::Open;
    }

    pub(crate) fn complete(&mut self) {
        self.current = None;
        self.pending = PendingState::Answered;
        self.phase = SessionPhase::Complete;
    }

    pub(crate) fn reset_local(&mut self) {
        self.score = ScoreState::new();
        self.answered = AnsweredIdSet::new();
        self.current = None;
        self.pending = PendingState::Answered;
        self.phase = SessionPhase::Idle;
        self.outcome = None;
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
    }

    /// Keys snapshots of this attempt may live under.
    pub(crate) fn progress_keys(&self) -> Vec<ProgressKey> {
        let legacy = ProgressKey::for_learner(self.attempt.learner(), self.attempt.assessment());
        if legacy == self.progress_key {
            vec![legacy]
        } else {
            vec![self.progress_key.clone(), legacy]
        }
    }

    /// Replace a cancelled token so later requests can run.
    pub(crate) fn renew_cancel_token(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    #[must_use]
    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    #[must_use]
    pub fn score(&self) -> &ScoreState {
        &self.score
    }

    #[must_use]
    pub fn answered(&self) -> &AnsweredIdSet {
        &self.answered
    }

    /// Question presented and not yet answered, if any.
    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        match self.pending {
            PendingState::Open | PendingState::Submitting => self.current.as_ref(),
            PendingState::Answered => None,
        }
    }

    #[must_use]
    pub fn is_awaiting_response(&self) -> bool {
        self.pending == PendingState::Open && self.current.is_some()
    }

    /// Passages accumulated by a fixed-length attempt.
    #[must_use]
    pub fn passages(&self) -> &[Passage] {
        self.sequencer.passages()
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.sequencer.is_static()
    }

    #[must_use]
    pub fn progress_key(&self) -> &ProgressKey {
        &self.progress_key
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&FinalOutcome> {
        self.outcome.as_ref()
    }

    /// Token that aborts the request currently in flight for this attempt.
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Clear a submission left half-done by a dropped future so the question
    /// can be answered again.
    pub fn abandon_in_flight(&mut self) {
        if self.pending == PendingState::Submitting {
            self.pending = PendingState::Open;
        }
        self.renew_cancel_token();
    }

    #[must_use]
    pub fn progress(&self) -> SessionProgress {
        let planned = match self.attempt.mode() {
            SequencingMode::FixedLength { count } => Some(count as usize),
            SequencingMode::Adaptive | SequencingMode::StaticBank => self.sequencer.bank_len(),
        };
        SessionProgress {
            answered: self.answered.len(),
            correct: self.score.correct(),
            score: self.score.mastery(),
            streak: self.score.streak(),
            credit: self.score.credit(),
            planned,
            phase: self.phase,
        }
    }
}
