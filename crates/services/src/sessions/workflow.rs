use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};

use assess_core::Clock;
use assess_core::model::{
    AssessmentRef, AssessmentSettings, Attempt, FinalOutcome, LearnerId, Question, Response,
    ScoreDelta, SequencingMode,
};
use assess_core::scoring::ScoringEngine;
use storage::repository::{ProgressRepository, Storage};
use tokio_util::sync::CancellationToken;

use super::exam::ExamSession;
use super::finalizer::ResultFinalizer;
use super::progress::{ProgressTracker, SessionPhase};
use super::sequencer::{QuestionSequencer, SequencerStep};
use super::service::{AssessmentSession, PendingState, SessionStep, StartOptions};
use crate::error::SessionError;
use crate::events::{CompletionSink, NoopCompletions};
use crate::provider::{AssessmentProvider, Judgement, QuestionBank, StartRequest};

/// Drives attempts from start to finalize.
///
/// Holds only shared collaborators; all attempt state lives in the
/// `AssessmentSession` the caller owns.
#[derive(Clone)]
pub struct AttemptService {
    clock: Clock,
    settings: AssessmentSettings,
    scoring: ScoringEngine,
    provider: Option<Arc<dyn AssessmentProvider>>,
    bank: Option<Arc<dyn QuestionBank>>,
    progress: ProgressTracker,
    events: Arc<dyn CompletionSink>,
}

impl AttemptService {
    #[must_use]
    pub fn new(
        clock: Clock,
        settings: AssessmentSettings,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            scoring: ScoringEngine::from_settings(&settings),
            progress: ProgressTracker::new(progress, clock, settings.retention()),
            settings,
            provider: None,
            bank: None,
            events: Arc::new(NoopCompletions),
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, settings: AssessmentSettings, storage: &Storage) -> Self {
        Self::new(clock, settings, Arc::clone(&storage.progress))
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn AssessmentProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_bank(mut self, bank: Arc<dyn QuestionBank>) -> Self {
        self.bank = Some(bank);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn CompletionSink>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &AssessmentSettings {
        &self.settings
    }

    #[must_use]
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    fn finalizer(&self) -> ResultFinalizer {
        ResultFinalizer::new(
            self.clock,
            self.settings.credit_accuracy_threshold_pct(),
            self.progress.clone(),
            Arc::clone(&self.events),
        )
    }

    //
    // ─── START ─────────────────────────────────────────────────────────────────
    //

    /// Start an attempt and load its first question.
    ///
    /// Uses the provider when one is configured, falling back to the static
    /// bank if the provider cannot establish an attempt and the options allow
    /// it. Saved progress is restored when fresh.
    ///
    /// # Errors
    ///
    /// - `SessionError::NoProvider` when neither a provider nor a bank is usable
    /// - `SessionError::ProviderUnavailable` when the provider fails and no
    ///   fallback applies
    /// - `SessionError::CorruptSession` when the attempt has no questions even
    ///   after the automatic retry
    pub async fn start(
        &self,
        learner: LearnerId,
        assessment: AssessmentRef,
        options: StartOptions,
    ) -> Result<AssessmentSession, SessionError> {
        let mut request = StartRequest::new(learner, assessment);
        request.subject.clone_from(&options.subject);
        request.grade_level.clone_from(&options.grade_level);

        if options.mode == SequencingMode::StaticBank {
            return self.start_static(request, options, true).await;
        }

        let Some(provider) = self.provider.clone() else {
            if self.bank.is_some() && options.allow_static_fallback {
                debug!(assessment = %request.assessment, "no provider configured; using static bank");
                return self.start_static(request, options, true).await;
            }
            return Err(SessionError::NoProvider);
        };

        match self.start_remote(provider, request.clone(), &options).await {
            Err(SessionError::ProviderUnavailable(err))
                if options.allow_static_fallback && self.bank.is_some() =>
            {
                warn!(assessment = %request.assessment, error = %err, "provider unavailable; falling back to static bank");
                self.start_static(request, options, true).await
            }
            other => other,
        }
    }

    async fn start_remote(
        &self,
        provider: Arc<dyn AssessmentProvider>,
        request: StartRequest,
        options: &StartOptions,
    ) -> Result<AssessmentSession, SessionError> {
        let (mut session, empty_bank) = self.open_remote(provider, request, options).await?;
        if empty_bank {
            self.recover_corrupt(&mut session).await?;
        } else {
            self.fetch_next(&mut session).await?;
        }
        Ok(session)
    }

    /// Start a provider attempt and rehydrate any saved progress for it.
    /// Returns whether the provider reported an empty bank.
    async fn open_remote(
        &self,
        provider: Arc<dyn AssessmentProvider>,
        request: StartRequest,
        options: &StartOptions,
    ) -> Result<(AssessmentSession, bool), SessionError> {
        let started = provider.start_attempt(&request).await?;
        info!(
            attempt_id = %started.attempt_id,
            assessment = %request.assessment,
            retry = request.retry,
            resumed = started.has_existing_progress,
            "provider attempt started"
        );

        let attempt = Attempt::new(
            Some(started.attempt_id.clone()),
            request.learner.clone(),
            request.assessment.clone(),
            options.mode,
            self.clock.now(),
        )
        .with_subject(options.subject.clone())
        .with_difficulty_profile(options.difficulty_profile);

        let mut sequencer = QuestionSequencer::adaptive(
            provider,
            started.attempt_id.clone(),
            self.settings.max_duplicate_refetches(),
        );
        if let SequencingMode::FixedLength { count } = options.mode {
            sequencer = sequencer.with_fixed_length(count);
        }

        let empty_bank = started.has_empty_bank();
        let mut session = AssessmentSession::new(attempt, request, options.clone(), sequencer);
        if !empty_bank {
            self.rehydrate(&mut session, started.score).await;
        }
        Ok((session, empty_bank))
    }

    async fn start_static(
        &self,
        request: StartRequest,
        options: StartOptions,
        restore: bool,
    ) -> Result<AssessmentSession, SessionError> {
        let Some(bank) = &self.bank else {
            return Err(SessionError::NoProvider);
        };
        let questions = bank.fetch_bank(&request.assessment).await?;
        if questions.is_empty() {
            warn!(assessment = %request.assessment, "static bank is empty");
            return Err(SessionError::CorruptSession);
        }

        let mode = match options.mode {
            SequencingMode::FixedLength { count } => SequencingMode::FixedLength { count },
            SequencingMode::Adaptive | SequencingMode::StaticBank => SequencingMode::StaticBank,
        };
        let attempt = Attempt::new(
            None,
            request.learner.clone(),
            request.assessment.clone(),
            mode,
            self.clock.now(),
        )
        .with_subject(options.subject.clone())
        .with_difficulty_profile(options.difficulty_profile);

        let mut sequencer = QuestionSequencer::static_bank(questions);
        if let SequencingMode::FixedLength { count } = mode {
            sequencer = sequencer.with_fixed_length(count);
        }
        info!(assessment = %request.assessment, questions = sequencer.bank_len(), "static attempt started");

        let mut session = AssessmentSession::new(attempt, request, options, sequencer);
        // A local bank has nothing to reset on the provider side.
        session.corrupt_retry_used = true;
        if restore {
            self.rehydrate(&mut session, None).await;
        }
        self.fetch_next(&mut session).await?;
        Ok(session)
    }

    /// Load fresh saved progress into the session. Storage failures only
    /// cost the learner their resume point.
    async fn rehydrate(&self, session: &mut AssessmentSession, reported_score: Option<f64>) {
        let restored = self
            .progress
            .restore_for(
                session.attempt.id(),
                session.attempt.learner(),
                session.attempt.assessment(),
            )
            .await;
        match restored {
            Ok(Some((key, snapshot))) => {
                let (score, answered) = snapshot.rehydrate();
                info!(
                    key = %key,
                    answered = answered.len(),
                    score = score.mastery().value(),
                    "resuming saved progress"
                );
                session.score = score;
                session.answered = answered;
                session.progress_key = key;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "could not restore progress; starting fresh"),
        }

        if let Some(reported) = reported_score {
            self.scoring.apply_authoritative(&mut session.score, reported);
        }
    }

    //
    // ─── SEQUENCING ────────────────────────────────────────────────────────────
    //

    /// Present the next question, or report completion.
    ///
    /// An unanswered question stays current and is returned again.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotStarted` after `reset`
    /// - `SessionError::RequestInFlight` while a response is being submitted
    /// - `SessionError::ProviderUnavailable` / `CorruptSession` from sequencing
    pub async fn advance(&self, session: &mut AssessmentSession) -> Result<SessionStep, SessionError> {
        match session.phase {
            SessionPhase::Idle => return Err(SessionError::NotStarted),
            SessionPhase::Complete | SessionPhase::Finalized => return Ok(SessionStep::Complete),
            SessionPhase::Active => {}
        }
        match (session.pending, &session.current) {
            (PendingState::Submitting, _) => return Err(SessionError::RequestInFlight),
            (PendingState::Open, Some(question)) => return Ok(SessionStep::Question(question.clone())),
            _ => {}
        }
        self.fetch_next(session).await
    }

    async fn fetch_next(&self, session: &mut AssessmentSession) -> Result<SessionStep, SessionError> {
        session.renew_cancel_token();
        let token = session.cancel.clone();
        let step = cancellable(&token, session.sequencer.next(&session.answered)).await?;
        match step {
            SequencerStep::Present(question) => Ok(self.present(session, question)),
            SequencerStep::Complete => {
                info!(attempt_id = ?session.attempt.id(), answered = session.answered.len(), "attempt complete");
                session.complete();
                Ok(SessionStep::Complete)
            }
            SequencerStep::Corrupt => self.recover_corrupt(session).await,
        }
    }

    fn present(&self, session: &mut AssessmentSession, question: Question) -> SessionStep {
        debug!(attempt_id = ?session.attempt.id(), question_id = %question.id(), "presenting question");
        session.present(question.clone());
        SessionStep::Question(question)
    }

    /// The one automatic reset-and-retry for a provider attempt that reports
    /// no questions. A second failure is terminal.
    async fn recover_corrupt(
        &self,
        session: &mut AssessmentSession,
    ) -> Result<SessionStep, SessionError> {
        let provider = if session.corrupt_retry_used {
            None
        } else {
            session.sequencer.provider().cloned()
        };
        let Some(provider) = provider else {
            warn!(attempt_id = ?session.attempt.id(), "attempt still has no questions after retry");
            session.complete();
            return Err(SessionError::CorruptSession);
        };
        warn!(attempt_id = ?session.attempt.id(), "attempt has no questions; restarting once");
        self.clear_progress(session).await;

        let request = session.request.clone().retrying();
        let options = session.options.clone();
        let (fresh, empty_bank) = self.open_remote(provider, request, &options).await?;
        *session = fresh;
        session.corrupt_retry_used = true;
        if empty_bank {
            session.complete();
            return Err(SessionError::CorruptSession);
        }

        let token = session.cancel.clone();
        match cancellable(&token, session.sequencer.next(&session.answered)).await? {
            SequencerStep::Present(question) => Ok(self.present(session, question)),
            SequencerStep::Complete => {
                session.complete();
                Ok(SessionStep::Complete)
            }
            SequencerStep::Corrupt => {
                warn!(attempt_id = ?session.attempt.id(), "retried attempt is still empty");
                session.complete();
                Err(SessionError::CorruptSession)
            }
        }
    }

    //
    // ─── RESPOND ───────────────────────────────────────────────────────────────
    //

    /// Judge and score a response to the current question.
    ///
    /// Returns `Ok(None)` without side effects when there is no open question,
    /// it was already answered, or the response does not fit it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ProviderUnavailable` if the provider cannot
    /// judge the response; the question stays open for another try.
    pub async fn respond(
        &self,
        session: &mut AssessmentSession,
        response: Response,
    ) -> Result<Option<ScoreDelta>, SessionError> {
        if session.phase != SessionPhase::Active || session.pending != PendingState::Open {
            debug!(phase = ?session.phase, "ignoring response: no open question");
            return Ok(None);
        }
        let Some(question) = session.current.clone() else {
            return Ok(None);
        };
        if session.answered.contains(question.id()) {
            debug!(question_id = %question.id(), "ignoring response: already answered");
            return Ok(None);
        }
        let fits = match &response {
            Response::Choice(id) => question.has_choice(id),
            Response::Text(_) => question.is_free_response(),
        };
        if !fits {
            debug!(question_id = %question.id(), "ignoring response that does not fit the question");
            return Ok(None);
        }

        session.renew_cancel_token();
        session.pending = PendingState::Submitting;
        let judgement = match self.judge(session, &question, &response).await {
            Ok(judgement) => judgement,
            Err(err) => {
                session.pending = PendingState::Open;
                return Err(err);
            }
        };

        let difficulty = session.attempt.difficulty_profile().resolve(&question);
        let before = session.score.mastery();
        let mut delta = self.scoring.score(
            &mut session.score,
            question.id().clone(),
            difficulty,
            judgement.is_correct,
            judgement.xp_earned,
        );
        if let Some(reported) = judgement.authoritative_score {
            delta.score = self.scoring.apply_authoritative(&mut session.score, reported);
            delta.points = i32::from(delta.score.value()) - i32::from(before.value());
            delta.authoritative = true;
        }
        delta.feedback = judgement.feedback;

        session.answered.insert(question.id().clone());
        session.pending = PendingState::Answered;
        debug!(
            attempt_id = ?session.attempt.id(),
            question_id = %question.id(),
            correct = delta.is_correct,
            score = delta.score.value(),
            streak = delta.streak,
            "response scored"
        );
        self.save_progress(session).await;
        Ok(Some(delta))
    }

    async fn judge(
        &self,
        session: &AssessmentSession,
        question: &Question,
        response: &Response,
    ) -> Result<Judgement, SessionError> {
        if let Some(is_correct) = session.sequencer.judge_locally(question.id(), response) {
            return Ok(Judgement {
                is_correct,
                ..Judgement::default()
            });
        }
        let (Some(provider), Some(attempt_id)) =
            (session.sequencer.provider(), session.sequencer.attempt_id())
        else {
            return Err(SessionError::NoProvider);
        };
        let token = session.cancel.clone();
        cancellable(
            &token,
            provider.submit_response(attempt_id, question.id(), response),
        )
        .await
    }

    //
    // ─── PERSISTENCE ───────────────────────────────────────────────────────────
    //

    async fn save_progress(&self, session: &AssessmentSession) {
        if let Err(err) = self
            .progress
            .save(
                &session.progress_key,
                session.attempt.id(),
                &session.score,
                &session.answered,
            )
            .await
        {
            warn!(key = %session.progress_key, error = %err, "failed to save progress");
        }
    }

    async fn clear_progress(&self, session: &AssessmentSession) {
        for key in session.progress_keys() {
            if let Err(err) = self.progress.clear(&key).await {
                warn!(key = %key, error = %err, "failed to clear progress");
            }
        }
    }

    /// Best-effort snapshot for when the client is hidden or unloading.
    pub async fn checkpoint(&self, session: &AssessmentSession) {
        if session.phase == SessionPhase::Active {
            self.save_progress(session).await;
        }
    }

    //
    // ─── FINALIZE, RETRY, RESET ────────────────────────────────────────────────
    //

    /// Finalize a completed attempt.
    ///
    /// Calling it again returns the cached outcome without contacting the
    /// provider or emitting another event.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InProgress` while questions remain and
    /// `SessionError::NotStarted` after `reset`.
    pub async fn finalize(&self, session: &mut AssessmentSession) -> Result<FinalOutcome, SessionError> {
        if let Some(outcome) = &session.outcome {
            return Ok(outcome.clone());
        }
        match session.phase {
            SessionPhase::Active => return Err(SessionError::InProgress),
            SessionPhase::Idle => return Err(SessionError::NotStarted),
            SessionPhase::Complete | SessionPhase::Finalized => {}
        }
        let outcome = self
            .finalizer()
            .finalize(
                &session.attempt,
                &session.score,
                session.sequencer.provider(),
                &session.progress_keys(),
            )
            .await;
        session.outcome = Some(outcome.clone());
        session.phase = SessionPhase::Finalized;
        Ok(outcome)
    }

    /// Learner-requested retry: discard saved progress and start over.
    ///
    /// # Errors
    ///
    /// Same as [`AttemptService::start`].
    pub async fn retry(&self, session: &mut AssessmentSession) -> Result<SessionStep, SessionError> {
        self.clear_progress(session).await;
        session.reset_local();

        let request = session.request.clone().retrying();
        let options = session.options.clone();
        let fresh = match session.sequencer.provider().cloned() {
            Some(provider) => self.start_remote(provider, request, &options).await?,
            None => self.start_static(request, options, false).await?,
        };
        *session = fresh;
        Ok(match session.current_question() {
            Some(question) => SessionStep::Question(question.clone()),
            None => SessionStep::Complete,
        })
    }

    /// Drop saved progress and local state without contacting the provider.
    pub async fn reset(&self, session: &mut AssessmentSession) {
        self.clear_progress(session).await;
        session.reset_local();
        info!(attempt_id = ?session.attempt.id(), "attempt reset");
    }

    //
    // ─── EXAM ──────────────────────────────────────────────────────────────────
    //

    /// Start an exam over the static bank.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NoProvider` without a bank,
    /// `ProviderUnavailable` if it cannot be fetched and `CorruptSession` if
    /// it is empty.
    pub async fn start_exam(
        &self,
        learner: LearnerId,
        assessment: AssessmentRef,
        time_limit: Option<Duration>,
    ) -> Result<ExamSession, SessionError> {
        let Some(bank) = &self.bank else {
            return Err(SessionError::NoProvider);
        };
        let questions = bank.fetch_bank(&assessment).await?;
        if questions.is_empty() {
            warn!(assessment = %assessment, "exam bank is empty");
            return Err(SessionError::CorruptSession);
        }
        let attempt = Attempt::new(
            None,
            learner,
            assessment,
            SequencingMode::StaticBank,
            self.clock.now(),
        );
        info!(assessment = %attempt.assessment(), questions = questions.len(), "exam started");
        Ok(ExamSession::new(attempt, questions, time_limit, self.clock))
    }

    /// Score every answer in one pass and finalize. Submitting again returns
    /// the cached outcome.
    pub async fn submit_exam(&self, exam: &mut ExamSession) -> FinalOutcome {
        if let Some(outcome) = exam.outcome() {
            return outcome.clone();
        }
        let state = self.scoring.score_sheet(exam.results());
        let outcome = self
            .finalizer()
            .finalize(exam.attempt(), &state, None, &[])
            .await;
        exam.mark_submitted(outcome.clone());
        outcome
    }
}

/// Await `request` unless the session's cancel token fires first.
async fn cancellable<T, E>(
    token: &CancellationToken,
    request: impl Future<Output = Result<T, E>>,
) -> Result<T, SessionError>
where
    SessionError: From<E>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(SessionError::Cancelled),
        result = request => result.map_err(SessionError::from),
    }
}
