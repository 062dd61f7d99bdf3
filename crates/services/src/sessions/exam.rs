use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;

use assess_core::Clock;
use assess_core::model::{Attempt, BankQuestion, FinalOutcome, Question, Response};

use crate::error::ExamError;

/// Per-question state shown on the review screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuestionStatus {
    pub answered: bool,
    pub flagged: bool,
}

/// Exam-style attempt: every question is available up front, answers can be
/// changed until a single submit scores the whole sheet. A timed exam stops
/// taking answers at its deadline; submitting stays possible.
pub struct ExamSession {
    attempt: Attempt,
    questions: Vec<BankQuestion>,
    answers: Vec<Option<Response>>,
    flags: Vec<bool>,
    current: usize,
    time_limit: Option<Duration>,
    clock: Clock,
    outcome: Option<FinalOutcome>,
}

impl ExamSession {
    /// Build an exam over a non-empty bank. Choice order is shuffled once here
    /// so it stays stable while the learner navigates.
    pub(crate) fn new(
        attempt: Attempt,
        questions: Vec<BankQuestion>,
        time_limit: Option<Duration>,
        clock: Clock,
    ) -> Self {
        let mut rng = rand::rng();
        let questions: Vec<BankQuestion> = questions
            .into_iter()
            .map(|entry| {
                let shuffled = entry
                    .question()
                    .clone()
                    .reorder_choices(|choices| choices.shuffle(&mut rng));
                BankQuestion::new(shuffled, entry.key().clone()).unwrap_or(entry)
            })
            .collect();
        let len = questions.len();
        Self {
            attempt,
            questions,
            answers: vec![None; len],
            flags: vec![false; len],
            current: 0,
            time_limit,
            clock,
            outcome: None,
        }
    }

    #[must_use]
    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.question(self.current)
    }

    #[must_use]
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index).map(BankQuestion::question)
    }

    fn check_open(&self) -> Result<(), ExamError> {
        if self.is_submitted() {
            return Err(ExamError::Submitted);
        }
        if self.is_expired(self.clock.now()) {
            return Err(ExamError::Expired);
        }
        Ok(())
    }

    fn check_index(&self, index: usize) -> Result<(), ExamError> {
        if index < self.questions.len() {
            Ok(())
        } else {
            Err(ExamError::OutOfRange {
                index,
                len: self.questions.len(),
            })
        }
    }

    //
    // ─── NAVIGATION ────────────────────────────────────────────────────────────
    //

    /// Jump to any question.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::OutOfRange` for an invalid index.
    pub fn go_to(&mut self, index: usize) -> Result<&Question, ExamError> {
        self.check_index(index)?;
        self.current = index;
        Ok(self.questions[index].question())
    }

    /// Move forward; stays on the last question.
    pub fn next(&mut self) -> Option<&Question> {
        if self.current + 1 < self.questions.len() {
            self.current += 1;
        }
        self.current_question()
    }

    /// Move back; stays on the first question.
    pub fn previous(&mut self) -> Option<&Question> {
        self.current = self.current.saturating_sub(1);
        self.current_question()
    }

    //
    // ─── ANSWERS AND FLAGS ─────────────────────────────────────────────────────
    //

    /// Answer (or change the answer to) the current question.
    ///
    /// # Errors
    ///
    /// See [`ExamSession::answer_at`].
    pub fn answer(&mut self, response: Response) -> Result<(), ExamError> {
        self.answer_at(self.current, response)
    }

    /// Answer (or change the answer to) the question at `index`.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::Submitted` after submit, `Expired` past the
    /// deadline, `OutOfRange` for a bad index and `UnknownChoice` if the
    /// response does not fit the question.
    pub fn answer_at(&mut self, index: usize, response: Response) -> Result<(), ExamError> {
        self.check_open()?;
        self.check_index(index)?;
        let question = self.questions[index].question();
        let fits = match &response {
            Response::Choice(id) => !question.is_free_response() && question.has_choice(id),
            Response::Text(_) => question.is_free_response(),
        };
        if !fits {
            return Err(ExamError::UnknownChoice);
        }
        self.answers[index] = Some(response);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `ExamError::Submitted` after submit, `Expired` past the
    /// deadline, `OutOfRange` for a bad index.
    pub fn clear_answer(&mut self, index: usize) -> Result<(), ExamError> {
        self.check_open()?;
        self.check_index(index)?;
        self.answers[index] = None;
        Ok(())
    }

    #[must_use]
    pub fn answer_of(&self, index: usize) -> Option<&Response> {
        self.answers.get(index).and_then(Option::as_ref)
    }

    /// Toggle the review flag, returning the new state.
    ///
    /// # Errors
    ///
    /// Returns `ExamError::OutOfRange` for an invalid index.
    pub fn toggle_flag(&mut self, index: usize) -> Result<bool, ExamError> {
        self.check_index(index)?;
        self.flags[index] = !self.flags[index];
        Ok(self.flags[index])
    }

    #[must_use]
    pub fn status(&self, index: usize) -> Option<QuestionStatus> {
        Some(QuestionStatus {
            answered: self.answers.get(index)?.is_some(),
            flagged: *self.flags.get(index)?,
        })
    }

    #[must_use]
    pub fn statuses(&self) -> Vec<QuestionStatus> {
        self.answers
            .iter()
            .zip(&self.flags)
            .map(|(answer, flagged)| QuestionStatus {
                answered: answer.is_some(),
                flagged: *flagged,
            })
            .collect()
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_some()).count()
    }

    #[must_use]
    pub fn unanswered(&self) -> Vec<usize> {
        (0..self.answers.len())
            .filter(|&i| self.answers[i].is_none())
            .collect()
    }

    #[must_use]
    pub fn flagged(&self) -> Vec<usize> {
        (0..self.flags.len()).filter(|&i| self.flags[i]).collect()
    }

    //
    // ─── TIMING ────────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.time_limit.map(|limit| self.attempt.started_at() + limit)
    }

    /// Time left at `now`, never negative. `None` for untimed exams.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.deadline()
            .map(|deadline| (deadline - now).max(Duration::zero()))
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    //
    // ─── SUBMIT ────────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.outcome.is_some()
    }

    #[must_use]
    pub fn outcome(&self) -> Option<&FinalOutcome> {
        self.outcome.as_ref()
    }

    /// Judge every question; unanswered ones count as incorrect.
    pub(crate) fn results(&self) -> Vec<bool> {
        self.questions
            .iter()
            .zip(&self.answers)
            .map(|(entry, answer)| answer.as_ref().is_some_and(|r| entry.judge(r)))
            .collect()
    }

    pub(crate) fn mark_submitted(&mut self, outcome: FinalOutcome) {
        self.outcome = Some(outcome);
    }
}
