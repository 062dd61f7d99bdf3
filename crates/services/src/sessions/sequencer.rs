use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use assess_core::model::{
    AnsweredIdSet, AttemptId, BankQuestion, Passage, Question, QuestionId, Response,
};

use crate::error::ProviderError;
use crate::provider::{AssessmentProvider, NextQuestion};

/// Outcome of asking the sequencer for the next question.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencerStep {
    Present(Question),
    Complete,
    /// The provider reported completion for an attempt with nothing answered
    /// or an empty bank.
    Corrupt,
}

enum Source {
    Provider {
        provider: Arc<dyn AssessmentProvider>,
        attempt_id: AttemptId,
    },
    Bank {
        questions: Vec<BankQuestion>,
        cursor: usize,
    },
}

/// Decides which question comes next and when an attempt terminates.
pub struct QuestionSequencer {
    source: Source,
    limit: Option<u32>,
    track_passages: bool,
    passages: Vec<Passage>,
    max_refetches: u32,
}

impl QuestionSequencer {
    /// Provider-driven sequencing for an established attempt.
    #[must_use]
    pub fn adaptive(
        provider: Arc<dyn AssessmentProvider>,
        attempt_id: AttemptId,
        max_refetches: u32,
    ) -> Self {
        Self {
            source: Source::Provider {
                provider,
                attempt_id,
            },
            limit: None,
            track_passages: false,
            passages: Vec::new(),
            max_refetches,
        }
    }

    /// Walk a pre-fetched bank in order.
    #[must_use]
    pub fn static_bank(questions: Vec<BankQuestion>) -> Self {
        Self {
            source: Source::Bank {
                questions,
                cursor: 0,
            },
            limit: None,
            track_passages: false,
            passages: Vec::new(),
            max_refetches: 0,
        }
    }

    /// Stop after exactly `count` answered questions and collect the passages
    /// shown along the way.
    #[must_use]
    pub fn with_fixed_length(mut self, count: u32) -> Self {
        self.limit = Some(count);
        self.track_passages = true;
        self
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self.source, Source::Bank { .. })
    }

    #[must_use]
    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    /// Distinct passages shown so far, in first-seen order.
    #[must_use]
    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Number of questions in a static bank, `None` for provider sequencing.
    #[must_use]
    pub fn bank_len(&self) -> Option<usize> {
        match &self.source {
            Source::Bank { questions, .. } => Some(questions.len()),
            Source::Provider { .. } => None,
        }
    }

    /// Fetch the next question not yet in `answered`.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError` if the provider fails, or keeps serving answered
    /// questions past the refetch bound.
    pub async fn next(&mut self, answered: &AnsweredIdSet) -> Result<SequencerStep, ProviderError> {
        if let Some(limit) = self.limit {
            if answered.len() >= limit as usize {
                debug!(limit, "fixed-length attempt reached its question count");
                return Ok(SequencerStep::Complete);
            }
        }

        let max_refetches = self.max_refetches;
        let step = match &mut self.source {
            Source::Provider {
                provider,
                attempt_id,
            } => Self::next_from_provider(
                provider.as_ref(),
                attempt_id,
                answered,
                max_refetches,
            )
            .await?,
            Source::Bank { questions, cursor } => Self::next_from_bank(questions, cursor, answered),
        };

        if let SequencerStep::Present(question) = &step {
            self.remember_passage(question);
        }
        Ok(step)
    }

    fn remember_passage(&mut self, question: &Question) {
        if !self.track_passages {
            return;
        }
        if let Some(passage) = question.passage() {
            if !self.passages.iter().any(|p| p.same_as(passage)) {
                self.passages.push(passage.clone());
            }
        }
    }

    async fn next_from_provider(
        provider: &dyn AssessmentProvider,
        attempt_id: &AttemptId,
        answered: &AnsweredIdSet,
        max_refetches: u32,
    ) -> Result<SequencerStep, ProviderError> {
        for _ in 0..=max_refetches {
            match provider.next_question(attempt_id, answered.as_slice()).await? {
                NextQuestion::Question(question) if answered.contains(question.id()) => {
                    warn!(
                        attempt_id = %attempt_id,
                        question_id = %question.id(),
                        "provider served an answered question, refetching"
                    );
                }
                NextQuestion::Question(question) => return Ok(SequencerStep::Present(question)),
                NextQuestion::Complete {
                    total_questions,
                    answered_questions,
                } => {
                    let answered_total = answered.len().max(answered_questions as usize);
                    if total_questions == Some(0) || answered_total == 0 {
                        warn!(attempt_id = %attempt_id, ?total_questions, "provider reported completion with nothing answered");
                        return Ok(SequencerStep::Corrupt);
                    }
                    return Ok(SequencerStep::Complete);
                }
            }
        }
        Err(ProviderError::Protocol(format!(
            "provider served answered questions {} times in a row",
            max_refetches + 1
        )))
    }

    fn next_from_bank(
        questions: &[BankQuestion],
        cursor: &mut usize,
        answered: &AnsweredIdSet,
    ) -> SequencerStep {
        while let Some(entry) = questions.get(*cursor) {
            *cursor += 1;
            if answered.contains(entry.question().id()) {
                continue;
            }
            let question = entry
                .question()
                .clone()
                .reorder_choices(|choices| choices.shuffle(&mut rand::rng()));
            return SequencerStep::Present(question);
        }
        SequencerStep::Complete
    }

    /// Judge a response against the local bank key. `None` when the question
    /// is not from a local bank.
    #[must_use]
    pub fn judge_locally(&self, question: &QuestionId, response: &Response) -> Option<bool> {
        match &self.source {
            Source::Bank { questions, .. } => questions
                .iter()
                .find(|entry| entry.question().id() == question)
                .map(|entry| entry.judge(response)),
            Source::Provider { .. } => None,
        }
    }

    /// Attempt id behind provider sequencing.
    #[must_use]
    pub fn attempt_id(&self) -> Option<&AttemptId> {
        match &self.source {
            Source::Provider { attempt_id, .. } => Some(attempt_id),
            Source::Bank { .. } => None,
        }
    }

    pub(crate) fn provider(&self) -> Option<&Arc<dyn AssessmentProvider>> {
        match &self.source {
            Source::Provider { provider, .. } => Some(provider),
            Source::Bank { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::model::{AnswerKey, Choice, ChoiceId, PassageId, QuestionDraft};

    fn bank_question(id: &str, passage: Option<&str>) -> BankQuestion {
        let question = QuestionDraft {
            id: Some(QuestionId::new(id)),
            prompt: format!("prompt {id}"),
            choices: vec![
                Choice::new("a", "A"),
                Choice::new("b", "B"),
                Choice::new("c", "C"),
            ],
            passage: passage.map(|p| Passage {
                id: Some(PassageId::new(p)),
                title: None,
                body: format!("body {p}"),
            }),
            ..QuestionDraft::default()
        }
        .validate(QuestionId::new(id))
        .unwrap();
        BankQuestion::new(question, AnswerKey::Choice(ChoiceId::new("b"))).unwrap()
    }

    #[tokio::test]
    async fn bank_skips_answered_and_keeps_choice_set() {
        let mut seq = QuestionSequencer::static_bank(vec![
            bank_question("q1", None),
            bank_question("q2", None),
        ]);
        let answered: AnsweredIdSet = [QuestionId::new("q1")].into_iter().collect();

        let SequencerStep::Present(q) = seq.next(&answered).await.unwrap() else {
            panic!("expected a question");
        };
        assert_eq!(q.id(), &QuestionId::new("q2"));
        let mut ids: Vec<&str> = q.choices().iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b", "c"]);

        assert_eq!(seq.next(&answered).await.unwrap(), SequencerStep::Complete);
    }

    #[tokio::test]
    async fn fixed_length_stops_at_count_and_collects_passages() {
        let mut seq = QuestionSequencer::static_bank(vec![
            bank_question("q1", Some("p1")),
            bank_question("q2", Some("p1")),
            bank_question("q3", Some("p2")),
            bank_question("q4", Some("p3")),
        ])
        .with_fixed_length(3);

        let mut answered = AnsweredIdSet::new();
        for _ in 0..3 {
            let SequencerStep::Present(q) = seq.next(&answered).await.unwrap() else {
                panic!("expected a question");
            };
            answered.insert(q.id().clone());
        }
        assert_eq!(seq.next(&answered).await.unwrap(), SequencerStep::Complete);
        let passage_ids: Vec<_> = seq
            .passages()
            .iter()
            .filter_map(|p| p.id.as_ref().map(|id| id.as_str().to_owned()))
            .collect();
        assert_eq!(passage_ids, vec!["p1", "p2"]);
    }

    #[test]
    fn local_judging_uses_bank_keys() {
        let seq = QuestionSequencer::static_bank(vec![bank_question("q1", None)]);
        let q1 = QuestionId::new("q1");
        assert_eq!(
            seq.judge_locally(&q1, &Response::Choice(ChoiceId::new("b"))),
            Some(true)
        );
        assert_eq!(
            seq.judge_locally(&q1, &Response::Choice(ChoiceId::new("a"))),
            Some(false)
        );
        assert_eq!(
            seq.judge_locally(&QuestionId::new("zz"), &Response::Text("b".into())),
            None
        );
    }
}
