use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;

use assess_core::model::{
    AnswerKey, AssessmentRef, AssessmentSettings, BankQuestion, Choice, ChoiceId, LearnerId,
    QuestionDraft, QuestionId, Response,
};
use assess_core::time::{fixed_clock, fixed_now};
use services::{
    AttemptService, BroadcastCompletions, ExamError, ProviderError, QuestionBank, SessionError,
};
use storage::repository::InMemoryRepository;

struct Bank(Vec<BankQuestion>);

#[async_trait]
impl QuestionBank for Bank {
    async fn fetch_bank(
        &self,
        _assessment: &AssessmentRef,
    ) -> Result<Vec<BankQuestion>, ProviderError> {
        Ok(self.0.clone())
    }
}

fn bank(count: usize) -> Bank {
    Bank(
        (1..=count)
            .map(|n| {
                let question = QuestionDraft {
                    id: Some(QuestionId::new(format!("e{n}"))),
                    prompt: format!("Exam question {n}"),
                    choices: vec![
                        Choice::new("yes", "Yes"),
                        Choice::new("no", "No"),
                        Choice::new("maybe", "Maybe"),
                    ],
                    ..QuestionDraft::default()
                }
                .validate(QuestionId::new(format!("e{n}")))
                .unwrap();
                BankQuestion::new(question, AnswerKey::Choice(ChoiceId::new("yes"))).unwrap()
            })
            .collect(),
    )
}

fn yes() -> Response {
    Response::Choice(ChoiceId::new("yes"))
}

fn no() -> Response {
    Response::Choice(ChoiceId::new("no"))
}

fn service(questions: usize) -> (AttemptService, InMemoryRepository) {
    let repo = InMemoryRepository::new();
    let svc = AttemptService::new(
        fixed_clock(),
        AssessmentSettings::default(),
        Arc::new(repo.clone()),
    )
    .with_bank(Arc::new(bank(questions)));
    (svc, repo)
}

#[tokio::test]
async fn exam_scores_whole_sheet_on_submit() {
    let (svc, repo) = service(5);
    let events = Arc::new(BroadcastCompletions::default());
    let mut completions = events.subscribe();
    let svc = svc.with_events(events);

    let mut exam = svc
        .start_exam(LearnerId::new("u1"), AssessmentRef::new("midterm"), None)
        .await
        .unwrap();
    assert_eq!(exam.len(), 5);

    // Answer out of order, change one answer and flag another for review.
    exam.answer_at(4, yes()).unwrap();
    exam.go_to(0).unwrap();
    exam.answer(no()).unwrap();
    exam.answer(yes()).unwrap();
    exam.next();
    exam.answer(yes()).unwrap();
    exam.answer_at(2, yes()).unwrap();
    exam.toggle_flag(3).unwrap();

    assert_eq!(exam.answered_count(), 4);
    assert_eq!(exam.unanswered(), vec![3]);
    assert_eq!(exam.flagged(), vec![3]);

    let outcome = svc.submit_exam(&mut exam).await;
    assert_eq!(outcome.total, 5);
    assert_eq!(outcome.correct, 4);
    assert_eq!(outcome.mastery_score.value(), 80);
    assert_eq!(outcome.credit, 40);
    assert!(outcome.attempt_id.is_none());

    let again = svc.submit_exam(&mut exam).await;
    assert_eq!(again, outcome);
    assert!(completions.try_recv().is_ok());
    assert!(completions.try_recv().is_err(), "resubmit emits nothing");
    assert_eq!(repo.len().unwrap(), 0, "exams keep no snapshots");
}

#[tokio::test]
async fn submitted_exam_is_read_only() {
    let (svc, _repo) = service(2);
    let mut exam = svc
        .start_exam(LearnerId::new("u1"), AssessmentRef::new("midterm"), None)
        .await
        .unwrap();
    exam.answer(yes()).unwrap();
    svc.submit_exam(&mut exam).await;

    assert!(exam.is_submitted());
    assert_eq!(exam.answer(no()), Err(ExamError::Submitted));
    assert_eq!(exam.clear_answer(0), Err(ExamError::Submitted));
    assert_eq!(exam.answer_of(0), Some(&yes()));
    // Review flags stay usable for the results screen.
    assert!(exam.toggle_flag(1).unwrap());
}

#[tokio::test]
async fn sparse_exam_forfeits_credit() {
    let (svc, _repo) = service(4);
    let mut exam = svc
        .start_exam(LearnerId::new("u1"), AssessmentRef::new("midterm"), None)
        .await
        .unwrap();
    exam.answer_at(0, yes()).unwrap();
    exam.answer_at(1, yes()).unwrap();
    exam.answer_at(2, no()).unwrap();

    let outcome = svc.submit_exam(&mut exam).await;
    assert_eq!(outcome.correct, 2);
    assert_eq!(outcome.mastery_score.value(), 50);
    assert_eq!(outcome.credit_accumulated, 20);
    assert_eq!(outcome.credit, 0);
    assert!(outcome.passed);
}

#[tokio::test]
async fn timed_exam_reports_deadline() {
    let (svc, _repo) = service(3);
    let exam = svc
        .start_exam(
            LearnerId::new("u1"),
            AssessmentRef::new("midterm"),
            Some(Duration::minutes(20)),
        )
        .await
        .unwrap();
    assert_eq!(exam.deadline(), Some(fixed_now() + Duration::minutes(20)));
    assert!(exam.is_expired(fixed_now() + Duration::minutes(20)));
}

#[tokio::test]
async fn expired_exam_rejects_answers_but_still_submits() {
    let (svc, _repo) = service(3);
    let mut exam = svc
        .start_exam(
            LearnerId::new("u1"),
            AssessmentRef::new("midterm"),
            Some(Duration::zero()),
        )
        .await
        .unwrap();
    assert_eq!(exam.answer(yes()), Err(ExamError::Expired));
    assert_eq!(exam.answer_at(2, yes()), Err(ExamError::Expired));
    assert_eq!(exam.answered_count(), 0);

    let outcome = svc.submit_exam(&mut exam).await;
    assert!(exam.is_submitted());
    assert_eq!(outcome.total, 3);
    assert_eq!(outcome.correct, 0);
}

#[tokio::test]
async fn exam_requires_a_non_empty_bank() {
    let repo = InMemoryRepository::new();
    let without_bank = AttemptService::new(
        fixed_clock(),
        AssessmentSettings::default(),
        Arc::new(repo.clone()),
    );
    let err = without_bank
        .start_exam(LearnerId::new("u1"), AssessmentRef::new("midterm"), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::NoProvider));

    let (empty, _repo) = service(0);
    let err = empty
        .start_exam(LearnerId::new("u1"), AssessmentRef::new("midterm"), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::CorruptSession));
}
