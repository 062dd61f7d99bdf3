//! Completion signals for gradebook and credit collaborators.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use assess_core::model::{AssessmentRef, AttemptId, FinalOutcome, LearnerId, MasteryScore};

/// Emitted exactly once per finalized attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionEvent {
    pub attempt_id: Option<AttemptId>,
    pub learner: LearnerId,
    pub assessment: AssessmentRef,
    pub mastery_score: MasteryScore,
    pub accuracy: f64,
    pub credit: u32,
    pub passed: bool,
    pub completed_at: DateTime<Utc>,
}

impl From<&FinalOutcome> for CompletionEvent {
    fn from(outcome: &FinalOutcome) -> Self {
        Self {
            attempt_id: outcome.attempt_id.clone(),
            learner: outcome.learner.clone(),
            assessment: outcome.assessment.clone(),
            mastery_score: outcome.mastery_score,
            accuracy: outcome.accuracy,
            credit: outcome.credit,
            passed: outcome.passed,
            completed_at: outcome.completed_at,
        }
    }
}

/// Receiver of completion events.
pub trait CompletionSink: Send + Sync {
    fn emit(&self, event: CompletionEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompletions;

impl CompletionSink for NoopCompletions {
    fn emit(&self, _event: CompletionEvent) {}
}

/// Fans completion events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastCompletions {
    sender: broadcast::Sender<CompletionEvent>,
}

impl BroadcastCompletions {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastCompletions {
    fn default() -> Self {
        Self::new(16)
    }
}

impl CompletionSink for BroadcastCompletions {
    fn emit(&self, event: CompletionEvent) {
        if self.sender.send(event).is_err() {
            debug!("completion event dropped: no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assess_core::time::fixed_now;

    fn event() -> CompletionEvent {
        CompletionEvent {
            attempt_id: Some(AttemptId::new("att-1")),
            learner: LearnerId::new("u1"),
            assessment: AssessmentRef::new("quiz"),
            mastery_score: MasteryScore::new(70),
            accuracy: 0.8,
            credit: 40,
            passed: true,
            completed_at: fixed_now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let sink = BroadcastCompletions::default();
        let mut rx = sink.subscribe();
        sink.emit(event());
        assert_eq!(rx.recv().await.unwrap(), event());
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        BroadcastCompletions::new(0).emit(event());
        NoopCompletions.emit(event());
    }
}
