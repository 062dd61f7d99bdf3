use std::sync::Arc;

use tracing::{info, warn};

use assess_core::Clock;
use assess_core::model::{Attempt, FinalOutcome, ProgressKey, ScoreState};

use super::progress::ProgressTracker;
use crate::events::{CompletionEvent, CompletionSink};
use crate::provider::AssessmentProvider;

/// Turns a terminated attempt into its `FinalOutcome`.
///
/// Finalizing never fails: provider and storage errors are logged and the
/// locally computed outcome is returned regardless.
#[derive(Clone)]
pub struct ResultFinalizer {
    clock: Clock,
    credit_threshold_pct: u8,
    progress: ProgressTracker,
    events: Arc<dyn CompletionSink>,
}

impl ResultFinalizer {
    #[must_use]
    pub fn new(
        clock: Clock,
        credit_threshold_pct: u8,
        progress: ProgressTracker,
        events: Arc<dyn CompletionSink>,
    ) -> Self {
        Self {
            clock,
            credit_threshold_pct,
            progress,
            events,
        }
    }

    /// Compute the outcome, notify the provider, clear saved progress and emit
    /// the completion event.
    pub async fn finalize(
        &self,
        attempt: &Attempt,
        state: &ScoreState,
        provider: Option<&Arc<dyn AssessmentProvider>>,
        progress_keys: &[ProgressKey],
    ) -> FinalOutcome {
        let outcome =
            FinalOutcome::compute(attempt, state, self.credit_threshold_pct, self.clock.now());

        if let (Some(provider), Some(attempt_id)) = (provider, attempt.id()) {
            if let Err(err) = provider.finalize_attempt(attempt_id).await {
                warn!(attempt_id = %attempt_id, error = %err, "provider finalize failed; keeping local outcome");
            }
        }

        for key in progress_keys {
            if let Err(err) = self.progress.clear(key).await {
                warn!(key = %key, error = %err, "failed to clear progress snapshot");
            }
        }

        if outcome.credit_forfeited() {
            info!(
                accuracy = outcome.accuracy,
                forfeited = outcome.credit_accumulated,
                "accuracy below credit threshold; credit zeroed"
            );
        }
        self.events.emit(CompletionEvent::from(&outcome));
        info!(
            attempt_id = ?outcome.attempt_id,
            score = outcome.mastery_score.value(),
            correct = outcome.correct,
            total = outcome.total,
            credit = outcome.credit,
            "attempt finalized"
        );
        outcome
    }
}
