mod exam;
mod finalizer;
mod progress;
mod sequencer;
mod service;
mod workflow;

// Public API of the attempt subsystem.
pub use crate::error::SessionError;
pub use exam::{ExamSession, QuestionStatus};
pub use finalizer::ResultFinalizer;
pub use progress::{ProgressTracker, SessionPhase, SessionProgress};
pub use sequencer::{QuestionSequencer, SequencerStep};
pub use service::{AssessmentSession, SessionStep, StartOptions};
pub use workflow::AttemptService;
