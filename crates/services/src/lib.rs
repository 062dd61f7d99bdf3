#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod events;
pub mod provider;
pub mod search;
pub mod sessions;

pub use assess_core::Clock;

pub use config::ProviderConfig;
pub use error::{ConfigError, ExamError, LookupError, ProviderError, SessionError};
pub use events::{BroadcastCompletions, CompletionEvent, CompletionSink, NoopCompletions};
pub use provider::{
    AssessmentDirectory, AssessmentProvider, AssessmentSummary, HttpAssessmentProvider, Judgement,
    NextQuestion, QuestionBank, StartRequest, StartedAttempt,
};
pub use search::{SearchService, SupersedingLookup};
pub use sessions::{
    AssessmentSession, AttemptService, ExamSession, ProgressTracker, QuestionStatus, SessionPhase,
    SessionProgress, SessionStep, StartOptions,
};
