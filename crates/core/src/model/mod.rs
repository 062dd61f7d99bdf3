mod attempt;
mod ids;
mod outcome;
mod question;
mod score;
mod settings;
mod snapshot;

pub use attempt::{Attempt, DifficultyProfile, SequencingMode};
pub use ids::{AssessmentRef, AttemptId, ChoiceId, LearnerId, ParseIdError, PassageId, QuestionId};
pub use outcome::{FinalOutcome, meets_accuracy_threshold};
pub use question::{
    AnswerKey, AnswerKeyError, BankQuestion, Choice, Difficulty, Passage, Question,
    QuestionDraft, QuestionError, Response,
};
pub use score::{AnsweredIdSet, MAX_SCORE, MasteryScore, ScoreBand, ScoreDelta, ScoreState};
pub use settings::{AssessmentSettings, SettingsError};
pub use snapshot::{ProgressKey, ProgressSnapshot, SnapshotError};
