use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{ChoiceId, PassageId, QuestionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question prompt cannot be empty")]
    EmptyPrompt,

    #[error("multiple-choice question {0} has no choices")]
    NoChoices(QuestionId),

    #[error("choice {0} appears more than once")]
    DuplicateChoice(ChoiceId),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerKeyError {
    #[error("free-text answer key has no accepted answers")]
    NoAcceptedAnswers,

    #[error("answer key references unknown choice {0}")]
    UnknownChoice(ChoiceId),

    #[error("answer key kind does not match the question kind")]
    KindMismatch,
}

//
// ─── DIFFICULTY ────────────────────────────────────────────────────────────────
//

/// Difficulty tier used to pick a column of the stage table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    /// Lenient parse of a provider difficulty tag.
    ///
    /// Accepts names in any case and the numeric tiers `1`..=`3`. Anything
    /// else (including a missing tag) resolves to `Medium`.
    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        let Some(tag) = tag else {
            return Self::Medium;
        };
        match tag.trim().to_ascii_lowercase().as_str() {
            "easy" | "1" => Self::Easy,
            "hard" | "3" => Self::Hard,
            _ => Self::Medium,
        }
    }
}

//
// ─── CONTENT ───────────────────────────────────────────────────────────────────
//

/// One answer option. Correctness is never carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: ChoiceId,
    pub text: String,
}

impl Choice {
    #[must_use]
    pub fn new(id: impl Into<ChoiceId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Reading passage or other stimulus shown alongside a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub id: Option<PassageId>,
    pub title: Option<String>,
    pub body: String,
}

impl Passage {
    /// Two passages are the same if their ids match, or, when either lacks an
    /// id, if their bodies match.
    #[must_use]
    pub fn same_as(&self, other: &Passage) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.body == other.body,
        }
    }
}

/// Unvalidated question data, as normalized from a provider or bank payload.
#[derive(Debug, Clone, Default)]
pub struct QuestionDraft {
    pub id: Option<QuestionId>,
    pub prompt: String,
    pub choices: Vec<Choice>,
    pub passage: Option<Passage>,
    pub free_response: bool,
    pub difficulty: Option<Difficulty>,
}

impl QuestionDraft {
    /// Validate the draft into a presentable `Question`.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the prompt is blank, a multiple-choice
    /// question has no choices, or choice ids repeat.
    pub fn validate(self, fallback_id: QuestionId) -> Result<Question, QuestionError> {
        let prompt = self.prompt.trim().to_owned();
        if prompt.is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        let id = self.id.unwrap_or(fallback_id);
        if !self.free_response && self.choices.is_empty() {
            return Err(QuestionError::NoChoices(id));
        }

        let mut seen = HashSet::with_capacity(self.choices.len());
        for choice in &self.choices {
            if !seen.insert(&choice.id) {
                return Err(QuestionError::DuplicateChoice(choice.id.clone()));
            }
        }

        Ok(Question {
            id,
            prompt,
            choices: self.choices,
            passage: self.passage,
            free_response: self.free_response,
            difficulty: self.difficulty,
        })
    }
}

/// An immutable unit presented once per attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    id: QuestionId,
    prompt: String,
    choices: Vec<Choice>,
    passage: Option<Passage>,
    free_response: bool,
    difficulty: Option<Difficulty>,
}

impl Question {
    #[must_use]
    pub fn id(&self) -> &QuestionId {
        &self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn choices(&self) -> &[Choice] {
        &self.choices
    }

    #[must_use]
    pub fn passage(&self) -> Option<&Passage> {
        self.passage.as_ref()
    }

    #[must_use]
    pub fn is_free_response(&self) -> bool {
        self.free_response
    }

    #[must_use]
    pub fn difficulty_tag(&self) -> Option<Difficulty> {
        self.difficulty
    }

    /// Difficulty used for scoring; untagged questions count as medium.
    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty.unwrap_or_default()
    }

    #[must_use]
    pub fn has_choice(&self, id: &ChoiceId) -> bool {
        self.choices.iter().any(|c| &c.id == id)
    }

    /// Reorder the choices for presentation; the set of choices is unchanged.
    #[must_use]
    pub fn reorder_choices(mut self, reorder: impl FnOnce(&mut [Choice])) -> Self {
        reorder(&mut self.choices);
        self
    }
}

//
// ─── RESPONSES ─────────────────────────────────────────────────────────────────
//

/// What the learner submitted for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    Choice(ChoiceId),
    Text(String),
}

/// Locally held correct answer, only available for static-bank questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerKey {
    Choice(ChoiceId),
    Text(Vec<String>),
}

impl AnswerKey {
    /// Judge a response against this key.
    ///
    /// Free-text answers match after trimming and case folding.
    #[must_use]
    pub fn judge(&self, response: &Response) -> bool {
        match (self, response) {
            (AnswerKey::Choice(expected), Response::Choice(given)) => expected == given,
            (AnswerKey::Text(accepted), Response::Text(given)) => {
                let given = normalize_text(given);
                accepted.iter().any(|a| normalize_text(a) == given)
            }
            _ => false,
        }
    }
}

fn normalize_text(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A static-bank question together with its answer key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankQuestion {
    question: Question,
    key: AnswerKey,
}

impl BankQuestion {
    /// Pair a question with its key.
    ///
    /// # Errors
    ///
    /// Returns `AnswerKeyError` if the key does not fit the question.
    pub fn new(question: Question, key: AnswerKey) -> Result<Self, AnswerKeyError> {
        match &key {
            AnswerKey::Choice(id) => {
                if question.is_free_response() {
                    return Err(AnswerKeyError::KindMismatch);
                }
                if !question.has_choice(id) {
                    return Err(AnswerKeyError::UnknownChoice(id.clone()));
                }
            }
            AnswerKey::Text(accepted) => {
                if !question.is_free_response() {
                    return Err(AnswerKeyError::KindMismatch);
                }
                if accepted.iter().all(|a| a.trim().is_empty()) {
                    return Err(AnswerKeyError::NoAcceptedAnswers);
                }
            }
        }
        Ok(Self { question, key })
    }

    #[must_use]
    pub fn question(&self) -> &Question {
        &self.question
    }

    #[must_use]
    pub fn key(&self) -> &AnswerKey {
        &self.key
    }

    #[must_use]
    pub fn judge(&self, response: &Response) -> bool {
        self.key.judge(response)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn mc_draft() -> QuestionDraft {
        QuestionDraft {
            id: Some(QuestionId::new("q1")),
            prompt: "  2 + 2 = ? ".into(),
            choices: vec![Choice::new("a", "3"), Choice::new("b", "4")],
            ..QuestionDraft::default()
        }
    }

    #[test]
    fn difficulty_tag_parsing_is_lenient() {
        assert_eq!(Difficulty::from_tag(Some("EASY")), Difficulty::Easy);
        assert_eq!(Difficulty::from_tag(Some(" hard ")), Difficulty::Hard);
        assert_eq!(Difficulty::from_tag(Some("3")), Difficulty::Hard);
        assert_eq!(Difficulty::from_tag(Some("expert")), Difficulty::Medium);
        assert_eq!(Difficulty::from_tag(None), Difficulty::Medium);
    }

    #[test]
    fn validate_trims_prompt_and_defaults_difficulty() {
        let q = mc_draft().validate(QuestionId::new("unused")).unwrap();
        assert_eq!(q.prompt(), "2 + 2 = ?");
        assert_eq!(q.id(), &QuestionId::new("q1"));
        assert_eq!(q.difficulty(), Difficulty::Medium);
        assert_eq!(q.difficulty_tag(), None);
    }

    #[test]
    fn validate_rejects_missing_choices_and_duplicates() {
        let mut draft = mc_draft();
        draft.choices.clear();
        assert!(matches!(
            draft.validate(QuestionId::new("x")),
            Err(QuestionError::NoChoices(_))
        ));

        let mut draft = mc_draft();
        draft.choices.push(Choice::new("a", "again"));
        assert_eq!(
            draft.validate(QuestionId::new("x")).unwrap_err(),
            QuestionError::DuplicateChoice(ChoiceId::new("a"))
        );
    }

    #[test]
    fn free_text_key_ignores_case_and_whitespace() {
        let q = QuestionDraft {
            prompt: "Capital of France?".into(),
            free_response: true,
            ..QuestionDraft::default()
        }
        .validate(QuestionId::new("q2"))
        .unwrap();
        let bank = BankQuestion::new(q, AnswerKey::Text(vec!["Paris".into()])).unwrap();

        assert!(bank.judge(&Response::Text("  paris ".into())));
        assert!(!bank.judge(&Response::Text("Lyon".into())));
        assert!(!bank.judge(&Response::Choice(ChoiceId::new("paris"))));
    }

    #[test]
    fn choice_key_must_reference_existing_choice() {
        let q = mc_draft().validate(QuestionId::new("q1")).unwrap();
        let err = BankQuestion::new(q, AnswerKey::Choice(ChoiceId::new("z"))).unwrap_err();
        assert_eq!(err, AnswerKeyError::UnknownChoice(ChoiceId::new("z")));
    }

    #[test]
    fn passages_compare_by_id_then_body() {
        let a = Passage {
            id: Some(PassageId::new("p1")),
            title: None,
            body: "one".into(),
        };
        let b = Passage {
            id: Some(PassageId::new("p1")),
            title: Some("renamed".into()),
            body: "edited".into(),
        };
        let c = Passage {
            id: None,
            title: None,
            body: "one".into(),
        };
        assert!(a.same_as(&b));
        assert!(a.same_as(&c));
        assert!(!b.same_as(&c));
    }
}
