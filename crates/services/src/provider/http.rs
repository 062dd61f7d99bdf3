//! REST adapter for the assessment provider.
//!
//! The backend answers with several spellings for the same field depending on
//! endpoint and version. Everything is normalized here into core types, so no
//! shape sniffing leaks past this module.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use assess_core::model::{
    AnswerKey, AssessmentRef, AttemptId, BankQuestion, Choice, ChoiceId, Difficulty, Passage,
    PassageId, Question, QuestionDraft, QuestionId, Response,
};

use super::{
    AssessmentDirectory, AssessmentProvider, AssessmentSummary, Judgement, NextQuestion,
    QuestionBank, StartRequest, StartedAttempt,
};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// `AssessmentProvider`, `QuestionBank` and `AssessmentDirectory` over HTTP.
#[derive(Clone, Debug)]
pub struct HttpAssessmentProvider {
    client: Client,
    config: ProviderConfig,
}

impl HttpAssessmentProvider {
    /// # Errors
    ///
    /// Returns `ProviderError::Http` if the HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ProviderError::Protocol("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ProviderError> {
        let request = match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus(status));
        }
        let bytes = response.bytes().await?;
        let body = decode_body(&bytes)?;
        if let Some(message) = error_message(&body) {
            return Err(ProviderError::Rejected(message));
        }
        Ok(body)
    }
}

#[async_trait]
impl AssessmentProvider for HttpAssessmentProvider {
    async fn start_attempt(&self, request: &StartRequest) -> Result<StartedAttempt, ProviderError> {
        let url = self.endpoint(&["assessments", "attempts"])?;
        let body = StartBody {
            learner_id: request.learner.as_str(),
            assessment_ref: request.assessment.as_str(),
            subject: request.subject.as_deref(),
            grade_level: request.grade_level.as_deref(),
            retry: request.retry,
        };
        debug!(assessment = %request.assessment, retry = request.retry, "starting provider attempt");
        let reply = self.send(self.client.post(url).json(&body)).await?;
        parse_started(reply)
    }

    async fn next_question(
        &self,
        attempt: &AttemptId,
        skip: &[QuestionId],
    ) -> Result<NextQuestion, ProviderError> {
        let url = self.endpoint(&["attempts", attempt.as_str(), "next"])?;
        let body = NextBody { skip_ids: skip };
        let reply = self.send(self.client.post(url).json(&body)).await?;
        parse_next(reply)
    }

    async fn submit_response(
        &self,
        attempt: &AttemptId,
        question: &QuestionId,
        response: &Response,
    ) -> Result<Judgement, ProviderError> {
        let url = self.endpoint(&["attempts", attempt.as_str(), "responses"])?;
        let body = SubmitBody::new(question, response);
        let reply = self.send(self.client.post(url).json(&body)).await?;
        parse_judgement(reply)
    }

    async fn finalize_attempt(&self, attempt: &AttemptId) -> Result<(), ProviderError> {
        let url = self.endpoint(&["attempts", attempt.as_str(), "finalize"])?;
        self.send(self.client.post(url)).await.map(|_| ())
    }
}

#[async_trait]
impl QuestionBank for HttpAssessmentProvider {
    async fn fetch_bank(
        &self,
        assessment: &AssessmentRef,
    ) -> Result<Vec<BankQuestion>, ProviderError> {
        let url = self.endpoint(&["assessments", assessment.as_str(), "questions"])?;
        let reply = self.send(self.client.get(url)).await?;
        parse_bank(reply)
    }
}

#[async_trait]
impl AssessmentDirectory for HttpAssessmentProvider {
    async fn search(&self, query: &str) -> Result<Vec<AssessmentSummary>, ProviderError> {
        let mut url = self.endpoint(&["assessments", "search"])?;
        url.query_pairs_mut().append_pair("q", query);
        let reply = self.send(self.client.get(url)).await?;
        parse_summaries(reply)
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_timeout() {
        ProviderError::Unavailable(err.to_string())
    } else {
        ProviderError::Http(err)
    }
}

fn error_message(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .and_then(Value::as_str)
                .unwrap_or("provider error")
                .to_owned(),
        ),
        other => Some(other.to_string()),
    }
}

fn protocol(err: serde_json::Error) -> ProviderError {
    ProviderError::Protocol(err.to_string())
}

/// Bodiless acknowledgements (`204`, or `200` with nothing in it) decode as `null`.
fn decode_body(bytes: &[u8]) -> Result<Value, ProviderError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(protocol)
}

//
// ─── REQUEST BODIES ────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBody<'a> {
    learner_id: &'a str,
    assessment_ref: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    grade_level: Option<&'a str>,
    retry: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NextBody<'a> {
    skip_ids: &'a [QuestionId],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBody<'a> {
    question_id: &'a QuestionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    choice_id: Option<&'a ChoiceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    answer: Option<&'a str>,
}

impl<'a> SubmitBody<'a> {
    fn new(question_id: &'a QuestionId, response: &'a Response) -> Self {
        let (choice_id, answer) = match response {
            Response::Choice(id) => (Some(id), None),
            Response::Text(text) => (None, Some(text.as_str())),
        };
        Self {
            question_id,
            choice_id,
            answer,
        }
    }
}

//
// ─── WIRE SHAPES ───────────────────────────────────────────────────────────────
//

/// Ids arrive as strings or as bare numbers.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s.trim().to_owned(),
            Scalar::Number(n) => n.to_string(),
        }
    }
}

/// Canonical field name, then the other spellings in order of preference.
type Spellings = &'static [(&'static str, &'static [&'static str])];

const STARTED_FIELDS: Spellings = &[
    ("attemptId", &["sessionId", "attempt_id", "session_id", "id"]),
    ("hasExistingProgress", &["has_existing_progress", "resumed"]),
    ("answeredCount", &["answered_count", "answeredQuestions"]),
    ("questionCount", &["question_count", "totalQuestions", "bankSize"]),
    ("score", &["masteryScore", "currentScore"]),
];

const COMPLETE_FIELDS: Spellings = &[
    ("totalQuestions", &["total_questions", "questionCount"]),
    ("answeredQuestions", &["answered_questions", "answeredCount"]),
];

const QUESTION_FIELDS: Spellings = &[
    ("id", &["questionId", "question_id", "_id"]),
    ("prompt", &["question", "text", "stem"]),
    ("choices", &["options", "answers"]),
    ("passage", &["stimulus"]),
    ("freeResponse", &["free_response", "isFreeResponse"]),
    ("difficulty", &["difficultyLevel", "level"]),
    ("correctAnswer", &["answer", "correct_answer"]),
    ("acceptedAnswers", &["accepted_answers"]),
];

const CHOICE_FIELDS: Spellings = &[
    ("id", &["choiceId", "key", "value"]),
    ("text", &["label", "content"]),
    ("isCorrect", &["correct", "is_correct"]),
];

const PASSAGE_FIELDS: Spellings = &[("body", &["text", "content"])];

const JUDGEMENT_FIELDS: Spellings = &[
    ("isCorrect", &["correct", "is_correct"]),
    ("feedback", &["explanation", "message"]),
    ("xpEarned", &["xp", "xp_earned"]),
    ("authoritativeScore", &["score", "masteryScore", "authoritative_score"]),
];

const SUMMARY_FIELDS: Spellings = &[
    ("id", &["reference", "slug", "assessmentRef"]),
    ("title", &["name"]),
    ("questionCount", &["totalQuestions", "question_count"]),
];

/// Fold every spelling of a field into its canonical key.
///
/// Replies often carry a legacy and a current spelling side by side. The
/// canonical key wins, then the first non-null alternate; the rest are
/// dropped so the typed shapes below only ever see one key per field.
fn canonicalize(value: Value, fields: Spellings) -> Value {
    let Value::Object(mut map) = value else {
        return value;
    };
    for &(canonical, alternates) in fields {
        let mut chosen = map.remove(canonical).filter(|v| !v.is_null());
        for &alternate in alternates {
            let found = map.remove(alternate).filter(|v| !v.is_null());
            if chosen.is_none() {
                chosen = found;
            }
        }
        if let Some(found) = chosen {
            map.insert(canonical.to_owned(), found);
        }
    }
    Value::Object(map)
}

/// Canonicalize a question along with its nested choices and passage.
fn canonical_question(value: Value) -> Value {
    let mut value = canonicalize(value, QUESTION_FIELDS);
    if let Some(Value::Array(choices)) = value.get_mut("choices") {
        for choice in choices.iter_mut() {
            *choice = canonicalize(choice.take(), CHOICE_FIELDS);
        }
    }
    if let Some(passage) = value.get_mut("passage") {
        *passage = canonicalize(passage.take(), PASSAGE_FIELDS);
    }
    value
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStarted {
    attempt_id: Option<Scalar>,
    #[serde(default)]
    has_existing_progress: bool,
    answered_count: Option<u32>,
    question_count: Option<u32>,
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireComplete {
    total_questions: Option<u32>,
    #[serde(default)]
    answered_questions: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQuestion {
    id: Option<Scalar>,
    prompt: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    passage: Option<WirePassage>,
    #[serde(default)]
    free_response: bool,
    difficulty: Option<Scalar>,
    correct_answer: Option<Scalar>,
    #[serde(default)]
    accepted_answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireChoice {
    Text(String),
    Object(WireChoiceObject),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireChoiceObject {
    id: Option<Scalar>,
    text: Option<String>,
    is_correct: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WirePassage {
    Body(String),
    Object {
        id: Option<Scalar>,
        title: Option<String>,
        body: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJudgement {
    is_correct: Option<bool>,
    feedback: Option<String>,
    xp_earned: Option<u32>,
    authoritative_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSummary {
    id: Scalar,
    title: String,
    subject: Option<String>,
    question_count: Option<u32>,
}

//
// ─── NORMALIZATION ─────────────────────────────────────────────────────────────
//

fn parse_started(body: Value) -> Result<StartedAttempt, ProviderError> {
    let wire: WireStarted =
        serde_json::from_value(canonicalize(body, STARTED_FIELDS)).map_err(protocol)?;
    let attempt_id = wire
        .attempt_id
        .map(Scalar::into_string)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Protocol("start reply carries no attempt id".into()))?;
    Ok(StartedAttempt {
        attempt_id: AttemptId::new(attempt_id),
        has_existing_progress: wire.has_existing_progress,
        answered_count: wire.answered_count,
        question_count: wire.question_count,
        score: wire.score,
    })
}

fn is_complete(body: &Value) -> bool {
    ["complete", "completed", "done"]
        .iter()
        .any(|flag| body.get(flag).and_then(Value::as_bool) == Some(true))
}

/// Unwrap `{ "question": { ... } }` envelopes; bare question objects pass through.
fn question_payload(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("question").is_some_and(Value::is_object) => {
            map.remove("question").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn parse_next(body: Value) -> Result<NextQuestion, ProviderError> {
    if is_complete(&body) {
        let wire: WireComplete =
            serde_json::from_value(canonicalize(body, COMPLETE_FIELDS)).map_err(protocol)?;
        return Ok(NextQuestion::Complete {
            total_questions: wire.total_questions,
            answered_questions: wire.answered_questions,
        });
    }
    let wire: WireQuestion = serde_json::from_value(canonical_question(question_payload(body)))
        .map_err(protocol)?;
    let (question, _) = normalize_question(wire, None)?;
    Ok(NextQuestion::Question(question))
}

fn parse_judgement(body: Value) -> Result<Judgement, ProviderError> {
    let wire: WireJudgement =
        serde_json::from_value(canonicalize(body, JUDGEMENT_FIELDS)).map_err(protocol)?;
    let is_correct = wire
        .is_correct
        .ok_or_else(|| ProviderError::Protocol("judgement carries no correctness".into()))?;
    Ok(Judgement {
        is_correct,
        feedback: wire.feedback.filter(|f| !f.trim().is_empty()),
        xp_earned: wire.xp_earned,
        authoritative_score: wire.authoritative_score,
    })
}

/// Accept either a bare array or an object holding the array under `key`.
fn unwrap_list(body: Value, key: &str) -> Result<Vec<Value>, ProviderError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ProviderError::Protocol(format!("expected a list under `{key}`"))),
        },
        _ => Err(ProviderError::Protocol("expected a list".into())),
    }
}

fn parse_bank(body: Value) -> Result<Vec<BankQuestion>, ProviderError> {
    let mut bank = Vec::new();
    for (index, item) in unwrap_list(body, "questions")?.into_iter().enumerate() {
        let wire: WireQuestion =
            serde_json::from_value(canonical_question(item)).map_err(protocol)?;
        let fallback = QuestionId::new(format!("bank-{}", index + 1));
        let (question, key) = match normalize_question(wire, Some(fallback)) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(index, error = %err, "skipping malformed bank question");
                continue;
            }
        };
        let Some(key) = key else {
            warn!(question_id = %question.id(), "skipping bank question without answer key");
            continue;
        };
        match BankQuestion::new(question, key) {
            Ok(entry) => bank.push(entry),
            Err(err) => warn!(index, error = %err, "skipping bank question with bad key"),
        }
    }
    Ok(bank)
}

fn parse_summaries(body: Value) -> Result<Vec<AssessmentSummary>, ProviderError> {
    unwrap_list(body, "results")?
        .into_iter()
        .map(|item| {
            let wire: WireSummary = serde_json::from_value(canonicalize(item, SUMMARY_FIELDS))
                .map_err(protocol)?;
            Ok(AssessmentSummary {
                reference: AssessmentRef::new(wire.id.into_string()),
                title: wire.title,
                subject: wire.subject,
                question_count: wire.question_count,
            })
        })
        .collect()
}

/// Turn a wire question into a validated `Question` plus any answer key it
/// carries. Provider questions must bring their own id; bank questions may
/// fall back to a positional one.
fn normalize_question(
    wire: WireQuestion,
    fallback_id: Option<QuestionId>,
) -> Result<(Question, Option<AnswerKey>), ProviderError> {
    let id = match (wire.id.map(|s| QuestionId::new(s.into_string())), fallback_id) {
        (Some(id), _) if !id.as_str().is_empty() => id,
        (_, Some(fallback)) => fallback,
        _ => return Err(ProviderError::Protocol("question carries no id".into())),
    };

    let mut correct_choice = None;
    let choices: Vec<Choice> = wire
        .choices
        .into_iter()
        .enumerate()
        .map(|(index, choice)| match choice {
            WireChoice::Text(text) => Choice::new(index.to_string(), text),
            WireChoice::Object(obj) => {
                let choice_id = obj
                    .id
                    .map(Scalar::into_string)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| index.to_string());
                let text = obj.text.unwrap_or_else(|| choice_id.clone());
                if obj.is_correct == Some(true) && correct_choice.is_none() {
                    correct_choice = Some(ChoiceId::new(choice_id.clone()));
                }
                Choice::new(choice_id, text)
            }
        })
        .collect();

    let passage = wire.passage.map(|p| match p {
        WirePassage::Body(body) => Passage {
            id: None,
            title: None,
            body,
        },
        WirePassage::Object { id, title, body } => Passage {
            id: id.map(|s| PassageId::new(s.into_string())),
            title,
            body,
        },
    });

    let free_response = wire.free_response || choices.is_empty();
    let answer = wire.correct_answer.map(Scalar::into_string);
    let key = if free_response {
        let mut accepted = wire.accepted_answers;
        accepted.extend(answer);
        (!accepted.is_empty()).then_some(AnswerKey::Text(accepted))
    } else {
        correct_choice
            .or_else(|| {
                let answer = answer?;
                choices
                    .iter()
                    .find(|c| c.id.as_str() == answer || c.text.trim() == answer)
                    .map(|c| c.id.clone())
            })
            .map(AnswerKey::Choice)
    };

    let draft = QuestionDraft {
        id: Some(id.clone()),
        prompt: wire.prompt.unwrap_or_default(),
        choices,
        passage,
        free_response,
        difficulty: wire
            .difficulty
            .map(|d| Difficulty::from_tag(Some(&d.into_string()))),
    };
    Ok((draft.validate(id)?, key))
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
