use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Identifiers handed out by the assessment provider or the host app are opaque
// strings; the newtypes only keep them from being mixed up.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the underlying string value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(ParseIdError {
                        kind: stringify!($name),
                    });
                }
                Ok(Self(trimmed.to_owned()))
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Provider-assigned identifier of one learner's pass through an assessment.
    AttemptId
);
string_id!(
    /// Identifier of a single question.
    QuestionId
);
string_id!(
    /// Identifier of one answer choice within a question.
    ChoiceId
);
string_id!(
    /// Identifier of the learner taking the assessment.
    LearnerId
);
string_id!(
    /// Reference to the assessment (quiz, lesson check, exam) being attempted.
    AssessmentRef
);
string_id!(
    /// Identifier of a reading passage attached to questions.
    PassageId
);

// ─── Parse Errors ──────────────────────────────────────────────────────────────

/// Error type for parsing an ID from a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from an empty string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_id_display_is_raw_value() {
        let id = AttemptId::new("att-42");
        assert_eq!(id.to_string(), "att-42");
        assert_eq!(format!("{id:?}"), "AttemptId(\"att-42\")");
    }

    #[test]
    fn question_id_from_str_trims() {
        let id: QuestionId = "  q-7 ".parse().unwrap();
        assert_eq!(id, QuestionId::new("q-7"));
    }

    #[test]
    fn empty_id_is_rejected() {
        let err = "   ".parse::<LearnerId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse LearnerId from an empty string");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&ChoiceId::new("b")).unwrap();
        assert_eq!(json, "\"b\"");
        let back: ChoiceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ChoiceId::new("b"));
    }
}
