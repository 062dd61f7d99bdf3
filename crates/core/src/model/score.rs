use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::model::ids::QuestionId;
use crate::model::question::Difficulty;

//
// ─── MASTERY SCORE ─────────────────────────────────────────────────────────────
//

/// Upper bound of the mastery scale.
pub const MAX_SCORE: u8 = 100;

/// Mastery score on a 0..=100 scale.
///
/// Every constructor clamps, deserialization included, so an out-of-range
/// score cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct MasteryScore(u8);

impl MasteryScore {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn new(value: u8) -> Self {
        Self(value.min(MAX_SCORE))
    }

    /// Clamp an arbitrary integer into range.
    #[must_use]
    pub fn from_i32(value: i32) -> Self {
        let clamped = value.clamp(0, i32::from(MAX_SCORE));
        Self(u8::try_from(clamped).unwrap_or(MAX_SCORE))
    }

    /// Round and clamp a provider-reported score. Non-finite values count as zero.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self::ZERO;
        }
        let clamped = value.round().clamp(0.0, f64::from(MAX_SCORE));
        // Clamped to [0, 100] above, so the cast cannot truncate.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let value = clamped as u8;
        Self(value)
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn band(self) -> ScoreBand {
        ScoreBand::of(self)
    }

    /// Apply a signed point change and re-clamp.
    #[must_use]
    pub fn apply(self, delta: i32) -> Self {
        Self::from_i32(i32::from(self.0) + delta)
    }
}

impl From<u8> for MasteryScore {
    fn from(value: u8) -> Self {
        Self::new(value)
    }
}

impl From<MasteryScore> for u8 {
    fn from(score: MasteryScore) -> Self {
        score.0
    }
}

impl fmt::Display for MasteryScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//
// ─── SCORE BANDS ───────────────────────────────────────────────────────────────
//

/// Stage of the mastery scale; each stage has its own point table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreBand {
    /// 0–50
    Exploration,
    /// 51–80
    Building,
    /// 81–95
    Proficiency,
    /// 96–100
    Mastery,
}

impl ScoreBand {
    #[must_use]
    pub fn of(score: MasteryScore) -> Self {
        match score.value() {
            0..=50 => Self::Exploration,
            51..=80 => Self::Building,
            81..=95 => Self::Proficiency,
            _ => Self::Mastery,
        }
    }
}

//
// ─── SCORE STATE ───────────────────────────────────────────────────────────────
//

/// Attempt-scoped scoring state.
///
/// Mutated only through `ScoringEngine`; everything else reads it or rebuilds
/// it from a persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScoreState {
    pub(crate) estimate: MasteryScore,
    pub(crate) authoritative: Option<MasteryScore>,
    pub(crate) correct: u32,
    pub(crate) total: u32,
    pub(crate) streak: u32,
    pub(crate) credit: u32,
    pub(crate) stage_anchor: Option<ScoreBand>,
}

impl ScoreState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild state from persisted counters.
    ///
    /// The stage anchor is not persisted; a restored streak re-anchors on the
    /// band of the restored score.
    #[must_use]
    pub fn from_persisted(
        score: MasteryScore,
        authoritative: bool,
        correct: u32,
        total: u32,
        streak: u32,
        credit: u32,
    ) -> Self {
        Self {
            estimate: score,
            authoritative: authoritative.then_some(score),
            correct: correct.min(total),
            total,
            streak,
            credit,
            stage_anchor: None,
        }
    }

    /// Score to display: the local estimate, rebased on every authoritative value.
    #[must_use]
    pub fn mastery(&self) -> MasteryScore {
        self.estimate
    }

    /// Last score received from the provider, if any.
    #[must_use]
    pub fn authoritative(&self) -> Option<MasteryScore> {
        self.authoritative
    }

    /// Score that may be persisted or reported as final: the last authoritative
    /// value when one was received, otherwise the local estimate.
    #[must_use]
    pub fn canonical(&self) -> MasteryScore {
        self.authoritative.unwrap_or(self.estimate)
    }

    #[must_use]
    pub fn correct(&self) -> u32 {
        self.correct
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    #[must_use]
    pub fn credit(&self) -> u32 {
        self.credit
    }

    /// Fraction of answers that were correct, `0.0` before any answer.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.correct) / f64::from(self.total)
        }
    }
}

/// Effect of a single scored response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreDelta {
    pub question_id: QuestionId,
    pub is_correct: bool,
    pub difficulty: Difficulty,
    pub band: ScoreBand,
    /// Points actually applied after clamping.
    pub points: i32,
    pub score: MasteryScore,
    pub streak: u32,
    pub credit_earned: u32,
    pub feedback: Option<String>,
    pub authoritative: bool,
}

//
// ─── ANSWERED IDS ──────────────────────────────────────────────────────────────
//

/// Question ids already presented in an attempt, in presentation order.
///
/// No id is ever stored twice.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnsweredIdSet {
    order: Vec<QuestionId>,
    seen: HashSet<QuestionId>,
}

impl AnsweredIdSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an id. Returns `false` if it was already present.
    pub fn insert(&mut self, id: QuestionId) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.order.push(id);
        true
    }

    #[must_use]
    pub fn contains(&self, id: &QuestionId) -> bool {
        self.seen.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[QuestionId] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuestionId> {
        self.order.iter()
    }
}

impl FromIterator<QuestionId> for AnsweredIdSet {
    fn from_iter<T: IntoIterator<Item = QuestionId>>(iter: T) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
