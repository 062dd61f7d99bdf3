use crate::model::{
    AssessmentSettings, Difficulty, MasteryScore, QuestionId, ScoreBand, ScoreDelta, ScoreState,
};

//
// ─── STAGE TABLE ───────────────────────────────────────────────────────────────
//

/// Streak length after which the credit multiplier starts growing.
pub const STREAK_BONUS_AFTER: u32 = 3;
/// Multiplier growth per correct answer beyond `STREAK_BONUS_AFTER`.
pub const STREAK_MULTIPLIER_STEP: f64 = 0.75;
/// Upper bound on the streak credit multiplier.
pub const STREAK_MULTIPLIER_CAP: f64 = 3.5;

/// Point change for a correct and an incorrect answer in one stage/tier cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDeltas {
    pub correct: i32,
    pub incorrect: i32,
}

/// Look up the stage table.
///
/// Low stages make failure cheap; the top stage asks for a run of correct
/// answers before the score reaches 100.
///
/// | band        | easy   | medium | hard   |
/// |-------------|--------|--------|--------|
/// | Exploration | +3/−1  | +6/−1  | +9/−1  |
/// | Building    | +2/−3  | +5/−2  | +8/−1  |
/// | Proficiency | +1/−3  | +3/−2  | +5/−2  |
/// | Mastery     | +1/−4  | +1/−3  | +3/−2  |
#[must_use]
pub fn stage_deltas(band: ScoreBand, difficulty: Difficulty) -> StageDeltas {
    let (correct, incorrect) = match (band, difficulty) {
        (ScoreBand::Exploration, Difficulty::Easy) => (3, -1),
        (ScoreBand::Exploration, Difficulty::Medium) => (6, -1),
        (ScoreBand::Exploration, Difficulty::Hard) => (9, -1),
        (ScoreBand::Building, Difficulty::Easy) => (2, -3),
        (ScoreBand::Building, Difficulty::Medium) => (5, -2),
        (ScoreBand::Building, Difficulty::Hard) => (8, -1),
        (ScoreBand::Proficiency, Difficulty::Easy) => (1, -3),
        (ScoreBand::Proficiency, Difficulty::Medium) => (3, -2),
        (ScoreBand::Proficiency, Difficulty::Hard) => (5, -2),
        (ScoreBand::Mastery, Difficulty::Easy) => (1, -4),
        (ScoreBand::Mastery, Difficulty::Medium) => (1, -3),
        (ScoreBand::Mastery, Difficulty::Hard) => (3, -2),
    };
    StageDeltas { correct, incorrect }
}

/// Credit multiplier for a streak of consecutive correct answers.
///
/// `1.0` up to and including a streak of 3, then `1 + (streak - 3) * 0.75`,
/// capped at `3.5`.
#[must_use]
pub fn streak_multiplier(streak: u32) -> f64 {
    if streak <= STREAK_BONUS_AFTER {
        return 1.0;
    }
    let extra = f64::from(streak - STREAK_BONUS_AFTER);
    (1.0 + extra * STREAK_MULTIPLIER_STEP).min(STREAK_MULTIPLIER_CAP)
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

/// Applies judged responses to a `ScoreState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringEngine {
    base_credit: u32,
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::from_settings(&AssessmentSettings::default())
    }
}

impl ScoringEngine {
    #[must_use]
    pub fn new(base_credit: u32) -> Self {
        Self { base_credit }
    }

    #[must_use]
    pub fn from_settings(settings: &AssessmentSettings) -> Self {
        Self::new(settings.base_credit())
    }

    #[must_use]
    pub fn base_credit(&self) -> u32 {
        self.base_credit
    }

    /// Credit for the correct answer that brought the streak to `streak`.
    #[must_use]
    pub fn streak_credit(&self, streak: u32) -> u32 {
        let scaled = (f64::from(self.base_credit) * streak_multiplier(streak)).round();
        // base_credit is u32 and the multiplier is at most 3.5.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let credit = scaled.min(f64::from(u32::MAX)) as u32;
        credit
    }

    /// Score one judged response.
    ///
    /// A correct answer uses the band the streak was anchored in, so a streak
    /// that crosses a band boundary keeps its starting rate. An incorrect
    /// answer uses the current band, resets the streak and drops the anchor.
    /// `provider_credit`, when present, replaces the locally computed credit.
    pub fn score(
        &self,
        state: &mut ScoreState,
        question_id: QuestionId,
        difficulty: Difficulty,
        is_correct: bool,
        provider_credit: Option<u32>,
    ) -> ScoreDelta {
        let before = state.estimate;
        state.total = state.total.saturating_add(1);

        let (band, credit_earned) = if is_correct {
            state.correct = state.correct.saturating_add(1);
            state.streak = state.streak.saturating_add(1);
            let band = *state.stage_anchor.get_or_insert_with(|| before.band());
            state.estimate = before.apply(stage_deltas(band, difficulty).correct);
            let earned = provider_credit.unwrap_or_else(|| self.streak_credit(state.streak));
            (band, earned)
        } else {
            state.streak = 0;
            state.stage_anchor = None;
            let band = before.band();
            state.estimate = before.apply(stage_deltas(band, difficulty).incorrect);
            (band, provider_credit.unwrap_or(0))
        };
        state.credit = state.credit.saturating_add(credit_earned);

        ScoreDelta {
            question_id,
            is_correct,
            difficulty,
            band,
            points: i32::from(state.estimate.value()) - i32::from(before.value()),
            score: state.estimate,
            streak: state.streak,
            credit_earned,
            feedback: None,
            authoritative: false,
        }
    }

    /// Record a provider score. It becomes canonical and the local estimate is
    /// rebased onto it.
    pub fn apply_authoritative(&self, state: &mut ScoreState, reported: f64) -> MasteryScore {
        let score = MasteryScore::from_f64(reported);
        state.authoritative = Some(score);
        state.estimate = score;
        state.stage_anchor = None;
        score
    }

    /// Score a whole answer sheet at once, as an exam submit does.
    ///
    /// The resulting score is the rounded percentage of correct answers;
    /// credit follows the same streak rule as live scoring.
    #[must_use]
    pub fn score_sheet(&self, results: impl IntoIterator<Item = bool>) -> ScoreState {
        let mut state = ScoreState::new();
        for is_correct in results {
            state.total = state.total.saturating_add(1);
            if is_correct {
                state.correct = state.correct.saturating_add(1);
                state.streak = state.streak.saturating_add(1);
                state.credit = state.credit.saturating_add(self.streak_credit(state.streak));
            } else {
                state.streak = 0;
            }
        }
        let percent = if state.total == 0 {
            MasteryScore::ZERO
        } else {
            MasteryScore::from_f64(f64::from(state.correct) * 100.0 / f64::from(state.total))
        };
        state.estimate = percent;
        state.authoritative = Some(percent);
        state
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn qid(n: u32) -> QuestionId {
        QuestionId::new(format!("q{n}"))
    }

    fn state_at(score: u8) -> ScoreState {
        ScoreState::from_persisted(MasteryScore::new(score), false, 0, 0, 0, 0)
    }

    #[test]
    fn five_correct_medium_from_forty_stays_in_exploration_rate() {
        let engine = ScoringEngine::default();
        let mut state = state_at(40);
        for n in 0..5 {
            engine.score(&mut state, qid(n), Difficulty::Medium, true, None);
        }
        assert_eq!(state.mastery().value(), 70);
        assert_eq!(state.streak(), 5);
        assert_eq!(state.correct(), 5);
    }

    #[test]
    fn incorrect_uses_current_band_and_resets_streak() {
        let engine = ScoringEngine::default();
        let mut state = state_at(60);
        engine.score(&mut state, qid(1), Difficulty::Hard, true, None);
        assert_eq!(state.mastery().value(), 68);
        let delta = engine.score(&mut state, qid(2), Difficulty::Easy, false, None);
        assert_eq!(delta.band, ScoreBand::Building);
        assert_eq!(delta.points, -3);
        assert_eq!(state.mastery().value(), 65);
        assert_eq!(state.streak(), 0);
    }

    #[test]
    fn new_streak_re_anchors_after_a_miss() {
        let engine = ScoringEngine::default();
        let mut state = state_at(48);
        engine.score(&mut state, qid(1), Difficulty::Medium, true, None); // 54, anchored Exploration
        engine.score(&mut state, qid(2), Difficulty::Medium, false, None); // Building −2 → 52
        let delta = engine.score(&mut state, qid(3), Difficulty::Medium, true, None);
        assert_eq!(delta.band, ScoreBand::Building);
        assert_eq!(state.mastery().value(), 57);
    }

    #[test]
    fn score_never_leaves_range() {
        let engine = ScoringEngine::default();
        let mut state = state_at(2);
        for n in 0..10 {
            engine.score(&mut state, qid(n), Difficulty::Easy, false, None);
            assert!(state.mastery().value() <= 100);
        }
        assert_eq!(state.mastery().value(), 0);

        for n in 10..60 {
            engine.score(&mut state, qid(n), Difficulty::Hard, true, None);
            assert!(state.mastery().value() <= 100);
        }
        assert_eq!(state.mastery().value(), 100);
    }

    #[test]
    fn mastery_gate_penalizes_misses() {
        let engine = ScoringEngine::default();
        let mut state = state_at(97);
        let delta = engine.score(&mut state, qid(1), Difficulty::Easy, false, None);
        assert_eq!(delta.band, ScoreBand::Mastery);
        assert_eq!(state.mastery().value(), 93);
    }

    #[test]
    fn streak_multiplier_curve() {
        assert_eq!(streak_multiplier(0), 1.0);
        assert_eq!(streak_multiplier(3), 1.0);
        assert_eq!(streak_multiplier(4), 1.75);
        assert_eq!(streak_multiplier(5), 2.5);
        assert_eq!(streak_multiplier(6), 3.25);
        assert_eq!(streak_multiplier(7), 3.5);
        assert_eq!(streak_multiplier(40), 3.5);
    }

    #[test]
    fn credit_scales_with_streak_and_resets_on_miss() {
        let engine = ScoringEngine::new(10);
        let mut state = ScoreState::new();
        let earned: Vec<u32> = (0..5)
            .map(|n| {
                engine
                    .score(&mut state, qid(n), Difficulty::Medium, true, None)
                    .credit_earned
            })
            .collect();
        assert_eq!(earned, vec![10, 10, 10, 18, 25]);
        assert_eq!(state.credit(), 73);

        let miss = engine.score(&mut state, qid(9), Difficulty::Medium, false, None);
        assert_eq!(miss.credit_earned, 0);
        let next = engine.score(&mut state, qid(10), Difficulty::Medium, true, None);
        assert_eq!(next.credit_earned, 10);
    }

    #[test]
    fn provider_credit_replaces_local_credit() {
        let engine = ScoringEngine::new(10);
        let mut state = ScoreState::new();
        let delta = engine.score(&mut state, qid(1), Difficulty::Hard, true, Some(42));
        assert_eq!(delta.credit_earned, 42);
        assert_eq!(state.credit(), 42);
    }

    #[test]
    fn authoritative_score_overrides_and_rebases() {
        let engine = ScoringEngine::default();
        let mut state = state_at(40);
        engine.score(&mut state, qid(1), Difficulty::Medium, true, None);
        assert_eq!(state.mastery().value(), 46);

        engine.apply_authoritative(&mut state, 63.4);
        assert_eq!(state.mastery().value(), 63);
        assert_eq!(state.canonical().value(), 63);

        engine.score(&mut state, qid(2), Difficulty::Medium, true, None);
        assert_eq!(state.mastery().value(), 68);
        assert_eq!(state.canonical().value(), 63);

        engine.apply_authoritative(&mut state, 180.0);
        assert_eq!(state.canonical().value(), 100);
    }

    #[test]
    fn sheet_scoring_uses_percentage() {
        let engine = ScoringEngine::new(10);
        let state = engine.score_sheet([true, true, false, true]);
        assert_eq!(state.total(), 4);
        assert_eq!(state.correct(), 3);
        assert_eq!(state.canonical().value(), 75);
        assert_eq!(state.credit(), 30);

        assert_eq!(engine.score_sheet([]).canonical(), MasteryScore::ZERO);
    }
}
