use chrono::Duration;
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("progress retention must be between 1 and 90 days")]
    InvalidRetentionDays,

    #[error("credit accuracy threshold must be a percentage in 0..=100")]
    InvalidAccuracyThreshold,

    #[error("base credit must be > 0")]
    InvalidBaseCredit,

    #[error("duplicate refetch limit must be > 0")]
    InvalidDuplicateRefetches,
}

//
// ─── SETTINGS ──────────────────────────────────────────────────────────────────
//

/// Tunables of the assessment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssessmentSettings {
    retention_days: u32,
    credit_accuracy_threshold_pct: u8,
    base_credit: u32,
    max_duplicate_refetches: u32,
}

impl Default for AssessmentSettings {
    /// - snapshots are kept for 7 days
    /// - credit is kept only at 80% accuracy or better
    /// - 10 credit per correct answer before streak bonus
    /// - 3 re-requests when the provider serves an already answered question
    fn default() -> Self {
        Self {
            retention_days: 7,
            credit_accuracy_threshold_pct: 80,
            base_credit: 10,
            max_duplicate_refetches: 3,
        }
    }
}

impl AssessmentSettings {
    /// Creates custom settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if any value is out of range.
    pub fn new(
        retention_days: u32,
        credit_accuracy_threshold_pct: u8,
        base_credit: u32,
        max_duplicate_refetches: u32,
    ) -> Result<Self, SettingsError> {
        if !(1..=90).contains(&retention_days) {
            return Err(SettingsError::InvalidRetentionDays);
        }
        if credit_accuracy_threshold_pct > 100 {
            return Err(SettingsError::InvalidAccuracyThreshold);
        }
        if base_credit == 0 {
            return Err(SettingsError::InvalidBaseCredit);
        }
        if max_duplicate_refetches == 0 {
            return Err(SettingsError::InvalidDuplicateRefetches);
        }
        Ok(Self {
            retention_days,
            credit_accuracy_threshold_pct,
            base_credit,
            max_duplicate_refetches,
        })
    }

    #[must_use]
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::days(i64::from(self.retention_days))
    }

    #[must_use]
    pub fn credit_accuracy_threshold_pct(&self) -> u8 {
        self.credit_accuracy_threshold_pct
    }

    #[must_use]
    pub fn base_credit(&self) -> u32 {
        self.base_credit
    }

    #[must_use]
    pub fn max_duplicate_refetches(&self) -> u32 {
        self.max_duplicate_refetches
    }
}
