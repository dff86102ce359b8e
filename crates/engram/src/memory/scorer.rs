//! Importance scoring and decay
//!
//! The scorer is a pure function of its inputs: it assigns an initial
//! importance to candidate facts and computes a note's decayed importance
//! on demand. Decay is evaluated lazily at read and maintenance time rather
//! than being rewritten into the store continuously.

use chrono::{DateTime, Utc};

use crate::config::ScoringConfig;
use crate::memory::patterns;
use crate::memory::types::{ImportanceHint, ImportanceLevel, ScoredNote};

/// Base score when no hint is given
pub const DEFAULT_BASE_IMPORTANCE: f32 = 0.3;
/// Content shorter than this is penalised
pub const SHORT_CONTENT_CHARS: usize = 20;
/// Content longer than this is penalised
pub const LONG_CONTENT_CHARS: usize = 500;
/// Penalty applied for very short or very long content
pub const LENGTH_PENALTY: f32 = 0.1;
/// Bonus per recorded access
pub const ACCESS_BONUS_PER_HIT: f32 = 0.05;
/// Cap on the access bonus
pub const MAX_ACCESS_BONUS: f32 = 0.5;
/// Age factor slope: importance halves after 100 days of age alone
pub const AGE_FACTOR_PER_DAY: f32 = 0.01;

const SECONDS_PER_DAY: f32 = 86_400.0;

/// Stateless importance scorer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImportanceScorer {
    config: ScoringConfig,
}

impl ImportanceScorer {
    /// Create a scorer with default thresholds
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scorer with custom thresholds
    pub fn with_config(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Get the current configuration
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a candidate fact.
    ///
    /// Starts from the hint's base level (or 0.3), adds the weight of every
    /// matching pattern rule and the section weight, subtracts a penalty for
    /// very short or very long content, and clamps to [0, 1].
    pub fn score(&self, content: &str, section: &str, hint: Option<ImportanceHint>) -> f32 {
        let mut score = hint
            .map(ImportanceHint::base_importance)
            .unwrap_or(DEFAULT_BASE_IMPORTANCE);

        score += patterns::matching_rules(content)
            .map(|rule| rule.weight)
            .sum::<f32>();

        score += patterns::section_weight(section);

        let length = content.trim().chars().count();
        if length < SHORT_CONTENT_CHARS || length > LONG_CONTENT_CHARS {
            score -= LENGTH_PENALTY;
        }

        score.clamp(0.0, 1.0)
    }

    /// Bucket a score using the configured thresholds.
    pub fn classify(&self, score: f32) -> ImportanceLevel {
        if score >= self.config.core_threshold {
            ImportanceLevel::Core
        } else if score >= self.config.high_threshold {
            ImportanceLevel::High
        } else if score >= self.config.medium_threshold {
            ImportanceLevel::Medium
        } else {
            ImportanceLevel::Low
        }
    }

    /// Effective importance of a note at `now`.
    ///
    /// Formula: clamp01((importance - staleness + access_bonus) * age_factor) where
    /// - staleness = days since last access (or creation) * decay_rate
    /// - access_bonus = min(0.5, access_count * 0.05)
    /// - age_factor = 1 / (1 + days since creation * 0.01)
    pub fn decay(&self, note: &ScoredNote, now: DateTime<Utc>) -> f32 {
        let days_created = days_between(note.created_at, now);
        let days_access = days_between(note.last_touched(), now);

        let access_bonus = (note.access_count as f32 * ACCESS_BONUS_PER_HIT).min(MAX_ACCESS_BONUS);
        let age_factor = 1.0 / (1.0 + days_created * AGE_FACTOR_PER_DAY);
        let staleness = days_access * note.decay_rate;

        ((note.importance - staleness + access_bonus) * age_factor).clamp(0.0, 1.0)
    }

    /// Notes whose decayed score is below `threshold`
    /// (default: the configured archive threshold).
    pub fn archival_candidates<'a>(
        &self,
        notes: &'a [ScoredNote],
        now: DateTime<Utc>,
        threshold: Option<f32>,
    ) -> Vec<&'a ScoredNote> {
        let threshold = threshold.unwrap_or(self.config.archive_threshold);
        notes
            .iter()
            .filter(|note| self.decay(note, now) < threshold)
            .collect()
    }

    /// Notes with raw importance at or above `threshold`
    /// (default: the core threshold) that have been accessed often enough.
    pub fn promotion_candidates<'a>(
        &self,
        notes: &'a [ScoredNote],
        threshold: Option<f32>,
    ) -> Vec<&'a ScoredNote> {
        let threshold = threshold.unwrap_or(self.config.core_threshold);
        notes
            .iter()
            .filter(|note| {
                note.importance >= threshold
                    && note.access_count >= self.config.promotion_min_access
            })
            .collect()
    }

    /// Whether a note is still worth surfacing: its decayed score must exceed
    /// `threshold` (default: the configured retrieval threshold).
    pub fn should_retrieve(
        &self,
        note: &ScoredNote,
        now: DateTime<Utc>,
        threshold: Option<f32>,
    ) -> bool {
        let threshold = threshold.unwrap_or(self.config.retrieval_threshold);
        self.decay(note, now) > threshold
    }

    /// Decay rate for new content: more important facts fade more slowly.
    pub fn suggest_decay_rate(&self, content: &str, section: &str) -> f32 {
        match self.classify(self.score(content, section, None)) {
            ImportanceLevel::Core => 0.005,
            ImportanceLevel::High => 0.01,
            ImportanceLevel::Medium => 0.02,
            ImportanceLevel::Low => 0.05,
        }
    }
}

/// Fractional days from `from` to `to`, never negative.
fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f32 {
    ((to - from).num_seconds().max(0) as f32) / SECONDS_PER_DAY
}
