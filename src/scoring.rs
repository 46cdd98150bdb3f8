//! Engagement scoring
//!
//! Turns cleaned records into weighted engagement scores:
//! - Each indicator is mapped onto [0, 1] by its scale maximum
//! - The composite is a fixed convex combination of the four sub-scores
//! - A recommended action and a coarse band are derived from fixed thresholds

use crate::config::{ActionThresholds, BandThresholds, MissingPolicy, ScoringWeights};
use crate::types::{
    CleanedRecord, EngagementBand, EngagementScoreRecord, Indicator, RecommendedAction,
    SubScores,
};

/// Scorer holding the weights and thresholds of one run
#[derive(Debug, Clone, Default)]
pub struct EngagementScorer {
    weights: ScoringWeights,
    actions: ActionThresholds,
    bands: BandThresholds,
    missing: MissingPolicy,
}

impl EngagementScorer {
    pub fn new(
        weights: ScoringWeights,
        actions: ActionThresholds,
        bands: BandThresholds,
        missing: MissingPolicy,
    ) -> Self {
        Self {
            weights,
            actions,
            bands,
            missing,
        }
    }

    /// Score every cleaned record
    pub fn score_all(&self, records: Vec<CleanedRecord>) -> Vec<EngagementScoreRecord> {
        let scored: Vec<EngagementScoreRecord> =
            records.into_iter().map(|record| self.score(record)).collect();
        tracing::debug!(records = scored.len(), "scored engagement");
        scored
    }

    pub fn score(&self, cleaned: CleanedRecord) -> EngagementScoreRecord {
        let sub_scores = self.sub_scores(&cleaned);
        let engagement = self.composite(&sub_scores);

        EngagementScoreRecord {
            cleaned,
            sub_scores,
            engagement,
            engagement_pct: round_to(engagement * 100.0, 2),
            band: self.band(engagement),
            recommended_action: self.recommend(&sub_scores, engagement),
        }
    }

    /// Map raw indicator values onto [0, 1], filling blanks per the policy
    pub fn sub_scores(&self, cleaned: &CleanedRecord) -> SubScores {
        let unit = |indicator: Indicator| {
            let value = cleaned
                .value(indicator)
                .unwrap_or_else(|| self.missing.value_for(indicator));
            indicator.scale().unit(value)
        };

        SubScores {
            prep_score: unit(Indicator::Preparation),
            attendance_score: unit(Indicator::Attendance),
            homework_score: unit(Indicator::Homework),
            interaction_score: unit(Indicator::Participation),
        }
    }

    /// Weighted composite engagement score
    pub fn composite(&self, s: &SubScores) -> f64 {
        let [prep, attendance, homework, interaction] = self.weights.normalized();
        let engagement = prep * s.prep_score
            + attendance * s.attendance_score
            + homework * s.homework_score
            + interaction * s.interaction_score;
        // float noise only; the weights are convex
        engagement.clamp(0.0, 1.0)
    }

    /// First matching rule wins
    pub fn recommend(&self, s: &SubScores, engagement: f64) -> RecommendedAction {
        let t = &self.actions;
        if s.attendance_score < t.attendance_floor {
            RecommendedAction::AttendanceOutreach
        } else if s.homework_score < t.homework_floor && s.prep_score < t.prep_floor {
            RecommendedAction::AsyncTutoring
        } else if s.interaction_score < t.interaction_floor {
            RecommendedAction::ClassroomEngagement
        } else if engagement > t.reinforcement_floor {
            RecommendedAction::PositiveReinforcement
        } else {
            RecommendedAction::StandardFollowUp
        }
    }

    pub fn band(&self, engagement: f64) -> EngagementBand {
        if engagement < self.bands.low {
            EngagementBand::UrgentOutreach
        } else if engagement > self.bands.high {
            EngagementBand::MaintainChallenge
        } else {
            EngagementBand::ReinforceRoutine
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
