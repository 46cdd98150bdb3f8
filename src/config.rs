//! Pipeline configuration
//!
//! Every constant the pipeline depends on (weights, thresholds, missing-value
//! policy, clustering parameters, source layout and symbol tables) lives here
//! with an explicit default. A run is a pure function of the source sheet and
//! this configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, PipelineError};
use crate::normalizer::SymbolTables;
use crate::types::Indicator;

/// Weight of the preparation sub-score
pub const PREP_WEIGHT: f64 = 0.30;
/// Weight of the attendance sub-score
pub const ATTENDANCE_WEIGHT: f64 = 0.45;
/// Weight of the homework sub-score
pub const HOMEWORK_WEIGHT: f64 = 0.20;
/// Weight of the interaction (participation) sub-score
pub const INTERACTION_WEIGHT: f64 = 0.15;

/// Default number of clusters
pub const DEFAULT_CLUSTERS: usize = 4;
/// Default random seed for centroid seeding
pub const DEFAULT_SEED: u64 = 42;
/// Default number of k-means restarts
pub const DEFAULT_N_INIT: usize = 10;
/// Default Lloyd iteration cap per restart
pub const DEFAULT_MAX_ITERATIONS: usize = 300;

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub weights: ScoringWeights,
    pub actions: ActionThresholds,
    pub bands: BandThresholds,
    pub missing: MissingPolicy,
    pub clustering: ClusteringConfig,
    pub layout: SourceLayout,
    pub symbols: SymbolOverrides,
}

impl PipelineConfig {
    /// Parse a JSON configuration; absent fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            serde_json::from_str(json).map_err(PipelineError::ConfigFormat)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let json = std::fs::read_to_string(path).map_err(|source| PipelineError::ConfigFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        self.actions.validate()?;
        self.bands.validate()?;
        self.missing.validate()?;
        self.clustering.validate()?;
        SymbolTables::from_overrides(&self.symbols)?;
        Ok(())
    }
}

/// Relative weights of the composite engagement score.
///
/// The composite divides by the weight sum, so the defaults keep their
/// 30 : 45 : 20 : 15 proportions while all-maximum sub-scores give exactly 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringWeights {
    pub prep: f64,
    pub attendance: f64,
    pub homework: f64,
    pub interaction: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            prep: PREP_WEIGHT,
            attendance: ATTENDANCE_WEIGHT,
            homework: HOMEWORK_WEIGHT,
            interaction: INTERACTION_WEIGHT,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.prep + self.attendance + self.homework + self.interaction
    }

    /// Weights divided by their sum: a convex combination
    pub fn normalized(&self) -> [f64; 4] {
        let sum = self.sum();
        [
            self.prep / sum,
            self.attendance / sum,
            self.homework / sum,
            self.interaction / sum,
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let all_non_negative = [self.prep, self.attendance, self.homework, self.interaction]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0);
        let sum = self.sum();
        if !all_non_negative || sum <= 0.0 {
            return Err(ConfigError::InvalidWeights(sum));
        }
        Ok(())
    }
}

/// Thresholds of the recommended-action rules, checked in order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionThresholds {
    /// attendance_score below this → individual attendance outreach
    pub attendance_floor: f64,
    /// homework_score AND prep_score below their floors → async tutoring
    pub homework_floor: f64,
    pub prep_floor: f64,
    /// interaction_score below this → in-class engagement actions
    pub interaction_floor: f64,
    /// engagement above this → positive reinforcement
    pub reinforcement_floor: f64,
}

impl Default for ActionThresholds {
    fn default() -> Self {
        Self {
            attendance_floor: 0.6,
            homework_floor: 0.4,
            prep_floor: 0.4,
            interaction_floor: 0.4,
            reinforcement_floor: 0.8,
        }
    }
}

impl ActionThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("actions.attendance_floor", self.attendance_floor)?;
        check_unit("actions.homework_floor", self.homework_floor)?;
        check_unit("actions.prep_floor", self.prep_floor)?;
        check_unit("actions.interaction_floor", self.interaction_floor)?;
        check_unit("actions.reinforcement_floor", self.reinforcement_floor)
    }
}

/// Band boundaries on the composite engagement score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BandThresholds {
    /// engagement below this is `urgent_outreach`
    pub low: f64,
    /// engagement above this is `maintain_challenge`
    pub high: f64,
}

impl Default for BandThresholds {
    fn default() -> Self {
        Self { low: 0.5, high: 0.8 }
    }
}

impl BandThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit("bands.low", self.low)?;
        check_unit("bands.high", self.high)?;
        if self.low > self.high {
            return Err(ConfigError::BandsOutOfOrder {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

/// Raw value used by the scorer when a cell was blank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MissingPolicy {
    pub preparation: u8,
    pub attendance: u8,
    pub homework: u8,
    /// Neutral participation
    pub participation: u8,
}

impl Default for MissingPolicy {
    fn default() -> Self {
        Self {
            preparation: 0,
            attendance: 0,
            homework: 0,
            participation: 1,
        }
    }
}

impl MissingPolicy {
    pub fn value_for(&self, indicator: Indicator) -> u8 {
        match indicator {
            Indicator::Preparation => self.preparation,
            Indicator::Attendance => self.attendance,
            Indicator::Homework => self.homework,
            Indicator::Participation | Indicator::Behavior => self.participation,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for indicator in [
            Indicator::Preparation,
            Indicator::Attendance,
            Indicator::Homework,
            Indicator::Participation,
        ] {
            let value = self.value_for(indicator);
            let max = indicator.scale().max();
            if value > max {
                return Err(ConfigError::MissingDefaultOutOfScale {
                    indicator: indicator.as_str(),
                    value,
                    max,
                });
            }
        }
        Ok(())
    }
}

/// k-means parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusteringConfig {
    pub clusters: usize,
    pub seed: u64,
    pub n_init: usize,
    pub max_iterations: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            seed: DEFAULT_SEED,
            n_init: DEFAULT_N_INIT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clusters == 0 {
            return Err(ConfigError::ZeroParameter("clustering.clusters"));
        }
        if self.n_init == 0 {
            return Err(ConfigError::ZeroParameter("clustering.n_init"));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroParameter("clustering.max_iterations"));
        }
        Ok(())
    }
}

/// Where an identity field is read from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityColumn {
    pub column: String,
    /// Take only this 0-based segment of the cell split on the layout's
    /// segment separator
    #[serde(default)]
    pub segment: Option<usize>,
}

impl IdentityColumn {
    fn new(column: &str, segment: Option<usize>) -> Self {
        Self {
            column: column.to_string(),
            segment,
        }
    }

    /// Extract the field from a raw cell; a missing segment yields ""
    pub fn extract<'a>(&self, cell: &'a str, separator: &str) -> &'a str {
        match self.segment {
            Some(index) => cell.split(separator).nth(index).unwrap_or("").trim(),
            None => cell.trim(),
        }
    }
}

/// Identity column layout of the source sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceLayout {
    pub name: IdentityColumn,
    pub room: IdentityColumn,
    pub unit: IdentityColumn,
    pub segment_separator: String,
}

impl Default for SourceLayout {
    fn default() -> Self {
        Self {
            name: IdentityColumn::new("NOME COMPLETO", Some(0)),
            room: IdentityColumn::new("Sala", None),
            unit: IdentityColumn::new("Nome Planilha Feedback", Some(2)),
            segment_separator: " - ".to_string(),
        }
    }
}

/// Optional replacements for the built-in symbol tables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SymbolOverrides {
    /// Attendance tokens → {0, 1}
    pub presence: Option<BTreeMap<String, u8>>,
    /// Preparation / homework tokens → {0..3}
    pub completion: Option<BTreeMap<String, u8>>,
    /// Participation tokens → {0..3}
    pub mood: Option<BTreeMap<String, u8>>,
}

fn check_unit(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { name, value });
    }
    Ok(())
}
