//! Core types for the engagement pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: wide source records, reshaped long records, cleaned records,
//! engagement scores, and the per-student / per-cluster clustering output.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-class indicator recorded in the source sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// Did the pre-class activity (`Pre-Class`)
    Preparation,
    /// Present / absent (`P`)
    Attendance,
    /// Did the homework (`Hw`)
    Homework,
    /// Class participation (`CP`)
    Participation,
    /// Behavior (`Bh`)
    Behavior,
}

impl Indicator {
    /// All indicators in source column order
    pub const ALL: [Indicator; 5] = [
        Indicator::Preparation,
        Indicator::Attendance,
        Indicator::Homework,
        Indicator::Participation,
        Indicator::Behavior,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::Preparation => "preparation",
            Indicator::Attendance => "attendance",
            Indicator::Homework => "homework",
            Indicator::Participation => "participation",
            Indicator::Behavior => "behavior",
        }
    }

    /// Column name of the first occurrence
    pub fn base_column(&self) -> &'static str {
        match self {
            Indicator::Preparation => "Pre-Class",
            Indicator::Attendance => "P",
            Indicator::Homework => "Hw",
            Indicator::Participation => "CP",
            Indicator::Behavior => "Bh",
        }
    }

    /// Column name for a 0-based occurrence: `P`, `P.1`, `P.2`, ...
    pub fn column_name(&self, occurrence: usize) -> String {
        if occurrence == 0 {
            self.base_column().to_string()
        } else {
            format!("{}.{}", self.base_column(), occurrence)
        }
    }

    /// Inverse of [`Indicator::column_name`]
    pub fn parse_column(column: &str) -> Option<(Indicator, usize)> {
        let column = column.trim();
        let (base, occurrence) = match column.split_once('.') {
            Some((base, suffix)) => {
                if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                (base, suffix.parse().ok()?)
            }
            None => (column, 0),
        };

        Indicator::ALL
            .iter()
            .find(|indicator| indicator.base_column() == base)
            .map(|indicator| (*indicator, occurrence))
    }

    /// Numeric scale the indicator is normalized onto
    pub fn scale(&self) -> Scale {
        match self {
            Indicator::Attendance => Scale::Binary,
            _ => Scale::Ordinal,
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed numeric domain of a normalized indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// {0, 1}
    Binary,
    /// {0, 1, 2, 3}
    Ordinal,
}

impl Scale {
    pub fn max(&self) -> u8 {
        match self {
            Scale::Binary => 1,
            Scale::Ordinal => 3,
        }
    }

    pub fn contains(&self, value: u8) -> bool {
        value <= self.max()
    }

    /// Map a value on this scale onto [0, 1]
    pub fn unit(&self, value: u8) -> f64 {
        f64::from(value) / f64::from(self.max())
    }
}

/// Ordered mapping from 0-based occurrence index to class date
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassDateMap {
    dates: BTreeMap<usize, NaiveDate>,
}

impl ClassDateMap {
    pub fn new(dates: BTreeMap<usize, NaiveDate>) -> Self {
        Self { dates }
    }

    pub fn get(&self, occurrence: usize) -> Option<NaiveDate> {
        self.dates.get(&occurrence).copied()
    }

    /// `(occurrence, date)` pairs in occurrence order
    pub fn iter(&self) -> impl Iterator<Item = (usize, NaiveDate)> + '_ {
        self.dates.iter().map(|(occurrence, date)| (*occurrence, *date))
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// One student row as stored in the source sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWideRecord {
    /// 1-based line in the source file
    pub line: usize,
    pub name: String,
    pub room: String,
    pub unit: String,
    /// Indicator cells keyed by column name. A column missing from the map is
    /// absent for this student; an empty string is a present but blank cell.
    pub cells: BTreeMap<String, String>,
}

/// Raw indicator cells of one class occurrence (`None` = column absent)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawIndicators {
    pub preparation: Option<String>,
    pub attendance: Option<String>,
    pub homework: Option<String>,
    pub participation: Option<String>,
    pub behavior: Option<String>,
}

impl RawIndicators {
    pub fn get(&self, indicator: Indicator) -> Option<&str> {
        match indicator {
            Indicator::Preparation => self.preparation.as_deref(),
            Indicator::Attendance => self.attendance.as_deref(),
            Indicator::Homework => self.homework.as_deref(),
            Indicator::Participation => self.participation.as_deref(),
            Indicator::Behavior => self.behavior.as_deref(),
        }
    }

    pub fn set(&mut self, indicator: Indicator, value: String) {
        let slot = match indicator {
            Indicator::Preparation => &mut self.preparation,
            Indicator::Attendance => &mut self.attendance,
            Indicator::Homework => &mut self.homework,
            Indicator::Participation => &mut self.participation,
            Indicator::Behavior => &mut self.behavior,
        };
        *slot = Some(value);
    }

    /// True when at least one indicator column is present
    pub fn any_present(&self) -> bool {
        Indicator::ALL.iter().any(|indicator| self.get(*indicator).is_some())
    }
}

/// One (student row, class occurrence) pair after the wide-to-long reshape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongRecord {
    pub line: usize,
    pub name: String,
    pub room: String,
    pub unit: String,
    /// 0-based occurrence index (the column suffix)
    pub occurrence: usize,
    pub class_date: NaiveDate,
    pub indicators: RawIndicators,
}

impl LongRecord {
    /// 1-based class number as shown in the label row
    pub fn class_number(&self) -> usize {
        self.occurrence + 1
    }
}

/// Unique student identity derived from name, room and unit
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(String);

impl StudentId {
    /// Separator between the three identity fields
    pub const SEPARATOR: &'static str = "::";

    pub(crate) fn from_parts(name: &str, room: &str, unit: &str) -> Self {
        Self([name, room, unit].join(Self::SEPARATOR))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Long record with a resolved identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifiedRecord {
    pub student_id: StudentId,
    pub student_name: String,
    pub room: String,
    pub unit: String,
    pub line: usize,
    pub occurrence: usize,
    pub class_date: NaiveDate,
    pub indicators: RawIndicators,
}

/// Cleaned long-form record: one row per (student, class occurrence)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanedRecord {
    pub student_id: StudentId,
    /// 1-based source line; not part of the published table
    #[serde(skip)]
    pub line: usize,
    pub student_name: String,
    pub room: String,
    pub unit: String,
    pub class_number: usize,
    pub class_date: NaiveDate,
    /// Ordinal 0-3, `None` when the cell was blank
    pub preparation: Option<u8>,
    /// Binary 0/1
    pub attendance: Option<u8>,
    /// Ordinal 0-3
    pub homework: Option<u8>,
    /// Ordinal 0-3
    pub participation: Option<u8>,
}

impl CleanedRecord {
    /// Indicator values in table order
    pub fn values(&self) -> [Option<u8>; 4] {
        [
            self.preparation,
            self.attendance,
            self.homework,
            self.participation,
        ]
    }

    pub fn value(&self, indicator: Indicator) -> Option<u8> {
        match indicator {
            Indicator::Preparation => self.preparation,
            Indicator::Attendance => self.attendance,
            Indicator::Homework => self.homework,
            Indicator::Participation => self.participation,
            Indicator::Behavior => None,
        }
    }
}

/// Intervention suggested for a student in a given class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    AttendanceOutreach,
    AsyncTutoring,
    ClassroomEngagement,
    PositiveReinforcement,
    StandardFollowUp,
}

impl RecommendedAction {
    /// Label shown to coordinators
    pub fn label(&self) -> &'static str {
        match self {
            RecommendedAction::AttendanceOutreach => "Contato individual / planos de presença",
            RecommendedAction::AsyncTutoring => "Reforço assíncrono + tutoria",
            RecommendedAction::ClassroomEngagement => "Ações de engajamento em sala",
            RecommendedAction::PositiveReinforcement => "Reforço positivo",
            RecommendedAction::StandardFollowUp => "Acompanhamento padrão",
        }
    }
}

/// Coarse band of the composite engagement score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementBand {
    UrgentOutreach,
    ReinforceRoutine,
    MaintainChallenge,
}

impl EngagementBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementBand::UrgentOutreach => "urgent_outreach",
            EngagementBand::ReinforceRoutine => "reinforce_routine",
            EngagementBand::MaintainChallenge => "maintain_challenge",
        }
    }
}

/// The four weighted components of the engagement score, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SubScores {
    pub prep_score: f64,
    pub attendance_score: f64,
    pub homework_score: f64,
    pub interaction_score: f64,
}

/// Cleaned record with sub-scores, composite score and recommendation
#[derive(Debug, Clone, PartialEq)]
pub struct EngagementScoreRecord {
    pub cleaned: CleanedRecord,
    pub sub_scores: SubScores,
    /// Weighted composite in [0, 1]
    pub engagement: f64,
    /// `engagement` as a percentage rounded to two decimals
    pub engagement_pct: f64,
    pub band: EngagementBand,
    pub recommended_action: RecommendedAction,
}

/// Feature vector used for clustering, in original units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StudentFeatures {
    pub prep_score: f64,
    pub attendance_score: f64,
    pub homework_score: f64,
    pub interaction_score: f64,
    pub engagement: f64,
}

impl StudentFeatures {
    pub const NAMES: [&'static str; 5] = [
        "prep_score",
        "attendance_score",
        "homework_score",
        "interaction_score",
        "engagement",
    ];

    pub fn to_array(&self) -> [f64; 5] {
        [
            self.prep_score,
            self.attendance_score,
            self.homework_score,
            self.interaction_score,
            self.engagement,
        ]
    }

    pub fn from_array(values: [f64; 5]) -> Self {
        Self {
            prep_score: values[0],
            attendance_score: values[1],
            homework_score: values[2],
            interaction_score: values[3],
            engagement: values[4],
        }
    }
}

/// Per-student means across all classes plus the assigned cluster
#[derive(Debug, Clone, PartialEq)]
pub struct StudentClusterRecord {
    pub student_id: StudentId,
    pub student_name: String,
    pub room: String,
    pub unit: String,
    pub class_count: usize,
    pub features: StudentFeatures,
    /// Cluster label in `0..k`
    pub cluster: usize,
}

/// Mean feature vector of one cluster, in original units
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterProfile {
    pub cluster: usize,
    pub student_count: usize,
    pub features: StudentFeatures,
}

/// Requested cluster count was lowered to fit the data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterReduction {
    pub requested: usize,
    pub effective: usize,
}
