//! Error types for the engagement pipeline
//!
//! Fatal errors abort the whole run before any output table is published.
//! Row-level problems are never reported one at a time: each stage collects
//! every violation it finds into a single [`DataIntegrityError`].

use std::fmt;

use thiserror::Error;

use crate::types::Indicator;

/// Pipeline stage, used to tell the operator where a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configuration,
    Source,
    SchemaReader,
    Reshaper,
    IdentityResolver,
    ValueNormalizer,
    EngagementScorer,
    Clusterer,
    Publisher,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Configuration => "configuration",
            Stage::Source => "source",
            Stage::SchemaReader => "schema_reader",
            Stage::Reshaper => "reshaper",
            Stage::IdentityResolver => "identity_resolver",
            Stage::ValueNormalizer => "value_normalizer",
            Stage::EngagementScorer => "engagement_scorer",
            Stage::Clusterer => "clusterer",
            Stage::Publisher => "publisher",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structural problems with the source sheet. Always fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("Source sheet is empty or has fewer than three header rows")]
    EmptySource,

    #[error("No class headers (e.g. \"Aula 1\") found in the label row")]
    NoClassHeaders,

    #[error("Class {0} appears more than once in the label row")]
    DuplicateClass(usize),

    #[error("Class headers are not contiguous: expected class {expected}, found class {found}")]
    NonContiguousClasses { expected: usize, found: usize },

    #[error("Class {class} has no date")]
    MissingClassDate { class: usize },

    #[error("Class {class} has a malformed date {value:?}: {reason}")]
    MalformedClassDate {
        class: usize,
        value: String,
        reason: String,
    },

    #[error("Required column {0:?} not found in the header row")]
    MissingColumn(String),
}

/// What is wrong with a single field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// Identity field empty after trimming
    EmptyIdentityField,
    /// Identity field contains the character reserved for the key separator
    ReservedSeparator,
    /// Token not present in the indicator's symbol table
    UnrecognizedToken { indicator: Indicator, token: String },
    /// Another row resolved to the same student and class with different values
    DuplicateIdentity {
        student_id: String,
        class_number: usize,
        first_line: usize,
    },
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::EmptyIdentityField => f.write_str("identity field is empty"),
            ViolationKind::ReservedSeparator => {
                f.write_str("identity field contains the reserved ':' character")
            }
            ViolationKind::UnrecognizedToken { indicator, token } => {
                write!(f, "unrecognized {} token {:?}", indicator.as_str(), token)
            }
            ViolationKind::DuplicateIdentity {
                student_id,
                class_number,
                first_line,
            } => write!(
                f,
                "student {student_id} already has class {class_number} on line {first_line} with different values"
            ),
        }
    }
}

/// One offending field in the source sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 1-based line in the source file
    pub line: usize,
    /// Column name as it appears in the header row
    pub field: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, field {}: {}", self.line, self.field, self.kind)
    }
}

/// Every row-level violation found by one stage
#[derive(Debug, Clone, PartialEq)]
pub struct DataIntegrityError {
    pub stage: Stage,
    pub violations: Vec<Violation>,
}

impl fmt::Display for DataIntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} violation(s) in stage {}",
            self.violations.len(),
            self.stage
        )?;
        for violation in &self.violations {
            write!(f, "\n  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DataIntegrityError {}

/// Records that passed a stage, plus the violations of those that did not
#[derive(Debug, Clone, PartialEq)]
pub struct Checked<T> {
    pub records: Vec<T>,
    pub violations: Vec<Violation>,
}

impl<T> Checked<T> {
    /// Fail with every violation, or hand the records on
    pub fn into_result(self, stage: Stage) -> Result<Vec<T>, DataIntegrityError> {
        if self.violations.is_empty() {
            Ok(self.records)
        } else {
            Err(DataIntegrityError {
                stage,
                violations: self.violations,
            })
        }
    }
}

impl DataIntegrityError {
    /// Merge the violations of consecutive stages into one error, attributed
    /// to the first stage that found any. Violations are ordered by line.
    pub fn merge<I>(stages: I) -> Option<Self>
    where
        I: IntoIterator<Item = (Stage, Vec<Violation>)>,
    {
        let mut merged: Option<Self> = None;
        for (stage, violations) in stages {
            if violations.is_empty() {
                continue;
            }
            match merged.as_mut() {
                Some(err) => err.violations.extend(violations),
                None => merged = Some(Self { stage, violations }),
            }
        }
        if let Some(err) = merged.as_mut() {
            err.violations.sort_by_key(|v| v.line);
        }
        merged
    }
}

/// Invalid pipeline configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Weights must be non-negative with a positive sum (sum = {0})")]
    InvalidWeights(f64),

    #[error("Threshold {name} = {value} is outside [0, 1]")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("Band boundaries must satisfy low <= high (low = {low}, high = {high})")]
    BandsOutOfOrder { low: f64, high: f64 },

    #[error("{0} must be at least 1")]
    ZeroParameter(&'static str),

    #[error("Symbol table {table} maps {token:?} to {value}, above the scale maximum {max}")]
    SymbolOutOfScale {
        table: &'static str,
        token: String,
        value: u8,
        max: u8,
    },

    #[error("Missing-value default for {indicator} is {value}, above the scale maximum {max}")]
    MissingDefaultOutOfScale {
        indicator: &'static str,
        value: u8,
        max: u8,
    },
}

/// Errors that can abort a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Data integrity error: {0}")]
    DataIntegrity(#[from] DataIntegrityError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Malformed configuration file: {0}")]
    ConfigFormat(serde_json::Error),

    #[error("Cannot read configuration file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read source sheet: {0}")]
    Source(csv::Error),

    #[error("No student records left to score and cluster")]
    EmptyDataset,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Stage the error originated from
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Schema(_) => Stage::SchemaReader,
            PipelineError::DataIntegrity(e) => e.stage,
            PipelineError::Config(_)
            | PipelineError::ConfigFormat(_)
            | PipelineError::ConfigFile { .. } => Stage::Configuration,
            PipelineError::EmptyDataset => Stage::Clusterer,
            PipelineError::Source(_) => Stage::Source,
            PipelineError::Io(_) | PipelineError::Csv(_) | PipelineError::Json(_) => {
                Stage::Publisher
            }
        }
    }
}

/// Date string could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse date {input:?}: {reason}")]
pub struct DateParseError {
    pub input: String,
    pub reason: String,
}
