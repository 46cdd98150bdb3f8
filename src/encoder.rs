//! Table publication
//!
//! Encodes pipeline output into the four CSV tables and a run manifest.
//! Publication is all-or-nothing: tables are staged inside the output
//! directory, moved into place, and `manifest.json` is written last. A table
//! set without a manifest is incomplete.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::PipelineOutput;
use crate::types::{
    ClusterProfile, ClusterReduction, EngagementScoreRecord, StudentClusterRecord,
};
use crate::{ENGINE_VERSION, PRODUCER_NAME};

pub const CLEANED_RECORDS_FILE: &str = "cleaned_records.csv";
pub const ENGAGEMENT_SCORES_FILE: &str = "engagement_scores.csv";
pub const STUDENT_CLUSTERS_FILE: &str = "student_clusters.csv";
pub const CLUSTER_PROFILES_FILE: &str = "cluster_profiles.csv";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Manifest written after every table of a run is in place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub producer: ManifestProducer,
    /// RFC 3339 UTC timestamp
    pub generated_at: String,
    pub input: Option<String>,
    pub tables: Vec<ManifestTable>,
    pub cluster_reduction: Option<ClusterReduction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestProducer {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestTable {
    pub file: String,
    pub rows: usize,
}

impl RunManifest {
    pub fn rows(&self, file: &str) -> Option<usize> {
        self.tables.iter().find(|t| t.file == file).map(|t| t.rows)
    }
}

#[derive(Serialize)]
struct EngagementRow<'a> {
    student_id: &'a str,
    student_name: &'a str,
    room: &'a str,
    unit: &'a str,
    class_number: usize,
    class_date: NaiveDate,
    preparation: Option<u8>,
    attendance: Option<u8>,
    homework: Option<u8>,
    participation: Option<u8>,
    prep_score: f64,
    attendance_score: f64,
    homework_score: f64,
    interaction_score: f64,
    engagement: f64,
    engagement_pct: f64,
    engagement_band: &'static str,
    recommended_action: &'static str,
}

impl<'a> From<&'a EngagementScoreRecord> for EngagementRow<'a> {
    fn from(r: &'a EngagementScoreRecord) -> Self {
        let c = &r.cleaned;
        Self {
            student_id: c.student_id.as_str(),
            student_name: &c.student_name,
            room: &c.room,
            unit: &c.unit,
            class_number: c.class_number,
            class_date: c.class_date,
            preparation: c.preparation,
            attendance: c.attendance,
            homework: c.homework,
            participation: c.participation,
            prep_score: r.sub_scores.prep_score,
            attendance_score: r.sub_scores.attendance_score,
            homework_score: r.sub_scores.homework_score,
            interaction_score: r.sub_scores.interaction_score,
            engagement: r.engagement,
            engagement_pct: r.engagement_pct,
            engagement_band: r.band.as_str(),
            recommended_action: r.recommended_action.label(),
        }
    }
}

#[derive(Serialize)]
struct StudentClusterRow<'a> {
    student_id: &'a str,
    student_name: &'a str,
    room: &'a str,
    unit: &'a str,
    class_count: usize,
    prep_score: f64,
    attendance_score: f64,
    homework_score: f64,
    interaction_score: f64,
    engagement: f64,
    cluster: usize,
}

impl<'a> From<&'a StudentClusterRecord> for StudentClusterRow<'a> {
    fn from(r: &'a StudentClusterRecord) -> Self {
        Self {
            student_id: r.student_id.as_str(),
            student_name: &r.student_name,
            room: &r.room,
            unit: &r.unit,
            class_count: r.class_count,
            prep_score: r.features.prep_score,
            attendance_score: r.features.attendance_score,
            homework_score: r.features.homework_score,
            interaction_score: r.features.interaction_score,
            engagement: r.features.engagement,
            cluster: r.cluster,
        }
    }
}

#[derive(Serialize)]
struct ClusterProfileRow {
    cluster: usize,
    student_count: usize,
    prep_score: f64,
    attendance_score: f64,
    homework_score: f64,
    interaction_score: f64,
    engagement: f64,
}

impl From<&ClusterProfile> for ClusterProfileRow {
    fn from(p: &ClusterProfile) -> Self {
        Self {
            cluster: p.cluster,
            student_count: p.student_count,
            prep_score: p.features.prep_score,
            attendance_score: p.features.attendance_score,
            homework_score: p.features.homework_score,
            interaction_score: p.features.interaction_score,
            engagement: p.features.engagement,
        }
    }
}

/// Writer for the output table set
pub struct TableWriter {
    run_id: String,
}

impl Default for TableWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TableWriter {
    /// Create a writer with a fresh run ID
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create a writer with a specific run ID
    pub fn with_run_id(run_id: String) -> Self {
        Self { run_id }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Publish every table and then the manifest
    pub fn publish(
        &self,
        output_dir: &Path,
        output: &PipelineOutput,
        input: Option<&Path>,
    ) -> Result<RunManifest, PipelineError> {
        fs::create_dir_all(output_dir)?;

        let manifest_path = output_dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            fs::remove_file(&manifest_path)?;
        }

        let staging = output_dir.join(format!(".staging-{}", self.run_id));
        let staged = self.stage(&staging, output);
        let tables = match staged.and_then(|tables| promote(&staging, output_dir, tables)) {
            Ok(tables) => tables,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };
        fs::remove_dir_all(&staging)?;

        let manifest = RunManifest {
            run_id: self.run_id.clone(),
            producer: ManifestProducer {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
            },
            generated_at: Utc::now().to_rfc3339(),
            input: input.map(|path| path.display().to_string()),
            tables,
            cluster_reduction: output.clusters.reduction,
        };

        let partial = output_dir.join(format!("{MANIFEST_FILE}.partial"));
        fs::write(&partial, serde_json::to_string_pretty(&manifest)?)?;
        fs::rename(&partial, &manifest_path)?;

        tracing::info!(
            run_id = %self.run_id,
            dir = %output_dir.display(),
            "published output tables"
        );
        Ok(manifest)
    }

    fn stage(&self, staging: &Path, output: &PipelineOutput) -> Result<Vec<ManifestTable>, PipelineError> {
        fs::create_dir_all(staging)?;

        Ok(vec![
            write_table(staging, CLEANED_RECORDS_FILE, output.cleaned.iter())?,
            write_table(
                staging,
                ENGAGEMENT_SCORES_FILE,
                output.scores.iter().map(EngagementRow::from),
            )?,
            write_table(
                staging,
                STUDENT_CLUSTERS_FILE,
                output.clusters.students.iter().map(StudentClusterRow::from),
            )?,
            write_table(
                staging,
                CLUSTER_PROFILES_FILE,
                output.clusters.profiles.iter().map(ClusterProfileRow::from),
            )?,
        ])
    }
}

fn write_table<I, T>(dir: &Path, file: &str, rows: I) -> Result<ManifestTable, PipelineError>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    let mut writer = csv::Writer::from_path(dir.join(file))?;
    let mut count = 0;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    writer.flush()?;
    tracing::debug!(file, rows = count, "wrote table");

    Ok(ManifestTable {
        file: file.to_string(),
        rows: count,
    })
}

fn promote(
    staging: &Path,
    output_dir: &Path,
    tables: Vec<ManifestTable>,
) -> Result<Vec<ManifestTable>, PipelineError> {
    for table in &tables {
        let target: PathBuf = output_dir.join(&table.file);
        fs::rename(staging.join(&table.file), target)?;
    }
    Ok(tables)
}
