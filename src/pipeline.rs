//! Pipeline orchestration
//!
//! Public entry point of the engine. Composes the stages in order:
//! 1. SchemaReader - class date map and column layout
//! 2. Reshaper - one row per (student, class)
//! 3. IdentityResolver - composite student keys
//! 4. Normalizer - symbols onto closed numeric scales
//! 5. EngagementScorer - weighted composite and recommendations
//! 6. Clusterer - per-student means and k-means labels
//!
//! Every stage takes immutable input and returns new data; the first fatal
//! error aborts the run before anything is published.

use chrono::NaiveDate;
use serde::Serialize;
use std::path::Path;

use crate::cluster::{ClusterOutput, Clusterer};
use crate::config::PipelineConfig;
use crate::encoder::{RunManifest, TableWriter};
use crate::error::{DataIntegrityError, PipelineError, Stage};
use crate::identity::{IdentityColumns, IdentityResolver};
use crate::normalizer::{Normalizer, SymbolTables};
use crate::reshape::Reshaper;
use crate::schema::SchemaReader;
use crate::scoring::EngagementScorer;
use crate::source::RawSheet;
use crate::types::{CleanedRecord, EngagementScoreRecord};

/// Everything one run produces, ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub cleaned: Vec<CleanedRecord>,
    pub scores: Vec<EngagementScoreRecord>,
    pub clusters: ClusterOutput,
}

/// Structural summary of a source sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SheetSummary {
    pub classes: Vec<ClassSummary>,
    pub student_rows: usize,
    /// Occurrence suffixes found in the header with no class label
    pub ignored_occurrences: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassSummary {
    pub class_number: usize,
    pub class_date: NaiveDate,
}

/// Run the whole pipeline on a CSV export and publish the tables
pub fn run_file(
    input: &Path,
    output_dir: &Path,
    config: PipelineConfig,
    delimiter: u8,
) -> Result<RunManifest, PipelineError> {
    let pipeline = EngagementPipeline::new(config)?;
    let sheet = RawSheet::from_path(input, delimiter)?;
    pipeline.run_and_publish(&sheet, output_dir, Some(input))
}

/// Configured engagement pipeline
pub struct EngagementPipeline {
    config: PipelineConfig,
    normalizer: Normalizer,
}

impl EngagementPipeline {
    /// Validate the configuration and build the stages
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let tables = SymbolTables::from_overrides(&config.symbols)?;
        Ok(Self {
            config,
            normalizer: Normalizer::new(tables),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Read the sheet structure without touching student values
    pub fn inspect(&self, sheet: &RawSheet) -> Result<SheetSummary, PipelineError> {
        let schema = SchemaReader::new(&self.config.layout).read(sheet)?;
        Ok(SheetSummary {
            classes: schema
                .class_dates
                .iter()
                .map(|(occurrence, class_date)| ClassSummary {
                    class_number: occurrence + 1,
                    class_date,
                })
                .collect(),
            student_rows: sheet.rows.len(),
            ignored_occurrences: schema.ignored_occurrences,
        })
    }

    /// Run stages 1-4 and return the cleaned long-form records, one per
    /// (student, class), ordered by unit, room, student and class.
    ///
    /// Identity, token and duplicate problems are collected together so the
    /// whole sheet can be fixed in one pass.
    pub fn clean(&self, sheet: &RawSheet) -> Result<Vec<CleanedRecord>, PipelineError> {
        let reader = SchemaReader::new(&self.config.layout);
        let schema = reader.read(sheet)?;
        let wide = reader.records(sheet, &schema);

        let long = Reshaper::reshape(&wide, &schema.class_dates);
        let columns = IdentityColumns::from(&self.config.layout);
        let identified = IdentityResolver::check(long, &columns);
        let normalized = self.normalizer.check(identified.records);
        let unique = IdentityResolver::deduplicate(normalized.records, &columns);

        if let Some(err) = DataIntegrityError::merge([
            (Stage::IdentityResolver, identified.violations),
            (Stage::ValueNormalizer, normalized.violations),
            (Stage::IdentityResolver, unique.violations),
        ]) {
            return Err(err.into());
        }

        let mut cleaned = unique.records;
        cleaned.sort_by_cached_key(|r| {
            (
                r.unit.to_lowercase(),
                r.room.to_lowercase(),
                r.student_id.clone(),
                r.class_number,
            )
        });

        tracing::debug!(
            students = wide.len(),
            rows = cleaned.len(),
            "cleaned source sheet"
        );
        Ok(cleaned)
    }

    /// Run every stage
    pub fn run(&self, sheet: &RawSheet) -> Result<PipelineOutput, PipelineError> {
        let cleaned = self.clean(sheet)?;
        if cleaned.is_empty() {
            return Err(PipelineError::EmptyDataset);
        }

        let scorer = EngagementScorer::new(
            self.config.weights,
            self.config.actions,
            self.config.bands,
            self.config.missing,
        );
        let scores = scorer.score_all(cleaned.clone());
        let clusters = Clusterer::new(self.config.clustering).run(&scores)?;

        Ok(PipelineOutput {
            cleaned,
            scores,
            clusters,
        })
    }

    /// Run every stage, then publish; nothing is written if a stage fails
    pub fn run_and_publish(
        &self,
        sheet: &RawSheet,
        output_dir: &Path,
        input: Option<&Path>,
    ) -> Result<RunManifest, PipelineError> {
        let output = self.run(sheet)?;
        TableWriter::new().publish(output_dir, &output, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{CLEANED_RECORDS_FILE, MANIFEST_FILE};
    use crate::error::{SchemaError, ViolationKind};
    use crate::types::{Indicator, RecommendedAction};
    use pretty_assertions::assert_eq;

    const IDENTITY: [&str; 3] = ["NOME COMPLETO", "Sala", "Nome Planilha Feedback"];
    const CLASS_COLUMNS: [&str; 5] = ["Pre-Class", "P", "Hw", "CP", "Bh"];

    fn header_rows(dates: [&str; 2]) -> Vec<Vec<String>> {
        let mut labels = vec![String::new(); 3];
        let mut date_row = vec![String::new(); 3];
        let mut header: Vec<String> = IDENTITY.iter().map(|s| s.to_string()).collect();
        for (occurrence, date) in dates.iter().enumerate() {
            for (i, column) in CLASS_COLUMNS.iter().enumerate() {
                labels.push(if i == 0 { format!("Aula {}", occurrence + 1) } else { String::new() });
                date_row.push(if i == 0 { date.to_string() } else { String::new() });
                header.push(if occurrence == 0 {
                    column.to_string()
                } else {
                    format!("{column}.{occurrence}")
                });
            }
        }
        vec![labels, date_row, header]
    }

    fn student(name: &str, classes: &[[&str; 5]]) -> Vec<String> {
        let mut row = vec![
            format!("{name} - 0001"),
            "8A".to_string(),
            "Feedback - 2024 - Paulista".to_string(),
        ];
        for class in classes {
            row.extend(class.iter().map(|s| s.to_string()));
        }
        row
    }

    /// A attends both classes at maximum; B's row stops after class 1
    fn two_student_sheet(dates: [&str; 2]) -> RawSheet {
        let mut rows = header_rows(dates);
        rows.push(student("Ana", &[["√", "P", "√", ":-D", ":-)"], ["√", "P", "√", "😃", ""]]));
        rows.push(student("Bruno", &[["-", "P", "X", ":-(", ""]]));
        RawSheet::from_rows(rows).unwrap()
    }

    fn pipeline() -> EngagementPipeline {
        EngagementPipeline::new(PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_two_students_two_classes_end_to_end() {
        let output = pipeline()
            .run(&two_student_sheet(["12/02/2024", "19/02/2024"]))
            .unwrap();

        assert_eq!(output.cleaned.len(), 3);
        let per_student: Vec<(&str, usize)> = output
            .cleaned
            .iter()
            .map(|r| (r.student_name.as_str(), r.class_number))
            .collect();
        assert_eq!(per_student, vec![("Ana", 1), ("Ana", 2), ("Bruno", 1)]);
        assert_eq!(
            output.cleaned[1].class_date,
            NaiveDate::from_ymd_opt(2024, 2, 19).unwrap()
        );

        for score in output.scores.iter().filter(|s| s.cleaned.student_name == "Ana") {
            assert!((score.engagement - 1.0).abs() < 1e-12);
            assert_eq!(score.engagement_pct, 100.0);
            assert_eq!(score.recommended_action, RecommendedAction::PositiveReinforcement);
        }

        let students = &output.clusters.students;
        assert_eq!(students.len(), 2);
        assert_eq!(students[0].student_name, "Ana");
        assert_eq!(students[0].class_count, 2);
        assert_eq!(students[1].class_count, 1);
        assert_ne!(students[0].cluster, students[1].cluster);
        assert_eq!(output.clusters.reduction.map(|r| r.effective), Some(2));
    }

    #[test]
    fn test_reruns_are_identical() {
        let sheet = two_student_sheet(["12/02/2024", "19/02/2024"]);
        assert_eq!(pipeline().run(&sheet).unwrap(), pipeline().run(&sheet).unwrap());
    }

    #[test]
    fn test_malformed_date_aborts_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let sheet = two_student_sheet(["12/02/2024", "sometime in feb"]);

        let err = pipeline()
            .run_and_publish(&sheet, dir.path(), None)
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::MalformedClassDate { class: 2, .. })
        ));
        assert_eq!(err.stage(), Stage::SchemaReader);
        assert!(!dir.path().join(MANIFEST_FILE).exists());
        assert!(!dir.path().join(CLEANED_RECORDS_FILE).exists());
    }

    #[test]
    fn test_unrecognized_tokens_are_all_reported() {
        let mut rows = header_rows(["12/02/2024", "19/02/2024"]);
        rows.push(student("Ana", &[["??", "P", "√", ":-)", ""], ["√", "maybe", "√", ":-)", ""]]));
        rows.push(student("Bruno", &[["√", "P", "√", "lol", ""]]));
        let sheet = RawSheet::from_rows(rows).unwrap();

        let err = pipeline().clean(&sheet).unwrap_err();
        let PipelineError::DataIntegrity(integrity) = err else {
            panic!("expected a data integrity error");
        };
        assert_eq!(integrity.stage, Stage::ValueNormalizer);

        let reported: Vec<(usize, &str)> = integrity
            .violations
            .iter()
            .map(|v| (v.line, v.field.as_str()))
            .collect();
        assert_eq!(reported, vec![(4, "Pre-Class"), (4, "P.1"), (5, "CP")]);
        assert!(matches!(
            &integrity.violations[1].kind,
            ViolationKind::UnrecognizedToken { indicator: Indicator::Attendance, token } if token == "maybe"
        ));
    }

    #[test]
    fn test_empty_identity_is_fatal() {
        let mut rows = header_rows(["12/02/2024", "19/02/2024"]);
        let mut ana = student("Ana", &[["√", "P", "√", ":-)", ""]]);
        ana[1] = "  ".to_string();
        rows.push(ana);
        let sheet = RawSheet::from_rows(rows).unwrap();

        let err = pipeline().run(&sheet).unwrap_err();
        assert_eq!(err.stage(), Stage::IdentityResolver);
    }

    #[test]
    fn test_identity_and_token_problems_reported_together() {
        let mut rows = header_rows(["12/02/2024", "19/02/2024"]);
        let mut ana = student("Ana", &[["√", "P", "√", ":-)", ""]]);
        ana[1] = "  ".to_string();
        rows.push(ana);
        rows.push(student("Bruno", &[["???", "P", "√", ":-)", ""]]));
        let sheet = RawSheet::from_rows(rows).unwrap();

        let err = pipeline().clean(&sheet).unwrap_err();
        let PipelineError::DataIntegrity(integrity) = err else {
            panic!("expected a data integrity error");
        };
        assert_eq!(integrity.stage, Stage::IdentityResolver);

        let reported: Vec<(usize, &str)> = integrity
            .violations
            .iter()
            .map(|v| (v.line, v.field.as_str()))
            .collect();
        assert_eq!(reported, vec![(4, "Sala"), (5, "Pre-Class")]);
    }

    #[test]
    fn test_repeated_student_row_is_collapsed() {
        let mut rows = header_rows(["12/02/2024", "19/02/2024"]);
        rows.push(student("Ana", &[["√", "P", "√", ":-)", ""]]));
        let mut again = student("ANA", &[["√", "P", "√", ":-)", ""]]);
        again[1] = "8a".to_string();
        rows.push(again);
        rows.push(student("Bruno", &[["X", "A", "X", ":-(", ""]]));
        let sheet = RawSheet::from_rows(rows).unwrap();

        let output = pipeline().run(&sheet).unwrap();
        let per_student: Vec<(&str, usize)> = output
            .cleaned
            .iter()
            .map(|r| (r.student_id.as_str(), r.class_number))
            .collect();
        assert_eq!(
            per_student,
            vec![("ana::8a::paulista", 1), ("bruno::8a::paulista", 1)]
        );
        assert_eq!(output.clusters.students[0].class_count, 1);
    }

    #[test]
    fn test_conflicting_student_rows_are_fatal() {
        let mut rows = header_rows(["12/02/2024", "19/02/2024"]);
        rows.push(student("Ana", &[["√", "P", "√", ":-)", ""]]));
        let mut again = student("ANA", &[["√", "A", "√", ":-)", ""]]);
        again[1] = "8a".to_string();
        rows.push(again);
        let sheet = RawSheet::from_rows(rows).unwrap();

        let err = pipeline().clean(&sheet).unwrap_err();
        let PipelineError::DataIntegrity(integrity) = err else {
            panic!("expected a data integrity error");
        };
        assert_eq!(integrity.stage, Stage::IdentityResolver);
        assert_eq!(integrity.violations.len(), 1);
        assert_eq!(integrity.violations[0].line, 5);
        assert_eq!(
            integrity.violations[0].kind,
            ViolationKind::DuplicateIdentity {
                student_id: "ana::8a::paulista".to_string(),
                class_number: 1,
                first_line: 4,
            }
        );
    }

    #[test]
    fn test_cleaned_rows_ordered_by_unit_room_student_class() {
        let mut rows = header_rows(["12/02/2024", "19/02/2024"]);
        let mut ana = student("Ana", &[["√", "P", "√", ":-)", ""], ["√", "P", "√", ":-)", ""]]);
        ana[1] = "8B".to_string();
        rows.push(ana);
        rows.push(student("Caio", &[["√", "P", "√", ":-)", ""]]));
        rows.push(student("Bruno", &[["-", "P", "X", ":-(", ""]]));
        let sheet = RawSheet::from_rows(rows).unwrap();

        let cleaned = pipeline().clean(&sheet).unwrap();
        let order: Vec<(&str, usize)> = cleaned
            .iter()
            .map(|r| (r.student_name.as_str(), r.class_number))
            .collect();
        assert_eq!(order, vec![("Bruno", 1), ("Caio", 1), ("Ana", 1), ("Ana", 2)]);
    }

    #[test]
    fn test_sheet_without_students_is_empty_dataset() {
        let sheet = RawSheet::from_rows(header_rows(["12/02/2024", "19/02/2024"])).unwrap();
        assert!(matches!(
            pipeline().run(&sheet),
            Err(PipelineError::EmptyDataset)
        ));
    }

    #[test]
    fn test_inspect_reports_classes() {
        let summary = pipeline()
            .inspect(&two_student_sheet(["12/02/2024", "19/02/24"]))
            .unwrap();
        assert_eq!(
            summary.classes,
            vec![
                ClassSummary {
                    class_number: 1,
                    class_date: NaiveDate::from_ymd_opt(2024, 2, 12).unwrap(),
                },
                ClassSummary {
                    class_number: 2,
                    class_date: NaiveDate::from_ymd_opt(2024, 2, 19).unwrap(),
                },
            ]
        );
        assert_eq!(summary.student_rows, 2);
        assert!(summary.ignored_occurrences.is_empty());
    }

    #[test]
    fn test_run_file_publishes_tables() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("turma.csv");

        let mut csv = String::new();
        for row in header_rows(["12/02/2024", "19/02/2024"]) {
            csv.push_str(&row.join(";"));
            csv.push('\n');
        }
        csv.push_str(&student("Ana", &[["√", "P", "√", ":-D", ""]]).join(";"));
        csv.push('\n');
        csv.push_str(&student("Bruno", &[["X", "A", "X", ":-(", ""]]).join(";"));
        csv.push('\n');
        std::fs::write(&input, csv).unwrap();

        let out = dir.path().join("out");
        let manifest = run_file(&input, &out, PipelineConfig::default(), b';').unwrap();
        assert_eq!(manifest.rows(CLEANED_RECORDS_FILE), Some(2));
        assert!(out.join(MANIFEST_FILE).exists());
    }
}
