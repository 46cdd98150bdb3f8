//! Engage CLI - Command-line interface for Class Engagement
//!
//! Commands:
//! - run: Score and cluster a class sheet and publish the output tables
//! - validate: Check a class sheet and report every problem found
//! - inspect: Show the classes and dates detected in a class sheet
//! - default-config: Print the default configuration as JSON

use clap::{Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use class_engagement::encoder::MANIFEST_FILE;
use class_engagement::error::Violation;
use class_engagement::{
    EngagementPipeline, PipelineConfig, PipelineError, RawSheet, ENGINE_VERSION,
};

/// Engage - per-class student engagement scores and profiles
#[derive(Parser)]
#[command(name = "engage")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Turn class-tracking sheets into engagement tables", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and publish the four output tables
    Run {
        /// Class sheet exported as CSV
        #[arg(short, long)]
        input: PathBuf,

        /// Directory receiving the tables and manifest.json
        #[arg(short, long)]
        output_dir: PathBuf,

        #[command(flatten)]
        settings: Settings,
    },

    /// Check a class sheet through normalization and report every problem
    Validate {
        /// Class sheet exported as CSV
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        settings: Settings,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the classes, dates and student rows detected in a class sheet
    Inspect {
        /// Class sheet exported as CSV
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        settings: Settings,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as JSON
    DefaultConfig,
}

#[derive(clap::Args)]
struct Settings {
    /// JSON configuration file; absent fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Requested number of clusters
    #[arg(long)]
    clusters: Option<usize>,

    /// Seed for centroid initialisation
    #[arg(long)]
    seed: Option<u64>,

    /// Field delimiter of the CSV export
    #[arg(long, default_value = ",")]
    delimiter: char,
}

impl Settings {
    fn load(&self) -> Result<PipelineConfig, EngageCliError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_path(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(clusters) = self.clusters {
            config.clustering.clusters = clusters;
        }
        if let Some(seed) = self.seed {
            config.clustering.seed = seed;
        }
        Ok(config)
    }

    fn delimiter(&self) -> Result<u8, EngageCliError> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or(EngageCliError::Delimiter(self.delimiter))
    }

    fn open(&self, input: &Path) -> Result<(EngagementPipeline, RawSheet), EngageCliError> {
        let pipeline = EngagementPipeline::new(self.load()?)?;
        let sheet = RawSheet::from_path(input, self.delimiter()?)?;
        Ok((pipeline, sheet))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), EngageCliError> {
    match cli.command {
        Commands::Run {
            input,
            output_dir,
            settings,
        } => cmd_run(&input, &output_dir, &settings),

        Commands::Validate {
            input,
            settings,
            json,
        } => cmd_validate(&input, &settings, json),

        Commands::Inspect {
            input,
            settings,
            json,
        } => cmd_inspect(&input, &settings, json),

        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
            Ok(())
        }
    }
}

fn cmd_run(input: &Path, output_dir: &Path, settings: &Settings) -> Result<(), EngageCliError> {
    let (pipeline, sheet) = settings.open(input)?;
    let manifest = pipeline.run_and_publish(&sheet, output_dir, Some(input))?;

    println!("Run {}", manifest.run_id);
    println!("Output: {}", output_dir.join(MANIFEST_FILE).display());
    for table in &manifest.tables {
        println!("  {:<24} {:>6} rows", table.file, table.rows);
    }
    if let Some(reduction) = manifest.cluster_reduction {
        println!(
            "Clusters reduced from {} to {} to fit the data",
            reduction.requested, reduction.effective
        );
    }
    Ok(())
}

fn cmd_validate(input: &Path, settings: &Settings, json: bool) -> Result<(), EngageCliError> {
    let (pipeline, sheet) = settings.open(input)?;

    let report = match pipeline.clean(&sheet) {
        Ok(cleaned) => ValidationReport {
            valid: true,
            student_rows: sheet.rows.len(),
            cleaned_rows: cleaned.len(),
            stage: None,
            error: None,
            violations: Vec::new(),
        },
        Err(e) => ValidationReport {
            valid: false,
            student_rows: sheet.rows.len(),
            cleaned_rows: 0,
            stage: Some(e.stage().as_str()),
            violations: match &e {
                PipelineError::DataIntegrity(integrity) => integrity
                    .violations
                    .iter()
                    .map(ViolationDetail::from)
                    .collect(),
                _ => Vec::new(),
            },
            error: Some(e.to_string()),
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Student rows: {}", report.student_rows);
        println!("Cleaned rows: {}", report.cleaned_rows);

        if let (Some(stage), Some(error)) = (report.stage, &report.error) {
            println!("\nFailed in stage {}:", stage);
            if report.violations.is_empty() {
                println!("  {}", error);
            }
            for v in &report.violations {
                println!("  - line {}, field {}: {}", v.line, v.field, v.problem);
            }
        }
    }

    if report.valid {
        Ok(())
    } else {
        Err(EngageCliError::ValidationFailed(report.violations.len().max(1)))
    }
}

fn cmd_inspect(input: &Path, settings: &Settings, json: bool) -> Result<(), EngageCliError> {
    let (pipeline, sheet) = settings.open(input)?;
    let summary = pipeline.inspect(&sheet)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Classes: {}", summary.classes.len());
        for class in &summary.classes {
            println!("  Aula {:>3}  {}", class.class_number, class.class_date);
        }
        println!("Student rows: {}", summary.student_rows);
        if !summary.ignored_occurrences.is_empty() {
            println!(
                "Ignored column suffixes (no class header): {:?}",
                summary.ignored_occurrences
            );
        }
    }
    Ok(())
}

#[derive(serde::Serialize)]
struct ValidationReport {
    valid: bool,
    student_rows: usize,
    cleaned_rows: usize,
    stage: Option<&'static str>,
    error: Option<String>,
    violations: Vec<ViolationDetail>,
}

#[derive(serde::Serialize)]
struct ViolationDetail {
    line: usize,
    field: String,
    problem: String,
}

impl From<&Violation> for ViolationDetail {
    fn from(v: &Violation) -> Self {
        Self {
            line: v.line,
            field: v.field.clone(),
            problem: v.kind.to_string(),
        }
    }
}

#[derive(Debug)]
enum EngageCliError {
    Pipeline(PipelineError),
    Json(serde_json::Error),
    Delimiter(char),
    ValidationFailed(usize),
}

impl From<PipelineError> for EngageCliError {
    fn from(e: PipelineError) -> Self {
        EngageCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for EngageCliError {
    fn from(e: serde_json::Error) -> Self {
        EngageCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    stage: Option<&'static str>,
    message: String,
    hint: Option<String>,
}

impl From<EngageCliError> for CliError {
    fn from(e: EngageCliError) -> Self {
        match e {
            EngageCliError::Pipeline(e) => {
                let (code, hint) = match &e {
                    PipelineError::Schema(_) => (
                        "SCHEMA_ERROR",
                        "Check the class label and date header rows",
                    ),
                    PipelineError::DataIntegrity(_) => (
                        "DATA_INTEGRITY_ERROR",
                        "Run 'engage validate' for the full list of problems",
                    ),
                    PipelineError::Config(_)
                    | PipelineError::ConfigFormat(_)
                    | PipelineError::ConfigFile { .. } => (
                        "CONFIG_ERROR",
                        "Run 'engage default-config' for a valid starting point",
                    ),
                    PipelineError::Source(_) => (
                        "SOURCE_ERROR",
                        "Check the input path and --delimiter",
                    ),
                    PipelineError::EmptyDataset => (
                        "EMPTY_DATASET",
                        "Ensure the sheet has student rows below the three header rows",
                    ),
                    PipelineError::Io(_) | PipelineError::Csv(_) | PipelineError::Json(_) => (
                        "PUBLISH_ERROR",
                        "Check output directory permissions; previous tables stay unmanifested",
                    ),
                };
                CliError {
                    code: code.to_string(),
                    stage: Some(e.stage().as_str()),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            EngageCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                stage: None,
                message: e.to_string(),
                hint: None,
            },
            EngageCliError::Delimiter(c) => CliError {
                code: "INVALID_DELIMITER".to_string(),
                stage: Some("configuration"),
                message: format!("Delimiter {:?} is not a single ASCII character", c),
                hint: Some("Use ',' or ';' for spreadsheet exports".to_string()),
            },
            EngageCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                stage: None,
                message: format!("{} problem(s) found", count),
                hint: Some("Fix the source sheet and retry".to_string()),
            },
        }
    }
}
