//! Class Engagement - batch engine for per-class student engagement signals
//!
//! Turns a wide class-tracking sheet into scored, clustered engagement tables
//! through a deterministic pipeline: schema reading → wide-to-long reshape →
//! identity resolution → value normalization → engagement scoring →
//! aggregation and clustering → table publication.
//!
//! A run is a pure function of the source sheet and [`PipelineConfig`]; any
//! fatal error aborts it before a single table is written.

pub mod cluster;
pub mod config;
pub mod encoder;
pub mod error;
pub mod identity;
pub mod normalizer;
pub mod pipeline;
pub mod reshape;
pub mod schema;
pub mod scoring;
pub mod source;
pub mod types;

pub use config::PipelineConfig;
pub use encoder::{RunManifest, TableWriter};
pub use error::{DataIntegrityError, PipelineError, SchemaError, Stage};
pub use pipeline::{run_file, EngagementPipeline, PipelineOutput, SheetSummary};
pub use source::RawSheet;

/// Engine version recorded in every run manifest
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded in every run manifest
pub const PRODUCER_NAME: &str = "class-engagement";
