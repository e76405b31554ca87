//! # Autoconv - structure-aware tabular data conversion
//!
//! Autoconv describes tabular sources, recommends how their fields map onto a
//! reference structure, transforms rows with typed rules and encodes the
//! result, all as cancellable jobs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Source    │────▶│   Parser    │────▶│  Transform  │────▶│   Output    │
//! │ (CSV, TSV)  │     │ (describe)  │     │   (rules)   │     │ (csv, xlsx) │
//! └─────────────┘     └──────┬──────┘     └──────▲──────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   │
//!                     ┌─────────────┐     ┌──────┴──────┐
//!                     │   Mapping   │────▶│  Templates  │
//!                     │ (AI / fuzzy)│     │ (persisted) │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use autoconv::{JobExecutor, JobKind, JobPayload, PipelineContext, Settings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = JobExecutor::new(PipelineContext::new(Settings::from_env().unwrap()));
//!     let job = executor.execute(JobKind::Transform, payload).await.unwrap();
//!     println!("{} at {}%", job.status, job.progress);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`config`] - Settings from the environment
//! - [`logs`] - Job events and tracing setup
//! - [`models`] - Structures, mappings and findings
//! - [`parser`] - Delimited text parsing with auto-detection
//! - [`mapping`] - Field similarity and mapping recommendation
//! - [`transform`] - Transformation rules and engine
//! - [`output`] - Output encoders
//! - [`templates`] - Reusable mapping templates
//! - [`ai`] - Bundled AI recommender
//! - [`jobs`] - Job lifecycle and execution

// Core modules
pub mod config;
pub mod error;
pub mod logs;
pub mod models;

// Parsing
pub mod parser;

// Mapping
pub mod mapping;

// Transformation
pub mod transform;

// Output
pub mod output;

// Persistence
pub mod templates;

// AI
pub mod ai;

// Jobs
pub mod jobs;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, EncodeError, JobError, ParseError, PersistenceError, PipelineError, RecommenderError, RuleError,
};

// =============================================================================
// Re-exports - Configuration & Logs
// =============================================================================

pub use config::Settings;
pub use logs::{init_tracing, EventBroadcaster, JobEvent, LogLevel};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    FieldDescriptor, InferredType, MappingCandidate, MappingSet, Row, Severity, StructureDescriptor,
    TransformationKind, ValidationFinding,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{DelimitedParser, ParsedSource, Parser, SourceInput};

// =============================================================================
// Re-exports - Mapping
// =============================================================================

pub use mapping::{MappingEngine, MappingSource, Recommendation, Recommender};

// =============================================================================
// Re-exports - Transformation
// =============================================================================

pub use transform::{
    CustomFunctions, ReportStatus, RuleKind, TransformEngine, TransformReport, TransformationRule, TransformedRow,
};

// =============================================================================
// Re-exports - Output
// =============================================================================

pub use output::{encode, Artifact, ArtifactInfo, EncodeOptions, OutputFormat};

// =============================================================================
// Re-exports - Templates & AI
// =============================================================================

pub use ai::AiClient;
pub use templates::{FileStore, MappingTemplate, MemoryStore, Persistence, TemplateRegistry};

// =============================================================================
// Re-exports - Jobs
// =============================================================================

pub use jobs::{
    Job, JobExecutor, JobKind, JobOutput, JobPayload, JobRegistry, JobStatus, PipelineContext, Reference,
    RuleSource,
};
