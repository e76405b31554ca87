//! Error types for the autoconv core.
//!
//! Errors are split by concern so that each stage reports what it knows:
//!
//! - [`ParseError`] - upstream parser failures (fatal for a stage)
//! - [`RuleError`] - malformed transformation rules (fatal for a stage)
//! - [`EncodeError`] - output encoding failures (fatal for a stage)
//! - [`RecommenderError`] - external recommender failures (never fatal)
//! - [`PersistenceError`] - template store failures
//! - [`ConfigError`] - invalid settings
//! - [`PipelineError`] - a fatal stage error, wraps all of the above
//! - [`JobError`] - misuse of the job registry or state machine
//!
//! Per-value problems found while transforming rows are *not* errors; they are
//! reported as [`crate::models::ValidationFinding`]s.

use thiserror::Error;
use uuid::Uuid;

use crate::jobs::JobStatus;

// =============================================================================
// Parsing Errors
// =============================================================================

/// Errors raised while turning a source into a structure and rows.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Failed to read the source.
    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode the source bytes.
    #[error("Failed to decode source as {encoding}: {message}")]
    Encoding { encoding: String, message: String },

    /// A record could not be read.
    #[error("Line {line}: {message}")]
    Malformed { line: u64, message: String },

    /// Source contained nothing.
    #[error("Source '{0}' is empty")]
    EmptySource(String),

    /// No header row.
    #[error("No header row found in '{0}'")]
    NoHeaders(String),
}

// =============================================================================
// Rule Errors
// =============================================================================

/// Structurally invalid transformation configuration.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A rule needs a parameter it was not given.
    #[error("Rule for '{target}' is missing required parameter '{parameter}'")]
    MissingParameter { target: String, parameter: String },

    /// A parameter has the wrong shape.
    #[error("Rule for '{target}' has invalid parameter '{parameter}': {message}")]
    InvalidParameter {
        target: String,
        parameter: String,
        message: String,
    },

    /// A custom rule names a function the caller did not register.
    #[error("Rule for '{target}' references unknown custom function '{function}'")]
    UnknownFunction { target: String, function: String },

    /// Error findings went past the caller-supplied threshold.
    #[error("Transformation aborted: {errors} error findings exceed threshold of {threshold}")]
    ThresholdExceeded { errors: usize, threshold: usize },

    /// Rule definitions could not be decoded.
    #[error("Invalid rule definitions: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Encoding Errors
// =============================================================================

/// Errors from the output encoder.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Requested output format is not supported.
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    /// Delimiter is not a single ASCII character.
    #[error("Invalid delimiter {0:?}: must be a single ASCII character")]
    InvalidDelimiter(char),

    /// Delimited writer failed.
    #[error("Delimited output error: {0}")]
    Csv(#[from] csv::Error),

    /// Structured document serialization failed.
    #[error("JSON output error: {0}")]
    Json(#[from] serde_json::Error),

    /// Spreadsheet writer failed.
    #[error("Spreadsheet output error: {0}")]
    Spreadsheet(String),

    /// IO error while flushing output.
    #[error("Output IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Recommender Errors
// =============================================================================

/// Errors from an external recommender. The mapping engine swallows these
/// and falls back to rule-based matching.
#[derive(Debug, Error)]
pub enum RecommenderError {
    /// No credentials configured.
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Upstream API returned an error.
    #[error("API error: {0}")]
    Api(String),

    /// Response could not be understood.
    #[error("Invalid recommender response: {0}")]
    InvalidResponse(String),

    /// Call did not return in time.
    #[error("Recommender timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The recommender panicked while answering.
    #[error("Recommender panicked: {0}")]
    Panicked(String),
}

// =============================================================================
// Persistence Errors
// =============================================================================

/// Errors from the template store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Nothing stored under this key.
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Key cannot be used as a storage name.
    #[error("Invalid template key: {0}")]
    InvalidKey(String),

    /// IO error.
    #[error("Template store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Template store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Invalid configuration value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A setting could not be parsed or is out of range.
    #[error("Invalid value '{value}' for {key}: {message}")]
    Invalid {
        key: String,
        value: String,
        message: String,
    },
}

// =============================================================================
// Pipeline Errors (fatal stage errors)
// =============================================================================

/// A fatal stage error. Aborts the current job, which becomes `failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Parser collaborator failed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Rules are structurally invalid.
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),

    /// Output could not be encoded.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Persistence collaborator failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Payload does not match the job kind.
    #[error("Payload for a {payload} job submitted as a {kind} job")]
    PayloadMismatch { kind: String, payload: String },

    /// A batch job was submitted with no items.
    #[error("Batch job has no items")]
    EmptyBatch,

    /// A stage panicked.
    #[error("Pipeline panicked: {0}")]
    Panicked(String),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// =============================================================================
// Job Errors
// =============================================================================

/// Misuse of the job registry or state machine.
#[derive(Debug, Error)]
pub enum JobError {
    /// No job with this id.
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Transition not allowed by the lifecycle.
    #[error("Illegal job transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },

    /// `run` was called for a job that is no longer pending.
    #[error("Job {id} cannot be run from status {status}")]
    NotRunnable { id: Uuid, status: JobStatus },

    /// Only finished jobs can be removed.
    #[error("Job {id} is still {status}")]
    StillActive { id: Uuid, status: JobStatus },

    /// Submission rejected before the job was recorded.
    #[error("Job rejected: {0}")]
    Rejected(#[from] PipelineError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for rule compilation and execution.
pub type RuleResult<T> = Result<T, RuleError>;

/// Result type for encoding.
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Result type for recommender calls.
pub type RecommenderResult<T> = Result<T, RecommenderError>;

/// Result type for persistence.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Result type for pipeline stages.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;
