//! Job execution.
//!
//! - Lifecycle: [`Job`], [`JobKind`] and the [`JobStatus`] state machine
//! - Registry: per-job locked records with a cancellation token each
//! - Pipeline: the kind-specific stages and their payloads / outputs
//! - Executor: submit, run, cancel and observe jobs
//!
//! ```text
//! pending ──▶ processing ──▶ completed
//!    │             ├───────▶ failed
//!    └─────────────┴───────▶ cancelled
//! ```

pub mod executor;
pub mod pipeline;
pub mod registry;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{JobError, JobResult};

pub use executor::JobExecutor;
pub use pipeline::{
    AnalysisRequest, BatchItemResult, BatchOutput, BatchRequest, ItemOutcome, JobOutput, JobPayload, MappingOutput,
    MappingRequest, PipelineContext, Reference, RuleSource, TransformOutput, TransformRequest,
};
pub use registry::JobRegistry;

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Parse and describe a source.
    Analysis,
    /// Recommend a mapping between two structures.
    Mapping,
    /// Transform one source and encode the result.
    Transform,
    /// Transform several sources with the same rules.
    Batch,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Analysis => "analysis",
            JobKind::Mapping => "mapping",
            JobKind::Transform => "transform",
            JobKind::Batch => "batch",
        })
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// No transition leaves a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        })
    }
}

/// A unit of work tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0-100, never decreases within a run.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Summarized cause, set when the job failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    /// Move to `next` if the lifecycle allows it.
    pub fn transition(&mut self, next: JobStatus) -> JobResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::IllegalTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == JobStatus::Completed {
            self.progress = 100;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Raise progress to `progress` (capped at 100). Lower values are ignored.
    pub fn advance(&mut self, progress: u8) {
        let progress = progress.min(100);
        if progress > self.progress {
            self.progress = progress;
            self.updated_at = Utc::now();
        }
    }

    /// Mark the job failed with a summarized cause.
    pub fn fail(&mut self, message: impl Into<String>) -> JobResult<()> {
        self.transition(JobStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }
}
