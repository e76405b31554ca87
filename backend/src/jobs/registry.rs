//! Job registry: id → job record, one lock per job.
//!
//! The map lock is only held to insert or look up an entry; every state
//! change goes through the entry's own mutex, so a job's status and progress
//! have a single writer at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::pipeline::{JobOutput, JobPayload};
use super::Job;
use crate::error::{JobError, JobResult};

/// Mutable part of a registry entry.
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub job: Job,
    /// Taken when the job starts running.
    pub payload: Option<JobPayload>,
    /// Set when the job completes.
    pub output: Option<JobOutput>,
}

/// One job: its record and its cancellation flag.
#[derive(Debug)]
pub(crate) struct JobEntry {
    pub record: Mutex<JobRecord>,
    pub token: CancellationToken,
}

impl JobEntry {
    pub async fn snapshot(&self) -> Job {
        self.record.lock().await.job.clone()
    }
}

/// Owned store of jobs, shared by handle.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new job. The job is visible to readers once this returns.
    pub(crate) async fn insert(&self, job: Job, payload: JobPayload) -> Arc<JobEntry> {
        let entry = Arc::new(JobEntry {
            record: Mutex::new(JobRecord {
                job: job.clone(),
                payload: Some(payload),
                output: None,
            }),
            token: CancellationToken::new(),
        });
        self.jobs.write().await.insert(job.id, entry.clone());
        entry
    }

    pub(crate) async fn entry(&self, id: Uuid) -> JobResult<Arc<JobEntry>> {
        self.jobs.read().await.get(&id).cloned().ok_or(JobError::NotFound(id))
    }

    /// Current state of a job.
    pub async fn get(&self, id: Uuid) -> JobResult<Job> {
        Ok(self.entry(id).await?.snapshot().await)
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let entries: Vec<Arc<JobEntry>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            jobs.push(entry.snapshot().await);
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Drop a finished job together with its output.
    pub async fn remove(&self, id: Uuid) -> JobResult<Job> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get(&id).cloned().ok_or(JobError::NotFound(id))?;
        let job = entry.snapshot().await;
        if !job.status.is_terminal() {
            return Err(JobError::StillActive { id, status: job.status });
        }
        jobs.remove(&id);
        Ok(job)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::pipeline::AnalysisRequest;
    use crate::jobs::{JobKind, JobStatus};
    use crate::parser::SourceInput;

    fn payload() -> JobPayload {
        JobPayload::Analysis(AnalysisRequest {
            source: SourceInput::bytes("a.csv", "x\n1"),
        })
    }

    #[tokio::test]
    async fn test_insert_get_list() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty().await);

        let first = Job::new(JobKind::Analysis);
        let second = Job::new(JobKind::Analysis);
        registry.insert(first.clone(), payload()).await;
        registry.insert(second.clone(), payload()).await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.get(first.id).await.unwrap(), first);
        let listed: Vec<Uuid> = registry.list().await.into_iter().map(|j| j.id).collect();
        assert!(listed.contains(&first.id) && listed.contains(&second.id));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let registry = JobRegistry::new();
        let id = Uuid::new_v4();
        assert!(matches!(registry.get(id).await, Err(JobError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_entry_mutation_is_visible() {
        let registry = JobRegistry::new();
        let job = Job::new(JobKind::Analysis);
        let entry = registry.insert(job.clone(), payload()).await;

        {
            let mut record = entry.record.lock().await;
            record.job.transition(JobStatus::Processing).unwrap();
            record.job.advance(10);
        }

        let current = registry.get(job.id).await.unwrap();
        assert_eq!(current.status, JobStatus::Processing);
        assert_eq!(current.progress, 10);
    }

    #[tokio::test]
    async fn test_remove_only_finished_jobs() {
        let registry = JobRegistry::new();
        let job = Job::new(JobKind::Analysis);
        let entry = registry.insert(job.clone(), payload()).await;

        assert!(matches!(
            registry.remove(job.id).await,
            Err(JobError::StillActive {
                status: JobStatus::Pending,
                ..
            })
        ));

        entry.record.lock().await.job.transition(JobStatus::Cancelled).unwrap();
        let removed = registry.remove(job.id).await.unwrap();
        assert_eq!(removed.status, JobStatus::Cancelled);
        assert!(registry.is_empty().await);
        assert!(matches!(registry.remove(job.id).await, Err(JobError::NotFound(_))));
    }
}
