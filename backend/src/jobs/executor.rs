//! Job executor: submit, run, cancel and observe jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::pipeline::{self, Checkpoints, JobOutput, JobPayload, PipelineContext, StageError};
use super::registry::JobRegistry;
use super::{Job, JobKind, JobStatus};
use crate::error::{panic_message, JobError, JobResult, PipelineError};
use crate::logs::{EventBroadcaster, JobEvent, LogLevel};

/// Runs jobs against a shared [`JobRegistry`].
///
/// Cloning is cheap; clones share the registry, the collaborators and the
/// event channel.
#[derive(Clone)]
pub struct JobExecutor {
    registry: Arc<JobRegistry>,
    context: Arc<PipelineContext>,
    events: EventBroadcaster,
}

impl JobExecutor {
    pub fn new(context: PipelineContext) -> Self {
        Self::with_registry(context, Arc::new(JobRegistry::new()))
    }

    /// Executor over an existing registry.
    pub fn with_registry(context: PipelineContext, registry: Arc<JobRegistry>) -> Self {
        Self {
            registry,
            context: Arc::new(context),
            events: EventBroadcaster::new(),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// Stream of every job event from now on.
    pub fn subscribe(&self) -> BroadcastStream<JobEvent> {
        self.events.subscribe()
    }

    /// Record a new pending job. Nothing runs until [`run`](Self::run) or
    /// [`spawn`](Self::spawn).
    pub async fn submit(&self, kind: JobKind, payload: JobPayload) -> JobResult<Job> {
        if payload.kind() != kind {
            return Err(PipelineError::PayloadMismatch {
                kind: kind.to_string(),
                payload: payload.kind().to_string(),
            }
            .into());
        }
        payload.validate()?;

        let job = Job::new(kind);
        self.registry.insert(job.clone(), payload).await;
        self.events
            .emit(JobEvent::new(job.id, job.status, job.progress, format!("{} job queued", kind)));
        Ok(job)
    }

    /// Run a pending job to the end and return its final state.
    ///
    /// Pipeline failures are not errors here: they leave the job `failed`
    /// with an error message, and so does a panicking stage. Errors are
    /// reserved for registry misuse.
    pub async fn run(&self, id: Uuid) -> JobResult<Job> {
        let entry = self.registry.entry(id).await?;

        let (job, payload) = {
            let mut record = entry.record.lock().await;
            let status = record.job.status;
            let payload = match (status, record.payload.take()) {
                (JobStatus::Pending, Some(payload)) => payload,
                _ => return Err(JobError::NotRunnable { id, status }),
            };
            record.job.transition(JobStatus::Processing)?;
            (record.job.clone(), payload)
        };
        self.events
            .emit(JobEvent::new(id, job.status, job.progress, format!("{} job started", job.kind)));

        let checkpoints = Checkpoints::new(&entry, &self.events);
        let result = AssertUnwindSafe(pipeline::execute(&self.context, payload, &checkpoints))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(&*panic);
                tracing::error!(job_id = %id, %message, "pipeline panicked");
                Err(StageError::Failed(PipelineError::Panicked(message)))
            });

        let (job, message) = {
            let mut record = entry.record.lock().await;
            let message = match result {
                // A cancel that landed after the last checkpoint still wins
                Ok(_) if entry.token.is_cancelled() => {
                    record.job.transition(JobStatus::Cancelled)?;
                    "Job cancelled".to_string()
                }
                Ok(output) => {
                    record.job.transition(JobStatus::Completed)?;
                    let message = completion_message(&output);
                    record.output = Some(output);
                    message
                }
                Err(StageError::Cancelled) => {
                    record.job.transition(JobStatus::Cancelled)?;
                    "Job cancelled".to_string()
                }
                Err(StageError::Failed(e)) => {
                    let message = e.to_string();
                    record.job.fail(message.clone())?;
                    format!("Job failed: {}", message)
                }
            };
            (record.job.clone(), message)
        };
        self.events.emit(JobEvent::new(id, job.status, job.progress, message));

        Ok(job)
    }

    /// Run a job on the tokio runtime.
    pub fn spawn(&self, id: Uuid) -> JoinHandle<JobResult<Job>> {
        let executor = self.clone();
        tokio::spawn(async move { executor.run(id).await })
    }

    /// Submit and run in one step.
    pub async fn execute(&self, kind: JobKind, payload: JobPayload) -> JobResult<Job> {
        let job = self.submit(kind, payload).await?;
        self.run(job.id).await
    }

    /// Request cancellation.
    ///
    /// A pending job is cancelled at once. A processing job keeps its status
    /// until the pipeline reaches its next checkpoint. Cancelling a cancelled
    /// job is a no-op; completed and failed jobs cannot be cancelled.
    pub async fn cancel(&self, id: Uuid) -> JobResult<Job> {
        let entry = self.registry.entry(id).await?;

        let (job, event) = {
            let mut record = entry.record.lock().await;
            let event = match record.job.status {
                JobStatus::Pending => {
                    record.job.transition(JobStatus::Cancelled)?;
                    record.payload = None;
                    entry.token.cancel();
                    Some(("Job cancelled before start", LogLevel::Warning))
                }
                JobStatus::Processing if !entry.token.is_cancelled() => {
                    entry.token.cancel();
                    Some(("Cancellation requested", LogLevel::Warning))
                }
                JobStatus::Processing | JobStatus::Cancelled => None,
                status => {
                    return Err(JobError::IllegalTransition {
                        from: status,
                        to: JobStatus::Cancelled,
                    })
                }
            };
            (record.job.clone(), event)
        };

        if let Some((message, level)) = event {
            self.events
                .emit(JobEvent::new(id, job.status, job.progress, message).with_level(level));
        }
        Ok(job)
    }

    /// Current state of a job.
    pub async fn get(&self, id: Uuid) -> JobResult<Job> {
        self.registry.get(id).await
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        self.registry.list().await
    }

    /// Output of a job; `None` until it completed.
    pub async fn output(&self, id: Uuid) -> JobResult<Option<JobOutput>> {
        let entry = self.registry.entry(id).await?;
        let record = entry.record.lock().await;
        Ok(record.output.clone())
    }

    /// Move the output out of a job. Later calls return `None`.
    pub async fn take_output(&self, id: Uuid) -> JobResult<Option<JobOutput>> {
        let entry = self.registry.entry(id).await?;
        let mut record = entry.record.lock().await;
        Ok(record.output.take())
    }

    /// Forget a finished job and whatever output it still holds.
    pub async fn remove(&self, id: Uuid) -> JobResult<Job> {
        self.registry.remove(id).await
    }
}

fn completion_message(output: &JobOutput) -> String {
    match output {
        JobOutput::Analysis(structure) => format!(
            "Analysis completed: {} fields, {} rows",
            structure.fields().len(),
            structure.row_count()
        ),
        JobOutput::Mapping(mapping) => format!(
            "Mapping completed: {} candidates, confidence {}",
            mapping.recommendation.mapping.len(),
            mapping.recommendation.mapping.overall_confidence()
        ),
        JobOutput::Transform(output) => format!(
            "Transform {}: {} rows, {} errors, {} warnings",
            match output.report.status() {
                crate::transform::ReportStatus::Completed => "completed",
                crate::transform::ReportStatus::CompletedWithWarnings => "completed with warnings",
            },
            output.report.rows_processed,
            output.report.error_count,
            output.report.warning_count
        ),
        JobOutput::Batch(batch) => format!(
            "Batch completed: {} succeeded, {} failed",
            batch.succeeded, batch.failed
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::error::{ParseResult, RecommenderResult};
    use crate::jobs::pipeline::{
        AnalysisRequest, BatchRequest, ItemOutcome, MappingRequest, Reference, RuleSource, TransformRequest,
    };
    use crate::mapping::Recommender;
    use crate::models::{MappingCandidate, StructureDescriptor};
    use crate::output::{EncodeOptions, OutputFormat};
    use crate::parser::{DelimitedParser, ParsedSource, Parser, SourceInput};
    use crate::templates::TemplateRegistry;
    use crate::transform::{CustomFunctions, RuleKind, TransformationRule};
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::{Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    fn context() -> PipelineContext {
        PipelineContext::new(Settings::default()).with_templates(TemplateRegistry::in_memory())
    }

    fn csv(name: &str, content: &str) -> SourceInput {
        SourceInput::bytes(name, content.as_bytes().to_vec())
    }

    fn analysis() -> JobPayload {
        JobPayload::Analysis(AnalysisRequest {
            source: csv("people.csv", "name,age\nAda,36\n"),
        })
    }

    /// Blocks inside `suggest` until released.
    struct GatedRecommender {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Recommender for GatedRecommender {
        fn name(&self) -> &str {
            "gated"
        }

        async fn suggest(
            &self,
            _input: &StructureDescriptor,
            _reference: &StructureDescriptor,
        ) -> RecommenderResult<Vec<MappingCandidate>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(vec![])
        }
    }

    /// Panics on any source whose name contains "bad".
    struct ExplodingParser;

    impl Parser for ExplodingParser {
        fn parse(&self, source: &SourceInput) -> ParseResult<ParsedSource> {
            if source.name().contains("bad") {
                panic!("parser bug on {}", source.name());
            }
            DelimitedParser::new().parse(source)
        }
    }

    struct PanickingRecommender;

    #[async_trait]
    impl Recommender for PanickingRecommender {
        async fn suggest(
            &self,
            _input: &StructureDescriptor,
            _reference: &StructureDescriptor,
        ) -> RecommenderResult<Vec<MappingCandidate>> {
            panic!("recommender bug")
        }
    }

    #[tokio::test]
    async fn test_submit_then_run_completes() {
        let executor = JobExecutor::new(context());
        let job = executor.submit(JobKind::Analysis, analysis()).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(executor.get(job.id).await.unwrap().status, JobStatus::Pending);
        assert_eq!(executor.output(job.id).await.unwrap(), None);

        let done = executor.run(job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(matches!(executor.output(job.id).await.unwrap(), Some(JobOutput::Analysis(_))));

        // A finished job cannot run again
        assert!(matches!(
            executor.run(job.id).await,
            Err(JobError::NotRunnable {
                status: JobStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_mismatched_payload() {
        let executor = JobExecutor::new(context());
        let err = executor.submit(JobKind::Transform, analysis()).await.unwrap_err();
        assert!(matches!(err, JobError::Rejected(PipelineError::PayloadMismatch { .. })));
        assert!(executor.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let executor = JobExecutor::new(context());
        let job = executor.submit(JobKind::Analysis, analysis()).await.unwrap();

        let cancelled = executor.cancel(job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert_eq!(cancelled.progress, 0);

        assert!(matches!(
            executor.run(job.id).await,
            Err(JobError::NotRunnable {
                status: JobStatus::Cancelled,
                ..
            })
        ));
        // Idempotent
        assert_eq!(executor.cancel(job.id).await.unwrap().status, JobStatus::Cancelled);
        assert_eq!(executor.get(job.id).await.unwrap().progress, 0);
    }

    #[tokio::test]
    async fn test_cancel_completed_job_is_illegal() {
        let executor = JobExecutor::new(context());
        let job = executor.execute(JobKind::Analysis, analysis()).await.unwrap();
        assert!(matches!(
            executor.cancel(job.id).await,
            Err(JobError::IllegalTransition {
                from: JobStatus::Completed,
                to: JobStatus::Cancelled
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_while_processing() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let recommender = GatedRecommender {
            entered: entered.clone(),
            release: release.clone(),
        };
        let executor = JobExecutor::new(context().with_recommender(Arc::new(recommender)));

        let payload = JobPayload::Mapping(MappingRequest {
            input: csv("in.csv", "Name\nAda\n"),
            reference: Reference::Structure {
                structure: StructureDescriptor::from_names(&["name"]),
            },
            use_recommender: true,
            save_as: None,
        });
        let job = executor.submit(JobKind::Mapping, payload).await.unwrap();
        let handle = executor.spawn(job.id);

        entered.notified().await;
        let during = executor.cancel(job.id).await.unwrap();
        assert_eq!(during.status, JobStatus::Processing);
        assert_eq!(during.progress, 40);

        release.notify_one();
        let finished = handle.await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Cancelled);
        assert_eq!(finished.progress, 40);
        assert_eq!(executor.output(job.id).await.unwrap(), None);
        assert_eq!(executor.get(job.id).await.unwrap().status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_job_keeps_progress_and_message() {
        let executor = JobExecutor::new(context());
        let payload = JobPayload::Transform(TransformRequest {
            source: csv("in.csv", "a\n1\n"),
            rules: RuleSource::Inline {
                rules: vec![TransformationRule::new("a", "b", RuleKind::Custom)],
            },
            format: OutputFormat::Json,
            options: EncodeOptions::default(),
            error_threshold: None,
        });

        let job = executor.execute(JobKind::Transform, payload).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let message = job.error_message.unwrap();
        assert!(message.contains("function"), "{message}");
    }

    #[tokio::test]
    async fn test_batch_with_one_invalid_item_completes() {
        let executor = JobExecutor::new(context());
        let payload = JobPayload::Batch(BatchRequest {
            items: vec![
                csv("one.csv", "id\n1\n"),
                csv("broken.csv", ""),
                csv("three.csv", "id\n3\n"),
            ],
            rules: RuleSource::Inline {
                rules: vec![TransformationRule::direct("id")],
            },
            format: OutputFormat::csv(),
            options: EncodeOptions::default(),
            error_threshold: None,
        });

        let job = executor.execute(JobKind::Batch, payload).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let Some(JobOutput::Batch(batch)) = executor.output(job.id).await.unwrap() else {
            panic!("expected a batch output");
        };
        assert_eq!(batch.succeeded, 2);
        assert_eq!(batch.failed, 1);
        assert!(matches!(batch.items[1].outcome, ItemOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_progress_events_are_monotonic() {
        let executor = JobExecutor::new(context());
        let mut events = executor.subscribe();

        let payload = JobPayload::Transform(TransformRequest {
            source: csv("in.csv", "a\n1\n2\n"),
            rules: RuleSource::Inline {
                rules: vec![TransformationRule::direct("a")],
            },
            format: OutputFormat::Json,
            options: EncodeOptions::default(),
            error_threshold: None,
        });
        let job = executor.execute(JobKind::Transform, payload).await.unwrap();

        let mut seen = Vec::new();
        while let Some(Ok(event)) = events.next().await {
            assert_eq!(event.job_id, job.id);
            seen.push((event.status, event.progress));
            if event.status == JobStatus::Completed {
                break;
            }
        }

        let progress: Vec<u8> = seen.iter().map(|(_, p)| *p).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        assert_eq!(progress, vec![0, 0, 20, 50, 80, 100]);
        assert_eq!(seen.first().map(|(s, _)| *s), Some(JobStatus::Pending));
    }

    #[tokio::test]
    async fn test_panicking_stage_fails_job() {
        let executor = JobExecutor::new(context().with_parser(Arc::new(ExplodingParser)));
        let job = executor
            .submit(
                JobKind::Analysis,
                JobPayload::Analysis(AnalysisRequest {
                    source: csv("bad.csv", "a\n1\n"),
                }),
            )
            .await
            .unwrap();

        let finished = executor.spawn(job.id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Failed);
        let message = finished.error_message.unwrap();
        assert!(message.contains("panicked"), "{message}");
        assert!(message.contains("parser bug on bad.csv"), "{message}");

        assert_eq!(executor.get(job.id).await.unwrap().status, JobStatus::Failed);
        assert!(matches!(
            executor.cancel(job.id).await,
            Err(JobError::IllegalTransition {
                from: JobStatus::Failed,
                to: JobStatus::Cancelled
            })
        ));
    }

    #[tokio::test]
    async fn test_panicking_recommender_falls_back_in_mapping_job() {
        let executor = JobExecutor::new(context().with_recommender(Arc::new(PanickingRecommender)));
        let payload = JobPayload::Mapping(MappingRequest {
            input: csv("in.csv", "Name\nAda\n"),
            reference: Reference::Structure {
                structure: StructureDescriptor::from_names(&["name"]),
            },
            use_recommender: true,
            save_as: None,
        });

        let job = executor.execute(JobKind::Mapping, payload).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let Some(JobOutput::Mapping(mapping)) = executor.output(job.id).await.unwrap() else {
            panic!("expected a mapping output");
        };
        assert!(mapping.recommendation.used_fallback());
        assert_eq!(
            mapping.recommendation.mapping.candidate_for("Name").unwrap().target_field,
            "name"
        );
    }

    #[tokio::test]
    async fn test_panicking_batch_item_is_isolated() {
        let executor = JobExecutor::new(context().with_parser(Arc::new(ExplodingParser)));
        let payload = JobPayload::Batch(BatchRequest {
            items: vec![csv("good.csv", "id\n1\n"), csv("bad.csv", "id\n2\n")],
            rules: RuleSource::Inline {
                rules: vec![TransformationRule::direct("id")],
            },
            format: OutputFormat::csv(),
            options: EncodeOptions::default(),
            error_threshold: None,
        });

        let job = executor.execute(JobKind::Batch, payload).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let Some(JobOutput::Batch(batch)) = executor.output(job.id).await.unwrap() else {
            panic!("expected a batch output");
        };
        assert_eq!((batch.succeeded, batch.failed), (1, 1));
        match &batch.items[1].outcome {
            ItemOutcome::Failed { message } => assert!(message.contains("parser bug"), "{message}"),
            other => panic!("expected a failed item, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_transform_at_row_batch_boundary() {
        let slot: Arc<OnceLock<CancellationToken>> = Arc::new(OnceLock::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let functions = {
            let slot = slot.clone();
            let calls = calls.clone();
            CustomFunctions::new().with(
                "cancel_on_second_row",
                move |value: &Value, _: &Map<String, Value>| -> Result<Value, String> {
                    if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                        if let Some(token) = slot.get() {
                            token.cancel();
                        }
                    }
                    Ok(value.clone())
                },
            )
        };
        let settings = Settings::default().with_row_batch_size(2);
        let executor = JobExecutor::new(
            PipelineContext::new(settings)
                .with_templates(TemplateRegistry::in_memory())
                .with_custom_functions(functions),
        );

        let payload = JobPayload::Transform(TransformRequest {
            source: csv("in.csv", "a\n1\n2\n3\n4\n5\n"),
            rules: RuleSource::Inline {
                rules: vec![TransformationRule::new("a", "a", RuleKind::Custom)
                    .with_parameter("function", "cancel_on_second_row")],
            },
            format: OutputFormat::csv(),
            options: EncodeOptions::default(),
            error_threshold: None,
        });
        let job = executor.submit(JobKind::Transform, payload).await.unwrap();
        let token = executor.registry().entry(job.id).await.unwrap().token.clone();
        assert!(slot.set(token).is_ok());

        let finished = executor.run(job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Cancelled);
        assert_eq!(finished.progress, 20);
        // The batch in flight finished, nothing after it was transformed
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(executor.output(job.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_output_then_remove() {
        let executor = JobExecutor::new(context());
        let job = executor.execute(JobKind::Analysis, analysis()).await.unwrap();

        assert!(matches!(executor.take_output(job.id).await.unwrap(), Some(JobOutput::Analysis(_))));
        assert_eq!(executor.take_output(job.id).await.unwrap(), None);
        assert_eq!(executor.get(job.id).await.unwrap().status, JobStatus::Completed);

        executor.remove(job.id).await.unwrap();
        assert!(executor.list().await.is_empty());
        assert!(matches!(executor.get(job.id).await, Err(JobError::NotFound(_))));

        let pending = executor.submit(JobKind::Analysis, analysis()).await.unwrap();
        assert!(matches!(
            executor.remove(pending.id).await,
            Err(JobError::StillActive { .. })
        ));
    }
}
