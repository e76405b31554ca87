//! Kind-specific job pipelines.
//!
//! | Kind | Stages | Checkpoints |
//! |------|--------|-------------|
//! | analysis | parse + describe | 10 / 50 / 100 |
//! | mapping | parse input, resolve reference, recommend | 20 / 40 / 60 / 100 |
//! | transform | parse, transform rows, encode | 20 / 50 / 80 / 100 |
//! | batch | transform per item, `batch_concurrency` items in flight | one per item, evenly spaced |
//!
//! Cancellation is checked at every checkpoint and between row batches.
//! An item failing inside a batch is recorded in the batch output and never
//! fails the batch job.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::registry::JobEntry;
use super::JobKind;
use crate::config::Settings;
use crate::error::{panic_message, EncodeError, ParseError, PersistenceError, PipelineError, RuleError};
use crate::logs::{EventBroadcaster, JobEvent};
use crate::mapping::{MappingEngine, Recommendation, Recommender};
use crate::models::{Row, StructureDescriptor};
use crate::output::{encode, Artifact, EncodeOptions, OutputFormat};
use crate::parser::{DelimitedParser, Parser, SourceInput};
use crate::templates::{FileStore, TemplateRegistry};
use crate::transform::{lower, CustomFunctions, TransformEngine, TransformReport, TransformationRule};

// =============================================================================
// Payloads
// =============================================================================

/// Parse and describe one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub source: SourceInput,
}

/// The structure a mapping targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reference {
    /// Described by parsing a sample source.
    Source { source: SourceInput },
    /// Given directly.
    Structure { structure: StructureDescriptor },
}

/// Recommend a mapping from `input` onto `reference`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingRequest {
    pub input: SourceInput,
    pub reference: Reference,
    /// Consult the configured recommender, if any.
    #[serde(default = "default_true")]
    pub use_recommender: bool,
    /// Save the mapping and its lowered rules as a template with this name.
    #[serde(default)]
    pub save_as: Option<String>,
}

/// Where transformation rules come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleSource {
    Inline {
        rules: Vec<TransformationRule>,
    },
    /// Lowered against the reference structure.
    Mapping {
        mapping: crate::models::MappingSet,
        reference: StructureDescriptor,
    },
    /// Rules of a stored template.
    Template {
        id: String,
    },
}

/// Transform one source and encode it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRequest {
    pub source: SourceInput,
    pub rules: RuleSource,
    pub format: OutputFormat,
    #[serde(default)]
    pub options: EncodeOptions,
    /// Fail once error findings exceed this count.
    #[serde(default)]
    pub error_threshold: Option<usize>,
}

/// Transform several sources with the same rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub items: Vec<SourceInput>,
    pub rules: RuleSource,
    pub format: OutputFormat,
    #[serde(default)]
    pub options: EncodeOptions,
    /// Per item.
    #[serde(default)]
    pub error_threshold: Option<usize>,
}

/// Job input, one variant per [`JobKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request", rename_all = "lowercase")]
pub enum JobPayload {
    Analysis(AnalysisRequest),
    Mapping(MappingRequest),
    Transform(TransformRequest),
    Batch(BatchRequest),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Analysis(_) => JobKind::Analysis,
            JobPayload::Mapping(_) => JobKind::Mapping,
            JobPayload::Transform(_) => JobKind::Transform,
            JobPayload::Batch(_) => JobKind::Batch,
        }
    }

    /// Checks that do not need any collaborator.
    pub fn validate(&self) -> Result<(), PipelineError> {
        match self {
            JobPayload::Batch(request) if request.items.is_empty() => Err(PipelineError::EmptyBatch),
            _ => Ok(()),
        }
    }
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Outputs
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MappingOutput {
    pub recommendation: Recommendation,
    /// Set when the mapping was saved as a template.
    pub template_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub report: TransformReport,
    pub artifact: Artifact,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Succeeded(TransformOutput),
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResult {
    /// Position in the request.
    pub index: usize,
    pub name: String,
    pub outcome: ItemOutcome,
}

impl BatchItemResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutput {
    /// In request order.
    pub items: Vec<BatchItemResult>,
    pub succeeded: usize,
    pub failed: usize,
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    Analysis(StructureDescriptor),
    Mapping(MappingOutput),
    Transform(TransformOutput),
    Batch(BatchOutput),
}

// =============================================================================
// Context
// =============================================================================

/// Collaborators shared by every pipeline run by an executor.
#[derive(Clone)]
pub struct PipelineContext {
    settings: Settings,
    parser: Arc<dyn Parser>,
    functions: CustomFunctions,
    recommender: Option<Arc<dyn Recommender>>,
    templates: TemplateRegistry,
    mapping: MappingEngine,
}

impl PipelineContext {
    /// Delimited parser, no recommender, no custom functions, file-backed
    /// templates under the configured directory.
    pub fn new(settings: Settings) -> Self {
        Self {
            parser: Arc::new(DelimitedParser::new().with_sample_size(settings.sample_size)),
            functions: CustomFunctions::new(),
            recommender: None,
            templates: TemplateRegistry::new(Arc::new(FileStore::new(&settings.template_dir))),
            mapping: MappingEngine::from_settings(&settings),
            settings,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_custom_functions(mut self, functions: CustomFunctions) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_recommender(mut self, recommender: Arc<dyn Recommender>) -> Self {
        self.recommender = Some(recommender);
        self
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn custom_functions(&self) -> &CustomFunctions {
        &self.functions
    }
}

// =============================================================================
// Checkpoints
// =============================================================================

/// Why a stage stopped early.
#[derive(Debug)]
pub(crate) enum StageError {
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for StageError {
    fn from(e: PipelineError) -> Self {
        StageError::Failed(e)
    }
}

impl From<ParseError> for StageError {
    fn from(e: ParseError) -> Self {
        StageError::Failed(e.into())
    }
}

impl From<RuleError> for StageError {
    fn from(e: RuleError) -> Self {
        StageError::Failed(e.into())
    }
}

impl From<EncodeError> for StageError {
    fn from(e: EncodeError) -> Self {
        StageError::Failed(e.into())
    }
}

impl From<PersistenceError> for StageError {
    fn from(e: PersistenceError) -> Self {
        StageError::Failed(e.into())
    }
}

type StageResult<T> = Result<T, StageError>;

/// Progress reporting and cancellation checks for one running job.
pub(crate) struct Checkpoints<'a> {
    entry: &'a JobEntry,
    events: &'a EventBroadcaster,
}

impl<'a> Checkpoints<'a> {
    pub fn new(entry: &'a JobEntry, events: &'a EventBroadcaster) -> Self {
        Self { entry, events }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.entry.token
    }

    /// Stop if cancellation was requested.
    pub fn check(&self) -> StageResult<()> {
        if self.entry.token.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record that `progress` was reached, then yield and check for
    /// cancellation before the next unit of work starts.
    pub async fn reach(&self, progress: u8, message: impl Into<String>) -> StageResult<()> {
        self.check()?;
        let job = {
            let mut record = self.entry.record.lock().await;
            self.check()?;
            record.job.advance(progress);
            record.job.clone()
        };
        self.events.emit(JobEvent::new(job.id, job.status, job.progress, message));

        tokio::task::yield_now().await;
        self.check()
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Run the pipeline for `payload`.
pub(crate) async fn execute(
    ctx: &PipelineContext,
    payload: JobPayload,
    checkpoints: &Checkpoints<'_>,
) -> StageResult<JobOutput> {
    checkpoints.check()?;
    match payload {
        JobPayload::Analysis(request) => analyze(ctx, request, checkpoints).await,
        JobPayload::Mapping(request) => recommend(ctx, request, checkpoints).await,
        JobPayload::Transform(request) => transform(ctx, request, checkpoints).await,
        JobPayload::Batch(request) => batch(ctx, request, checkpoints).await,
    }
}

async fn analyze(ctx: &PipelineContext, request: AnalysisRequest, cp: &Checkpoints<'_>) -> StageResult<JobOutput> {
    cp.reach(10, format!("Reading {}", request.source.name())).await?;

    let parsed = ctx.parser.parse(&request.source)?;
    cp.reach(
        50,
        format!(
            "Parsed {} rows, {} fields ({}, delimiter {:?})",
            parsed.row_count(),
            parsed.structure.fields().len(),
            parsed.encoding,
            parsed.delimiter
        ),
    )
    .await?;

    Ok(JobOutput::Analysis(parsed.structure))
}

async fn recommend(ctx: &PipelineContext, request: MappingRequest, cp: &Checkpoints<'_>) -> StageResult<JobOutput> {
    let input = ctx.parser.parse(&request.input)?.structure;
    cp.reach(20, format!("Input has {} fields", input.fields().len())).await?;

    let reference = match request.reference {
        Reference::Source { source } => ctx.parser.parse(&source)?.structure,
        Reference::Structure { structure } => structure,
    };
    cp.reach(40, format!("Reference has {} fields", reference.fields().len())).await?;

    let recommender = if request.use_recommender {
        ctx.recommender.as_deref()
    } else {
        None
    };
    let recommendation = ctx.mapping.recommend_detailed(&input, &reference, recommender).await;
    let mapping = &recommendation.mapping;
    let message = format!(
        "Matched {} fields, confidence {}{}",
        mapping.len(),
        mapping.overall_confidence(),
        if recommendation.used_fallback() { " (rule-based fallback)" } else { "" }
    );
    cp.reach(60, message).await?;

    let template_id = match &request.save_as {
        Some(name) => {
            let rules = lower(mapping, &reference);
            let template = ctx
                .templates
                .save(name, mapping.clone(), rules, input.field_names())?;
            Some(template.id)
        }
        None => None,
    };

    Ok(JobOutput::Mapping(MappingOutput {
        recommendation,
        template_id,
    }))
}

async fn transform(ctx: &PipelineContext, request: TransformRequest, cp: &Checkpoints<'_>) -> StageResult<JobOutput> {
    let (engine, template_id) = resolve_rules(ctx, request.rules)?;

    let parsed = ctx.parser.parse(&request.source)?;
    cp.reach(20, format!("Parsed {} rows", parsed.row_count())).await?;

    let (records, mut report) = transform_rows(
        &engine,
        parsed.rows(),
        request.error_threshold,
        ctx.settings.row_batch_size,
        cp.token(),
    )
    .await?;
    cp.reach(
        50,
        format!(
            "Transformed {} rows ({} errors, {} warnings)",
            report.rows_processed, report.error_count, report.warning_count
        ),
    )
    .await?;

    let artifact = encode(&records, &engine.target_fields(), request.format, &request.options)?;
    report.artifact = Some(artifact.info());
    cp.reach(80, format!("Encoded {} bytes as {}", artifact.bytes.len(), artifact.format)).await?;

    if let Some(id) = template_id {
        record_template_use(ctx, &id, report.success_rate());
    }

    Ok(JobOutput::Transform(TransformOutput { report, artifact }))
}

async fn batch(ctx: &PipelineContext, request: BatchRequest, cp: &Checkpoints<'_>) -> StageResult<JobOutput> {
    if request.items.is_empty() {
        return Err(PipelineError::EmptyBatch.into());
    }
    let (engine, template_id) = resolve_rules(ctx, request.rules)?;
    let total = request.items.len();

    let engine = &engine;
    let options = &request.options;
    let format = request.format;
    let threshold = request.error_threshold;
    let token = cp.token();

    let pending: Vec<_> = request
        .items
        .into_iter()
        .enumerate()
        .map(|(index, source)| process_item(ctx, engine, index, source, format, options, threshold, token))
        .collect();
    let mut in_flight = stream::iter(pending).buffer_unordered(ctx.settings.batch_concurrency);

    let mut items = Vec::with_capacity(total);
    while let Some((index, name, result)) = in_flight.next().await {
        let outcome = match result {
            Ok(output) => ItemOutcome::Succeeded(output),
            Err(StageError::Cancelled) => return Err(StageError::Cancelled),
            Err(StageError::Failed(e)) => {
                tracing::warn!(item = %name, error = %e, "batch item failed");
                ItemOutcome::Failed { message: e.to_string() }
            }
        };
        items.push(BatchItemResult { index, name, outcome });

        let done = items.len();
        let progress = (done * 100 / total) as u8;
        cp.reach(progress, format!("Processed {}/{} items", done, total)).await?;
    }

    items.sort_by_key(|item| item.index);
    let succeeded = items.iter().filter(|item| item.is_success()).count();
    let failed = items.len() - succeeded;

    if let Some(id) = template_id {
        let rate_sum: f64 = items
            .iter()
            .map(|item| match &item.outcome {
                ItemOutcome::Succeeded(output) => output.report.success_rate(),
                ItemOutcome::Failed { .. } => 0.0,
            })
            .sum();
        record_template_use(ctx, &id, rate_sum / total as f64);
    }

    Ok(JobOutput::Batch(BatchOutput {
        items,
        succeeded,
        failed,
    }))
}

/// One batch item, tagged with its position and name. A panic fails only
/// this item.
#[allow(clippy::too_many_arguments)]
async fn process_item(
    ctx: &PipelineContext,
    engine: &TransformEngine,
    index: usize,
    source: SourceInput,
    format: OutputFormat,
    options: &EncodeOptions,
    threshold: Option<usize>,
    token: &CancellationToken,
) -> (usize, String, StageResult<TransformOutput>) {
    let name = source.name();
    let result = AssertUnwindSafe(transform_source(ctx, engine, &source, format, options, threshold, token))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(&*panic)).into()));
    (index, name, result)
}

/// Parse, transform and encode one batch item.
async fn transform_source(
    ctx: &PipelineContext,
    engine: &TransformEngine,
    source: &SourceInput,
    format: OutputFormat,
    options: &EncodeOptions,
    threshold: Option<usize>,
    token: &CancellationToken,
) -> StageResult<TransformOutput> {
    if token.is_cancelled() {
        return Err(StageError::Cancelled);
    }
    let parsed = ctx.parser.parse(source)?;
    let (records, mut report) =
        transform_rows(engine, parsed.rows(), threshold, ctx.settings.row_batch_size, token).await?;
    let artifact = encode(&records, &engine.target_fields(), format, options)?;
    report.artifact = Some(artifact.info());
    Ok(TransformOutput { report, artifact })
}

/// Transform rows in batches of `batch_size`, yielding between batches.
async fn transform_rows<'r, I>(
    engine: &TransformEngine,
    rows: I,
    threshold: Option<usize>,
    batch_size: usize,
    token: &CancellationToken,
) -> StageResult<(Vec<Row>, TransformReport)>
where
    I: Iterator<Item = &'r Row>,
{
    let batch_size = batch_size.max(1);
    let mut report = TransformReport::default();
    let mut records = Vec::new();

    for (n, transformed) in engine.apply(rows).enumerate() {
        report.record(&transformed);
        report.check_threshold(threshold)?;
        records.push(transformed.record);

        if (n + 1) % batch_size == 0 {
            tokio::task::yield_now().await;
            if token.is_cancelled() {
                return Err(StageError::Cancelled);
            }
        }
    }

    Ok((records, report))
}

fn resolve_rules(ctx: &PipelineContext, source: RuleSource) -> StageResult<(TransformEngine, Option<String>)> {
    let (rules, template_id) = match source {
        RuleSource::Inline { rules } => (rules, None),
        RuleSource::Mapping { mapping, reference } => (lower(&mapping, &reference), None),
        RuleSource::Template { id } => {
            let template = ctx.templates.get(&id)?;
            (template.rules, Some(id))
        }
    };
    let engine = TransformEngine::new(rules, &ctx.functions)?;
    Ok((engine, template_id))
}

/// Template statistics are advisory; a store failure only logs.
fn record_template_use(ctx: &PipelineContext, id: &str, success: f64) {
    if let Err(e) = ctx.templates.record_use(id, success) {
        tracing::warn!(template = id, error = %e, "could not update template statistics");
    }
}
