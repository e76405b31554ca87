//! Autoconv CLI - Map and convert tabular files into a reference layout
//!
//! # Main Commands
//!
//! ```bash
//! autoconv analyze input.csv                              # Describe fields and types
//! autoconv recommend input.csv reference.csv              # Recommend a field mapping
//! autoconv transform input.csv --reference ref.csv -f json  # Map, transform, encode
//! autoconv batch a.csv b.csv --template ID --out-dir out/   # Same rules on many files
//! autoconv template list                                  # Manage saved templates
//! autoconv template find input.csv                        # Templates fitting a file
//! ```
//!
//! Every command runs as a job; progress events are printed to stderr.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use autoconv::jobs::{
    AnalysisRequest, BatchRequest, ItemOutcome, MappingRequest, Reference, RuleSource, TransformRequest,
};
use autoconv::transform::rules_from_json;
use autoconv::{
    init_tracing, AiClient, DelimitedParser, EncodeOptions, FileStore, JobExecutor, JobOutput, JobPayload,
    JobStatus, LogLevel, OutputFormat, PipelineContext, Settings, SourceInput, StructureDescriptor, TemplateRegistry,
};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tokio::task::JoinHandle;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "autoconv")]
#[command(about = "Map, transform and re-encode tabular files into a reference layout", long_about = None)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Input delimiter (auto-detect if not specified)
    #[arg(short, long, global = true)]
    delimiter: Option<char>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe a file: fields, inferred types, samples
    Analyze {
        /// Input file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Recommend a mapping from an input file onto a reference file
    Recommend {
        /// Input file
        input: PathBuf,

        /// Reference file (its header and sample rows define the target)
        reference: PathBuf,

        /// Rule-based matching only
        #[arg(long)]
        no_ai: bool,

        /// Save the mapping as a template with this name
        #[arg(long)]
        save: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Transform a file and encode the result
    Transform {
        /// Input file
        input: PathBuf,

        #[command(flatten)]
        rules: RulesArgs,

        /// With --reference: rule-based matching only
        #[arg(long)]
        no_ai: bool,

        /// Output format: csv, tsv, pipe, json, xlsx, fixed
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Fail when error findings exceed this count
        #[arg(long)]
        threshold: Option<usize>,

        /// Omit the header row
        #[arg(long)]
        no_header: bool,
    },

    /// Transform several files with the same rules
    Batch {
        /// Input files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        rules: RulesArgs,

        /// With --reference: rule-based matching only
        #[arg(long)]
        no_ai: bool,

        /// Output format: csv, tsv, pipe, json, xlsx, fixed
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Directory for the converted files
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Per-file limit on error findings
        #[arg(long)]
        threshold: Option<usize>,
    },

    /// Manage mapping templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

/// Where the transformation rules come from.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct RulesArgs {
    /// JSON file with transformation rules
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Saved template ID
    #[arg(long)]
    template: Option<String>,

    /// Reference file; rules come from a recommended mapping
    #[arg(long)]
    reference: Option<PathBuf>,
}

#[derive(Subcommand)]
enum TemplateAction {
    /// List all stored templates
    List,

    /// Show details of a template
    Show {
        /// Template ID
        id: String,
    },

    /// Delete a template
    Delete {
        /// Template ID
        id: String,
    },

    /// List templates whose columns match a file
    Find {
        /// Input file
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let settings = Settings::from_env()?;

    let command = match cli.command {
        Commands::Template { action } if !matches!(action, TemplateAction::Find { .. }) => {
            return cmd_template(&settings, action)
        }
        command => command,
    };

    let executor = build_executor(&settings, cli.delimiter);
    let printer = print_events(&executor);

    let result = match command {
        Commands::Analyze { input, output } => cmd_analyze(&executor, &input, output.as_deref()).await,
        Commands::Recommend {
            input,
            reference,
            no_ai,
            save,
            output,
        } => cmd_recommend(&executor, &input, &reference, !no_ai, save, output.as_deref()).await,
        Commands::Transform {
            input,
            rules,
            no_ai,
            format,
            output,
            threshold,
            no_header,
        } => {
            let mut options = EncodeOptions::default();
            if no_header {
                options = options.without_header();
            }
            cmd_transform(&executor, &input, rules, !no_ai, &format, options, threshold, output.as_deref()).await
        }
        Commands::Batch {
            inputs,
            rules,
            no_ai,
            format,
            out_dir,
            threshold,
        } => cmd_batch(&executor, &inputs, rules, !no_ai, &format, threshold, &out_dir).await,
        Commands::Template {
            action: TemplateAction::Find { input },
        } => cmd_find_templates(&executor, &input).await,
        Commands::Template { .. } => Ok(()),
    };

    // Closing the channel lets the printer drain and stop
    drop(executor);
    let _ = printer.await;
    result
}

fn build_executor(settings: &Settings, delimiter: Option<char>) -> JobExecutor {
    let mut parser = DelimitedParser::new().with_sample_size(settings.sample_size);
    if let Some(d) = delimiter {
        parser = parser.with_delimiter(d);
    }

    let context = PipelineContext::new(settings.clone())
        .with_parser(Arc::new(parser))
        .with_recommender(Arc::new(AiClient::from_settings(settings)));
    JobExecutor::new(context)
}

fn print_events(executor: &JobExecutor) -> JoinHandle<()> {
    let mut events = executor.subscribe();
    tokio::spawn(async move {
        while let Some(item) = events.next().await {
            let Ok(event) = item else { continue };
            let icon = match event.level {
                LogLevel::Info => "  ",
                LogLevel::Success => "✅",
                LogLevel::Warning => "⚠️ ",
                LogLevel::Error => "❌",
            };
            eprintln!("{} [{:>3}%] {}", icon, event.progress, event.message);
        }
    })
}

/// Submit, run and return the output of a job.
async fn run_job(executor: &JobExecutor, payload: JobPayload) -> CliResult<JobOutput> {
    let job = executor.execute(payload.kind(), payload).await?;
    match job.status {
        JobStatus::Completed => {
            let output = executor.take_output(job.id).await?;
            executor.remove(job.id).await?;
            output.ok_or_else(|| format!("job {} completed without output", job.id).into())
        }
        JobStatus::Failed => Err(job
            .error_message
            .unwrap_or_else(|| format!("job {} failed", job.id))
            .into()),
        status => Err(format!("job {} ended as {}", job.id, status).into()),
    }
}

async fn describe(executor: &JobExecutor, path: &Path) -> CliResult<StructureDescriptor> {
    let payload = JobPayload::Analysis(AnalysisRequest {
        source: SourceInput::path(path),
    });
    match run_job(executor, payload).await? {
        JobOutput::Analysis(structure) => Ok(structure),
        _ => Err("unexpected output for an analysis job".into()),
    }
}

async fn cmd_analyze(executor: &JobExecutor, input: &Path, output: Option<&Path>) -> CliResult<()> {
    eprintln!("📄 Analyzing: {}", input.display());
    let structure = describe(executor, input).await?;

    for field in structure.fields() {
        eprintln!(
            "   {:<24} {:<8} {:>5.1}% empty",
            field.name,
            field.inferred_type,
            field.null_rate * 100.0
        );
    }

    let json = serde_json::to_string_pretty(&structure)?;
    write_output(json.as_bytes(), output)
}

async fn cmd_recommend(
    executor: &JobExecutor,
    input: &Path,
    reference: &Path,
    use_recommender: bool,
    save_as: Option<String>,
    output: Option<&Path>,
) -> CliResult<()> {
    eprintln!("🔗 Mapping {} onto {}", input.display(), reference.display());

    let payload = JobPayload::Mapping(MappingRequest {
        input: SourceInput::path(input),
        reference: Reference::Source {
            source: SourceInput::path(reference),
        },
        use_recommender,
        save_as,
    });
    let JobOutput::Mapping(mapping) = run_job(executor, payload).await? else {
        return Err("unexpected output for a mapping job".into());
    };

    let set = &mapping.recommendation.mapping;
    for candidate in set.candidates() {
        eprintln!(
            "   {} → {} ({}%, {:?})",
            candidate.source_field, candidate.target_field, candidate.confidence, candidate.transformation_kind
        );
    }
    if !set.unmatched_source().is_empty() {
        let unmatched: Vec<&str> = set.unmatched_source().iter().map(String::as_str).collect();
        eprintln!("   Unmatched input: {}", unmatched.join(", "));
    }
    if !set.unmatched_target().is_empty() {
        let unmatched: Vec<&str> = set.unmatched_target().iter().map(String::as_str).collect();
        eprintln!("   Unmatched reference: {}", unmatched.join(", "));
    }
    if let Some(id) = &mapping.template_id {
        eprintln!("💾 Template saved with ID: {}", id);
    }

    let json = serde_json::to_string_pretty(&mapping.recommendation)?;
    write_output(json.as_bytes(), output)
}

/// Turn the rule arguments into a rule source, running the analysis and
/// mapping jobs a reference file needs.
async fn resolve_rules(
    executor: &JobExecutor,
    args: RulesArgs,
    use_recommender: bool,
    sample: &Path,
) -> CliResult<RuleSource> {
    if let Some(path) = args.rules {
        let rules = rules_from_json(&fs::read_to_string(&path)?)?;
        return Ok(RuleSource::Inline { rules });
    }
    if let Some(id) = args.template {
        return Ok(RuleSource::Template { id });
    }
    let Some(reference_path) = args.reference else {
        return Err("one of --rules, --template or --reference is required".into());
    };

    let reference = describe(executor, &reference_path).await?;
    let payload = JobPayload::Mapping(MappingRequest {
        input: SourceInput::path(sample),
        reference: Reference::Structure {
            structure: reference.clone(),
        },
        use_recommender,
        save_as: None,
    });
    let JobOutput::Mapping(mapping) = run_job(executor, payload).await? else {
        return Err("unexpected output for a mapping job".into());
    };

    Ok(RuleSource::Mapping {
        mapping: mapping.recommendation.mapping,
        reference,
    })
}

#[allow(clippy::too_many_arguments)]
async fn cmd_transform(
    executor: &JobExecutor,
    input: &Path,
    rules: RulesArgs,
    use_recommender: bool,
    format: &str,
    options: EncodeOptions,
    threshold: Option<usize>,
    output: Option<&Path>,
) -> CliResult<()> {
    let format: OutputFormat = format.parse()?;
    eprintln!("⚙️  Transforming {} to {}", input.display(), format);

    let rules = resolve_rules(executor, rules, use_recommender, input).await?;
    let payload = JobPayload::Transform(TransformRequest {
        source: SourceInput::path(input),
        rules,
        format,
        options,
        error_threshold: threshold,
    });
    let JobOutput::Transform(result) = run_job(executor, payload).await? else {
        return Err("unexpected output for a transform job".into());
    };

    let report = &result.report;
    eprintln!(
        "   Rows: {} processed, {} clean, {} errors, {} warnings",
        report.rows_processed, report.rows_transformed, report.error_count, report.warning_count
    );
    for finding in report.findings.iter().take(10) {
        eprintln!(
            "   - row {} {}: {} ({:?})",
            finding.row_index, finding.field, finding.message, finding.severity
        );
    }
    if report.findings.len() > 10 {
        eprintln!("   ... and {} more", report.findings.len() - 10);
    }

    write_output(&result.artifact.bytes, output)
}

async fn cmd_batch(
    executor: &JobExecutor,
    inputs: &[PathBuf],
    rules: RulesArgs,
    use_recommender: bool,
    format: &str,
    threshold: Option<usize>,
    out_dir: &Path,
) -> CliResult<()> {
    let format: OutputFormat = format.parse()?;
    eprintln!("📦 Batch of {} files to {}", inputs.len(), format);

    let first = inputs.first().ok_or("no input files")?;
    let rules = resolve_rules(executor, rules, use_recommender, first).await?;
    let payload = JobPayload::Batch(BatchRequest {
        items: inputs.iter().map(|p| SourceInput::path(p.as_path())).collect(),
        rules,
        format,
        options: EncodeOptions::default(),
        error_threshold: threshold,
    });
    let JobOutput::Batch(batch) = run_job(executor, payload).await? else {
        return Err("unexpected output for a batch job".into());
    };

    fs::create_dir_all(out_dir)?;
    for item in &batch.items {
        match &item.outcome {
            ItemOutcome::Succeeded(result) => {
                let stem = Path::new(&item.name)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("output");
                let path = out_dir.join(format!("{}.{}", stem, result.artifact.format.extension()));
                fs::write(&path, &result.artifact.bytes)?;
                eprintln!(
                    "   ✅ {} → {} ({} rows, {} errors)",
                    item.name,
                    path.display(),
                    result.report.rows_processed,
                    result.report.error_count
                );
            }
            ItemOutcome::Failed { message } => eprintln!("   ❌ {}: {}", item.name, message),
        }
    }

    eprintln!("\n📊 Results: {} succeeded, {} failed", batch.succeeded, batch.failed);
    Ok(())
}

fn write_output(content: &[u8], path: Option<&Path>) -> CliResult<()> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(content)?;
            if !content.ends_with(b"\n") {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

async fn cmd_find_templates(executor: &JobExecutor, input: &Path) -> CliResult<()> {
    let structure = describe(executor, input).await?;
    let matches = executor.context().templates().find_compatible(&structure.field_names())?;

    if matches.is_empty() {
        eprintln!("📋 No stored template matches {}", input.display());
        return Ok(());
    }

    eprintln!("📋 Templates matching {} ({}):\n", input.display(), matches.len());
    for (t, overlap) in matches {
        println!("  📄 {} ({})", t.name, t.id);
        println!("     Column overlap: {:.0}%", overlap * 100.0);
        println!("     Success rate: {:.0}%", t.success_rate * 100.0);
    }
    eprintln!("\n   Use 'autoconv transform {} --template <id>' to apply one.", input.display());
    Ok(())
}

fn cmd_template(settings: &Settings, action: TemplateAction) -> CliResult<()> {
    let registry = TemplateRegistry::new(Arc::new(FileStore::new(&settings.template_dir)));

    match action {
        TemplateAction::List => {
            let templates = registry.list()?;
            if templates.is_empty() {
                eprintln!("📋 No templates stored yet.");
                eprintln!("   Use 'autoconv recommend <input> <reference> --save <name>' to add one.");
                return Ok(());
            }

            eprintln!("📋 Stored templates ({}):\n", templates.len());
            for t in templates {
                println!("  📄 {} ({})", t.name, t.id);
                println!("     Columns: {}", t.source_fields.join(", "));
                println!("     Success rate: {:.0}%", t.success_rate * 100.0);
                println!("     Uses: {}", t.use_count);
                if let Some(last) = t.last_used {
                    println!("     Last used: {}", last.to_rfc3339());
                }
                println!();
            }
        }

        TemplateAction::Show { id } => {
            let t = registry.get(&id)?;
            println!("📄 Template: {} ({})\n", t.name, t.id);
            println!("Columns: {}", t.source_fields.join(", "));
            println!("Created: {}", t.created_at.to_rfc3339());
            println!("Success rate: {:.0}%", t.success_rate * 100.0);
            println!("Uses: {}", t.use_count);
            println!("\nMapping:");
            println!("{}", serde_json::to_string_pretty(&t.mapping)?);
            println!("\nRules:");
            println!("{}", serde_json::to_string_pretty(&t.rules)?);
        }

        TemplateAction::Delete { id } => {
            registry.delete(&id)?;
            eprintln!("🗑️  Template deleted: {}", id);
        }

        // Needs an analysis job; dispatched by `run`
        TemplateAction::Find { .. } => return Err("template find needs the job executor".into()),
    }

    Ok(())
}
