use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
#[cfg(feature = "otel")]
use tracing_subscriber::layer::SubscriberExt;
#[cfg(feature = "otel")]
use tracing_subscriber::util::SubscriberInitExt;

use blurflow::invoker::{build_invoker, InvokerConfig, TaskInvoker};
use blurflow::prelude::*;
use blurflow::workflow::duration::{format_duration, parse_duration};
use blurflow::workflow::LoadError;
use blurflow::RunSummary;

#[derive(Parser)]
#[command(name = "blurflow")]
#[command(about = "Run face-blur job-polling workflows", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to runner.yaml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Settings shared by every command that starts executions
#[derive(clap::Args, Debug, Clone, Default)]
struct RunOptions {
    /// Workflow definition file (default: config `definition`, else the built-in pipeline)
    #[arg(short, long)]
    definition: Option<PathBuf>,

    /// Worker program to invoke tasks through (overrides config `invoker`)
    #[arg(short, long)]
    worker: Option<String>,

    /// Overall execution timeout, e.g. "15m"
    #[arg(long)]
    timeout: Option<String>,

    /// Wait between job status checks, e.g. "1s"
    #[arg(long)]
    poll_wait: Option<String>,

    /// Task invoked with the artifact before the execution starts
    #[arg(long)]
    start_task: Option<String>,

    /// Maximum number of parallel executions (overrides config)
    #[arg(short, long)]
    parallel: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one execution for an artifact key
    Run {
        /// Artifact key, e.g. "recordings/meeting.mp4"
        #[arg(value_name = "KEY")]
        key: String,

        /// Bucket or directory holding the artifact
        #[arg(long, default_value = "local")]
        location: String,

        /// Artifact size in bytes
        #[arg(long, default_value_t = 0)]
        size: u64,

        /// Print the execution report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Run one execution per file
    Dispatch {
        /// Artifact files
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        #[command(flatten)]
        options: RunOptions,
    },

    /// Validate definition files without running them
    Validate {
        /// Path to definition file or directory
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Print the states and transitions of a definition
    Describe {
        /// Definition file (default: the built-in pipeline)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Start an execution for every file created in a directory
    #[cfg(feature = "file-triggers")]
    Watch {
        /// Directory to watch
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        #[command(flatten)]
        options: RunOptions,
    },
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) -> anyhow::Result<()> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let filter = if verbose { "blurflow=debug" } else { "blurflow=info" };

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
        .context("Failed to create OTLP exporter")?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("blurflow");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
    Ok(())
}

#[cfg(not(feature = "otel"))]
fn init_tracing(verbose: bool) {
    let filter = if verbose { "blurflow=debug" } else { "blurflow=info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    if let Err(e) = init_otel_tracing(cli.verbose) {
        eprintln!("{:#}", e);
        return ExitCode::from(2);
    }

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "blurflow failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            key,
            location,
            size,
            json,
            options,
        } => run_single(config, options, ArtifactEvent::new(location, key, size), json).await,
        Commands::Dispatch { files, options } => dispatch(config, options, files).await,
        Commands::Validate { path } => validate(path),
        Commands::Describe { file } => describe(file.or(config.definition)),
        #[cfg(feature = "file-triggers")]
        Commands::Watch { dir, options } => watch(config, options, dir).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RunnerConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Ok(RunnerConfig::load(path)?)
        }
        None => Ok(RunnerConfig::default()),
    }
}

fn load_definition(path: Option<&Path>) -> Result<WorkflowDefinition, LoadError> {
    match path {
        Some(path) => DefinitionLoader::load_file(path),
        None => face_blur_pipeline().map_err(|error| LoadError::Validation {
            file: "<built-in>".to_string(),
            error,
        }),
    }
}

/// Apply command-line overrides and build a runner
fn build_runner(
    mut config: RunnerConfig,
    options: RunOptions,
) -> anyhow::Result<ExecutionRunner> {
    if let Some(timeout) = &options.timeout {
        config.engine.timeout = parse_duration(timeout)?;
    }
    if let Some(poll_wait) = &options.poll_wait {
        config.engine.poll_wait = parse_duration(poll_wait)?;
    }
    if let Some(task) = options.start_task {
        config.trigger.start_task = Some(task);
    }
    if let Some(parallel) = options.parallel {
        config.parallel = parallel;
    }
    if let Some(program) = options.worker {
        config.invoker = Some(InvokerConfig::Process {
            program,
            args: vec![],
            env: Default::default(),
            working_dir: None,
        });
    }

    let definition = load_definition(options.definition.as_deref().or(config.definition.as_deref()))?;

    let invoker: Arc<dyn TaskInvoker> = match &config.invoker {
        Some(invoker) => build_invoker(invoker).context("Failed to start invoker")?,
        None => anyhow::bail!("No invoker configured: set `invoker` in runner.yaml or pass --worker"),
    };

    tracing::info!(
        "Workflow '{}' (timeout {}, poll wait {})",
        definition.name(),
        format_duration(config.engine.timeout),
        format_duration(config.engine.poll_wait)
    );

    let engine = ExecutionEngine::new(Arc::new(definition), invoker)
        .with_config(config.engine.clone());
    Ok(ExecutionRunner::with_config(engine, &config))
}

async fn run_single(
    config: RunnerConfig,
    options: RunOptions,
    event: ArtifactEvent,
    json: bool,
) -> anyhow::Result<bool> {
    let runner = build_runner(config, options)?;
    let report = runner.trigger(event).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(report.succeeded())
}

#[tracing::instrument(skip_all, fields(files = files.len()))]
async fn dispatch(
    config: RunnerConfig,
    options: RunOptions,
    files: Vec<PathBuf>,
) -> anyhow::Result<bool> {
    let mut events = Vec::with_capacity(files.len());
    for file in &files {
        let event = ArtifactEvent::from_path(file)
            .with_context(|| format!("Cannot read artifact {}", file.display()))?;
        events.push(event);
    }

    let runner = build_runner(config, options)?;
    let results = runner.run_all(events).await;

    let mut summary = RunSummary::default();
    for (file, result) in files.iter().zip(&results) {
        summary.record(result);
        match result {
            Ok(report) => println!("{} {}: {}", status_mark(report), file.display(), report.status),
            Err(e) => println!("- {}: {}", file.display(), e),
        }
    }

    print_summary(&summary);
    Ok(summary.success())
}

#[cfg(feature = "file-triggers")]
async fn watch(config: RunnerConfig, options: RunOptions, dir: PathBuf) -> anyhow::Result<bool> {
    if !dir.is_dir() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let runner = build_runner(config, options)?;
    let (tx, rx) = async_channel::unbounded();
    let watcher = blurflow::trigger::watch_directory(&dir, tx)?;

    println!("Watching {} (Ctrl+C to stop)", dir.display());
    let serving = tokio::spawn(async move { runner.serve(rx).await });

    tokio::signal::ctrl_c().await?;
    // Closing the watcher closes the queue; in-flight executions finish
    drop(watcher);

    let summary = serving.await?;
    print_summary(&summary);
    Ok(summary.success())
}

fn validate(path: PathBuf) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    if path.is_dir() {
        let definitions = DefinitionLoader::load_directory(&path)?;
        if definitions.is_empty() {
            println!("No definitions found in: {}", path.display());
            return Ok(true);
        }
        for definition in &definitions {
            println!("✓ {} ({} states)", definition.name(), definition.states().len());
        }
        println!("✓ {} definitions validated", definitions.len());
    } else {
        let definition = DefinitionLoader::load_file(&path)?;
        println!("✓ {} is valid ({})", path.display(), definition.name());
    }

    Ok(true)
}

fn describe(file: Option<PathBuf>) -> anyhow::Result<bool> {
    let definition = load_definition(file.as_deref())?;

    println!("Workflow: {}", definition.name());
    println!("Start at: {}\n", definition.start_at());

    for (name, state) in definition.states() {
        let marker = if name == definition.start_at() { "*" } else { " " };
        println!("{} {} [{}]", marker, name, state.kind());
        match state {
            State::Task(task) => {
                let output = task
                    .output_path
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "(discarded)".to_string());
                println!("    task {}: {} -> {}", task.task, task.input_path, output);
            }
            State::Wait(wait) => match wait.duration {
                Some(duration) => println!("    wait {}", format_duration(duration)),
                None => println!("    wait poll_wait"),
            },
            State::Choice(choice) => {
                for rule in &choice.rules {
                    println!("    when {} -> {}", describe_condition(&rule.condition), rule.next);
                }
                if let Some(default) = &choice.default {
                    println!("    otherwise -> {}", default);
                }
                continue;
            }
            State::Fail(fail) => println!("    {} ({})", fail.cause, fail.error),
            State::Succeed => {}
        }
        for target in state.targets() {
            println!("    -> {}", target);
        }
    }

    Ok(true)
}

fn describe_condition(condition: &Condition) -> String {
    use blurflow::workflow::Comparison;

    match &condition.comparison {
        Comparison::Equals(value) => format!("{} == {}", condition.variable, value),
        Comparison::NotEquals(value) => format!("{} != {}", condition.variable, value),
        Comparison::IsPresent(true) => format!("{} is present", condition.variable),
        Comparison::IsPresent(false) => format!("{} is absent", condition.variable),
    }
}

fn status_mark(report: &ExecutionReport) -> &'static str {
    if report.succeeded() {
        "✓"
    } else {
        "✗"
    }
}

fn print_report(report: &ExecutionReport) {
    println!("\n=== Execution Result ===\n");
    println!("{} Status: {}", status_mark(report), report.status);
    println!("Execution ID: {}", report.id);
    println!("Workflow: {}", report.workflow);
    println!("Final state: {}", report.final_state);
    println!("States visited: {}", report.visited_count);

    match &report.outcome {
        ExecutionOutcome::Succeeded { .. } => {}
        ExecutionOutcome::Failed { error, cause } => {
            println!("Cause: {}", cause);
            println!("Error: {}", error);
        }
        ExecutionOutcome::TimedOut { elapsed } => {
            println!("Elapsed: {}", format_duration(*elapsed));
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Summary ===\n");
    println!("Succeeded: {}", summary.succeeded);
    println!("Failed: {}", summary.failed);
    println!("Timed out: {}", summary.timed_out);
    println!("Rejected: {}", summary.rejected);
}
