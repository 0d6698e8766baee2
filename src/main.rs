//! VistaQA - tiered multi-agent visual question answering
//!
//! A CLI tool that runs seven cooperating agents over a local Ollama
//! vision model to answer questions about images, one at a time or
//! across a benchmark dataset.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (connection, config, pipeline failure, etc.)

mod agent;
mod analysis;
mod benchmark;
mod cli;
mod collaboration;
mod config;
mod error;
mod inference;
mod models;
mod pipeline;

use anyhow::{Context, Result};
use benchmark::{BenchmarkOptions, BenchmarkSummary};
use cli::{Args, Command, OutputFormat};
use config::{Config, CONFIG_FILE};
use inference::{InferenceBackend, ModelHandle, OllamaBackend, OllamaConfig};
use models::{AgentOutput, ImageRef};
use pipeline::PipelineOrchestrator;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, &config);

    info!("VistaQA v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .vistaqa.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize the model, collaboration and pipeline behavior.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}. Using defaults.", CONFIG_FILE, e);
            Ok(Config::default())
        }
    }
}

/// Connect to the model, run the requested command, then release the model.
async fn run(args: Args, config: Config) -> Result<()> {
    let quiet = args.quiet;
    let model = connect_model(&config, quiet).await?;
    let orchestrator = PipelineOrchestrator::new(model.clone(), &config);
    debug!("Pipeline settings: {:?}", orchestrator.settings());

    let outcome = match args.command {
        Some(Command::Ask { image, question }) => {
            ask(&orchestrator, ImageRef::new(image), question, args.format).await
        }
        Some(Command::Bench {
            dataset,
            images,
            output,
            limit,
            summary,
        }) => {
            let options = BenchmarkOptions {
                dataset,
                image_dir: images,
                output,
                limit,
                show_progress: !quiet,
            };
            bench(&orchestrator, &options, summary.as_deref(), args.format).await
        }
        None => Ok(()),
    };

    drop(orchestrator);
    debug!(
        "Releasing model handle ({} references)",
        Arc::strong_count(&model)
    );
    drop(model);
    outcome
}

/// Create the Ollama backend and, unless disabled, check it can serve the model.
async fn connect_model(config: &Config, quiet: bool) -> Result<ModelHandle> {
    if !quiet {
        println!("🤖 Initializing vision model...");
        println!("   Model: {}", config.model.name);
        println!("   Ollama: {}", config.model.ollama_url);
        println!("   Collaboration: {:?}", config.collaboration.mode);
    }

    let backend = OllamaBackend::connect(OllamaConfig::from(&config.model))
        .context("Failed to initialize Ollama backend")?;

    if config.model.warm_up {
        backend
            .health_check()
            .await
            .context("Vision model is not available")?;
        info!("Model {} is ready", backend.model_name());
    } else {
        warn!("Skipping model availability check");
    }

    Ok(Arc::new(backend))
}

/// Answer a single question and print the result.
async fn ask(
    orchestrator: &PipelineOrchestrator,
    image: ImageRef,
    question: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let start = Instant::now();
    let output = orchestrator.run(image, question).await?;
    print_answer(&output, format)?;
    debug!("Answered in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn print_answer(output: &AgentOutput, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(output)?);
        }
        OutputFormat::Text => {
            println!("\n💬 Answer:\n{}", output.result);
            println!("\n📊 Confidence: {:.2}", output.confidence);
            if output.metadata.get("degraded").and_then(|v| v.as_bool()) == Some(true) {
                println!("   ⚠️  Some agents failed; the answer was built from the rest.");
            }
        }
    }
    Ok(())
}

/// Run a benchmark dataset and print the summary.
async fn bench(
    orchestrator: &PipelineOrchestrator,
    options: &BenchmarkOptions,
    summary_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    if format == OutputFormat::Text {
        println!("\n🔬 Running benchmark: {}", options.dataset.display());
    }

    let summary = benchmark::run_benchmark(options, move |image, question| {
        orchestrator.run(image, Some(question))
    })
    .await?;

    if let Some(path) = summary_path {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Text => print_summary(&summary, options),
    }
    Ok(())
}

fn print_summary(summary: &BenchmarkSummary, options: &BenchmarkOptions) {
    println!("\n📊 Benchmark Summary:");
    println!(
        "   Accuracy: {:.2}% ({}/{})",
        summary.accuracy, summary.correct, summary.answered
    );
    println!(
        "   Failed: {} | Already answered: {}",
        summary.failed, summary.skipped
    );
    for (capability, score) in &summary.by_capability {
        println!(
            "   - {}: {:.2}% ({} questions)",
            capability, score.accuracy, score.count
        );
    }
    println!(
        "\n✅ Benchmark complete! Answers saved to: {}",
        options.output.display()
    );
}
