//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Pipeline knobs left unset here fall back to the
//! configuration file.

use crate::config::{CollaborationMode, FailurePolicy};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// VistaQA - multi-agent visual question answering on a local vision model
///
/// Seven agents in three tiers look at an image, refine each other's
/// answers and return one final answer with a confidence score.
///
/// Examples:
///   vistaqa ask photo.jpg "What does the sign say?"
///   vistaqa ask chart.png --format json --collaboration escalate
///   vistaqa bench --dataset mm-vet.json --images ./images --output results/answers.json
///   vistaqa --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Ollama vision model to use
    ///
    /// Can also be set via VISTAQA_MODEL env var or .vistaqa.toml config.
    #[arg(short, long, global = true, env = "VISTAQA_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, global = true, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .vistaqa.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Temperature for model responses (0.0 - 1.0)
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// Model request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip the model availability check at startup
    #[arg(long, global = true)]
    pub no_warm_up: bool,

    /// How tier-1 agents consult each other
    #[arg(long, global = true, value_name = "MODE")]
    pub collaboration: Option<CollaborationMode>,

    /// Upper bound on a single agent call, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub agent_timeout: Option<u64>,

    /// What to do when an agent fails
    #[arg(long, global = true, value_name = "POLICY")]
    pub failure_policy: Option<FailurePolicy>,

    /// Run the agents of each tier one after another
    #[arg(long, global = true)]
    pub sequential: bool,

    /// Output format for answers (text, json)
    #[arg(long, global = true, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Generate a default .vistaqa.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Answer one question about one image
    Ask {
        /// Image to analyze
        image: PathBuf,

        /// Question about the image (defaults to a general description)
        question: Option<String>,
    },

    /// Run a benchmark dataset through the pipeline
    Bench {
        /// Dataset JSON (qid -> {question, answer, capability})
        #[arg(long, value_name = "FILE")]
        dataset: PathBuf,

        /// Directory holding the dataset images
        #[arg(long, value_name = "DIR")]
        images: PathBuf,

        /// Answers file; an existing one is resumed
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Stop after this many new questions
        #[arg(long, value_name = "COUNT")]
        limit: Option<usize>,

        /// Also write the run summary as JSON
        #[arg(long, value_name = "FILE")]
        summary: Option<PathBuf>,
    },
}

/// Output format for answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain text (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        match self.command {
            None => return Err("A command is required (ask or bench)".to_string()),
            Some(Command::Ask { ref image, .. }) => {
                if !image.is_file() {
                    return Err(format!("Image file does not exist: {}", image.display()));
                }
            }
            Some(Command::Bench {
                ref dataset,
                ref images,
                limit,
                ..
            }) => {
                if !dataset.is_file() {
                    return Err(format!("Dataset file does not exist: {}", dataset.display()));
                }
                if !images.is_dir() {
                    return Err(format!(
                        "Image directory does not exist: {}",
                        images.display()
                    ));
                }
                if limit == Some(0) {
                    return Err("Limit must be at least 1".to_string());
                }
            }
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.timeout == Some(0) || self.agent_timeout == Some(0) {
            return Err("Timeouts must be at least 1 second".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
