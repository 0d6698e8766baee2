//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.vistaqa.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".vistaqa.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Collaboration settings.
    #[serde(default)]
    pub collaboration: CollaborationConfig,

    /// Pipeline execution settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// Vision model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name as known to Ollama.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Retries on transient inference failures.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Check the model is available before the first request.
    #[serde(default = "default_true")]
    pub warm_up: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            retries: default_retries(),
            warm_up: true,
        }
    }
}

fn default_model() -> String {
    "llava:13b".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

fn default_retries() -> usize {
    2
}

fn default_true() -> bool {
    true
}

/// How the collaboration manager is used between tier 1 and tier 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CollaborationMode {
    /// Never consult the collaboration manager.
    Off,
    /// Escalate low-confidence results to the complementary agent.
    Escalate,
    /// Cross-validate low-confidence results with the other role.
    #[default]
    CrossValidate,
}

/// Collaboration manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationConfig {
    #[serde(default)]
    pub mode: CollaborationMode,

    /// Results at or above this confidence are left alone.
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,

    /// Declared round bound. Collaboration is single-hop regardless.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
}

impl Default for CollaborationConfig {
    fn default() -> Self {
        Self {
            mode: CollaborationMode::default(),
            confidence_threshold: default_threshold(),
            max_rounds: default_max_rounds(),
        }
    }
}

fn default_threshold() -> f64 {
    0.7
}

fn default_max_rounds() -> u32 {
    3
}

/// What happens when an agent inside a tier fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole request on the first failure.
    #[default]
    Abort,
    /// Continue with the surviving outputs of the tier.
    Degrade,
}

/// Pipeline execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Run the agents of a tier concurrently.
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Per-agent timeout in seconds. Unset means wait forever.
    #[serde(default)]
    pub agent_timeout_seconds: Option<u64>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            agent_timeout_seconds: None,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Reject values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.collaboration.confidence_threshold) {
            anyhow::bail!("collaboration.confidence_threshold must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            anyhow::bail!("model.temperature must be between 0.0 and 1.0");
        }
        if self.pipeline.agent_timeout_seconds == Some(0) {
            anyhow::bail!("pipeline.agent_timeout_seconds must be at least 1");
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if args.no_warm_up {
            self.model.warm_up = false;
        }

        if let Some(mode) = args.collaboration {
            self.collaboration.mode = mode;
        }

        if let Some(secs) = args.agent_timeout {
            self.pipeline.agent_timeout_seconds = Some(secs);
        }
        if let Some(policy) = args.failure_policy {
            self.pipeline.failure_policy = policy;
        }
        if args.sequential {
            self.pipeline.parallel = false;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
