//! Error taxonomy for the orchestration core.
//!
//! Agents fail with [`AgentError`]; the pipeline wraps those in
//! [`PipelineError`] so the caller can see which tier gave up.

use crate::models::AgentKind;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the inference layer.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("failed to read image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("cannot connect to Ollama at {0}")]
    Connect(String),

    #[error("Ollama API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("unusable model response: {0}")]
    Decode(String),

    #[error("model {0} is not available on the server")]
    ModelMissing(String),

    #[error("failed to send request: {0}")]
    Transport(String),
}

impl InferenceError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Timeout(_)
            | InferenceError::Connect(_)
            | InferenceError::Transport(_) => true,
            InferenceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Failure raised by an agent's `process`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{} failed: invalid input: {reason}", .agent.stage())]
    InvalidInput {
        agent: AgentKind,
        reason: &'static str,
    },

    #[error("{} failed: {source}", .agent.stage())]
    Inference {
        agent: AgentKind,
        #[source]
        source: InferenceError,
    },

    #[error("{} failed: no result within {limit:?}", .agent.stage())]
    Timeout { agent: AgentKind, limit: Duration },
}

impl AgentError {
    pub fn agent(&self) -> AgentKind {
        match self {
            AgentError::InvalidInput { agent, .. }
            | AgentError::Inference { agent, .. }
            | AgentError::Timeout { agent, .. } => *agent,
        }
    }
}

/// Failure of a whole pipeline invocation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("tier {tier} aborted: {source}")]
    Tier {
        tier: u8,
        #[source]
        source: AgentError,
    },
}

impl From<AgentError> for PipelineError {
    fn from(source: AgentError) -> Self {
        PipelineError::Tier {
            tier: source.agent().tier(),
            source,
        }
    }
}
