//! Analysis agents.
//!
//! Every agent implements [`Agent`]: a pure precondition check plus one
//! async `process` call that either returns a complete output or fails.
//! Agents never retry and never catch their own failures; the pipeline
//! decides what a failure means for the request.

pub mod perception;
pub mod prompts;
pub mod refiners;

use crate::error::AgentError;
use crate::models::{AgentInput, AgentKind, AgentOutput};
use async_trait::async_trait;
use std::sync::Arc;

pub use perception::{GeneralUnderstandingAgent, RelationAgent, TextExtractionAgent};
pub use refiners::{RefinerAgent, RetrieverAgent};

/// Capability shared by every analysis unit.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Which agent this is.
    fn kind(&self) -> AgentKind;

    /// Side-effect-free check of the fields this agent needs.
    fn validate(&self, input: &AgentInput) -> bool;

    /// Produce one output for one input.
    ///
    /// Fails with [`AgentError::InvalidInput`] when `validate` is false and
    /// with [`AgentError::Inference`] when the model call fails.
    async fn process(&self, input: &AgentInput) -> Result<AgentOutput, AgentError>;
}

/// Shared, thread-safe agent instance.
pub type SharedAgent = Arc<dyn Agent>;

/// Precondition shared by refiners and the retriever.
pub(crate) fn has_full_context(input: &AgentInput) -> bool {
    input.has_image() && input.question_text().is_some() && !input.previous_responses.is_empty()
}

/// Fail with `InvalidInput` unless `agent.validate(input)` holds.
pub(crate) fn ensure_valid<A: Agent + ?Sized>(
    agent: &A,
    input: &AgentInput,
    reason: &'static str,
) -> Result<(), AgentError> {
    if agent.validate(input) {
        Ok(())
    } else {
        Err(AgentError::InvalidInput {
            agent: agent.kind(),
            reason,
        })
    }
}
