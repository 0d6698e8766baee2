//! Tier-2 refiners and the tier-3 retriever.
//!
//! These agents read the image, the question and every upstream output.
//! Their confidence comes from the upstream confidences alone, via the
//! aggregation rule attached to their kind.

use super::{ensure_valid, has_full_context, prompts, Agent};
use crate::analysis::{aggregate_for, mean};
use crate::error::AgentError;
use crate::inference::ModelHandle;
use crate::models::{AgentInput, AgentKind, AgentOutput};
use async_trait::async_trait;
use tracing::{debug, error, info};

const MISSING_CONTEXT: &str = "requires an image reference, a question and previous responses";

/// One of the three tier-2 refiners.
pub struct RefinerAgent {
    kind: AgentKind,
    model: ModelHandle,
}

impl RefinerAgent {
    /// Refiner that amplifies the mean upstream confidence.
    pub fn accuracy(model: ModelHandle) -> Self {
        Self::with_kind(AgentKind::AccuracyRefiner, model)
    }

    /// Refiner that rewards agreement between upstream agents.
    pub fn visual(model: ModelHandle) -> Self {
        Self::with_kind(AgentKind::VisualSynthesizer, model)
    }

    /// Refiner that only amplifies when every upstream agent was confident.
    pub fn gap_filler(model: ModelHandle) -> Self {
        Self::with_kind(AgentKind::GapFiller, model)
    }

    fn with_kind(kind: AgentKind, model: ModelHandle) -> Self {
        info!("Refiner {} initialized", kind);
        Self { kind, model }
    }

    fn system_prompt(&self) -> &'static str {
        match self.kind {
            AgentKind::VisualSynthesizer => prompts::VISUAL_SYNTHESIZER_SYSTEM,
            AgentKind::GapFiller => prompts::GAP_FILLER_SYSTEM,
            _ => prompts::ACCURACY_REFINER_SYSTEM,
        }
    }

    fn closing(&self) -> &'static str {
        match self.kind {
            AgentKind::VisualSynthesizer => {
                "Please analyze the image and these outputs, focusing on visual details, then provide a refined answer to the question:"
            }
            AgentKind::GapFiller => {
                "Please analyze the image and these outputs, focusing on contextual understanding, then provide a refined answer to the question:"
            }
            _ => "Please analyze the image and these outputs, then provide a refined answer to the question:",
        }
    }
}

#[async_trait]
impl Agent for RefinerAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    fn validate(&self, input: &AgentInput) -> bool {
        has_full_context(input)
    }

    async fn process(&self, input: &AgentInput) -> Result<AgentOutput, AgentError> {
        ensure_valid(self, input, MISSING_CONTEXT)?;
        synthesize(
            self.kind,
            &self.model,
            input,
            self.system_prompt(),
            self.closing(),
        )
        .await
    }
}

/// Final tier: merges the refiner outputs into the answer returned to the caller.
pub struct RetrieverAgent {
    model: ModelHandle,
}

impl RetrieverAgent {
    pub fn new(model: ModelHandle) -> Self {
        info!("Retriever agent initialized");
        Self { model }
    }
}

#[async_trait]
impl Agent for RetrieverAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Retriever
    }

    fn validate(&self, input: &AgentInput) -> bool {
        has_full_context(input)
    }

    async fn process(&self, input: &AgentInput) -> Result<AgentOutput, AgentError> {
        ensure_valid(self, input, MISSING_CONTEXT)?;
        synthesize(
            AgentKind::Retriever,
            &self.model,
            input,
            prompts::RETRIEVER_SYSTEM,
            "Please analyze the image and all previous outputs to provide the best possible final answer to the question:",
        )
        .await
    }
}

/// Shared body of every downstream agent: one model call, then aggregation.
async fn synthesize(
    kind: AgentKind,
    model: &ModelHandle,
    input: &AgentInput,
    system: &str,
    closing: &str,
) -> Result<AgentOutput, AgentError> {
    let question = input.question_text().unwrap_or_default();
    let query = prompts::render_upstream(question, &input.previous_responses, closing);

    debug!(
        "{} combining {} upstream outputs",
        kind,
        input.previous_responses.len()
    );
    let text = model
        .run_inference(&input.image, &query, Some(system))
        .await
        .map_err(|source| {
            error!("{} failed: {}", kind.stage(), source);
            AgentError::Inference { agent: kind, source }
        })?;

    let upstream: Vec<f64> = input
        .previous_responses
        .iter()
        .map(|resp| resp.confidence)
        .collect();
    let base_confidence = mean(&upstream);
    let confidence = aggregate_for(kind, &upstream).unwrap_or(base_confidence);
    info!("{} produced output (confidence: {:.2})", kind, confidence);

    Ok(AgentOutput::new(kind, text, confidence)
        .with_meta("model", model.model_name())
        .with_meta("base_confidence", base_confidence)
        .with_meta("question", question))
}
