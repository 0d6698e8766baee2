//! Tier-1 agents: text extraction, relation analysis, general understanding.
//!
//! Each one makes a single model call against the original image and
//! assigns the binary confidence from its result text.

use super::{ensure_valid, prompts, Agent};
use crate::analysis::result_confidence;
use crate::error::AgentError;
use crate::inference::ModelHandle;
use crate::models::{AgentInput, AgentKind, AgentOutput};
use async_trait::async_trait;
use tracing::{debug, error, info};

/// Extracts the text visible in the image.
pub struct TextExtractionAgent {
    model: ModelHandle,
}

impl TextExtractionAgent {
    pub fn new(model: ModelHandle) -> Self {
        info!("Text extraction agent initialized");
        Self { model }
    }
}

#[async_trait]
impl Agent for TextExtractionAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::TextExtraction
    }

    fn validate(&self, input: &AgentInput) -> bool {
        input.has_image()
    }

    async fn process(&self, input: &AgentInput) -> Result<AgentOutput, AgentError> {
        ensure_valid(self, input, "requires an image reference")?;

        let system = prompts::ocr_system(input.question_text());
        debug!("Running text extraction on {}", input.image);
        let text = self
            .model
            .run_inference(&input.image, prompts::OCR_QUERY, Some(&system))
            .await
            .map_err(|source| {
                error!("Error extracting text: {}", source);
                AgentError::Inference {
                    agent: self.kind(),
                    source,
                }
            })?;
        info!("Extracted text from image");

        let confidence = result_confidence(&text);
        Ok(AgentOutput::new(self.kind(), text, confidence)
            .with_meta("model", self.model.model_name()))
    }
}

/// Describes spatial and functional relations between things in the image.
pub struct RelationAgent {
    model: ModelHandle,
}

impl RelationAgent {
    pub fn new(model: ModelHandle) -> Self {
        info!("Relation agent initialized");
        Self { model }
    }
}

#[async_trait]
impl Agent for RelationAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Relation
    }

    fn validate(&self, input: &AgentInput) -> bool {
        input.has_image()
    }

    async fn process(&self, input: &AgentInput) -> Result<AgentOutput, AgentError> {
        ensure_valid(self, input, "requires an image reference")?;

        let system = prompts::relation_system(input.question_text());
        let analysis = self
            .model
            .run_inference(&input.image, prompts::RELATION_QUERY, Some(&system))
            .await
            .map_err(|source| {
                error!("Error analyzing relationships: {}", source);
                AgentError::Inference {
                    agent: self.kind(),
                    source,
                }
            })?;
        info!("Analyzed relationships in image");

        let confidence = result_confidence(&analysis);
        Ok(AgentOutput::new(self.kind(), analysis, confidence)
            .with_meta("model", self.model.model_name()))
    }
}

/// Answers the question directly, using any OCR output it was handed.
pub struct GeneralUnderstandingAgent {
    model: ModelHandle,
}

impl GeneralUnderstandingAgent {
    pub fn new(model: ModelHandle) -> Self {
        info!("General understanding agent initialized");
        Self { model }
    }

    /// Text of the last previous response produced by the OCR agent.
    fn ocr_text(input: &AgentInput) -> &str {
        input
            .previous_responses
            .iter()
            .rev()
            .find(|resp| resp.produced_by(AgentKind::TextExtraction))
            .map(|resp| resp.result.as_str())
            .unwrap_or("")
    }
}

#[async_trait]
impl Agent for GeneralUnderstandingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::GeneralUnderstanding
    }

    fn validate(&self, input: &AgentInput) -> bool {
        input.has_image() && input.question_text().is_some()
    }

    async fn process(&self, input: &AgentInput) -> Result<AgentOutput, AgentError> {
        ensure_valid(self, input, "requires an image reference and a question")?;

        let ocr_text = Self::ocr_text(input);
        let system = prompts::general_system(ocr_text);
        let question = input.question_text().unwrap_or_default();

        let answer = self
            .model
            .run_inference(&input.image, question, Some(&system))
            .await
            .map_err(|source| {
                error!("Error answering visual question: {}", source);
                AgentError::Inference {
                    agent: self.kind(),
                    source,
                }
            })?;

        let confidence = result_confidence(&answer);
        Ok(AgentOutput::new(self.kind(), answer, confidence)
            .with_meta("model", self.model.model_name())
            .with_meta("ocr_text", ocr_text))
    }
}
