//! Data models shared by every pipeline stage.
//!
//! This module contains the value types that flow between agents:
//! the image handle, agent inputs and outputs, and the identities of
//! the agents that produce them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Open key-value bag attached to inputs and outputs.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key naming the agent that produced an output.
pub const AGENT_NAME_KEY: &str = "agent_name";

/// Sentinel returned by the text-extraction agent when the image has no text.
pub const NO_TEXT_FOUND: &str = "NO_TEXT_FOUND";
/// Sentinel returned by the general-understanding agent when it cannot answer.
pub const NO_CONTENT_FOUND: &str = "NO_CONTENT_FOUND";
/// Sentinel returned by the relation agent when no relations are visible.
pub const NO_RELATIONS_FOUND: &str = "NO_RELATIONS_FOUND";

/// Question used when the caller does not ask one.
pub const DEFAULT_QUESTION: &str = "Describe this image in detail.";

/// Returns true if `text` is one of the "nothing found" sentinels.
pub fn is_sentinel(text: &str) -> bool {
    matches!(text, NO_TEXT_FOUND | NO_CONTENT_FOUND | NO_RELATIONS_FOUND)
}

/// Opaque handle to the image under analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef(PathBuf);

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// An image reference with an empty path counts as missing.
    pub fn is_empty(&self) -> bool {
        self.0.as_os_str().is_empty()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Identity of every agent in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Tier 1: text extraction (OCR)
    TextExtraction,
    /// Tier 1: relation and interaction analysis
    Relation,
    /// Tier 1: general visual understanding
    GeneralUnderstanding,
    /// Tier 2: accuracy refiner
    AccuracyRefiner,
    /// Tier 2: visual-detail synthesizer
    VisualSynthesizer,
    /// Tier 2: gap filler / contextual enhancer
    GapFiller,
    /// Tier 3: final retriever/synthesizer
    Retriever,
}

impl AgentKind {
    /// Short name used to tag outputs in metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::TextExtraction => "ocr",
            AgentKind::Relation => "relation",
            AgentKind::GeneralUnderstanding => "common",
            AgentKind::AccuracyRefiner => "refiner1",
            AgentKind::VisualSynthesizer => "refiner2",
            AgentKind::GapFiller => "refiner3",
            AgentKind::Retriever => "retriever",
        }
    }

    /// Name of the processing stage, used to prefix failures.
    pub fn stage(&self) -> &'static str {
        match self {
            AgentKind::TextExtraction => "OCR processing",
            AgentKind::Relation => "Relationship analysis",
            AgentKind::GeneralUnderstanding => "Visual question answering",
            AgentKind::AccuracyRefiner
            | AgentKind::VisualSynthesizer
            | AgentKind::GapFiller => "Refinement process",
            AgentKind::Retriever => "Final answer generation",
        }
    }

    /// Pipeline tier (1-3) this agent runs in.
    pub fn tier(&self) -> u8 {
        match self {
            AgentKind::TextExtraction | AgentKind::Relation | AgentKind::GeneralUnderstanding => 1,
            AgentKind::AccuracyRefiner | AgentKind::VisualSynthesizer | AgentKind::GapFiller => 2,
            AgentKind::Retriever => 3,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output of a single agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Text produced by the agent.
    pub result: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Producer tag plus any agent-specific details.
    #[serde(default)]
    pub metadata: Metadata,
}

impl AgentOutput {
    /// Creates an output tagged with its producer. Confidence is clamped into [0, 1].
    pub fn new(kind: AgentKind, result: impl Into<String>, confidence: f64) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(AGENT_NAME_KEY.to_string(), Value::from(kind.as_str()));
        Self {
            result: result.into(),
            confidence: crate::analysis::clamp_unit(confidence),
            metadata,
        }
    }

    /// Adds a metadata entry (builder style).
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Name of the agent that produced this output, if tagged.
    pub fn agent_name(&self) -> Option<&str> {
        self.metadata.get(AGENT_NAME_KEY).and_then(Value::as_str)
    }

    pub fn produced_by(&self, kind: AgentKind) -> bool {
        self.agent_name() == Some(kind.as_str())
    }
}

/// Input handed to an agent. Each tier builds a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    pub image: ImageRef,
    pub question: Option<String>,
    /// Upstream outputs in insertion order; position is meaningful.
    #[serde(default)]
    pub previous_responses: Vec<AgentOutput>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AgentInput {
    pub fn new(image: ImageRef, question: Option<String>) -> Self {
        Self {
            image,
            question,
            previous_responses: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Same image and question, carrying the given upstream outputs forward.
    pub fn with_previous(&self, previous_responses: Vec<AgentOutput>) -> Self {
        Self {
            image: self.image.clone(),
            question: self.question.clone(),
            previous_responses,
            metadata: self.metadata.clone(),
        }
    }

    /// Question text if present and non-blank.
    pub fn question_text(&self) -> Option<&str> {
        self.question.as_deref().filter(|q| !q.trim().is_empty())
    }

    pub fn has_image(&self) -> bool {
        !self.image.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_are_case_sensitive() {
        assert!(is_sentinel("NO_TEXT_FOUND"));
        assert!(is_sentinel("NO_CONTENT_FOUND"));
        assert!(is_sentinel("NO_RELATIONS_FOUND"));
        assert!(!is_sentinel("no_text_found"));
        assert!(!is_sentinel("NO_TEXT_FOUND here"));
    }

    #[test]
    fn test_output_is_tagged_and_clamped() {
        let output = AgentOutput::new(AgentKind::TextExtraction, "hello", 1.4);
        assert_eq!(output.agent_name(), Some("ocr"));
        assert!(output.produced_by(AgentKind::TextExtraction));
        assert_eq!(output.confidence, 1.0);

        let low = AgentOutput::new(AgentKind::Relation, "x", -0.2);
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn test_with_previous_keeps_order() {
        let input = AgentInput::new(ImageRef::new("a.png"), Some("q".to_string()));
        let outputs = vec![
            AgentOutput::new(AgentKind::TextExtraction, "1", 0.9),
            AgentOutput::new(AgentKind::Relation, "2", 0.1),
            AgentOutput::new(AgentKind::GeneralUnderstanding, "3", 0.9),
        ];
        let next = input.with_previous(outputs);
        let names: Vec<_> = next
            .previous_responses
            .iter()
            .map(|o| o.agent_name().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["ocr", "relation", "common"]);
        assert_eq!(next.image, input.image);
        assert!(input.previous_responses.is_empty());
    }

    #[test]
    fn test_question_text_ignores_blank() {
        let mut input = AgentInput::new(ImageRef::new("a.png"), Some("   ".to_string()));
        assert_eq!(input.question_text(), None);
        input.question = Some("What?".to_string());
        assert_eq!(input.question_text(), Some("What?"));
        assert!(input.has_image());
        assert!(ImageRef::default().is_empty());
    }

    #[test]
    fn test_agent_kind_tiers() {
        assert_eq!(AgentKind::Relation.tier(), 1);
        assert_eq!(AgentKind::GapFiller.tier(), 2);
        assert_eq!(AgentKind::Retriever.tier(), 3);
        assert_eq!(AgentKind::VisualSynthesizer.stage(), "Refinement process");
    }
}
