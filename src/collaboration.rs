//! Low-confidence collaboration between complementary agents.
//!
//! Two roles take part: the text extractor and the general-understanding
//! agent. When one of them returns a weak result, the manager asks the
//! other for a second opinion and keeps whichever result is stronger.
//! Every call is single-hop: the manager never re-enters itself, so the
//! threshold is not guaranteed to be met afterwards.

use crate::agent::{prompts, SharedAgent};
use crate::config::CollaborationConfig;
use crate::error::AgentError;
use crate::models::{AgentInput, AgentKind, AgentOutput};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// OCR confidence needed before the general agent is asked to retry.
const ESCALATION_MIN_CONFIDENCE: f64 = 0.5;

/// The two complementary roles the manager knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollaborationRole {
    TextExtractor,
    GeneralUnderstanding,
}

impl CollaborationRole {
    /// Role of an agent kind, if it takes part in collaboration.
    pub fn for_kind(kind: AgentKind) -> Option<Self> {
        match kind {
            AgentKind::TextExtraction => Some(CollaborationRole::TextExtractor),
            AgentKind::GeneralUnderstanding => Some(CollaborationRole::GeneralUnderstanding),
            _ => None,
        }
    }

    pub fn counterpart(self) -> Self {
        match self {
            CollaborationRole::TextExtractor => CollaborationRole::GeneralUnderstanding,
            CollaborationRole::GeneralUnderstanding => CollaborationRole::TextExtractor,
        }
    }
}

impl fmt::Display for CollaborationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaborationRole::TextExtractor => write!(f, "text-extractor"),
            CollaborationRole::GeneralUnderstanding => write!(f, "general-understanding"),
        }
    }
}

/// Registry of collaborating agents plus the escalation protocol.
///
/// Read-only once set up, so it can be shared across concurrently
/// running agents without locking.
pub struct CollaborationManager {
    agents: HashMap<CollaborationRole, SharedAgent>,
    confidence_threshold: f64,
    max_collaboration_rounds: u32,
    call_timeout: Option<Duration>,
}

impl Default for CollaborationManager {
    fn default() -> Self {
        Self::new(&CollaborationConfig::default())
    }
}

impl CollaborationManager {
    pub fn new(config: &CollaborationConfig) -> Self {
        Self {
            agents: HashMap::new(),
            confidence_threshold: config.confidence_threshold,
            max_collaboration_rounds: config.max_rounds,
            call_timeout: None,
        }
    }

    /// Bound every agent call made during collaboration.
    pub fn with_call_timeout(mut self, limit: Option<Duration>) -> Self {
        self.call_timeout = limit;
        self
    }

    /// Register an agent under its role. Returns `None` (and registers
    /// nothing) for agents that do not collaborate.
    pub fn register(&mut self, agent: SharedAgent) -> Option<CollaborationRole> {
        let role = CollaborationRole::for_kind(agent.kind())?;
        info!("Registered agent {} as {}", agent.kind(), role);
        self.agents.insert(role, agent);
        Some(role)
    }

    pub fn get(&self, role: CollaborationRole) -> Option<&SharedAgent> {
        self.agents.get(&role)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Declared bound on collaboration rounds. Calls stay single-hop.
    pub fn max_collaboration_rounds(&self) -> u32 {
        self.max_collaboration_rounds
    }

    async fn call(
        &self,
        agent: &SharedAgent,
        input: &AgentInput,
    ) -> Result<AgentOutput, AgentError> {
        match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, agent.process(input))
                .await
                .map_err(|_| AgentError::Timeout {
                    agent: agent.kind(),
                    limit,
                })?,
            None => agent.process(input).await,
        }
    }

    fn is_confident(&self, output: &AgentOutput) -> bool {
        output.confidence >= self.confidence_threshold
    }

    /// Escalate a weak result from `requesting` to its complementary agent.
    ///
    /// Returns `current` untouched when it is already confident, when the
    /// requester has no collaboration role, or when the counterpart is not
    /// registered. Agent failures propagate.
    pub async fn request_collaboration(
        &self,
        requesting: AgentKind,
        input: &AgentInput,
        current: AgentOutput,
    ) -> Result<AgentOutput, AgentError> {
        if self.is_confident(&current) {
            return Ok(current);
        }
        let Some(role) = CollaborationRole::for_kind(requesting) else {
            debug!("{} has no collaboration role, passing result through", requesting);
            return Ok(current);
        };

        info!(
            "Agent {} requested collaboration due to low confidence: {:.2}",
            requesting, current.confidence
        );

        match role {
            CollaborationRole::TextExtractor => self.verify_text(input, current).await,
            CollaborationRole::GeneralUnderstanding => self.focus_extraction(input, current).await,
        }
    }

    /// Weak OCR: ask the general agent whether there is text at all.
    async fn verify_text(
        &self,
        input: &AgentInput,
        current: AgentOutput,
    ) -> Result<AgentOutput, AgentError> {
        let Some(general) = self.get(CollaborationRole::GeneralUnderstanding) else {
            return Ok(current);
        };

        let verification = AgentInput {
            question: Some(prompts::VERIFY_TEXT_QUESTION.to_string()),
            ..input.with_previous(vec![current.clone()])
        };
        let verified = self.call(general, &verification).await?;

        if verified.confidence > current.confidence {
            info!(
                "Verification improved confidence {:.2} -> {:.2}",
                current.confidence, verified.confidence
            );
            Ok(verified)
        } else {
            Ok(current)
        }
    }

    /// Weak general answer: ask OCR for focused text, then let the general agent retry.
    async fn focus_extraction(
        &self,
        input: &AgentInput,
        current: AgentOutput,
    ) -> Result<AgentOutput, AgentError> {
        let Some(ocr) = self.get(CollaborationRole::TextExtractor) else {
            return Ok(current);
        };

        let focused = AgentInput {
            question: Some(format!(
                "{}{}",
                prompts::FOCUSED_OCR_PREFIX,
                input.question_text().unwrap_or_default()
            )),
            ..input.with_previous(vec![current.clone()])
        };
        let extracted = self.call(ocr, &focused).await?;

        if extracted.confidence <= ESCALATION_MIN_CONFIDENCE {
            debug!(
                "Focused extraction too weak ({:.2}), keeping original",
                extracted.confidence
            );
            return Ok(current);
        }

        // The counterpart of the OCR agent is the requester itself.
        let Some(general) = self.get(CollaborationRole::GeneralUnderstanding) else {
            return Ok(current);
        };
        let retry = input.with_previous(vec![extracted, current]);
        self.call(general, &retry).await
    }

    /// Have the other role check a weak result and keep the stronger one.
    ///
    /// Primaries without a collaboration role are validated by the text extractor.
    pub async fn cross_validate(
        &self,
        primary: AgentOutput,
        input: &AgentInput,
        primary_agent: AgentKind,
    ) -> Result<AgentOutput, AgentError> {
        if self.is_confident(&primary) {
            return Ok(primary);
        }

        let validator_role = CollaborationRole::for_kind(primary_agent)
            .map(CollaborationRole::counterpart)
            .unwrap_or(CollaborationRole::TextExtractor);
        let Some(validator) = self.get(validator_role) else {
            debug!("No {} registered, skipping cross-validation", validator_role);
            return Ok(primary);
        };

        let validation = input.with_previous(vec![primary.clone()]);
        let validated = self.call(validator, &validation).await?;

        if validated.confidence > primary.confidence {
            info!("Cross-validation: {} provided better result", validator_role);
            Ok(validated)
        } else {
            Ok(primary)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::StubAgent;
    use crate::models::ImageRef;
    use std::sync::Arc;

    fn input() -> AgentInput {
        AgentInput::new(ImageRef::new("sign.png"), Some("What does the sign say?".to_string()))
    }

    fn manager(ocr: &Arc<StubAgent>, general: &Arc<StubAgent>) -> CollaborationManager {
        let mut manager = CollaborationManager::default();
        manager.register(ocr.clone());
        manager.register(general.clone());
        manager
    }

    #[tokio::test]
    async fn test_confident_result_is_untouched() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "ocr", 0.9));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "gen", 0.9));
        let manager = manager(&ocr, &general);

        for confidence in [0.7, 0.8, 1.0] {
            let current = AgentOutput::new(AgentKind::TextExtraction, "STOP", confidence);
            let result = manager
                .request_collaboration(AgentKind::TextExtraction, &input(), current.clone())
                .await
                .unwrap();
            assert_eq!(result, current);
        }
        assert_eq!(ocr.calls() + general.calls(), 0);
    }

    #[tokio::test]
    async fn test_weak_ocr_replaced_by_stronger_verification() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "ocr", 0.9));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "It says STOP", 0.9));
        let manager = manager(&ocr, &general);

        let current = AgentOutput::new(AgentKind::TextExtraction, "NO_TEXT_FOUND", 0.1);
        let result = manager
            .request_collaboration(AgentKind::TextExtraction, &input(), current.clone())
            .await
            .unwrap();

        assert_eq!(result.result, "It says STOP");
        let seen = general.inputs();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].question.as_deref(), Some(prompts::VERIFY_TEXT_QUESTION));
        assert_eq!(seen[0].previous_responses, vec![current]);
        assert_eq!(seen[0].image, input().image);
        assert_eq!(ocr.calls(), 0);
    }

    #[tokio::test]
    async fn test_weaker_verification_never_replaces_original() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "ocr", 0.9));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "unsure", 0.1));
        let manager = manager(&ocr, &general);

        for confidence in [0.1, 0.3, 0.5] {
            let current = AgentOutput::new(AgentKind::TextExtraction, "blurry", confidence);
            let result = manager
                .request_collaboration(AgentKind::TextExtraction, &input(), current.clone())
                .await
                .unwrap();
            assert_eq!(result, current);
        }
    }

    #[tokio::test]
    async fn test_weak_general_escalates_through_ocr() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "STOP", 0.9));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "It says STOP", 0.9));
        let manager = manager(&ocr, &general);

        let current = AgentOutput::new(AgentKind::GeneralUnderstanding, "NO_CONTENT_FOUND", 0.1);
        let result = manager
            .request_collaboration(AgentKind::GeneralUnderstanding, &input(), current.clone())
            .await
            .unwrap();
        assert_eq!(result.result, "It says STOP");

        let ocr_inputs = ocr.inputs();
        assert_eq!(
            ocr_inputs[0].question.as_deref(),
            Some("Please perform a detailed OCR analysis, focusing on any text that might help answer: What does the sign say?")
        );
        assert_eq!(ocr_inputs[0].previous_responses, vec![current.clone()]);

        let general_inputs = general.inputs();
        assert_eq!(general_inputs.len(), 1);
        assert_eq!(general_inputs[0].question, input().question);
        let previous = &general_inputs[0].previous_responses;
        assert_eq!(previous.len(), 2);
        assert_eq!(previous[0].result, "STOP");
        assert_eq!(previous[1], current);
    }

    #[tokio::test]
    async fn test_weak_focused_ocr_keeps_original() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "NO_TEXT_FOUND", 0.5));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "answer", 0.9));
        let manager = manager(&ocr, &general);

        let current = AgentOutput::new(AgentKind::GeneralUnderstanding, "hmm", 0.3);
        let result = manager
            .request_collaboration(AgentKind::GeneralUnderstanding, &input(), current.clone())
            .await
            .unwrap();
        assert_eq!(result, current);
        assert_eq!(ocr.calls(), 1);
        assert_eq!(general.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_collaborating_agent_passes_through() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "ocr", 0.9));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "gen", 0.9));
        let manager = manager(&ocr, &general);

        let current = AgentOutput::new(AgentKind::Relation, "NO_RELATIONS_FOUND", 0.1);
        let result = manager
            .request_collaboration(AgentKind::Relation, &input(), current.clone())
            .await
            .unwrap();
        assert_eq!(result, current);
        assert_eq!(ocr.calls() + general.calls(), 0);
    }

    #[tokio::test]
    async fn test_register_ignores_non_collaborating_agents() {
        let mut manager = CollaborationManager::default();
        let relation = Arc::new(StubAgent::new(AgentKind::Relation, "r", 0.9));
        assert_eq!(manager.register(relation), None);
        assert!(manager.get(CollaborationRole::TextExtractor).is_none());
        assert_eq!(manager.max_collaboration_rounds(), 3);
        assert_eq!(manager.confidence_threshold(), 0.7);
    }

    #[tokio::test]
    async fn test_cross_validate_prefers_stronger_validator() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "STOP", 0.9));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "gen", 0.9));
        let manager = manager(&ocr, &general);

        let primary = AgentOutput::new(AgentKind::GeneralUnderstanding, "?", 0.1);
        let result = manager
            .cross_validate(primary.clone(), &input(), AgentKind::GeneralUnderstanding)
            .await
            .unwrap();
        assert_eq!(result.result, "STOP");

        let seen = ocr.inputs();
        assert_eq!(seen[0].question, input().question);
        assert_eq!(seen[0].previous_responses, vec![primary]);
        assert_eq!(general.calls(), 0);
    }

    #[tokio::test]
    async fn test_cross_validate_keeps_primary_when_validator_weaker() {
        let ocr = Arc::new(StubAgent::new(AgentKind::TextExtraction, "ocr", 0.9));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "gen", 0.1));
        let manager = manager(&ocr, &general);

        let primary = AgentOutput::new(AgentKind::TextExtraction, "faint", 0.4);
        let result = manager
            .cross_validate(primary.clone(), &input(), AgentKind::TextExtraction)
            .await
            .unwrap();
        assert_eq!(result, primary);
        assert_eq!(general.calls(), 1);
    }

    #[tokio::test]
    async fn test_cross_validate_without_validator_degrades_gracefully() {
        let mut manager = CollaborationManager::default();
        manager.register(Arc::new(StubAgent::new(AgentKind::TextExtraction, "ocr", 0.9)));

        let primary = AgentOutput::new(AgentKind::TextExtraction, "faint", 0.2);
        let result = manager
            .cross_validate(primary.clone(), &input(), AgentKind::TextExtraction)
            .await
            .unwrap();
        assert_eq!(result, primary);
    }

    #[tokio::test]
    async fn test_validator_failure_propagates() {
        let ocr = Arc::new(StubAgent::failing(AgentKind::TextExtraction));
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "gen", 0.9));
        let manager = manager(&ocr, &general);

        let primary = AgentOutput::new(AgentKind::GeneralUnderstanding, "?", 0.1);
        let err = manager
            .cross_validate(primary, &input(), AgentKind::GeneralUnderstanding)
            .await
            .unwrap_err();
        assert_eq!(err.agent(), AgentKind::TextExtraction);
    }

    #[tokio::test]
    async fn test_call_timeout_bounds_each_escalation_step() {
        // Two sequential 30ms calls fit a 50ms limit one at a time.
        let ocr = Arc::new(
            StubAgent::new(AgentKind::TextExtraction, "EXIT 12", 0.9)
                .delayed(Duration::from_millis(30)),
        );
        let general = Arc::new(
            StubAgent::new(AgentKind::GeneralUnderstanding, "Exit 12", 0.9)
                .delayed(Duration::from_millis(30)),
        );
        let manager = manager(&ocr, &general).with_call_timeout(Some(Duration::from_millis(50)));

        let current = AgentOutput::new(AgentKind::GeneralUnderstanding, "unclear", 0.2);
        let result = manager
            .request_collaboration(AgentKind::GeneralUnderstanding, &input(), current)
            .await
            .unwrap();
        assert_eq!(result.result, "Exit 12");
        assert_eq!(ocr.calls(), 1);
        assert_eq!(general.calls(), 1);
    }

    #[tokio::test]
    async fn test_call_timeout_names_the_slow_agent() {
        let ocr = Arc::new(
            StubAgent::new(AgentKind::TextExtraction, "late", 0.9).delayed(Duration::from_secs(5)),
        );
        let general = Arc::new(StubAgent::new(AgentKind::GeneralUnderstanding, "gen", 0.9));
        let manager = manager(&ocr, &general).with_call_timeout(Some(Duration::from_millis(20)));

        let primary = AgentOutput::new(AgentKind::GeneralUnderstanding, "?", 0.1);
        let err = manager
            .cross_validate(primary, &input(), AgentKind::GeneralUnderstanding)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Timeout {
                agent: AgentKind::TextExtraction,
                ..
            }
        ));
    }
}
