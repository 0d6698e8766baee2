//! Three-tier pipeline orchestration.
//!
//! Tier 1 fans the original input out to three perception agents, tier 2
//! hands all three results to three refiners, and tier 3 merges the refiner
//! outputs into the final answer. Within a tier the outputs keep the
//! declared agent order no matter which agent finishes first.

use crate::agent::{
    GeneralUnderstandingAgent, RefinerAgent, RelationAgent, RetrieverAgent, SharedAgent,
    TextExtractionAgent,
};
use crate::collaboration::{CollaborationManager, CollaborationRole};
use crate::config::{CollaborationMode, Config, FailurePolicy};
use crate::error::{AgentError, PipelineError};
use crate::inference::ModelHandle;
use crate::models::{AgentInput, AgentKind, AgentOutput, ImageRef, DEFAULT_QUESTION};
use futures::future::{join_all, try_join_all};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Execution knobs for one orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Run the agents of a tier concurrently.
    pub parallel: bool,
    /// Upper bound on a single agent call.
    pub agent_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub collaboration: CollaborationMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            parallel: config.pipeline.parallel,
            agent_timeout: config
                .pipeline
                .agent_timeout_seconds
                .map(Duration::from_secs),
            failure_policy: config.pipeline.failure_policy,
            collaboration: config.collaboration.mode,
        }
    }
}

/// Outputs of one tier, paired with the agent that produced them.
type TierOutputs = Vec<(AgentKind, AgentOutput)>;

/// Runs the fixed three-tier plan.
pub struct PipelineOrchestrator {
    tier1: Vec<SharedAgent>,
    tier2: Vec<SharedAgent>,
    retriever: SharedAgent,
    collaboration: Arc<CollaborationManager>,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    /// Build every agent around one shared model handle.
    pub fn new(model: ModelHandle, config: &Config) -> Self {
        info!("Initializing agents...");
        let text: SharedAgent = Arc::new(TextExtractionAgent::new(model.clone()));
        let relation: SharedAgent = Arc::new(RelationAgent::new(model.clone()));
        let general: SharedAgent = Arc::new(GeneralUnderstandingAgent::new(model.clone()));

        let mut collaboration = CollaborationManager::new(&config.collaboration);
        collaboration.register(text.clone());
        collaboration.register(general.clone());
        info!(
            "Collaboration mode {:?} (threshold {:.2}, at most {} rounds)",
            config.collaboration.mode,
            collaboration.confidence_threshold(),
            collaboration.max_collaboration_rounds()
        );

        Self::from_agents(
            [text, relation, general],
            [
                Arc::new(RefinerAgent::accuracy(model.clone())),
                Arc::new(RefinerAgent::visual(model.clone())),
                Arc::new(RefinerAgent::gap_filler(model.clone())),
            ],
            Arc::new(RetrieverAgent::new(model)),
            collaboration,
            PipelineSettings::from(config),
        )
    }

    /// Assemble a pipeline from pre-built agents, in declared order.
    pub fn from_agents(
        tier1: [SharedAgent; 3],
        tier2: [SharedAgent; 3],
        retriever: SharedAgent,
        collaboration: CollaborationManager,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            tier1: tier1.into(),
            tier2: tier2.into(),
            retriever,
            collaboration: Arc::new(collaboration.with_call_timeout(settings.agent_timeout)),
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Answer `question` about `image`. The only entry point of the core.
    pub async fn run(
        &self,
        image: ImageRef,
        question: Option<String>,
    ) -> Result<AgentOutput, PipelineError> {
        let start = Instant::now();
        let question = question
            .filter(|q| !q.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_QUESTION.to_string());
        let input = AgentInput::new(image, Some(question));
        let mut degraded = false;

        info!("Running tier 1 agents...");
        let mut tier1 = self.run_tier(1, &self.tier1, &input, &mut degraded).await?;
        if self.settings.collaboration != CollaborationMode::Off {
            tier1 = self.collaborate(&input, tier1, &mut degraded).await?;
        }
        let tier1_confidences = confidences(&tier1);

        info!("Running tier 2 agents...");
        let refiner_input = input.with_previous(outputs(tier1));
        let tier2 = self
            .run_tier(2, &self.tier2, &refiner_input, &mut degraded)
            .await?;
        let tier2_confidences = confidences(&tier2);

        info!("Running tier 3 agent...");
        let retriever_input = input.with_previous(outputs(tier2));
        let final_output = self.invoke(&self.retriever, &retriever_input).await?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Final answer ready (confidence: {:.2}, {} ms)",
            final_output.confidence, elapsed_ms
        );

        Ok(final_output
            .with_meta("tier1_confidences", tier1_confidences)
            .with_meta("tier2_confidences", tier2_confidences)
            .with_meta("elapsed_ms", elapsed_ms)
            .with_meta("degraded", degraded))
    }

    /// Invoke one agent, bounded by the configured timeout.
    async fn invoke(
        &self,
        agent: &SharedAgent,
        input: &AgentInput,
    ) -> Result<AgentOutput, AgentError> {
        let output = match self.settings.agent_timeout {
            Some(limit) => tokio::time::timeout(limit, agent.process(input))
                .await
                .map_err(|_| AgentError::Timeout {
                    agent: agent.kind(),
                    limit,
                })??,
            None => agent.process(input).await?,
        };
        info!(
            "{} output (confidence: {:.2})",
            agent.kind(),
            output.confidence
        );
        debug!("{} result: {}", agent.kind(), output.result);
        Ok(output)
    }

    /// Fan `input` out to `agents` and gather their outputs in declared order.
    async fn run_tier(
        &self,
        tier: u8,
        agents: &[SharedAgent],
        input: &AgentInput,
        degraded: &mut bool,
    ) -> Result<TierOutputs, PipelineError> {
        let abort = self.settings.failure_policy == FailurePolicy::Abort;

        let results: Vec<Result<AgentOutput, AgentError>> = if self.settings.parallel {
            let calls = agents.iter().map(|agent| self.invoke(agent, input));
            if abort {
                let tier_outputs = try_join_all(calls).await?;
                return Ok(agents.iter().map(|a| a.kind()).zip(tier_outputs).collect());
            }
            join_all(calls).await
        } else {
            let mut results = Vec::with_capacity(agents.len());
            for agent in agents {
                let result = self.invoke(agent, input).await;
                if abort {
                    results.push(Ok(result?));
                } else {
                    results.push(result);
                }
            }
            results
        };

        let mut tier_outputs = Vec::with_capacity(results.len());
        let mut first_error = None;
        for (agent, result) in agents.iter().zip(results) {
            match result {
                Ok(output) => tier_outputs.push((agent.kind(), output)),
                Err(e) => {
                    warn!("Tier {} continuing without {}: {}", tier, agent.kind(), e);
                    *degraded = true;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if tier_outputs.is_empty() => Err(e.into()),
            _ => Ok(tier_outputs),
        }
    }

    /// Give weak results from the collaborating roles a second opinion.
    /// A substituted output keeps its slot.
    async fn collaborate(
        &self,
        input: &AgentInput,
        tier_outputs: TierOutputs,
        degraded: &mut bool,
    ) -> Result<TierOutputs, PipelineError> {
        let mut improved = Vec::with_capacity(tier_outputs.len());

        for (kind, output) in tier_outputs {
            if CollaborationRole::for_kind(kind).is_none() {
                improved.push((kind, output));
                continue;
            }

            let original = output.clone();
            let result = match self.settings.collaboration {
                CollaborationMode::Escalate => {
                    self.collaboration
                        .request_collaboration(kind, input, output)
                        .await
                }
                _ => self.collaboration.cross_validate(output, input, kind).await,
            };

            match result {
                Ok(better) => improved.push((kind, better)),
                Err(e) if self.settings.failure_policy == FailurePolicy::Degrade => {
                    warn!("Collaboration for {} failed, keeping original: {}", kind, e);
                    *degraded = true;
                    improved.push((kind, original));
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(improved)
    }
}

fn outputs(tier_outputs: TierOutputs) -> Vec<AgentOutput> {
    tier_outputs.into_iter().map(|(_, output)| output).collect()
}

fn confidences(tier_outputs: &TierOutputs) -> Value {
    Value::from(
        tier_outputs
            .iter()
            .map(|(_, output)| output.confidence)
            .collect::<Vec<f64>>(),
    )
}
