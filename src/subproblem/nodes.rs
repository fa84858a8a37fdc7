use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

use crate::agents::{
    Agent, AgentContext, CostPhase, FacilitatorAgent, FacilitatorInput, ModeratorAgent, PersonaContributor,
    SelectedPersona, Selector, Summarizer, Synthesizer,
};
use crate::broker::{BrokerRequest, LLMBroker, ModelTier};
use crate::context::ContextComposer;
use crate::convergence::ConvergenceDetector;
use crate::domain::{
    ConsensusLevel, ContributionMessage, Event, EventData, FacilitatorAction, Phase, PendingClarification,
    Recommendation, SessionPhase, SubProblemResult,
};
use crate::embedding::EmbeddingService;
use crate::error::EngineError;
use crate::graph::{Node, NodeContext};
use crate::personas::PersonaLibrary;
use crate::safety::{DeadlockDetector, SafetyLayer};

/// Agents, broker, persona catalog, and embedding service shared by every
/// node in one sub-problem's subgraph instance.
pub struct SubProblemDeps {
    pub broker: Arc<dyn LLMBroker>,
    pub personas: Arc<PersonaLibrary>,
    pub embeddings: Arc<dyn EmbeddingService>,
}

async fn embed_all(embeddings: &Arc<dyn EmbeddingService>, texts: &[String]) -> Option<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for text in texts {
        match embeddings.embed(text).await {
            Ok(v) => vectors.push(v),
            Err(e) => {
                tracing::warn!(error = %e, "embedding unavailable, falling back to keyword heuristic");
                return None;
            }
        }
    }
    Some(vectors)
}

async fn record(ctx: &NodeContext, phase: CostPhase, tokens: u64, cost_usd: f64) {
    ctx.metrics.record(phase, tokens, cost_usd).await;
}

fn current_sub_problem(state: &crate::domain::SessionState) -> &crate::domain::SubProblem {
    &state.problem.sub_problems[state.sub_problem_index]
}

pub struct SelectPersonas {
    pub deps: Arc<SubProblemDeps>,
}

#[async_trait]
impl Node for SelectPersonas {
    fn name(&self) -> &str {
        "select_personas"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
        ctx.events
            .publish(Event::new(state.session_id.clone(), Some(state.sub_problem_index), EventData::PersonaSelectionStarted))
            .await;

        let selector = Selector::new(self.deps.broker.clone(), self.deps.personas.clone());
        let sub = current_sub_problem(state).clone();
        let agent_ctx = AgentContext::new(ctx.config.clone(), state.round_number);
        let (selected, response): (Vec<SelectedPersona>, _) = selector.run((sub, 4), &agent_ctx).await?;
        record(ctx, CostPhase::PersonaSelection, response.tokens_used, response.cost_usd).await;

        for (order, picked) in selected.iter().enumerate() {
            ctx.events
                .publish(Event::new(
                    state.session_id.clone(),
                    Some(state.sub_problem_index),
                    EventData::PersonaSelected {
                        code: picked.profile.code.clone(),
                        name: picked.profile.display_name.clone(),
                        expertise: picked.profile.domain_expertise.clone(),
                        rationale: picked.rationale.clone(),
                        order,
                    },
                ))
                .await;
        }

        state.personas = selected.iter().map(|s| s.profile.clone()).collect();
        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::PersonaSelectionComplete { personas: state.personas.iter().map(|p| p.code.clone()).collect() },
            ))
            .await;
        state.phase = SessionPhase::InitialRound;
        Ok(())
    }
}

pub struct InitialRound {
    pub deps: Arc<SubProblemDeps>,
}

#[async_trait]
impl Node for InitialRound {
    fn name(&self) -> &str {
        "initial_round"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
        state.round_number = 1;
        let sub = current_sub_problem(state).clone();
        let contributor = Arc::new(PersonaContributor::new(self.deps.broker.clone()));
        let agent_ctx = Arc::new(AgentContext::new(ctx.config.clone(), state.round_number));

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::RoundStarted {
                    round_number: state.round_number,
                    experts: state.personas.iter().map(|p| p.code.clone()).collect(),
                },
            ))
            .await;

        for persona in &state.personas {
            ctx.events
                .publish(Event::new(
                    state.session_id.clone(),
                    Some(state.sub_problem_index),
                    EventData::ContributionStarted { persona_code: persona.code.clone(), round_number: state.round_number },
                ))
                .await;
        }

        let tasks = state.personas.clone().into_iter().map(|persona| {
            let contributor = contributor.clone();
            let agent_ctx = agent_ctx.clone();
            let context_text = ContextComposer::compose(state, &sub, &persona.code, Phase::Exploration, "Share your initial position.");
            async move {
                let result = contributor
                    .run((persona.clone(), context_text, Phase::Exploration, 1), &agent_ctx)
                    .await;
                (persona, result)
            }
        });

        // Gathered with one task per persona; a single failure is logged and
        // skipped rather than cancelling its peers (return_exceptions=true).
        for (persona, result) in join_all(tasks).await {
            match result {
                Ok((contribution, response)) => {
                    record(ctx, CostPhase::Discussion, response.tokens_used, response.cost_usd).await;
                    ctx.events
                        .publish(Event::new(
                            state.session_id.clone(),
                            Some(state.sub_problem_index),
                            EventData::Contribution {
                                persona_code: contribution.persona_code.clone(),
                                round_number: contribution.round_number,
                                content: contribution.content.clone(),
                            },
                        ))
                        .await;
                    state.contributions.push(contribution);
                }
                Err(e) => {
                    tracing::warn!(persona = %persona.code, error = %e, "initial round contribution failed, continuing");
                }
            }
        }
        state.phase = SessionPhase::Discussing;
        Ok(())
    }
}

pub struct FacilitatorDecide {
    pub deps: Arc<SubProblemDeps>,
}

#[async_trait]
impl Node for FacilitatorDecide {
    fn name(&self) -> &str {
        "facilitator_decide"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, safety: &mut SafetyLayer) -> Result<(), EngineError> {
        state.round_number += 1;
        let sub = current_sub_problem(state).clone();
        let facilitator = FacilitatorAgent::new(self.deps.broker.clone());

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::RoundStarted {
                    round_number: state.round_number,
                    experts: state.personas.iter().map(|p| p.code.clone()).collect(),
                },
            ))
            .await;

        let round_summaries = state.round_summaries.clone();
        let counts = state.contribution_counts();
        let last_speakers = state.last_n_speakers(3);
        let recent_texts: Vec<String> = state.contributions.iter().rev().take(6).map(|c| c.content.clone()).collect();
        let recent_embeddings = embed_all(&self.deps.embeddings, &recent_texts).await;
        let recent_contributions: Vec<ContributionMessage> = state.contributions.iter().rev().take(6).cloned().collect();
        let deadlock = recent_embeddings
            .as_ref()
            .map(|embeddings| DeadlockDetector::new().is_deadlocked(&recent_contributions, embeddings))
            .unwrap_or(false);
        state.metrics = ctx.metrics.snapshot().await;
        let cost_breach = state.metrics.total_cost_usd >= ctx.config.max_cost_usd;

        // Consult the drift streak recorded by `check_convergence` on the
        // prior contribution; consuming it here resets the streak so a
        // single redirect doesn't force every subsequent round too.
        let drift_detected = safety.drift.is_tripped();
        if drift_detected {
            safety.drift.reset();
        }

        let input = FacilitatorInput {
            contributions: state.contributions.clone(),
            round_number: state.round_number,
            round_summaries,
            focus: sub.focus.clone(),
            contribution_counts: counts,
            last_speakers,
            deadlock_detected: deadlock,
            cost_breach,
            drift_detected,
        };
        let agent_ctx = AgentContext::new(ctx.config.clone(), state.round_number);
        let (decision, response) = facilitator.run(input, &agent_ctx).await?;
        record(ctx, CostPhase::Discussion, response.tokens_used, response.cost_usd).await;

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::FacilitatorDecision {
                    action: format!("{:?}", decision.action).to_lowercase(),
                    reasoning: decision.reasoning.clone(),
                },
            ))
            .await;

        if decision.action == FacilitatorAction::Clarify {
            state.phase = SessionPhase::AwaitingClarification;
            state.pending_clarification = Some(PendingClarification {
                question_id: format!("{}-r{}", state.session_id, state.round_number),
                question: decision.question.clone().unwrap_or_default(),
                reason: decision.reasoning.clone(),
            });
            ctx.events
                .publish(Event::new(
                    state.session_id.clone(),
                    Some(state.sub_problem_index),
                    EventData::ClarificationRequested {
                        question_id: state.pending_clarification.as_ref().unwrap().question_id.clone(),
                        question: decision.question.clone().unwrap_or_default(),
                    },
                ))
                .await;
        }

        state.facilitator_decision = Some(decision);
        Ok(())
    }
}

pub fn facilitator_router(state: &crate::domain::SessionState) -> String {
    match state.facilitator_decision.as_ref().map(|d| d.action) {
        Some(FacilitatorAction::Continue) => "continue".to_string(),
        Some(FacilitatorAction::Moderator) => "moderator".to_string(),
        Some(FacilitatorAction::Vote) => "vote".to_string(),
        Some(FacilitatorAction::Clarify) => "clarify".to_string(),
        Some(FacilitatorAction::Research) => "continue".to_string(),
        None => "vote".to_string(),
    }
}

pub struct PersonaContribute {
    pub deps: Arc<SubProblemDeps>,
}

#[async_trait]
impl Node for PersonaContribute {
    fn name(&self) -> &str {
        "persona_contribute"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
        let sub = current_sub_problem(state).clone();
        let speaker_code = state
            .facilitator_decision
            .as_ref()
            .and_then(|d| d.next_speaker.clone())
            .ok_or_else(|| EngineError::InvalidSessionState("facilitator continue without next_speaker".into()))?;
        let profile = state
            .personas
            .iter()
            .find(|p| p.code == speaker_code)
            .cloned()
            .ok_or_else(|| EngineError::InvalidSessionState(format!("unknown speaker {speaker_code}")))?;

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::ContributionStarted { persona_code: profile.code.clone(), round_number: state.round_number },
            ))
            .await;

        let context_text = ContextComposer::compose(state, &sub, &profile.code, Phase::Challenge, "Respond to the discussion so far.");
        let contributor = PersonaContributor::new(self.deps.broker.clone());
        let agent_ctx = AgentContext::new(ctx.config.clone(), state.round_number);
        let (contribution, response) = contributor.run((profile, context_text, Phase::Challenge, state.round_number), &agent_ctx).await?;
        record(ctx, CostPhase::Discussion, response.tokens_used, response.cost_usd).await;

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::Contribution {
                    persona_code: contribution.persona_code.clone(),
                    round_number: contribution.round_number,
                    content: contribution.content.clone(),
                },
            ))
            .await;
        state.contributions.push(contribution);
        Ok(())
    }
}

pub struct ModeratorIntervene {
    pub deps: Arc<SubProblemDeps>,
}

#[async_trait]
impl Node for ModeratorIntervene {
    fn name(&self) -> &str {
        "moderator_intervene"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
        let sub = current_sub_problem(state).clone();
        let moderator_type = state
            .facilitator_decision
            .as_ref()
            .and_then(|d| d.moderator_type)
            .unwrap_or(crate::domain::ModeratorType::Skeptic);
        let context_text = ContextComposer::compose(state, &sub, "moderator", Phase::Challenge, "Intervene in the discussion.");
        let moderator = ModeratorAgent::new(self.deps.broker.clone());
        let agent_ctx = AgentContext::new(ctx.config.clone(), state.round_number);
        let (contribution, response) = moderator.run((moderator_type, context_text, state.round_number), &agent_ctx).await?;
        record(ctx, CostPhase::Discussion, response.tokens_used, response.cost_usd).await;

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::ModeratorIntervention { moderator_type, content: contribution.content.clone() },
            ))
            .await;
        state.contributions.push(contribution);
        Ok(())
    }
}

pub struct Clarification;

#[async_trait]
impl Node for Clarification {
    fn name(&self) -> &str {
        "clarification"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
        if let Some(answer_contribution) = state.contributions.last() {
            if answer_contribution.persona_code == "user_clarification" && state.pending_clarification.is_none() {
                ctx.events
                    .publish(Event::new(
                        state.session_id.clone(),
                        Some(state.sub_problem_index),
                        EventData::ClarificationAnswered {
                            question_id: format!("{}-r{}", state.session_id, state.round_number),
                            answer: answer_contribution.content.clone(),
                        },
                    ))
                    .await;
            }
        }
        Ok(())
    }
}

/// "paused" when still awaiting an answer; "answered" when the coordinator
/// recorded one as a `user_clarification` contribution; "skipped" when the
/// pending question was cleared without an answer.
pub fn clarification_router(state: &crate::domain::SessionState) -> String {
    if state.pending_clarification.is_some() {
        "paused".to_string()
    } else if state.contributions.last().map(|c| c.persona_code == "user_clarification").unwrap_or(false) {
        "answered".to_string()
    } else {
        "skipped".to_string()
    }
}

pub struct CheckConvergence {
    pub deps: Arc<SubProblemDeps>,
}

#[async_trait]
impl Node for CheckConvergence {
    fn name(&self) -> &str {
        "check_convergence"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, safety: &mut SafetyLayer) -> Result<(), EngineError> {
        let window: Vec<ContributionMessage> = state.contributions.iter().rev().take(6).rev().cloned().collect();
        let texts: Vec<String> = window.iter().map(|c| c.content.clone()).collect();
        let embeddings = embed_all(&self.deps.embeddings, &texts).await;

        let deadlock = embeddings
            .as_ref()
            .map(|e| DeadlockDetector::new().is_deadlocked(&window, e))
            .unwrap_or(false);

        state.metrics = ctx.metrics.snapshot().await;
        let cost_breach = state.metrics.total_cost_usd >= ctx.config.max_cost_usd;

        let detector = ConvergenceDetector::new();
        let reading = detector.evaluate(
            state.round_number,
            embeddings.as_deref(),
            &texts,
            &ctx.config,
            cost_breach,
            deadlock,
        );

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::Convergence {
                    round: reading.round,
                    semantic_score: reading.semantic_score,
                    novelty_score: reading.novelty_score,
                    should_stop: reading.should_stop,
                },
            ))
            .await;

        state.metrics.convergence_score = reading.semantic_score;
        state.should_stop = reading.should_stop;
        state.stop_reason = reading.stop_reason;

        // Fold any not-yet-digested rounds (including the parallel initial
        // round, which never passes through this node) into compact
        // summaries before the next round's contributions push them out of
        // the context composer's "current round" window.
        if !reading.should_stop {
            for round in (state.round_summaries.len() as u8 + 1)..=state.round_number {
                if let Some(summary) = state.summarize_round(round) {
                    state.round_summaries.push(summary);
                }
            }
        }

        // Cheap relevance proxy: a drifting discussion should show low
        // similarity between the latest contribution and the sub-problem
        // goal's own embedding, standing in for a dedicated relevance judge.
        if let (Some(embeds), Some(latest)) = (embeddings.as_ref(), window.last()) {
            if let Ok(goal_embedding) = self.deps.embeddings.embed(&current_sub_problem(state).goal.clone()).await {
                let similarity = crate::embedding::cosine_similarity(embeds.last().unwrap(), &goal_embedding);
                let relevance = (similarity * 10.0).round().clamp(0.0, 10.0) as u8;
                if safety.drift.record(relevance) {
                    tracing::debug!(persona = %latest.persona_code, "drift detected, facilitator will be nudged back to the goal");
                }
            }
        }

        Ok(())
    }
}

pub fn convergence_router(state: &crate::domain::SessionState) -> String {
    if state.should_stop {
        "stop".to_string()
    } else {
        "continue".to_string()
    }
}

pub struct Vote {
    pub deps: Arc<SubProblemDeps>,
}

const VOTE_SYSTEM_PROMPT: &str = "Give your final recommendation for this sub-problem as a single JSON \
object: {\"text\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\", \"conditions\": [\"...\"]}.";

#[async_trait]
impl Node for Vote {
    fn name(&self) -> &str {
        "vote"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
        ctx.events.publish(Event::new(state.session_id.clone(), Some(state.sub_problem_index), EventData::VotingStarted)).await;

        let sub = current_sub_problem(state).clone();
        let tasks = state.personas.clone().into_iter().map(|persona| {
            let broker = self.deps.broker.clone();
            let context_text = ContextComposer::compose(state, &sub, &persona.code, Phase::Convergence, "State your final recommendation.");
            async move {
                let request = BrokerRequest::new(context_text, ModelTier::Balanced).with_system(VOTE_SYSTEM_PROMPT);
                let response = broker.call(request).await;
                (persona, response)
            }
        });

        let mut recommendations = Vec::new();
        for (persona, response) in join_all(tasks).await {
            match response {
                Ok(response) => {
                    record(ctx, CostPhase::Discussion, response.tokens_used, response.cost_usd).await;
                    let recommendation = crate::agents::extract_json_object(&response.text)
                        .and_then(|v| serde_json::from_value::<RawVote>(v).ok())
                        .map(|raw| Recommendation {
                            persona_code: persona.code.clone(),
                            text: raw.text,
                            confidence: raw.confidence.clamp(0.0, 1.0),
                            reasoning: raw.reasoning,
                            conditions: raw.conditions,
                        })
                        .unwrap_or_else(|| Recommendation::new(persona.code.clone(), response.text.clone(), 0.5));
                    ctx.events
                        .publish(Event::new(
                            state.session_id.clone(),
                            Some(state.sub_problem_index),
                            EventData::PersonaVote {
                                persona_code: recommendation.persona_code.clone(),
                                recommendation: recommendation.text.clone(),
                                confidence: recommendation.confidence,
                                reasoning: recommendation.reasoning.clone(),
                                conditions: recommendation.conditions.clone(),
                            },
                        ))
                        .await;
                    recommendations.push(recommendation);
                }
                Err(e) => {
                    tracing::warn!(persona = %persona.code, error = %e, "vote collection failed, continuing");
                }
            }
        }

        let consensus_level = consensus_level(&recommendations);
        ctx.events
            .publish(Event::new(state.session_id.clone(), Some(state.sub_problem_index), EventData::VotingComplete { consensus_level }))
            .await;
        state.votes = recommendations;
        state.phase = SessionPhase::Voting;
        Ok(())
    }
}

#[derive(serde::Deserialize)]
struct RawVote {
    text: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    conditions: Vec<String>,
}

/// Derived from the spread of recommendation confidences: tight and high
/// is strong, tight and low or widely spread is weak, otherwise moderate.
fn consensus_level(recommendations: &[Recommendation]) -> ConsensusLevel {
    if recommendations.is_empty() {
        return ConsensusLevel::Weak;
    }
    let mean = recommendations.iter().map(|r| r.confidence).sum::<f32>() / recommendations.len() as f32;
    let variance = recommendations.iter().map(|r| (r.confidence - mean).powi(2)).sum::<f32>() / recommendations.len() as f32;
    let spread = variance.sqrt();
    if mean >= 0.75 && spread <= 0.15 {
        ConsensusLevel::Strong
    } else if spread > 0.3 || mean < 0.4 {
        ConsensusLevel::Weak
    } else {
        ConsensusLevel::Moderate
    }
}

pub struct Synthesize {
    pub deps: Arc<SubProblemDeps>,
}

#[async_trait]
impl Node for Synthesize {
    fn name(&self) -> &str {
        "synthesize"
    }

    async fn run(&self, state: &mut crate::domain::SessionState, ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
        ctx.events.publish(Event::new(state.session_id.clone(), Some(state.sub_problem_index), EventData::SynthesisStarted)).await;

        let sub = current_sub_problem(state).clone();
        let synthesizer = Synthesizer::new(self.deps.broker.clone());
        let agent_ctx = AgentContext::new(ctx.config.clone(), state.round_number);
        let (report, response) = synthesizer
            .run((state.contributions.clone(), state.votes.clone(), sub.focus.clone()), &agent_ctx)
            .await?;
        record(ctx, CostPhase::Synthesis, response.tokens_used, response.cost_usd).await;

        let mut expert_summaries = std::collections::HashMap::new();
        let summarizer = Summarizer::new(self.deps.broker.clone());
        for persona in &state.personas {
            let own_contributions: Vec<ContributionMessage> = state.contributions_for(&persona.code).into_iter().cloned().collect();
            if own_contributions.is_empty() {
                // Selected but never got a contribution through (e.g. every
                // broker call for this persona failed). Still owed a summary
                // entry so downstream consumers can rely on one per panelist.
                let fallback = "did not contribute to this discussion.".to_string();
                state.expert_memory.insert(persona.code.clone(), fallback.clone());
                expert_summaries.insert(persona.code.clone(), fallback);
                continue;
            }
            let (summary, response) = summarizer.run((persona.code.clone(), own_contributions), &agent_ctx).await?;
            record(ctx, CostPhase::Discussion, response.tokens_used, response.cost_usd).await;
            state.expert_memory.insert(persona.code.clone(), summary.clone());
            expert_summaries.insert(persona.code.clone(), summary);
        }

        let markdown = report.to_markdown();
        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::SynthesisComplete { synthesis: markdown.clone() },
            ))
            .await;

        state.metrics = ctx.metrics.snapshot().await;
        let mut result = SubProblemResult::success(sub.id.clone(), sub.goal.clone(), markdown.clone());
        result.recommendations = state.votes.clone();
        result.contribution_count = state.contributions.len() as u32;
        result.expert_panel = state.personas.iter().map(|p| p.code.clone()).collect();
        result.expert_summaries = expert_summaries;
        result.metrics.rounds_used = state.round_number;
        result.metrics.contribution_count = state.contributions.len() as u32;
        result.metrics.cost_usd = state.metrics.total_cost_usd;
        result.metrics.tokens_used = state.metrics.total_tokens;

        ctx.events
            .publish(Event::new(
                state.session_id.clone(),
                Some(state.sub_problem_index),
                EventData::SubproblemComplete { result: result.clone() },
            ))
            .await;

        state.sub_problem_results.push(result);
        state.synthesis = Some(markdown);
        state.phase = SessionPhase::Complete;
        Ok(())
    }
}
