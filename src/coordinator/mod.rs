//! Session coordinator
//!
//! Owns session lifecycle (start/pause/resume/kill/status). Each active
//! session runs on its own background task holding a
//! `watch::Sender<ControlSignal>` the graph driver polls between node
//! transitions — the lifecycle analogue of a mid-turn steering channel,
//! generalized from text steering to start/pause/resume/kill control.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::agents::{Agent, AgentContext, Decomposer, MetaSynthesizer};
use crate::broker::LLMBroker;
use crate::config::EngineConfig;
use crate::domain::{ContributionMessage, Event, EventData, Phase, Problem, SessionPhase, SessionState};
use crate::embedding::EmbeddingService;
use crate::error::EngineError;
use crate::events::EventPublisher;
use crate::graph::{ControlSignal, NodeContext};
use crate::metrics::MetricsCollector;
use crate::personas::PersonaLibrary;
use crate::safety::SafetyLayer;
use crate::store::Checkpointer;
use crate::subproblem::{build_subproblem_graph, SubProblemDeps, SAFE_SPLICE_TARGET};

pub struct StartOptions {
    pub max_rounds: Option<u8>,
    pub max_cost_usd: Option<f64>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self { max_rounds: None, max_cost_usd: None }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub session_id: String,
    pub phase: SessionPhase,
    pub round_number: u8,
    pub sub_problem_index: usize,
    pub total_cost_usd: f64,
}

struct SessionHandle {
    control: watch::Sender<ControlSignal>,
    state: Arc<RwLock<SessionState>>,
    join: JoinHandle<()>,
}

pub struct CoordinatorDeps {
    pub broker: Arc<dyn LLMBroker>,
    pub personas: Arc<PersonaLibrary>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub checkpointer: Arc<Checkpointer>,
    pub events: Arc<EventPublisher>,
}

pub struct SessionCoordinator {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    deps: Arc<CoordinatorDeps>,
}

impl SessionCoordinator {
    pub fn new(deps: Arc<CoordinatorDeps>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), deps }
    }

    pub async fn start_session(
        &self,
        problem_text: impl Into<String>,
        context: Option<String>,
        options: StartOptions,
    ) -> Result<String, EngineError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let mut config = EngineConfig::default();
        if let Some(max_rounds) = options.max_rounds {
            config.max_rounds = max_rounds;
        }
        if let Some(max_cost_usd) = options.max_cost_usd {
            config.max_cost_usd = max_cost_usd;
        }
        config.validate()?;
        let config = Arc::new(config);

        let mut problem = Problem::new(uuid::Uuid::new_v4().to_string(), problem_text.into());
        problem.context = context;
        let mut state = SessionState::new(session_id.clone(), problem, config.max_rounds);
        state.business_context = state.problem.context.clone();

        let (control_tx, control_rx) = watch::channel(ControlSignal::Continue);
        let shared_state = Arc::new(RwLock::new(state));

        let deps = self.deps.clone();
        let state_for_task = shared_state.clone();
        let session_id_for_task = session_id.clone();
        let join = tokio::spawn(async move {
            run_session(session_id_for_task, state_for_task, config, deps, control_rx).await;
        });

        self.sessions
            .write()
            .await
            .insert(session_id.clone(), SessionHandle { control: control_tx, state: shared_state, join });

        Ok(session_id)
    }

    pub async fn pause_session(&self, session_id: &str) -> Result<(), EngineError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id).ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        handle.control.send(ControlSignal::Pause).map_err(|e| EngineError::Safety(e.to_string()))
    }

    pub async fn resume_session(&self, session_id: &str) -> Result<(), EngineError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id).ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        handle.control.send(ControlSignal::Continue).map_err(|e| EngineError::Safety(e.to_string()))
    }

    pub async fn kill_session(&self, session_id: &str) -> Result<(), EngineError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id).ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        handle.control.send(ControlSignal::Kill).map_err(|e| EngineError::Safety(e.to_string()))
    }

    pub async fn status(&self, session_id: &str) -> Result<SessionStatus, EngineError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id).ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        let state = handle.state.read().await;
        Ok(SessionStatus {
            session_id: state.session_id.clone(),
            phase: state.phase,
            round_number: state.round_number,
            sub_problem_index: state.sub_problem_index,
            total_cost_usd: state.metrics.total_cost_usd,
        })
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionState, EngineError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id).ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        Ok(handle.state.read().await.clone())
    }

    /// Finds whichever sub-problem subgraph is suspended awaiting a
    /// clarification answer, records it as a `user_clarification`
    /// contribution directly in that subgraph's checkpoint (the parent
    /// session state the coordinator otherwise tracks isn't where the
    /// pending question lives — each sub-problem suspends under its own
    /// composite thread id), clears the question, and signals the session
    /// to resume.
    pub async fn answer_clarification(&self, session_id: &str, answer: impl Into<String>) -> Result<(), EngineError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(session_id).ok_or_else(|| EngineError::UnknownSession(session_id.to_string()))?;
        let total_sub_problems = handle.state.read().await.problem.sub_problems.len();
        let answer = answer.into();

        let mut answered = false;
        for index in 0..total_sub_problems {
            let thread_id = crate::store::checkpoint::thread_id(session_id, Some(index));
            if let Some((node, mut local_state)) = self.deps.checkpointer.load(&thread_id).await? {
                if local_state.pending_clarification.is_some() {
                    local_state.pending_clarification = None;
                    local_state.contributions.push(ContributionMessage::new(
                        "user_clarification",
                        local_state.round_number,
                        answer.clone(),
                        Phase::Exploration,
                    ));
                    self.deps.checkpointer.save(&thread_id, &node, &local_state).await?;
                    answered = true;
                    break;
                }
            }
        }
        if !answered {
            return Err(EngineError::InvalidSessionState("no sub-problem is awaiting clarification".to_string()));
        }

        handle.control.send(ControlSignal::Continue).map_err(|e| EngineError::Safety(e.to_string()))?;
        Ok(())
    }

    /// Awaits the session's background task, for callers (CLI demo, tests)
    /// that want to block until a session finishes rather than polling
    /// `status`.
    pub async fn join(&self, session_id: &str) -> Result<(), EngineError> {
        let join = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(session_id).map(|h| h.join)
        };
        match join {
            Some(handle) => handle.await.map_err(EngineError::from),
            None => Err(EngineError::UnknownSession(session_id.to_string())),
        }
    }
}

async fn run_session(
    session_id: String,
    shared_state: Arc<RwLock<SessionState>>,
    config: Arc<EngineConfig>,
    deps: Arc<CoordinatorDeps>,
    mut control: watch::Receiver<ControlSignal>,
) {
    let started_at = std::time::Instant::now();
    deps.events
        .publish(Event::new(
            session_id.clone(),
            None,
            EventData::SessionStarted { problem_description: shared_state.read().await.problem.description.clone() },
        ))
        .await;

    if let Err(e) = decompose(&shared_state, &config, &deps).await {
        tracing::warn!(error = %e, "decomposition failed");
        deps.events.publish(Event::new(session_id.clone(), None, EventData::Error { message: e.to_string(), recoverable: false })).await;
        return;
    }

    let metrics = Arc::new(MetricsCollector::new());

    let sub_problem_deps = Arc::new(SubProblemDeps {
        broker: deps.broker.clone(),
        personas: deps.personas.clone(),
        embeddings: deps.embeddings.clone(),
    });

    let total_sub_problems = shared_state.read().await.problem.sub_problems.len();
    let mut completed: HashSet<String> = HashSet::new();

    while completed.len() < total_sub_problems {
        if *control.borrow() == ControlSignal::Kill {
            return;
        }

        // Index within the full decomposition order, not within this batch
        // — `current_sub_problem` indexes `problem.sub_problems` directly by
        // it, so a later batch must keep each sub-problem's original slot.
        let batch: Vec<(usize, crate::domain::SubProblem)> = {
            let state = shared_state.read().await;
            state
                .problem
                .ready(&completed)
                .into_iter()
                .map(|sp| {
                    let index = state.problem.sub_problems.iter().position(|s| s.id == sp.id).expect("ready() returns sub_problems from this problem");
                    (index, sp.clone())
                })
                .collect()
        };
        if batch.is_empty() {
            break;
        }

        let tasks = batch.into_iter().map(|(index, sub)| {
            let shared_state = shared_state.clone();
            let sub_problem_deps = sub_problem_deps.clone();
            let config = config.clone();
            let node_ctx = NodeContext { events: deps.events.clone(), config: config.clone(), metrics: metrics.clone() };
            let checkpointer = deps.checkpointer.clone();
            let session_id = session_id.clone();
            let mut control = control.clone();
            async move {
                run_one_subproblem(session_id, index, sub, shared_state, sub_problem_deps, config, node_ctx, checkpointer, &mut control).await
            }
        });

        let results = futures::future::join_all(tasks).await;
        let mut progressed = false;
        for sub_problem_id in results.into_iter().flatten() {
            completed.insert(sub_problem_id);
            progressed = true;
        }

        // Nothing finished this round (every task paused or was killed).
        // Block on the control channel rather than busy-spinning the same
        // suspended subgraphs until an external pause/resume/kill/
        // clarification-answer call bumps it.
        if !progressed && completed.len() < total_sub_problems {
            if *control.borrow() == ControlSignal::Kill {
                return;
            }
            if control.changed().await.is_err() {
                return;
            }
        }
    }

    let results = shared_state.read().await.sub_problem_results.clone();
    if !results.is_empty() && results.iter().all(|r| r.failed) {
        metrics.set_duration(started_at.elapsed().as_secs_f64()).await;
        let final_metrics = metrics.snapshot().await;
        shared_state.write().await.metrics = final_metrics;
        deps.events
            .publish(Event::new(
                session_id.clone(),
                None,
                EventData::Error { message: "all sub-problems failed".to_string(), recoverable: false },
            ))
            .await;
        return;
    }

    // Atomic problems (a single sub-problem) never produce a meta-synthesis:
    // `subproblem_complete` already IS the session's whole answer.
    if total_sub_problems > 1 {
        if let Err(e) = meta_synthesize(&session_id, &shared_state, &deps, &metrics).await {
            tracing::warn!(error = %e, "meta-synthesis failed");
        }
    } else if let Some(only) = results.first() {
        let mut state = shared_state.write().await;
        state.synthesis = Some(only.synthesis.clone());
        state.phase = SessionPhase::Complete;
    }

    metrics.set_duration(started_at.elapsed().as_secs_f64()).await;
    let final_metrics = metrics.snapshot().await;
    shared_state.write().await.metrics = final_metrics.clone();
    deps.events
        .publish(Event::new(
            session_id.clone(),
            None,
            EventData::PhaseCostBreakdown {
                phase_costs: final_metrics.phase_costs.clone(),
                total_cost: final_metrics.total_cost_usd,
            },
        ))
        .await;
    deps.events
        .publish(Event::new(
            session_id.clone(),
            None,
            EventData::Complete { total_cost_usd: final_metrics.total_cost_usd, duration_seconds: final_metrics.duration_seconds },
        ))
        .await;
}

async fn decompose(
    shared_state: &Arc<RwLock<SessionState>>,
    config: &Arc<EngineConfig>,
    deps: &Arc<CoordinatorDeps>,
) -> Result<(), EngineError> {
    deps.events
        .publish(Event::new(shared_state.read().await.session_id.clone(), None, EventData::DecompositionStarted))
        .await;

    let (description, context) = {
        let state = shared_state.read().await;
        (state.problem.description.clone(), state.problem.context.clone())
    };
    let decomposer = Decomposer::new(deps.broker.clone());
    let agent_ctx = AgentContext::new(config.clone(), 0);
    let (problem, _response) = decomposer.run((description, context), &agent_ctx).await?;

    let mut state = shared_state.write().await;
    let session_id = state.session_id.clone();
    let sub_problem_count = problem.sub_problems.len();
    state.problem = problem;
    state.phase = SessionPhase::SelectingPersonas;
    drop(state);

    deps.events
        .publish(Event::new(session_id, None, EventData::DecompositionComplete { sub_problem_count }))
        .await;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_one_subproblem(
    session_id: String,
    sub_problem_index: usize,
    sub: crate::domain::SubProblem,
    shared_state: Arc<RwLock<SessionState>>,
    sub_problem_deps: Arc<SubProblemDeps>,
    config: Arc<EngineConfig>,
    node_ctx: NodeContext,
    checkpointer: Arc<Checkpointer>,
    control: &mut watch::Receiver<ControlSignal>,
) -> Option<String> {
    let thread_id = crate::store::checkpoint::thread_id(&session_id, Some(sub_problem_index));

    // A checkpoint from an earlier suspended attempt at this sub-problem
    // (pause, or a prior process that crashed) resumes exactly at its
    // cursor node; otherwise this is a fresh attempt seeded from the
    // parent session's cross-sub-problem carryover.
    let existing = checkpointer.load(&thread_id).await.ok().flatten();
    let (mut local_state, resume_node) = match existing {
        Some((node, state)) => (state, Some(node)),
        None => {
            let parent = shared_state.read().await;
            let mut local = SessionState::new(parent.session_id.clone(), parent.problem.clone(), config.max_rounds);
            local.sub_problem_index = sub_problem_index;
            local.expert_memory = parent.expert_memory.clone();
            local.sub_problem_results = parent.sub_problem_results.clone();
            (local, None)
        }
    };

    if resume_node.is_none() {
        node_ctx
            .events
            .publish(Event::new(session_id.clone(), Some(sub_problem_index), EventData::SubproblemStarted { sub_problem_id: sub.id.clone(), goal: sub.goal.clone() }))
            .await;
    }

    let graph = match build_subproblem_graph(sub_problem_deps) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::warn!(error = %e, "failed to build sub-problem graph");
            return None;
        }
    };

    let mut safety = SafetyLayer::new(&config);

    let outcome = graph
        .run(&mut local_state, &mut safety, &checkpointer, &thread_id, &node_ctx, control, SAFE_SPLICE_TARGET, resume_node.as_deref())
        .await;

    match outcome {
        Ok(crate::graph::RunOutcome::Completed) => {
            let _ = checkpointer.delete(&thread_id).await;
            let mut parent = shared_state.write().await;
            if let Some(result) = local_state.sub_problem_results.last().cloned() {
                parent.sub_problem_results.push(result);
            }
            for (code, summary) in local_state.expert_memory {
                parent.expert_memory.insert(code, summary);
            }
            Some(sub.id)
        }
        Ok(crate::graph::RunOutcome::Paused) | Ok(crate::graph::RunOutcome::Killed) => None,
        Err(e) => {
            tracing::warn!(error = %e, sub_problem = %sub.id, "sub-problem failed, recording placeholder result");
            let _ = checkpointer.delete(&thread_id).await;
            let mut parent = shared_state.write().await;
            parent.sub_problem_results.push(crate::domain::SubProblemResult::failure(sub.id.clone(), sub.goal.clone(), e.to_string()));
            node_ctx
                .events
                .publish(Event::new(session_id, Some(sub_problem_index), EventData::SubproblemFailed { sub_problem_id: sub.id.clone(), error: e.to_string() }))
                .await;
            Some(sub.id)
        }
    }
}

async fn meta_synthesize(
    session_id: &str,
    shared_state: &Arc<RwLock<SessionState>>,
    deps: &Arc<CoordinatorDeps>,
    metrics: &Arc<MetricsCollector>,
) -> Result<(), EngineError> {
    deps.events.publish(Event::new(session_id.to_string(), None, EventData::MetaSynthesisStarted)).await;

    let results = shared_state.read().await.sub_problem_results.clone();
    let meta_synthesizer = MetaSynthesizer::new(deps.broker.clone());
    let agent_ctx = AgentContext::new(Arc::new(EngineConfig::default()), 0);
    let (report, response) = meta_synthesizer.run(results, &agent_ctx).await?;
    metrics.record(crate::agents::CostPhase::MetaSynthesis, response.tokens_used, response.cost_usd).await;

    deps.events
        .publish(Event::new(session_id.to_string(), None, EventData::MetaSynthesisComplete { synthesis: report.unified_summary.clone() }))
        .await;

    let mut state = shared_state.write().await;
    state.synthesis = Some(report.unified_summary);
    state.phase = SessionPhase::Complete;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::embedding::BrokerEmbeddingService;

    async fn test_deps() -> Arc<CoordinatorDeps> {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(crate::store::SqliteKeyValueStore::new(dir.path().join("cp.sqlite3")).await.unwrap());
        let broker = Arc::new(MockBroker::new());
        Arc::new(CoordinatorDeps {
            broker: broker.clone(),
            personas: Arc::new(PersonaLibrary::new()),
            embeddings: Arc::new(BrokerEmbeddingService::new(broker)),
            checkpointer: Arc::new(Checkpointer::new(kv)),
            events: Arc::new(EventPublisher::new()),
        })
    }

    #[tokio::test]
    async fn unknown_session_status_is_an_error() {
        let coordinator = SessionCoordinator::new(test_deps().await);
        assert!(coordinator.status("nope").await.is_err());
    }

    #[tokio::test]
    async fn start_session_registers_a_joinable_handle() {
        let coordinator = SessionCoordinator::new(test_deps().await);
        let broker = Arc::new(MockBroker::new());
        let _ = broker;
        let session_id = coordinator.start_session("Should we raise prices?", None, StartOptions::default()).await.unwrap();
        assert!(coordinator.status(&session_id).await.is_ok());
        let _ = coordinator.kill_session(&session_id).await;
    }
}
