//! Sub-problem subgraph
//!
//! Wires the nine nodes of a single sub-problem's deliberation onto
//! `GraphDriver`: persona selection, an initial fanned-out round, the
//! facilitator-arbitrated discussion loop (continue/moderator/vote/
//! clarify), convergence checking, recommendation collection, and
//! synthesis.

mod nodes;

pub use nodes::SubProblemDeps;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::EngineError;
use crate::graph::{EdgeKind, GraphDriver, Node, NodeId};

const SELECT_PERSONAS: &str = "select_personas";
const INITIAL_ROUND: &str = "initial_round";
const FACILITATOR_DECIDE: &str = "facilitator_decide";
const PERSONA_CONTRIBUTE: &str = "persona_contribute";
const MODERATOR_INTERVENE: &str = "moderator_intervene";
const CLARIFICATION: &str = "clarification";
const CHECK_CONVERGENCE: &str = "check_convergence";
const VOTE: &str = "vote";
const SYNTHESIZE: &str = "synthesize";

/// The node a safety-breach splice lands on within this subgraph.
pub const SAFE_SPLICE_TARGET: &str = VOTE;

pub fn build_subproblem_graph(deps: Arc<SubProblemDeps>) -> Result<GraphDriver, EngineError> {
    let mut registry: HashMap<NodeId, Arc<dyn Node>> = HashMap::new();
    registry.insert(SELECT_PERSONAS.into(), Arc::new(nodes::SelectPersonas { deps: deps.clone() }));
    registry.insert(INITIAL_ROUND.into(), Arc::new(nodes::InitialRound { deps: deps.clone() }));
    registry.insert(FACILITATOR_DECIDE.into(), Arc::new(nodes::FacilitatorDecide { deps: deps.clone() }));
    registry.insert(PERSONA_CONTRIBUTE.into(), Arc::new(nodes::PersonaContribute { deps: deps.clone() }));
    registry.insert(MODERATOR_INTERVENE.into(), Arc::new(nodes::ModeratorIntervene { deps: deps.clone() }));
    registry.insert(CLARIFICATION.into(), Arc::new(nodes::Clarification));
    registry.insert(CHECK_CONVERGENCE.into(), Arc::new(nodes::CheckConvergence { deps: deps.clone() }));
    registry.insert(VOTE.into(), Arc::new(nodes::Vote { deps: deps.clone() }));
    registry.insert(SYNTHESIZE.into(), Arc::new(nodes::Synthesize { deps }));

    let mut edges: HashMap<NodeId, EdgeKind> = HashMap::new();
    edges.insert(SELECT_PERSONAS.into(), EdgeKind::Unconditional(INITIAL_ROUND.into()));
    edges.insert(INITIAL_ROUND.into(), EdgeKind::Unconditional(FACILITATOR_DECIDE.into()));

    let mut facilitator_routes = HashMap::new();
    facilitator_routes.insert("continue".to_string(), PERSONA_CONTRIBUTE.to_string());
    facilitator_routes.insert("moderator".to_string(), MODERATOR_INTERVENE.to_string());
    facilitator_routes.insert("vote".to_string(), VOTE.to_string());
    facilitator_routes.insert("clarify".to_string(), CLARIFICATION.to_string());
    edges.insert(
        FACILITATOR_DECIDE.into(),
        EdgeKind::Conditional { router: Arc::new(nodes::facilitator_router), routes: facilitator_routes },
    );

    edges.insert(PERSONA_CONTRIBUTE.into(), EdgeKind::Unconditional(CHECK_CONVERGENCE.into()));
    edges.insert(MODERATOR_INTERVENE.into(), EdgeKind::Unconditional(CHECK_CONVERGENCE.into()));

    let mut clarification_routes = HashMap::new();
    clarification_routes.insert("answered".to_string(), PERSONA_CONTRIBUTE.to_string());
    clarification_routes.insert("skipped".to_string(), PERSONA_CONTRIBUTE.to_string());
    clarification_routes.insert("paused".to_string(), crate::graph::AWAIT_EXTERNAL.to_string());
    edges.insert(
        CLARIFICATION.into(),
        EdgeKind::Conditional { router: Arc::new(nodes::clarification_router), routes: clarification_routes },
    );

    let mut convergence_routes = HashMap::new();
    convergence_routes.insert("continue".to_string(), FACILITATOR_DECIDE.to_string());
    convergence_routes.insert("stop".to_string(), VOTE.to_string());
    edges.insert(
        CHECK_CONVERGENCE.into(),
        EdgeKind::Conditional { router: Arc::new(nodes::convergence_router), routes: convergence_routes },
    );

    edges.insert(VOTE.into(), EdgeKind::Unconditional(SYNTHESIZE.into()));
    edges.insert(SYNTHESIZE.into(), EdgeKind::Unconditional(crate::graph::END.to_string()));

    let mut allowed_cycles = HashSet::new();
    allowed_cycles.insert((CHECK_CONVERGENCE.to_string(), FACILITATOR_DECIDE.to_string()));

    GraphDriver::build(registry, edges, SELECT_PERSONAS.into(), &allowed_cycles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::embedding::BrokerEmbeddingService;
    use crate::personas::PersonaLibrary;

    #[test]
    fn graph_builds_with_the_only_permitted_cycle() {
        let deps = Arc::new(SubProblemDeps {
            broker: Arc::new(MockBroker::new()),
            personas: Arc::new(PersonaLibrary::new()),
            embeddings: Arc::new(BrokerEmbeddingService::new(Arc::new(MockBroker::new()))),
        });
        assert!(build_subproblem_graph(deps).is_ok());
    }
}
