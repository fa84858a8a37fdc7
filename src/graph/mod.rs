//! Graph driver
//!
//! A small node-registry/edge-table execution engine: nodes are named,
//! async, and mutate `SessionState` directly (the "delta" of §4.9 is just
//! the mutation a node makes to its `&mut SessionState` borrow — there is
//! no separate merge step to get wrong). Edges are either unconditional or
//! conditional on a router closure reading the post-node state. The driver
//! snapshots after every node and consults the safety layer before every
//! re-entry, splicing to a configured safe terminal on breach.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::domain::SessionState;
use crate::error::EngineError;
use crate::events::EventPublisher;
use crate::metrics::MetricsCollector;
use crate::safety::SafetyLayer;
use crate::store::Checkpointer;

pub type NodeId = String;
pub type RouteLabel = String;

pub const END: &str = "END";

/// A conditional route may point here instead of a real node to suspend the
/// graph pending external input (e.g. a user clarification answer) rather
/// than terminating. The driver checkpoints with the cursor set back to the
/// node that produced this route, so resuming re-enters that same node and
/// re-evaluates its router against whatever changed while suspended.
pub const AWAIT_EXTERNAL: &str = "__AWAIT_EXTERNAL__";

#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, state: &mut SessionState, ctx: &NodeContext, safety: &mut SafetyLayer) -> Result<(), EngineError>;
}

/// Cross-cutting dependencies every node gets, regardless of what LLM/
/// store resources it additionally owns as struct fields.
pub struct NodeContext {
    pub events: Arc<EventPublisher>,
    pub config: Arc<EngineConfig>,
    pub metrics: Arc<MetricsCollector>,
}

pub enum EdgeKind {
    Unconditional(NodeId),
    Conditional {
        router: Arc<dyn Fn(&SessionState) -> RouteLabel + Send + Sync>,
        routes: HashMap<RouteLabel, NodeId>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    Pause,
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Paused,
    Killed,
}

pub struct GraphDriver {
    nodes: HashMap<NodeId, Arc<dyn Node>>,
    edges: HashMap<NodeId, EdgeKind>,
    entry: NodeId,
}

impl GraphDriver {
    /// `allowed_cycle_edges` whitelists the (from, to) pairs permitted to
    /// close a cycle; any back-edge discovered during DFS that isn't in
    /// this set is rejected at build time rather than at run time.
    pub fn build(
        nodes: HashMap<NodeId, Arc<dyn Node>>,
        edges: HashMap<NodeId, EdgeKind>,
        entry: NodeId,
        allowed_cycle_edges: &HashSet<(NodeId, NodeId)>,
    ) -> Result<Self, EngineError> {
        validate_cycles(&edges, allowed_cycle_edges)?;
        Ok(Self { nodes, edges, entry })
    }

    /// `resume_from` overrides the entry node — set it to a cursor loaded
    /// from the checkpoint store to continue a previously-suspended run
    /// instead of starting over at the graph's entry node.
    pub async fn run(
        &self,
        state: &mut SessionState,
        safety: &mut SafetyLayer,
        checkpointer: &Checkpointer,
        thread_id: &str,
        ctx: &NodeContext,
        control: &mut watch::Receiver<ControlSignal>,
        splice_target: &str,
        resume_from: Option<&str>,
    ) -> Result<RunOutcome, EngineError> {
        let mut current = resume_from.map(str::to_string).unwrap_or_else(|| self.entry.clone());
        loop {
            if current == END {
                return Ok(RunOutcome::Completed);
            }

            match *control.borrow() {
                ControlSignal::Kill => return Ok(RunOutcome::Killed),
                ControlSignal::Pause => {
                    checkpointer.save(thread_id, &current, state).await?;
                    return Ok(RunOutcome::Paused);
                }
                ControlSignal::Continue => {}
            }

            let node = self
                .nodes
                .get(&current)
                .ok_or_else(|| EngineError::Safety(format!("unknown node {current}")))?;
            node.run(state, ctx, safety).await?;

            let next = if let Err(e) = safety.check_reentry() {
                tracing::warn!(error = %e, node = %current, "safety breach, splicing to safe terminal");
                splice_target.to_string()
            } else {
                match self.edges.get(&current) {
                    Some(EdgeKind::Unconditional(to)) => to.clone(),
                    Some(EdgeKind::Conditional { router, routes }) => {
                        let label = router(state);
                        match routes.get(&label) {
                            Some(to) => to.clone(),
                            None => {
                                tracing::warn!(%label, node = %current, "router produced unmapped label, splicing");
                                splice_target.to_string()
                            }
                        }
                    }
                    None => END.to_string(),
                }
            };

            if next == AWAIT_EXTERNAL {
                checkpointer.save(thread_id, &current, state).await?;
                return Ok(RunOutcome::Paused);
            }

            // Snapshot after every node transition, cursor set to the node
            // that runs next so a resume re-enters exactly there rather
            // than re-running what already executed.
            checkpointer.save(thread_id, &next, state).await?;
            current = next;
        }
    }
}

fn validate_cycles(
    edges: &HashMap<NodeId, EdgeKind>,
    allowed: &HashSet<(NodeId, NodeId)>,
) -> Result<(), EngineError> {
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    for (from, kind) in edges {
        let targets: Vec<String> = match kind {
            EdgeKind::Unconditional(to) => vec![to.clone()],
            EdgeKind::Conditional { routes, .. } => routes.values().cloned().collect(),
        };
        adjacency.entry(from.clone()).or_default().extend(targets);
    }

    let mut visiting: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let nodes: Vec<String> = adjacency.keys().cloned().collect();
    for node in nodes {
        if !visited.contains(&node) {
            dfs_check(&node, &adjacency, &mut visiting, &mut visited, allowed)?;
        }
    }
    Ok(())
}

fn dfs_check(
    node: &str,
    adjacency: &HashMap<String, Vec<String>>,
    visiting: &mut HashSet<String>,
    visited: &mut HashSet<String>,
    allowed: &HashSet<(NodeId, NodeId)>,
) -> Result<(), EngineError> {
    visiting.insert(node.to_string());
    if let Some(children) = adjacency.get(node) {
        for child in children {
            if visiting.contains(child) {
                if !allowed.contains(&(node.to_string(), child.clone())) {
                    return Err(EngineError::Safety(format!(
                        "disallowed cycle edge {node} -> {child}"
                    )));
                }
            } else if !visited.contains(child) {
                dfs_check(child, adjacency, visiting, visited, allowed)?;
            }
        }
    }
    visiting.remove(node);
    visited.insert(node.to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Problem;
    use crate::store::SqliteKeyValueStore;

    struct Increment;

    #[async_trait]
    impl Node for Increment {
        fn name(&self) -> &str {
            "increment"
        }

        async fn run(&self, state: &mut SessionState, _ctx: &NodeContext, _safety: &mut SafetyLayer) -> Result<(), EngineError> {
            state.round_number += 1;
            Ok(())
        }
    }

    async fn test_checkpointer() -> Checkpointer {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(SqliteKeyValueStore::new(dir.path().join("cp.sqlite3")).await.unwrap());
        Checkpointer::new(kv)
    }

    #[test]
    fn rejects_cycle_edge_not_in_allowlist() {
        let mut nodes: HashMap<NodeId, Arc<dyn Node>> = HashMap::new();
        nodes.insert("a".into(), Arc::new(Increment));
        nodes.insert("b".into(), Arc::new(Increment));
        let mut edges: HashMap<NodeId, EdgeKind> = HashMap::new();
        edges.insert("a".into(), EdgeKind::Unconditional("b".into()));
        edges.insert("b".into(), EdgeKind::Unconditional("a".into()));

        let result = GraphDriver::build(nodes, edges, "a".into(), &HashSet::new());
        assert!(result.is_err());
    }

    #[test]
    fn accepts_cycle_edge_in_allowlist() {
        let mut nodes: HashMap<NodeId, Arc<dyn Node>> = HashMap::new();
        nodes.insert("a".into(), Arc::new(Increment));
        nodes.insert("b".into(), Arc::new(Increment));
        let mut edges: HashMap<NodeId, EdgeKind> = HashMap::new();
        edges.insert("a".into(), EdgeKind::Unconditional("b".into()));
        edges.insert("b".into(), EdgeKind::Unconditional("a".into()));

        let mut allowed = HashSet::new();
        allowed.insert(("b".to_string(), "a".to_string()));
        let result = GraphDriver::build(nodes, edges, "a".into(), &allowed);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn runs_linear_graph_to_completion() {
        let mut nodes: HashMap<NodeId, Arc<dyn Node>> = HashMap::new();
        nodes.insert("a".into(), Arc::new(Increment));
        let mut edges: HashMap<NodeId, EdgeKind> = HashMap::new();
        edges.insert("a".into(), EdgeKind::Unconditional(END.to_string()));

        let driver = GraphDriver::build(nodes, edges, "a".into(), &HashSet::new()).unwrap();
        let config = Arc::new(EngineConfig::default());
        let mut state = SessionState::new("s1", Problem::new("p1", "test"), config.max_rounds);
        let mut safety = SafetyLayer::new(&config);
        let checkpointer = test_checkpointer().await;
        let ctx = NodeContext { events: Arc::new(EventPublisher::new()), config: config.clone(), metrics: Arc::new(crate::metrics::MetricsCollector::new()) };
        let (_tx, mut rx) = watch::channel(ControlSignal::Continue);

        let outcome = driver
            .run(&mut state, &mut safety, &checkpointer, "s1", &ctx, &mut rx, "END", None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(state.round_number, 1);
    }

    #[tokio::test]
    async fn pause_signal_freezes_before_next_node() {
        let mut nodes: HashMap<NodeId, Arc<dyn Node>> = HashMap::new();
        nodes.insert("a".into(), Arc::new(Increment));
        nodes.insert("b".into(), Arc::new(Increment));
        let mut edges: HashMap<NodeId, EdgeKind> = HashMap::new();
        edges.insert("a".into(), EdgeKind::Unconditional("b".into()));
        edges.insert("b".into(), EdgeKind::Unconditional(END.to_string()));

        let driver = GraphDriver::build(nodes, edges, "a".into(), &HashSet::new()).unwrap();
        let config = Arc::new(EngineConfig::default());
        let mut state = SessionState::new("s1", Problem::new("p1", "test"), config.max_rounds);
        let mut safety = SafetyLayer::new(&config);
        let checkpointer = test_checkpointer().await;
        let ctx = NodeContext { events: Arc::new(EventPublisher::new()), config: config.clone(), metrics: Arc::new(crate::metrics::MetricsCollector::new()) };
        let (tx, mut rx) = watch::channel(ControlSignal::Continue);
        tx.send(ControlSignal::Pause).unwrap();

        let outcome = driver
            .run(&mut state, &mut safety, &checkpointer, "s1", &ctx, &mut rx, "END", None)
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::Paused);
    }
}
