use std::sync::Arc;

use super::{KeyValueStore, DEFAULT_TTL_DAYS};
use crate::domain::SessionState;
use crate::error::EngineError;

/// Thread-id scheme: `{session_id}` for the parent session, and
/// `{session_id}:subproblem:{index}` for a sub-problem subgraph's own
/// checkpoint timeline.
pub fn thread_id(session_id: &str, sub_problem_index: Option<usize>) -> String {
    match sub_problem_index {
        Some(index) => format!("{session_id}:subproblem:{index}"),
        None => session_id.to_string(),
    }
}

fn checkpoint_key(thread_id: &str) -> String {
    format!("checkpoint:{thread_id}")
}

/// A checkpoint is the session state plus the graph node the driver should
/// resume at — the "last completed node" cursor of §4.9's resume semantics.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
struct CheckpointRecord {
    node: String,
    state: SessionState,
}

/// Typed wrapper serializing `SessionState` (plus its resume cursor) to and
/// from the key-value store under the thread-id scheme above.
pub struct Checkpointer {
    store: Arc<dyn KeyValueStore>,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, thread_id: &str, node: &str, state: &SessionState) -> Result<(), EngineError> {
        let record = CheckpointRecord { node: node.to_string(), state: state.clone() };
        let blob = serde_json::to_string(&record)?;
        self.store.save(&checkpoint_key(thread_id), &blob, DEFAULT_TTL_DAYS).await
    }

    /// Returns the resume node and the state as of the last snapshot.
    pub async fn load(&self, thread_id: &str) -> Result<Option<(String, SessionState)>, EngineError> {
        match self.store.load(&checkpoint_key(thread_id)).await? {
            Some(blob) => {
                let record: CheckpointRecord = serde_json::from_str(&blob)?;
                Ok(Some((record.node, record.state)))
            }
            None => Ok(None),
        }
    }

    pub async fn delete(&self, thread_id: &str) -> Result<(), EngineError> {
        self.store.delete(&checkpoint_key(thread_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Problem;
    use crate::store::SqliteKeyValueStore;

    #[tokio::test]
    async fn reload_without_mutation_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let kv = Arc::new(SqliteKeyValueStore::new(dir.path().join("cp.sqlite3")).await.unwrap());
        let checkpointer = Checkpointer::new(kv);

        let state = SessionState::new("s1", Problem::new("p1", "a problem"), 4);
        let id = thread_id("s1", None);
        checkpointer.save(&id, "select_personas", &state).await.unwrap();
        let (node, reloaded) = checkpointer.load(&id).await.unwrap().unwrap();
        assert_eq!(node, "select_personas");
        assert_eq!(state, reloaded);
    }

    #[test]
    fn subproblem_thread_id_is_composite() {
        assert_eq!(thread_id("s1", Some(2)), "s1:subproblem:2");
        assert_eq!(thread_id("s1", None), "s1");
    }
}
