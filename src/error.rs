//! Engine error types.
//!
//! Library-facing code returns `EngineError` so callers can match on
//! failure kind; the CLI harness collapses everything into `anyhow::Error`
//! at the top level.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("llm broker call failed: {0}")]
    Broker(String),

    #[error("llm returned malformed output for {node}: {detail}")]
    MalformedOutput { node: String, detail: String },

    #[error("embedding request failed: {0}")]
    Embedding(String),

    #[error("state store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("checkpoint serialization failed: {0}")]
    Checkpoint(#[from] serde_json::Error),

    #[error("node execution failed: {node}: {source}")]
    NodeExecution {
        node: String,
        #[source]
        source: Box<EngineError>,
    },

    #[error("safety violation: {0}")]
    Safety(String),

    #[error("problem validation failed: {0}")]
    InvalidProblem(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session is not in a resumable state: {0}")]
    InvalidSessionState(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blocking task panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type EngineResult<T> = Result<T, EngineError>;
