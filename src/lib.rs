//! Board of One — an AI deliberation engine.
//!
//! Given a problem statement, the engine decomposes it into sub-problems,
//! assembles a panel of expert personas per sub-problem, runs a
//! facilitator-arbitrated multi-round discussion to convergence, collects
//! free-form recommendations, and synthesizes a structured report. Multiple
//! sub-problems carry expert memory and cross-sub-problem context forward and
//! are unified by a meta-synthesis once all have completed.
//!
//! This crate is the core orchestration engine only: the HTTP API, UI,
//! auth/billing, and deployment plumbing are collaborator territory. The
//! engine consumes an abstract [`broker::LLMBroker`], [`embedding::EmbeddingService`],
//! and [`store::KeyValueStore`] and exposes session lifecycle through
//! [`coordinator::SessionCoordinator`].

pub mod agents;
pub mod broker;
pub mod config;
pub mod context;
pub mod convergence;
pub mod coordinator;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod events;
pub mod graph;
pub mod metrics;
pub mod personas;
pub mod safety;
pub mod store;
pub mod subproblem;

pub use config::EngineConfig;
pub use coordinator::{CoordinatorDeps, SessionCoordinator, SessionStatus, StartOptions};
pub use error::{EngineError, EngineResult};
