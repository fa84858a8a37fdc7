//! Data model
//!
//! Typed entities for a deliberation session: the problem tree, the
//! persona catalog shape, per-round contributions, facilitator decisions,
//! free-form recommendations, convergence readings, and the session's
//! working state. Every struct here is append-only or write-once once its
//! owning phase has passed, per the lifecycle rules the engine enforces.

mod contribution;
mod event;
mod facilitator;
mod metrics;
mod persona;
mod problem;
mod recommendation;
mod result;
mod session;

pub use contribution::{ContributionMessage, Phase};
pub use event::{ConsensusLevel, Event, EventData};
pub use facilitator::{FacilitatorAction, FacilitatorDecision, ModeratorType};
pub use metrics::Metrics;
pub use persona::PersonaProfile;
pub use problem::{Focus, Problem, SubProblem};
pub use recommendation::Recommendation;
pub use result::{PhaseMetrics, SubProblemResult};
pub use session::{ConvergenceReading, PendingClarification, SessionPhase, SessionState, StopReason};
