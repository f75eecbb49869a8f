//! Council orchestration: sessions, proposals, signoffs, events
//!
//! The orchestrator coordinates agent workflows over the message bus and
//! persists durable state through the store contract:
//!
//! 1. **Events** (`events.rs`): the closed set of lifecycle events and
//!    their broadcast fan-out.
//!
//! 2. **Signoff** (`signoff.rs`): the consensus protocol — a pure
//!    resolution function plus the vote/dispatch workflow around it.
//!
//! 3. **Orchestrator** (`orchestrator.rs`): session, proposal, task, and
//!    config workflows, the expiration sweep, and dependency-injected
//!    construction.

pub mod events;
pub mod orchestrator;
pub mod signoff;

// Re-export core types
pub use events::{CouncilEvent, CouncilEventBus};
pub use orchestrator::{
    CouncilConfig, CouncilOrchestrator, CouncilStats, OrchestratorError, OrchestratorResult,
    SharedCouncilOrchestrator, SignoffRequest, SweepOutcome,
};
pub use signoff::{resolve, Resolution, SignoffError, SignoffProtocol, SignoffResult};
