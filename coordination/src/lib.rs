//! Council coordination library
//!
//! This library provides the coordination substrate for a council of
//! autonomous content-production agents:
//!
//! - A **message bus** with topic pub/sub, correlated request/response, and
//!   capability-based routing over an in-memory agent registry.
//! - A **council orchestrator** with session, proposal, and signoff
//!   workflows, built entirely on bus primitives, persisting through an
//!   external store contract and scheduling through an external task queue.
//!
//! # Usage
//!
//! ```ignore
//! use council_coordination::council::{CouncilConfig, CouncilOrchestrator, SignoffRequest};
//! use council_coordination::messaging::MessageBus;
//! use council_coordination::queue::InMemoryTaskQueue;
//! use council_coordination::state::{MemoryStore, VoteChoice};
//!
//! let bus = MessageBus::new().shared();
//! bus.register_agent(reviewer);
//!
//! let council = CouncilOrchestrator::new(
//!     bus,
//!     MemoryStore::shared(),
//!     InMemoryTaskQueue::shared(),
//!     CouncilConfig::default(),
//! );
//! council.initialize().await?;
//!
//! let signoff = council
//!     .request_signoff(SignoffRequest::new("novel", "chapter-draft", "Chapter 3"))
//!     .await?;
//! council.submit_vote(&signoff.id, "reviewer", VoteChoice::Approve).await?;
//! ```

pub mod council;
pub mod messaging;
pub mod queue;
pub mod state;

// Re-export key messaging types
pub use messaging::{
    Agent, AgentId, AgentMessage, AgentResponse, AgentStatus, BusError, BusEvent, BusMessage,
    BusResult, DeliveryFailure, MessageBus, MessageId, PublishOptions, SharedMessageBus,
    Subscription, TopicHandler, DEFAULT_REQUEST_TIMEOUT,
};

// Re-export key state types
pub use state::{
    CouncilSession, CouncilStore, MemoryStore, ProjectCouncilConfig, Proposal, ProposalStatus,
    SessionStatus, SharedCouncilStore, Signoff, SignoffStatus, StoreError, StoreResult,
    Strictness, Urgency, VoteChoice,
};

// Re-export key queue types
pub use queue::{
    InMemoryTaskQueue, NewTask, QueueError, QueueResult, QueueStats, QueuedTask, SharedTaskQueue,
    TaskQueue, TaskState,
};

// Re-export key council types
pub use council::{
    resolve, CouncilConfig, CouncilEvent, CouncilEventBus, CouncilOrchestrator, CouncilStats,
    OrchestratorError, OrchestratorResult, Resolution, SharedCouncilOrchestrator, SignoffError,
    SignoffProtocol, SignoffRequest, SweepOutcome,
};
