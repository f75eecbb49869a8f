//! Messaging layer for agent coordination
//!
//! Decouples agents from each other via topics and provides two
//! asynchronously-resolved delivery patterns on top of an in-memory agent
//! registry:
//!
//! 1. **Types** (`types.rs`): the `Agent` contract and the message/response
//!    value types shared across the crate.
//!
//! 2. **Registry** (`registry.rs`): live agent registrations, keyed by id,
//!    in registration order.
//!
//! 3. **Topics** (`topics.rs`): exact and prefix-pattern subscriptions for
//!    undirected publish.
//!
//! 4. **Bus** (`bus.rs`): publish, correlated request/response with
//!    timeouts, settle-all broadcast, and capability-based routing.
//!
//! # Delivery patterns
//!
//! ```text
//! publish ──▶ topic handlers (spawned, fire-and-forget)
//! request ──▶ one agent ──▶ correlated response or timeout
//! broadcast ─▶ every agent ─▶ one response per agent, failures as data
//! ```

pub mod bus;
pub mod registry;
pub mod topics;
pub mod types;

// Re-export core types
pub use bus::{
    BusError, BusEvent, BusResult, DeliveryFailure, MessageBus, SharedMessageBus,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use registry::{AgentRegistry, RegisteredAgent};
pub use topics::{pattern_matches, Subscription, TopicHandler};
pub use types::{
    Agent, AgentId, AgentMessage, AgentResponse, AgentStatus, BusMessage, MessageId,
    PublishOptions,
};
