//! Durable council state: entities and the store contract
//!
//! `types.rs` defines the persisted entities; `store.rs` defines the
//! `CouncilStore` trait the orchestrator consumes plus an in-memory
//! implementation for tests and single-process use.

pub mod store;
pub mod types;

// Re-export core types
pub use store::{
    AuditEntry, CouncilStore, MemoryStore, SharedCouncilStore, StoreError, StoreResult,
};
pub use types::{
    CouncilSession, ProjectCouncilConfig, ProjectId, Proposal, ProposalId, ProposalStatus,
    SessionId, SessionStatus, Signoff, SignoffId, SignoffStatus, Strictness, Urgency, VoteChoice,
};
