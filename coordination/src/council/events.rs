//! Lifecycle events emitted by the council orchestrator
//!
//! A closed set of event kinds fanned out on a broadcast channel. Each
//! receiver has its own queue: a slow or dropped listener never affects
//! delivery to the others, and emitting with no listeners succeeds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::Strictness;

/// Channel capacity for council events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// All council lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouncilEvent {
    /// A session was started
    SessionStarted {
        session_id: String,
        project_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A session ended, with final task counts
    SessionEnded {
        session_id: String,
        summary: Option<String>,
        task_count: u32,
        completed_count: u32,
        failed_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A session was paused
    SessionPaused {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A paused session was resumed
    SessionResumed {
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A proposal was submitted
    ProposalCreated {
        proposal_id: String,
        agent_id: String,
        action_type: String,
        auto_approved: bool,
        timestamp: DateTime<Utc>,
    },

    /// A pending proposal was approved
    ProposalApproved {
        proposal_id: String,
        decided_by: String,
        timestamp: DateTime<Utc>,
    },

    /// A pending proposal was rejected
    ProposalRejected {
        proposal_id: String,
        decided_by: String,
        timestamp: DateTime<Utc>,
    },

    /// A pending proposal expired undecided
    ProposalExpired {
        proposal_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A signoff was requested from its required agents
    SignoffRequested {
        signoff_id: String,
        project_id: String,
        change_type: String,
        required_agents: Vec<String>,
        strictness: Strictness,
        timestamp: DateTime<Utc>,
    },

    /// A signoff resolved to approved
    SignoffApproved {
        signoff_id: String,
        approvals: u32,
        rejections: u32,
        timestamp: DateTime<Utc>,
    },

    /// A signoff resolved to rejected
    SignoffRejected {
        signoff_id: String,
        approvals: u32,
        rejections: u32,
        timestamp: DateTime<Utc>,
    },

    /// A pending signoff expired unresolved
    SignoffExpired {
        signoff_id: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent joined the bus
    AgentRegistered {
        agent_id: String,
        capabilities: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An agent left the bus
    AgentUnregistered {
        agent_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A task was assigned during a session
    TaskAssigned {
        task_id: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A task finished successfully
    TaskCompleted {
        task_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A task finished with an error
    TaskFailed {
        task_id: String,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Per-project policy was updated
    ProjectConfigUpdated {
        project_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The orchestrator finished initializing
    CouncilInitialized { timestamp: DateTime<Utc> },

    /// The orchestrator shut down
    CouncilShutdown { timestamp: DateTime<Utc> },
}

impl CouncilEvent {
    /// Get the event kind as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            CouncilEvent::SessionStarted { .. } => "session:started",
            CouncilEvent::SessionEnded { .. } => "session:ended",
            CouncilEvent::SessionPaused { .. } => "session:paused",
            CouncilEvent::SessionResumed { .. } => "session:resumed",
            CouncilEvent::ProposalCreated { .. } => "proposal:created",
            CouncilEvent::ProposalApproved { .. } => "proposal:approved",
            CouncilEvent::ProposalRejected { .. } => "proposal:rejected",
            CouncilEvent::ProposalExpired { .. } => "proposal:expired",
            CouncilEvent::SignoffRequested { .. } => "signoff:requested",
            CouncilEvent::SignoffApproved { .. } => "signoff:approved",
            CouncilEvent::SignoffRejected { .. } => "signoff:rejected",
            CouncilEvent::SignoffExpired { .. } => "signoff:expired",
            CouncilEvent::AgentRegistered { .. } => "agent:registered",
            CouncilEvent::AgentUnregistered { .. } => "agent:unregistered",
            CouncilEvent::TaskAssigned { .. } => "task:assigned",
            CouncilEvent::TaskCompleted { .. } => "task:completed",
            CouncilEvent::TaskFailed { .. } => "task:failed",
            CouncilEvent::ProjectConfigUpdated { .. } => "project:config-updated",
            CouncilEvent::CouncilInitialized { .. } => "council:initialized",
            CouncilEvent::CouncilShutdown { .. } => "council:shutdown",
        }
    }

    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CouncilEvent::SessionStarted { timestamp, .. }
            | CouncilEvent::SessionEnded { timestamp, .. }
            | CouncilEvent::SessionPaused { timestamp, .. }
            | CouncilEvent::SessionResumed { timestamp, .. }
            | CouncilEvent::ProposalCreated { timestamp, .. }
            | CouncilEvent::ProposalApproved { timestamp, .. }
            | CouncilEvent::ProposalRejected { timestamp, .. }
            | CouncilEvent::ProposalExpired { timestamp, .. }
            | CouncilEvent::SignoffRequested { timestamp, .. }
            | CouncilEvent::SignoffApproved { timestamp, .. }
            | CouncilEvent::SignoffRejected { timestamp, .. }
            | CouncilEvent::SignoffExpired { timestamp, .. }
            | CouncilEvent::AgentRegistered { timestamp, .. }
            | CouncilEvent::AgentUnregistered { timestamp, .. }
            | CouncilEvent::TaskAssigned { timestamp, .. }
            | CouncilEvent::TaskCompleted { timestamp, .. }
            | CouncilEvent::TaskFailed { timestamp, .. }
            | CouncilEvent::ProjectConfigUpdated { timestamp, .. }
            | CouncilEvent::CouncilInitialized { timestamp }
            | CouncilEvent::CouncilShutdown { timestamp } => *timestamp,
        }
    }

    /// Get the session id if this event is session-scoped
    pub fn session_id(&self) -> Option<&str> {
        match self {
            CouncilEvent::SessionStarted { session_id, .. }
            | CouncilEvent::SessionEnded { session_id, .. }
            | CouncilEvent::SessionPaused { session_id, .. }
            | CouncilEvent::SessionResumed { session_id, .. }
            | CouncilEvent::TaskAssigned { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

/// Broadcast fan-out for council events
#[derive(Clone)]
pub struct CouncilEventBus {
    sender: broadcast::Sender<CouncilEvent>,
}

impl CouncilEventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to receive events
    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers; no subscribers is fine
    pub fn emit(&self, event: CouncilEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "Council event emitted"),
            Err(_) => debug!(event_type, "Council event emitted (no receivers)"),
        }
    }

    /// Number of current subscribers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for CouncilEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = CouncilEventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(CouncilEvent::CouncilInitialized {
            timestamp: Utc::now(),
        });

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "council:initialized");
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_block_others() {
        let bus = CouncilEventBus::new();
        let dropped = bus.subscribe();
        let mut kept = bus.subscribe();
        drop(dropped);

        bus.emit(CouncilEvent::SessionPaused {
            session_id: "s-1".to_string(),
            timestamp: Utc::now(),
        });

        let event = kept.recv().await.unwrap();
        assert_eq!(event.session_id(), Some("s-1"));
    }

    #[test]
    fn test_emit_without_receivers() {
        let bus = CouncilEventBus::new();
        // Must not error
        bus.emit(CouncilEvent::CouncilShutdown {
            timestamp: Utc::now(),
        });
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = CouncilEvent::SignoffApproved {
            signoff_id: "sig-1".to_string(),
            approvals: 2,
            rejections: 1,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: CouncilEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "signoff:approved");
    }
}
