//! Core message types and the agent contract
//!
//! Agents are external workers owned by the caller; the bus holds shared
//! references and never manages their lifetime.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique identifier for registered agents
pub type AgentId = String;

/// Unique identifier for directed messages (the correlation key)
pub type MessageId = String;

/// Availability of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Ready to accept work
    Idle,
    /// Currently processing a message
    Working,
    /// Registered but unreachable
    Offline,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Idle => write!(f, "idle"),
            AgentStatus::Working => write!(f, "working"),
            AgentStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Contract for a capability-tagged worker that accepts directed messages
///
/// Implementations live outside this crate; a handler failure is converted
/// to a failed [`AgentResponse`] at the bus boundary, never propagated.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier this agent registers under
    fn id(&self) -> &str;

    /// Capability tags this agent advertises (e.g. `"review"`)
    fn capabilities(&self) -> &[String];

    /// Current availability
    fn status(&self) -> AgentStatus;

    /// Handle a directed message and produce a response
    async fn handle_message(&self, message: AgentMessage) -> anyhow::Result<AgentResponse>;
}

/// A unit of directed work sent to a single agent
///
/// The `id` doubles as the correlation key and must stay unique for the
/// lifetime of any pending request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Correlation id, unique per message
    pub id: MessageId,
    /// Sender identity (an agent id or a system component name)
    pub from: String,
    /// Target agent id
    pub to: AgentId,
    /// Message kind (e.g. `"review-signoff"`, `"task-assigned"`)
    pub kind: String,
    /// Arbitrary structured payload
    pub payload: Value,
    /// Creation timestamp
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    /// Create a new message with a fresh correlation id
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Copy this message for a different target, with a fresh correlation id
    ///
    /// Fan-out operations use this so every target resolves against its own
    /// pending entry.
    pub fn readdressed_to(&self, to: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: self.from.clone(),
            to: to.into(),
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Result of handling a directed message
///
/// Failures are data: a misbehaving agent yields `success = false`, it does
/// not break the aggregate operation that reached it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Correlation id of the message this responds to
    pub message_id: MessageId,
    /// Whether the agent handled the message successfully
    pub success: bool,
    /// Structured result data on success
    pub data: Option<Value>,
    /// Error description on failure
    pub error: Option<String>,
    /// Time the agent spent handling the message
    pub processing_time_ms: u64,
}

impl AgentResponse {
    /// Create a successful response
    pub fn ok(message_id: impl Into<MessageId>, data: Value) -> Self {
        Self {
            message_id: message_id.into(),
            success: true,
            data: Some(data),
            error: None,
            processing_time_ms: 0,
        }
    }

    /// Create a failed response
    pub fn failure(message_id: impl Into<MessageId>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            processing_time_ms: 0,
        }
    }

    /// Set the processing time
    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }
}

/// A published, undirected event on a topic
///
/// Ephemeral: exists only for the duration of delivery, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Identity of the publisher
    pub publisher: String,
    /// Arbitrary structured payload
    pub payload: Value,
    /// Publish timestamp
    pub timestamp: DateTime<Utc>,
    /// Optional project scope
    pub project_id: Option<String>,
}

/// Options for [`publish`](crate::messaging::MessageBus::publish)
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Publisher identity; defaults to `"system"`
    pub publisher: Option<String>,
    /// Project scope carried on the message
    pub project_id: Option<String>,
}

impl PublishOptions {
    /// Set the publisher identity
    pub fn publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    /// Set the project scope
    pub fn project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_ids_unique() {
        let a = AgentMessage::new("council", "reviewer", "review-signoff", json!({}));
        let b = AgentMessage::new("council", "reviewer", "review-signoff", json!({}));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_readdressed_gets_fresh_id() {
        let original = AgentMessage::new("council", "reviewer", "ping", json!({"n": 1}));
        let copy = original.readdressed_to("curator");

        assert_ne!(original.id, copy.id);
        assert_eq!(copy.to, "curator");
        assert_eq!(copy.kind, original.kind);
        assert_eq!(copy.payload, original.payload);
    }

    #[test]
    fn test_response_constructors() {
        let ok = AgentResponse::ok("msg-1", json!({"vote": "approve"}));
        assert!(ok.success);
        assert!(ok.error.is_none());

        let failed = AgentResponse::failure("msg-2", "agent offline").with_processing_time(12);
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("agent offline"));
        assert_eq!(failed.processing_time_ms, 12);
    }

    #[test]
    fn test_agent_status_serialization() {
        let json = serde_json::to_string(&AgentStatus::Working).unwrap();
        assert_eq!(json, "\"working\"");
    }
}
