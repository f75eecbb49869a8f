//! Message bus: pub/sub topics, correlated request/response, capability routing
//!
//! Holds the only mutable shared state of the messaging layer: the agent
//! registry, the topic-subscription sets, and the pending-request map. Each
//! sits behind its own lock with short critical sections that are never held
//! across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::registry::AgentRegistry;
use super::topics::{Subscription, TopicHandler, TopicSubscriptions};
use super::types::{
    Agent, AgentId, AgentMessage, AgentResponse, AgentStatus, BusMessage, MessageId,
    PublishOptions,
};

/// Default deadline for a directed request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Channel capacity for bus lifecycle events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("unknown agent: {0}")]
    UnknownAgent(AgentId),

    #[error("request to {agent} timed out after {timeout_ms}ms")]
    Timeout { agent: AgentId, timeout_ms: u64 },

    #[error("no agent advertises capability: {0}")]
    NoCapability(String),
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Shared reference to a MessageBus
pub type SharedMessageBus = Arc<MessageBus>;

/// Bus lifecycle notifications, decoupled from topic messaging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// An agent was registered
    AgentRegistered {
        agent_id: AgentId,
        capabilities: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An agent was unregistered
    AgentUnregistered {
        agent_id: AgentId,
        timestamp: DateTime<Utc>,
    },
}

impl BusEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            BusEvent::AgentRegistered { .. } => "agent:registered",
            BusEvent::AgentUnregistered { .. } => "agent:unregistered",
        }
    }
}

/// Failure delivering a published message to one subscriber
///
/// Publish is fire-and-forget; failures are reported here instead of being
/// propagated to the publisher.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    /// Topic the message was published on
    pub topic: String,
    /// Id of the subscription whose handler failed
    pub subscription_id: u64,
    /// Rendered handler error
    pub error: String,
}

/// Message bus for agent coordination
///
/// Provides three delivery patterns: undirected topic publish (fire-and-
/// forget), one-to-one request/response correlated by message id, and
/// one-to-many broadcast that always settles every target.
pub struct MessageBus {
    registry: AgentRegistry,
    subscriptions: Arc<TopicSubscriptions>,
    pending: Arc<Mutex<HashMap<MessageId, oneshot::Sender<AgentResponse>>>>,
    events: broadcast::Sender<BusEvent>,
    delivery_observer: Mutex<Option<mpsc::UnboundedSender<DeliveryFailure>>>,
}

impl MessageBus {
    /// Create a new message bus
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry: AgentRegistry::new(),
            subscriptions: Arc::new(TopicSubscriptions::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
            delivery_observer: Mutex::new(None),
        }
    }

    /// Create a shared reference to this bus
    pub fn shared(self) -> SharedMessageBus {
        Arc::new(self)
    }

    // =========================================================================
    // Agent registry
    // =========================================================================

    /// Register an agent; re-registering an existing id replaces it
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        let agent_id = agent.id().to_string();
        let capabilities = agent.capabilities().to_vec();
        self.registry.register(agent);

        info!(agent_id = %agent_id, "Agent registered with bus");
        self.emit_event(BusEvent::AgentRegistered {
            agent_id,
            capabilities,
            timestamp: Utc::now(),
        });
    }

    /// Unregister an agent; returns whether it was registered
    pub fn unregister_agent(&self, agent_id: &str) -> bool {
        let removed = self.registry.unregister(agent_id);
        if removed {
            info!(agent_id, "Agent unregistered from bus");
            self.emit_event(BusEvent::AgentUnregistered {
                agent_id: agent_id.to_string(),
                timestamp: Utc::now(),
            });
        }
        removed
    }

    /// Look up an agent by id
    pub fn get_agent(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.registry.get(agent_id)
    }

    /// All registered agents, in registration order
    pub fn list_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.registry.list()
    }

    /// Agents advertising a capability, in registration order
    pub fn find_by_capability(&self, capability: &str) -> Vec<Arc<dyn Agent>> {
        self.registry.find_by_capability(capability)
    }

    /// Number of registered agents
    pub fn agent_count(&self) -> usize {
        self.registry.len()
    }

    // =========================================================================
    // Topic pub/sub
    // =========================================================================

    /// Subscribe a handler to an exact topic
    pub fn subscribe(&self, topic: &str, handler: TopicHandler) -> Subscription {
        let id = self.subscriptions.subscribe(topic, handler);
        debug!(topic, subscription = id, "Subscribed to topic");
        Subscription::new(id, Arc::downgrade(&self.subscriptions))
    }

    /// Subscribe a handler to a topic pattern
    ///
    /// A pattern ending in `*` matches any topic sharing the prefix
    /// (`project:*` matches `project:created`); otherwise it behaves like an
    /// exact subscription.
    pub fn subscribe_pattern(&self, pattern: &str, handler: TopicHandler) -> Subscription {
        let id = self.subscriptions.subscribe_pattern(pattern, handler);
        debug!(pattern, subscription = id, "Subscribed to topic pattern");
        Subscription::new(id, Arc::downgrade(&self.subscriptions))
    }

    /// Publish a message to every matching subscriber
    ///
    /// Fire-and-forget: handlers are scheduled on the runtime and never
    /// awaited by the publisher; a handler error is logged and reported to
    /// the delivery-failure observer, never propagated. Direct-topic
    /// handlers are scheduled before pattern handlers, registration order
    /// within each group. A subscriber that unsubscribes mid-dispatch may
    /// still receive already-scheduled deliveries.
    ///
    /// Returns the number of handlers scheduled.
    pub fn publish(&self, topic: &str, payload: Value, options: PublishOptions) -> usize {
        let message = BusMessage {
            topic: topic.to_string(),
            publisher: options.publisher.unwrap_or_else(|| "system".to_string()),
            payload,
            timestamp: Utc::now(),
            project_id: options.project_id,
        };

        let handlers = self.subscriptions.handlers_for(topic);
        let scheduled = handlers.len();

        for (subscription_id, handler) in handlers {
            let message = message.clone();
            let observer = self.delivery_observer();
            tokio::spawn(async move {
                let topic = message.topic.clone();
                if let Err(error) = handler(message).await {
                    warn!(
                        topic = %topic,
                        subscription = subscription_id,
                        "Topic handler failed: {}",
                        error
                    );
                    if let Some(observer) = observer {
                        let _ = observer.send(DeliveryFailure {
                            topic,
                            subscription_id,
                            error: format!("{}", error),
                        });
                    }
                }
            });
        }

        debug!(topic, scheduled, "Message published");
        scheduled
    }

    /// Observe delivery failures from fire-and-forget publishes
    ///
    /// Replaces any previous observer.
    pub fn observe_delivery_failures(&self) -> mpsc::UnboundedReceiver<DeliveryFailure> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut observer = self
            .delivery_observer
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *observer = Some(tx);
        rx
    }

    fn delivery_observer(&self) -> Option<mpsc::UnboundedSender<DeliveryFailure>> {
        self.delivery_observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of live topic subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    // =========================================================================
    // Request / response
    // =========================================================================

    /// Send a directed message and wait for the correlated response
    ///
    /// The agent's handler runs in a spawned task that resolves the pending
    /// entry keyed by the message id; the caller races that resolution
    /// against the timeout. On timeout the pending entry is removed first,
    /// so a response arriving late finds nothing to resolve and is
    /// discarded. A handler failure is converted into a failed
    /// [`AgentResponse`]; only an unknown agent id or a timeout produce an
    /// `Err`.
    pub async fn request(
        &self,
        target_agent_id: &str,
        message: AgentMessage,
        timeout: Duration,
    ) -> BusResult<AgentResponse> {
        let agent = self
            .registry
            .get(target_agent_id)
            .ok_or_else(|| BusError::UnknownAgent(target_agent_id.to_string()))?;

        let correlation_id = message.id.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(correlation_id.clone(), tx);
        }

        debug!(
            agent_id = target_agent_id,
            message_id = %correlation_id,
            kind = %message.kind,
            "Dispatching request"
        );

        let pending = Arc::clone(&self.pending);
        let task_correlation = correlation_id.clone();
        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let response = match agent.handle_message(message).await {
                Ok(response) => response,
                Err(error) => {
                    AgentResponse::failure(task_correlation.clone(), format!("{}", error))
                        .with_processing_time(started.elapsed().as_millis() as u64)
                }
            };

            let sender = {
                let mut pending = pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.remove(&task_correlation)
            };
            match sender {
                Some(sender) => {
                    let _ = sender.send(response);
                }
                None => {
                    debug!(message_id = %task_correlation, "Discarding late agent response");
                }
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // The handler task dropped its sender without resolving
            Ok(Err(_)) => Ok(AgentResponse::failure(
                correlation_id,
                "agent task aborted before responding",
            )),
            Err(_) => {
                {
                    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                    pending.remove(&correlation_id);
                }
                warn!(
                    agent_id = target_agent_id,
                    message_id = %correlation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Err(BusError::Timeout {
                    agent: target_agent_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a message to every registered agent and wait for all to settle
    ///
    /// Each target gets its own correlation id. Individual failures,
    /// including timeouts, become synthetic failed responses; the result
    /// always has one entry per registered agent.
    pub async fn broadcast(&self, message: AgentMessage, timeout: Duration) -> Vec<AgentResponse> {
        let agents = self.registry.list();
        debug!(
            targets = agents.len(),
            kind = %message.kind,
            "Broadcasting message"
        );

        let requests = agents.into_iter().map(|agent| {
            let per_target = message.readdressed_to(agent.id());
            let target = agent.id().to_string();
            async move {
                let correlation_id = per_target.id.clone();
                match self.request(&target, per_target, timeout).await {
                    Ok(response) => response,
                    Err(error) => AgentResponse::failure(correlation_id, format!("{}", error)),
                }
            }
        });

        join_all(requests).await
    }

    /// Route a message to the first capable agent
    ///
    /// Among agents advertising the capability, in registration order: the
    /// first with status `idle` wins; if none are idle, the first match is
    /// used regardless of status.
    pub async fn route_to_capability(
        &self,
        capability: &str,
        message: AgentMessage,
        timeout: Duration,
    ) -> BusResult<AgentResponse> {
        let candidates = self.registry.find_by_capability(capability);
        if candidates.is_empty() {
            return Err(BusError::NoCapability(capability.to_string()));
        }

        let target = candidates
            .iter()
            .find(|a| a.status() == AgentStatus::Idle)
            .unwrap_or(&candidates[0]);
        let target_id = target.id().to_string();

        debug!(capability, agent_id = %target_id, "Routing message by capability");

        let message = message.readdressed_to(&target_id);
        self.request(&target_id, message, timeout).await
    }

    /// Number of requests currently awaiting a response
    pub fn pending_request_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.len()
    }

    // =========================================================================
    // Lifecycle events
    // =========================================================================

    /// Subscribe to bus lifecycle events
    pub fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    /// Emit a bus lifecycle event to all subscribers
    pub fn emit_event(&self, event: BusEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoAgent {
        id: String,
        capabilities: Vec<String>,
        status: AgentStatus,
    }

    impl EchoAgent {
        fn with_status(id: &str, status: AgentStatus) -> Arc<dyn Agent> {
            Arc::new(Self {
                id: id.to_string(),
                capabilities: vec!["echo".to_string()],
                status,
            })
        }

        fn idle(id: &str) -> Arc<dyn Agent> {
            Self::with_status(id, AgentStatus::Idle)
        }
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> &[String] {
            &self.capabilities
        }

        fn status(&self) -> AgentStatus {
            self.status
        }

        async fn handle_message(&self, message: AgentMessage) -> anyhow::Result<AgentResponse> {
            Ok(AgentResponse::ok(
                message.id,
                json!({ "echoed_by": self.id, "payload": message.payload }),
            ))
        }
    }

    struct FailingAgent {
        id: String,
        capabilities: Vec<String>,
    }

    #[async_trait]
    impl Agent for FailingAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> &[String] {
            &self.capabilities
        }

        fn status(&self) -> AgentStatus {
            AgentStatus::Idle
        }

        async fn handle_message(&self, _message: AgentMessage) -> anyhow::Result<AgentResponse> {
            anyhow::bail!("simulated failure")
        }
    }

    #[tokio::test]
    async fn test_request_response() {
        let bus = MessageBus::new();
        bus.register_agent(EchoAgent::idle("reviewer"));

        let message = AgentMessage::new("council", "reviewer", "ping", json!({"n": 1}));
        let expected_id = message.id.clone();
        let response = bus
            .request("reviewer", message, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.message_id, expected_id);
        assert_eq!(bus.pending_request_count(), 0);
    }

    #[tokio::test]
    async fn test_request_unknown_agent() {
        let bus = MessageBus::new();
        let message = AgentMessage::new("council", "ghost", "ping", json!({}));
        let result = bus.request("ghost", message, DEFAULT_REQUEST_TIMEOUT).await;

        assert!(matches!(result, Err(BusError::UnknownAgent(_))));
    }

    #[tokio::test]
    async fn test_agent_failure_is_data() {
        let bus = MessageBus::new();
        bus.register_agent(Arc::new(FailingAgent {
            id: "flaky".to_string(),
            capabilities: vec![],
        }));

        let message = AgentMessage::new("council", "flaky", "ping", json!({}));
        let response = bus
            .request("flaky", message, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();

        assert!(!response.success);
        assert!(response.error.unwrap().contains("simulated failure"));
    }

    #[tokio::test]
    async fn test_route_prefers_idle() {
        let bus = MessageBus::new();
        bus.register_agent(EchoAgent::with_status("busy-echo", AgentStatus::Working));
        bus.register_agent(EchoAgent::with_status("idle-echo", AgentStatus::Idle));

        let message = AgentMessage::new("council", "", "ping", json!({}));
        let response = bus
            .route_to_capability("echo", message, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();

        let data = response.data.unwrap();
        assert_eq!(data["echoed_by"], "idle-echo");
    }

    #[tokio::test]
    async fn test_route_falls_back_to_first_registered() {
        let bus = MessageBus::new();
        bus.register_agent(EchoAgent::with_status("first-echo", AgentStatus::Working));
        bus.register_agent(EchoAgent::with_status("second-echo", AgentStatus::Offline));

        let message = AgentMessage::new("council", "", "ping", json!({}));
        let response = bus
            .route_to_capability("echo", message, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();

        let data = response.data.unwrap();
        assert_eq!(data["echoed_by"], "first-echo");
    }

    #[tokio::test]
    async fn test_route_unknown_capability() {
        let bus = MessageBus::new();
        let message = AgentMessage::new("council", "", "ping", json!({}));
        let result = bus
            .route_to_capability("telepathy", message, DEFAULT_REQUEST_TIMEOUT)
            .await;

        assert!(matches!(result, Err(BusError::NoCapability(_))));
    }

    #[tokio::test]
    async fn test_bus_events() {
        let bus = MessageBus::new();
        let mut events = bus.subscribe_events();

        bus.register_agent(EchoAgent::idle("reviewer"));
        bus.unregister_agent("reviewer");

        let registered = events.recv().await.unwrap();
        assert_eq!(registered.event_type(), "agent:registered");

        let unregistered = events.recv().await.unwrap();
        assert_eq!(unregistered.event_type(), "agent:unregistered");
    }
}
