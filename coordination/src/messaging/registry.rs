//! In-memory agent registry
//!
//! Keyed by agent id; registration order is preserved and drives the
//! capability-routing tie-break, so lookups are deterministic rather than
//! dependent on map iteration order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::types::{Agent, AgentId};

/// A registered agent entry
#[derive(Clone)]
pub struct RegisteredAgent {
    /// Shared reference to the externally-owned agent
    pub agent: Arc<dyn Agent>,
    /// When the agent was first registered
    pub registered_at: DateTime<Utc>,
}

struct RegistryInner {
    agents: HashMap<AgentId, RegisteredAgent>,
    /// Registration order, oldest first
    order: Vec<AgentId>,
}

/// Registry of live agents, keyed by id
pub struct AgentRegistry {
    inner: RwLock<RegistryInner>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                agents: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Register an agent, replacing any previous entry with the same id
    ///
    /// Replacement keeps the original registration position so routing
    /// order stays stable across re-registration.
    pub fn register(&self, agent: Arc<dyn Agent>) {
        let id = agent.id().to_string();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let entry = RegisteredAgent {
            agent,
            registered_at: Utc::now(),
        };

        if inner.agents.insert(id.clone(), entry).is_some() {
            warn!(agent_id = %id, "Re-registering agent, replacing previous entry");
        } else {
            inner.order.push(id.clone());
            debug!(agent_id = %id, "Agent registered");
        }
    }

    /// Remove an agent; returns whether it was registered
    pub fn unregister(&self, agent_id: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let removed = inner.agents.remove(agent_id).is_some();
        if removed {
            inner.order.retain(|id| id != agent_id);
            debug!(agent_id, "Agent unregistered");
        }
        removed
    }

    /// Look up an agent by id
    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.get(agent_id).map(|e| Arc::clone(&e.agent))
    }

    /// All registered agents, in registration order
    pub fn list(&self) -> Vec<Arc<dyn Agent>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .map(|e| Arc::clone(&e.agent))
            .collect()
    }

    /// Agents advertising the given capability, in registration order
    pub fn find_by_capability(&self, capability: &str) -> Vec<Arc<dyn Agent>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|id| inner.agents.get(id))
            .filter(|e| e.agent.capabilities().iter().any(|c| c == capability))
            .map(|e| Arc::clone(&e.agent))
            .collect()
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.agents.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::types::{AgentMessage, AgentResponse, AgentStatus};
    use async_trait::async_trait;

    struct StubAgent {
        id: String,
        capabilities: Vec<String>,
    }

    impl StubAgent {
        fn new(id: &str, capabilities: &[&str]) -> Arc<dyn Agent> {
            Arc::new(Self {
                id: id.to_string(),
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            })
        }
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn id(&self) -> &str {
            &self.id
        }

        fn capabilities(&self) -> &[String] {
            &self.capabilities
        }

        fn status(&self) -> AgentStatus {
            AgentStatus::Idle
        }

        async fn handle_message(&self, message: AgentMessage) -> anyhow::Result<AgentResponse> {
            Ok(AgentResponse::ok(message.id, serde_json::json!({})))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = AgentRegistry::new();
        registry.register(StubAgent::new("reviewer", &["review"]));

        assert!(registry.get("reviewer").is_some());
        assert!(registry.get("curator").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_list_preserves_registration_order() {
        let registry = AgentRegistry::new();
        registry.register(StubAgent::new("reviewer", &["review"]));
        registry.register(StubAgent::new("curator", &["curate"]));
        registry.register(StubAgent::new("architect", &["design"]));

        let ids: Vec<String> = registry.list().iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids, vec!["reviewer", "curator", "architect"]);
    }

    #[test]
    fn test_find_by_capability_ordered() {
        let registry = AgentRegistry::new();
        registry.register(StubAgent::new("reviewer-a", &["review"]));
        registry.register(StubAgent::new("curator", &["curate", "review"]));
        registry.register(StubAgent::new("reviewer-b", &["review"]));

        let ids: Vec<String> = registry
            .find_by_capability("review")
            .iter()
            .map(|a| a.id().to_string())
            .collect();
        assert_eq!(ids, vec!["reviewer-a", "curator", "reviewer-b"]);

        assert!(registry.find_by_capability("publish").is_empty());
    }

    #[test]
    fn test_reregistration_replaces_and_keeps_position() {
        let registry = AgentRegistry::new();
        registry.register(StubAgent::new("reviewer", &["review"]));
        registry.register(StubAgent::new("curator", &["curate"]));

        // Replace the reviewer with an entry advertising a new capability
        registry.register(StubAgent::new("reviewer", &["review", "style"]));

        assert_eq!(registry.len(), 2);
        let ids: Vec<String> = registry.list().iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids, vec!["reviewer", "curator"]);

        let replaced = registry.get("reviewer").unwrap();
        assert!(replaced.capabilities().contains(&"style".to_string()));
    }

    #[test]
    fn test_unregister() {
        let registry = AgentRegistry::new();
        registry.register(StubAgent::new("reviewer", &["review"]));

        assert!(registry.unregister("reviewer"));
        assert!(!registry.unregister("reviewer"));
        assert!(registry.is_empty());
    }
}
