//! Store contract for council state, with an in-memory implementation
//!
//! The orchestrator persists all durable state through [`CouncilStore`];
//! the store decides consistency. The contract demands two things beyond
//! plain CRUD: `get_or_create_active_session` must be atomic (no window
//! between the active-session read and the create), and `record_vote` must
//! isolate concurrent vote writes to the same signoff.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::types::{
    CouncilSession, ProjectCouncilConfig, Proposal, Signoff, VoteChoice,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("signoff not found: {0}")]
    SignoffNotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a council store
pub type SharedCouncilStore = Arc<dyn CouncilStore>;

/// An entry in the audit log
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Event kind (e.g. `"signoff:approved"`)
    pub event: String,
    /// Structured event detail
    pub detail: Value,
}

impl AuditEntry {
    /// Create an audit entry stamped now
    pub fn new(event: impl Into<String>, detail: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            detail,
        }
    }
}

/// CRUD contract the orchestrator consumes for durable state
#[async_trait]
pub trait CouncilStore: Send + Sync {
    /// Return the active session for a project, creating one atomically if
    /// none exists; the boolean reports whether a session was created
    async fn get_or_create_active_session(
        &self,
        project_id: Option<&str>,
    ) -> StoreResult<(CouncilSession, bool)>;

    /// Look up a session by id
    async fn get_session(&self, session_id: &str) -> StoreResult<Option<CouncilSession>>;

    /// The active session for a project, if any
    async fn get_active_session(
        &self,
        project_id: Option<&str>,
    ) -> StoreResult<Option<CouncilSession>>;

    /// Insert or update a session
    async fn put_session(&self, session: &CouncilSession) -> StoreResult<()>;

    /// Insert or update a proposal
    async fn put_proposal(&self, proposal: &Proposal) -> StoreResult<()>;

    /// Look up a proposal by id
    async fn get_proposal(&self, proposal_id: &str) -> StoreResult<Option<Proposal>>;

    /// Pending proposals, optionally scoped to a project, oldest first
    async fn list_pending_proposals(&self, project_id: Option<&str>)
        -> StoreResult<Vec<Proposal>>;

    /// Insert or update a signoff
    async fn put_signoff(&self, signoff: &Signoff) -> StoreResult<()>;

    /// Look up a signoff by id
    async fn get_signoff(&self, signoff_id: &str) -> StoreResult<Option<Signoff>>;

    /// Pending signoffs, optionally scoped to a project, oldest first
    async fn list_pending_signoffs(&self, project_id: Option<&str>) -> StoreResult<Vec<Signoff>>;

    /// Record a vote on a signoff and return the updated signoff
    ///
    /// The read-modify-write must be isolated against concurrent votes.
    async fn record_vote(
        &self,
        signoff_id: &str,
        agent_id: &str,
        vote: VoteChoice,
    ) -> StoreResult<Signoff>;

    /// Per-project policy, if configured
    async fn get_project_config(
        &self,
        project_id: &str,
    ) -> StoreResult<Option<ProjectCouncilConfig>>;

    /// Insert or update per-project policy
    async fn put_project_config(&self, config: &ProjectCouncilConfig) -> StoreResult<()>;

    /// Append an entry to the audit log
    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()>;
}

#[derive(Default)]
struct MemoryStoreInner {
    sessions: HashMap<String, CouncilSession>,
    /// Insertion order of sessions, oldest first
    session_order: Vec<String>,
    proposals: HashMap<String, Proposal>,
    proposal_order: Vec<String>,
    signoffs: HashMap<String, Signoff>,
    signoff_order: Vec<String>,
    configs: HashMap<String, ProjectCouncilConfig>,
    audit: Vec<AuditEntry>,
}

/// In-memory store backed by a single RwLock
///
/// Suitable for tests and single-process deployments; atomicity of
/// `get_or_create_active_session` and vote isolation fall out of the lock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Create a shared reference to a new store
    pub fn shared() -> SharedCouncilStore {
        Arc::new(Self::new())
    }

    /// Snapshot of the audit log, oldest first
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.audit.clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CouncilStore for MemoryStore {
    async fn get_or_create_active_session(
        &self,
        project_id: Option<&str>,
    ) -> StoreResult<(CouncilSession, bool)> {
        // Single write-lock critical section: the active-session check and
        // the create cannot interleave with another call
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let existing = inner
            .session_order
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .find(|s| s.is_active() && s.project_id.as_deref() == project_id);
        if let Some(session) = existing {
            return Ok((session.clone(), false));
        }

        let session = CouncilSession::new(project_id.map(String::from));
        inner.session_order.push(session.id.clone());
        inner.sessions.insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, "Created active session");
        Ok((session, true))
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<Option<CouncilSession>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.sessions.get(session_id).cloned())
    }

    async fn get_active_session(
        &self,
        project_id: Option<&str>,
    ) -> StoreResult<Option<CouncilSession>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .session_order
            .iter()
            .filter_map(|id| inner.sessions.get(id))
            .find(|s| s.is_active() && s.project_id.as_deref() == project_id)
            .cloned())
    }

    async fn put_session(&self, session: &CouncilSession) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.sessions.contains_key(&session.id) {
            inner.session_order.push(session.id.clone());
        }
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn put_proposal(&self, proposal: &Proposal) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.proposals.contains_key(&proposal.id) {
            inner.proposal_order.push(proposal.id.clone());
        }
        inner.proposals.insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn get_proposal(&self, proposal_id: &str) -> StoreResult<Option<Proposal>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.proposals.get(proposal_id).cloned())
    }

    async fn list_pending_proposals(
        &self,
        project_id: Option<&str>,
    ) -> StoreResult<Vec<Proposal>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .proposal_order
            .iter()
            .filter_map(|id| inner.proposals.get(id))
            .filter(|p| p.status == super::types::ProposalStatus::Pending)
            .filter(|p| project_id.is_none() || p.project_id.as_deref() == project_id)
            .cloned()
            .collect())
    }

    async fn put_signoff(&self, signoff: &Signoff) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.signoffs.contains_key(&signoff.id) {
            inner.signoff_order.push(signoff.id.clone());
        }
        inner.signoffs.insert(signoff.id.clone(), signoff.clone());
        Ok(())
    }

    async fn get_signoff(&self, signoff_id: &str) -> StoreResult<Option<Signoff>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.signoffs.get(signoff_id).cloned())
    }

    async fn list_pending_signoffs(&self, project_id: Option<&str>) -> StoreResult<Vec<Signoff>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .signoff_order
            .iter()
            .filter_map(|id| inner.signoffs.get(id))
            .filter(|s| s.status == super::types::SignoffStatus::Pending)
            .filter(|s| project_id.is_none() || Some(s.project_id.as_str()) == project_id)
            .cloned()
            .collect())
    }

    async fn record_vote(
        &self,
        signoff_id: &str,
        agent_id: &str,
        vote: VoteChoice,
    ) -> StoreResult<Signoff> {
        // Read-modify-write under the write lock isolates concurrent votes
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let signoff = inner
            .signoffs
            .get_mut(signoff_id)
            .ok_or_else(|| StoreError::SignoffNotFound(signoff_id.to_string()))?;
        signoff.record_vote(agent_id, vote);
        Ok(signoff.clone())
    }

    async fn get_project_config(
        &self,
        project_id: &str,
    ) -> StoreResult<Option<ProjectCouncilConfig>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.configs.get(project_id).cloned())
    }

    async fn put_project_config(&self, config: &ProjectCouncilConfig) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .configs
            .insert(config.project_id.clone(), config.clone());
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.audit.push(entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{ProposalStatus, SessionStatus, SignoffStatus, Strictness};
    use serde_json::json;

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let store = MemoryStore::new();

        let (first, created) = store
            .get_or_create_active_session(Some("novel"))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = store
            .get_or_create_active_session(Some("novel"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        // A different project gets its own session
        let (other, created) = store
            .get_or_create_active_session(Some("anthology"))
            .await
            .unwrap();
        assert!(created);
        assert_ne!(first.id, other.id);
    }

    #[tokio::test]
    async fn test_completed_session_allows_new_active() {
        let store = MemoryStore::new();

        let (mut session, _) = store
            .get_or_create_active_session(Some("novel"))
            .await
            .unwrap();
        session.status = SessionStatus::Completed;
        store.put_session(&session).await.unwrap();

        let (replacement, created) = store
            .get_or_create_active_session(Some("novel"))
            .await
            .unwrap();
        assert!(created);
        assert_ne!(session.id, replacement.id);
    }

    #[tokio::test]
    async fn test_pending_proposal_listing() {
        let store = MemoryStore::new();

        let pending = Proposal::new("builder", "rewrite-chapter", "Rewrite", true)
            .with_project("novel");
        let auto = Proposal::new("builder", "fix-typo", "Fix", false).with_project("novel");
        store.put_proposal(&pending).await.unwrap();
        store.put_proposal(&auto).await.unwrap();

        let listed = store.list_pending_proposals(Some("novel")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, pending.id);
        assert_eq!(listed[0].status, ProposalStatus::Pending);

        assert!(store
            .list_pending_proposals(Some("anthology"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_record_vote() {
        let store = MemoryStore::new();

        let signoff = Signoff::new(
            "novel",
            "chapter-draft",
            "Chapter 3",
            vec!["reviewer".to_string(), "curator".to_string()],
            Strictness::Advisory,
        );
        store.put_signoff(&signoff).await.unwrap();

        let updated = store
            .record_vote(&signoff.id, "reviewer", VoteChoice::Approve)
            .await
            .unwrap();
        assert_eq!(updated.approvals(), 1);
        assert_eq!(updated.status, SignoffStatus::Pending);

        let missing = store
            .record_vote("missing", "reviewer", VoteChoice::Approve)
            .await;
        assert!(matches!(missing, Err(StoreError::SignoffNotFound(_))));
    }

    #[tokio::test]
    async fn test_project_config_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get_project_config("novel").await.unwrap().is_none());

        let config = ProjectCouncilConfig::new("novel")
            .with_enabled_agents(vec!["reviewer".to_string()])
            .with_strictness(Strictness::Blocking);
        store.put_project_config(&config).await.unwrap();

        let loaded = store.get_project_config("novel").await.unwrap().unwrap();
        assert_eq!(loaded.signoff_strictness, Some(Strictness::Blocking));
    }

    #[tokio::test]
    async fn test_audit_log() {
        let store = MemoryStore::new();
        store
            .append_audit(AuditEntry::new("signoff:approved", json!({"id": "s-1"})))
            .await
            .unwrap();

        let entries = store.audit_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, "signoff:approved");
    }
}
