//! Council orchestrator - session, proposal, and signoff workflows
//!
//! The orchestrator is constructed with explicit dependencies (bus, store,
//! queue) so multiple independent councils can coexist in one process. It
//! holds no durable state of its own: everything flows through the store,
//! and lifecycle changes fan out on the council event bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::messaging::{AgentId, AgentMessage, BusError, BusEvent, SharedMessageBus};
use crate::queue::{NewTask, QueueError, QueueStats, QueuedTask, SharedTaskQueue, TaskId, TaskState};
use crate::state::{
    AuditEntry, CouncilSession, ProjectCouncilConfig, Proposal, ProposalStatus,
    SessionStatus, SharedCouncilStore, Signoff, SignoffStatus, StoreError, Strictness, VoteChoice,
};

use super::events::{CouncilEvent, CouncilEventBus};
use super::signoff::{SignoffError, SignoffProtocol};

/// Error type for orchestrator operations
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("invalid session transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("proposal already decided: {0}")]
    ProposalAlreadyDecided(String),

    #[error("no reviewers resolvable for change type: {0}")]
    NoReviewers(String),

    #[error(transparent)]
    Signoff(#[from] SignoffError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Shared reference to a CouncilOrchestrator
pub type SharedCouncilOrchestrator = Arc<CouncilOrchestrator>;

/// Configuration for the council orchestrator
#[derive(Debug, Clone)]
pub struct CouncilConfig {
    /// Strictness applied when neither the request nor the project sets one
    pub default_strictness: Strictness,

    /// Deadline for each directed agent request
    pub request_timeout: Duration,

    /// How long a pending proposal stays decidable; None disables expiry
    pub proposal_expiration: Option<Duration>,

    /// How long a pending signoff stays resolvable; None disables expiry
    pub signoff_expiration: Option<Duration>,

    /// How often the background sweep runs
    pub sweep_interval: Duration,

    /// Reviewer list per change type, in reviewer order
    pub reviewers: HashMap<String, Vec<AgentId>>,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        let mut reviewers = HashMap::new();
        reviewers.insert(
            "chapter-draft".to_string(),
            vec!["reviewer".to_string(), "curator".to_string()],
        );
        reviewers.insert("chapter-revision".to_string(), vec!["reviewer".to_string()]);
        reviewers.insert(
            "outline-change".to_string(),
            vec!["architect".to_string(), "reviewer".to_string()],
        );
        reviewers.insert(
            "publish".to_string(),
            vec![
                "architect".to_string(),
                "reviewer".to_string(),
                "curator".to_string(),
            ],
        );

        Self {
            default_strictness: Strictness::Advisory,
            request_timeout: Duration::from_secs(30),
            proposal_expiration: Some(Duration::from_secs(60 * 60)),
            signoff_expiration: Some(Duration::from_secs(24 * 60 * 60)),
            sweep_interval: Duration::from_secs(60),
            reviewers,
        }
    }
}

impl CouncilConfig {
    /// Replace the reviewer map
    pub fn with_reviewers(mut self, reviewers: HashMap<String, Vec<AgentId>>) -> Self {
        self.reviewers = reviewers;
        self
    }

    /// Set the default strictness
    pub fn with_default_strictness(mut self, strictness: Strictness) -> Self {
        self.default_strictness = strictness;
        self
    }
}

/// A request for consensus on a change
#[derive(Debug, Clone)]
pub struct SignoffRequest {
    /// Project the change belongs to
    pub project_id: String,
    /// Kind of change under review
    pub change_type: String,
    /// Identifier of the concrete change, if any
    pub change_id: Option<String>,
    /// Short human-readable title
    pub title: String,
    /// Explicit strictness; falls back to project config, then the default
    pub strictness: Option<Strictness>,
}

impl SignoffRequest {
    /// Create a signoff request
    pub fn new(
        project_id: impl Into<String>,
        change_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            change_type: change_type.into(),
            change_id: None,
            title: title.into(),
            strictness: None,
        }
    }

    /// Set the concrete change identifier
    pub fn with_change_id(mut self, change_id: impl Into<String>) -> Self {
        self.change_id = Some(change_id.into());
        self
    }

    /// Set an explicit strictness
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.strictness = Some(strictness);
        self
    }
}

/// Counters from an expiration sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Pending proposals moved to expired
    pub expired_proposals: usize,
    /// Pending signoffs moved to expired
    pub expired_signoffs: usize,
}

/// Orchestrator-wide counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilStats {
    pub registered_agents: usize,
    pub pending_proposals: usize,
    pub pending_signoffs: usize,
    pub queue: QueueStats,
}

/// Central orchestrator for council workflows
pub struct CouncilOrchestrator {
    bus: SharedMessageBus,
    store: SharedCouncilStore,
    queue: SharedTaskQueue,
    config: CouncilConfig,
    events: CouncilEventBus,
    signoffs: SignoffProtocol,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl CouncilOrchestrator {
    /// Create a new orchestrator over explicit dependencies
    pub fn new(
        bus: SharedMessageBus,
        store: SharedCouncilStore,
        queue: SharedTaskQueue,
        config: CouncilConfig,
    ) -> Self {
        let events = CouncilEventBus::new();
        let signoffs = SignoffProtocol::new(
            store.clone(),
            bus.clone(),
            events.clone(),
            config.request_timeout,
        );

        Self {
            bus,
            store,
            queue,
            config,
            events,
            signoffs,
            background: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Create a shared reference to this orchestrator
    pub fn shared(self) -> SharedCouncilOrchestrator {
        Arc::new(self)
    }

    /// Start background work: the expiration sweep and the bus-event bridge
    ///
    /// Idempotent; a second call is a no-op.
    pub async fn initialize(&self) -> OrchestratorResult<()> {
        {
            let background = self.background.lock().unwrap_or_else(|e| e.into_inner());
            if !background.is_empty() {
                warn!("Council already initialized");
                return Ok(());
            }
        }

        let sweep = {
            let store = self.store.clone();
            let events = self.events.clone();
            let interval = self.config.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick fires immediately; an early sweep is harmless
                loop {
                    ticker.tick().await;
                    if let Err(error) = Self::sweep_once(&store, &events).await {
                        warn!("Expiration sweep failed: {}", error);
                    }
                }
            })
        };

        let bridge = {
            let mut bus_events = self.bus.subscribe_events();
            let events = self.events.clone();
            tokio::spawn(async move {
                loop {
                    match bus_events.recv().await {
                        Ok(BusEvent::AgentRegistered {
                            agent_id,
                            capabilities,
                            timestamp,
                        }) => events.emit(CouncilEvent::AgentRegistered {
                            agent_id,
                            capabilities,
                            timestamp,
                        }),
                        Ok(BusEvent::AgentUnregistered {
                            agent_id,
                            timestamp,
                        }) => events.emit(CouncilEvent::AgentUnregistered {
                            agent_id,
                            timestamp,
                        }),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Bus event bridge lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        {
            let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
            background.push(sweep);
            background.push(bridge);
        }

        self.store
            .append_audit(AuditEntry::new("council:initialized", json!({})))
            .await?;
        self.events.emit(CouncilEvent::CouncilInitialized {
            timestamp: Utc::now(),
        });
        info!("Council orchestrator initialized");
        Ok(())
    }

    /// Stop background work and announce shutdown
    pub async fn shutdown(&self) -> OrchestratorResult<()> {
        {
            let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
            for handle in background.drain(..) {
                handle.abort();
            }
        }

        self.store
            .append_audit(AuditEntry::new("council:shutdown", json!({})))
            .await?;
        self.events.emit(CouncilEvent::CouncilShutdown {
            timestamp: Utc::now(),
        });
        info!("Council orchestrator shut down");
        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Start a session for a project, or return the one already active
    ///
    /// The check-and-create is a single atomic store operation, so two
    /// concurrent calls for the same project get the same session.
    pub async fn start_session(
        &self,
        project_id: Option<&str>,
    ) -> OrchestratorResult<CouncilSession> {
        let (session, created) = self.store.get_or_create_active_session(project_id).await?;

        if created {
            info!(session_id = %session.id, project_id, "Session started");
            self.store
                .append_audit(AuditEntry::new(
                    "session:started",
                    json!({ "session_id": session.id, "project_id": session.project_id }),
                ))
                .await?;
            self.events.emit(CouncilEvent::SessionStarted {
                session_id: session.id.clone(),
                project_id: session.project_id.clone(),
                timestamp: Utc::now(),
            });
        } else {
            debug!(session_id = %session.id, "Reusing active session");
        }

        Ok(session)
    }

    /// Look up a session by id
    pub async fn get_session(&self, session_id: &str) -> OrchestratorResult<CouncilSession> {
        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))
    }

    /// The active session for a project, if any
    pub async fn get_active_session(
        &self,
        project_id: Option<&str>,
    ) -> OrchestratorResult<Option<CouncilSession>> {
        Ok(self.store.get_active_session(project_id).await?)
    }

    /// Pause an active session
    pub async fn pause_session(&self, session_id: &str) -> OrchestratorResult<CouncilSession> {
        let mut session = self.get_session(session_id).await?;
        if session.status != SessionStatus::Active {
            return Err(OrchestratorError::InvalidStateTransition {
                from: session.status.to_string(),
                to: "paused".to_string(),
            });
        }

        session.status = SessionStatus::Paused;
        self.store.put_session(&session).await?;

        info!(session_id, "Session paused");
        self.events.emit(CouncilEvent::SessionPaused {
            session_id: session.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(session)
    }

    /// Resume a paused session
    pub async fn resume_session(&self, session_id: &str) -> OrchestratorResult<CouncilSession> {
        let mut session = self.get_session(session_id).await?;
        if session.status != SessionStatus::Paused {
            return Err(OrchestratorError::InvalidStateTransition {
                from: session.status.to_string(),
                to: "active".to_string(),
            });
        }

        session.status = SessionStatus::Active;
        self.store.put_session(&session).await?;

        info!(session_id, "Session resumed");
        self.events.emit(CouncilEvent::SessionResumed {
            session_id: session.id.clone(),
            timestamp: Utc::now(),
        });
        Ok(session)
    }

    /// End a session, deriving final task counts from the queue
    ///
    /// Each associated task is classified by its terminal state; completed
    /// and failed tasks are surfaced as events at this point.
    pub async fn end_session(
        &self,
        session_id: &str,
        summary: Option<String>,
    ) -> OrchestratorResult<CouncilSession> {
        let mut session = self.get_session(session_id).await?;
        if session.status == SessionStatus::Completed {
            return Err(OrchestratorError::InvalidStateTransition {
                from: session.status.to_string(),
                to: "completed".to_string(),
            });
        }

        let mut completed = 0u32;
        let mut failed = 0u32;
        for task_id in &session.task_ids {
            let Some(task) = self.queue.get(task_id).await? else {
                continue;
            };
            match task.state {
                TaskState::Completed => {
                    completed += 1;
                    self.events.emit(CouncilEvent::TaskCompleted {
                        task_id: task.id.clone(),
                        timestamp: Utc::now(),
                    });
                }
                TaskState::Failed => {
                    failed += 1;
                    self.events.emit(CouncilEvent::TaskFailed {
                        task_id: task.id.clone(),
                        error: task.error.clone(),
                        timestamp: Utc::now(),
                    });
                }
                _ => {}
            }
        }

        session.status = SessionStatus::Completed;
        session.ended_at = Some(Utc::now());
        session.summary = summary;
        session.task_count = session.task_ids.len() as u32;
        session.completed_count = completed;
        session.failed_count = failed;
        self.store.put_session(&session).await?;

        info!(
            session_id,
            tasks = session.task_count,
            completed,
            failed,
            "Session ended"
        );
        self.store
            .append_audit(AuditEntry::new(
                "session:ended",
                json!({
                    "session_id": session.id,
                    "task_count": session.task_count,
                    "completed_count": completed,
                    "failed_count": failed,
                }),
            ))
            .await?;
        self.events.emit(CouncilEvent::SessionEnded {
            session_id: session.id.clone(),
            summary: session.summary.clone(),
            task_count: session.task_count,
            completed_count: completed,
            failed_count: failed,
            timestamp: Utc::now(),
        });
        Ok(session)
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Enqueue a task, associate it with the project's active session, and
    /// notify a capable agent
    ///
    /// The notification is routed by the task kind as capability and runs
    /// detached; having no capable agent does not fail the assignment.
    pub async fn assign_task(
        &self,
        project_id: Option<&str>,
        task: NewTask,
    ) -> OrchestratorResult<TaskId> {
        let kind = task.kind.clone();
        let payload = task.payload.clone();
        let task_id = self.queue.enqueue(task).await?;

        if let Some(mut session) = self.store.get_active_session(project_id).await? {
            session.add_task(task_id.clone());
            self.store.put_session(&session).await?;
            self.events.emit(CouncilEvent::TaskAssigned {
                task_id: task_id.clone(),
                session_id: session.id.clone(),
                timestamp: Utc::now(),
            });
        }

        let bus = self.bus.clone();
        let timeout = self.config.request_timeout;
        let message = AgentMessage::new(
            "council",
            "",
            "task-assigned",
            json!({ "task_id": task_id, "kind": kind, "payload": payload }),
        );
        let notify_id = task_id.clone();
        tokio::spawn(async move {
            match bus.route_to_capability(&kind, message, timeout).await {
                Ok(_) => debug!(task_id = %notify_id, capability = %kind, "Task notification delivered"),
                Err(error) => {
                    warn!(task_id = %notify_id, capability = %kind, "Task notification failed: {}", error)
                }
            }
        });

        Ok(task_id)
    }

    /// Current state of a task
    pub async fn get_task_status(&self, task_id: &str) -> OrchestratorResult<QueuedTask> {
        self.queue
            .get(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))
    }

    /// Cancel a non-terminal task
    pub async fn cancel_task(&self, task_id: &str, reason: &str) -> OrchestratorResult<()> {
        self.queue.cancel(task_id, reason).await?;
        self.store
            .append_audit(AuditEntry::new(
                "task:cancelled",
                json!({ "task_id": task_id, "reason": reason }),
            ))
            .await?;
        Ok(())
    }

    /// Queue-wide counters
    pub async fn get_task_stats(&self) -> OrchestratorResult<QueueStats> {
        Ok(self.queue.stats().await?)
    }

    // =========================================================================
    // Proposals
    // =========================================================================

    /// Submit a proposal
    ///
    /// A proposal that requires no approval lands directly in `Auto`. A
    /// gated proposal without an explicit deadline gets the configured one.
    pub async fn submit_proposal(&self, mut proposal: Proposal) -> OrchestratorResult<Proposal> {
        if proposal.requires_approval && proposal.expires_at.is_none() {
            proposal.expires_at = Self::deadline_after(self.config.proposal_expiration);
        }

        self.store.put_proposal(&proposal).await?;

        let auto_approved = proposal.status == ProposalStatus::Auto;
        info!(
            proposal_id = %proposal.id,
            agent_id = %proposal.agent_id,
            action_type = %proposal.action_type,
            auto_approved,
            "Proposal submitted"
        );
        self.store
            .append_audit(AuditEntry::new(
                "proposal:created",
                json!({ "proposal_id": proposal.id, "auto_approved": auto_approved }),
            ))
            .await?;
        self.events.emit(CouncilEvent::ProposalCreated {
            proposal_id: proposal.id.clone(),
            agent_id: proposal.agent_id.clone(),
            action_type: proposal.action_type.clone(),
            auto_approved,
            timestamp: Utc::now(),
        });
        Ok(proposal)
    }

    /// Approve a pending proposal
    pub async fn approve_proposal(
        &self,
        proposal_id: &str,
        decided_by: &str,
    ) -> OrchestratorResult<Proposal> {
        self.decide_proposal(proposal_id, decided_by, ProposalStatus::Approved)
            .await
    }

    /// Reject a pending proposal
    pub async fn reject_proposal(
        &self,
        proposal_id: &str,
        decided_by: &str,
    ) -> OrchestratorResult<Proposal> {
        self.decide_proposal(proposal_id, decided_by, ProposalStatus::Rejected)
            .await
    }

    async fn decide_proposal(
        &self,
        proposal_id: &str,
        decided_by: &str,
        status: ProposalStatus,
    ) -> OrchestratorResult<Proposal> {
        let mut proposal = self
            .store
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| OrchestratorError::ProposalNotFound(proposal_id.to_string()))?;

        if proposal.status != ProposalStatus::Pending {
            return Err(OrchestratorError::ProposalAlreadyDecided(
                proposal_id.to_string(),
            ));
        }

        proposal.status = status;
        proposal.decided_at = Some(Utc::now());
        proposal.decided_by = Some(decided_by.to_string());
        self.store.put_proposal(&proposal).await?;

        let event = match status {
            ProposalStatus::Approved => CouncilEvent::ProposalApproved {
                proposal_id: proposal.id.clone(),
                decided_by: decided_by.to_string(),
                timestamp: Utc::now(),
            },
            _ => CouncilEvent::ProposalRejected {
                proposal_id: proposal.id.clone(),
                decided_by: decided_by.to_string(),
                timestamp: Utc::now(),
            },
        };
        info!(proposal_id, decided_by, status = ?proposal.status, "Proposal decided");
        self.store
            .append_audit(AuditEntry::new(
                event.event_type(),
                json!({ "proposal_id": proposal.id, "decided_by": decided_by }),
            ))
            .await?;
        self.events.emit(event);
        Ok(proposal)
    }

    /// Pending proposals, optionally scoped to a project
    pub async fn get_pending_proposals(
        &self,
        project_id: Option<&str>,
    ) -> OrchestratorResult<Vec<Proposal>> {
        Ok(self.store.list_pending_proposals(project_id).await?)
    }

    // =========================================================================
    // Signoffs
    // =========================================================================

    /// Request consensus on a change from its required reviewers
    ///
    /// Reviewers come from the change-type map, filtered by the project's
    /// enabled agents when configured; strictness falls back from the
    /// request to the project config to the system default. Review
    /// requests are dispatched to every reviewer without blocking creation.
    pub async fn request_signoff(&self, request: SignoffRequest) -> OrchestratorResult<Signoff> {
        let project_config = self.store.get_project_config(&request.project_id).await?;

        let base = self
            .config
            .reviewers
            .get(&request.change_type)
            .ok_or_else(|| OrchestratorError::NoReviewers(request.change_type.clone()))?;

        let required_agents: Vec<AgentId> = match &project_config {
            Some(config) if !config.enabled_agents.is_empty() => base
                .iter()
                .filter(|agent| config.enabled_agents.contains(agent))
                .cloned()
                .collect(),
            _ => base.clone(),
        };
        if required_agents.is_empty() {
            return Err(OrchestratorError::NoReviewers(request.change_type.clone()));
        }

        let strictness = request
            .strictness
            .or(project_config.and_then(|c| c.signoff_strictness))
            .unwrap_or(self.config.default_strictness);

        let mut signoff = Signoff::new(
            request.project_id,
            request.change_type,
            request.title,
            required_agents,
            strictness,
        );
        if let Some(change_id) = request.change_id {
            signoff = signoff.with_change_id(change_id);
        }
        if let Some(expires_at) = Self::deadline_after(self.config.signoff_expiration) {
            signoff = signoff.with_expiry(expires_at);
        }

        self.store.put_signoff(&signoff).await?;

        info!(
            signoff_id = %signoff.id,
            change_type = %signoff.change_type,
            reviewers = signoff.required_agents.len(),
            strictness = %signoff.strictness,
            "Signoff requested"
        );
        self.store
            .append_audit(AuditEntry::new(
                "signoff:requested",
                json!({
                    "signoff_id": signoff.id,
                    "change_type": signoff.change_type,
                    "required_agents": signoff.required_agents,
                }),
            ))
            .await?;
        self.events.emit(CouncilEvent::SignoffRequested {
            signoff_id: signoff.id.clone(),
            project_id: signoff.project_id.clone(),
            change_type: signoff.change_type.clone(),
            required_agents: signoff.required_agents.clone(),
            strictness: signoff.strictness,
            timestamp: Utc::now(),
        });

        self.signoffs.dispatch_review_requests(&signoff);
        Ok(signoff)
    }

    /// Record a reviewer's vote and re-evaluate the signoff
    pub async fn submit_vote(
        &self,
        signoff_id: &str,
        agent_id: &str,
        vote: VoteChoice,
    ) -> OrchestratorResult<Signoff> {
        Ok(self.signoffs.submit_vote(signoff_id, agent_id, vote).await?)
    }

    /// Current state of a signoff
    pub async fn get_signoff_status(&self, signoff_id: &str) -> OrchestratorResult<Signoff> {
        self.store
            .get_signoff(signoff_id)
            .await?
            .ok_or_else(|| SignoffError::SignoffNotFound(signoff_id.to_string()).into())
    }

    /// Pending signoffs, optionally scoped to a project
    pub async fn get_pending_signoffs(
        &self,
        project_id: Option<&str>,
    ) -> OrchestratorResult<Vec<Signoff>> {
        Ok(self.store.list_pending_signoffs(project_id).await?)
    }

    // =========================================================================
    // Expiration
    // =========================================================================

    /// Move expired pending proposals and signoffs to their terminal state
    ///
    /// Also runs periodically in the background once [`initialize`] has
    /// been called.
    ///
    /// [`initialize`]: CouncilOrchestrator::initialize
    pub async fn sweep_expired(&self) -> OrchestratorResult<SweepOutcome> {
        Self::sweep_once(&self.store, &self.events).await
    }

    async fn sweep_once(
        store: &SharedCouncilStore,
        events: &CouncilEventBus,
    ) -> OrchestratorResult<SweepOutcome> {
        let now = Utc::now();
        let mut outcome = SweepOutcome::default();

        for mut proposal in store.list_pending_proposals(None).await? {
            if !proposal.is_expired(now) {
                continue;
            }
            proposal.status = ProposalStatus::Expired;
            proposal.decided_at = Some(now);
            store.put_proposal(&proposal).await?;
            store
                .append_audit(AuditEntry::new(
                    "proposal:expired",
                    json!({ "proposal_id": proposal.id }),
                ))
                .await?;
            events.emit(CouncilEvent::ProposalExpired {
                proposal_id: proposal.id.clone(),
                timestamp: now,
            });
            outcome.expired_proposals += 1;
        }

        for mut signoff in store.list_pending_signoffs(None).await? {
            if !signoff.is_expired(now) {
                continue;
            }
            signoff.status = SignoffStatus::Expired;
            signoff.resolved_at = Some(now);
            store.put_signoff(&signoff).await?;
            store
                .append_audit(AuditEntry::new(
                    "signoff:expired",
                    json!({ "signoff_id": signoff.id }),
                ))
                .await?;
            events.emit(CouncilEvent::SignoffExpired {
                signoff_id: signoff.id.clone(),
                timestamp: now,
            });
            outcome.expired_signoffs += 1;
        }

        if outcome != SweepOutcome::default() {
            info!(
                expired_proposals = outcome.expired_proposals,
                expired_signoffs = outcome.expired_signoffs,
                "Expiration sweep"
            );
        }
        Ok(outcome)
    }

    fn deadline_after(duration: Option<Duration>) -> Option<DateTime<Utc>> {
        let duration = duration?;
        chrono::Duration::from_std(duration)
            .ok()
            .map(|d| Utc::now() + d)
    }

    // =========================================================================
    // Config, events, stats
    // =========================================================================

    /// Per-project policy, if configured
    pub async fn get_project_config(
        &self,
        project_id: &str,
    ) -> OrchestratorResult<Option<ProjectCouncilConfig>> {
        Ok(self.store.get_project_config(project_id).await?)
    }

    /// Set per-project policy
    pub async fn set_project_config(
        &self,
        config: ProjectCouncilConfig,
    ) -> OrchestratorResult<()> {
        self.store.put_project_config(&config).await?;
        info!(project_id = %config.project_id, "Project config updated");
        self.events.emit(CouncilEvent::ProjectConfigUpdated {
            project_id: config.project_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Subscribe to council events
    pub fn on_event(&self) -> broadcast::Receiver<CouncilEvent> {
        self.events.subscribe()
    }

    /// Emit a council event to all listeners
    pub fn emit_event(&self, event: CouncilEvent) {
        self.events.emit(event);
    }

    /// Orchestrator-wide counters
    pub async fn get_stats(&self) -> OrchestratorResult<CouncilStats> {
        Ok(CouncilStats {
            registered_agents: self.bus.agent_count(),
            pending_proposals: self.store.list_pending_proposals(None).await?.len(),
            pending_signoffs: self.store.list_pending_signoffs(None).await?.len(),
            queue: self.queue.stats().await?,
        })
    }

    /// The bus this orchestrator talks to agents through
    pub fn bus(&self) -> &SharedMessageBus {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageBus;
    use crate::queue::InMemoryTaskQueue;
    use crate::state::MemoryStore;

    fn test_orchestrator() -> CouncilOrchestrator {
        CouncilOrchestrator::new(
            MessageBus::new().shared(),
            MemoryStore::shared(),
            InMemoryTaskQueue::shared(),
            CouncilConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_reviewers_resolved_from_change_type() {
        let orchestrator = test_orchestrator();

        let signoff = orchestrator
            .request_signoff(SignoffRequest::new("novel", "chapter-draft", "Chapter 3"))
            .await
            .unwrap();

        assert_eq!(signoff.required_agents, vec!["reviewer", "curator"]);
        assert_eq!(signoff.strictness, Strictness::Advisory);
        assert_eq!(signoff.status, SignoffStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_change_type_has_no_reviewers() {
        let orchestrator = test_orchestrator();

        let result = orchestrator
            .request_signoff(SignoffRequest::new("novel", "unheard-of", "Mystery"))
            .await;

        assert!(matches!(result, Err(OrchestratorError::NoReviewers(_))));
    }

    #[tokio::test]
    async fn test_project_config_filters_reviewers_and_sets_strictness() {
        let orchestrator = test_orchestrator();
        orchestrator
            .set_project_config(
                ProjectCouncilConfig::new("novel")
                    .with_enabled_agents(vec!["curator".to_string()])
                    .with_strictness(Strictness::Blocking),
            )
            .await
            .unwrap();

        let signoff = orchestrator
            .request_signoff(SignoffRequest::new("novel", "chapter-draft", "Chapter 3"))
            .await
            .unwrap();

        assert_eq!(signoff.required_agents, vec!["curator"]);
        assert_eq!(signoff.strictness, Strictness::Blocking);

        // An explicit strictness on the request still wins
        let explicit = orchestrator
            .request_signoff(
                SignoffRequest::new("novel", "chapter-draft", "Chapter 4")
                    .with_strictness(Strictness::Required),
            )
            .await
            .unwrap();
        assert_eq!(explicit.strictness, Strictness::Required);
    }

    #[tokio::test]
    async fn test_project_filter_removing_everyone_is_an_error() {
        let orchestrator = test_orchestrator();
        orchestrator
            .set_project_config(
                ProjectCouncilConfig::new("novel")
                    .with_enabled_agents(vec!["nobody".to_string()]),
            )
            .await
            .unwrap();

        let result = orchestrator
            .request_signoff(SignoffRequest::new("novel", "chapter-draft", "Chapter 3"))
            .await;

        assert!(matches!(result, Err(OrchestratorError::NoReviewers(_))));
    }

    #[tokio::test]
    async fn test_session_transitions() {
        let orchestrator = test_orchestrator();

        let session = orchestrator.start_session(Some("novel")).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);

        // Resuming an active session is invalid
        let invalid = orchestrator.resume_session(&session.id).await;
        assert!(matches!(
            invalid,
            Err(OrchestratorError::InvalidStateTransition { .. })
        ));

        let paused = orchestrator.pause_session(&session.id).await.unwrap();
        assert_eq!(paused.status, SessionStatus::Paused);

        let resumed = orchestrator.resume_session(&session.id).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);

        let ended = orchestrator.end_session(&session.id, None).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);

        // Completed is terminal
        let after_end = orchestrator.pause_session(&session.id).await;
        assert!(matches!(
            after_end,
            Err(OrchestratorError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_start_session_reuses_active() {
        let orchestrator = test_orchestrator();

        let first = orchestrator.start_session(Some("novel")).await.unwrap();
        let second = orchestrator.start_session(Some("novel")).await.unwrap();
        assert_eq!(first.id, second.id);

        orchestrator.end_session(&first.id, None).await.unwrap();
        let third = orchestrator.start_session(Some("novel")).await.unwrap();
        assert_ne!(first.id, third.id);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let orchestrator = test_orchestrator();
        orchestrator.initialize().await.unwrap();
        orchestrator.initialize().await.unwrap();
        orchestrator.shutdown().await.unwrap();
    }
}
