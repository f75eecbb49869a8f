//! Durable entities of the council: sessions, proposals, signoffs, config
//!
//! These are the types the external store persists; the orchestrator holds
//! no copy of them beyond what flows through a single call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::messaging::AgentId;

/// Unique identifier for council sessions
pub type SessionId = String;

/// Unique identifier for proposals
pub type ProposalId = String;

/// Unique identifier for signoffs
pub type SignoffId = String;

/// Project scope identifier
pub type ProjectId = String;

/// Lifecycle state of a council session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting and running tasks
    Active,
    /// Temporarily suspended, resumable
    Paused,
    /// Ended; terminal
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A unit-of-work window grouping tasks for a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilSession {
    /// Unique session identifier
    pub id: SessionId,

    /// Project this session belongs to
    pub project_id: Option<ProjectId>,

    /// Current lifecycle state
    pub status: SessionStatus,

    /// When the session started
    pub started_at: DateTime<Utc>,

    /// When the session ended
    pub ended_at: Option<DateTime<Utc>>,

    /// Closing summary, set at end time
    pub summary: Option<String>,

    /// Ids of tasks assigned during this session
    pub task_ids: Vec<String>,

    /// Total tasks, computed when the session ends
    pub task_count: u32,

    /// Completed tasks, computed when the session ends
    pub completed_count: u32,

    /// Failed tasks, computed when the session ends
    pub failed_count: u32,
}

impl CouncilSession {
    /// Create a new active session
    pub fn new(project_id: Option<ProjectId>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            summary: None,
            task_ids: Vec::new(),
            task_count: 0,
            completed_count: 0,
            failed_count: 0,
        }
    }

    /// Associate a task with this session
    pub fn add_task(&mut self, task_id: impl Into<String>) {
        self.task_ids.push(task_id.into());
    }

    /// Whether the session is active
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

/// Lifecycle state of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Awaiting an explicit decision
    Pending,
    /// Approved by a decider
    Approved,
    /// Rejected by a decider
    Rejected,
    /// Approved automatically because no approval was required
    Auto,
    /// Expired before a decision was made
    Expired,
}

impl ProposalStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }
}

/// How urgently a proposal needs a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// An agent's request to take an action, optionally gated by approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Unique proposal identifier
    pub id: ProposalId,

    /// Agent that submitted the proposal
    pub agent_id: AgentId,

    /// Project scope
    pub project_id: Option<ProjectId>,

    /// Kind of action proposed (e.g. `"rewrite-chapter"`)
    pub action_type: String,

    /// Short human-readable title
    pub title: String,

    /// Longer description
    pub description: Option<String>,

    /// Structured action payload
    pub payload: Option<Value>,

    /// Current lifecycle state
    pub status: ProposalStatus,

    /// Whether an explicit decision is required
    pub requires_approval: bool,

    /// Decision urgency
    pub urgency: Urgency,

    /// Submission timestamp
    pub created_at: DateTime<Utc>,

    /// Deadline after which a pending proposal expires
    pub expires_at: Option<DateTime<Utc>>,

    /// When the decision was made
    pub decided_at: Option<DateTime<Utc>>,

    /// Who made the decision
    pub decided_by: Option<String>,
}

impl Proposal {
    /// Create a new proposal
    ///
    /// When no approval is required the proposal starts in `Auto`; a
    /// `Pending` state is never observed for it.
    pub fn new(
        agent_id: impl Into<AgentId>,
        action_type: impl Into<String>,
        title: impl Into<String>,
        requires_approval: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            project_id: None,
            action_type: action_type.into(),
            title: title.into(),
            description: None,
            payload: None,
            status: if requires_approval {
                ProposalStatus::Pending
            } else {
                ProposalStatus::Auto
            },
            requires_approval,
            urgency: Urgency::default(),
            created_at: Utc::now(),
            expires_at: None,
            decided_at: None,
            decided_by: None,
        }
    }

    /// Set the project scope
    pub fn with_project(mut self, project_id: impl Into<ProjectId>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the action payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Set the urgency
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    /// Set the expiry deadline
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether a pending proposal has passed its deadline
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Pending
            && self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// A single vote on a signoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

impl std::fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteChoice::Approve => write!(f, "approve"),
            VoteChoice::Reject => write!(f, "reject"),
            VoteChoice::Abstain => write!(f, "abstain"),
        }
    }
}

/// Consensus policy governing how signoff votes are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strictness {
    /// Votes are informational; resolved like advisory
    None,
    /// Resolves once everyone voted, ties favor approval
    #[default]
    Advisory,
    /// Simple majority approves; enough rejections reject early
    Required,
    /// Unanimity required; a single rejection rejects immediately
    Blocking,
}

impl Strictness {
    /// Approvals needed to approve a signoff with this many required agents
    ///
    /// Blocking demands unanimity; every other level a simple majority
    /// (ceil of half).
    pub fn required_approvals(&self, required_agents: usize) -> usize {
        match self {
            Strictness::Blocking => required_agents,
            _ => required_agents.div_ceil(2),
        }
    }
}

impl std::fmt::Display for Strictness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strictness::None => write!(f, "none"),
            Strictness::Advisory => write!(f, "advisory"),
            Strictness::Required => write!(f, "required"),
            Strictness::Blocking => write!(f, "blocking"),
        }
    }
}

/// Lifecycle state of a signoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignoffStatus {
    /// Still collecting votes
    Pending,
    /// Consensus reached: approved
    Approved,
    /// Consensus reached: rejected
    Rejected,
    /// Expired before consensus
    Expired,
}

impl SignoffStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignoffStatus::Pending)
    }
}

/// A consensus vote among required agents on whether a change may proceed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signoff {
    /// Unique signoff identifier
    pub id: SignoffId,

    /// Project the change belongs to
    pub project_id: ProjectId,

    /// Kind of change under review (e.g. `"chapter-draft"`)
    pub change_type: String,

    /// Identifier of the concrete change, if any
    pub change_id: Option<String>,

    /// Short human-readable title
    pub title: String,

    /// Agents whose votes count, in reviewer-list order
    pub required_agents: Vec<AgentId>,

    /// Recorded votes; a later vote from the same agent overwrites
    pub votes: HashMap<AgentId, VoteChoice>,

    /// Current lifecycle state
    pub status: SignoffStatus,

    /// Consensus policy for this signoff
    pub strictness: Strictness,

    /// When the signoff was requested
    pub requested_at: DateTime<Utc>,

    /// Deadline after which a pending signoff expires
    pub expires_at: Option<DateTime<Utc>>,

    /// When consensus was reached
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Signoff {
    /// Create a new pending signoff
    pub fn new(
        project_id: impl Into<ProjectId>,
        change_type: impl Into<String>,
        title: impl Into<String>,
        required_agents: Vec<AgentId>,
        strictness: Strictness,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            change_type: change_type.into(),
            change_id: None,
            title: title.into(),
            required_agents,
            votes: HashMap::new(),
            status: SignoffStatus::Pending,
            strictness,
            requested_at: Utc::now(),
            expires_at: None,
            resolved_at: None,
        }
    }

    /// Set the concrete change identifier
    pub fn with_change_id(mut self, change_id: impl Into<String>) -> Self {
        self.change_id = Some(change_id.into());
        self
    }

    /// Set the expiry deadline
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether an agent's vote counts toward this signoff
    pub fn requires_vote_from(&self, agent_id: &str) -> bool {
        self.required_agents.iter().any(|a| a == agent_id)
    }

    /// Record a vote, overwriting any earlier vote from the same agent
    pub fn record_vote(&mut self, agent_id: impl Into<AgentId>, vote: VoteChoice) {
        self.votes.insert(agent_id.into(), vote);
    }

    /// Number of approval votes from required agents
    pub fn approvals(&self) -> usize {
        self.required_agents
            .iter()
            .filter(|a| self.votes.get(*a) == Some(&VoteChoice::Approve))
            .count()
    }

    /// Number of rejection votes from required agents
    pub fn rejections(&self) -> usize {
        self.required_agents
            .iter()
            .filter(|a| self.votes.get(*a) == Some(&VoteChoice::Reject))
            .count()
    }

    /// Whether every required agent has voted
    pub fn all_voted(&self) -> bool {
        self.required_agents
            .iter()
            .all(|a| self.votes.contains_key(a))
    }

    /// Whether a pending signoff has passed its deadline
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SignoffStatus::Pending
            && self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Per-project council policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCouncilConfig {
    /// Project this policy applies to
    pub project_id: ProjectId,

    /// Agents allowed to participate; empty means no restriction
    pub enabled_agents: Vec<AgentId>,

    /// Default strictness for signoffs in this project
    pub signoff_strictness: Option<Strictness>,
}

impl ProjectCouncilConfig {
    /// Create an unrestricted config for a project
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            enabled_agents: Vec::new(),
            signoff_strictness: None,
        }
    }

    /// Restrict participation to the given agents
    pub fn with_enabled_agents(mut self, agents: Vec<AgentId>) -> Self {
        self.enabled_agents = agents;
        self
    }

    /// Set the default signoff strictness
    pub fn with_strictness(mut self, strictness: Strictness) -> Self {
        self.signoff_strictness = Some(strictness);
        self
    }
}
