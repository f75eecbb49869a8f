//! Signoff consensus protocol
//!
//! [`resolve`] is the pure decision function over the votes collected so
//! far; [`SignoffProtocol`] wires it to the store, the bus, and the event
//! stream. Votes arrive over time, so the protocol re-evaluates after every
//! vote and persists the first terminal outcome it reaches.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::messaging::{AgentId, AgentMessage, SharedMessageBus};
use crate::state::{
    AuditEntry, SharedCouncilStore, Signoff, SignoffStatus, StoreError, Strictness, VoteChoice,
};

use super::events::{CouncilEvent, CouncilEventBus};

/// Error type for signoff operations
#[derive(Debug, thiserror::Error)]
pub enum SignoffError {
    #[error("signoff not found: {0}")]
    SignoffNotFound(String),

    #[error("agent {agent_id} is not a required reviewer for signoff {signoff_id}")]
    VoteNotAllowed {
        signoff_id: String,
        agent_id: String,
    },

    #[error("signoff already resolved: {0}")]
    AlreadyResolved(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for signoff operations
pub type SignoffResult<T> = Result<T, SignoffError>;

/// Outcome of evaluating a signoff's votes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Not enough votes yet
    Pending,
    /// Consensus reached: approved
    Approved,
    /// Consensus reached: rejected
    Rejected,
}

/// Evaluate the votes collected so far against a strictness policy
///
/// Only votes from `required_agents` count; abstentions count as having
/// voted but neither approve nor reject.
///
/// - **Blocking**: any rejection rejects immediately; otherwise approval
///   requires unanimity.
/// - **Required**: a simple majority of approvals approves; once enough
///   rejections arrive that a majority is unreachable, rejects.
/// - **Advisory/None**: resolves only when every required agent has voted;
///   ties favor approval.
pub fn resolve(
    votes: &HashMap<AgentId, VoteChoice>,
    required_agents: &[AgentId],
    strictness: Strictness,
) -> Resolution {
    let required = strictness.required_approvals(required_agents.len());
    let approvals = required_agents
        .iter()
        .filter(|a| votes.get(*a) == Some(&VoteChoice::Approve))
        .count();
    let rejections = required_agents
        .iter()
        .filter(|a| votes.get(*a) == Some(&VoteChoice::Reject))
        .count();
    let voted = required_agents
        .iter()
        .filter(|a| votes.contains_key(*a))
        .count();

    match strictness {
        Strictness::Blocking => {
            if rejections > 0 {
                Resolution::Rejected
            } else if approvals >= required {
                Resolution::Approved
            } else {
                Resolution::Pending
            }
        }
        Strictness::Required => {
            if approvals >= required {
                Resolution::Approved
            } else if rejections > required_agents.len() - required {
                Resolution::Rejected
            } else {
                Resolution::Pending
            }
        }
        Strictness::Advisory | Strictness::None => {
            if voted == required_agents.len() {
                if approvals >= rejections {
                    Resolution::Approved
                } else {
                    Resolution::Rejected
                }
            } else {
                Resolution::Pending
            }
        }
    }
}

/// Signoff workflow over the store, the bus, and the event stream
pub struct SignoffProtocol {
    store: SharedCouncilStore,
    bus: SharedMessageBus,
    events: CouncilEventBus,
    request_timeout: Duration,
}

impl SignoffProtocol {
    /// Create a new signoff protocol
    pub fn new(
        store: SharedCouncilStore,
        bus: SharedMessageBus,
        events: CouncilEventBus,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            bus,
            events,
            request_timeout,
        }
    }

    /// Ask every required agent to review, without blocking creation
    ///
    /// Each dispatch runs in its own task; a failure (unknown agent,
    /// timeout, agent error) is logged and the signoff stays pending
    /// regardless — it can still resolve from the agents that did respond.
    pub fn dispatch_review_requests(&self, signoff: &Signoff) {
        for agent_id in &signoff.required_agents {
            let bus = self.bus.clone();
            let agent_id = agent_id.clone();
            let timeout = self.request_timeout;
            let message = AgentMessage::new(
                "council",
                agent_id.clone(),
                "review-signoff",
                json!({
                    "signoff_id": signoff.id,
                    "project_id": signoff.project_id,
                    "change_type": signoff.change_type,
                    "change_id": signoff.change_id,
                    "title": signoff.title,
                    "strictness": signoff.strictness,
                }),
            );
            let signoff_id = signoff.id.clone();

            tokio::spawn(async move {
                match bus.request(&agent_id, message, timeout).await {
                    Ok(response) if response.success => {
                        debug!(signoff_id = %signoff_id, agent_id = %agent_id, "Review request acknowledged");
                    }
                    Ok(response) => {
                        warn!(
                            signoff_id = %signoff_id,
                            agent_id = %agent_id,
                            error = response.error.as_deref().unwrap_or("unknown"),
                            "Review request failed"
                        );
                    }
                    Err(error) => {
                        warn!(
                            signoff_id = %signoff_id,
                            agent_id = %agent_id,
                            "Review request dispatch failed: {}",
                            error
                        );
                    }
                }
            });
        }
    }

    /// Record a vote and re-evaluate the signoff
    ///
    /// Votes from agents outside `required_agents` are rejected; a repeated
    /// vote from the same agent overwrites the earlier one. The first
    /// terminal resolution is persisted with `resolved_at` and emitted as a
    /// `signoff:approved`/`signoff:rejected` event.
    pub async fn submit_vote(
        &self,
        signoff_id: &str,
        agent_id: &str,
        vote: VoteChoice,
    ) -> SignoffResult<Signoff> {
        let signoff = self
            .store
            .get_signoff(signoff_id)
            .await?
            .ok_or_else(|| SignoffError::SignoffNotFound(signoff_id.to_string()))?;

        if !signoff.requires_vote_from(agent_id) {
            return Err(SignoffError::VoteNotAllowed {
                signoff_id: signoff_id.to_string(),
                agent_id: agent_id.to_string(),
            });
        }
        if signoff.status.is_terminal() {
            return Err(SignoffError::AlreadyResolved(signoff_id.to_string()));
        }

        let mut signoff = self.store.record_vote(signoff_id, agent_id, vote).await?;
        debug!(
            signoff_id,
            agent_id,
            vote = %vote,
            approvals = signoff.approvals(),
            rejections = signoff.rejections(),
            "Vote recorded"
        );

        match resolve(&signoff.votes, &signoff.required_agents, signoff.strictness) {
            Resolution::Pending => Ok(signoff),
            Resolution::Approved => {
                signoff.status = SignoffStatus::Approved;
                signoff.resolved_at = Some(Utc::now());
                self.persist_resolution(&signoff).await?;

                info!(signoff_id, "Signoff approved");
                self.events.emit(CouncilEvent::SignoffApproved {
                    signoff_id: signoff.id.clone(),
                    approvals: signoff.approvals() as u32,
                    rejections: signoff.rejections() as u32,
                    timestamp: Utc::now(),
                });
                Ok(signoff)
            }
            Resolution::Rejected => {
                signoff.status = SignoffStatus::Rejected;
                signoff.resolved_at = Some(Utc::now());
                self.persist_resolution(&signoff).await?;

                info!(signoff_id, "Signoff rejected");
                self.events.emit(CouncilEvent::SignoffRejected {
                    signoff_id: signoff.id.clone(),
                    approvals: signoff.approvals() as u32,
                    rejections: signoff.rejections() as u32,
                    timestamp: Utc::now(),
                });
                Ok(signoff)
            }
        }
    }

    async fn persist_resolution(&self, signoff: &Signoff) -> SignoffResult<()> {
        self.store.put_signoff(signoff).await?;
        self.store
            .append_audit(AuditEntry::new(
                match signoff.status {
                    SignoffStatus::Approved => "signoff:approved",
                    SignoffStatus::Rejected => "signoff:rejected",
                    _ => "signoff:updated",
                },
                json!({
                    "signoff_id": signoff.id,
                    "approvals": signoff.approvals(),
                    "rejections": signoff.rejections(),
                }),
            ))
            .await?;
        Ok(())
    }
}
