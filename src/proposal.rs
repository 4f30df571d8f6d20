//! Trade proposal models
//!
//! Inside a trade negotiation the owner selects which of the requester's own
//! listings they want in return. At most one proposal per thread is pending;
//! a newer proposal supersedes the pending one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proposal lifecycle status
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Declined,
    /// Replaced by a newer proposal on the same thread
    Superseded,
}

/// An owner's selection of a counter-listing to swap for
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Proposal {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    /// The owner's original listing
    pub offered_listing_id: Uuid,
    /// The requester's listing the owner selected
    pub requested_listing_id: Uuid,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(
        thread_id: Uuid,
        sender_id: Uuid,
        offered_listing_id: Uuid,
        requested_listing_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            thread_id,
            sender_id,
            offered_listing_id,
            requested_listing_id,
            status: ProposalStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }
}

/// Requester's answer to a pending proposal
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProposalDecision {
    Accept,
    Decline,
}
