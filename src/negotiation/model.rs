//! Negotiation thread models and status machine

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which hand-off the acceptance was for, carried into completion so the
/// right statistics are credited when both sides confirm.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AcceptedModality {
    Gift,
    Trade,
}

/// What the owner wants done with the listing once a loan comes back
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoanDisposition {
    Relist,
    Archive,
}

/// Terminal outcome of a resolved negotiation
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Resolution {
    Gifted,
    Traded,
    LoanReturned { relisted: bool },
}

/// Negotiation thread status.
///
/// Completion flags live inside the variant they belong to, so a declined
/// thread with a completion flag set is unrepresentable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Open negotiation; every transition starts here
    Active,
    /// Owner accepted a gift or trade; awaiting dual completion
    Accepted {
        modality: AcceptedModality,
        owner_completed: bool,
        requester_completed: bool,
    },
    /// Owner accepted a loan; awaiting dual return confirmation
    OnLoan {
        due_date: DateTime<Utc>,
        owner_confirmed_return: bool,
        requester_confirmed_return: bool,
        /// Recorded with the owner's confirmation; applied when the second
        /// confirmation lands
        owner_disposition: Option<LoanDisposition>,
    },
    DeclinedByOwner,
    CancelledByRequester,
    /// Requester acknowledged a decline or a lost race; terminal
    Dismissed,
    /// Another thread on the same listing was accepted
    GivenToOther,
    /// Both sides confirmed; kept for history
    Resolved { outcome: Resolution },
}

impl ThreadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ThreadStatus::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ThreadStatus::Dismissed
                | ThreadStatus::DeclinedByOwner
                | ThreadStatus::CancelledByRequester
                | ThreadStatus::GivenToOther
                | ThreadStatus::Resolved { .. }
        )
    }

    /// A thread the requester may dismiss from
    pub fn is_dismissable(&self) -> bool {
        matches!(
            self,
            ThreadStatus::DeclinedByOwner | ThreadStatus::GivenToOther
        )
    }
}

/// Side of a negotiation an actor is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Owner,
    Requester,
}

/// The negotiation between a listing's owner and one interested requester
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NegotiationThread {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub owner_id: Uuid,
    pub requester_id: Uuid,
    pub status: ThreadStatus,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Unread message count per participant
    pub unread: HashMap<Uuid, u32>,
    /// Optimistic concurrency token; bumped by the store on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NegotiationThread {
    /// Create a fresh active thread for a (listing, requester) pair
    pub fn open(listing_id: Uuid, owner_id: Uuid, requester_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            listing_id,
            owner_id,
            requester_id,
            status: ThreadStatus::Active,
            last_message_at: None,
            unread: HashMap::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn role_of(&self, user_id: Uuid) -> Option<ParticipantRole> {
        if user_id == self.owner_id {
            Some(ParticipantRole::Owner)
        } else if user_id == self.requester_id {
            Some(ParticipantRole::Requester)
        } else {
            None
        }
    }

    /// The other participant
    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self.role_of(user_id)? {
            ParticipantRole::Owner => Some(self.requester_id),
            ParticipantRole::Requester => Some(self.owner_id),
        }
    }

    /// Read-time overdue check for loans. Never drives a transition; it only
    /// feeds notification and UI emphasis.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(
            self.status,
            ThreadStatus::OnLoan { due_date, .. } if due_date < now
        )
    }
}

/// Loan length the owner offers on acceptance
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoanTerms {
    Days30,
    Days60,
    Days90,
    Until { date: DateTime<Utc> },
}

impl LoanTerms {
    /// Resolve the due date, validating explicit dates.
    ///
    /// Presets always succeed; an explicit date whose calendar day is not
    /// strictly after today's is rejected.
    pub fn due_date(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
        match self {
            LoanTerms::Days30 => Ok(now + Duration::days(30)),
            LoanTerms::Days60 => Ok(now + Duration::days(60)),
            LoanTerms::Days90 => Ok(now + Duration::days(90)),
            LoanTerms::Until { date } => {
                if date.date_naive() <= now.date_naive() {
                    Err("Explicit due date must be tomorrow or later".to_string())
                } else {
                    Ok(*date)
                }
            }
        }
    }
}
