//! Listing models and data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the owner wants to hand the book off
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Gift,
    Trade,
    Loan,
}

/// Listing lifecycle status
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ListingStatus {
    /// Open for interest and negotiation
    Active,
    /// A negotiation has been accepted; awaiting dual completion
    PendingResolution,
    /// Handed off (or withdrawn); no longer negotiable
    Archived,
}

/// The paired listing agreed on when a trade is accepted.
///
/// Set reciprocally on both listings by the coordinator, never by callers.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AgreedExchange {
    pub counterparty_user_id: Uuid,
    pub counterparty_listing_id: Uuid,
}

/// A book posting
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Listing {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub modality: Modality,
    /// Suggested loan length offered with the listing (loan modality only)
    pub loan_duration_days: Option<u32>,
    pub status: ListingStatus,
    pub agreed_exchange: Option<AgreedExchange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_active(&self) -> bool {
        self.status == ListingStatus::Active
    }
}

/// Request DTO for creating a listing
#[derive(Debug, Deserialize, Clone)]
pub struct CreateListingRequest {
    pub owner_id: Uuid,
    pub title: String,
    pub modality: Modality,
    pub loan_duration_days: Option<u32>,
}

impl CreateListingRequest {
    /// Validate request
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("Title must not be empty".to_string());
        }
        match (self.modality, self.loan_duration_days) {
            (Modality::Loan, None) => {
                Err("Loan listings require a loan duration".to_string())
            }
            (Modality::Loan, Some(0)) => {
                Err("Loan duration must be greater than 0".to_string())
            }
            (Modality::Gift | Modality::Trade, Some(_)) => {
                Err("Only loan listings may carry a loan duration".to_string())
            }
            _ => Ok(()),
        }
    }
}
