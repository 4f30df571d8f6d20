//! Centralized error handling for the exchange engine
//!
//! Every public coordinator operation returns [`EngineError`]. All variants
//! except `Store` are recoverable and user-facing: the caller should surface
//! the message and let the user retry or refresh.

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Engine error type with stable error codes for API layers
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Cannot express interest in your own listing")]
    SelfInterest,

    #[error("Invalid loan terms: {0}")]
    InvalidLoanTerms(String),

    #[error("This side has already confirmed completion")]
    AlreadyCompleted,

    #[error("Proposed listing {0} is no longer available")]
    ProposalTargetUnavailable(Uuid),

    #[error("State changed since last read: {0}")]
    StaleState(String),

    #[error("User {0} is not a participant in this negotiation")]
    NotParticipant(Uuid),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage backend error: {0}")]
    Store(String),
}

impl EngineError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::SelfInterest => "SELF_INTEREST",
            EngineError::InvalidLoanTerms(_) => "INVALID_LOAN_TERMS",
            EngineError::AlreadyCompleted => "ALREADY_COMPLETED",
            EngineError::ProposalTargetUnavailable(_) => "PROPOSAL_TARGET_UNAVAILABLE",
            EngineError::StaleState(_) => "STALE_STATE",
            EngineError::NotParticipant(_) => "NOT_PARTICIPANT",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::Store(_) => "STORE_ERROR",
        }
    }

    /// Whether the caller can recover by refreshing state and retrying
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Store(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Conflict(what) => EngineError::StaleState(what),
            StoreError::Backend(msg) => EngineError::Store(msg),
        }
    }
}

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;
