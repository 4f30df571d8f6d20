//! Persistence capability
//!
//! The engine consumes CRUD plus a small set of atomic conditional
//! operations; it implements no production persistence of its own. A backing
//! store maps these onto transactions or conditional updates.
//! [`memory::MemoryStore`] is the in-process reference implementation.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::interest::Interest;
use crate::listing::{AgreedExchange, Listing, ListingStatus};
use crate::message::Message;
use crate::negotiation::{NegotiationThread, ThreadStatus};
use crate::proposal::Proposal;

/// Storage error type
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// A conditional write found the precondition no longer holding
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Result type alias using StoreError
pub type StoreResult<T> = Result<T, StoreError>;

/// The full acceptance side-effect bundle, applied atomically.
///
/// Accepting a thread must move the listing out of `Active`, displace every
/// active thread on any listing the commit settles, and for trades link both
/// paired listings. Either all of it happens or none of it does.
#[derive(Debug, Clone)]
pub struct AcceptanceCommit {
    pub listing_id: Uuid,
    pub winner_thread_id: Uuid,
    /// Status the winning thread moves to (`Accepted { .. }` or `OnLoan { .. }`)
    pub winner_status: ThreadStatus,
    /// For trades: the requester's paired listing, also moved to
    /// `PendingResolution`; must be `Active` at commit time
    pub counter_listing_id: Option<Uuid>,
    /// Reciprocal trade links, written per listing
    pub agreed_exchange: Vec<(Uuid, AgreedExchange)>,
}

/// What an acceptance commit changed
#[derive(Debug)]
pub struct AcceptanceApplied {
    /// Active threads on the settled listings (the winner's listing and, for
    /// trades, the counter listing) moved to `GivenToOther`, returned so
    /// their requesters can be notified
    pub displaced: Vec<NegotiationThread>,
}

/// Persistence capability consumed by the coordinator.
///
/// Implementations must make `commit_acceptance` and
/// `update_listing_status_if` linearizable per listing, and `update_thread`
/// a compare-and-swap on the thread's `version` field (bumped on every
/// successful write, `Conflict` on mismatch).
#[async_trait]
pub trait ExchangeStore: Send + Sync {
    // Listings
    async fn insert_listing(&self, listing: Listing) -> StoreResult<()>;
    async fn get_listing(&self, id: Uuid) -> StoreResult<Option<Listing>>;
    async fn listings_for_owner(&self, owner_id: Uuid) -> StoreResult<Vec<Listing>>;
    /// Conditional status update; `Ok(false)` when the listing exists but its
    /// status was not `expected`
    async fn update_listing_status_if(
        &self,
        id: Uuid,
        expected: ListingStatus,
        new: ListingStatus,
    ) -> StoreResult<bool>;

    // Threads
    async fn insert_thread(&self, thread: NegotiationThread) -> StoreResult<()>;
    async fn get_thread(&self, id: Uuid) -> StoreResult<Option<NegotiationThread>>;
    /// Version-checked write of the whole record
    async fn update_thread(&self, thread: NegotiationThread) -> StoreResult<()>;
    async fn thread_for_listing_and_requester(
        &self,
        listing_id: Uuid,
        requester_id: Uuid,
    ) -> StoreResult<Option<NegotiationThread>>;
    async fn threads_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<NegotiationThread>>;
    async fn threads_on_loan(&self) -> StoreResult<Vec<NegotiationThread>>;

    /// Apply the single-winner acceptance bundle atomically.
    ///
    /// Fails with `Conflict` when the listing (or counter listing) is no
    /// longer `Active`, or the winning thread left `Active`: the caller lost
    /// the race.
    async fn commit_acceptance(&self, commit: AcceptanceCommit) -> StoreResult<AcceptanceApplied>;

    // Interests
    async fn insert_interest(&self, interest: Interest) -> StoreResult<()>;
    async fn interests_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Interest>>;

    // Proposals
    async fn insert_proposal(&self, proposal: Proposal) -> StoreResult<()>;
    async fn get_proposal(&self, id: Uuid) -> StoreResult<Option<Proposal>>;
    async fn update_proposal(&self, proposal: Proposal) -> StoreResult<()>;
    async fn pending_proposal_for_thread(&self, thread_id: Uuid)
        -> StoreResult<Option<Proposal>>;

    // Messages
    async fn insert_message(&self, message: Message) -> StoreResult<()>;
    async fn messages_for_thread(&self, thread_id: Uuid) -> StoreResult<Vec<Message>>;
}
