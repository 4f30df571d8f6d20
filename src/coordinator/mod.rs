//! Exchange coordinator - business logic for the hand-off lifecycle
//!
//! The coordinator is the only component other code calls into. It owns the
//! cross-entity invariants: the single-winner rule on acceptance, the
//! reciprocal trade links, and the exactly-once resolution side effects.
//! Store, notifier, and statistics sink are injected; the coordinator holds
//! no state of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::completion::{self, Completion};
use crate::error::{EngineError, EngineResult};
use crate::interest::{self, Interest, InterestSummary};
use crate::listing::{AgreedExchange, CreateListingRequest, Listing, ListingStatus, Modality};
use crate::message::Message;
use crate::negotiation::{
    AcceptedModality, LoanDisposition, LoanTerms, NegotiationThread, ParticipantRole, Resolution,
    ThreadStatus,
};
use crate::notify::{Notifier, NotifyEvent, NotifyKind};
use crate::proposal::{Proposal, ProposalDecision, ProposalStatus};
use crate::stats::{StatCounter, StatsSink};
use crate::store::{AcceptanceApplied, AcceptanceCommit, ExchangeStore, StoreError};

/// Attempts for version-checked thread writes that can race with the other
/// participant. The loser of a benign race re-reads and retries.
const WRITE_RETRIES: usize = 3;

/// Coordinator for the exchange lifecycle
pub struct Coordinator {
    store: Arc<dyn ExchangeStore>,
    notifier: Arc<dyn Notifier>,
    stats: Arc<dyn StatsSink>,
}

impl Coordinator {
    /// Create a new coordinator with injected collaborators
    pub fn new(
        store: Arc<dyn ExchangeStore>,
        notifier: Arc<dyn Notifier>,
        stats: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            store,
            notifier,
            stats,
        }
    }

    // ===== Listings =====

    /// Create a listing
    pub async fn create_listing(&self, request: CreateListingRequest) -> EngineResult<Listing> {
        request.validate().map_err(EngineError::Validation)?;

        let now = Utc::now();
        let listing = Listing {
            id: Uuid::new_v4(),
            owner_id: request.owner_id,
            title: request.title,
            modality: request.modality,
            loan_duration_days: request.loan_duration_days,
            status: ListingStatus::Active,
            agreed_exchange: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_listing(listing.clone()).await?;

        tracing::info!(
            listing_id = %listing.id,
            modality = ?listing.modality,
            "Listing created"
        );
        Ok(listing)
    }

    /// Get a listing by id
    pub async fn listing(&self, id: Uuid) -> EngineResult<Option<Listing>> {
        Ok(self.store.get_listing(id).await?)
    }

    // ===== Interest registry =====

    /// Express interest in a listing, opening a negotiation thread.
    ///
    /// Idempotent per (listing, user): a repeat call returns the existing
    /// thread whatever its status.
    pub async fn express_interest(
        &self,
        listing_id: Uuid,
        user_id: Uuid,
    ) -> EngineResult<NegotiationThread> {
        let listing = self.require_listing(listing_id).await?;
        if listing.owner_id == user_id {
            return Err(EngineError::SelfInterest);
        }

        if let Some(existing) = self
            .store
            .thread_for_listing_and_requester(listing_id, user_id)
            .await?
        {
            return Ok(existing);
        }

        if !listing.is_active() {
            return Err(EngineError::StaleState(
                "listing is not open for interest".to_string(),
            ));
        }

        let thread = NegotiationThread::open(listing_id, listing.owner_id, user_id);
        self.store.insert_thread(thread.clone()).await?;
        self.store
            .insert_interest(Interest {
                id: thread.id,
                listing_id,
                interested_user_id: user_id,
                created_at: thread.created_at,
            })
            .await?;

        self.notify_best_effort(NotifyEvent::new(
            NotifyKind::BookRequested,
            listing.owner_id,
            json!({
                "listing_id": listing_id,
                "title": listing.title,
                "requester_id": user_id,
                "thread_id": thread.id,
            }),
        ))
        .await;

        tracing::info!(
            listing_id = %listing_id,
            thread_id = %thread.id,
            "Interest expressed"
        );
        Ok(thread)
    }

    /// Aggregate open interest across an owner's listings.
    ///
    /// Recomputed on every call; only threads still active count.
    pub async fn interest_summary(&self, owner_id: Uuid) -> EngineResult<InterestSummary> {
        let mut open = Vec::new();
        for listing in self.store.listings_for_owner(owner_id).await? {
            let threads = self.store.threads_for_listing(listing.id).await?;
            let active: Vec<Uuid> = threads
                .iter()
                .filter(|t| t.status.is_active())
                .map(|t| t.id)
                .collect();
            if active.is_empty() {
                continue;
            }
            for interest in self.store.interests_for_listing(listing.id).await? {
                if active.contains(&interest.id) {
                    open.push(interest);
                }
            }
        }
        Ok(interest::summarize(open))
    }

    // ===== Acceptance =====

    /// Owner accepts a gift negotiation
    pub async fn accept_gift(
        &self,
        thread_id: Uuid,
        owner_id: Uuid,
    ) -> EngineResult<NegotiationThread> {
        let (thread, listing) = self.owner_acceptance_context(thread_id, owner_id).await?;
        match listing.modality {
            Modality::Gift => {}
            Modality::Trade => {
                return Err(EngineError::Validation(
                    "Trade listings are accepted by responding to a proposal".to_string(),
                ))
            }
            Modality::Loan => {
                return Err(EngineError::Validation(
                    "Loan listings are accepted with offer_loan or convert_loan_to_gift"
                        .to_string(),
                ))
            }
        }
        self.accept_as_gift(thread, listing).await
    }

    /// Owner converts a loan negotiation into an outright gift ("give
    /// forever"). Legal only before a loan acceptance is finalized; skips
    /// due-date logic entirely.
    pub async fn convert_loan_to_gift(
        &self,
        thread_id: Uuid,
        owner_id: Uuid,
    ) -> EngineResult<NegotiationThread> {
        let (thread, listing) = self.owner_acceptance_context(thread_id, owner_id).await?;
        if listing.modality != Modality::Loan {
            return Err(EngineError::Validation(
                "Only loan listings can be converted to a gift".to_string(),
            ));
        }
        tracing::info!(thread_id = %thread.id, "Loan offer converted to outright gift");
        self.accept_as_gift(thread, listing).await
    }

    /// Owner accepts a loan negotiation with the given terms
    pub async fn offer_loan(
        &self,
        thread_id: Uuid,
        owner_id: Uuid,
        terms: LoanTerms,
    ) -> EngineResult<NegotiationThread> {
        let (thread, listing) = self.owner_acceptance_context(thread_id, owner_id).await?;
        if listing.modality != Modality::Loan {
            return Err(EngineError::Validation(
                "Only loan listings can be offered as a loan".to_string(),
            ));
        }

        let due_date = terms
            .due_date(Utc::now())
            .map_err(EngineError::InvalidLoanTerms)?;

        self.commit_acceptance(AcceptanceCommit {
            listing_id: listing.id,
            winner_thread_id: thread.id,
            winner_status: ThreadStatus::OnLoan {
                due_date,
                owner_confirmed_return: false,
                requester_confirmed_return: false,
                owner_disposition: None,
            },
            counter_listing_id: None,
            agreed_exchange: vec![],
        })
        .await?;

        self.notify_best_effort(NotifyEvent::new(
            NotifyKind::LoanOffered,
            thread.requester_id,
            json!({ "thread_id": thread.id, "due_date": due_date }),
        ))
        .await;

        tracing::info!(
            thread_id = %thread.id,
            listing_id = %listing.id,
            due_date = %due_date,
            "Loan accepted"
        );
        self.require_thread(thread.id).await
    }

    // ===== Trade proposals =====

    /// Owner proposes one of the requester's listings to swap for.
    ///
    /// A pending proposal on the thread is superseded atomically; two pending
    /// proposals never coexist.
    pub async fn propose_trade(
        &self,
        thread_id: Uuid,
        owner_id: Uuid,
        requested_listing_id: Uuid,
    ) -> EngineResult<Proposal> {
        let (thread, listing) = self.owner_acceptance_context(thread_id, owner_id).await?;
        if listing.modality != Modality::Trade {
            return Err(EngineError::Validation(
                "Proposals only apply to trade listings".to_string(),
            ));
        }

        let target = self
            .store
            .get_listing(requested_listing_id)
            .await?
            .ok_or(EngineError::ProposalTargetUnavailable(requested_listing_id))?;
        if target.owner_id != thread.requester_id {
            return Err(EngineError::Validation(
                "Proposed listing must belong to the requester".to_string(),
            ));
        }
        if !target.is_active() {
            return Err(EngineError::ProposalTargetUnavailable(requested_listing_id));
        }

        if let Some(mut pending) = self.store.pending_proposal_for_thread(thread.id).await? {
            pending.status = ProposalStatus::Superseded;
            let superseded_id = pending.id;
            self.store.update_proposal(pending).await?;
            tracing::info!(
                thread_id = %thread.id,
                proposal_id = %superseded_id,
                "Pending proposal superseded"
            );
        }

        let proposal = Proposal::new(thread.id, owner_id, listing.id, target.id);
        self.store.insert_proposal(proposal.clone()).await?;

        self.notify_best_effort(NotifyEvent::new(
            NotifyKind::TradeProposal,
            thread.requester_id,
            json!({
                "thread_id": thread.id,
                "proposal_id": proposal.id,
                "requested_listing_id": target.id,
            }),
        ))
        .await;

        tracing::info!(
            thread_id = %thread.id,
            proposal_id = %proposal.id,
            "Trade proposal created"
        );
        Ok(proposal)
    }

    /// Requester answers a pending proposal.
    ///
    /// Accepting runs the full acceptance bundle with reciprocal exchange
    /// links on both listings; declining leaves the thread active for
    /// further negotiation.
    pub async fn respond_to_proposal(
        &self,
        thread_id: Uuid,
        proposal_id: Uuid,
        requester_id: Uuid,
        decision: ProposalDecision,
    ) -> EngineResult<NegotiationThread> {
        let thread = self.require_thread(thread_id).await?;
        if thread.role_of(requester_id) != Some(ParticipantRole::Requester) {
            return Err(EngineError::NotParticipant(requester_id));
        }
        if !thread.status.is_active() {
            return Err(EngineError::StaleState(
                "negotiation is no longer active".to_string(),
            ));
        }

        let mut proposal = self
            .store
            .get_proposal(proposal_id)
            .await?
            .filter(|p| p.thread_id == thread.id)
            .ok_or_else(|| EngineError::NotFound(format!("proposal {}", proposal_id)))?;
        if !proposal.is_pending() {
            return Err(EngineError::StaleState(
                "proposal is no longer pending".to_string(),
            ));
        }

        match decision {
            ProposalDecision::Decline => {
                proposal.status = ProposalStatus::Declined;
                self.store.update_proposal(proposal).await?;

                self.notify_best_effort(NotifyEvent::new(
                    NotifyKind::RequestDecision,
                    thread.owner_id,
                    json!({ "thread_id": thread.id, "decision": "proposal_declined" }),
                ))
                .await;

                tracing::info!(thread_id = %thread.id, "Trade proposal declined");
                Ok(thread)
            }
            ProposalDecision::Accept => {
                let listing = self.require_listing(thread.listing_id).await?;
                if !listing.is_active() {
                    return Err(EngineError::StaleState(
                        "listing is no longer active".to_string(),
                    ));
                }
                let target = self
                    .store
                    .get_listing(proposal.requested_listing_id)
                    .await?
                    .filter(|l| l.is_active())
                    .ok_or(EngineError::ProposalTargetUnavailable(
                        proposal.requested_listing_id,
                    ))?;

                self.commit_acceptance(AcceptanceCommit {
                    listing_id: listing.id,
                    winner_thread_id: thread.id,
                    winner_status: ThreadStatus::Accepted {
                        modality: AcceptedModality::Trade,
                        owner_completed: false,
                        requester_completed: false,
                    },
                    counter_listing_id: Some(target.id),
                    agreed_exchange: vec![
                        (
                            listing.id,
                            AgreedExchange {
                                counterparty_user_id: thread.requester_id,
                                counterparty_listing_id: target.id,
                            },
                        ),
                        (
                            target.id,
                            AgreedExchange {
                                counterparty_user_id: thread.owner_id,
                                counterparty_listing_id: listing.id,
                            },
                        ),
                    ],
                })
                .await?;

                proposal.status = ProposalStatus::Accepted;
                self.store.update_proposal(proposal).await?;

                self.notify_best_effort(NotifyEvent::new(
                    NotifyKind::RequestDecision,
                    thread.owner_id,
                    json!({ "thread_id": thread.id, "decision": "proposal_accepted" }),
                ))
                .await;

                tracing::info!(
                    thread_id = %thread.id,
                    listing_id = %listing.id,
                    counter_listing_id = %target.id,
                    "Trade accepted"
                );
                self.require_thread(thread.id).await
            }
        }
    }

    // ===== Declines and dismissals =====

    /// Owner declines an active negotiation
    pub async fn decline(&self, thread_id: Uuid, owner_id: Uuid) -> EngineResult<()> {
        self.close_active(
            thread_id,
            owner_id,
            ParticipantRole::Owner,
            ThreadStatus::DeclinedByOwner,
            "declined",
        )
        .await
    }

    /// Requester withdraws an active negotiation
    pub async fn cancel(&self, thread_id: Uuid, requester_id: Uuid) -> EngineResult<()> {
        self.close_active(
            thread_id,
            requester_id,
            ParticipantRole::Requester,
            ThreadStatus::CancelledByRequester,
            "cancelled",
        )
        .await
    }

    /// Requester acknowledges a decline or lost race; terminal, no
    /// notification
    pub async fn dismiss(&self, thread_id: Uuid, requester_id: Uuid) -> EngineResult<()> {
        let mut thread = self.require_thread(thread_id).await?;
        if thread.role_of(requester_id) != Some(ParticipantRole::Requester) {
            return Err(EngineError::NotParticipant(requester_id));
        }
        if !thread.status.is_dismissable() {
            return Err(EngineError::StaleState(
                "negotiation cannot be dismissed from its current state".to_string(),
            ));
        }
        thread.status = ThreadStatus::Dismissed;
        self.store.update_thread(thread).await?;

        tracing::info!(thread_id = %thread_id, "Negotiation dismissed");
        Ok(())
    }

    // ===== Completion =====

    /// Record one side's completion of an accepted gift or trade.
    ///
    /// The second confirmation runs the resolution side effects; the returned
    /// [`Completion`] tells the caller whether it is still waiting on the
    /// other party. A repeat call on a resolved thread gets
    /// [`EngineError::AlreadyCompleted`], after re-driving any side effects a
    /// failed earlier finalization left behind.
    pub async fn mark_complete(&self, thread_id: Uuid, actor_id: Uuid) -> EngineResult<Completion> {
        for _ in 0..WRITE_RETRIES {
            let mut thread = self.require_thread(thread_id).await?;
            let role = thread
                .role_of(actor_id)
                .ok_or(EngineError::NotParticipant(actor_id))?;

            if let ThreadStatus::Resolved { .. } = thread.status {
                self.reconcile_resolution(&thread).await?;
                return Err(EngineError::AlreadyCompleted);
            }

            let (completion, modality) = match &mut thread.status {
                ThreadStatus::Accepted {
                    modality,
                    owner_completed,
                    requester_completed,
                } => {
                    let modality = *modality;
                    let completion = match role {
                        ParticipantRole::Owner => {
                            completion::confirm_side(owner_completed, *requester_completed)
                        }
                        ParticipantRole::Requester => {
                            completion::confirm_side(requester_completed, *owner_completed)
                        }
                    }
                    .map_err(|_| EngineError::AlreadyCompleted)?;
                    (completion, modality)
                }
                _ => {
                    return Err(EngineError::StaleState(
                        "negotiation is not awaiting completion".to_string(),
                    ))
                }
            };

            if completion.both_completed {
                thread.status = ThreadStatus::Resolved {
                    outcome: match modality {
                        AcceptedModality::Gift => Resolution::Gifted,
                        AcceptedModality::Trade => Resolution::Traded,
                    },
                };
            }

            match self.store.update_thread(thread.clone()).await {
                Ok(()) => {
                    if completion.both_completed {
                        self.finalize_resolution(&thread).await?;
                    }
                    tracing::info!(
                        thread_id = %thread_id,
                        actor_id = %actor_id,
                        both_completed = completion.both_completed,
                        "Completion recorded"
                    );
                    return Ok(completion);
                }
                // raced with the other side; re-read and retry
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::StaleState(
            "negotiation kept changing concurrently".to_string(),
        ))
    }

    /// Record one side's confirmation that a loaned book came back.
    ///
    /// The owner states relist-vs-archive with their own confirmation; it is
    /// applied when the second confirmation lands and defaults to relisting.
    /// A repeat call on a resolved thread gets
    /// [`EngineError::AlreadyCompleted`], after re-driving any side effects a
    /// failed earlier finalization left behind.
    pub async fn confirm_return(
        &self,
        thread_id: Uuid,
        actor_id: Uuid,
        disposition: Option<LoanDisposition>,
    ) -> EngineResult<Completion> {
        for _ in 0..WRITE_RETRIES {
            let mut thread = self.require_thread(thread_id).await?;
            let role = thread
                .role_of(actor_id)
                .ok_or(EngineError::NotParticipant(actor_id))?;

            if let ThreadStatus::Resolved { .. } = thread.status {
                self.reconcile_resolution(&thread).await?;
                return Err(EngineError::AlreadyCompleted);
            }

            let (completion, relist) = match &mut thread.status {
                ThreadStatus::OnLoan {
                    owner_confirmed_return,
                    requester_confirmed_return,
                    owner_disposition,
                    ..
                } => {
                    if role == ParticipantRole::Owner {
                        if let Some(choice) = disposition {
                            *owner_disposition = Some(choice);
                        }
                    }
                    let completion = match role {
                        ParticipantRole::Owner => completion::confirm_side(
                            owner_confirmed_return,
                            *requester_confirmed_return,
                        ),
                        ParticipantRole::Requester => completion::confirm_side(
                            requester_confirmed_return,
                            *owner_confirmed_return,
                        ),
                    }
                    .map_err(|_| EngineError::AlreadyCompleted)?;
                    let relist = !matches!(owner_disposition, Some(LoanDisposition::Archive));
                    (completion, relist)
                }
                _ => {
                    return Err(EngineError::StaleState(
                        "negotiation is not an open loan".to_string(),
                    ))
                }
            };

            if completion.both_completed {
                thread.status = ThreadStatus::Resolved {
                    outcome: Resolution::LoanReturned { relisted: relist },
                };
            }

            match self.store.update_thread(thread.clone()).await {
                Ok(()) => {
                    if completion.both_completed {
                        self.finalize_resolution(&thread).await?;
                    }
                    tracing::info!(
                        thread_id = %thread_id,
                        actor_id = %actor_id,
                        both_completed = completion.both_completed,
                        "Return confirmation recorded"
                    );
                    return Ok(completion);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::StaleState(
            "negotiation kept changing concurrently".to_string(),
        ))
    }

    // ===== Messaging =====

    /// Post a message into a negotiation thread
    pub async fn post_message(
        &self,
        thread_id: Uuid,
        sender_id: Uuid,
        body: String,
    ) -> EngineResult<Message> {
        if body.trim().is_empty() {
            return Err(EngineError::Validation(
                "Message body must not be empty".to_string(),
            ));
        }

        let message = Message::new(thread_id, sender_id, body);
        for _ in 0..WRITE_RETRIES {
            let mut thread = self.require_thread(thread_id).await?;
            let role = thread
                .role_of(sender_id)
                .ok_or(EngineError::NotParticipant(sender_id))?;
            if thread.status.is_terminal() {
                return Err(EngineError::StaleState(
                    "negotiation is closed".to_string(),
                ));
            }
            let counterpart = match role {
                ParticipantRole::Owner => thread.requester_id,
                ParticipantRole::Requester => thread.owner_id,
            };

            thread.last_message_at = Some(message.sent_at);
            *thread.unread.entry(counterpart).or_insert(0) += 1;

            match self.store.update_thread(thread).await {
                Ok(()) => {
                    self.store.insert_message(message.clone()).await?;
                    self.notify_best_effort(NotifyEvent::new(
                        NotifyKind::NewMessage,
                        counterpart,
                        json!({
                            "thread_id": thread_id,
                            "message_id": message.id,
                            "sender_id": sender_id,
                        }),
                    ))
                    .await;
                    return Ok(message);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::StaleState(
            "negotiation kept changing concurrently".to_string(),
        ))
    }

    /// Zero a participant's unread counter
    pub async fn mark_read(&self, thread_id: Uuid, user_id: Uuid) -> EngineResult<()> {
        for _ in 0..WRITE_RETRIES {
            let mut thread = self.require_thread(thread_id).await?;
            if thread.role_of(user_id).is_none() {
                return Err(EngineError::NotParticipant(user_id));
            }
            thread.unread.insert(user_id, 0);
            match self.store.update_thread(thread).await {
                Ok(()) => return Ok(()),
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::StaleState(
            "negotiation kept changing concurrently".to_string(),
        ))
    }

    /// Messages of a thread, oldest first; participants only
    pub async fn messages(&self, thread_id: Uuid, user_id: Uuid) -> EngineResult<Vec<Message>> {
        let thread = self.require_thread(thread_id).await?;
        if thread.role_of(user_id).is_none() {
            return Err(EngineError::NotParticipant(user_id));
        }
        Ok(self.store.messages_for_thread(thread_id).await?)
    }

    // ===== Loans =====

    /// Loans whose due date has passed.
    ///
    /// Read-time derivation for notification and UI emphasis; never
    /// transitions a thread.
    pub async fn overdue_loans(&self, now: DateTime<Utc>) -> EngineResult<Vec<NegotiationThread>> {
        Ok(self
            .store
            .threads_on_loan()
            .await?
            .into_iter()
            .filter(|t| t.is_overdue(now))
            .collect())
    }

    /// Get a thread by id
    pub async fn thread(&self, id: Uuid) -> EngineResult<Option<NegotiationThread>> {
        Ok(self.store.get_thread(id).await?)
    }

    /// Get a proposal by id
    pub async fn proposal(&self, id: Uuid) -> EngineResult<Option<Proposal>> {
        Ok(self.store.get_proposal(id).await?)
    }

    // ===== Private helpers =====

    async fn require_listing(&self, id: Uuid) -> EngineResult<Listing> {
        self.store
            .get_listing(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("listing {}", id)))
    }

    async fn require_thread(&self, id: Uuid) -> EngineResult<NegotiationThread> {
        self.store
            .get_thread(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("thread {}", id)))
    }

    /// Re-read thread and listing for an owner-side acceptance action and
    /// check every precondition against current state.
    async fn owner_acceptance_context(
        &self,
        thread_id: Uuid,
        owner_id: Uuid,
    ) -> EngineResult<(NegotiationThread, Listing)> {
        let thread = self.require_thread(thread_id).await?;
        if thread.role_of(owner_id) != Some(ParticipantRole::Owner) {
            return Err(EngineError::NotParticipant(owner_id));
        }
        if !thread.status.is_active() {
            return Err(EngineError::StaleState(
                "negotiation is no longer active".to_string(),
            ));
        }
        let listing = self.require_listing(thread.listing_id).await?;
        if !listing.is_active() {
            return Err(EngineError::StaleState(
                "listing is no longer active".to_string(),
            ));
        }
        Ok((thread, listing))
    }

    /// Shared exit from `Active` for owner declines and requester
    /// cancellations
    async fn close_active(
        &self,
        thread_id: Uuid,
        actor_id: Uuid,
        required_role: ParticipantRole,
        new_status: ThreadStatus,
        decision: &str,
    ) -> EngineResult<()> {
        let mut thread = self.require_thread(thread_id).await?;
        if thread.role_of(actor_id) != Some(required_role) {
            return Err(EngineError::NotParticipant(actor_id));
        }
        if !thread.status.is_active() {
            return Err(EngineError::StaleState(
                "negotiation is no longer active".to_string(),
            ));
        }
        let counterpart = match required_role {
            ParticipantRole::Owner => thread.requester_id,
            ParticipantRole::Requester => thread.owner_id,
        };
        thread.status = new_status;
        self.store.update_thread(thread).await?;

        self.notify_best_effort(NotifyEvent::new(
            NotifyKind::RequestDecision,
            counterpart,
            json!({ "thread_id": thread_id, "decision": decision }),
        ))
        .await;

        tracing::info!(
            thread_id = %thread_id,
            decision = decision,
            "Negotiation closed"
        );
        Ok(())
    }

    /// Gift acceptance shared by gift listings and loan-to-gift conversion
    async fn accept_as_gift(
        &self,
        thread: NegotiationThread,
        listing: Listing,
    ) -> EngineResult<NegotiationThread> {
        self.commit_acceptance(AcceptanceCommit {
            listing_id: listing.id,
            winner_thread_id: thread.id,
            winner_status: ThreadStatus::Accepted {
                modality: AcceptedModality::Gift,
                owner_completed: false,
                requester_completed: false,
            },
            counter_listing_id: None,
            agreed_exchange: vec![],
        })
        .await?;

        self.notify_best_effort(NotifyEvent::new(
            NotifyKind::RequestDecision,
            thread.requester_id,
            json!({ "thread_id": thread.id, "decision": "accepted" }),
        ))
        .await;

        tracing::info!(
            thread_id = %thread.id,
            listing_id = %listing.id,
            "Gift accepted"
        );
        self.require_thread(thread.id).await
    }

    /// Run the store-side acceptance bundle and notify every displaced
    /// requester. Every transition that picks a listing's winner goes
    /// through here, so the notify-the-losers side effect cannot be skipped
    /// at a new call site.
    async fn commit_acceptance(
        &self,
        commit: AcceptanceCommit,
    ) -> EngineResult<AcceptanceApplied> {
        let applied = self.store.commit_acceptance(commit).await?;
        for loser in &applied.displaced {
            self.notify_best_effort(NotifyEvent::new(
                NotifyKind::RequestDecision,
                loser.requester_id,
                json!({ "thread_id": loser.id, "decision": "given_to_other" }),
            ))
            .await;
        }
        Ok(applied)
    }

    /// Re-run resolution side effects on a resolved thread whose listing was
    /// left behind by a finalization that failed midway. A fully settled
    /// listing means there is nothing to do.
    ///
    /// A relisted listing can be accepted again later, so the pending state
    /// only belongs to this thread when no newer negotiation on the listing
    /// has claimed it.
    async fn reconcile_resolution(&self, thread: &NegotiationThread) -> EngineResult<()> {
        let listing = self.require_listing(thread.listing_id).await?;
        if listing.status != ListingStatus::PendingResolution {
            return Ok(());
        }

        let claimed_by_newer = self
            .store
            .threads_for_listing(listing.id)
            .await?
            .into_iter()
            .any(|t| {
                t.id != thread.id
                    && match t.status {
                        ThreadStatus::Accepted { .. } | ThreadStatus::OnLoan { .. } => true,
                        ThreadStatus::Resolved { .. } => t.updated_at > thread.updated_at,
                        _ => false,
                    }
            });
        if claimed_by_newer {
            return Ok(());
        }

        tracing::warn!(
            thread_id = %thread.id,
            listing_id = %listing.id,
            "Resolved thread with an unsettled listing; re-running side effects"
        );
        self.finalize_resolution(thread).await
    }

    /// Dispatch resolution side effects from the thread's recorded outcome.
    ///
    /// Derives everything from the `Resolved` state so a failed run can be
    /// repeated later with the same result.
    async fn finalize_resolution(&self, thread: &NegotiationThread) -> EngineResult<()> {
        match &thread.status {
            ThreadStatus::Resolved { outcome } => match *outcome {
                Resolution::Gifted => self.finalize_exchange(thread, AcceptedModality::Gift).await,
                Resolution::Traded => self.finalize_exchange(thread, AcceptedModality::Trade).await,
                Resolution::LoanReturned { relisted } => {
                    self.finalize_loan(thread, relisted).await
                }
            },
            _ => Ok(()),
        }
    }

    /// Resolution side effects for gifts and trades.
    ///
    /// The owner's listing settles last and the statistics are gated on that
    /// write, so across repeats the credits land exactly once, from whichever
    /// run settles it.
    async fn finalize_exchange(
        &self,
        thread: &NegotiationThread,
        modality: AcceptedModality,
    ) -> EngineResult<()> {
        let listing = self.require_listing(thread.listing_id).await?;

        if modality == AcceptedModality::Trade {
            match listing.agreed_exchange {
                Some(link) => {
                    self.settle_listing(link.counterparty_listing_id, ListingStatus::Archived)
                        .await?;
                }
                None => {
                    tracing::error!(
                        listing_id = %listing.id,
                        "Accepted trade has no exchange link; data integrity bug"
                    );
                }
            }
        }

        if !self.settle_listing(listing.id, ListingStatus::Archived).await? {
            return Ok(());
        }

        match modality {
            AcceptedModality::Gift => {
                self.bump(thread.owner_id, StatCounter::BooksGiven).await;
                self.bump(thread.requester_id, StatCounter::BooksReceived)
                    .await;
            }
            AcceptedModality::Trade => {
                self.bump(thread.owner_id, StatCounter::BooksTraded).await;
                self.bump(thread.requester_id, StatCounter::BooksTraded)
                    .await;
            }
        }
        self.bump(thread.owner_id, StatCounter::Bookshares).await;
        self.bump(thread.requester_id, StatCounter::Bookshares).await;

        tracing::info!(thread_id = %thread.id, "Exchange resolved");
        Ok(())
    }

    /// Resolution side effects for a returned loan; statistics are gated on
    /// the listing settle the same way as in [`Self::finalize_exchange`]
    async fn finalize_loan(&self, thread: &NegotiationThread, relist: bool) -> EngineResult<()> {
        let target = if relist {
            ListingStatus::Active
        } else {
            ListingStatus::Archived
        };
        if !self.settle_listing(thread.listing_id, target).await? {
            return Ok(());
        }

        self.bump(thread.owner_id, StatCounter::BooksLoaned).await;
        self.bump(thread.requester_id, StatCounter::BooksBorrowed)
            .await;
        self.bump(thread.owner_id, StatCounter::Bookshares).await;
        self.bump(thread.requester_id, StatCounter::Bookshares).await;

        tracing::info!(
            thread_id = %thread.id,
            relisted = relist,
            "Loan resolved"
        );
        Ok(())
    }

    /// Move a listing out of `PendingResolution` at resolution time.
    ///
    /// Returns whether this call applied the write. A listing already at the
    /// target is a benign repeat from an earlier partial finalization; any
    /// other status means the listing was mutated outside the engine, an
    /// integrity fault to surface loudly rather than a user error.
    async fn settle_listing(
        &self,
        listing_id: Uuid,
        target: ListingStatus,
    ) -> EngineResult<bool> {
        let applied = self
            .store
            .update_listing_status_if(listing_id, ListingStatus::PendingResolution, target)
            .await?;
        if !applied {
            let current = self.require_listing(listing_id).await?.status;
            if current != target {
                tracing::error!(
                    listing_id = %listing_id,
                    current = ?current,
                    target = ?target,
                    "Listing left pending_resolution before finalization; data integrity bug"
                );
            }
        }
        Ok(applied)
    }

    async fn notify_best_effort(&self, event: NotifyEvent) {
        let kind = event.kind;
        let recipient = event.recipient_user_id;
        if let Err(err) = self.notifier.notify(event).await {
            tracing::warn!(
                kind = ?kind,
                recipient = %recipient,
                error = %err,
                "Notification delivery failed"
            );
        }
    }

    async fn bump(&self, user_id: Uuid, counter: StatCounter) {
        if let Err(err) = self.stats.increment(user_id, counter).await {
            tracing::warn!(
                user_id = %user_id,
                counter = ?counter,
                error = %err,
                "Statistics increment failed"
            );
        }
    }
}
