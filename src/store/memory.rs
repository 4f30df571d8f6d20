//! In-memory reference store
//!
//! Backs the integration tests and embeddings that bring no persistence of
//! their own. One `RwLock` guards all tables, so every conditional operation
//! runs under a single write lock and the per-listing linearizability the
//! coordinator relies on holds trivially.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::interest::Interest;
use crate::listing::{Listing, ListingStatus};
use crate::message::Message;
use crate::negotiation::{NegotiationThread, ThreadStatus};
use crate::proposal::Proposal;
use crate::store::{
    AcceptanceApplied, AcceptanceCommit, ExchangeStore, StoreError, StoreResult,
};

#[derive(Default)]
struct Tables {
    listings: HashMap<Uuid, Listing>,
    threads: HashMap<Uuid, NegotiationThread>,
    interests: Vec<Interest>,
    proposals: HashMap<Uuid, Proposal>,
    messages: Vec<Message>,
}

/// In-process implementation of [`ExchangeStore`]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExchangeStore for MemoryStore {
    async fn insert_listing(&self, listing: Listing) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.listings.insert(listing.id, listing);
        Ok(())
    }

    async fn get_listing(&self, id: Uuid) -> StoreResult<Option<Listing>> {
        let tables = self.tables.read().await;
        Ok(tables.listings.get(&id).cloned())
    }

    async fn listings_for_owner(&self, owner_id: Uuid) -> StoreResult<Vec<Listing>> {
        let tables = self.tables.read().await;
        Ok(tables
            .listings
            .values()
            .filter(|l| l.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn update_listing_status_if(
        &self,
        id: Uuid,
        expected: ListingStatus,
        new: ListingStatus,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let listing = tables
            .listings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound("listing".to_string()))?;
        if listing.status != expected {
            return Ok(false);
        }
        listing.status = new;
        listing.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_thread(&self, thread: NegotiationThread) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.threads.insert(thread.id, thread);
        Ok(())
    }

    async fn get_thread(&self, id: Uuid) -> StoreResult<Option<NegotiationThread>> {
        let tables = self.tables.read().await;
        Ok(tables.threads.get(&id).cloned())
    }

    async fn update_thread(&self, mut thread: NegotiationThread) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .threads
            .get_mut(&thread.id)
            .ok_or_else(|| StoreError::NotFound("thread".to_string()))?;
        if stored.version != thread.version {
            return Err(StoreError::Conflict(
                "thread was modified concurrently".to_string(),
            ));
        }
        thread.version += 1;
        thread.updated_at = Utc::now();
        *stored = thread;
        Ok(())
    }

    async fn thread_for_listing_and_requester(
        &self,
        listing_id: Uuid,
        requester_id: Uuid,
    ) -> StoreResult<Option<NegotiationThread>> {
        let tables = self.tables.read().await;
        Ok(tables
            .threads
            .values()
            .find(|t| t.listing_id == listing_id && t.requester_id == requester_id)
            .cloned())
    }

    async fn threads_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<NegotiationThread>> {
        let tables = self.tables.read().await;
        Ok(tables
            .threads
            .values()
            .filter(|t| t.listing_id == listing_id)
            .cloned()
            .collect())
    }

    async fn threads_on_loan(&self) -> StoreResult<Vec<NegotiationThread>> {
        let tables = self.tables.read().await;
        Ok(tables
            .threads
            .values()
            .filter(|t| matches!(t.status, ThreadStatus::OnLoan { .. }))
            .cloned()
            .collect())
    }

    async fn commit_acceptance(&self, commit: AcceptanceCommit) -> StoreResult<AcceptanceApplied> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();

        // Validate every precondition before touching anything, so the bundle
        // applies fully or not at all.
        let listing = tables
            .listings
            .get(&commit.listing_id)
            .ok_or_else(|| StoreError::NotFound("listing".to_string()))?;
        if listing.status != ListingStatus::Active {
            return Err(StoreError::Conflict("listing is not active".to_string()));
        }

        if let Some(counter_id) = commit.counter_listing_id {
            let counter = tables
                .listings
                .get(&counter_id)
                .ok_or_else(|| StoreError::NotFound("counter listing".to_string()))?;
            if counter.status != ListingStatus::Active {
                return Err(StoreError::Conflict(
                    "counter listing is not active".to_string(),
                ));
            }
        }

        let winner = tables
            .threads
            .get(&commit.winner_thread_id)
            .ok_or_else(|| StoreError::NotFound("thread".to_string()))?;
        if winner.listing_id != commit.listing_id {
            return Err(StoreError::Conflict(
                "thread does not belong to listing".to_string(),
            ));
        }
        if winner.status != ThreadStatus::Active {
            return Err(StoreError::Conflict("thread is not active".to_string()));
        }

        for (listing_id, _) in &commit.agreed_exchange {
            if !tables.listings.contains_key(listing_id) {
                return Err(StoreError::NotFound("listing".to_string()));
            }
        }

        // Apply the bundle.
        let listing = tables
            .listings
            .get_mut(&commit.listing_id)
            .expect("validated above");
        listing.status = ListingStatus::PendingResolution;
        listing.updated_at = now;

        if let Some(counter_id) = commit.counter_listing_id {
            let counter = tables
                .listings
                .get_mut(&counter_id)
                .expect("validated above");
            counter.status = ListingStatus::PendingResolution;
            counter.updated_at = now;
        }

        for (listing_id, link) in &commit.agreed_exchange {
            let target = tables
                .listings
                .get_mut(listing_id)
                .expect("validated above");
            target.agreed_exchange = Some(*link);
            target.updated_at = now;
        }

        let winner = tables
            .threads
            .get_mut(&commit.winner_thread_id)
            .expect("validated above");
        winner.status = commit.winner_status.clone();
        winner.version += 1;
        winner.updated_at = now;

        // Both settled listings leave `Active`, so active threads on either
        // of them are displaced. The winning thread always lives on the
        // primary listing.
        let mut displaced = Vec::new();
        for thread in tables.threads.values_mut() {
            let on_settled_listing = thread.listing_id == commit.listing_id
                || Some(thread.listing_id) == commit.counter_listing_id;
            if on_settled_listing
                && thread.id != commit.winner_thread_id
                && thread.status == ThreadStatus::Active
            {
                thread.status = ThreadStatus::GivenToOther;
                thread.version += 1;
                thread.updated_at = now;
                displaced.push(thread.clone());
            }
        }

        Ok(AcceptanceApplied { displaced })
    }

    async fn insert_interest(&self, interest: Interest) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.interests.push(interest);
        Ok(())
    }

    async fn interests_for_listing(&self, listing_id: Uuid) -> StoreResult<Vec<Interest>> {
        let tables = self.tables.read().await;
        Ok(tables
            .interests
            .iter()
            .filter(|i| i.listing_id == listing_id)
            .cloned()
            .collect())
    }

    async fn insert_proposal(&self, proposal: Proposal) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.proposals.insert(proposal.id, proposal);
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> StoreResult<Option<Proposal>> {
        let tables = self.tables.read().await;
        Ok(tables.proposals.get(&id).cloned())
    }

    async fn update_proposal(&self, mut proposal: Proposal) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.proposals.contains_key(&proposal.id) {
            return Err(StoreError::NotFound("proposal".to_string()));
        }
        proposal.updated_at = Utc::now();
        tables.proposals.insert(proposal.id, proposal);
        Ok(())
    }

    async fn pending_proposal_for_thread(
        &self,
        thread_id: Uuid,
    ) -> StoreResult<Option<Proposal>> {
        let tables = self.tables.read().await;
        Ok(tables
            .proposals
            .values()
            .find(|p| p.thread_id == thread_id && p.is_pending())
            .cloned())
    }

    async fn insert_message(&self, message: Message) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.messages.push(message);
        Ok(())
    }

    async fn messages_for_thread(&self, thread_id: Uuid) -> StoreResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.sent_at);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::Modality;

    fn listing(owner_id: Uuid) -> Listing {
        let now = Utc::now();
        Listing {
            id: Uuid::new_v4(),
            owner_id,
            title: "Test book".to_string(),
            modality: Modality::Gift,
            loan_duration_days: None,
            status: ListingStatus::Active,
            agreed_exchange: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn accepted_gift() -> ThreadStatus {
        ThreadStatus::Accepted {
            modality: crate::negotiation::AcceptedModality::Gift,
            owner_completed: false,
            requester_completed: false,
        }
    }

    #[tokio::test]
    async fn test_conditional_listing_update() {
        let store = MemoryStore::new();
        let listing = listing(Uuid::new_v4());
        let id = listing.id;
        store.insert_listing(listing).await.unwrap();

        let applied = store
            .update_listing_status_if(id, ListingStatus::Active, ListingStatus::Archived)
            .await
            .unwrap();
        assert!(applied);

        // expected status no longer holds
        let applied = store
            .update_listing_status_if(id, ListingStatus::Active, ListingStatus::Archived)
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_thread_version_conflict() {
        let store = MemoryStore::new();
        let thread = NegotiationThread::open(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        store.insert_thread(thread.clone()).await.unwrap();

        let fresh = store.get_thread(thread.id).await.unwrap().unwrap();
        store.update_thread(fresh.clone()).await.unwrap();

        // second write from the same stale read must conflict
        let result = store.update_thread(fresh).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_commit_acceptance_displaces_siblings() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let listing = listing(owner);
        let listing_id = listing.id;
        store.insert_listing(listing).await.unwrap();

        let winner = NegotiationThread::open(listing_id, owner, Uuid::new_v4());
        let loser_a = NegotiationThread::open(listing_id, owner, Uuid::new_v4());
        let loser_b = NegotiationThread::open(listing_id, owner, Uuid::new_v4());
        store.insert_thread(winner.clone()).await.unwrap();
        store.insert_thread(loser_a.clone()).await.unwrap();
        store.insert_thread(loser_b.clone()).await.unwrap();

        let applied = store
            .commit_acceptance(AcceptanceCommit {
                listing_id,
                winner_thread_id: winner.id,
                winner_status: accepted_gift(),
                counter_listing_id: None,
                agreed_exchange: vec![],
            })
            .await
            .unwrap();

        assert_eq!(applied.displaced.len(), 2);
        let listing = store.get_listing(listing_id).await.unwrap().unwrap();
        assert_eq!(listing.status, ListingStatus::PendingResolution);
        let loser = store.get_thread(loser_a.id).await.unwrap().unwrap();
        assert_eq!(loser.status, ThreadStatus::GivenToOther);
    }

    #[tokio::test]
    async fn test_commit_acceptance_displaces_counter_listing_threads() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let primary = listing(owner);
        let counter = listing(alice);
        let primary_id = primary.id;
        let counter_id = counter.id;
        store.insert_listing(primary).await.unwrap();
        store.insert_listing(counter).await.unwrap();

        let winner = NegotiationThread::open(primary_id, owner, alice);
        let bystander = NegotiationThread::open(counter_id, alice, Uuid::new_v4());
        store.insert_thread(winner.clone()).await.unwrap();
        store.insert_thread(bystander.clone()).await.unwrap();

        let applied = store
            .commit_acceptance(AcceptanceCommit {
                listing_id: primary_id,
                winner_thread_id: winner.id,
                winner_status: accepted_gift(),
                counter_listing_id: Some(counter_id),
                agreed_exchange: vec![],
            })
            .await
            .unwrap();

        // the counter listing also left Active, so its thread is displaced
        assert_eq!(applied.displaced.len(), 1);
        assert_eq!(applied.displaced[0].id, bystander.id);
        let bystander = store.get_thread(bystander.id).await.unwrap().unwrap();
        assert_eq!(bystander.status, ThreadStatus::GivenToOther);
        let counter = store.get_listing(counter_id).await.unwrap().unwrap();
        assert_eq!(counter.status, ListingStatus::PendingResolution);
    }

    #[tokio::test]
    async fn test_commit_acceptance_conflicts_when_listing_taken() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let mut listing = listing(owner);
        listing.status = ListingStatus::PendingResolution;
        let listing_id = listing.id;
        store.insert_listing(listing).await.unwrap();

        let thread = NegotiationThread::open(listing_id, owner, Uuid::new_v4());
        store.insert_thread(thread.clone()).await.unwrap();

        let result = store
            .commit_acceptance(AcceptanceCommit {
                listing_id,
                winner_thread_id: thread.id,
                winner_status: accepted_gift(),
                counter_listing_id: None,
                agreed_exchange: vec![],
            })
            .await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        // nothing applied
        let thread = store.get_thread(thread.id).await.unwrap().unwrap();
        assert_eq!(thread.status, ThreadStatus::Active);
    }
}
