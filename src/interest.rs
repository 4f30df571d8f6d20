//! Interest registry models
//!
//! An interest records that a user raised a hand on a listing. It shares its
//! id with the negotiation thread created alongside it and carries no status
//! of its own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One user's expressed interest in one listing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Interest {
    /// Same id as the underlying negotiation thread
    pub id: Uuid,
    pub listing_id: Uuid,
    pub interested_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Aggregated interest counts for an owner's UI badges
#[derive(Debug, Serialize, Clone)]
pub struct InterestSummary {
    pub total_count: usize,
    pub unique_people: usize,
    pub unique_posts: usize,
    pub interests: Vec<Interest>,
}

/// Aggregate interests into a summary.
///
/// The caller pre-filters to interests whose threads are still active; this
/// stays a pure function so the summary is recomputed on every call and can
/// never serve a stale cache.
pub fn summarize(interests: Vec<Interest>) -> InterestSummary {
    let mut people: Vec<Uuid> = interests.iter().map(|i| i.interested_user_id).collect();
    people.sort_unstable();
    people.dedup();

    let mut posts: Vec<Uuid> = interests.iter().map(|i| i.listing_id).collect();
    posts.sort_unstable();
    posts.dedup();

    InterestSummary {
        total_count: interests.len(),
        unique_people: people.len(),
        unique_posts: posts.len(),
        interests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interest(listing_id: Uuid, user_id: Uuid) -> Interest {
        Interest {
            id: Uuid::new_v4(),
            listing_id,
            interested_user_id: user_id,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_summarize_empty() {
        let summary = summarize(vec![]);
        assert_eq!(summary.total_count, 0);
        assert_eq!(summary.unique_people, 0);
        assert_eq!(summary.unique_posts, 0);
    }

    #[test]
    fn test_summarize_dedupes_people_and_posts() {
        let listing_a = Uuid::new_v4();
        let listing_b = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let summary = summarize(vec![
            interest(listing_a, alice),
            interest(listing_a, bob),
            interest(listing_b, alice),
        ]);

        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.unique_people, 2);
        assert_eq!(summary.unique_posts, 2);
        assert_eq!(summary.interests.len(), 3);
    }
}
