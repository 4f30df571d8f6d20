//! Thread message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A message inside a negotiation thread
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn new(thread_id: Uuid, sender_id: Uuid, body: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            sender_id,
            body,
            sent_at: Utc::now(),
        }
    }
}
