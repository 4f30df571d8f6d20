//! Statistics sink capability
//!
//! Write-only profile counters. The engine increments them on resolution and
//! never reads them back; failures are logged, never propagated.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

/// Profile counters the engine maintains
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StatCounter {
    BooksGiven,
    BooksReceived,
    BooksLoaned,
    BooksBorrowed,
    BooksTraded,
    Bookshares,
}

/// Profile-counter capability consumed by the coordinator
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn increment(&self, user_id: Uuid, counter: StatCounter) -> anyhow::Result<()>;
}

/// In-memory sink for tests and embeddings without a profile service
#[derive(Default)]
pub struct MemoryStats {
    counts: Mutex<HashMap<(Uuid, StatCounter), u64>>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: Uuid, counter: StatCounter) -> u64 {
        *self
            .counts
            .lock()
            .expect("stats lock poisoned")
            .get(&(user_id, counter))
            .unwrap_or(&0)
    }
}

#[async_trait]
impl StatsSink for MemoryStats {
    async fn increment(&self, user_id: Uuid, counter: StatCounter) -> anyhow::Result<()> {
        *self
            .counts
            .lock()
            .expect("stats lock poisoned")
            .entry((user_id, counter))
            .or_insert(0) += 1;
        Ok(())
    }
}
