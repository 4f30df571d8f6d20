//! Notification capability
//!
//! The engine emits events; delivery (email, push, debouncing) belongs to the
//! implementation behind the trait. Notification failure never fails a state
//! transition; the coordinator logs and moves on.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use uuid::Uuid;

/// Event kinds the engine emits
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotifyKind {
    BookRequested,
    RequestDecision,
    NewMessage,
    TradeProposal,
    LoanOffered,
}

/// A single notification event
#[derive(Debug, Serialize, Clone)]
pub struct NotifyEvent {
    pub kind: NotifyKind,
    pub recipient_user_id: Uuid,
    pub payload: Value,
}

impl NotifyEvent {
    pub fn new(kind: NotifyKind, recipient_user_id: Uuid, payload: Value) -> Self {
        Self {
            kind,
            recipient_user_id,
            payload,
        }
    }
}

/// Outbound notification capability consumed by the coordinator
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotifyEvent) -> anyhow::Result<()>;
}

/// Notifier that drops every event
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _event: NotifyEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Test double that records every event it receives
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().expect("notifier lock poisoned").clone()
    }

    /// Events of one kind sent to one recipient
    pub fn sent_to(&self, recipient: Uuid, kind: NotifyKind) -> usize {
        self.events()
            .iter()
            .filter(|e| e.recipient_user_id == recipient && e.kind == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: NotifyEvent) -> anyhow::Result<()> {
        self.events.lock().expect("notifier lock poisoned").push(event);
        Ok(())
    }
}
