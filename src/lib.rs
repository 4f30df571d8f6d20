//! ShelfShare exchange engine
//!
//! Library-level coordination engine for a neighborhood book marketplace:
//! listings move from active through a negotiated hand-off (gift, trade, or
//! loan) to a resolved state with a single winning counterparty and
//! dual-sided confirmation. Persistence, notification delivery, and profile
//! statistics are injected capabilities; the surrounding service layer is out
//! of scope.

pub mod completion;
pub mod coordinator;
pub mod error;
pub mod interest;
pub mod listing;
pub mod message;
pub mod negotiation;
pub mod notify;
pub mod proposal;
pub mod stats;
pub mod store;

pub use coordinator::Coordinator;
pub use error::{EngineError, EngineResult};
