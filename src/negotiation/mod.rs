//! Negotiation domain module
//!
//! Contains the per-(listing, requester) thread record and its status
//! machine, plus loan term handling.

mod model;

pub use model::*;
