//! Listing domain module
//!
//! A listing is a single book posting with a sharing modality and a
//! lifecycle status driven by the coordinator.

mod model;

pub use model::*;
