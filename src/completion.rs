//! Completion tracker
//!
//! Dual-sided confirmation shared by gift/trade completion and loan return.
//! Each side flips its own flag exactly once; the second flip signals the
//! coordinator to run resolution side effects.

/// Outcome of recording one side's confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// `false` means "recorded, waiting on the other party";
    /// `true` means the negotiation is fully resolved
    pub both_completed: bool,
}

/// The acting side had already confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlreadyConfirmed;

/// Flip the acting side's flag, rejecting a repeat confirmation.
pub fn confirm_side(mine: &mut bool, other: bool) -> Result<Completion, AlreadyConfirmed> {
    if *mine {
        return Err(AlreadyConfirmed);
    }
    *mine = true;
    Ok(Completion {
        both_completed: other,
    })
}
