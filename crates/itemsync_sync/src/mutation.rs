//! Lifecycle of one optimistic mutation

use serde::{Deserialize, Serialize};

/// Where an optimistic mutation stands.
///
/// ```text
/// PendingLocal ──confirmed──▶ Confirmed
///      │  └────refused─────▶ Dropped
///      └─deferred─▶ Queued ──confirmed──▶ Confirmed
///                     └─────refused─────▶ Dropped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationState {
    /// Applied to the view, not yet answered by the server
    PendingLocal,
    /// Waiting in the pending queue for the next replay
    Queued,
    Confirmed,
    /// Refused or unreplayable; the server never applied it
    Dropped,
}

/// What happened to a mutation at the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Confirmed,
    /// Offline or transient failure
    Deferred,
    /// Conflict, rejection, or a target that never existed
    Refused,
}

impl MutationState {
    /// Next state for `outcome`; terminal states do not move
    pub fn advance(self, outcome: MutationOutcome) -> MutationState {
        match (self, outcome) {
            (MutationState::PendingLocal, MutationOutcome::Confirmed)
            | (MutationState::Queued, MutationOutcome::Confirmed) => MutationState::Confirmed,
            (MutationState::PendingLocal, MutationOutcome::Deferred)
            | (MutationState::Queued, MutationOutcome::Deferred) => MutationState::Queued,
            (MutationState::PendingLocal, MutationOutcome::Refused)
            | (MutationState::Queued, MutationOutcome::Refused) => MutationState::Dropped,
            (terminal, _) => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Confirmed | MutationState::Dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_confirmation() {
        let state = MutationState::PendingLocal.advance(MutationOutcome::Confirmed);
        assert_eq!(state, MutationState::Confirmed);
        assert!(state.is_terminal());
    }

    #[test]
    fn test_queued_then_confirmed() {
        let state = MutationState::PendingLocal
            .advance(MutationOutcome::Deferred)
            .advance(MutationOutcome::Deferred);
        assert_eq!(state, MutationState::Queued);
        assert_eq!(state.advance(MutationOutcome::Confirmed), MutationState::Confirmed);
    }

    #[test]
    fn test_terminal_states_stay() {
        let dropped = MutationState::Queued.advance(MutationOutcome::Refused);
        assert_eq!(dropped, MutationState::Dropped);
        assert_eq!(dropped.advance(MutationOutcome::Confirmed), MutationState::Dropped);
    }
}
