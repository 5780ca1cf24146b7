use tourops_shared::{BookingState, PassengerState};

/// Aggregate booking state for a set of passenger states.
///
/// Empty → `Pending`; all equal → that state; any mixture → `Partial`.
/// Only the multiset of states matters, never their order.
pub fn derive(states: &[PassengerState]) -> BookingState {
    let Some(first) = states.first() else {
        return BookingState::Pending;
    };
    if states.iter().all(|s| s == first) {
        BookingState::from(*first)
    } else {
        BookingState::Partial
    }
}

/// Pad with `Pending` or truncate so the list matches the booking's passenger count.
pub fn normalize_states(states: &[PassengerState], expected: usize) -> Vec<PassengerState> {
    let mut normalized: Vec<PassengerState> = states.iter().copied().take(expected).collect();
    normalized.resize(expected, PassengerState::Pending);
    normalized
}

pub fn count_of(states: &[PassengerState], target: PassengerState) -> usize {
    states.iter().filter(|s| **s == target).count()
}
