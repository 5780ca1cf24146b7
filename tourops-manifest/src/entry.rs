use chrono::DateTime;
use serde_json::Value;
use tourops_shared::{BookingState, PassengerState};
use tracing::warn;

use crate::status::{derive, normalize_states};

/// Manifest entry as read back from the store, tolerant of older writers.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    /// `None` when the record only carries a booking-level status.
    pub passenger_states: Option<Vec<PassengerState>>,
    pub status: BookingState,
    pub last_updated: Option<i64>,
    pub idempotency_key: Option<String>,
}

impl StoredEntry {
    pub fn parse(raw: &Value) -> StoredEntry {
        let passenger_states = raw
            .get("passengerStatus")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(parse_passenger_state).collect::<Vec<_>>());

        let status = match &passenger_states {
            Some(states) => derive(states),
            None => raw
                .get("status")
                .and_then(Value::as_str)
                .and_then(parse_booking_state)
                .unwrap_or(BookingState::Pending),
        };

        StoredEntry {
            passenger_states,
            status,
            last_updated: raw.get("lastUpdated").and_then(parse_timestamp),
            idempotency_key: raw
                .get("idempotencyKey")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    /// Per-passenger states sized to `passenger_count`, and the aggregate they produce.
    ///
    /// Records with only a booking-level status expand a uniform status to every
    /// passenger; a bare `PARTIAL` keeps the stored status over all-pending passengers.
    pub fn resolve(&self, passenger_count: usize) -> (Vec<PassengerState>, BookingState) {
        match &self.passenger_states {
            Some(states) => {
                let states = normalize_states(states, passenger_count);
                let status = derive(&states);
                (states, status)
            }
            None => match self.status.uniform_passenger_state() {
                Some(state) => (vec![state; passenger_count], self.status),
                None => (vec![PassengerState::Pending; passenger_count], self.status),
            },
        }
    }
}

fn parse_passenger_state(value: &Value) -> PassengerState {
    match value.as_str().map(str::parse::<PassengerState>) {
        Some(Ok(state)) => state,
        _ => {
            warn!("Unrecognised stored passenger state {}, reading as PENDING", value);
            PassengerState::Pending
        }
    }
}

fn parse_booking_state(raw: &str) -> Option<BookingState> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "PARTIAL" => Some(BookingState::Partial),
        other => other.parse::<PassengerState>().ok().map(BookingState::from),
    }
}

/// Epoch milliseconds, or an RFC 3339 string from older clients.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis()),
        _ => None,
    }
}
