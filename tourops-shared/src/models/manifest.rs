use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::pii::Masked;

/// Boarding state of a single passenger, set by a driver action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassengerState {
    Pending,
    Boarded,
    NoShow,
}

impl PassengerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassengerState::Pending => "PENDING",
            PassengerState::Boarded => "BOARDED",
            PassengerState::NoShow => "NO_SHOW",
        }
    }

    /// Parse a whole passenger-state list, reporting the first offending position.
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> Result<Vec<PassengerState>, InvalidPassengerState> {
        raw.iter()
            .enumerate()
            .map(|(index, value)| {
                value.as_ref().parse::<PassengerState>().map_err(|mut e| {
                    e.index = Some(index);
                    e
                })
            })
            .collect()
    }
}

impl fmt::Display for PassengerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PassengerState {
    type Err = InvalidPassengerState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "PENDING" => Ok(PassengerState::Pending),
            "BOARDED" => Ok(PassengerState::Boarded),
            "NO_SHOW" | "NOSHOW" => Ok(PassengerState::NoShow),
            _ => Err(InvalidPassengerState {
                value: s.to_string(),
                index: None,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPassengerState {
    pub value: String,
    pub index: Option<usize>,
}

impl fmt::Display for InvalidPassengerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(i) => write!(f, "invalid passenger state '{}' at position {}", self.value, i),
            None => write!(f, "invalid passenger state '{}'", self.value),
        }
    }
}

impl std::error::Error for InvalidPassengerState {}

/// Aggregate state of a booking, derived from its passengers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    Pending,
    Boarded,
    NoShow,
    Partial,
}

impl BookingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::Pending => "PENDING",
            BookingState::Boarded => "BOARDED",
            BookingState::NoShow => "NO_SHOW",
            BookingState::Partial => "PARTIAL",
        }
    }

    /// The passenger state this booking state implies for every passenger, if any.
    pub fn uniform_passenger_state(&self) -> Option<PassengerState> {
        match self {
            BookingState::Pending => Some(PassengerState::Pending),
            BookingState::Boarded => Some(PassengerState::Boarded),
            BookingState::NoShow => Some(PassengerState::NoShow),
            BookingState::Partial => None,
        }
    }
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PassengerState> for BookingState {
    fn from(state: PassengerState) -> Self {
        match state {
            PassengerState::Pending => BookingState::Pending,
            PassengerState::Boarded => BookingState::Boarded,
            PassengerState::NoShow => BookingState::NoShow,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PickupPoint {
    pub location: String,
    pub time: String,
}

/// Canonical booking record, as produced by the schema normalizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub booking_ref: String,
    pub tour_id: String,
    pub passenger_names: Masked<Vec<String>>,
    /// Parallel to `passenger_names`.
    pub seat_numbers: Vec<String>,
    pub pickup_points: Vec<PickupPoint>,
}

impl Booking {
    pub fn passenger_count(&self) -> usize {
        self.passenger_names.len()
    }

    pub fn first_pickup(&self) -> Option<&PickupPoint> {
        self.pickup_points.first()
    }
}

/// Stored boarding record for one booking on one tour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub passenger_status: Vec<PassengerState>,
    pub status: BookingState,
    /// Client-supplied write time, epoch milliseconds.
    pub last_updated: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passenger_state_wire_names() {
        let json = serde_json::to_string(&vec![PassengerState::Boarded, PassengerState::NoShow]).unwrap();
        assert_eq!(json, r#"["BOARDED","NO_SHOW"]"#);
    }

    #[test]
    fn test_parse_all_reports_position() {
        let err = PassengerState::parse_all(&["boarded", "no-show", "LATE"]).unwrap_err();
        assert_eq!(err.index, Some(2));
        assert_eq!(err.value, "LATE");

        let ok = PassengerState::parse_all(&["Pending", "NOSHOW"]).unwrap();
        assert_eq!(ok, vec![PassengerState::Pending, PassengerState::NoShow]);
    }

    #[test]
    fn test_manifest_entry_camel_case() {
        let entry = ManifestEntry {
            passenger_status: vec![PassengerState::Boarded],
            status: BookingState::Boarded,
            last_updated: 1_700_000_000_000,
            idempotency_key: Some("mu_abc".to_string()),
            updated_by: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["passengerStatus"][0], "BOARDED");
        assert_eq!(value["lastUpdated"], 1_700_000_000_000i64);
        assert!(value.get("updatedBy").is_none());
    }
}
