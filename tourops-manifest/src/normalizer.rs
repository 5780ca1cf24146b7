use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tourops_core::{paths, RealtimeStore};
use tourops_shared::{Booking, Masked, PickupPoint};
use tracing::{debug, info};

use crate::{bounded, ManifestError};

pub const SEAT_PLACEHOLDER: &str = "Unassigned";
pub const PICKUP_LOCATION_PLACEHOLDER: &str = "To be confirmed";
pub const PICKUP_TIME_PLACEHOLDER: &str = "TBC";

const PASSENGER_NAMES: &str = "passengerNames";
const SEAT_NUMBERS: &str = "seatNumbers";
const PICKUP_POINTS: &str = "pickupPoints";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    PassengerNames,
    SeatNumbers,
    PickupPoints,
}

/// A raw booking record, split by whether it already has the canonical layout.
#[derive(Debug)]
pub enum BookingShape<'a> {
    Canonical(&'a Map<String, Value>),
    Legacy {
        record: &'a Map<String, Value>,
        missing: Vec<CanonicalField>,
    },
}

impl<'a> BookingShape<'a> {
    pub fn classify(raw: &'a Value) -> Option<BookingShape<'a>> {
        let record = raw.as_object()?;
        let mut missing = Vec::new();

        let names = record.get(PASSENGER_NAMES).and_then(string_list);
        if names.is_none() {
            missing.push(CanonicalField::PassengerNames);
        }

        let seats_ok = match (&names, record.get(SEAT_NUMBERS).and_then(string_list)) {
            (Some(names), Some(seats)) => seats.len() == names.len(),
            _ => false,
        };
        if !seats_ok {
            missing.push(CanonicalField::SeatNumbers);
        }

        let pickups_ok = record
            .get(PICKUP_POINTS)
            .and_then(Value::as_array)
            .is_some_and(|points| !points.is_empty() && points.iter().all(is_canonical_pickup));
        if !pickups_ok {
            missing.push(CanonicalField::PickupPoints);
        }

        if missing.is_empty() {
            Some(BookingShape::Canonical(record))
        } else {
            Some(BookingShape::Legacy { record, missing })
        }
    }
}

/// Canonical booking plus the fields that had to be backfilled to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBooking {
    pub booking: Booking,
    pub repairs: Map<String, Value>,
}

impl NormalizedBooking {
    pub fn was_mutated(&self) -> bool {
        !self.repairs.is_empty()
    }
}

/// Pure repair of a raw booking record into canonical form.
///
/// Legacy fields are read but never removed; the returned `repairs` hold only the
/// canonical fields that were absent or inconsistent. Normalizing a record that
/// already has the repairs merged in yields no repairs.
pub fn normalize(tour_id: &str, booking_ref: &str, raw: &Value) -> Result<NormalizedBooking, ManifestError> {
    paths::validate_segment(booking_ref)?;
    let shape = BookingShape::classify(raw).ok_or_else(|| ManifestError::Malformed {
        path: format!("bookings/{}/{}", tour_id, booking_ref),
        reason: "booking record is not an object".into(),
    })?;

    let (record, missing) = match shape {
        BookingShape::Canonical(record) => (record, Vec::new()),
        BookingShape::Legacy { record, missing } => (record, missing),
    };

    let mut repairs = Map::new();

    let names = if missing.contains(&CanonicalField::PassengerNames) {
        let names = legacy_passenger_names(record);
        repairs.insert(PASSENGER_NAMES.into(), json!(names));
        names
    } else {
        record.get(PASSENGER_NAMES).and_then(string_list).unwrap_or_default()
    };

    let seats = if missing.contains(&CanonicalField::SeatNumbers) {
        let seats = fitted_seats(record, names.len());
        repairs.insert(SEAT_NUMBERS.into(), json!(seats));
        seats
    } else {
        record.get(SEAT_NUMBERS).and_then(string_list).unwrap_or_default()
    };

    let pickup_values = if missing.contains(&CanonicalField::PickupPoints) {
        let points = repaired_pickups(record);
        repairs.insert(PICKUP_POINTS.into(), Value::Array(points.clone()));
        points
    } else {
        record
            .get(PICKUP_POINTS)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    let pickup_points = pickup_values
        .iter()
        .map(|point| PickupPoint {
            location: str_field(point, "location").unwrap_or(PICKUP_LOCATION_PLACEHOLDER).to_string(),
            time: str_field(point, "time").unwrap_or(PICKUP_TIME_PLACEHOLDER).to_string(),
        })
        .collect();

    let booking = Booking {
        booking_ref: booking_ref.to_string(),
        tour_id: record
            .get("tourId")
            .and_then(Value::as_str)
            .unwrap_or(tour_id)
            .to_string(),
        passenger_names: Masked(names),
        seat_numbers: seats,
        pickup_points,
    };

    Ok(NormalizedBooking { booking, repairs })
}

fn string_list(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn str_field<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value.get(key).and_then(Value::as_str)
}

fn is_canonical_pickup(point: &Value) -> bool {
    str_field(point, "location").is_some() && str_field(point, "time").is_some()
}

fn passenger_label(item: &Value, position: usize) -> String {
    let from_object = || {
        if let Some(name) = str_field(item, "name").or_else(|| str_field(item, "fullName")) {
            return Some(name.trim().to_string());
        }
        let first = str_field(item, "firstName").unwrap_or_default().trim();
        let last = str_field(item, "lastName").unwrap_or_default().trim();
        let joined = format!("{} {}", first, last).trim().to_string();
        (!joined.is_empty()).then_some(joined)
    };

    match item {
        Value::String(name) if !name.trim().is_empty() => name.trim().to_string(),
        Value::Object(_) => from_object().unwrap_or_else(|| format!("Passenger {}", position + 1)),
        _ => format!("Passenger {}", position + 1),
    }
}

fn legacy_passenger_names(record: &Map<String, Value>) -> Vec<String> {
    let source = record
        .get(PASSENGER_NAMES)
        .filter(|v| v.is_array())
        .or_else(|| record.get("passengers"));

    match source {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| passenger_label(item, i))
            .collect(),
        Some(Value::String(list)) => list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect(),
        _ => {
            let count = record
                .get("paxCount")
                .or_else(|| record.get("pax"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            (1..=count).map(|i| format!("Passenger {}", i)).collect()
        }
    }
}

fn fitted_seats(record: &Map<String, Value>, passenger_count: usize) -> Vec<String> {
    let existing = record
        .get(SEAT_NUMBERS)
        .or_else(|| record.get("seats"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut seats: Vec<String> = existing
        .iter()
        .take(passenger_count)
        .map(|seat| match seat {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => SEAT_PLACEHOLDER.to_string(),
        })
        .collect();
    seats.resize(passenger_count, SEAT_PLACEHOLDER.to_string());
    seats
}

fn repaired_pickups(record: &Map<String, Value>) -> Vec<Value> {
    let existing: Vec<Value> = record
        .get(PICKUP_POINTS)
        .and_then(Value::as_array)
        .map(|points| points.iter().filter(|p| p.is_object()).cloned().collect())
        .unwrap_or_default();

    if existing.is_empty() {
        let location = record
            .get("pickupLocation")
            .and_then(Value::as_str)
            .unwrap_or(PICKUP_LOCATION_PLACEHOLDER);
        let time = record
            .get("pickupTime")
            .and_then(Value::as_str)
            .unwrap_or(PICKUP_TIME_PLACEHOLDER);
        return vec![json!({ "location": location, "time": time })];
    }

    existing
        .into_iter()
        .map(|mut point| {
            if let Some(fields) = point.as_object_mut() {
                if !fields.get("location").is_some_and(Value::is_string) {
                    fields.insert("location".into(), json!(PICKUP_LOCATION_PLACEHOLDER));
                }
                if !fields.get("time").is_some_and(Value::is_string) {
                    fields.insert("time".into(), json!(PICKUP_TIME_PLACEHOLDER));
                }
            }
            point
        })
        .collect()
}

/// Normalizes booking records and writes the backfilled fields back to the store.
pub struct BookingNormalizer {
    store: Arc<dyn RealtimeStore>,
    timeout: Duration,
}

impl BookingNormalizer {
    pub fn new(store: Arc<dyn RealtimeStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Returns the canonical booking and whether a repair write was made.
    pub async fn normalize_and_persist(
        &self,
        tour_id: &str,
        booking_ref: &str,
        raw: &Value,
    ) -> Result<(Booking, bool), ManifestError> {
        let normalized = normalize(tour_id, booking_ref, raw)?;
        if !normalized.was_mutated() {
            return Ok((normalized.booking, false));
        }

        let path = paths::booking(tour_id, booking_ref)?;
        let fields: Vec<&String> = normalized.repairs.keys().collect();
        debug!("Backfilling {:?} on {}", fields, path);
        bounded(self.timeout, self.store.update(&path, normalized.repairs.clone())).await?;
        info!("Normalized legacy booking {}/{}", tour_id, booking_ref);

        Ok((normalized.booking, true))
    }

    pub async fn load(&self, tour_id: &str, booking_ref: &str) -> Result<Option<(Booking, bool)>, ManifestError> {
        let path = paths::booking(tour_id, booking_ref)?;
        let Some(raw) = bounded(self.timeout, self.store.read(&path)).await? else {
            return Ok(None);
        };
        self.normalize_and_persist(tour_id, booking_ref, &raw).await.map(Some)
    }
}
