use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tourops_core::{paths, RealtimeStore};
use tourops_shared::{Booking, BookingState, PassengerState};
use tracing::{info, warn};

use crate::entry::StoredEntry;
use crate::normalizer::BookingNormalizer;
use crate::status::count_of;
use crate::{bounded, ManifestError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestBooking {
    #[serde(flatten)]
    pub booking: Booking,
    pub passenger_status: Vec<PassengerState>,
    pub status: BookingState,
    pub last_updated: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestStats {
    pub total_pax: usize,
    pub checked_in: usize,
    pub no_shows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TourManifest {
    pub bookings: Vec<ManifestBooking>,
    pub stats: ManifestStats,
}

/// Builds the per-tour manifest view from bookings and stored boarding entries.
pub struct ManifestReader {
    store: Arc<dyn RealtimeStore>,
    normalizer: BookingNormalizer,
    timeout: Duration,
}

impl ManifestReader {
    pub fn new(store: Arc<dyn RealtimeStore>, timeout: Duration) -> Self {
        Self {
            normalizer: BookingNormalizer::new(store.clone(), timeout),
            store,
            timeout,
        }
    }

    pub async fn get_tour_manifest(&self, tour_code: &str) -> Result<TourManifest, ManifestError> {
        let bookings_path = paths::tour_bookings(tour_code)?;
        let manifest_path = paths::tour_manifest(tour_code)?;

        let raw_bookings = bounded(self.timeout, self.store.read(&bookings_path)).await?;
        let raw_entries = bounded(self.timeout, self.store.read(&manifest_path)).await?;

        let Some(Value::Object(raw_bookings)) = raw_bookings else {
            return Ok(TourManifest {
                bookings: Vec::new(),
                stats: ManifestStats::default(),
            });
        };

        let mut bookings = Vec::with_capacity(raw_bookings.len());
        let mut stats = ManifestStats::default();
        let mut repaired = 0usize;

        for (booking_ref, raw) in &raw_bookings {
            let booking = match self.normalizer.normalize_and_persist(tour_code, booking_ref, raw).await {
                Ok((booking, wrote)) => {
                    repaired += usize::from(wrote);
                    booking
                }
                Err(ManifestError::Malformed { path, reason }) => {
                    warn!("Skipping malformed booking {}: {}", path, reason);
                    continue;
                }
                // Repairs are opportunistic; a failed backfill must not hide the manifest.
                Err(err) if err.is_retryable() => {
                    warn!("Could not persist repairs for {}/{}: {}", tour_code, booking_ref, err);
                    crate::normalizer::normalize(tour_code, booking_ref, raw)?.booking
                }
                Err(err) => return Err(err),
            };

            let stored = raw_entries
                .as_ref()
                .and_then(|entries| entries.get(booking_ref))
                .map(StoredEntry::parse);
            let passenger_count = booking.passenger_count();
            let (passenger_status, status) = match &stored {
                Some(entry) => entry.resolve(passenger_count),
                None => (vec![PassengerState::Pending; passenger_count], BookingState::Pending),
            };

            stats.total_pax += passenger_count;
            stats.checked_in += count_of(&passenger_status, PassengerState::Boarded);
            stats.no_shows += count_of(&passenger_status, PassengerState::NoShow);

            bookings.push(ManifestBooking {
                booking,
                passenger_status,
                status,
                last_updated: stored.and_then(|e| e.last_updated),
            });
        }

        bookings.sort_by(|a, b| {
            let time = |m: &ManifestBooking| m.booking.first_pickup().map(|p| p.time.clone());
            time(a)
                .cmp(&time(b))
                .then_with(|| a.booking.booking_ref.cmp(&b.booking.booking_ref))
        });

        if repaired > 0 {
            info!("Manifest {}: normalized {} legacy bookings", tour_code, repaired);
        }

        Ok(TourManifest { bookings, stats })
    }
}
