pub mod models;
pub mod pii;

pub use models::events::{ConflictNotice, QueueCounts, ReplaySummary, SyncNotice};
pub use models::manifest::{Booking, BookingState, ManifestEntry, PassengerState, PickupPoint};
pub use pii::Masked;
