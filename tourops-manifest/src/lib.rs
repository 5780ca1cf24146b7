pub mod counters;
pub mod entry;
pub mod mutator;
pub mod normalizer;
pub mod read_model;
pub mod status;

pub use counters::{JoinOutcome, ParticipantCounter, ReconcileOutcome};
pub use mutator::{ManifestMutator, ManifestUpdatePayload, MutationOutcome, DEFAULT_WRITE_TIMEOUT};
pub use normalizer::{normalize, BookingNormalizer, BookingShape, NormalizedBooking};
pub use read_model::{ManifestBooking, ManifestReader, ManifestStats, TourManifest};
pub use status::{derive, normalize_states};

use std::future::Future;
use std::time::Duration;
use tourops_core::{CoreError, StoreError, StoreResult};

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed record at {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("Tour not found: {0}")]
    TourNotFound(String),
}

impl ManifestError {
    /// Timeouts and network-class store failures are worth queueing; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ManifestError::Store(err) => err.is_retryable(),
            ManifestError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<CoreError> for ManifestError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationError(msg) => ManifestError::Validation(msg),
            CoreError::InternalError(msg) => ManifestError::Store(StoreError::Backend(msg)),
        }
    }
}

/// Run a store call under a hard ceiling; an expired call counts as failed.
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, ManifestError>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(ManifestError::from),
        Err(_) => Err(ManifestError::Timeout(limit)),
    }
}
