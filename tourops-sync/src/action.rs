use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Type tag of queued manifest mutations.
pub const MANIFEST_UPDATE: &str = "MANIFEST_UPDATE";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Queued,
    Syncing,
    Failed,
    Synced,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Queued => "queued",
            ActionStatus::Syncing => "syncing",
            ActionStatus::Failed => "failed",
            ActionStatus::Synced => "synced",
        }
    }

    /// Whether a sweep may pick this entry up.
    pub fn is_replayable(&self) -> bool {
        matches!(self, ActionStatus::Queued | ActionStatus::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ActionStatus::Queued),
            "syncing" => Ok(ActionStatus::Syncing),
            "failed" => Ok(ActionStatus::Failed),
            "synced" => Ok(ActionStatus::Synced),
            other => Err(format!("unknown action status '{}'", other)),
        }
    }
}

/// A mutation the device promised to perform but has not yet confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    /// The mutation's idempotency key.
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub tour_id: String,
    pub payload: Value,
    pub status: ActionStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Enqueue order; assigned by the queue.
    pub seq: u64,
}

impl QueuedAction {
    pub fn new(id: impl Into<String>, action_type: &str, tour_id: impl Into<String>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            action_type: action_type.to_string(),
            tour_id: tour_id.into(),
            payload,
            status: ActionStatus::Queued,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
            seq: 0,
        }
    }

    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_some_and(|at| at > now)
    }
}

/// Partial update applied by `OfflineActionQueue::update_status`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionUpdate {
    pub status: Option<ActionStatus>,
    pub attempts: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
}

impl ActionUpdate {
    pub fn synced() -> Self {
        Self {
            status: Some(ActionStatus::Synced),
            last_error: Some(None),
            next_attempt_at: Some(None),
            ..Default::default()
        }
    }

    pub fn failed(attempts: u32, error: impl Into<String>, next_attempt_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(ActionStatus::Failed),
            attempts: Some(attempts),
            last_error: Some(Some(error.into())),
            next_attempt_at: Some(Some(next_attempt_at)),
        }
    }

    pub(crate) fn apply_to(self, action: &mut QueuedAction) {
        if let Some(status) = self.status {
            action.status = status;
        }
        if let Some(attempts) = self.attempts {
            action.attempts = attempts;
        }
        if let Some(last_error) = self.last_error {
            action.last_error = last_error;
        }
        if let Some(next_attempt_at) = self.next_attempt_at {
            action.next_attempt_at = next_attempt_at;
        }
        action.updated_at = Utc::now();
    }
}
