use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;
use tourops_sync::{ActionStatus, QueueError, QueueResult, QueueStorage, QueuedAction};
use tracing::info;

/// SQLite-backed queue storage; survives process restarts.
#[derive(Clone)]
pub struct SqliteQueueStorage {
    pool: SqlitePool,
}

impl SqliteQueueStorage {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(connection_string)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running queue migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Queue migrations completed.");
        Ok(())
    }
}

fn persistence(err: sqlx::Error) -> QueueError {
    QueueError::Persistence(err.to_string())
}

fn decode(row: &SqliteRow) -> QueueResult<QueuedAction> {
    let status: String = row.try_get("status").map_err(persistence)?;
    let payload: String = row.try_get("payload").map_err(persistence)?;
    let attempts: i64 = row.try_get("attempts").map_err(persistence)?;
    let seq: i64 = row.try_get("seq").map_err(persistence)?;

    Ok(QueuedAction {
        id: row.try_get("id").map_err(persistence)?,
        action_type: row.try_get("action_type").map_err(persistence)?,
        tour_id: row.try_get("tour_id").map_err(persistence)?,
        payload: serde_json::from_str(&payload)?,
        status: ActionStatus::from_str(&status).map_err(QueueError::Persistence)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error").map_err(persistence)?,
        next_attempt_at: row
            .try_get::<Option<DateTime<Utc>>, _>("next_attempt_at")
            .map_err(persistence)?,
        created_at: row.try_get("created_at").map_err(persistence)?,
        updated_at: row.try_get("updated_at").map_err(persistence)?,
        seq: u64::try_from(seq).unwrap_or_default(),
    })
}

#[async_trait]
impl QueueStorage for SqliteQueueStorage {
    async fn load_all(&self) -> QueueResult<Vec<QueuedAction>> {
        let rows = sqlx::query(
            "SELECT id, action_type, tour_id, payload, status, attempts, last_error, \
             next_attempt_at, created_at, updated_at, seq FROM queued_actions ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persistence)?;

        rows.iter().map(decode).collect()
    }

    async fn upsert(&self, action: &QueuedAction) -> QueueResult<()> {
        let payload = serde_json::to_string(&action.payload)?;
        sqlx::query(
            "INSERT INTO queued_actions \
             (id, action_type, tour_id, payload, status, attempts, last_error, next_attempt_at, created_at, updated_at, seq) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             action_type = excluded.action_type, tour_id = excluded.tour_id, payload = excluded.payload, \
             status = excluded.status, attempts = excluded.attempts, last_error = excluded.last_error, \
             next_attempt_at = excluded.next_attempt_at, updated_at = excluded.updated_at, seq = excluded.seq",
        )
        .bind(&action.id)
        .bind(&action.action_type)
        .bind(&action.tour_id)
        .bind(payload)
        .bind(action.status.as_str())
        .bind(i64::from(action.attempts))
        .bind(&action.last_error)
        .bind(action.next_attempt_at)
        .bind(action.created_at)
        .bind(action.updated_at)
        .bind(i64::try_from(action.seq).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(persistence)?;
        Ok(())
    }

    async fn remove(&self, ids: &[String]) -> QueueResult<()> {
        let mut tx = self.pool.begin().await.map_err(persistence)?;
        for id in ids {
            sqlx::query("DELETE FROM queued_actions WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(persistence)?;
        }
        tx.commit().await.map_err(persistence)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use tourops_sync::{ActionUpdate, OfflineActionQueue, MANIFEST_UPDATE};

    async fn storage() -> SqliteQueueStorage {
        let storage = SqliteQueueStorage::new("sqlite::memory:").await.unwrap();
        storage.migrate().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn test_rows_round_trip_in_order() {
        let storage = storage().await;
        let mut first = QueuedAction::new("mu_a", MANIFEST_UPDATE, "T1", json!({"bookingRef": "B1"}));
        first.seq = 2;
        first.next_attempt_at = Some(Utc::now());
        let mut second = QueuedAction::new("mu_b", MANIFEST_UPDATE, "T1", json!({"bookingRef": "B2"}))
            .with_last_error("timed out");
        second.seq = 1;

        storage.upsert(&first).await.unwrap();
        storage.upsert(&second).await.unwrap();

        let rows = storage.load_all().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "mu_b");
        assert_eq!(rows[0].last_error.as_deref(), Some("timed out"));
        assert_eq!(rows[1].payload, json!({"bookingRef": "B1"}));
        assert!(rows[1].next_attempt_at.is_some());

        storage.remove(&["mu_a".to_string()]).await.unwrap();
        assert_eq!(storage.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_state_survives_reopen() {
        let storage = Arc::new(storage().await);
        {
            let queue = OfflineActionQueue::open(storage.clone()).await.unwrap();
            queue
                .enqueue(QueuedAction::new("mu_a", MANIFEST_UPDATE, "T1", json!({})))
                .await
                .unwrap();
            queue.claim("mu_a").await.unwrap();
            queue
                .enqueue(QueuedAction::new("mu_b", MANIFEST_UPDATE, "T1", json!({})))
                .await
                .unwrap();
            queue
                .update_status("mu_b", ActionUpdate::failed(2, "offline", Utc::now()))
                .await
                .unwrap();
        }

        let reopened = OfflineActionQueue::open(storage).await.unwrap();
        let actions = reopened.list().await;
        assert_eq!(actions[0].id, "mu_a");
        assert_eq!(actions[0].status, ActionStatus::Queued);
        assert_eq!(actions[1].status, ActionStatus::Failed);
        assert_eq!(actions[1].attempts, 2);
        assert_eq!(reopened.counts().total, 2);
    }
}
