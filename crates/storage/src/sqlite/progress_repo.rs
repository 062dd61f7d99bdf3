use assess_core::model::{AttemptId, ProgressKey, ProgressSnapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::SqliteRepository;
use crate::repository::{ProgressRepository, SnapshotRecord, StorageError};

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn map_record_row(row: &sqlx::sqlite::SqliteRow) -> Result<SnapshotRecord, StorageError> {
    let key: String = row.try_get("storage_key").map_err(ser)?;
    let attempt_id: Option<String> = row.try_get("attempt_id").map_err(ser)?;
    let payload: String = row.try_get("payload").map_err(ser)?;
    let saved_at: DateTime<Utc> = row.try_get("saved_at").map_err(ser)?;
    Ok(SnapshotRecord {
        key,
        attempt_id: attempt_id.map(AttemptId::new),
        payload,
        saved_at,
    })
}

#[async_trait]
impl ProgressRepository for SqliteRepository {
    async fn save_snapshot(
        &self,
        key: &ProgressKey,
        snapshot: &ProgressSnapshot,
    ) -> Result<(), StorageError> {
        let record = SnapshotRecord::from_snapshot(key, snapshot)?;
        sqlx::query(
            r"
                INSERT INTO progress_snapshots (storage_key, attempt_id, payload, saved_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(storage_key) DO UPDATE SET
                    attempt_id = excluded.attempt_id,
                    payload = excluded.payload,
                    saved_at = excluded.saved_at
            ",
        )
        .bind(&record.key)
        .bind(record.attempt_id.as_ref().map(AttemptId::as_str))
        .bind(&record.payload)
        .bind(record.saved_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn load_snapshot(
        &self,
        key: &ProgressKey,
    ) -> Result<Option<ProgressSnapshot>, StorageError> {
        let row = sqlx::query(
            r"
                SELECT storage_key, attempt_id, payload, saved_at
                FROM progress_snapshots
                WHERE storage_key = ?1
            ",
        )
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        map_record_row(&row)?.into_snapshot().map(Some)
    }

    async fn clear_snapshot(&self, key: &ProgressKey) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM progress_snapshots WHERE storage_key = ?1")
            .bind(key.storage_key())
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let res = sqlx::query("DELETE FROM progress_snapshots WHERE saved_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        let purged = res.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, %cutoff, "purged expired progress snapshots");
        }
        Ok(purged)
    }
}
