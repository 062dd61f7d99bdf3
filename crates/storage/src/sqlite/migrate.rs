use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Schema versions in application order. Each entry runs in one transaction.
const MIGRATIONS: &[(i64, &[&str])] = &[
    (
        1,
        &[
            "CREATE TABLE IF NOT EXISTS progress_snapshots (
                storage_key TEXT PRIMARY KEY,
                attempt_id TEXT,
                payload TEXT NOT NULL,
                saved_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_progress_snapshots_saved_at
                ON progress_snapshots (saved_at)",
        ],
    ),
    (
        2,
        &["CREATE INDEX IF NOT EXISTS idx_progress_snapshots_attempt
            ON progress_snapshots (attempt_id)"],
    ),
];

async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
        .bind(version)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Apply every pending schema version.
pub(super) async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    for &(version, statements) in MIGRATIONS {
        if is_applied(pool, version).await? {
            continue;
        }
        let mut tx = pool.begin().await?;
        for &statement in statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at)
             VALUES (?1, ?2)
             ON CONFLICT(version) DO NOTHING",
        )
        .bind(version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        tracing::info!(version, "applied progress store migration");
    }
    Ok(())
}
