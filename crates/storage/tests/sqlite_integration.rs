use assess_core::model::{AssessmentRef, AttemptId, LearnerId, ProgressKey, ProgressSnapshot, QuestionId};
use assess_core::time::fixed_now;
use chrono::Duration;
use storage::repository::ProgressRepository;
use storage::sqlite::SqliteRepository;

fn snapshot(attempt: &str, score: u8) -> ProgressSnapshot {
    ProgressSnapshot {
        attempt_id: Some(AttemptId::new(attempt)),
        mastery_score: score,
        authoritative: true,
        correct: 3,
        total: 4,
        streak: 3,
        credit: 30,
        answered_ids: vec![
            QuestionId::new("q1"),
            QuestionId::new("q2"),
            QuestionId::new("q3"),
            QuestionId::new("q4"),
        ],
        timestamp: fixed_now(),
    }
}

#[tokio::test]
async fn sqlite_upserts_and_clears_snapshots() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_progress?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");
    repo.migrate().await.expect("migrations are idempotent");

    let key = ProgressKey::Attempt(AttemptId::new("att-7"));
    repo.save_snapshot(&key, &snapshot("att-7", 61)).await.unwrap();
    repo.save_snapshot(&key, &snapshot("att-7", 64)).await.unwrap();

    let loaded = repo.load_snapshot(&key).await.unwrap().expect("stored");
    assert_eq!(loaded.mastery_score, 64);
    assert_eq!(loaded.answered_ids.len(), 4);
    assert!(loaded.authoritative);

    let legacy = ProgressKey::for_learner(&LearnerId::new("u1"), &AssessmentRef::new("quiz"));
    assert!(repo.load_snapshot(&legacy).await.unwrap().is_none());

    repo.clear_snapshot(&key).await.unwrap();
    assert!(repo.load_snapshot(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn sqlite_purges_by_saved_at() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_purge?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let mut stale = snapshot("old", 20);
    stale.timestamp = fixed_now() - Duration::days(9);
    let stale_key = ProgressKey::Attempt(AttemptId::new("old"));
    repo.save_snapshot(&stale_key, &stale).await.unwrap();

    let fresh_key = ProgressKey::Attempt(AttemptId::new("new"));
    repo.save_snapshot(&fresh_key, &snapshot("new", 50)).await.unwrap();

    let purged = repo
        .purge_older_than(fixed_now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(repo.load_snapshot(&stale_key).await.unwrap().is_none());
    assert!(repo.load_snapshot(&fresh_key).await.unwrap().is_some());
}

#[tokio::test]
async fn in_memory_store_is_migrated_once() {
    let repo = SqliteRepository::in_memory().await.expect("in-memory store");
    repo.migrate().await.expect("re-running migrations is a no-op");

    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(repo.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1, 2]);

    let key = ProgressKey::for_learner(&LearnerId::new("u2"), &AssessmentRef::new("reading"));
    repo.save_snapshot(&key, &snapshot("att-9", 12)).await.unwrap();
    assert_eq!(
        repo.load_snapshot(&key).await.unwrap().map(|s| s.mastery_score),
        Some(12)
    );
}
