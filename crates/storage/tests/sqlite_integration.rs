use quiz_core::model::{SessionKey, TestCode, UserId};
use storage::repository::{KeyValueStore, Storage};
use storage::sqlite::SqliteRepository;

#[tokio::test]
async fn sqlite_state_roundtrip() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_state_roundtrip?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    assert_eq!(repo.get("quiz:1:7:deadline").await.unwrap(), None);

    repo.set("quiz:1:7:deadline", "1700000600").await.unwrap();
    assert_eq!(
        repo.get("quiz:1:7:deadline").await.unwrap().as_deref(),
        Some("1700000600")
    );

    repo.set("quiz:1:7:deadline", "1700000900").await.unwrap();
    assert_eq!(
        repo.get("quiz:1:7:deadline").await.unwrap().as_deref(),
        Some("1700000900")
    );

    repo.remove("quiz:1:7:deadline").await.unwrap();
    repo.remove("quiz:1:7:deadline").await.unwrap();
    assert_eq!(repo.get("quiz:1:7:deadline").await.unwrap(), None);
}

#[tokio::test]
async fn sqlite_set_if_absent_keeps_first_value() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_set_if_absent?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let first = repo.set_if_absent("quiz:2:anon:deadline", "100").await.unwrap();
    let second = repo.set_if_absent("quiz:2:anon:deadline", "50").await.unwrap();

    assert_eq!(first, "100");
    assert_eq!(second, "100");
}

#[tokio::test]
async fn sqlite_migrations_are_idempotent() {
    let url = "sqlite:file:memdb_migrate_twice?mode=memory&cache=shared";
    let repo = SqliteRepository::connect(url).await.expect("connect");
    repo.migrate().await.expect("first migrate");
    repo.set("k", "v").await.unwrap();
    repo.migrate().await.expect("second migrate");
    assert_eq!(repo.get("k").await.unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn sqlite_storage_clears_session() {
    let storage = Storage::sqlite("sqlite:file:memdb_clear_session?mode=memory&cache=shared")
        .await
        .expect("storage");
    let key = SessionKey::new(TestCode::new("MATH").unwrap(), Some(UserId::new(9)));
    storage.state.set(&key.deadline_key(), "1").await.unwrap();
    storage
        .state
        .set(&key.submitted_key(), r#"{"score":1}"#)
        .await
        .unwrap();

    storage.clear_session(&key).await.unwrap();

    assert_eq!(storage.state.get(&key.deadline_key()).await.unwrap(), None);
    assert_eq!(storage.state.get(&key.submitted_key()).await.unwrap(), None);
}
