//! S4: an instance holding a match's scheduler lease disappears (crash, no
//! clean shutdown) and a second instance must be able to resume ticking it
//! once the lease expires — while never double-owning it beforehand.

use candleduel_backend::models::{Match, MatchStatus};
use candleduel_backend::store::{MatchStore, SqliteMatchStore};
use std::sync::Arc;

fn temp_store() -> Arc<dyn MatchStore> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s4.db");
    std::mem::forget(dir);
    Arc::new(SqliteMatchStore::new(path.to_string_lossy().to_string()).unwrap())
}

#[tokio::test]
async fn second_instance_resumes_only_after_the_first_instances_lease_expires() {
    let store = temp_store();

    let mut m = Match::new("match-4".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
    m.status = MatchStatus::Active;
    store.create_match(m.clone()).await.unwrap();

    assert!(store.try_acquire_lease(&m.id, "instance-a", 1).await.unwrap());

    // while the lease is live, no other instance may claim it, and the
    // match does not show up as orphaned
    assert!(!store.try_acquire_lease(&m.id, "instance-b", 60).await.unwrap());
    assert!(store.find_lease_expired_matches().await.unwrap().is_empty());

    // instance-a renews and stays the sole owner
    assert!(store.renew_lease(&m.id, "instance-a", 1).await.unwrap());
    assert!(!store.renew_lease(&m.id, "instance-b", 60).await.unwrap());

    // instance-a crashes: no further renewal, and its 1s lease lapses
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

    let orphaned = store.find_lease_expired_matches().await.unwrap();
    assert_eq!(orphaned.len(), 1);
    assert_eq!(orphaned[0].id, m.id);

    // instance-b takes over, and instance-a can no longer act as owner
    assert!(store.try_acquire_lease(&m.id, "instance-b", 60).await.unwrap());
    assert!(!store.renew_lease(&m.id, "instance-a", 60).await.unwrap());

    let owned = store.get_match(&m.id).await.unwrap().unwrap();
    assert_eq!(owned.owner_instance_id.as_deref(), Some("instance-b"));
    assert!(store.find_lease_expired_matches().await.unwrap().is_empty());
}
