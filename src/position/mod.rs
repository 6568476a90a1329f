//! Position Store: one mutex-guarded position per (match, user), so trade
//! validation and application stay a single atomic critical section without
//! locking out unrelated matches or the other player in the same match.

use crate::models::PlayerPosition;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct PositionStore {
    inner: Arc<DashMap<(String, String), Arc<Mutex<PlayerPosition>>>>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init(&self, match_id: &str, user_id: &str, starting_cash: f64) -> Arc<Mutex<PlayerPosition>> {
        self.inner
            .entry((match_id.to_string(), user_id.to_string()))
            .or_insert_with(|| {
                Arc::new(Mutex::new(PlayerPosition::new(
                    match_id.to_string(),
                    user_id.to_string(),
                    starting_cash,
                )))
            })
            .clone()
    }

    pub fn get(&self, match_id: &str, user_id: &str) -> Option<Arc<Mutex<PlayerPosition>>> {
        self.inner
            .get(&(match_id.to_string(), user_id.to_string()))
            .map(|entry| entry.clone())
    }

    /// Drops both players' positions once a match resolves; nothing after
    /// that point reads live position state, only the persisted stats row.
    pub fn evict_match(&self, match_id: &str, user_ids: &[String]) {
        for user_id in user_ids {
            self.inner.remove(&(match_id.to_string(), user_id.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_key_returns_the_same_handle() {
        let store = PositionStore::new();
        let a = store.get_or_init("m1", "alice", 10_000.0);
        let b = store.get_or_init("m1", "alice", 10_000.0);
        {
            let mut guard = a.lock().await;
            guard.cash -= 500.0;
        }
        assert_eq!(b.lock().await.cash, 9_500.0);
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let store = PositionStore::new();
        let a = store.get_or_init("m1", "alice", 10_000.0);
        let b = store.get_or_init("m1", "bob", 10_000.0);
        a.lock().await.cash = 1.0;
        assert_eq!(b.lock().await.cash, 10_000.0);
    }

    #[tokio::test]
    async fn evict_removes_both_players() {
        let store = PositionStore::new();
        store.get_or_init("m1", "alice", 10_000.0);
        store.get_or_init("m1", "bob", 10_000.0);
        store.evict_match("m1", &["alice".to_string(), "bob".to_string()]);
        assert!(store.get("m1", "alice").is_none());
        assert!(store.get("m1", "bob").is_none());
    }
}
