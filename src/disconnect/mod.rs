//! Disconnect Supervisor: gives a dropped WebSocket connection a grace
//! window to rejoin before the match it was part of is abandoned.

use crate::broadcast::BroadcastFabric;
use crate::models::MatchStatus;
use crate::room::RoomManager;
use crate::store::MatchStore;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DisconnectSupervisor {
    pending: Arc<DashMap<(String, String), oneshot::Sender<()>>>,
    grace: Duration,
}

impl DisconnectSupervisor {
    pub fn new(grace_secs: u64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            grace: Duration::from_secs(grace_secs),
        }
    }

    /// Starts the grace-period countdown for `user_id` in `match_id`. If the
    /// same user reconnects before the window elapses, call `cancel` to
    /// call off the abandonment.
    pub fn start(
        &self,
        match_id: String,
        user_id: String,
        store: Arc<dyn MatchStore>,
        rooms: RoomManager,
        fabric: Arc<dyn BroadcastFabric>,
    ) {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let key = (match_id.clone(), user_id.clone());

        if let Some((_, previous)) = self.pending.remove(&key) {
            let _ = previous.send(());
        }
        self.pending.insert(key.clone(), cancel_tx);

        fabric.publish(
            &format!("/match/{match_id}/player-disconnected"),
            serde_json::json!({ "user_id": user_id }),
        );

        let pending = self.pending.clone();
        let grace = self.grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(grace) => {
                    pending.remove(&key);
                    if let Err(e) = abandon(&match_id, &user_id, &store, &rooms, &fabric).await {
                        warn!(match_id, user_id, error = %e, "failed to abandon match after disconnect grace period");
                    }
                }
                _ = cancel_rx => {
                    info!(match_id, user_id, "player rejoined before disconnect grace period elapsed");
                    fabric.publish(
                        &format!("/match/{match_id}/player-reconnected"),
                        serde_json::json!({ "user_id": user_id }),
                    );
                }
            }
        });
    }

    /// Cancels a pending abandonment because the player reconnected.
    pub fn cancel(&self, match_id: &str, user_id: &str) {
        if let Some((_, tx)) = self.pending.remove(&(match_id.to_string(), user_id.to_string())) {
            let _ = tx.send(());
        }
    }
}

async fn abandon(
    match_id: &str,
    user_id: &str,
    store: &Arc<dyn MatchStore>,
    rooms: &RoomManager,
    fabric: &Arc<dyn BroadcastFabric>,
) -> Result<(), crate::error::AppError> {
    let Some(mut m) = store.get_match(match_id).await? else {
        return Ok(());
    };
    if m.status != MatchStatus::Waiting && m.status != MatchStatus::Active {
        return Ok(());
    }

    m.status = MatchStatus::Abandoned;
    store.update_match_cas(&m).await?;

    if let Some(room) = rooms.get(match_id) {
        room.leave(user_id.to_string()).await;
    }
    rooms.unregister(match_id);

    fabric.publish(
        &format!("/match/{match_id}/finished"),
        serde_json::json!({ "match_id": match_id, "reason": "abandoned", "abandoned_by": user_id }),
    );

    info!(match_id, user_id, "match abandoned, player did not reconnect in time");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{InMemoryRelay, LocalFabric};
    use crate::models::Match;
    use crate::store::SqliteMatchStore;

    fn temp_store() -> Arc<dyn MatchStore> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disc.db");
        std::mem::forget(dir);
        Arc::new(SqliteMatchStore::new(path.to_string_lossy().to_string()).unwrap())
    }

    fn test_fabric() -> Arc<dyn BroadcastFabric> {
        Arc::new(LocalFabric::new(Arc::new(InMemoryRelay), "test-secret".into(), "inst-1".into()))
    }

    #[tokio::test]
    async fn cancel_before_grace_elapses_prevents_abandonment() {
        let store = temp_store();
        let mut m = Match::new("m1".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
        m.status = MatchStatus::Active;
        m.opponent_id = Some("bob".into());
        store.create_match(m).await.unwrap();

        let rooms = RoomManager::new();
        rooms.get_or_create("m1");
        let supervisor = DisconnectSupervisor::new(60);
        supervisor.start("m1".into(), "alice".into(), store.clone(), rooms, test_fabric());
        supervisor.cancel("m1", "alice");

        tokio::time::sleep(Duration::from_millis(20)).await;
        let m = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Active);
    }

    #[tokio::test]
    async fn grace_expiry_abandons_the_match() {
        let store = temp_store();
        let mut m = Match::new("m2".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
        m.status = MatchStatus::Active;
        m.opponent_id = Some("bob".into());
        store.create_match(m).await.unwrap();

        let rooms = RoomManager::new();
        rooms.get_or_create("m2");
        let supervisor = DisconnectSupervisor::new(0);
        supervisor.start("m2".into(), "alice".into(), store.clone(), rooms, test_fabric());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let m = store.get_match("m2").await.unwrap().unwrap();
        assert_eq!(m.status, MatchStatus::Abandoned);
    }
}
