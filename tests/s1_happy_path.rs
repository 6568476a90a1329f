//! S1: a full two-player match from creation through resolution, run
//! directly against the Match Store, Position Store, and finish resolver
//! without the HTTP/WS surface in front of them.

use candleduel_backend::models::{Match, MatchStatus, TradeType};
use candleduel_backend::position::PositionStore;
use candleduel_backend::room::RoomManager;
use candleduel_backend::scheduler::finish;
use candleduel_backend::store::{MatchStore, SqliteMatchStore};
use candleduel_backend::trade::TradeExecutor;
use std::sync::Arc;

fn temp_store() -> Arc<dyn MatchStore> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s1.db");
    std::mem::forget(dir);
    Arc::new(SqliteMatchStore::new(path.to_string_lossy().to_string()).unwrap())
}

#[tokio::test]
async fn opponent_short_position_settles_to_the_spec_numbers_and_creator_wins() {
    let store = temp_store();
    let positions = PositionStore::new();
    let rooms = RoomManager::new();

    let mut m = Match::new("match-1".into(), "ABC".into(), "alice".into(), 100_000.0, 5);
    store.create_match(m.clone()).await.unwrap();
    m = store.join_match(&m.id, "bob").await.unwrap().unwrap();
    assert_eq!(m.status, MatchStatus::Active);

    let alice = positions.get_or_init(&m.id, "alice", m.starting_cash);
    let bob = positions.get_or_init(&m.id, "bob", m.starting_cash);

    // alice buys long, bob opens a short — entry candle closes at 102
    {
        let mut p = alice.lock().await;
        TradeExecutor::apply(&mut p, TradeType::Buy, 50.0, 100.0).unwrap();
    }
    {
        let mut p = bob.lock().await;
        TradeExecutor::apply(&mut p, TradeType::Short, 100.0, 102.0).unwrap();
        // opening the short must not move equity before price moves
        assert_eq!(p.equity(102.0), 100_000.0);
    }

    // series ends at a close of 105
    let final_price = 105.0;
    finish::resolve(&m, final_price, &store, &positions, &rooms)
        .await
        .unwrap();

    let finished = store.get_match(&m.id).await.unwrap().unwrap();
    assert_eq!(finished.status, MatchStatus::Finished);
    assert!(finished.ended_at.is_some());

    // alice: cash 95_000 + 50*105 = 100_250
    assert!((finished.creator_final_balance.unwrap() - 100_250.0).abs() < 1e-6);
    // bob: 100_000 + 100*(102-105) = 99_700, per the spec's SHORT/COVER accounting
    assert!((finished.opponent_final_balance.unwrap() - 99_700.0).abs() < 1e-6);

    // alice holds more final equity, so she wins the rating exchange
    let creator_delta = finished.creator_rating_delta.unwrap();
    let opponent_delta = finished.opponent_rating_delta.unwrap();
    assert!(creator_delta > 0);
    assert!(opponent_delta < 0);
    assert_eq!(creator_delta, -opponent_delta);

    assert_eq!(store.get_rating("alice").await.unwrap(), 1200 + creator_delta);
    assert_eq!(store.get_rating("bob").await.unwrap(), 1200 + opponent_delta);

    // positions are torn down once the match resolves
    assert!(positions.get(&m.id, "alice").is_none());
    assert!(positions.get(&m.id, "bob").is_none());
}
