//! End-of-match resolution: compute each player's stats, apply the Elo
//! rating update, persist both, and tear down the match's in-memory state.

use crate::elo::{self, Outcome};
use crate::error::AppError;
use crate::models::{Match, MatchStats};
use crate::position::PositionStore;
use crate::room::RoomManager;
use crate::store::MatchStore;
use std::sync::Arc;
use tracing::info;

pub async fn resolve(
    m: &Match,
    final_price: f64,
    store: &Arc<dyn MatchStore>,
    positions: &PositionStore,
    rooms: &RoomManager,
) -> Result<(), AppError> {
    let Some(opponent_id) = m.opponent_id.clone() else {
        return Err(AppError::InvalidMatchState);
    };

    let creator_pos = positions
        .get(&m.id, &m.creator_id)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("missing creator position at match end")))?;
    let opponent_pos = positions
        .get(&m.id, &opponent_id)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("missing opponent position at match end")))?;

    let (creator_stats, opponent_stats, creator_equity, opponent_equity) = {
        let mut creator = creator_pos.lock().await;
        let mut opponent = opponent_pos.lock().await;
        creator.mark_to_market(final_price);
        opponent.mark_to_market(final_price);

        let creator_stats = MatchStats::compute(
            creator.return_pct(final_price),
            creator.accuracy_pct(),
            creator.max_drawdown_pct,
        );
        let opponent_stats = MatchStats::compute(
            opponent.return_pct(final_price),
            opponent.accuracy_pct(),
            opponent.max_drawdown_pct,
        );
        (
            creator_stats,
            opponent_stats,
            creator.equity(final_price),
            opponent.equity(final_price),
        )
    };

    // Winner is whoever holds more final equity, not whoever scores higher
    // on the composite (a big early drawdown can outscore a flat winner).
    let outcome = if (creator_equity - opponent_equity).abs() < 1e-9 {
        Outcome::Draw
    } else if creator_equity > opponent_equity {
        Outcome::Win
    } else {
        Outcome::Loss
    };

    let creator_rating = store.get_rating(&m.creator_id).await?;
    let opponent_rating = store.get_rating(&opponent_id).await?;
    let (creator_delta, opponent_delta) = elo::rating_deltas(creator_rating, opponent_rating, outcome);

    store
        .finish_match(
            &m.id,
            creator_stats,
            opponent_stats,
            creator_equity,
            opponent_equity,
            creator_delta,
            opponent_delta,
        )
        .await?;

    store
        .set_rating(&m.creator_id, creator_rating + creator_delta)
        .await?;
    store
        .set_rating(&opponent_id, opponent_rating + opponent_delta)
        .await?;

    positions.evict_match(&m.id, &[m.creator_id.clone(), opponent_id.clone()]);
    rooms.unregister(&m.id);

    info!(
        match_id = %m.id,
        creator_score = creator_stats.composite_score,
        opponent_score = opponent_stats.composite_score,
        creator_rating_delta = creator_delta,
        opponent_rating_delta = opponent_delta,
        "match resolved"
    );

    Ok(())
}
