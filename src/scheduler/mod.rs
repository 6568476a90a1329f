//! Match Scheduler: advances one ACTIVE match's candle clock on a fixed
//! cadence and triggers end-of-match resolution once its duration elapses.
//!
//! One task per ACTIVE match, each holding a renewable ownership lease in
//! the Match Store so exactly one instance ticks a given match at a time,
//! and any instance can resume it if the owning one crashes.

pub mod finish;

use crate::broadcast::BroadcastFabric;
use crate::candle_source::CandleSource;
use crate::error::AppError;
use crate::models::MatchStatus;
use crate::position::PositionStore;
use crate::room::RoomManager;
use crate::store::MatchStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn MatchStore>,
    pub candles: Arc<dyn CandleSource>,
    pub fabric: Arc<dyn BroadcastFabric>,
    pub positions: PositionStore,
    pub rooms: RoomManager,
    pub instance_id: String,
    pub tick_interval: Duration,
    pub lease_ttl_secs: i64,
}

/// Spawns the per-match tick task. Returns immediately; the task runs for
/// the lifetime of the match (or until this instance loses the lease).
pub fn spawn(match_id: String, deps: SchedulerDeps) {
    tokio::spawn(async move {
        if let Err(e) = run(match_id.clone(), deps).await {
            warn!(match_id, error = %e, "scheduler task exited with error");
        }
    });
}

#[instrument(skip(deps), fields(match_id = %match_id))]
async fn run(match_id: String, deps: SchedulerDeps) -> Result<(), AppError> {
    if !deps
        .store
        .try_acquire_lease(&match_id, &deps.instance_id, deps.lease_ttl_secs)
        .await?
    {
        return Ok(());
    }
    info!("scheduler acquired lease");

    loop {
        tokio::time::sleep(deps.tick_interval).await;

        if !deps
            .store
            .renew_lease(&match_id, &deps.instance_id, deps.lease_ttl_secs)
            .await?
        {
            warn!("lost scheduler lease, stopping ticks");
            return Ok(());
        }

        let Some(mut m) = deps.store.get_match(&match_id).await? else {
            warn!("match disappeared mid-tick");
            return Ok(());
        };

        if m.status != MatchStatus::Active {
            return Ok(());
        }

        let series = deps.candles.series(&m.symbol).await?;
        if series.is_empty() {
            warn!("candle series is empty, abandoning match");
            m.status = MatchStatus::Abandoned;
            deps.store.update_match_cas(&m).await?;
            return Ok(());
        }

        let clamped_index = (m.candle_index as usize).min(series.len() - 1);
        let current_price = series[clamped_index].close;

        if let Some(opponent_id) = m.opponent_id.clone() {
            mark_positions(&deps.positions, &m.id, &m.creator_id, &opponent_id, current_price).await;
        }

        let next_index = m.candle_index + 1;
        if next_index >= m.duration_candles || next_index as usize >= series.len() {
            finish::resolve(&m, current_price, &deps.store, &deps.positions, &deps.rooms).await?;
            deps.fabric.publish(
                &format!("/match/{match_id}/finished"),
                serde_json::json!({ "match_id": match_id, "final_candle_index": m.candle_index, "reason": "candles_exhausted" }),
            );
            return Ok(());
        }

        m.candle_index = next_index;
        if !deps.store.update_match_cas(&m).await? {
            warn!("candle advance lost a concurrent write race, stopping this task");
            return Ok(());
        }

        let candle = &series[next_index.min(series.len() as u32 - 1) as usize];
        deps.fabric.publish(
            &format!("/match/{match_id}/candle"),
            serde_json::json!({
                "candle_index": next_index,
                "date": candle.date,
                "open": candle.open,
                "high": candle.high,
                "low": candle.low,
                "close": candle.close,
            }),
        );
    }
}

async fn mark_positions(
    positions: &PositionStore,
    match_id: &str,
    creator_id: &str,
    opponent_id: &str,
    price: f64,
) {
    if let Some(p) = positions.get(match_id, creator_id) {
        p.lock().await.mark_to_market(price);
    }
    if let Some(p) = positions.get(match_id, opponent_id) {
        p.lock().await.mark_to_market(price);
    }
}

/// Periodic sweep: any ACTIVE match with no unexpired lease gets a fresh
/// scheduler task on this instance. Covers the case where the owning
/// instance crashed mid-match without a clean shutdown.
pub async fn spawn_lease_scavenger(deps: SchedulerDeps, sweep_interval: Duration) {
    loop {
        tokio::time::sleep(sweep_interval).await;

        match deps.store.find_lease_expired_matches().await {
            Ok(matches) => {
                for m in matches {
                    info!(match_id = %m.id, "lease scavenger resuming orphaned match");
                    spawn(m.id, deps.clone());
                }
            }
            Err(e) => warn!(error = %e, "lease scavenger sweep failed"),
        }
    }
}
