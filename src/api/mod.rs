//! REST control surface: match lifecycle, trading, and matchmaking queue
//! endpoints. Every handler pulls the authenticated user from the request
//! extensions (populated by [`crate::auth::auth_middleware`]) rather than
//! trusting a body-supplied user id.

use crate::auth::Claims;
use crate::broadcast::BroadcastFabric;
use crate::error::AppError;
use crate::models::{Candle, Match, MatchTicket, Trade, TradeType};
use crate::scheduler::{self, SchedulerDeps};
use crate::AppState;
use axum::{
    extract::{Extension, Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/match/create", post(create_match))
        .route("/match/open", get(list_open_matches))
        .route("/match/:id/join", post(join_match))
        .route("/match/trade", post(place_trade))
        .route("/match/:id", get(get_match))
        .route("/match/:id/candle", get(current_candle))
        .route("/match/:id/candle/remaining", get(candle_remaining))
        .route("/matchmaking/queue", post(enter_queue))
        .route("/matchmaking/queue", delete(leave_queue))
}

const DEFAULT_MATCHMAKING_SYMBOL: &str = "ABC";

#[derive(Debug, Deserialize)]
struct CreateMatchRequest {
    stock_symbol: String,
    duration_minutes: u32,
    starting_balance: f64,
}

#[derive(Debug, Serialize)]
struct MatchResponse {
    #[serde(flatten)]
    m: Match,
}

fn validate_create(req: &CreateMatchRequest, known_symbols: &[String]) -> Result<(), AppError> {
    if !known_symbols.is_empty() && !known_symbols.iter().any(|s| s == &req.stock_symbol) {
        return Err(AppError::Validation(format!("unknown symbol '{}'", req.stock_symbol)));
    }
    if !(1..=60).contains(&req.duration_minutes) {
        return Err(AppError::Validation("durationMinutes must be between 1 and 60".into()));
    }
    if !(10_000.0..=100_000_000.0).contains(&req.starting_balance) {
        return Err(AppError::Validation(
            "startingBalance must be between 10^4 and 10^8".into(),
        ));
    }
    Ok(())
}

async fn create_match(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateMatchRequest>,
) -> Result<Json<MatchResponse>, AppError> {
    let known = state.candles.symbols();
    validate_create(&req, &known)?;

    let m = Match::new(
        Uuid::new_v4().to_string(),
        req.stock_symbol,
        claims.sub.clone(),
        req.starting_balance,
        req.duration_minutes,
    );
    let created = state.store.create_match(m).await?;
    state.rooms.get_or_create(&created.id).join(claims.sub).await;

    Ok(Json(MatchResponse { m: created }))
}

async fn list_open_matches(State(state): State<AppState>) -> Result<Json<Vec<Match>>, AppError> {
    Ok(Json(state.store.list_open_matches().await?))
}

async fn join_match(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<MatchResponse>, AppError> {
    let joined = state
        .store
        .join_match(&id, &claims.sub)
        .await?
        .ok_or_else(|| AppError::Conflict("match is not open to join".into()))?;

    let room = state.rooms.get_or_create(&id);
    room.join(claims.sub.clone()).await;

    state
        .positions
        .get_or_init(&id, &joined.creator_id, joined.starting_cash);
    state.positions.get_or_init(&id, &claims.sub, joined.starting_cash);

    scheduler::spawn(id.clone(), scheduler_deps(&state));

    state.fabric.publish(
        &format!("/match/{id}/started"),
        serde_json::json!({ "match_id": id, "opponent": claims.sub }),
    );

    Ok(Json(MatchResponse { m: joined }))
}

#[derive(Debug, Deserialize)]
struct TradeRequest {
    game_id: String,
    symbol: String,
    #[serde(rename = "type")]
    trade_type: String,
    quantity: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct TradeResponse {
    trade: Trade,
    cash: f64,
    shares_long: f64,
    shares_short: f64,
}

async fn place_trade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TradeRequest>,
) -> Result<Json<TradeResponse>, AppError> {
    let response = execute_trade(&state, &claims.sub, &req.game_id, &req.symbol, &req.trade_type, req.quantity).await?;
    Ok(Json(response))
}

/// Shared trade-execution core behind both the REST `/match/trade` handler
/// and the WebSocket `/app/game/{id}/trade` destination: resolves the
/// server-authoritative price, applies it through the Trade Executor, and
/// publishes the resulting `trade` and `state` events.
pub(crate) async fn execute_trade(
    state: &AppState,
    user_id: &str,
    game_id: &str,
    symbol: &str,
    trade_type_str: &str,
    quantity: f64,
) -> Result<TradeResponse, AppError> {
    let trade_type = TradeType::from_str(trade_type_str)
        .ok_or_else(|| AppError::Validation(format!("unknown trade type '{trade_type_str}'")))?;
    if quantity <= 0.0 || quantity.fract() != 0.0 {
        return Err(AppError::InvalidQuantity);
    }

    let m = state
        .store
        .get_match(game_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no match '{game_id}'")))?;

    if !m.is_participant(user_id) {
        return Err(AppError::NotParticipant);
    }
    if m.status != crate::models::MatchStatus::Active {
        return Err(AppError::InvalidMatchState);
    }
    if m.symbol != symbol {
        return Err(AppError::SymbolMismatch);
    }

    let series = state.candles.series(&m.symbol).await?;
    let index = (m.candle_index as usize).min(series.len().saturating_sub(1));
    let price = series
        .get(index)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("candle index out of range")))?
        .close;

    let position_handle = state.positions.get_or_init(&m.id, user_id, m.starting_cash);
    let (cash, shares_long, shares_short) = {
        let mut position = position_handle.lock().await;
        crate::trade::TradeExecutor::apply(&mut position, trade_type, quantity, price)?;
        (position.cash, position.shares_long, position.shares_short)
    };

    let trade = Trade {
        id: Uuid::new_v4().to_string(),
        match_id: m.id.clone(),
        user_id: user_id.to_string(),
        symbol: m.symbol.clone(),
        trade_type,
        quantity,
        price,
        candle_index: m.candle_index,
        executed_at: chrono::Utc::now(),
    };
    state.store.record_trade(&trade).await?;

    state.fabric.publish(
        &format!("/match/{}/trade", m.id),
        serde_json::json!({
            "user_id": user_id,
            "trade_type": trade.trade_type.as_str(),
            "quantity": trade.quantity,
            "price": trade.price,
        }),
    );
    publish_state(state, &m).await;

    Ok(TradeResponse {
        trade,
        cash,
        shares_long,
        shares_short,
    })
}

/// Broadcasts a full position snapshot for both players, as required after
/// any trade so each client sees the other's updated holdings.
async fn publish_state(state: &AppState, m: &Match) {
    let mut snapshot = serde_json::Map::new();
    snapshot.insert("match_id".into(), serde_json::json!(m.id));

    for user_id in [Some(m.creator_id.clone()), m.opponent_id.clone()].into_iter().flatten() {
        if let Some(handle) = state.positions.get(&m.id, &user_id) {
            let position = handle.lock().await;
            snapshot.insert(
                user_id,
                serde_json::json!({
                    "cash": position.cash,
                    "shares_long": position.shares_long,
                    "shares_short": position.shares_short,
                    "short_avg": position.short_avg,
                }),
            );
        }
    }

    state
        .fabric
        .publish(&format!("/match/{}/state", m.id), serde_json::Value::Object(snapshot));
}

async fn get_match(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Match>, AppError> {
    state
        .store
        .get_match(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no match '{id}'")))
        .map(Json)
}

async fn current_candle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Candle>, AppError> {
    let m = state
        .store
        .get_match(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no match '{id}'")))?;
    let series = state.candles.series(&m.symbol).await?;
    let index = (m.candle_index as usize).min(series.len().saturating_sub(1));
    series
        .get(index)
        .cloned()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("candle index out of range")))
        .map(Json)
}

#[derive(Debug, Serialize)]
struct RemainingResponse {
    remaining: u32,
}

async fn candle_remaining(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemainingResponse>, AppError> {
    let m = state
        .store
        .get_match(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no match '{id}'")))?;
    Ok(Json(RemainingResponse {
        remaining: m.duration_candles.saturating_sub(m.candle_index),
    }))
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
enum QueueResponse {
    Matched { game_id: String },
    Queued,
}

async fn enter_queue(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<QueueResponse>, AppError> {
    let rating = state.store.get_rating(&claims.sub).await?;
    state.matchmaker.enqueue(MatchTicket::new(claims.sub.clone(), rating));

    let pairs = state.matchmaker.sweep(chrono::Utc::now());
    for (a, b) in &pairs {
        if a.user_id != claims.sub && b.user_id != claims.sub {
            // not this caller's pairing; still commit the match for the
            // two users it did pair, then keep looking for ours.
            materialize_pair(&state, a, b).await?;
            continue;
        }

        let game_id = materialize_pair(&state, a, b).await?;
        return Ok(Json(QueueResponse::Matched { game_id }));
    }

    Ok(Json(QueueResponse::Queued))
}

/// Turns a pairing produced by the matchmaker's sweep into a live match:
/// creates and joins it, seeds both positions, starts the scheduler, and
/// notifies both players. Shared by the request-time sweep above and the
/// instance-wide background sweep in the binary's bootstrap.
pub async fn materialize_pair(state: &AppState, a: &MatchTicket, b: &MatchTicket) -> Result<String, AppError> {
    let m = Match::new(
        Uuid::new_v4().to_string(),
        DEFAULT_MATCHMAKING_SYMBOL.to_string(),
        a.user_id.clone(),
        100_000.0,
        20,
    );
    let created = state.store.create_match(m).await?;
    let m = state
        .store
        .join_match(&created.id, &b.user_id)
        .await?
        .unwrap_or(created);

    state.rooms.get_or_create(&m.id).join(a.user_id.clone()).await;
    state.rooms.get_or_create(&m.id).join(b.user_id.clone()).await;
    state.positions.get_or_init(&m.id, &a.user_id, m.starting_cash);
    state.positions.get_or_init(&m.id, &b.user_id, m.starting_cash);

    scheduler::spawn(m.id.clone(), scheduler_deps(state));

    for user_id in [&a.user_id, &b.user_id] {
        state.fabric.publish(
            &format!("/user/{user_id}"),
            serde_json::json!({ "type": "match-found", "game_id": m.id }),
        );
    }

    Ok(m.id)
}

fn scheduler_deps(state: &AppState) -> SchedulerDeps {
    SchedulerDeps {
        store: state.store.clone(),
        candles: state.candles.clone(),
        fabric: state.fabric.clone(),
        positions: state.positions.clone(),
        rooms: state.rooms.clone(),
        instance_id: state.config.instance_id.clone(),
        tick_interval: std::time::Duration::from_secs(state.config.scheduler_tick_secs),
        lease_ttl_secs: state.config.lease_ttl_secs,
    }
}

async fn leave_queue(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = state.matchmaker.dequeue(&claims.sub);
    Ok(Json(serde_json::json!({ "removed": removed })))
}
