//! WebSocket transport: one connection per player, multiplexing
//! subscriptions to match and account channels over a small subscribe/
//! unsubscribe/send frame protocol.

use crate::auth::Claims;
use crate::broadcast::BroadcastFabric;
use crate::AppState;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Extension, State},
    response::Response,
};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping { data: Option<serde_json::Value> },
    /// `/app/game/{id}/trade` — places a trade through the same executor
    /// path as the REST `/match/trade` endpoint.
    Trade {
        game_id: String,
        symbol: String,
        #[serde(rename = "type")]
        trade_type: String,
        quantity: f64,
    },
    /// `/app/game/{id}/ready` — marks the sender ready; once both roster
    /// members have readied, the match transitions to ACTIVE on join.
    Ready { game_id: String },
    /// `/app/game/{id}/rejoin` — cancels a pending disconnect abandonment
    /// for the sender in the named match.
    Rejoin { game_id: String },
    /// `/app/game/{id}/position` — requests the sender's own current
    /// position snapshot.
    Position { game_id: String },
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, claims))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, claims: Claims) {
    if !state.nonce_store.redeem(&claims.nonce) {
        warn!(user_id = %claims.sub, "rejected websocket upgrade with a replayed nonce");
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let user_id = claims.sub.clone();
    info!(user_id, "websocket connection established");

    // Every connection always hears its own account channel; match channels
    // are joined explicitly via subscribe frames once the client knows
    // which match it's in.
    let mut account_rx = state.fabric.subscribe(&format!("/user/{user_id}"));
    let mut match_rx: Option<(String, tokio::sync::broadcast::Receiver<crate::broadcast::Envelope>)> = None;

    loop {
        tokio::select! {
            Ok(envelope) = account_rx.recv() => {
                if forward(&mut socket, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(envelope) = recv_match(&mut match_rx), if match_rx.is_some() => {
                if forward(&mut socket, &envelope).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_client_frame(&text, &state, &user_id, &mut socket, &mut match_rx).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    if let Some((channel, _)) = match_rx {
        if let Some(match_id) = match_channel_id(&channel) {
            state.disconnect.start(
                match_id,
                user_id.clone(),
                state.store.clone(),
                state.rooms.clone(),
                state.fabric.clone(),
            );
        }
    }
    info!(user_id, "websocket connection closed");
}

async fn recv_match(
    slot: &mut Option<(String, tokio::sync::broadcast::Receiver<crate::broadcast::Envelope>)>,
) -> Result<crate::broadcast::Envelope, tokio::sync::broadcast::error::RecvError> {
    match slot {
        Some((_, rx)) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn forward(socket: &mut WebSocket, envelope: &crate::broadcast::Envelope) -> Result<(), ()> {
    let frame = serde_json::json!({
        "type": "event",
        "channel": envelope.channel,
        "body": envelope.body,
    });
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .map_err(|_| ())
}

/// Returns `false` if the connection should close.
async fn handle_client_frame(
    text: &str,
    state: &AppState,
    user_id: &str,
    socket: &mut WebSocket,
    match_rx: &mut Option<(String, tokio::sync::broadcast::Receiver<crate::broadcast::Envelope>)>,
) -> bool {
    let Ok(frame) = serde_json::from_str::<ClientFrame>(text) else {
        if text == "ping" {
            let _ = socket.send(Message::Text("pong".to_string())).await;
        }
        return true;
    };

    match frame {
        ClientFrame::Subscribe { channel } => {
            if !authorize_channel(state, user_id, &channel).await {
                warn!(user_id, channel, "rejected subscription to unauthorized channel");
                return true;
            }
            *match_rx = Some((channel.clone(), state.fabric.subscribe(&channel)));
            if let Some(match_id) = match_channel_id(&channel) {
                state.disconnect.cancel(&match_id, user_id);
            }
        }
        ClientFrame::Unsubscribe { channel } => {
            if match_rx.as_ref().map(|(c, _)| c.as_str()) == Some(channel.as_str()) {
                *match_rx = None;
            }
        }
        ClientFrame::Ping { data } => {
            let timestamp = data
                .as_ref()
                .and_then(|d| d.get("timestamp"))
                .and_then(|t| t.as_i64())
                .unwrap_or(0);
            let pong = serde_json::json!({ "type": "pong", "data": { "timestamp": timestamp } });
            let _ = socket.send(Message::Text(pong.to_string())).await;
        }
        ClientFrame::Trade {
            game_id,
            symbol,
            trade_type,
            quantity,
        } => {
            match crate::api::execute_trade(state, user_id, &game_id, &symbol, &trade_type, quantity).await {
                Ok(response) => {
                    let frame = serde_json::json!({ "type": "trade-ack", "game_id": game_id, "trade": response });
                    let _ = socket.send(Message::Text(frame.to_string())).await;
                }
                Err(e) => send_error(socket, &game_id, user_id, &e).await,
            }
        }
        ClientFrame::Ready { game_id } => {
            if let Some(room) = state.rooms.get(&game_id) {
                if let Some(room_state) = room.mark_ready(user_id.to_string()).await {
                    let both_ready = room_state.members.len() == 2 && room_state.ready.len() == 2;
                    state.fabric.publish(
                        &format!("/match/{game_id}/state"),
                        serde_json::json!({ "type": "ready", "user_id": user_id, "both_ready": both_ready }),
                    );
                }
            }
        }
        ClientFrame::Rejoin { game_id } => {
            state.disconnect.cancel(&game_id, user_id);
            if let Some(room) = state.rooms.get(&game_id) {
                room.join(user_id.to_string()).await;
            }
            *match_rx = Some((
                format!("/match/{game_id}"),
                state.fabric.subscribe(&format!("/match/{game_id}")),
            ));
            state.fabric.publish(
                &format!("/match/{game_id}/player-reconnected"),
                serde_json::json!({ "user_id": user_id }),
            );
        }
        ClientFrame::Position { game_id } => {
            if let Some(handle) = state.positions.get(&game_id, user_id) {
                let position = handle.lock().await;
                let frame = serde_json::json!({
                    "type": "position",
                    "game_id": game_id,
                    "cash": position.cash,
                    "shares_long": position.shares_long,
                    "shares_short": position.shares_short,
                    "short_avg": position.short_avg,
                });
                let _ = socket.send(Message::Text(frame.to_string())).await;
            }
        }
    }
    true
}

async fn send_error(socket: &mut WebSocket, game_id: &str, user_id: &str, err: &crate::error::AppError) {
    let frame = serde_json::json!({
        "type": "error",
        "channel": format!("/match/{game_id}/error/{user_id}"),
        "message": err.to_string(),
    });
    let _ = socket.send(Message::Text(frame.to_string())).await;
}

fn match_channel_id(channel: &str) -> Option<String> {
    channel.strip_prefix("/match/")?.split('/').next().map(String::from)
}

/// A client may subscribe to its own user channel, or to a match channel
/// for a match it participates in.
async fn authorize_channel(state: &AppState, user_id: &str, channel: &str) -> bool {
    if channel == format!("/user/{user_id}") {
        return true;
    }
    let Some(match_id) = match_channel_id(channel) else {
        return false;
    };
    match state.store.get_match(&match_id).await {
        Ok(Some(m)) => m.is_participant(user_id),
        _ => false,
    }
}
