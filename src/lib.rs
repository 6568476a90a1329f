//! CandleDuel backend library.
//!
//! Exposes the service's modules for use by the binary entrypoint and by
//! integration tests, plus the shared `AppState` every handler and
//! background task is built against.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod candle_source;
pub mod config;
pub mod disconnect;
pub mod elo;
pub mod error;
pub mod matchmaker;
pub mod middleware;
pub mod models;
pub mod position;
pub mod room;
pub mod scheduler;
pub mod store;
pub mod trade;
pub mod ws;

pub use config::Config;
pub use error::AppError;

use auth::NonceStore;
use broadcast::BroadcastFabric;
use candle_source::CandleSource;
use disconnect::DisconnectSupervisor;
use matchmaker::Matchmaker;
use position::PositionStore;
use room::RoomManager;
use std::sync::Arc;
use store::MatchStore;

/// Everything an axum handler or background task needs a handle to. Cheap
/// to clone: every field is itself an `Arc` or an `Arc`-backed wrapper.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MatchStore>,
    pub candles: Arc<dyn CandleSource>,
    pub fabric: Arc<dyn BroadcastFabric>,
    pub positions: PositionStore,
    pub rooms: RoomManager,
    pub nonce_store: NonceStore,
    pub matchmaker: Arc<Matchmaker>,
    pub disconnect: DisconnectSupervisor,
    pub config: Arc<Config>,
}
