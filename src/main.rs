//! CandleDuel backend entrypoint: bootstraps persistence, the candle
//! source, the broadcast fabric, and background schedulers, then serves
//! the REST + WebSocket surface.

use anyhow::{Context, Result};
use axum::{middleware as axum_mw, routing::get, Router};
use candleduel_backend::auth::{auth_middleware, JwtHandler, NonceStore};
use candleduel_backend::broadcast::{BroadcastFabric, InMemoryRelay, LocalFabric};
use candleduel_backend::candle_source::FilesystemCandleSource;
use candleduel_backend::disconnect::DisconnectSupervisor;
use candleduel_backend::matchmaker::Matchmaker;
use candleduel_backend::middleware::{rate_limit_middleware, request_logging_simple, RateLimitLayer};
use candleduel_backend::position::PositionStore;
use candleduel_backend::room::RoomManager;
use candleduel_backend::scheduler::{self, SchedulerDeps};
use candleduel_backend::store::{MatchStore, SqliteMatchStore};
use candleduel_backend::{AppState, Config};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Arc::new(Config::from_env());
    info!(instance_id = %config.instance_id, port = config.port, "starting candleduel backend");

    let store: Arc<dyn MatchStore> =
        Arc::new(SqliteMatchStore::new(config.database_path.clone()).context("failed to open match store")?);
    let candles: Arc<dyn candleduel_backend::candle_source::CandleSource> =
        Arc::new(FilesystemCandleSource::new(config.candle_data_root.clone()));
    let fabric: Arc<dyn BroadcastFabric> = Arc::new(LocalFabric::new(
        Arc::new(InMemoryRelay),
        config.relay_mac_secret.clone(),
        config.instance_id.clone(),
    ));

    let state = AppState {
        store,
        candles,
        fabric,
        positions: PositionStore::new(),
        rooms: RoomManager::new(),
        nonce_store: NonceStore::new(),
        matchmaker: Arc::new(Matchmaker::new(config.matchmaking_ticket_ttl_secs)),
        disconnect: DisconnectSupervisor::new(config.disconnect_grace_secs),
        config: config.clone(),
    };

    let jwt_handler = Arc::new(JwtHandler::new(
        config.jwt_signing_secret.clone(),
        config.jwt_signing_secret_previous.clone(),
    ));

    spawn_background_tasks(&state);

    let general_limiter = RateLimitLayer::new(config.rate_limit_general.clone());

    let protected_routes = candleduel_backend::api::router()
        .route("/ws", get(candleduel_backend::ws::websocket_handler))
        .route_layer(axum_mw::from_fn_with_state(general_limiter, rate_limit_middleware))
        .route_layer(axum_mw::from_fn_with_state(jwt_handler, auth_middleware))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(request_logging_simple));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr, "candleduel backend listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .context("server error")?;
    Ok(())
}

/// Spawns the instance-wide background loops: the lease scavenger that
/// resumes orphaned matches, the matchmaking sweep, and periodic expiry of
/// stale queue tickets and replay-protection nonces.
fn spawn_background_tasks(state: &AppState) {
    let scheduler_deps = SchedulerDeps {
        store: state.store.clone(),
        candles: state.candles.clone(),
        fabric: state.fabric.clone(),
        positions: state.positions.clone(),
        rooms: state.rooms.clone(),
        instance_id: state.config.instance_id.clone(),
        tick_interval: Duration::from_secs(state.config.scheduler_tick_secs),
        lease_ttl_secs: state.config.lease_ttl_secs,
    };
    tokio::spawn(scheduler::spawn_lease_scavenger(
        scheduler_deps,
        Duration::from_secs(state.config.scheduler_tick_secs),
    ));

    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tick.tick().await;

            for user_id in sweep_state.matchmaker.expire_stale(chrono::Utc::now()) {
                sweep_state.fabric.publish(
                    &format!("/user/{user_id}"),
                    serde_json::json!({ "type": "match-expired" }),
                );
            }

            let pairs = sweep_state.matchmaker.sweep(chrono::Utc::now());
            for (a, b) in &pairs {
                if let Err(e) = candleduel_backend::api::materialize_pair(&sweep_state, a, b).await {
                    tracing::warn!(error = %e, "background matchmaking sweep failed to materialize a pairing");
                }
            }
        }
    });

    let nonce_store = state.nonce_store.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            nonce_store.sweep_older_than(Duration::from_secs(3600), std::time::Instant::now());
        }
    });
}

async fn health_check() -> &'static str {
    "ok"
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "candleduel_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
