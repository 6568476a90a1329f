//! Runtime configuration, loaded once at startup from the environment.

use crate::middleware::RateLimitConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub candle_data_root: String,

    pub jwt_signing_secret: String,
    pub jwt_signing_secret_previous: Option<String>,
    pub relay_mac_secret: String,

    pub cors_allowed_origins: Vec<String>,

    pub rate_limit_general: RateLimitConfig,
    pub rate_limit_trade: RateLimitConfig,
    pub rate_limit_create: RateLimitConfig,

    pub disconnect_grace_secs: u64,
    pub scheduler_pool_size: usize,
    pub scheduler_tick_secs: u64,
    pub lease_ttl_secs: i64,
    pub matchmaking_ticket_ttl_secs: i64,

    pub instance_id: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let port = env_parse("PORT", 8080);
        let database_path = env_str("DATABASE_PATH", "./candleduel.db");
        let candle_data_root = env_str("CANDLE_DATA_ROOT", "./candles");

        let jwt_signing_secret = env_str(
            "JWT_SIGNING_SECRET",
            "dev-secret-change-in-production-minimum-32-characters",
        );
        let jwt_signing_secret_previous = std::env::var("JWT_SIGNING_SECRET_PREVIOUS").ok();
        let relay_mac_secret = env_str("RELAY_MAC_SECRET", "dev-relay-mac-secret");

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let rate_limit_general = RateLimitConfig {
            max_requests: env_parse("RATE_LIMIT_GENERAL_RPM", 300),
            window: Duration::from_secs(60),
            burst: env_parse("RATE_LIMIT_GENERAL_BURST", 50),
        };
        let rate_limit_trade = RateLimitConfig {
            max_requests: env_parse("RATE_LIMIT_TRADE_RPM", 60),
            window: Duration::from_secs(60),
            burst: env_parse("RATE_LIMIT_TRADE_BURST", 10),
        };
        let rate_limit_create = RateLimitConfig {
            max_requests: env_parse("RATE_LIMIT_CREATE_RPM", 10),
            window: Duration::from_secs(60),
            burst: env_parse("RATE_LIMIT_CREATE_BURST", 2),
        };

        let disconnect_grace_secs = env_parse("DISCONNECT_GRACE_SECS", 15);
        let scheduler_pool_size = env_parse("SCHEDULER_POOL_SIZE", 0usize);
        let scheduler_tick_secs = env_parse("SCHEDULER_TICK_SECS", 5);
        let lease_ttl_secs = env_parse("SCHEDULER_LEASE_TTL_SECS", 60);
        let matchmaking_ticket_ttl_secs = env_parse("MATCHMAKING_TICKET_TTL_SECS", 120);

        let instance_id = std::env::var("INSTANCE_ID")
            .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        Self {
            port,
            database_path,
            candle_data_root,
            jwt_signing_secret,
            jwt_signing_secret_previous,
            relay_mac_secret,
            cors_allowed_origins,
            rate_limit_general,
            rate_limit_trade,
            rate_limit_create,
            disconnect_grace_secs,
            scheduler_pool_size,
            scheduler_tick_secs,
            lease_ttl_secs,
            matchmaking_ticket_ttl_secs,
            instance_id,
        }
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
