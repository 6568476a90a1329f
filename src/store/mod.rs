//! Match Store: durable match/trade/rating state behind a small trait, with
//! a SQLite-backed implementation following the donor's direct
//! `Connection::open`-per-call idiom (no pool; SQLite's own file locking
//! serializes writers, and the workload here is not so write-heavy that a
//! pool would earn its complexity).

use crate::error::AppError;
use crate::models::{Match, MatchStats, MatchStatus, Trade, TradeType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn create_match(&self, m: Match) -> Result<Match, AppError>;
    async fn get_match(&self, id: &str) -> Result<Option<Match>, AppError>;
    async fn list_open_matches(&self) -> Result<Vec<Match>, AppError>;

    /// Atomically assigns `opponent_id` and flips status WAITING -> ACTIVE.
    /// Returns `None` if the match was no longer WAITING (already joined,
    /// cancelled, or never existed).
    async fn join_match(&self, id: &str, opponent_id: &str) -> Result<Option<Match>, AppError>;

    /// Compare-and-swap update keyed on `m.version`. Returns `false` if the
    /// stored row's version had already moved past the caller's read.
    async fn update_match_cas(&self, m: &Match) -> Result<bool, AppError>;

    async fn record_trade(&self, trade: &Trade) -> Result<(), AppError>;
    async fn trades_for_match(&self, match_id: &str) -> Result<Vec<Trade>, AppError>;

    /// Persists end-of-match outcome per §4.5: status flips to FINISHED,
    /// end time is stamped, and each player's final balance, final score,
    /// and rating delta are written onto the match row alongside the
    /// per-player `match_stats` breakdown.
    #[allow(clippy::too_many_arguments)]
    async fn finish_match(
        &self,
        id: &str,
        creator_stats: MatchStats,
        opponent_stats: MatchStats,
        creator_final_balance: f64,
        opponent_final_balance: f64,
        creator_rating_delta: i32,
        opponent_rating_delta: i32,
    ) -> Result<(), AppError>;

    async fn get_rating(&self, user_id: &str) -> Result<i32, AppError>;
    async fn set_rating(&self, user_id: &str, rating: i32) -> Result<(), AppError>;

    /// Claims scheduler ownership of `match_id` for `instance_id` if no
    /// instance currently holds an unexpired lease.
    async fn try_acquire_lease(
        &self,
        match_id: &str,
        instance_id: &str,
        ttl_secs: i64,
    ) -> Result<bool, AppError>;

    /// Extends the lease, but only if `instance_id` still holds it.
    async fn renew_lease(
        &self,
        match_id: &str,
        instance_id: &str,
        ttl_secs: i64,
    ) -> Result<bool, AppError>;

    /// ACTIVE matches whose lease has expired (or was never set) — eligible
    /// for any instance to pick up via `try_acquire_lease`.
    async fn find_lease_expired_matches(&self) -> Result<Vec<Match>, AppError>;
}

pub struct SqliteMatchStore {
    path: String,
    write_lock: Mutex<()>,
}

impl SqliteMatchStore {
    pub fn new(path: impl Into<String>) -> Result<Self, AppError> {
        let path = path.into();
        let store = Self {
            path,
            write_lock: Mutex::new(()),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection, AppError> {
        Connection::open(&self.path)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to open match store: {e}")))
    }

    fn migrate(&self) -> Result<(), AppError> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                creator_id TEXT NOT NULL,
                opponent_id TEXT,
                status TEXT NOT NULL,
                starting_cash REAL NOT NULL,
                duration_candles INTEGER NOT NULL,
                candle_index INTEGER NOT NULL,
                started_at TEXT,
                created_at TEXT NOT NULL,
                ended_at TEXT,
                creator_final_balance REAL,
                opponent_final_balance REAL,
                creator_final_score REAL,
                opponent_final_score REAL,
                creator_rating_delta INTEGER,
                opponent_rating_delta INTEGER,
                owner_instance_id TEXT,
                lease_expires_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                match_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                trade_type TEXT NOT NULL,
                quantity REAL NOT NULL,
                price REAL NOT NULL,
                candle_index INTEGER NOT NULL,
                executed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS match_stats (
                match_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                return_pct REAL NOT NULL,
                accuracy_pct REAL NOT NULL,
                max_drawdown_pct REAL NOT NULL,
                composite_score REAL NOT NULL,
                PRIMARY KEY (match_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                rating INTEGER NOT NULL DEFAULT 1200
            );

            CREATE INDEX IF NOT EXISTS idx_trades_match ON trades(match_id);
            CREATE INDEX IF NOT EXISTS idx_matches_status ON matches(status);
            ",
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("match store migration failed: {e}")))?;
        Ok(())
    }
}

fn row_to_match(row: &rusqlite::Row) -> rusqlite::Result<Match> {
    let status_str: String = row.get("status")?;
    let status = MatchStatus::from_str(&status_str).unwrap_or(MatchStatus::Abandoned);

    Ok(Match {
        id: row.get("id")?,
        symbol: row.get("symbol")?,
        creator_id: row.get("creator_id")?,
        opponent_id: row.get("opponent_id")?,
        status,
        starting_cash: row.get("starting_cash")?,
        duration_candles: row.get::<_, i64>("duration_candles")? as u32,
        candle_index: row.get::<_, i64>("candle_index")? as u32,
        started_at: row
            .get::<_, Option<String>>("started_at")?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        created_at: DateTime::parse_from_rfc3339(&row.get::<_, String>("created_at")?)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        ended_at: row
            .get::<_, Option<String>>("ended_at")?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        creator_final_balance: row.get("creator_final_balance")?,
        opponent_final_balance: row.get("opponent_final_balance")?,
        creator_final_score: row.get("creator_final_score")?,
        opponent_final_score: row.get("opponent_final_score")?,
        creator_rating_delta: row.get("creator_rating_delta")?,
        opponent_rating_delta: row.get("opponent_rating_delta")?,
        owner_instance_id: row.get("owner_instance_id")?,
        lease_expires_at: row
            .get::<_, Option<String>>("lease_expires_at")?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|d| d.with_timezone(&Utc)),
        version: row.get("version")?,
    })
}

#[async_trait]
impl MatchStore for SqliteMatchStore {
    async fn create_match(&self, m: Match) -> Result<Match, AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO matches (id, symbol, creator_id, opponent_id, status, starting_cash,
                duration_candles, candle_index, started_at, created_at, ended_at,
                creator_final_balance, opponent_final_balance, creator_final_score,
                opponent_final_score, creator_rating_delta, opponent_rating_delta,
                owner_instance_id, lease_expires_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                m.id,
                m.symbol,
                m.creator_id,
                m.opponent_id,
                m.status.as_str(),
                m.starting_cash,
                m.duration_candles,
                m.candle_index,
                m.started_at.map(|d| d.to_rfc3339()),
                m.created_at.to_rfc3339(),
                m.ended_at.map(|d| d.to_rfc3339()),
                m.creator_final_balance,
                m.opponent_final_balance,
                m.creator_final_score,
                m.opponent_final_score,
                m.creator_rating_delta,
                m.opponent_rating_delta,
                m.owner_instance_id,
                m.lease_expires_at.map(|d| d.to_rfc3339()),
                m.version,
            ],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("create_match failed: {e}")))?;
        Ok(m)
    }

    async fn get_match(&self, id: &str) -> Result<Option<Match>, AppError> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM matches WHERE id = ?1", params![id], row_to_match)
            .optional()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("get_match failed: {e}")))
    }

    async fn list_open_matches(&self) -> Result<Vec<Match>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM matches WHERE status = 'waiting' ORDER BY created_at ASC")
            .map_err(|e| AppError::Internal(anyhow::anyhow!("list_open_matches failed: {e}")))?;
        let rows = stmt
            .query_map([], row_to_match)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("list_open_matches failed: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("list_open_matches failed: {e}")))
    }

    async fn join_match(&self, id: &str, opponent_id: &str) -> Result<Option<Match>, AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE matches SET opponent_id = ?1, status = 'active', started_at = ?2, version = version + 1
                 WHERE id = ?3 AND status = 'waiting' AND creator_id != ?1",
                params![opponent_id, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| AppError::Internal(anyhow::anyhow!("join_match failed: {e}")))?;

        if updated == 0 {
            return Ok(None);
        }

        conn.query_row("SELECT * FROM matches WHERE id = ?1", params![id], row_to_match)
            .optional()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("join_match reload failed: {e}")))
    }

    async fn update_match_cas(&self, m: &Match) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE matches SET status = ?1, candle_index = ?2, owner_instance_id = ?3,
                    lease_expires_at = ?4, version = version + 1
                 WHERE id = ?5 AND version = ?6",
                params![
                    m.status.as_str(),
                    m.candle_index,
                    m.owner_instance_id,
                    m.lease_expires_at.map(|d| d.to_rfc3339()),
                    m.id,
                    m.version,
                ],
            )
            .map_err(|e| AppError::Internal(anyhow::anyhow!("update_match_cas failed: {e}")))?;
        Ok(updated == 1)
    }

    async fn record_trade(&self, trade: &Trade) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO trades (id, match_id, user_id, symbol, trade_type, quantity, price,
                candle_index, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade.id,
                trade.match_id,
                trade.user_id,
                trade.symbol,
                trade.trade_type.as_str(),
                trade.quantity,
                trade.price,
                trade.candle_index,
                trade.executed_at.to_rfc3339(),
            ],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("record_trade failed: {e}")))?;
        Ok(())
    }

    async fn trades_for_match(&self, match_id: &str) -> Result<Vec<Trade>, AppError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM trades WHERE match_id = ?1 ORDER BY executed_at ASC")
            .map_err(|e| AppError::Internal(anyhow::anyhow!("trades_for_match failed: {e}")))?;
        let rows = stmt
            .query_map(params![match_id], |row| {
                let trade_type_str: String = row.get("trade_type")?;
                Ok(Trade {
                    id: row.get("id")?,
                    match_id: row.get("match_id")?,
                    user_id: row.get("user_id")?,
                    symbol: row.get("symbol")?,
                    trade_type: TradeType::from_str(&trade_type_str).unwrap_or(TradeType::Buy),
                    quantity: row.get("quantity")?,
                    price: row.get("price")?,
                    candle_index: row.get::<_, i64>("candle_index")? as u32,
                    executed_at: DateTime::parse_from_rfc3339(&row.get::<_, String>("executed_at")?)
                        .map(|d| d.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })
            .map_err(|e| AppError::Internal(anyhow::anyhow!("trades_for_match failed: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("trades_for_match failed: {e}")))
    }

    async fn finish_match(
        &self,
        id: &str,
        creator_stats: MatchStats,
        opponent_stats: MatchStats,
        creator_final_balance: f64,
        opponent_final_balance: f64,
        creator_rating_delta: i32,
        opponent_rating_delta: i32,
    ) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("finish_match tx failed: {e}")))?;

        let m = tx
            .query_row("SELECT * FROM matches WHERE id = ?1", params![id], row_to_match)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("finish_match lookup failed: {e}")))?;

        tx.execute(
            "UPDATE matches SET status = 'finished', ended_at = ?1,
                creator_final_balance = ?2, opponent_final_balance = ?3,
                creator_final_score = ?4, opponent_final_score = ?5,
                creator_rating_delta = ?6, opponent_rating_delta = ?7,
                version = version + 1
             WHERE id = ?8",
            params![
                Utc::now().to_rfc3339(),
                creator_final_balance,
                opponent_final_balance,
                creator_stats.composite_score,
                opponent_stats.composite_score,
                creator_rating_delta,
                opponent_rating_delta,
                id,
            ],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("finish_match update failed: {e}")))?;

        for (user_id, stats) in [
            (m.creator_id.as_str(), creator_stats),
            (m.opponent_id.as_deref().unwrap_or_default(), opponent_stats),
        ] {
            if user_id.is_empty() {
                continue;
            }
            tx.execute(
                "INSERT OR REPLACE INTO match_stats
                    (match_id, user_id, return_pct, accuracy_pct, max_drawdown_pct, composite_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id,
                    user_id,
                    stats.return_pct,
                    stats.accuracy_pct,
                    stats.max_drawdown_pct,
                    stats.composite_score,
                ],
            )
            .map_err(|e| AppError::Internal(anyhow::anyhow!("finish_match stats failed: {e}")))?;
        }

        tx.commit()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("finish_match commit failed: {e}")))?;
        Ok(())
    }

    async fn get_rating(&self, user_id: &str) -> Result<i32, AppError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT rating FROM users WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, i32>(0),
        )
        .optional()
        .map_err(|e| AppError::Internal(anyhow::anyhow!("get_rating failed: {e}")))
        .map(|v| v.unwrap_or(1200))
    }

    async fn set_rating(&self, user_id: &str, rating: i32) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (user_id, rating) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET rating = excluded.rating",
            params![user_id, rating],
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("set_rating failed: {e}")))?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        match_id: &str,
        instance_id: &str,
        ttl_secs: i64,
    ) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.conn()?;
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(ttl_secs);
        let updated = conn
            .execute(
                "UPDATE matches SET owner_instance_id = ?1, lease_expires_at = ?2, version = version + 1
                 WHERE id = ?3 AND status = 'active'
                   AND (owner_instance_id IS NULL OR lease_expires_at IS NULL OR lease_expires_at < ?4)",
                params![instance_id, expires.to_rfc3339(), match_id, now.to_rfc3339()],
            )
            .map_err(|e| AppError::Internal(anyhow::anyhow!("try_acquire_lease failed: {e}")))?;
        Ok(updated == 1)
    }

    async fn renew_lease(
        &self,
        match_id: &str,
        instance_id: &str,
        ttl_secs: i64,
    ) -> Result<bool, AppError> {
        let _guard = self.write_lock.lock().unwrap();
        let conn = self.conn()?;
        let expires = Utc::now() + chrono::Duration::seconds(ttl_secs);
        let updated = conn
            .execute(
                "UPDATE matches SET lease_expires_at = ?1, version = version + 1
                 WHERE id = ?2 AND owner_instance_id = ?3",
                params![expires.to_rfc3339(), match_id, instance_id],
            )
            .map_err(|e| AppError::Internal(anyhow::anyhow!("renew_lease failed: {e}")))?;
        Ok(updated == 1)
    }

    async fn find_lease_expired_matches(&self) -> Result<Vec<Match>, AppError> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM matches WHERE status = 'active'
                 AND (owner_instance_id IS NULL OR lease_expires_at IS NULL OR lease_expires_at < ?1)",
            )
            .map_err(|e| AppError::Internal(anyhow::anyhow!("find_lease_expired_matches failed: {e}")))?;
        let rows = stmt
            .query_map(params![now], row_to_match)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("find_lease_expired_matches failed: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("find_lease_expired_matches failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> SqliteMatchStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        SqliteMatchStore::new(path.to_string_lossy().to_string()).unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_roundtrip() {
        let store = temp_store();
        let m = Match::new("m1".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
        store.create_match(m.clone()).await.unwrap();

        let fetched = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(fetched.symbol, "ABC");
        assert_eq!(fetched.status, MatchStatus::Waiting);
    }

    #[tokio::test]
    async fn join_match_transitions_to_active_once() {
        let store = temp_store();
        let m = Match::new("m2".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
        store.create_match(m).await.unwrap();

        let joined = store.join_match("m2", "bob").await.unwrap();
        assert!(joined.is_some());
        assert_eq!(joined.unwrap().status, MatchStatus::Active);

        // second join attempt fails, already active
        let second = store.join_match("m2", "carol").await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn creator_cannot_join_own_match() {
        let store = temp_store();
        let m = Match::new("m3".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
        store.create_match(m).await.unwrap();

        let joined = store.join_match("m3", "alice").await.unwrap();
        assert!(joined.is_none());
    }

    #[tokio::test]
    async fn update_match_cas_rejects_stale_version() {
        let store = temp_store();
        let m = Match::new("m4".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
        store.create_match(m.clone()).await.unwrap();

        let mut stale = m.clone();
        stale.candle_index = 1;
        assert!(store.update_match_cas(&stale).await.unwrap());

        // stale.version is still 0, but the row is now at version 1
        assert!(!store.update_match_cas(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn lease_acquire_is_exclusive_until_expiry() {
        let store = temp_store();
        let mut m = Match::new("m5".into(), "ABC".into(), "alice".into(), 10_000.0, 20);
        m.status = MatchStatus::Active;
        store.create_match(m).await.unwrap();

        assert!(store.try_acquire_lease("m5", "inst-a", 60).await.unwrap());
        assert!(!store.try_acquire_lease("m5", "inst-b", 60).await.unwrap());
        assert!(store.renew_lease("m5", "inst-a", 60).await.unwrap());
        assert!(!store.renew_lease("m5", "inst-b", 60).await.unwrap());
    }
}
