use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Waiting,
    Active,
    Finished,
    Abandoned,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::Active => "active",
            MatchStatus::Finished => "finished",
            MatchStatus::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(MatchStatus::Waiting),
            "active" => Some(MatchStatus::Active),
            "finished" => Some(MatchStatus::Finished),
            "abandoned" => Some(MatchStatus::Abandoned),
            _ => None,
        }
    }
}

/// A single 1v1 candle-trading match.
///
/// `version` backs optimistic concurrency: any writer reading a match must
/// include the observed version in its update predicate, and a write that
/// finds zero rows affected must retry against the freshly read row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub symbol: String,
    pub creator_id: String,
    pub opponent_id: Option<String>,
    pub status: MatchStatus,
    pub starting_cash: f64,
    pub duration_candles: u32,
    pub candle_index: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub creator_final_balance: Option<f64>,
    pub opponent_final_balance: Option<f64>,
    pub creator_final_score: Option<f64>,
    pub opponent_final_score: Option<f64>,
    pub creator_rating_delta: Option<i32>,
    pub opponent_rating_delta: Option<i32>,
    pub owner_instance_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl Match {
    pub fn new(id: String, symbol: String, creator_id: String, starting_cash: f64, duration_candles: u32) -> Self {
        Self {
            id,
            symbol,
            creator_id,
            opponent_id: None,
            status: MatchStatus::Waiting,
            starting_cash,
            duration_candles,
            candle_index: 0,
            started_at: None,
            created_at: Utc::now(),
            ended_at: None,
            creator_final_balance: None,
            opponent_final_balance: None,
            creator_final_score: None,
            opponent_final_score: None,
            creator_rating_delta: None,
            opponent_rating_delta: None,
            owner_instance_id: None,
            lease_expires_at: None,
            version: 0,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.creator_id == user_id || self.opponent_id.as_deref() == Some(user_id)
    }
}
