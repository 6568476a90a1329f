use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Buy,
    Sell,
    Short,
    Cover,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "buy",
            TradeType::Sell => "sell",
            TradeType::Short => "short",
            TradeType::Cover => "cover",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(TradeType::Buy),
            "sell" => Some(TradeType::Sell),
            "short" => Some(TradeType::Short),
            "cover" => Some(TradeType::Cover),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub match_id: String,
    pub user_id: String,
    pub symbol: String,
    pub trade_type: TradeType,
    pub quantity: f64,
    pub price: f64,
    pub candle_index: u32,
    pub executed_at: DateTime<Utc>,
}
