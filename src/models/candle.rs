use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// A contiguous slice of a match's candle series, returned to clients that
/// poll the history endpoint rather than trust their local replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleWindow {
    pub symbol: String,
    pub candles: Vec<Candle>,
    pub next_index: u32,
    pub remaining: u32,
}
