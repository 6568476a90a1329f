pub mod candle;
pub mod match_model;
pub mod position;
pub mod stats;
pub mod ticket;
pub mod trade;

pub use candle::{Candle, CandleWindow};
pub use match_model::{Match, MatchStatus};
pub use position::PlayerPosition;
pub use stats::MatchStats;
pub use ticket::MatchTicket;
pub use trade::{Trade, TradeType};
