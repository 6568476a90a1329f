use serde::{Deserialize, Serialize};

/// One player's open position within one match.
///
/// `long_avg` is the cost-basis average entry price of the current long
/// shares, carried so a SELL can be checked against the "profitable iff
/// `price > long_avg`" rule without re-deriving it from trade history.
/// SHORT/COVER never touch `cash` directly: a short is a notional bet
/// against `short_avg`, settled entirely through the equity formula below,
/// with `cash` only ever moving on BUY/SELL and on COVER's realized P&L.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPosition {
    pub match_id: String,
    pub user_id: String,
    pub cash: f64,
    pub shares_long: f64,
    pub shares_short: f64,
    pub long_avg: f64,
    pub short_avg: f64,
    pub starting_cash: f64,
    pub peak_equity: f64,
    pub max_drawdown_pct: f64,
    pub trade_count: u32,
    pub profitable_closes: u32,
}

impl PlayerPosition {
    pub fn new(match_id: String, user_id: String, starting_cash: f64) -> Self {
        Self {
            match_id,
            user_id,
            cash: starting_cash,
            shares_long: 0.0,
            shares_short: 0.0,
            long_avg: 0.0,
            short_avg: 0.0,
            starting_cash,
            peak_equity: starting_cash,
            max_drawdown_pct: 0.0,
            trade_count: 0,
            profitable_closes: 0,
        }
    }

    /// Mark-to-market equity at the given price, exactly as defined in §3:
    /// cash, plus the value of long shares, plus the short leg's unrealized
    /// P&L (`short_avg - price` per share still short).
    pub fn equity(&self, price: f64) -> f64 {
        self.cash + self.shares_long * price + self.shares_short * (self.short_avg - price)
    }

    /// Updates the running peak and drawdown from the current price. Called
    /// once per scheduler tick so drawdown reflects the whole match, not
    /// just the instant a trade happened to land on.
    pub fn mark_to_market(&mut self, price: f64) {
        let equity = self.equity(price);
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        if self.peak_equity > 0.0 {
            let drawdown = (self.peak_equity - equity) / self.peak_equity * 100.0;
            if drawdown > self.max_drawdown_pct {
                self.max_drawdown_pct = drawdown;
            }
        }
    }

    pub fn return_pct(&self, price: f64) -> f64 {
        if self.starting_cash <= 0.0 {
            return 0.0;
        }
        (self.equity(price) - self.starting_cash) / self.starting_cash * 100.0
    }

    pub fn accuracy_pct(&self) -> f64 {
        if self.trade_count == 0 {
            return 0.0;
        }
        self.profitable_closes as f64 / self.trade_count as f64 * 100.0
    }
}
