//! Trade Executor: validates and applies BUY/SELL/SHORT/COVER orders
//! against a player's position under the Position Store's per-key lock.

use crate::error::AppError;
use crate::models::{PlayerPosition, TradeType};

pub struct TradeExecutor;

impl TradeExecutor {
    /// Validates `trade_type`/`quantity`/`price` against `position` and, if
    /// valid, mutates `position` in place. The caller holds the position's
    /// mutex for the duration of this call, so there is no interleaving
    /// between validation and application for this (match, user) pair.
    pub fn apply(
        position: &mut PlayerPosition,
        trade_type: TradeType,
        quantity: f64,
        price: f64,
    ) -> Result<(), AppError> {
        if quantity <= 0.0 || !quantity.is_finite() {
            return Err(AppError::InvalidQuantity);
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(AppError::InvalidQuantity);
        }

        match trade_type {
            TradeType::Buy => Self::buy(position, quantity, price),
            TradeType::Sell => Self::sell(position, quantity, price),
            TradeType::Short => Self::short(position, quantity, price),
            TradeType::Cover => Self::cover(position, quantity, price),
        }
    }

    fn buy(position: &mut PlayerPosition, quantity: f64, price: f64) -> Result<(), AppError> {
        let cost = quantity * price;
        if position.cash < cost {
            return Err(AppError::InsufficientFunds);
        }

        let total_shares = position.shares_long + quantity;
        position.long_avg = if total_shares > 0.0 {
            (position.long_avg * position.shares_long + price * quantity) / total_shares
        } else {
            0.0
        };
        position.shares_long = total_shares;
        position.cash -= cost;
        Ok(())
    }

    fn sell(position: &mut PlayerPosition, quantity: f64, price: f64) -> Result<(), AppError> {
        if position.shares_long < quantity {
            return Err(AppError::InsufficientShares);
        }

        let proceeds = quantity * price;
        position.cash += proceeds;
        position.shares_long -= quantity;
        position.trade_count += 1;
        if price > position.long_avg {
            position.profitable_closes += 1;
        }
        if position.shares_long <= 0.0 {
            position.shares_long = 0.0;
            position.long_avg = 0.0;
        }
        Ok(())
    }

    fn short(position: &mut PlayerPosition, quantity: f64, price: f64) -> Result<(), AppError> {
        let notional = quantity * price;
        if position.cash < notional {
            return Err(AppError::InsufficientFunds);
        }

        let total_shares = position.shares_short + quantity;
        position.short_avg = if total_shares > 0.0 {
            (position.short_avg * position.shares_short + price * quantity) / total_shares
        } else {
            0.0
        };
        position.shares_short = total_shares;
        Ok(())
    }

    fn cover(position: &mut PlayerPosition, quantity: f64, price: f64) -> Result<(), AppError> {
        if position.shares_short < quantity {
            return Err(AppError::InsufficientShortPosition);
        }

        position.cash += quantity * (position.short_avg - price);
        position.shares_short -= quantity;
        position.trade_count += 1;
        if price < position.short_avg {
            position.profitable_closes += 1;
        }
        if position.shares_short <= 0.0 {
            position.shares_short = 0.0;
            position.short_avg = 0.0;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos() -> PlayerPosition {
        PlayerPosition::new("m1".into(), "alice".into(), 10_000.0)
    }

    #[test]
    fn buy_reduces_cash_and_sets_long_avg() {
        let mut p = pos();
        TradeExecutor::apply(&mut p, TradeType::Buy, 10.0, 100.0).unwrap();
        assert_eq!(p.cash, 9_000.0);
        assert_eq!(p.shares_long, 10.0);
        assert_eq!(p.long_avg, 100.0);
    }

    #[test]
    fn buy_rejects_when_cash_insufficient() {
        let mut p = pos();
        let err = TradeExecutor::apply(&mut p, TradeType::Buy, 1000.0, 100.0).unwrap_err();
        assert!(matches!(err, AppError::InsufficientFunds));
    }

    #[test]
    fn sell_rejects_when_shares_insufficient() {
        let mut p = pos();
        let err = TradeExecutor::apply(&mut p, TradeType::Sell, 1.0, 100.0).unwrap_err();
        assert!(matches!(err, AppError::InsufficientShares));
    }

    #[test]
    fn buy_then_sell_roundtrips_cash_at_flat_price() {
        let mut p = pos();
        TradeExecutor::apply(&mut p, TradeType::Buy, 10.0, 100.0).unwrap();
        TradeExecutor::apply(&mut p, TradeType::Sell, 10.0, 100.0).unwrap();
        assert_eq!(p.cash, 10_000.0);
        assert_eq!(p.shares_long, 0.0);
        assert_eq!(p.long_avg, 0.0);
    }

    #[test]
    fn short_is_a_margin_hold_and_leaves_cash_untouched() {
        let mut p = pos();
        TradeExecutor::apply(&mut p, TradeType::Short, 10.0, 100.0).unwrap();
        assert_eq!(p.cash, 10_000.0);
        assert_eq!(p.shares_short, 10.0);
        assert_eq!(p.short_avg, 100.0);
        // opening a short at the entry price must not move equity
        assert_eq!(p.equity(100.0), 10_000.0);
    }

    #[test]
    fn short_then_cover_profits_when_price_drops() {
        let mut p = pos();
        TradeExecutor::apply(&mut p, TradeType::Short, 10.0, 100.0).unwrap();
        TradeExecutor::apply(&mut p, TradeType::Cover, 10.0, 80.0).unwrap();
        // realized P&L credited as cash: 10 * (100 - 80) = 200
        assert_eq!(p.cash, 10_200.0);
        assert_eq!(p.shares_short, 0.0);
        assert_eq!(p.short_avg, 0.0);
    }

    #[test]
    fn s1_opponent_short_equity_matches_spec_scenario() {
        // S1: opponent starts at 100_000, SHORTs 100 @ candle close 102,
        // series ends at close 105 -> equity = 100000 + 100*(102-105) = 99700
        let mut p = PlayerPosition::new("m1".into(), "bob".into(), 100_000.0);
        TradeExecutor::apply(&mut p, TradeType::Short, 100.0, 102.0).unwrap();
        assert_eq!(p.equity(105.0), 99_700.0);
    }

    #[test]
    fn cover_rejects_when_short_position_insufficient() {
        let mut p = pos();
        let err = TradeExecutor::apply(&mut p, TradeType::Cover, 1.0, 100.0).unwrap_err();
        assert!(matches!(err, AppError::InsufficientShortPosition));
    }

    #[test]
    fn zero_or_negative_quantity_is_rejected() {
        let mut p = pos();
        assert!(TradeExecutor::apply(&mut p, TradeType::Buy, 0.0, 100.0).is_err());
        assert!(TradeExecutor::apply(&mut p, TradeType::Buy, -5.0, 100.0).is_err());
    }
}
