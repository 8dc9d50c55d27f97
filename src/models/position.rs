use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Side;

/// Named risk profile fixing leverage band and ladder shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradingMode {
    Swing,
    Scalp,
    Prueba,
}

impl TradingMode {
    pub const ALL: [TradingMode; 3] = [TradingMode::Swing, TradingMode::Scalp, TradingMode::Prueba];

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Swing => "SWING",
            TradingMode::Scalp => "SCALP",
            TradingMode::Prueba => "PRUEBA",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TpStatus {
    Pending,
    Executed,
}

/// One rung of the take-profit ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfit {
    /// TP1..TP4
    pub level: String,
    pub price: Decimal,
    /// Signed distance from entry, in percent.
    pub percent: Decimal,
    /// Share of the original size closed at this level, in percent.
    pub allocation: Decimal,
    /// Informational: marks the level a trader would trail manually. The
    /// engine fills it at its fixed price like any other level.
    pub trailing: bool,
    pub status: TpStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLoss {
    pub price: Decimal,
    /// Signed distance from entry, in percent (negative for LONG).
    pub percent: Decimal,
}

/// Weak back-reference to the alert that spawned a position.
/// Survives deletion of the alert as a historical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertOrigin {
    pub alert_id: i64,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub target_price: Decimal,
    pub notes: String,
}

/// An open futures position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    /// Size at open (or after the last merge); ladder allocations refer to it.
    pub original_size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub leverage: u32,
    pub trading_mode: TradingMode,
    pub auto_tp_enabled: bool,
    pub take_profits: Vec<TakeProfit>,
    pub stop_loss: Option<StopLoss>,
    pub alert_origin: Option<AlertOrigin>,
    pub trade_id: Option<String>,
    pub realized_pnl: Decimal,
    /// Set once an anti-greed advisory was accepted. Informational only: no
    /// trailing stop is run, the remainder keeps its ladder and stop.
    pub trailing_remainder: bool,
    pub hold_expired: bool,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Unrealized PnL in percent of entry, direction-aware.
    pub fn pnl_percent(&self) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let delta = match self.side {
            Side::Long => self.mark_price - self.entry_price,
            Side::Short => self.entry_price - self.mark_price,
        };
        delta / self.entry_price * Decimal::ONE_HUNDRED
    }

    /// Unrealized PnL in quote currency.
    pub fn unrealized_pnl(&self) -> Decimal {
        let delta = match self.side {
            Side::Long => self.mark_price - self.entry_price,
            Side::Short => self.entry_price - self.mark_price,
        };
        self.size.abs() * delta
    }

    /// Realized PnL of closing `qty` at `price`.
    pub fn pnl_for(&self, qty: Decimal, price: Decimal) -> Decimal {
        match self.side {
            Side::Long => qty * (price - self.entry_price),
            Side::Short => qty * (self.entry_price - price),
        }
    }
}

/// Position state reported by the exchange collaborator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    /// Signed: positive LONG, negative SHORT, zero flat.
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    pub timestamp: DateTime<Utc>,
}

pub fn default_leverage() -> u32 {
    1
}
