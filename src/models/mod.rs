pub mod alert;
pub mod event;
pub mod position;
pub mod tracking;

pub use alert::{Alert, AlertEdit, AlertStatus, NewAlert};
pub use event::{
    Advisory, AdvisoryOutcome, EngineEvent, InboundEvent, PriceTick, TradeConfirmation,
};
pub use position::{
    AlertOrigin, Position, PositionSnapshot, StopLoss, TakeProfit, TpStatus, TradingMode,
};
pub use tracking::{TrackingItem, TrackingReport, TrackingStatus, TrackingSummary};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side: direction of an alert and of the position it spawns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "LONG" | "BUY" => Some(Side::Long),
            "SHORT" | "SELL" => Some(Side::Short),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbols the automatic take-profit ladder never plans for.
pub const EXCLUDED_SYMBOLS: &[&str] = &["ADAUSDT", "ALGOUSDT", "AAVEUSDT"];

pub fn is_excluded_symbol(symbol: &str) -> bool {
    EXCLUDED_SYMBOLS.contains(&symbol)
}

/// Normalize an exchange pair: trimmed, uppercase.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}
