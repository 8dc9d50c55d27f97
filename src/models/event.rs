use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::position::default_leverage;
use super::{Alert, Position, PositionSnapshot, TradingMode};

// ---------------------------------------------------------------------------
// Inbound: delivered by collaborators, applied per symbol in arrival order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Trade-execution confirmation for a triggered alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfirmation {
    pub alert_id: i64,
    pub trade_id: String,
    pub timestamp: DateTime<Utc>,
    /// Fill price; falls back to the last tick, then the alert target.
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub trading_mode: Option<TradingMode>,
}

#[derive(Debug, Clone)]
pub enum InboundEvent {
    Tick(PriceTick),
    Confirmation(TradeConfirmation),
    Snapshot(PositionSnapshot),
}

// ---------------------------------------------------------------------------
// Anti-greed advisory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryOutcome {
    Accepted,
    Ignored,
}

/// Recommendation to take partial profit. Never closes anything by itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub id: Uuid,
    pub symbol: String,
    /// `opened_at` of the position the advisory was raised for.
    pub position_opened_at: DateTime<Utc>,
    pub pnl_percent: Decimal,
    pub threshold: Decimal,
    /// Share of the position to close across the ladder.
    pub close_pct: Decimal,
    /// Share left running. The engine only flags it, see `Position::trailing_remainder`.
    pub trail_pct: Decimal,
    pub raised_at: DateTime<Utc>,
    pub outcome: Option<AdvisoryOutcome>,
}

// ---------------------------------------------------------------------------
// Outbound: broadcast to notification collaborators and dashboard sockets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    #[serde(rename = "alert_triggered")]
    AlertTriggered { alert: Alert, price: Decimal },

    #[serde(rename = "alert_near_target")]
    AlertNearTarget { alert: Alert, price: Decimal },

    #[serde(rename = "alert_executed")]
    AlertExecuted(Alert),

    #[serde(rename = "alert_cancelled")]
    AlertCancelled(Alert),

    #[serde(rename = "alert_expired")]
    AlertExpired(Alert),

    #[serde(rename = "position_opened")]
    PositionOpened(Position),

    #[serde(rename = "tp_executed")]
    TpExecuted {
        symbol: String,
        level: String,
        price: Decimal,
        closed_size: Decimal,
        realized_pnl: Decimal,
    },

    #[serde(rename = "stop_loss_moved")]
    StopLossMoved { symbol: String, price: Decimal },

    #[serde(rename = "position_closed")]
    PositionClosed {
        symbol: String,
        reason: String,
        price: Decimal,
        realized_pnl: Decimal,
    },

    #[serde(rename = "hold_expired")]
    HoldExpired {
        symbol: String,
        trading_mode: TradingMode,
        opened_at: DateTime<Utc>,
    },

    #[serde(rename = "advisory_raised")]
    AdvisoryRaised(Advisory),
}

impl EngineEvent {
    pub fn symbol(&self) -> &str {
        match self {
            EngineEvent::AlertTriggered { alert, .. }
            | EngineEvent::AlertNearTarget { alert, .. } => &alert.symbol,
            EngineEvent::AlertExecuted(a)
            | EngineEvent::AlertCancelled(a)
            | EngineEvent::AlertExpired(a) => &a.symbol,
            EngineEvent::PositionOpened(p) => &p.symbol,
            EngineEvent::TpExecuted { symbol, .. }
            | EngineEvent::StopLossMoved { symbol, .. }
            | EngineEvent::PositionClosed { symbol, .. }
            | EngineEvent::HoldExpired { symbol, .. } => symbol,
            EngineEvent::AdvisoryRaised(a) => &a.symbol,
        }
    }
}
