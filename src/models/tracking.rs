use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{Side, TradingMode};

/// Outcome class of a triggered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    PositionOpened,
    NotTaken,
    TriggeredOnly,
}

/// Derived, non-persisted join of a triggered alert with its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingItem {
    pub alert_id: i64,
    pub symbol: String,
    pub alert_type: Side,
    pub target_price: Decimal,
    pub triggered_at: DateTime<Utc>,
    pub status: TrackingStatus,
    pub missed_opportunity: bool,
    pub position_pnl: Option<Decimal>,
    pub position_pnl_usd: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub trading_mode: Option<TradingMode>,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingSummary {
    pub total_alerts: usize,
    pub positions_opened: usize,
    pub missed_opportunities: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingReport {
    pub tracking: Vec<TrackingItem>,
    pub count: usize,
    pub summary: TrackingSummary,
}
