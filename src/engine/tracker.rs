use chrono::{DateTime, Duration, Utc};

use crate::models::{
    Alert, AlertStatus, Position, TrackingItem, TrackingReport, TrackingStatus, TrackingSummary,
};

/// Windows used to classify triggered alerts.
#[derive(Debug, Clone, Copy)]
pub struct TrackingWindow {
    /// Only alerts triggered within this span are reported.
    pub lookback: Duration,
    /// A triggered alert without a position becomes a miss after this span.
    pub grace: Duration,
}

impl Default for TrackingWindow {
    fn default() -> Self {
        Self {
            lookback: Duration::hours(24),
            grace: Duration::minutes(60),
        }
    }
}

/// Classify every qualifying alert into exactly one tracking status.
///
/// `positions` holds open positions and recently closed ones (size zero).
/// Pure: the same inputs always produce the same report.
pub fn classify(
    alerts: &[Alert],
    positions: &[Position],
    now: DateTime<Utc>,
    window: TrackingWindow,
) -> TrackingReport {
    let since = now - window.lookback;

    let mut tracking: Vec<TrackingItem> = alerts
        .iter()
        .filter(|a| matches!(a.status, AlertStatus::Triggered | AlertStatus::Executed))
        .filter_map(|a| a.triggered_at.filter(|t| *t >= since).map(|t| (a, t)))
        .map(|(alert, triggered_at)| {
            let position = positions.iter().find(|p| {
                p.symbol == alert.symbol
                    && p.alert_origin.as_ref().map(|o| o.alert_id) == Some(alert.id)
            });
            classify_one(alert, triggered_at, position, now, window.grace)
        })
        .collect();

    tracking.sort_by(|a, b| {
        b.triggered_at
            .cmp(&a.triggered_at)
            .then_with(|| b.alert_id.cmp(&a.alert_id))
    });

    let summary = TrackingSummary {
        total_alerts: tracking.len(),
        positions_opened: tracking
            .iter()
            .filter(|t| t.status == TrackingStatus::PositionOpened)
            .count(),
        missed_opportunities: tracking.iter().filter(|t| t.missed_opportunity).count(),
    };

    TrackingReport {
        count: tracking.len(),
        tracking,
        summary,
    }
}

fn classify_one(
    alert: &Alert,
    triggered_at: DateTime<Utc>,
    position: Option<&Position>,
    now: DateTime<Utc>,
    grace: Duration,
) -> TrackingItem {
    let mut item = TrackingItem {
        alert_id: alert.id,
        symbol: alert.symbol.clone(),
        alert_type: alert.alert_type,
        target_price: alert.target_price,
        triggered_at,
        status: TrackingStatus::TriggeredOnly,
        missed_opportunity: false,
        position_pnl: None,
        position_pnl_usd: None,
        realized_pnl: None,
        trading_mode: None,
        notes: alert.notes.clone(),
    };

    match position {
        Some(p) => {
            item.status = TrackingStatus::PositionOpened;
            item.trading_mode = Some(p.trading_mode);
            item.realized_pnl = Some(p.realized_pnl);
            if !p.size.is_zero() {
                item.position_pnl = Some(p.pnl_percent().round_dp(4));
                item.position_pnl_usd = Some(p.unrealized_pnl().round_dp(4));
            }
        }
        // Executed carries a trade id; the position may already be gone.
        None if alert.status == AlertStatus::Executed => {
            item.status = TrackingStatus::PositionOpened;
        }
        None if now - triggered_at >= grace => {
            item.status = TrackingStatus::NotTaken;
            item.missed_opportunity = true;
        }
        None => {}
    }

    item
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
