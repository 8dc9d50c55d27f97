use axum::extract::State;
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{AlertStatus, Position};
use crate::AppState;

use super::ApiResponse;

#[derive(Serialize)]
pub struct DashboardSummary {
    pub pending_alerts: usize,
    pub triggered_alerts: usize,
    pub executed_alerts: usize,
    pub open_positions: usize,
    pub unrealized_pnl: Decimal,
    pub realized_pnl_today: Decimal,
    pub opportunities: usize,
    pub open_advisories: usize,
    pub missed_opportunities: usize,
}

pub async fn summary(State(state): State<AppState>) -> Json<ApiResponse<DashboardSummary>> {
    let now = Utc::now();
    let snap = state.engine.snapshot().await;
    let count = |status: AlertStatus| snap.alerts.iter().filter(|a| a.status == status).count();

    let today = now.date_naive();
    let realized_pnl_today = snap
        .positions
        .iter()
        .chain(snap.closed_positions.iter())
        .filter(|p| p.updated_at.date_naive() == today)
        .map(|p| p.realized_pnl)
        .sum();

    let opportunities = state.engine.opportunities().await.len();
    let tracking = state.engine.tracking(now).await;

    ApiResponse::ok(DashboardSummary {
        pending_alerts: count(AlertStatus::Pending),
        triggered_alerts: count(AlertStatus::Triggered),
        executed_alerts: count(AlertStatus::Executed),
        open_positions: snap.positions.len(),
        unrealized_pnl: snap.positions.iter().map(Position::unrealized_pnl).sum(),
        realized_pnl_today,
        opportunities,
        open_advisories: snap.advisories.iter().filter(|a| a.outcome.is_none()).count(),
        missed_opportunities: tracking.summary.missed_opportunities,
    })
}
