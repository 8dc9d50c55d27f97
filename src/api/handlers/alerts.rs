use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::{AlertStats, ConfirmOutcome};
use crate::errors::AppError;
use crate::models::{
    normalize_symbol, Alert, AlertEdit, AlertStatus, NewAlert, Position, TradeConfirmation,
    TradingMode,
};
use crate::AppState;

use super::ApiResponse;

/// Alert as served to clients: stored fields plus progress clamped for display.
#[derive(Debug, Serialize)]
pub struct AlertView {
    #[serde(flatten)]
    pub alert: Alert,
    pub progress_display: Decimal,
}

impl From<Alert> for AlertView {
    fn from(alert: Alert) -> Self {
        Self {
            progress_display: alert.display_progress(),
            alert,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub symbol: Option<String>,
}

/// GET /api/alerts
pub async fn list(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<AlertView>>>, AppError> {
    let status = match q.status.as_deref() {
        Some(s) => Some(
            AlertStatus::from_db_str(&s.trim().to_uppercase())
                .ok_or_else(|| AppError::BadRequest(format!("unknown status: {s}")))?,
        ),
        None => None,
    };
    let symbol = q.symbol.as_deref().map(normalize_symbol);

    let alerts = state
        .engine
        .alerts()
        .await
        .into_iter()
        .filter(|a| status.map_or(true, |s| a.status == s))
        .filter(|a| symbol.as_deref().map_or(true, |s| a.symbol == s))
        .map(AlertView::from)
        .collect();

    Ok(ApiResponse::ok(alerts))
}

/// POST /api/alerts
pub async fn create(
    State(state): State<AppState>,
    Json(cmd): Json<NewAlert>,
) -> Result<(StatusCode, Json<ApiResponse<AlertView>>), AppError> {
    let alert = state.engine.create_alert(cmd).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(alert.into())))
}

/// GET /api/alerts/:id
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AlertView>>, AppError> {
    let alert = state.engine.get_alert(id).await?;
    Ok(ApiResponse::ok(alert.into()))
}

/// PUT /api/alerts/:id
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(edit): Json<AlertEdit>,
) -> Result<Json<ApiResponse<AlertView>>, AppError> {
    let alert = state.engine.edit_alert(id, edit).await?;
    Ok(ApiResponse::ok(alert.into()))
}

/// DELETE /api/alerts/:id
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AlertView>>, AppError> {
    let alert = state.engine.delete_alert(id).await?;
    Ok(ApiResponse::ok(alert.into()))
}

/// POST /api/alerts/:id/cancel
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<AlertView>>, AppError> {
    let alert = state.engine.cancel_alert(id).await?;
    Ok(ApiResponse::ok(alert.into()))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub trade_id: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entry_price: Option<Decimal>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub trading_mode: Option<TradingMode>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    /// executed | duplicate | ignored
    pub outcome: &'static str,
    pub alert: Option<AlertView>,
    pub position: Option<Position>,
}

/// POST /api/alerts/:id/confirm: trade-execution confirmation.
pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ApiResponse<ConfirmResponse>>, AppError> {
    let conf = TradeConfirmation {
        alert_id: id,
        trade_id: req.trade_id,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
        entry_price: req.entry_price,
        size: req.size,
        leverage: req.leverage.unwrap_or(1),
        trading_mode: req.trading_mode,
    };

    let response = match state.engine.confirm_execution(&conf).await? {
        ConfirmOutcome::Executed { alert, position } => ConfirmResponse {
            outcome: "executed",
            alert: Some(alert.into()),
            position,
        },
        ConfirmOutcome::Duplicate => ConfirmResponse {
            outcome: "duplicate",
            alert: None,
            position: None,
        },
        ConfirmOutcome::Ignored => ConfirmResponse {
            outcome: "ignored",
            alert: None,
            position: None,
        },
    };
    Ok(ApiResponse::ok(response))
}

/// GET /api/alerts/opportunities: pending alerts close to target.
pub async fn opportunities(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<AlertView>>> {
    let alerts = state.engine.opportunities().await;
    ApiResponse::ok(alerts.into_iter().map(AlertView::from).collect())
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

/// GET /api/alerts/stats?days=7
pub async fn stats(
    State(state): State<AppState>,
    Query(q): Query<StatsQuery>,
) -> Json<ApiResponse<AlertStats>> {
    let days = q.days.unwrap_or(7);
    ApiResponse::ok(state.engine.stats(days, Utc::now()).await)
}
