use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{mode_table, ClosedPart, LadderOutcome, LadderPlan, ModeProfile};
use crate::errors::AppError;
use crate::models::{Advisory, AdvisoryOutcome, Position, TrackingReport};
use crate::AppState;

use super::ApiResponse;

#[derive(Debug, Serialize)]
pub struct PositionView {
    #[serde(flatten)]
    pub position: Position,
    pub pnl_percent: Decimal,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PositionsResponse {
    pub positions: Vec<PositionView>,
    pub count: usize,
    pub total_unrealized_pnl: Decimal,
}

/// GET /api/trading/positions
pub async fn positions(State(state): State<AppState>) -> Json<ApiResponse<PositionsResponse>> {
    let positions: Vec<PositionView> = state
        .engine
        .positions()
        .await
        .into_iter()
        .map(|p| PositionView {
            pnl_percent: p.pnl_percent(),
            unrealized_pnl: p.unrealized_pnl(),
            position: p,
        })
        .collect();

    let total_unrealized_pnl = positions.iter().map(|p| p.unrealized_pnl).sum();
    ApiResponse::ok(PositionsResponse {
        count: positions.len(),
        positions,
        total_unrealized_pnl,
    })
}

#[derive(Debug, Deserialize)]
pub struct ClosePositionRequest {
    pub symbol: String,
    #[serde(default)]
    pub percentage: Option<Decimal>,
}

/// POST /api/trading/close-position: close all or part of a position at mark.
pub async fn close_position(
    State(state): State<AppState>,
    Json(req): Json<ClosePositionRequest>,
) -> Result<Json<ApiResponse<ClosedPart>>, AppError> {
    let pct = req.percentage.unwrap_or(Decimal::ONE_HUNDRED);
    let part = state.engine.close_position(&req.symbol, pct).await?;
    Ok(ApiResponse::ok(part))
}

#[derive(Debug, Deserialize)]
pub struct SetupTakeProfitsRequest {
    pub symbol: String,
}

#[derive(Debug, Serialize)]
pub struct SetupTakeProfitsResponse {
    pub symbol: String,
    pub excluded: bool,
    pub plan: Option<LadderPlan>,
}

/// POST /api/trading/setup-take-profits: re-plan the ladder for an open position.
pub async fn setup_take_profits(
    State(state): State<AppState>,
    Json(req): Json<SetupTakeProfitsRequest>,
) -> Result<Json<ApiResponse<SetupTakeProfitsResponse>>, AppError> {
    let response = match state.engine.setup_take_profits(&req.symbol).await? {
        LadderOutcome::Planned(plan) => SetupTakeProfitsResponse {
            symbol: req.symbol.trim().to_uppercase(),
            excluded: false,
            plan: Some(plan),
        },
        LadderOutcome::Excluded { symbol } => SetupTakeProfitsResponse {
            symbol,
            excluded: true,
            plan: None,
        },
    };
    Ok(ApiResponse::ok(response))
}

/// GET /api/trading/tracking
pub async fn tracking(State(state): State<AppState>) -> Json<ApiResponse<TrackingReport>> {
    ApiResponse::ok(state.engine.tracking(Utc::now()).await)
}

/// GET /api/trading/modes
pub async fn modes() -> Json<ApiResponse<&'static [ModeProfile]>> {
    ApiResponse::ok(mode_table())
}

/// GET /api/trading/advisories
pub async fn advisories(State(state): State<AppState>) -> Json<ApiResponse<Vec<Advisory>>> {
    ApiResponse::ok(state.engine.advisories().await)
}

/// POST /api/trading/advisories/:id/accept
pub async fn accept_advisory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Advisory>>, AppError> {
    let advisory = state
        .engine
        .resolve_advisory(id, AdvisoryOutcome::Accepted)
        .await?;
    Ok(ApiResponse::ok(advisory))
}

/// POST /api/trading/advisories/:id/ignore
pub async fn ignore_advisory(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Advisory>>, AppError> {
    let advisory = state
        .engine
        .resolve_advisory(id, AdvisoryOutcome::Ignored)
        .await?;
    Ok(ApiResponse::ok(advisory))
}
