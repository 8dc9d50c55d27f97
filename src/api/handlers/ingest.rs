use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::state_machine::validate_symbol;
use crate::errors::AppError;
use crate::models::{position::default_leverage, InboundEvent, PositionSnapshot, PriceTick};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TickRequest {
    pub symbol: String,
    pub price: Decimal,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub symbol: String,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

async fn enqueue(state: &AppState, event: InboundEvent) -> Result<(), AppError> {
    state
        .inbound_tx
        .send(event)
        .await
        .map_err(|_| AppError::Unavailable("event queue closed".into()))
}

/// POST /api/ticks: enqueue a price tick for its symbol's worker.
pub async fn post_tick(
    State(state): State<AppState>,
    Json(req): Json<TickRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let symbol = validate_symbol(&req.symbol).map_err(AppError::from)?;
    if req.price <= Decimal::ZERO {
        return Err(AppError::BadRequest("price must be positive".into()));
    }

    let tick = PriceTick {
        symbol: symbol.clone(),
        price: req.price,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };
    enqueue(&state, InboundEvent::Tick(tick)).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true, "queued": symbol }))))
}

/// POST /api/positions/snapshot: enqueue an exchange position snapshot.
pub async fn post_snapshot(
    State(state): State<AppState>,
    Json(req): Json<SnapshotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let symbol = validate_symbol(&req.symbol).map_err(AppError::from)?;

    let snapshot = PositionSnapshot {
        symbol: symbol.clone(),
        size: req.size,
        entry_price: req.entry_price,
        mark_price: req.mark_price,
        leverage: req.leverage,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };
    enqueue(&state, InboundEvent::Snapshot(snapshot)).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "success": true, "queued": symbol }))))
}
