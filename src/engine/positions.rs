use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::errors::EngineError;
use crate::models::{
    is_excluded_symbol, AlertOrigin, Position, Side, TpStatus, TradingMode,
};

use super::ladder::{breakeven_price, mode_for_leverage, plan_ladder, profile, LadderOutcome};

const SIZE_DP: u32 = 8;

/// Side effect of marking a position to market.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEffect {
    TpExecuted {
        level: String,
        price: Decimal,
        closed_size: Decimal,
        realized_pnl: Decimal,
    },
    StopMoved(Decimal),
    Closed {
        reason: &'static str,
        price: Decimal,
        realized_pnl: Decimal,
    },
    HoldExpired,
}

/// Parameters for opening a position from a fill.
#[derive(Debug, Clone)]
pub struct OpenParams {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub trading_mode: TradingMode,
    pub trade_id: Option<String>,
    pub origin: Option<AlertOrigin>,
    pub at: DateTime<Utc>,
}

/// Explicit mode wins; otherwise the leverage band decides.
pub fn resolve_mode(leverage: u32, explicit: Option<TradingMode>) -> Result<TradingMode, EngineError> {
    if leverage == 0 {
        return Err(EngineError::Validation("leverage must be at least 1".into()));
    }
    explicit
        .or_else(|| mode_for_leverage(leverage))
        .ok_or_else(|| EngineError::Validation(format!("no trading mode covers {leverage}x leverage")))
}

fn validate_fill(size: Decimal, price: Decimal) -> Result<(), EngineError> {
    if size <= Decimal::ZERO {
        return Err(EngineError::Validation(format!("size must be positive, got {size}")));
    }
    if price <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "entry_price must be positive, got {price}"
        )));
    }
    Ok(())
}

pub fn open_position(params: OpenParams) -> Result<Position, EngineError> {
    validate_fill(params.size, params.entry_price)?;

    let mut pos = Position {
        auto_tp_enabled: !is_excluded_symbol(&params.symbol),
        symbol: params.symbol,
        side: params.side,
        size: params.size,
        original_size: params.size,
        entry_price: params.entry_price,
        mark_price: params.entry_price,
        leverage: params.leverage,
        trading_mode: params.trading_mode,
        take_profits: Vec::new(),
        stop_loss: None,
        alert_origin: params.origin,
        trade_id: params.trade_id,
        realized_pnl: Decimal::ZERO,
        trailing_remainder: false,
        hold_expired: false,
        opened_at: params.at,
        updated_at: params.at,
    };
    replan(&mut pos)?;
    Ok(pos)
}

/// Re-derive the ladder from the current entry and size.
pub fn replan(pos: &mut Position) -> Result<LadderOutcome, EngineError> {
    let outcome = plan_ladder(&pos.symbol, pos.trading_mode, pos.entry_price, pos.side)?;
    match &outcome {
        LadderOutcome::Planned(plan) => {
            pos.take_profits = plan.take_profits.clone();
            pos.stop_loss = Some(plan.stop_loss.clone());
            pos.original_size = pos.size;
            pos.auto_tp_enabled = true;
        }
        LadderOutcome::Excluded { .. } => {
            pos.take_profits.clear();
            pos.stop_loss = None;
            pos.auto_tp_enabled = false;
        }
    }
    Ok(outcome)
}

/// Add a same-side fill: weighted average entry, fresh ladder.
pub fn merge_fill(
    pos: &mut Position,
    size: Decimal,
    price: Decimal,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    validate_fill(size, price)?;
    let mut next = pos.clone();
    let new_size = next.size + size;
    next.entry_price = ((next.entry_price * next.size + price * size) / new_size).round_dp(SIZE_DP);
    next.size = new_size;
    next.updated_at = at;
    replan(&mut next)?;
    *pos = next;
    Ok(())
}

fn reached(side: Side, mark: Decimal, level: Decimal) -> bool {
    match side {
        Side::Long => mark >= level,
        Side::Short => mark <= level,
    }
}

fn improves_stop(side: Side, current: Decimal, candidate: Decimal) -> bool {
    match side {
        Side::Long => candidate > current,
        Side::Short => candidate < current,
    }
}

/// Update mark price and fire any ladder levels it reaches.
///
/// Take-profits fill at their level price; the stop fills at mark. After TP1
/// the stop is moved per the mode's breakeven rule.
pub fn mark_to_market(pos: &mut Position, price: Decimal, at: DateTime<Utc>) -> Vec<PositionEffect> {
    let mut effects = Vec::new();
    pos.mark_price = price;
    pos.updated_at = at;

    if pos.size.is_zero() {
        return effects;
    }

    let last = pos.take_profits.len().saturating_sub(1);
    for i in 0..pos.take_profits.len() {
        let tp = &pos.take_profits[i];
        if tp.status != TpStatus::Pending || !reached(pos.side, price, tp.price) {
            continue;
        }
        let (level, level_price, allocation) = (tp.level.clone(), tp.price, tp.allocation);

        let qty = if i == last {
            pos.size
        } else {
            (pos.original_size * allocation / Decimal::ONE_HUNDRED)
                .round_dp(SIZE_DP)
                .min(pos.size)
        };
        let pnl = pos.pnl_for(qty, level_price);
        pos.size -= qty;
        pos.realized_pnl += pnl;
        pos.take_profits[i].status = TpStatus::Executed;

        effects.push(PositionEffect::TpExecuted {
            level: level.clone(),
            price: level_price,
            closed_size: qty,
            realized_pnl: pnl,
        });

        if level == "TP1" {
            let be = breakeven_price(pos.trading_mode, pos.entry_price, pos.side);
            if let Some(stop) = pos.stop_loss.as_mut() {
                if improves_stop(pos.side, stop.price, be) {
                    stop.price = be;
                    stop.percent =
                        ((be - pos.entry_price) / pos.entry_price * Decimal::ONE_HUNDRED).round_dp(4);
                    effects.push(PositionEffect::StopMoved(be));
                }
            }
        }

        if pos.size.is_zero() {
            effects.push(PositionEffect::Closed {
                reason: "take_profit",
                price: level_price,
                realized_pnl: pos.realized_pnl,
            });
            return effects;
        }
    }

    if let Some(stop) = &pos.stop_loss {
        let hit = match pos.side {
            Side::Long => price <= stop.price,
            Side::Short => price >= stop.price,
        };
        if hit {
            let pnl = pos.pnl_for(pos.size, price);
            pos.realized_pnl += pnl;
            pos.size = Decimal::ZERO;
            effects.push(PositionEffect::Closed {
                reason: "stop_loss",
                price,
                realized_pnl: pos.realized_pnl,
            });
            return effects;
        }
    }

    let max_hold = Duration::hours(profile(pos.trading_mode).max_hold_hours);
    if !pos.hold_expired && at - pos.opened_at >= max_hold {
        pos.hold_expired = true;
        effects.push(PositionEffect::HoldExpired);
    }

    effects
}

/// Close `percentage` of the current size at mark. Returns (closed size, pnl).
pub fn close_fraction(
    pos: &mut Position,
    percentage: Decimal,
    at: DateTime<Utc>,
) -> Result<(Decimal, Decimal), EngineError> {
    if percentage <= Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
        return Err(EngineError::Validation(format!(
            "percentage must be in (0, 100], got {percentage}"
        )));
    }
    if pos.size.is_zero() {
        return Err(EngineError::Precondition(format!("{} is already flat", pos.symbol)));
    }

    let qty = if percentage == Decimal::ONE_HUNDRED {
        pos.size
    } else {
        (pos.size * percentage / Decimal::ONE_HUNDRED).round_dp(SIZE_DP)
    };
    let pnl = pos.pnl_for(qty, pos.mark_price);
    pos.size -= qty;
    pos.realized_pnl += pnl;
    pos.updated_at = at;
    Ok((qty, pnl))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
