use std::sync::OnceLock;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::errors::EngineError;
use crate::models::{is_excluded_symbol, Side, StopLoss, TakeProfit, TpStatus, TradingMode};

/// Price precision of planned levels.
const PRICE_DP: u32 = 8;

#[derive(Debug, Clone, Serialize)]
pub struct LevelSpec {
    pub level: &'static str,
    /// Distance from entry in the profit direction, percent.
    pub pct: Decimal,
    /// Share of the original size, percent.
    pub allocation: Decimal,
    /// Copied onto the planned level as a hint; no trailing logic reads it.
    pub trailing: bool,
}

/// One row of the trading-mode table.
#[derive(Debug, Clone, Serialize)]
pub struct ModeProfile {
    pub mode: TradingMode,
    pub min_leverage: u32,
    pub max_leverage: u32,
    pub levels: Vec<LevelSpec>,
    /// Distance from entry in the loss direction, percent.
    pub stop_loss_pct: Decimal,
    pub max_hold_hours: i64,
    /// Where the stop moves after TP1, percent past entry in the profit direction.
    pub breakeven_offset_pct: Decimal,
}

fn level(level: &'static str, pct: Decimal, allocation: i64, trailing: bool) -> LevelSpec {
    LevelSpec {
        level,
        pct,
        allocation: Decimal::from(allocation),
        trailing,
    }
}

fn build_table() -> Vec<ModeProfile> {
    vec![
        ModeProfile {
            mode: TradingMode::Swing,
            min_leverage: 1,
            max_leverage: 7,
            levels: vec![
                level("TP1", Decimal::new(10, 1), 20, false),
                level("TP2", Decimal::new(20, 1), 30, false),
                level("TP3", Decimal::new(35, 1), 30, false),
                level("TP4", Decimal::new(40, 1), 20, true),
            ],
            stop_loss_pct: Decimal::new(10, 1),
            max_hold_hours: 24,
            breakeven_offset_pct: Decimal::new(2, 1),
        },
        ModeProfile {
            mode: TradingMode::Scalp,
            min_leverage: 8,
            max_leverage: 15,
            levels: vec![
                level("TP1", Decimal::new(6, 1), 35, false),
                level("TP2", Decimal::new(12, 1), 35, false),
                level("TP3", Decimal::new(20, 1), 20, false),
                level("TP4", Decimal::new(25, 1), 10, true),
            ],
            stop_loss_pct: Decimal::new(8, 1),
            max_hold_hours: 2,
            breakeven_offset_pct: Decimal::new(1, 1),
        },
        ModeProfile {
            mode: TradingMode::Prueba,
            min_leverage: 16,
            max_leverage: 20,
            levels: vec![
                level("TP1", Decimal::new(5, 1), 50, false),
                level("TP2", Decimal::new(10, 1), 35, false),
                level("TP3", Decimal::new(18, 1), 15, false),
            ],
            stop_loss_pct: Decimal::new(4, 1),
            max_hold_hours: 3,
            breakeven_offset_pct: Decimal::ZERO,
        },
    ]
}

/// The single mode table, shared by planning and the informational API.
pub fn mode_table() -> &'static [ModeProfile] {
    static TABLE: OnceLock<Vec<ModeProfile>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

pub fn profile(mode: TradingMode) -> &'static ModeProfile {
    mode_table()
        .iter()
        .find(|p| p.mode == mode)
        .unwrap_or(&mode_table()[0])
}

/// Trading mode whose leverage band contains `leverage`.
pub fn mode_for_leverage(leverage: u32) -> Option<TradingMode> {
    mode_table()
        .iter()
        .find(|p| (p.min_leverage..=p.max_leverage).contains(&leverage))
        .map(|p| p.mode)
}

/// Move `pct` percent away from `price`, toward profit when `profit` is true.
fn offset(price: Decimal, side: Side, pct: Decimal, profit: bool) -> Decimal {
    let up = matches!((side, profit), (Side::Long, true) | (Side::Short, false));
    let factor = pct / Decimal::ONE_HUNDRED;
    let moved = if up {
        price * (Decimal::ONE + factor)
    } else {
        price * (Decimal::ONE - factor)
    };
    moved.round_dp(PRICE_DP)
}

fn signed_pct(side: Side, pct: Decimal, profit: bool) -> Decimal {
    let up = matches!((side, profit), (Side::Long, true) | (Side::Short, false));
    if up { pct } else { -pct }
}

/// Stop price after TP1 under the mode's breakeven rule.
pub fn breakeven_price(mode: TradingMode, entry_price: Decimal, side: Side) -> Decimal {
    offset(entry_price, side, profile(mode).breakeven_offset_pct, true)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LadderPlan {
    pub trading_mode: TradingMode,
    pub side: Side,
    pub entry_price: Decimal,
    pub take_profits: Vec<TakeProfit>,
    pub stop_loss: StopLoss,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LadderOutcome {
    Planned(LadderPlan),
    /// Symbol is on the exclusion list; not a failure.
    Excluded { symbol: String },
}

impl LadderOutcome {
    pub fn is_excluded(&self) -> bool {
        matches!(self, LadderOutcome::Excluded { .. })
    }

    pub fn into_plan(self) -> Result<LadderPlan, EngineError> {
        match self {
            LadderOutcome::Planned(plan) => Ok(plan),
            LadderOutcome::Excluded { symbol } => Err(EngineError::ExcludedSymbol(symbol)),
        }
    }
}

/// Derive the take-profit/stop-loss ladder for a position.
pub fn plan_ladder(
    symbol: &str,
    mode: TradingMode,
    entry_price: Decimal,
    side: Side,
) -> Result<LadderOutcome, EngineError> {
    if is_excluded_symbol(symbol) {
        return Ok(LadderOutcome::Excluded {
            symbol: symbol.to_string(),
        });
    }
    if entry_price <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "entry_price must be positive, got {entry_price}"
        )));
    }

    let p = profile(mode);
    let take_profits = p
        .levels
        .iter()
        .map(|l| TakeProfit {
            level: l.level.to_string(),
            price: offset(entry_price, side, l.pct, true),
            percent: signed_pct(side, l.pct, true),
            allocation: l.allocation,
            trailing: l.trailing,
            status: TpStatus::Pending,
        })
        .collect();

    let stop_loss = StopLoss {
        price: offset(entry_price, side, p.stop_loss_pct, false),
        percent: signed_pct(side, p.stop_loss_pct, false),
    };

    Ok(LadderOutcome::Planned(LadderPlan {
        trading_mode: mode,
        side,
        entry_price,
        take_profits,
        stop_loss,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
