use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Advisory;

/// 75% closed across the ladder, 25% left trailing.
const CLOSE_PCT: i64 = 75;
const TRAIL_PCT: i64 = 25;

/// Per-position hysteresis state for anti-greed advisories.
///
/// Fires when pnl rises above the threshold, then stays quiet until pnl has
/// dropped back below it. `pnl == threshold` neither fires nor re-arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiGreedAdvisor {
    armed: bool,
}

impl Default for AntiGreedAdvisor {
    fn default() -> Self {
        Self { armed: true }
    }
}

impl AntiGreedAdvisor {
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Feed the latest pnl percent. Returns true exactly once per crossing episode.
    pub fn observe(&mut self, pnl_percent: Decimal, threshold: Decimal) -> bool {
        if self.armed && pnl_percent > threshold {
            self.armed = false;
            return true;
        }
        if !self.armed && pnl_percent < threshold {
            self.armed = true;
        }
        false
    }
}

/// Build the advisory record for a crossing.
pub fn advisory_for(
    symbol: &str,
    position_opened_at: DateTime<Utc>,
    pnl_percent: Decimal,
    threshold: Decimal,
    at: DateTime<Utc>,
) -> Advisory {
    Advisory {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        position_opened_at,
        pnl_percent: pnl_percent.round_dp(4),
        threshold,
        close_pct: Decimal::from(CLOSE_PCT),
        trail_pct: Decimal::from(TRAIL_PCT),
        raised_at: at,
        outcome: None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
