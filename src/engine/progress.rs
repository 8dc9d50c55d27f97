use rust_decimal::Decimal;

use crate::models::Side;

/// How far price has travelled from `reference` toward `target`, in percent.
///
/// A LONG alert is approached from above: progress grows as price falls toward
/// the target. A SHORT alert is approached from below: progress grows as price
/// rises. Moving away from the target floors at 0; passing through it keeps
/// growing past 100 so overshoot stays visible in the stored value.
///
/// When the reference already sits on or past the target there is no distance
/// to cover, and progress is 100 once price is at or past the target, 0 otherwise.
pub fn progress_pct(
    reference: Decimal,
    target: Decimal,
    current: Decimal,
    alert_type: Side,
) -> Decimal {
    let (distance, moved) = match alert_type {
        Side::Long => (reference - target, reference - current),
        Side::Short => (target - reference, current - reference),
    };

    if distance <= Decimal::ZERO {
        let reached = match alert_type {
            Side::Long => current <= target,
            Side::Short => current >= target,
        };
        return if reached { Decimal::ONE_HUNDRED } else { Decimal::ZERO };
    }

    let pct = moved / distance * Decimal::ONE_HUNDRED;
    pct.max(Decimal::ZERO).round_dp(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
