use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::EngineError;
use crate::models::{normalize_symbol, Alert, AlertEdit, AlertStatus, NewAlert, Side};

use super::progress::progress_pct;

/// What a price observation did to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Display fields refreshed, status unchanged.
    Observed,
    /// First time progress reached the near-target mark.
    NearTarget,
    /// PENDING → TRIGGERED.
    Triggered,
}

pub fn validate_symbol(raw: &str) -> Result<String, EngineError> {
    let symbol = normalize_symbol(raw);
    if symbol.is_empty() {
        return Err(EngineError::Validation("symbol is required".into()));
    }
    if symbol.len() > 20 || !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::Validation(format!("invalid symbol: {raw}")));
    }
    Ok(symbol)
}

pub fn validate_target(target: Decimal) -> Result<Decimal, EngineError> {
    if target <= Decimal::ZERO {
        return Err(EngineError::Validation(format!(
            "target_price must be positive, got {target}"
        )));
    }
    Ok(target)
}

/// Build a PENDING alert from a create command.
pub fn new_alert(id: i64, cmd: &NewAlert, now: DateTime<Utc>) -> Result<Alert, EngineError> {
    let symbol = validate_symbol(&cmd.symbol)?;
    let target_price = validate_target(cmd.target_price)?;
    if let Some(r) = cmd.reference_price {
        if r <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "reference_price must be positive, got {r}"
            )));
        }
    }

    let mut alert = Alert {
        id,
        symbol,
        target_price,
        alert_type: cmd.alert_type,
        status: AlertStatus::Pending,
        notes: cmd.notes.clone().unwrap_or_default(),
        reference_price: cmd.reference_price,
        current_price: None,
        progress_percentage: Decimal::ZERO,
        near_notified: false,
        created_at: now,
        triggered_at: None,
        executed_at: None,
        trade_id: None,
        version: 1,
    };
    if let Some(r) = alert.reference_price {
        alert.progress_percentage = progress_pct(r, alert.target_price, r, alert.alert_type);
    }
    Ok(alert)
}

/// Has price crossed the target coming from `prev`?
///
/// LONG alerts fire on the way down, SHORT alerts on the way up. A tick that
/// lands exactly on the target always counts.
fn crossed(alert_type: Side, target: Decimal, prev: Option<Decimal>, price: Decimal) -> bool {
    if price == target {
        return true;
    }
    let Some(prev) = prev else {
        return false;
    };
    match alert_type {
        Side::Long => prev >= target && price < target,
        Side::Short => prev <= target && price > target,
    }
}

impl Alert {
    /// Apply one price tick. Only a PENDING alert can change status here;
    /// every other status just refreshes its display fields.
    pub fn observe_price(
        &mut self,
        price: Decimal,
        at: DateTime<Utc>,
        near_target_pct: Decimal,
    ) -> TickOutcome {
        let prev = self.current_price.or(self.reference_price);
        let reference = *self.reference_price.get_or_insert(price);

        self.current_price = Some(price);
        self.progress_percentage = progress_pct(reference, self.target_price, price, self.alert_type);

        if self.status != AlertStatus::Pending {
            return TickOutcome::Observed;
        }

        if crossed(self.alert_type, self.target_price, prev, price) {
            self.status = AlertStatus::Triggered;
            self.triggered_at = Some(at.max(self.created_at));
            self.version += 1;
            return TickOutcome::Triggered;
        }

        if !self.near_notified && self.progress_percentage >= near_target_pct {
            self.near_notified = true;
            self.version += 1;
            return TickOutcome::NearTarget;
        }

        TickOutcome::Observed
    }

    /// TRIGGERED → EXECUTED on a trade confirmation.
    pub fn confirm_execution(
        &mut self,
        trade_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if trade_id.trim().is_empty() {
            return Err(EngineError::Validation("trade_id is required".into()));
        }
        if self.status != AlertStatus::Triggered {
            return Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.status,
                action: "execute",
            });
        }

        let floor = self.triggered_at.unwrap_or(self.created_at);
        self.status = AlertStatus::Executed;
        self.executed_at = Some(at.max(floor));
        self.trade_id = Some(trade_id.trim().to_string());
        self.version += 1;
        Ok(())
    }

    /// PENDING/TRIGGERED → CANCELLED, by user or expiry policy.
    pub fn cancel(&mut self) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                id: self.id,
                from: self.status,
                action: "cancel",
            });
        }
        self.status = AlertStatus::Cancelled;
        self.version += 1;
        Ok(())
    }

    /// Edit user fields. Symbol, target and type are locked once the alert
    /// leaves PENDING; notes stay editable in every status.
    pub fn apply_edit(&mut self, edit: &AlertEdit) -> Result<(), EngineError> {
        if edit.touches_locked_fields() && self.status != AlertStatus::Pending {
            return Err(EngineError::Precondition(format!(
                "alert {} is {}; only notes can be edited",
                self.id, self.status
            )));
        }

        let symbol = edit.symbol.as_deref().map(validate_symbol).transpose()?;
        let target = edit.target_price.map(validate_target).transpose()?;

        if let Some(symbol) = symbol {
            if symbol != self.symbol {
                self.symbol = symbol;
                self.current_price = None;
                self.reference_price = None;
                self.progress_percentage = Decimal::ZERO;
                self.near_notified = false;
            }
        }

        let mut rebase = false;
        if let Some(target) = target {
            rebase |= target != self.target_price;
            self.target_price = target;
        }
        if let Some(alert_type) = edit.alert_type {
            rebase |= alert_type != self.alert_type;
            self.alert_type = alert_type;
        }
        if rebase {
            self.reference_price = self.current_price;
            self.near_notified = false;
            self.progress_percentage = match self.current_price {
                Some(p) => progress_pct(p, self.target_price, p, self.alert_type),
                None => Decimal::ZERO,
            };
        }

        if let Some(notes) = &edit.notes {
            self.notes = notes.clone();
        }

        self.version += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
