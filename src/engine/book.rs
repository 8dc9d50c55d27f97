use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::EngineError;
use crate::models::{
    Advisory, AdvisoryOutcome, Alert, AlertOrigin, AlertStatus, EngineEvent, Position,
    PositionSnapshot, Side, TradeConfirmation, TradingMode,
};

use super::anti_greed::{advisory_for, AntiGreedAdvisor};
use super::ladder::{mode_for_leverage, LadderOutcome};
use super::positions::{
    close_fraction, mark_to_market, merge_fill, open_position, replan, resolve_mode, OpenParams,
    PositionEffect,
};
use super::state_machine::TickOutcome;
use super::EngineConfig;

/// Everything a committed transition must publish: events for subscribers and
/// writes for the store. Built under the book lock, drained before release.
#[derive(Debug, Default)]
pub struct Commit {
    pub events: Vec<EngineEvent>,
    pub saved_alerts: Vec<Alert>,
    pub deleted_alerts: Vec<i64>,
    pub saved_position: Option<Position>,
    pub removed_position: Option<String>,
}

impl Commit {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.saved_alerts.is_empty()
            && self.deleted_alerts.is_empty()
            && self.saved_position.is_none()
            && self.removed_position.is_none()
    }
}

/// Result of a trade confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Executed {
        alert: Alert,
        position: Option<Position>,
    },
    /// Same alert already executed; redelivery is harmless.
    Duplicate,
    /// Unknown alert id.
    Ignored,
}

/// Outcome of a partial or full manual close.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedPart {
    pub symbol: String,
    pub closed_size: Decimal,
    pub remaining_size: Decimal,
    pub price: Decimal,
    pub realized_pnl: Decimal,
    pub position_closed: bool,
}

pub fn origin_of(alert: &Alert) -> AlertOrigin {
    AlertOrigin {
        alert_id: alert.id,
        created_at: alert.created_at,
        triggered_at: alert.triggered_at,
        target_price: alert.target_price,
        notes: alert.notes.clone(),
    }
}

/// All state of one symbol. Mutated only while its mutex is held.
#[derive(Debug)]
pub struct SymbolBook {
    pub symbol: String,
    pub alerts: BTreeMap<i64, Alert>,
    pub position: Option<Position>,
    /// Positions closed within the tracking lookback.
    pub closed: Vec<Position>,
    pub advisor: AntiGreedAdvisor,
    pub advisories: Vec<Advisory>,
    pub last_price: Option<Decimal>,
}

impl SymbolBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            alerts: BTreeMap::new(),
            position: None,
            closed: Vec::new(),
            advisor: AntiGreedAdvisor::default(),
            advisories: Vec::new(),
            last_price: None,
        }
    }

    /// Seed an alert's display fields from the last known price.
    pub fn seed_from_last_price(&self, alert: &mut Alert) {
        if let Some(price) = self.last_price {
            if alert.reference_price.is_none() {
                alert.reference_price = Some(price);
            }
            if let Some(reference) = alert.reference_price {
                alert.current_price = Some(price);
                alert.progress_percentage = super::progress::progress_pct(
                    reference,
                    alert.target_price,
                    price,
                    alert.alert_type,
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Price ticks
    // -----------------------------------------------------------------------

    pub fn apply_tick(&mut self, price: Decimal, at: DateTime<Utc>, cfg: &EngineConfig) -> Commit {
        let mut commit = Commit::default();
        self.last_price = Some(price);

        for alert in self.alerts.values_mut() {
            match alert.observe_price(price, at, cfg.near_target_pct) {
                TickOutcome::Triggered => {
                    tracing::info!(
                        alert_id = alert.id,
                        symbol = %alert.symbol,
                        alert_type = %alert.alert_type,
                        target = %alert.target_price,
                        price = %price,
                        "Alert triggered"
                    );
                    commit.saved_alerts.push(alert.clone());
                    commit.events.push(EngineEvent::AlertTriggered {
                        alert: alert.clone(),
                        price,
                    });
                }
                TickOutcome::NearTarget => {
                    tracing::debug!(
                        alert_id = alert.id,
                        symbol = %alert.symbol,
                        progress = %alert.progress_percentage,
                        "Alert near target"
                    );
                    commit.saved_alerts.push(alert.clone());
                    commit.events.push(EngineEvent::AlertNearTarget {
                        alert: alert.clone(),
                        price,
                    });
                }
                TickOutcome::Observed => {}
            }
        }

        if let Some(mut pos) = self.position.take() {
            let effects = mark_to_market(&mut pos, price, at);
            // Mark-only ticks are not persisted; the store sees ladder and size changes.
            let changed = !effects.is_empty();
            let closed = self.record_effects(&pos, effects, &mut commit);
            if closed {
                self.close_out(pos, &mut commit);
            } else {
                self.observe_greed(&pos, at, cfg, &mut commit);
                if changed {
                    commit.saved_position = Some(pos.clone());
                }
                self.position = Some(pos);
            }
        }

        self.prune_closed(at - cfg.tracking.lookback);
        commit
    }

    /// Translate position effects into events. Returns true when the position closed.
    fn record_effects(&self, pos: &Position, effects: Vec<PositionEffect>, commit: &mut Commit) -> bool {
        let mut closed = false;
        for effect in effects {
            let event = match effect {
                PositionEffect::TpExecuted {
                    level,
                    price,
                    closed_size,
                    realized_pnl,
                } => {
                    tracing::info!(
                        symbol = %pos.symbol,
                        level = %level,
                        price = %price,
                        closed_size = %closed_size,
                        pnl = %realized_pnl,
                        "Take-profit executed"
                    );
                    EngineEvent::TpExecuted {
                        symbol: pos.symbol.clone(),
                        level,
                        price,
                        closed_size,
                        realized_pnl,
                    }
                }
                PositionEffect::StopMoved(price) => {
                    tracing::info!(symbol = %pos.symbol, price = %price, "Stop loss moved to breakeven");
                    EngineEvent::StopLossMoved {
                        symbol: pos.symbol.clone(),
                        price,
                    }
                }
                PositionEffect::Closed {
                    reason,
                    price,
                    realized_pnl,
                } => {
                    closed = true;
                    tracing::info!(
                        symbol = %pos.symbol,
                        reason,
                        price = %price,
                        realized_pnl = %realized_pnl,
                        "Position closed"
                    );
                    EngineEvent::PositionClosed {
                        symbol: pos.symbol.clone(),
                        reason: reason.to_string(),
                        price,
                        realized_pnl,
                    }
                }
                PositionEffect::HoldExpired => {
                    tracing::warn!(
                        symbol = %pos.symbol,
                        mode = %pos.trading_mode,
                        "Position exceeded max hold time"
                    );
                    EngineEvent::HoldExpired {
                        symbol: pos.symbol.clone(),
                        trading_mode: pos.trading_mode,
                        opened_at: pos.opened_at,
                    }
                }
            };
            commit.events.push(event);
        }
        closed
    }

    fn observe_greed(&mut self, pos: &Position, at: DateTime<Utc>, cfg: &EngineConfig, commit: &mut Commit) {
        if !cfg.anti_greed_enabled {
            return;
        }
        let pnl = pos.pnl_percent();
        if self.advisor.observe(pnl, cfg.anti_greed_threshold_pct) {
            let advisory = advisory_for(&pos.symbol, pos.opened_at, pnl, cfg.anti_greed_threshold_pct, at);
            tracing::info!(
                symbol = %pos.symbol,
                pnl_percent = %advisory.pnl_percent,
                advisory_id = %advisory.id,
                "Anti-greed advisory raised"
            );
            self.advisories.push(advisory.clone());
            commit.events.push(EngineEvent::AdvisoryRaised(advisory));
        }
    }

    fn close_out(&mut self, pos: Position, commit: &mut Commit) {
        commit.saved_position = None;
        commit.removed_position = Some(pos.symbol.clone());
        self.advisor = AntiGreedAdvisor::default();

        let before = self.advisories.len();
        self.advisories
            .retain(|a| a.outcome.is_some() || a.position_opened_at != pos.opened_at);
        let dropped = before - self.advisories.len();
        if dropped > 0 {
            tracing::debug!(symbol = %pos.symbol, dropped, "Dropped open advisories of closed position");
        }
        self.closed.push(pos);
    }

    /// Forget closed positions and resolved advisories older than `since`.
    fn prune_closed(&mut self, since: DateTime<Utc>) {
        self.closed.retain(|p| p.updated_at >= since);
        self.advisories
            .retain(|a| a.outcome.is_none() || a.raised_at >= since);
    }

    // -----------------------------------------------------------------------
    // Trade confirmations
    // -----------------------------------------------------------------------

    pub fn confirm(
        &mut self,
        conf: &TradeConfirmation,
    ) -> Result<(ConfirmOutcome, Commit), EngineError> {
        let mut commit = Commit::default();
        let Some(current) = self.alerts.get(&conf.alert_id) else {
            return Ok((ConfirmOutcome::Ignored, commit));
        };
        if current.status == AlertStatus::Executed {
            return Ok((ConfirmOutcome::Duplicate, commit));
        }

        let mut alert = current.clone();
        alert.confirm_execution(&conf.trade_id, conf.timestamp)?;
        let at = alert.executed_at.unwrap_or(conf.timestamp);

        let mut opened = None;
        let mut next_position = self.position.clone();
        if let Some(size) = conf.size {
            let mode = resolve_mode(conf.leverage, conf.trading_mode)?;
            let entry = conf
                .entry_price
                .or(self.last_price)
                .unwrap_or(alert.target_price);

            match next_position.as_mut() {
                Some(pos) if pos.side == alert.alert_type => {
                    merge_fill(pos, size, entry, at)?;
                    tracing::info!(
                        symbol = %pos.symbol,
                        size = %pos.size,
                        entry = %pos.entry_price,
                        "Fill merged into open position"
                    );
                }
                Some(pos) => {
                    return Err(EngineError::Precondition(format!(
                        "{} already has an open {} position",
                        pos.symbol, pos.side
                    )));
                }
                None => {
                    let pos = open_position(OpenParams {
                        symbol: alert.symbol.clone(),
                        side: alert.alert_type,
                        size,
                        entry_price: entry,
                        leverage: conf.leverage,
                        trading_mode: mode,
                        trade_id: Some(conf.trade_id.trim().to_string()),
                        origin: Some(origin_of(&alert)),
                        at,
                    })?;
                    if !pos.auto_tp_enabled {
                        tracing::info!(symbol = %pos.symbol, "Symbol excluded from automatic take-profits");
                    }
                    opened = Some(pos.clone());
                    next_position = Some(pos);
                }
            }
        }

        tracing::info!(
            alert_id = alert.id,
            symbol = %alert.symbol,
            trade_id = %conf.trade_id,
            "Alert executed"
        );
        self.alerts.insert(alert.id, alert.clone());
        commit.saved_alerts.push(alert.clone());
        commit.events.push(EngineEvent::AlertExecuted(alert.clone()));

        if let Some(pos) = &next_position {
            if self.position.is_none() {
                self.advisor = AntiGreedAdvisor::default();
            }
            commit.saved_position = Some(pos.clone());
        }
        if let Some(pos) = opened {
            commit.events.push(EngineEvent::PositionOpened(pos));
        }
        self.position = next_position.clone();

        Ok((
            ConfirmOutcome::Executed {
                alert,
                position: next_position,
            },
            commit,
        ))
    }

    // -----------------------------------------------------------------------
    // Exchange snapshots
    // -----------------------------------------------------------------------

    /// Most recent triggered or executed alert since `since`.
    fn latest_triggered(&self, since: DateTime<Utc>) -> Option<&Alert> {
        self.alerts
            .values()
            .filter(|a| matches!(a.status, AlertStatus::Triggered | AlertStatus::Executed))
            .filter(|a| a.triggered_at.is_some_and(|t| t >= since))
            .max_by_key(|a| (a.triggered_at, a.id))
    }

    pub fn apply_snapshot(
        &mut self,
        snap: &PositionSnapshot,
        cfg: &EngineConfig,
    ) -> Result<Commit, EngineError> {
        if snap.entry_price < Decimal::ZERO || snap.mark_price < Decimal::ZERO {
            return Err(EngineError::Validation("snapshot prices must not be negative".into()));
        }
        let at = snap.timestamp;
        let mut commit = Commit::default();

        if snap.size.is_zero() {
            if let Some(mut pos) = self.position.take() {
                if snap.mark_price > Decimal::ZERO {
                    pos.mark_price = snap.mark_price;
                }
                pos.realized_pnl += pos.pnl_for(pos.size, pos.mark_price);
                pos.size = Decimal::ZERO;
                pos.updated_at = at;
                commit.events.push(EngineEvent::PositionClosed {
                    symbol: pos.symbol.clone(),
                    reason: "exchange_flat".into(),
                    price: pos.mark_price,
                    realized_pnl: pos.realized_pnl,
                });
                tracing::info!(symbol = %pos.symbol, "Position flat on exchange");
                self.close_out(pos, &mut commit);
            }
            return Ok(commit);
        }

        let side = if snap.size > Decimal::ZERO { Side::Long } else { Side::Short };
        let size = snap.size.abs();

        match self.position.clone() {
            Some(mut pos) if pos.side == side => {
                let entry_moved = snap.entry_price > Decimal::ZERO && snap.entry_price != pos.entry_price;
                pos.size = size;
                if snap.mark_price > Decimal::ZERO {
                    pos.mark_price = snap.mark_price;
                }
                pos.leverage = snap.leverage.max(1);
                pos.updated_at = at;
                if entry_moved {
                    pos.entry_price = snap.entry_price;
                    replan(&mut pos)?;
                }
                self.observe_greed(&pos, at, cfg, &mut commit);
                commit.saved_position = Some(pos.clone());
                self.position = Some(pos);
            }
            previous => {
                let origin = self
                    .latest_triggered(at - cfg.tracking.lookback)
                    .map(origin_of);
                let mut pos = open_position(OpenParams {
                    symbol: self.symbol.clone(),
                    side,
                    size,
                    entry_price: snap.entry_price,
                    leverage: snap.leverage.max(1),
                    trading_mode: mode_for_leverage(snap.leverage).unwrap_or(TradingMode::Swing),
                    trade_id: None,
                    origin,
                    at,
                })?;
                if snap.mark_price > Decimal::ZERO {
                    pos.mark_price = snap.mark_price;
                }

                if let Some(mut old) = previous {
                    old.realized_pnl += old.pnl_for(old.size, pos.mark_price);
                    old.size = Decimal::ZERO;
                    old.updated_at = at;
                    commit.events.push(EngineEvent::PositionClosed {
                        symbol: old.symbol.clone(),
                        reason: "reversed".into(),
                        price: pos.mark_price,
                        realized_pnl: old.realized_pnl,
                    });
                    self.close_out(old, &mut commit);
                }

                tracing::info!(
                    symbol = %pos.symbol,
                    side = %pos.side,
                    size = %pos.size,
                    linked_alert = ?pos.alert_origin.as_ref().map(|o| o.alert_id),
                    "Position detected from exchange snapshot"
                );
                commit.removed_position = None;
                commit.saved_position = Some(pos.clone());
                commit.events.push(EngineEvent::PositionOpened(pos.clone()));
                self.advisor = AntiGreedAdvisor::default();
                self.position = Some(pos);
            }
        }
        Ok(commit)
    }

    // -----------------------------------------------------------------------
    // User commands on positions
    // -----------------------------------------------------------------------

    fn open_position_ref(&self) -> Result<&Position, EngineError> {
        self.position
            .as_ref()
            .ok_or_else(|| EngineError::NotFound(format!("no open position for {}", self.symbol)))
    }

    pub fn close_position(
        &mut self,
        percentage: Decimal,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(ClosedPart, Commit), EngineError> {
        let mut next = self.open_position_ref()?.clone();
        let (closed_size, realized_pnl) = close_fraction(&mut next, percentage, at)?;
        let mut commit = Commit::default();

        let part = ClosedPart {
            symbol: next.symbol.clone(),
            closed_size,
            remaining_size: next.size,
            price: next.mark_price,
            realized_pnl,
            position_closed: next.size.is_zero(),
        };
        tracing::info!(
            symbol = %part.symbol,
            closed_size = %closed_size,
            remaining = %part.remaining_size,
            pnl = %realized_pnl,
            "Position reduced"
        );

        if part.position_closed {
            self.position = None;
            commit.events.push(EngineEvent::PositionClosed {
                symbol: next.symbol.clone(),
                reason: reason.to_string(),
                price: next.mark_price,
                realized_pnl: next.realized_pnl,
            });
            self.close_out(next, &mut commit);
        } else {
            commit.saved_position = Some(next.clone());
            self.position = Some(next);
        }
        Ok((part, commit))
    }

    pub fn setup_take_profits(&mut self, at: DateTime<Utc>) -> Result<(LadderOutcome, Commit), EngineError> {
        let mut next = self.open_position_ref()?.clone();
        let outcome = replan(&mut next)?;
        next.updated_at = at;

        let mut commit = Commit::default();
        commit.saved_position = Some(next.clone());
        self.position = Some(next);
        Ok((outcome, commit))
    }

    pub fn resolve_advisory(
        &mut self,
        id: Uuid,
        outcome: AdvisoryOutcome,
        at: DateTime<Utc>,
    ) -> Result<(Advisory, Commit), EngineError> {
        let idx = self
            .advisories
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| EngineError::NotFound(format!("advisory {id}")))?;
        if let Some(previous) = self.advisories[idx].outcome {
            return Err(EngineError::Precondition(format!(
                "advisory {id} already {previous:?}"
            )));
        }

        let raised_for = self.advisories[idx].position_opened_at;
        if outcome == AdvisoryOutcome::Accepted
            && self.position.as_ref().map(|p| p.opened_at) != Some(raised_for)
        {
            return Err(EngineError::Precondition(format!(
                "advisory {id} was raised for a position that is no longer open"
            )));
        }

        // Recorded before closing so a full close keeps it in the list.
        let advisory = {
            let advisory = &mut self.advisories[idx];
            advisory.outcome = Some(outcome);
            advisory.clone()
        };

        let mut commit = Commit::default();
        if outcome == AdvisoryOutcome::Accepted {
            let (_, close_commit) = self
                .close_position(advisory.close_pct, "anti_greed", at)
                .inspect_err(|_| self.advisories[idx].outcome = None)?;
            commit = close_commit;
            if let Some(pos) = self.position.as_mut() {
                pos.trailing_remainder = true;
                commit.saved_position = Some(pos.clone());
            }
        }

        tracing::info!(symbol = %advisory.symbol, advisory_id = %id, outcome = ?outcome, "Advisory resolved");
        Ok((advisory, commit))
    }

    // -----------------------------------------------------------------------
    // Expiry
    // -----------------------------------------------------------------------

    /// Cancel non-terminal alerts older than `ttl`. PENDING ages from creation,
    /// TRIGGERED from the trigger.
    pub fn expire(&mut self, now: DateTime<Utc>, ttl: Duration, delete: bool) -> Commit {
        let mut commit = Commit::default();
        let due: Vec<i64> = self
            .alerts
            .values()
            .filter(|a| match a.status {
                AlertStatus::Pending => now - a.created_at >= ttl,
                AlertStatus::Triggered => a.triggered_at.is_some_and(|t| now - t >= ttl),
                _ => false,
            })
            .map(|a| a.id)
            .collect();

        for id in due {
            let Some(alert) = self.alerts.get_mut(&id) else {
                continue;
            };
            if alert.cancel().is_err() {
                continue;
            }
            tracing::info!(alert_id = id, symbol = %alert.symbol, "Alert expired");
            commit.events.push(EngineEvent::AlertExpired(alert.clone()));
            if delete {
                self.alerts.remove(&id);
                commit.deleted_alerts.push(id);
            } else {
                commit.saved_alerts.push(alert.clone());
            }
        }
        commit
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::state_machine::new_alert;
    use crate::models::{NewAlert, TpStatus};

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn book_with_alert(side: Side, target: i64, reference: i64) -> (SymbolBook, i64) {
        let mut book = SymbolBook::new("BTCUSDT");
        let cmd = NewAlert {
            symbol: "BTCUSDT".into(),
            target_price: Decimal::from(target),
            alert_type: side,
            notes: None,
            reference_price: Some(Decimal::from(reference)),
        };
        let alert = new_alert(1, &cmd, Utc::now() - Duration::minutes(1)).unwrap();
        book.alerts.insert(1, alert);
        (book, 1)
    }

    fn confirmation(id: i64, size: Option<i64>) -> TradeConfirmation {
        TradeConfirmation {
            alert_id: id,
            trade_id: "T-100".into(),
            timestamp: Utc::now(),
            entry_price: Some(Decimal::from(100)),
            size: size.map(Decimal::from),
            leverage: 5,
            trading_mode: None,
        }
    }

    #[test]
    fn test_tick_triggers_and_publishes() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        let commit = book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        assert_eq!(book.alerts[&id].status, AlertStatus::Triggered);
        assert!(matches!(commit.events[0], EngineEvent::AlertTriggered { .. }));
        assert_eq!(commit.saved_alerts.len(), 1);
    }

    #[test]
    fn test_confirm_opens_planned_position() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());

        let (outcome, commit) = book.confirm(&confirmation(id, Some(10))).unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Executed { position: Some(_), .. }));
        let pos = book.position.as_ref().unwrap();
        assert_eq!(pos.trading_mode, TradingMode::Swing);
        assert_eq!(pos.alert_origin.as_ref().map(|o| o.alert_id), Some(id));
        assert_eq!(pos.take_profits.len(), 4);
        assert_eq!(commit.events.len(), 2);
    }

    #[test]
    fn test_duplicate_and_unknown_confirmations_are_ignored() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        book.confirm(&confirmation(id, Some(10))).unwrap();

        let (again, commit) = book.confirm(&confirmation(id, Some(10))).unwrap();
        assert_eq!(again, ConfirmOutcome::Duplicate);
        assert!(commit.is_empty());
        assert_eq!(book.position.as_ref().unwrap().size, Decimal::from(10));

        let (unknown, _) = book.confirm(&confirmation(99, Some(1))).unwrap();
        assert_eq!(unknown, ConfirmOutcome::Ignored);
    }

    #[test]
    fn test_confirm_on_pending_fails_without_side_effects() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        let err = book.confirm(&confirmation(id, Some(10))).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(book.alerts[&id].status, AlertStatus::Pending);
        assert!(book.position.is_none());
    }

    #[test]
    fn test_bad_fill_leaves_alert_triggered() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        let mut conf = confirmation(id, Some(10));
        conf.leverage = 40;
        assert!(matches!(book.confirm(&conf), Err(EngineError::Validation(_))));
        assert_eq!(book.alerts[&id].status, AlertStatus::Triggered);
    }

    #[test]
    fn test_ticks_drive_ladder_and_greed() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        book.confirm(&confirmation(id, Some(10))).unwrap();

        let commit = book.apply_tick(Decimal::new(1015, 1), Utc::now(), &cfg());
        let pos = book.position.as_ref().unwrap();
        assert_eq!(pos.take_profits[0].status, TpStatus::Executed);
        assert!(commit.events.iter().any(|e| matches!(e, EngineEvent::TpExecuted { .. })));
        assert!(commit.events.iter().any(|e| matches!(e, EngineEvent::StopLossMoved { .. })));
        assert!(commit.events.iter().any(|e| matches!(e, EngineEvent::AdvisoryRaised(_))));
        assert_eq!(book.advisories.len(), 1);

        // Still above threshold: no second advisory.
        let commit = book.apply_tick(Decimal::new(1016, 1), Utc::now(), &cfg());
        assert!(!commit.events.iter().any(|e| matches!(e, EngineEvent::AdvisoryRaised(_))));
    }

    #[test]
    fn test_accept_advisory_closes_share_and_trails_rest() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        book.confirm(&confirmation(id, Some(10))).unwrap();
        book.apply_tick(Decimal::new(1015, 1), Utc::now(), &cfg());

        let advisory_id = book.advisories[0].id;
        let size_before = book.position.as_ref().unwrap().size;
        let (advisory, _) = book
            .resolve_advisory(advisory_id, AdvisoryOutcome::Accepted, Utc::now())
            .unwrap();
        assert_eq!(advisory.outcome, Some(AdvisoryOutcome::Accepted));
        let pos = book.position.as_ref().unwrap();
        assert!(pos.trailing_remainder);
        assert_eq!(pos.size, size_before * Decimal::new(25, 2));

        let again = book.resolve_advisory(advisory_id, AdvisoryOutcome::Ignored, Utc::now());
        assert!(matches!(again, Err(EngineError::Precondition(_))));
    }

    #[test]
    fn test_snapshot_links_latest_triggered_alert() {
        let (mut book, id) = book_with_alert(Side::Short, 100, 90);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());

        let snap = PositionSnapshot {
            symbol: "BTCUSDT".into(),
            size: Decimal::from(-3),
            entry_price: Decimal::from(100),
            mark_price: Decimal::from(99),
            leverage: 10,
            timestamp: Utc::now(),
        };
        let commit = book.apply_snapshot(&snap, &cfg()).unwrap();
        let pos = book.position.as_ref().unwrap();
        assert_eq!(pos.side, Side::Short);
        assert_eq!(pos.trading_mode, TradingMode::Scalp);
        assert_eq!(pos.alert_origin.as_ref().map(|o| o.alert_id), Some(id));
        assert!(matches!(commit.events[0], EngineEvent::PositionOpened(_)));

        let flat = PositionSnapshot { size: Decimal::ZERO, ..snap };
        book.apply_snapshot(&flat, &cfg()).unwrap();
        assert!(book.position.is_none());
        assert_eq!(book.closed.len(), 1);
    }

    #[test]
    fn test_expiry_cancels_and_optionally_deletes() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        let later = Utc::now() + Duration::hours(25);

        let mut kept = SymbolBook::new("BTCUSDT");
        kept.alerts = book.alerts.clone();
        let commit = kept.expire(later, Duration::hours(24), false);
        assert_eq!(kept.alerts[&id].status, AlertStatus::Cancelled);
        assert_eq!(commit.saved_alerts.len(), 1);

        let commit = book.expire(later, Duration::hours(24), true);
        assert!(book.alerts.is_empty());
        assert_eq!(commit.deleted_alerts, vec![id]);
        assert!(matches!(commit.events[0], EngineEvent::AlertExpired(_)));
    }

    fn snapshot_at(size: i64, at: DateTime<Utc>) -> PositionSnapshot {
        PositionSnapshot {
            symbol: "BTCUSDT".into(),
            size: Decimal::from(size),
            entry_price: Decimal::from(100),
            mark_price: Decimal::from(100),
            leverage: 5,
            timestamp: at,
        }
    }

    #[test]
    fn test_mark_only_tick_is_not_persisted() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        book.confirm(&confirmation(id, Some(10))).unwrap();

        let commit = book.apply_tick(Decimal::new(1002, 1), Utc::now(), &cfg());
        assert!(commit.saved_position.is_none());
        assert_eq!(book.position.as_ref().unwrap().mark_price, Decimal::new(1002, 1));

        let commit = book.apply_tick(Decimal::new(1015, 1), Utc::now(), &cfg());
        let saved = commit.saved_position.expect("ladder change is persisted");
        assert_eq!(saved.take_profits[0].status, TpStatus::Executed);
    }

    #[test]
    fn test_closing_position_drops_its_open_advisories() {
        let mut book = SymbolBook::new("BTCUSDT");
        let at = Utc::now();
        book.apply_snapshot(&snapshot_at(10, at), &cfg()).unwrap();
        book.apply_tick(Decimal::new(1015, 1), at, &cfg());
        let stale = book.advisories[0].id;

        book.apply_snapshot(&snapshot_at(0, at), &cfg()).unwrap();
        assert!(book.advisories.is_empty());

        book.apply_snapshot(&snapshot_at(20, at + Duration::minutes(1)), &cfg()).unwrap();
        let err = book
            .resolve_advisory(stale, AdvisoryOutcome::Accepted, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
        assert_eq!(book.position.as_ref().unwrap().size, Decimal::from(20));
    }

    #[test]
    fn test_accept_rejected_when_position_was_replaced() {
        let mut book = SymbolBook::new("BTCUSDT");
        let at = Utc::now();
        book.apply_snapshot(&snapshot_at(10, at), &cfg()).unwrap();
        book.apply_tick(Decimal::new(1015, 1), at, &cfg());
        let advisory_id = book.advisories[0].id;

        let pos = book.position.as_mut().unwrap();
        pos.opened_at += Duration::seconds(5);
        let size = pos.size;

        let err = book
            .resolve_advisory(advisory_id, AdvisoryOutcome::Accepted, Utc::now())
            .unwrap_err();
        assert!(matches!(err, EngineError::Precondition(_)));
        assert_eq!(book.position.as_ref().unwrap().size, size);
        assert!(book.advisories[0].outcome.is_none());

        let (ignored, commit) = book
            .resolve_advisory(advisory_id, AdvisoryOutcome::Ignored, Utc::now())
            .unwrap();
        assert_eq!(ignored.outcome, Some(AdvisoryOutcome::Ignored));
        assert!(commit.is_empty());
    }

    #[test]
    fn test_resolved_advisories_age_out_with_lookback() {
        let mut book = SymbolBook::new("BTCUSDT");
        let start = Utc::now() - Duration::hours(60);

        for i in 0..50 {
            let at = start + Duration::hours(i);
            book.apply_snapshot(&snapshot_at(10, at), &cfg()).unwrap();
            book.apply_tick(Decimal::new(1015, 1), at, &cfg());
            let id = book.advisories.last().unwrap().id;
            book.resolve_advisory(id, AdvisoryOutcome::Ignored, at).unwrap();
            book.apply_snapshot(&snapshot_at(0, at), &cfg()).unwrap();
        }

        // Hours 25 through 49 are inside the 24h lookback of the last tick.
        assert_eq!(book.advisories.len(), 25);
        assert!(book.advisories.iter().all(|a| a.outcome.is_some()));
    }

    #[test]
    fn test_accepted_remainder_keeps_fixed_stop() {
        let (mut book, id) = book_with_alert(Side::Long, 100, 110);
        book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        book.confirm(&confirmation(id, Some(10))).unwrap();
        book.apply_tick(Decimal::new(1015, 1), Utc::now(), &cfg());
        let advisory_id = book.advisories[0].id;
        book.resolve_advisory(advisory_id, AdvisoryOutcome::Accepted, Utc::now())
            .unwrap();

        let stop = book.position.as_ref().unwrap().stop_loss.clone().unwrap().price;
        let commit = book.apply_tick(Decimal::new(1018, 1), Utc::now(), &cfg());
        assert!(commit.events.is_empty());
        assert_eq!(book.position.as_ref().unwrap().stop_loss.as_ref().unwrap().price, stop);

        let commit = book.apply_tick(Decimal::from(100), Utc::now(), &cfg());
        assert!(book.position.is_none());
        assert!(commit.events.iter().any(|e| matches!(
            e,
            EngineEvent::PositionClosed { reason, .. } if reason == "stop_loss"
        )));
        assert!(book.closed[0].trailing_remainder);
    }
}
