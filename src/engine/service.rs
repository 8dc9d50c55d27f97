use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use metrics::{counter, gauge};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::db::AlertStore;
use crate::errors::EngineError;
use crate::models::{
    normalize_symbol, Advisory, AdvisoryOutcome, Alert, AlertEdit, AlertStatus, EngineEvent,
    InboundEvent, NewAlert, Position, PositionSnapshot, PriceTick, TrackingReport,
    TradeConfirmation,
};

use super::book::{ClosedPart, Commit, ConfirmOutcome, SymbolBook};
use super::ladder::LadderOutcome;
use super::state_machine::{new_alert, validate_symbol};
use super::tracker;
use super::EngineConfig;

const EVENT_CAPACITY: usize = 1024;

type BookHandle = Arc<Mutex<SymbolBook>>;

/// Pending store operation, applied in commit order by the writer task.
#[derive(Debug)]
enum StoreWrite {
    SaveAlert(Alert),
    DeleteAlert(i64),
    SavePosition(Position),
    RemovePosition(String),
    Flush(oneshot::Sender<()>),
}

/// Consistent view of every symbol at one instant.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub alerts: Vec<Alert>,
    pub positions: Vec<Position>,
    pub closed_positions: Vec<Position>,
    pub advisories: Vec<Advisory>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolStats {
    pub total: usize,
    pub executed: usize,
    pub triggered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertStats {
    pub days: i64,
    pub total_alerts: usize,
    pub pending_alerts: usize,
    pub triggered_alerts: usize,
    pub executed_alerts: usize,
    pub cancelled_alerts: usize,
    /// Executed share of alerts that reached TRIGGERED, in percent.
    pub success_rate: Decimal,
    pub by_symbol: BTreeMap<String, SymbolStats>,
}

struct Shared {
    config: EngineConfig,
    /// Lock order: this map, then book mutexes in ascending symbol order,
    /// then `index`. The map lock is only held to look up or insert handles.
    books: RwLock<HashMap<String, BookHandle>>,
    index: RwLock<HashMap<i64, String>>,
    next_id: AtomicI64,
    events: broadcast::Sender<EngineEvent>,
    writes: mpsc::UnboundedSender<StoreWrite>,
    store: Arc<dyn AlertStore>,
}

/// Alert monitoring and position management engine.
///
/// Each symbol's state lives in its own book behind a mutex, so one symbol's
/// transitions are serialized while symbols proceed in parallel. Events are
/// broadcast and store writes queued while the book is still locked; the
/// writes themselves run on a background task.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Shared>,
}

impl Engine {
    /// Create an empty engine and spawn its store writer.
    pub fn new(config: EngineConfig, store: Arc<dyn AlertStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (writes, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_store_writer(rx, store.clone()));

        Self {
            inner: Arc::new(Shared {
                config,
                books: RwLock::new(HashMap::new()),
                index: RwLock::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                events,
                writes,
                store,
            }),
        }
    }

    /// Rebuild in-memory state from the store. Returns the number of alerts loaded.
    pub async fn restore(&self) -> anyhow::Result<usize> {
        let alerts = self.inner.store.load_alerts().await?;
        let positions = self.inner.store.load_positions().await?;
        let count = alerts.len();

        // Ids of deleted alerts stay reserved: positions may still name them.
        let max_id = alerts
            .iter()
            .map(|a| a.id)
            .chain(positions.iter().filter_map(|p| p.alert_origin.as_ref().map(|o| o.alert_id)))
            .chain(std::iter::once(self.inner.store.max_alert_id().await?))
            .max()
            .unwrap_or(0);
        for alert in alerts {
            let book = self.book(&alert.symbol).await;
            let mut book = book.lock().await;
            self.inner.index.write().await.insert(alert.id, alert.symbol.clone());
            book.alerts.insert(alert.id, alert);
        }
        for position in positions {
            let book = self.book(&position.symbol).await;
            book.lock().await.position = Some(position);
        }
        self.inner.next_id.fetch_max(max_id + 1, Ordering::SeqCst);

        tracing::info!(alerts = count, next_id = max_id + 1, "Engine state restored");
        Ok(count)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub async fn store_healthy(&self) -> bool {
        self.inner.store.ping().await
    }

    /// Wait until every write queued so far has reached the store.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.inner.writes.send(StoreWrite::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    // -----------------------------------------------------------------------
    // Book plumbing
    // -----------------------------------------------------------------------

    async fn book(&self, symbol: &str) -> BookHandle {
        if let Some(book) = self.inner.books.read().await.get(symbol) {
            return book.clone();
        }
        self.inner
            .books
            .write()
            .await
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SymbolBook::new(symbol))))
            .clone()
    }

    async fn existing_book(&self, symbol: &str) -> Option<BookHandle> {
        self.inner.books.read().await.get(symbol).cloned()
    }

    /// Every book, sorted by symbol so that locking them in order is deadlock-free.
    async fn all_books(&self) -> Vec<(String, BookHandle)> {
        let mut books: Vec<(String, BookHandle)> = self
            .inner
            .books
            .read()
            .await
            .iter()
            .map(|(s, b)| (s.clone(), b.clone()))
            .collect();
        books.sort_by(|a, b| a.0.cmp(&b.0));
        books
    }

    pub async fn symbol_of(&self, id: i64) -> Option<String> {
        self.inner.index.read().await.get(&id).cloned()
    }

    /// Lock the book currently holding alert `id`. Retries if the alert moved
    /// to another symbol between the index lookup and the lock.
    async fn lock_alert_book(&self, id: i64) -> Result<OwnedMutexGuard<SymbolBook>, EngineError> {
        for _ in 0..3 {
            let symbol = self
                .symbol_of(id)
                .await
                .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))?;
            let Some(handle) = self.existing_book(&symbol).await else {
                continue;
            };
            let guard = handle.lock_owned().await;
            if guard.alerts.contains_key(&id) {
                return Ok(guard);
            }
        }
        Err(EngineError::NotFound(format!("alert {id}")))
    }

    /// Publish a commit while the book is still locked: events go out in the
    /// same order the transitions were applied, and store writes are queued
    /// without waiting on I/O.
    fn publish(&self, commit: Commit) {
        for alert in commit.saved_alerts {
            self.queue(StoreWrite::SaveAlert(alert));
        }
        for id in commit.deleted_alerts {
            self.queue(StoreWrite::DeleteAlert(id));
        }
        if let Some(symbol) = commit.removed_position {
            self.queue(StoreWrite::RemovePosition(symbol));
        }
        if let Some(position) = commit.saved_position {
            self.queue(StoreWrite::SavePosition(position));
        }

        for event in commit.events {
            record_event_metrics(&event);
            // No subscribers is not an error.
            let _ = self.inner.events.send(event);
        }
    }

    fn queue(&self, write: StoreWrite) {
        if self.inner.writes.send(write).is_err() {
            tracing::error!("Store writer stopped; write dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Alert commands
    // -----------------------------------------------------------------------

    pub async fn create_alert(&self, cmd: NewAlert) -> Result<Alert, EngineError> {
        let now = Utc::now();
        let mut alert = new_alert(0, &cmd, now)?;
        alert.id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);

        let handle = self.book(&alert.symbol).await;
        let mut book = handle.lock().await;
        book.seed_from_last_price(&mut alert);
        book.alerts.insert(alert.id, alert.clone());
        self.inner.index.write().await.insert(alert.id, alert.symbol.clone());

        tracing::info!(
            alert_id = alert.id,
            symbol = %alert.symbol,
            alert_type = %alert.alert_type,
            target = %alert.target_price,
            "Alert created"
        );
        self.publish(Commit {
            saved_alerts: vec![alert.clone()],
            ..Default::default()
        });
        Ok(alert)
    }

    pub async fn get_alert(&self, id: i64) -> Result<Alert, EngineError> {
        let book = self.lock_alert_book(id).await?;
        book.alerts
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))
    }

    pub async fn edit_alert(&self, id: i64, edit: AlertEdit) -> Result<Alert, EngineError> {
        let target_symbol = edit.symbol.as_deref().map(validate_symbol).transpose()?;
        let current_symbol = self
            .symbol_of(id)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))?;

        match target_symbol {
            Some(symbol) if symbol != current_symbol => {
                self.move_alert(id, &current_symbol, &symbol, edit).await
            }
            _ => {
                let mut book = self.lock_alert_book(id).await?;
                let mut next = book
                    .alerts
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))?;
                next.apply_edit(&edit)?;
                book.alerts.insert(id, next.clone());

                tracing::info!(alert_id = id, symbol = %next.symbol, "Alert edited");
                self.publish(Commit {
                    saved_alerts: vec![next.clone()],
                    ..Default::default()
                });
                Ok(next)
            }
        }
    }

    /// Symbol change: both books are locked, in ascending order.
    async fn move_alert(
        &self,
        id: i64,
        from: &str,
        to: &str,
        edit: AlertEdit,
    ) -> Result<Alert, EngineError> {
        let source = self
            .existing_book(from)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))?;
        let dest = self.book(to).await;

        let (mut src, mut dst) = if from < to {
            let s = source.lock().await;
            let d = dest.lock().await;
            (s, d)
        } else {
            let d = dest.lock().await;
            let s = source.lock().await;
            (s, d)
        };

        let mut next = src
            .alerts
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))?;
        next.apply_edit(&edit)?;
        dst.seed_from_last_price(&mut next);

        src.alerts.remove(&id);
        dst.alerts.insert(id, next.clone());
        self.inner.index.write().await.insert(id, next.symbol.clone());

        tracing::info!(alert_id = id, from, to, "Alert moved to new symbol");
        self.publish(Commit {
            saved_alerts: vec![next.clone()],
            ..Default::default()
        });
        Ok(next)
    }

    /// Delete in any status. A linked position keeps its origin record.
    pub async fn delete_alert(&self, id: i64) -> Result<Alert, EngineError> {
        let mut book = self.lock_alert_book(id).await?;
        let alert = book
            .alerts
            .remove(&id)
            .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))?;
        self.inner.index.write().await.remove(&id);

        tracing::info!(alert_id = id, symbol = %alert.symbol, status = %alert.status, "Alert deleted");
        self.publish(Commit {
            deleted_alerts: vec![id],
            ..Default::default()
        });
        Ok(alert)
    }

    pub async fn cancel_alert(&self, id: i64) -> Result<Alert, EngineError> {
        let mut book = self.lock_alert_book(id).await?;
        let mut next = book
            .alerts
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("alert {id}")))?;
        next.cancel()?;
        book.alerts.insert(id, next.clone());

        tracing::info!(alert_id = id, symbol = %next.symbol, "Alert cancelled");
        self.publish(Commit {
            saved_alerts: vec![next.clone()],
            events: vec![EngineEvent::AlertCancelled(next.clone())],
            ..Default::default()
        });
        Ok(next)
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    pub async fn handle(&self, event: InboundEvent) -> Result<(), EngineError> {
        match event {
            InboundEvent::Tick(tick) => self.apply_tick(&tick).await,
            InboundEvent::Confirmation(conf) => self.confirm_execution(&conf).await.map(|_| ()),
            InboundEvent::Snapshot(snap) => self.apply_snapshot(&snap).await,
        }
    }

    pub async fn apply_tick(&self, tick: &PriceTick) -> Result<(), EngineError> {
        let symbol = validate_symbol(&tick.symbol)?;
        if tick.price <= Decimal::ZERO {
            return Err(EngineError::Validation(format!(
                "price must be positive, got {}",
                tick.price
            )));
        }

        let handle = self.book(&symbol).await;
        let mut book = handle.lock().await;
        let commit = book.apply_tick(tick.price, tick.timestamp, &self.inner.config);
        counter!("price_ticks_total").increment(1);
        self.publish(commit);
        Ok(())
    }

    /// Unknown alert ids and redelivered confirmations are ignored.
    pub async fn confirm_execution(
        &self,
        conf: &TradeConfirmation,
    ) -> Result<ConfirmOutcome, EngineError> {
        let mut book = match self.lock_alert_book(conf.alert_id).await {
            Ok(book) => book,
            Err(EngineError::NotFound(_)) => {
                tracing::warn!(alert_id = conf.alert_id, trade_id = %conf.trade_id, "Confirmation for unknown alert ignored");
                return Ok(ConfirmOutcome::Ignored);
            }
            Err(e) => return Err(e),
        };

        let (outcome, commit) = book.confirm(conf)?;
        if outcome == ConfirmOutcome::Duplicate {
            tracing::debug!(alert_id = conf.alert_id, "Duplicate confirmation ignored");
        }
        self.publish(commit);
        Ok(outcome)
    }

    pub async fn apply_snapshot(&self, snap: &PositionSnapshot) -> Result<(), EngineError> {
        let symbol = validate_symbol(&snap.symbol)?;
        let handle = self.book(&symbol).await;
        let mut book = handle.lock().await;
        let commit = book.apply_snapshot(snap, &self.inner.config)?;
        self.publish(commit);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Position commands
    // -----------------------------------------------------------------------

    async fn position_book(&self, symbol: &str) -> Result<BookHandle, EngineError> {
        let symbol = normalize_symbol(symbol);
        self.existing_book(&symbol)
            .await
            .ok_or_else(|| EngineError::NotFound(format!("no open position for {symbol}")))
    }

    pub async fn close_position(
        &self,
        symbol: &str,
        percentage: Decimal,
    ) -> Result<ClosedPart, EngineError> {
        let handle = self.position_book(symbol).await?;
        let mut book = handle.lock().await;
        let (part, commit) = book.close_position(percentage, "manual", Utc::now())?;
        self.publish(commit);
        Ok(part)
    }

    pub async fn setup_take_profits(&self, symbol: &str) -> Result<LadderOutcome, EngineError> {
        let handle = self.position_book(symbol).await?;
        let mut book = handle.lock().await;
        let (outcome, commit) = book.setup_take_profits(Utc::now())?;
        self.publish(commit);
        Ok(outcome)
    }

    pub async fn resolve_advisory(
        &self,
        id: Uuid,
        outcome: AdvisoryOutcome,
    ) -> Result<Advisory, EngineError> {
        for (_, handle) in self.all_books().await {
            let mut book = handle.lock().await;
            if !book.advisories.iter().any(|a| a.id == id) {
                continue;
            }
            let (advisory, commit) = book.resolve_advisory(id, outcome, Utc::now())?;
            self.publish(commit);
            return Ok(advisory);
        }
        Err(EngineError::NotFound(format!("advisory {id}")))
    }

    /// Scheduled expiry pass. Returns the alerts that expired.
    pub async fn expire_alerts(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let cfg = &self.inner.config;
        let mut expired = Vec::new();

        for (_, handle) in self.all_books().await {
            let mut book = handle.lock().await;
            let commit = book.expire(now, cfg.alert_expiry, cfg.auto_delete_expired);
            if commit.is_empty() {
                continue;
            }
            if !commit.deleted_alerts.is_empty() {
                let mut index = self.inner.index.write().await;
                for id in &commit.deleted_alerts {
                    index.remove(id);
                }
            }
            expired.extend(commit.events.iter().filter_map(|e| match e {
                EngineEvent::AlertExpired(a) => Some(a.clone()),
                _ => None,
            }));
            self.publish(commit);
        }
        expired
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Lock every book (in order) and copy its state out.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let books = self.all_books().await;
        let mut guards = Vec::with_capacity(books.len());
        for (_, handle) in &books {
            guards.push(handle.lock().await);
        }

        let mut snap = EngineSnapshot::default();
        for book in &guards {
            snap.alerts.extend(book.alerts.values().cloned());
            snap.positions.extend(book.position.clone());
            snap.closed_positions.extend(book.closed.iter().cloned());
            snap.advisories.extend(book.advisories.iter().cloned());
        }
        drop(guards);

        snap.alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        snap.advisories.sort_by(|a, b| b.raised_at.cmp(&a.raised_at));
        snap
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.snapshot().await.alerts
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.snapshot().await.positions
    }

    pub async fn advisories(&self) -> Vec<Advisory> {
        self.snapshot().await.advisories
    }

    /// PENDING alerts at or past the opportunity mark, closest first.
    pub async fn opportunities(&self) -> Vec<Alert> {
        let threshold = self.inner.config.opportunity_pct;
        let mut alerts: Vec<Alert> = self
            .alerts()
            .await
            .into_iter()
            .filter(|a| a.status == AlertStatus::Pending && a.progress_percentage >= threshold)
            .collect();
        alerts.sort_by(|a, b| b.progress_percentage.cmp(&a.progress_percentage));
        alerts
    }

    pub async fn tracking(&self, now: DateTime<Utc>) -> TrackingReport {
        let snap = self.snapshot().await;
        let mut positions = snap.positions;
        positions.extend(snap.closed_positions);
        tracker::classify(&snap.alerts, &positions, now, self.inner.config.tracking)
    }

    pub async fn stats(&self, days: i64, now: DateTime<Utc>) -> AlertStats {
        let since = now - Duration::days(days.max(1));
        let alerts: Vec<Alert> = self
            .alerts()
            .await
            .into_iter()
            .filter(|a| a.created_at >= since)
            .collect();
        compute_stats(&alerts, days.max(1))
    }

    /// Symbols with something to watch: live alerts or an open position.
    pub async fn watched_symbols(&self) -> Vec<String> {
        let mut symbols = Vec::new();
        for (symbol, handle) in self.all_books().await {
            let book = handle.lock().await;
            let live = book.position.is_some()
                || book.alerts.values().any(|a| !a.status.is_terminal());
            if live {
                symbols.push(symbol);
            }
        }
        symbols
    }

    pub async fn refresh_gauges(&self) {
        let snap = self.snapshot().await;
        let pending = snap
            .alerts
            .iter()
            .filter(|a| a.status == AlertStatus::Pending)
            .count();
        gauge!("pending_alerts").set(pending as f64);
        gauge!("open_positions").set(snap.positions.len() as f64);
    }
}

fn compute_stats(alerts: &[Alert], days: i64) -> AlertStats {
    let mut stats = AlertStats {
        days,
        total_alerts: alerts.len(),
        ..Default::default()
    };

    for alert in alerts {
        let entry = stats.by_symbol.entry(alert.symbol.clone()).or_default();
        entry.total += 1;
        match alert.status {
            AlertStatus::Pending => stats.pending_alerts += 1,
            AlertStatus::Triggered => {
                stats.triggered_alerts += 1;
                entry.triggered += 1;
            }
            AlertStatus::Executed => {
                stats.executed_alerts += 1;
                entry.executed += 1;
            }
            AlertStatus::Cancelled => stats.cancelled_alerts += 1,
        }
    }

    let reached = stats.triggered_alerts + stats.executed_alerts;
    if reached > 0 {
        stats.success_rate = (Decimal::from(stats.executed_alerts as u64) / Decimal::from(reached as u64)
            * Decimal::ONE_HUNDRED)
            .round_dp(1);
    }
    stats
}

fn record_event_metrics(event: &EngineEvent) {
    match event {
        EngineEvent::AlertTriggered { .. } => counter!("alerts_triggered_total").increment(1),
        EngineEvent::AlertExecuted(_) => counter!("alerts_executed_total").increment(1),
        EngineEvent::TpExecuted { .. } => counter!("take_profits_executed_total").increment(1),
        EngineEvent::AdvisoryRaised(_) => counter!("advisories_raised_total").increment(1),
        _ => {}
    }
}

async fn run_store_writer(mut rx: mpsc::UnboundedReceiver<StoreWrite>, store: Arc<dyn AlertStore>) {
    while let Some(write) = rx.recv().await {
        let result = match write {
            StoreWrite::SaveAlert(alert) => store.save_alert(&alert).await,
            StoreWrite::DeleteAlert(id) => store.delete_alert(id).await,
            StoreWrite::SavePosition(position) => store.save_position(&position).await,
            StoreWrite::RemovePosition(symbol) => store.remove_position(&symbol).await,
            StoreWrite::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Store write failed");
        }
    }
    tracing::debug!("Store writer stopped");
}
