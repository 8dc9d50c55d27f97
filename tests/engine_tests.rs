mod common;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use cryptoalert::config::AppConfig;
use cryptoalert::db::{AlertStore, MemoryStore};
use cryptoalert::engine::state_machine::new_alert;
use cryptoalert::engine::{ConfirmOutcome, Engine};
use cryptoalert::errors::EngineError;
use cryptoalert::models::{
    AlertEdit, AlertStatus, EngineEvent, PositionSnapshot, PriceTick, Side, TpStatus,
    TradeConfirmation, TradingMode, TrackingStatus,
};

fn tick(symbol: &str, price: Decimal) -> PriceTick {
    PriceTick {
        symbol: symbol.into(),
        price,
        timestamp: Utc::now(),
    }
}

fn confirmation(alert_id: i64, entry: Decimal, size: Decimal, leverage: u32) -> TradeConfirmation {
    TradeConfirmation {
        alert_id,
        trade_id: format!("T-{alert_id}"),
        timestamp: Utc::now(),
        entry_price: Some(entry),
        size: Some(size),
        leverage,
        trading_mode: None,
    }
}

#[tokio::test]
async fn test_long_alert_lifecycle_through_execution() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("btcusdt", Side::Long, 45_000, 46_000))
        .await
        .unwrap();
    assert_eq!(alert.symbol, "BTCUSDT");
    assert_eq!(alert.status, AlertStatus::Pending);

    engine.apply_tick(&tick("BTCUSDT", Decimal::from(46_000))).await.unwrap();
    engine.apply_tick(&tick("BTCUSDT", Decimal::from(45_500))).await.unwrap();
    let halfway = engine.get_alert(alert.id).await.unwrap();
    assert_eq!(halfway.status, AlertStatus::Pending);
    assert_eq!(halfway.progress_percentage, Decimal::from(50));

    engine.apply_tick(&tick("BTCUSDT", Decimal::from(45_000))).await.unwrap();
    let triggered = engine.get_alert(alert.id).await.unwrap();
    assert_eq!(triggered.status, AlertStatus::Triggered);
    assert!(triggered.triggered_at.is_some());

    let conf = confirmation(alert.id, Decimal::from(45_000), Decimal::new(1, 1), 5);
    let outcome = engine.confirm_execution(&conf).await.unwrap();
    let ConfirmOutcome::Executed { alert: executed, position: Some(pos) } = outcome else {
        panic!("expected an executed confirmation with a position");
    };
    assert_eq!(executed.status, AlertStatus::Executed);
    assert_eq!(executed.trade_id.as_deref(), Some("T-1"));
    assert_eq!(pos.trading_mode, TradingMode::Swing);
    assert_eq!(pos.take_profits[0].price, Decimal::from(45_450));
    assert_eq!(pos.stop_loss.as_ref().map(|s| s.price), Some(Decimal::from(44_550)));
}

#[tokio::test]
async fn test_short_alert_ignores_moves_away_from_target() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("ETHUSDT", Side::Short, 3_000, 2_800))
        .await
        .unwrap();

    engine.apply_tick(&tick("ETHUSDT", Decimal::from(2_700))).await.unwrap();
    engine.apply_tick(&tick("ETHUSDT", Decimal::from(2_950))).await.unwrap();
    assert_eq!(engine.get_alert(alert.id).await.unwrap().status, AlertStatus::Pending);

    engine.apply_tick(&tick("ETHUSDT", Decimal::from(3_010))).await.unwrap();
    assert_eq!(engine.get_alert(alert.id).await.unwrap().status, AlertStatus::Triggered);
}

#[tokio::test]
async fn test_confirmations_are_idempotent() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("SOLUSDT", Side::Long, 100, 110))
        .await
        .unwrap();
    engine.apply_tick(&tick("SOLUSDT", Decimal::from(100))).await.unwrap();

    let conf = confirmation(alert.id, Decimal::from(100), Decimal::from(10), 5);
    let first = engine.confirm_execution(&conf).await.unwrap();
    assert!(matches!(first, ConfirmOutcome::Executed { .. }));

    let second = engine.confirm_execution(&conf).await.unwrap();
    assert_eq!(second, ConfirmOutcome::Duplicate);
    let positions = engine.positions().await;
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].size, Decimal::from(10));

    let unknown = confirmation(999, Decimal::from(100), Decimal::from(1), 5);
    assert_eq!(engine.confirm_execution(&unknown).await.unwrap(), ConfirmOutcome::Ignored);
}

#[tokio::test]
async fn test_confirm_pending_alert_is_rejected() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("SOLUSDT", Side::Long, 100, 110))
        .await
        .unwrap();

    let conf = confirmation(alert.id, Decimal::from(100), Decimal::from(1), 5);
    let err = engine.confirm_execution(&conf).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
    assert!(engine.positions().await.is_empty());
}

#[tokio::test]
async fn test_take_profit_then_stop_at_breakeven() {
    let (engine, _store) = common::build_engine();
    let mut events = engine.subscribe();
    let alert = engine
        .create_alert(common::new_alert("LINKUSDT", Side::Long, 100, 110))
        .await
        .unwrap();
    engine.apply_tick(&tick("LINKUSDT", Decimal::from(100))).await.unwrap();
    engine
        .confirm_execution(&confirmation(alert.id, Decimal::from(100), Decimal::from(10), 5))
        .await
        .unwrap();

    engine.apply_tick(&tick("LINKUSDT", Decimal::from(101))).await.unwrap();
    let pos = engine.positions().await.remove(0);
    assert_eq!(pos.take_profits[0].status, TpStatus::Executed);
    assert_eq!(pos.size, Decimal::from(8));
    assert_eq!(pos.stop_loss.as_ref().map(|s| s.price), Some(Decimal::new(1002, 1)));

    engine.apply_tick(&tick("LINKUSDT", Decimal::new(1001, 1))).await.unwrap();
    assert!(engine.positions().await.is_empty());

    let mut reasons = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::PositionClosed { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(reasons, vec!["stop_loss".to_string()]);
}

#[tokio::test]
async fn test_accepted_advisory_keeps_trailing_quarter() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("DOTUSDT", Side::Long, 100, 110))
        .await
        .unwrap();
    engine.apply_tick(&tick("DOTUSDT", Decimal::from(100))).await.unwrap();
    engine
        .confirm_execution(&confirmation(alert.id, Decimal::from(100), Decimal::from(10), 5))
        .await
        .unwrap();

    engine.apply_tick(&tick("DOTUSDT", Decimal::new(1015, 1))).await.unwrap();
    let advisories = engine.advisories().await;
    assert_eq!(advisories.len(), 1);
    let size_before = engine.positions().await[0].size;

    let resolved = engine
        .resolve_advisory(advisories[0].id, cryptoalert::models::AdvisoryOutcome::Accepted)
        .await
        .unwrap();
    assert!(resolved.outcome.is_some());

    let pos = engine.positions().await.remove(0);
    assert!(pos.trailing_remainder);
    assert_eq!(pos.size, size_before * Decimal::new(25, 2));

    let again = engine
        .resolve_advisory(advisories[0].id, cryptoalert::models::AdvisoryOutcome::Ignored)
        .await;
    assert!(matches!(again, Err(EngineError::Precondition(_))));
}

#[tokio::test]
async fn test_untracked_snapshot_links_alert_and_flat_closes() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("XRPUSDT", Side::Short, 100, 90))
        .await
        .unwrap();
    engine.apply_tick(&tick("XRPUSDT", Decimal::from(100))).await.unwrap();

    let snap = PositionSnapshot {
        symbol: "XRPUSDT".into(),
        size: Decimal::from(-3),
        entry_price: Decimal::from(100),
        mark_price: Decimal::from(99),
        leverage: 10,
        timestamp: Utc::now(),
    };
    engine.apply_snapshot(&snap).await.unwrap();
    let pos = engine.positions().await.remove(0);
    assert_eq!(pos.side, Side::Short);
    assert_eq!(pos.alert_origin.map(|o| o.alert_id), Some(alert.id));

    let report = engine.tracking(Utc::now()).await;
    assert_eq!(report.tracking[0].status, TrackingStatus::PositionOpened);

    engine
        .apply_snapshot(&PositionSnapshot { size: Decimal::ZERO, ..snap })
        .await
        .unwrap();
    assert!(engine.positions().await.is_empty());
    assert_eq!(engine.snapshot().await.closed_positions.len(), 1);
}

#[tokio::test]
async fn test_tracking_flags_missed_opportunity_after_grace() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("BNBUSDT", Side::Long, 500, 550))
        .await
        .unwrap();
    engine.apply_tick(&tick("BNBUSDT", Decimal::from(499))).await.unwrap();
    engine.apply_tick(&tick("BNBUSDT", Decimal::from(500))).await.unwrap();

    let fresh = engine.tracking(Utc::now()).await;
    assert_eq!(fresh.count, 1);
    assert_eq!(fresh.tracking[0].alert_id, alert.id);
    assert_eq!(fresh.tracking[0].status, TrackingStatus::TriggeredOnly);

    let later = engine.tracking(Utc::now() + Duration::hours(2)).await;
    assert_eq!(later.tracking[0].status, TrackingStatus::NotTaken);
    assert_eq!(later.summary.missed_opportunities, 1);

    let stale = engine.tracking(Utc::now() + Duration::hours(30)).await;
    assert_eq!(stale.count, 0);
}

#[tokio::test]
async fn test_edit_moves_alert_between_symbols() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("BTCUSDT", Side::Long, 100, 110))
        .await
        .unwrap();

    let edit = AlertEdit {
        symbol: Some("ethusdt".into()),
        ..Default::default()
    };
    let moved = engine.edit_alert(alert.id, edit).await.unwrap();
    assert_eq!(moved.symbol, "ETHUSDT");
    assert_eq!(engine.symbol_of(alert.id).await.as_deref(), Some("ETHUSDT"));

    engine.apply_tick(&tick("BTCUSDT", Decimal::from(100))).await.unwrap();
    assert_eq!(engine.get_alert(alert.id).await.unwrap().status, AlertStatus::Pending);

    engine.apply_tick(&tick("ETHUSDT", Decimal::from(100))).await.unwrap();
    assert_eq!(engine.get_alert(alert.id).await.unwrap().status, AlertStatus::Triggered);
}

#[tokio::test]
async fn test_expired_alerts_are_removed() {
    let (engine, _store) = common::build_engine();
    let alert = engine
        .create_alert(common::new_alert("DOGEUSDT", Side::Long, 1, 2))
        .await
        .unwrap();

    assert!(engine.expire_alerts(Utc::now()).await.is_empty());

    let expired = engine.expire_alerts(Utc::now() + Duration::hours(25)).await;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status, AlertStatus::Cancelled);
    assert!(matches!(
        engine.get_alert(alert.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_across_symbols() {
    let (engine, _store) = common::build_engine();
    let symbols = ["BTCUSDT", "ETHUSDT", "SOLUSDT", "XRPUSDT"];

    let mut handles = Vec::new();
    for i in 0..40 {
        let engine = engine.clone();
        let symbol = symbols[i % symbols.len()];
        handles.push(tokio::spawn(async move {
            let alert = engine
                .create_alert(common::new_alert(symbol, Side::Long, 100, 110))
                .await
                .unwrap();
            engine.apply_tick(&tick(symbol, Decimal::from(105))).await.unwrap();
            alert.id
        }));
    }

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap());
    }
    assert_eq!(ids.len(), 40);
    assert_eq!(engine.alerts().await.len(), 40);
    assert!(engine
        .alerts()
        .await
        .iter()
        .all(|a| a.status == AlertStatus::Pending));
}

#[tokio::test]
async fn test_writes_reach_store_after_flush() {
    let (engine, store) = common::build_engine();
    let keep = engine
        .create_alert(common::new_alert("BTCUSDT", Side::Long, 100, 110))
        .await
        .unwrap();
    let gone = engine
        .create_alert(common::new_alert("BTCUSDT", Side::Short, 120, 110))
        .await
        .unwrap();

    engine.cancel_alert(keep.id).await.unwrap();
    engine.delete_alert(gone.id).await.unwrap();
    engine.flush().await;

    let stored = store.load_alerts().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, keep.id);
    assert_eq!(stored[0].status, AlertStatus::Cancelled);
}

#[tokio::test]
async fn test_restore_resumes_id_sequence() {
    let now = Utc::now();
    let saved = new_alert(7, &common::new_alert("BTCUSDT", Side::Long, 100, 110), now).unwrap();
    let store: Arc<dyn AlertStore> = Arc::new(MemoryStore::with_state(vec![saved], vec![]));

    let engine = Engine::new(AppConfig::default().engine_config(), store);
    assert_eq!(engine.restore().await.unwrap(), 1);
    assert_eq!(engine.get_alert(7).await.unwrap().symbol, "BTCUSDT");

    let next = engine
        .create_alert(common::new_alert("ETHUSDT", Side::Long, 100, 110))
        .await
        .unwrap();
    assert_eq!(next.id, 8);
}

#[tokio::test]
async fn test_restart_never_reuses_deleted_alert_id() {
    let (engine, store) = common::build_engine();
    let taken = engine
        .create_alert(common::new_alert("BTCUSDT", Side::Long, 100, 110))
        .await
        .unwrap();
    engine.apply_tick(&tick("BTCUSDT", Decimal::from(100))).await.unwrap();
    engine
        .confirm_execution(&confirmation(taken.id, Decimal::from(100), Decimal::from(2), 5))
        .await
        .unwrap();
    engine.delete_alert(taken.id).await.unwrap();
    engine.flush().await;

    let restarted = Engine::new(AppConfig::default().engine_config(), store as Arc<dyn AlertStore>);
    restarted.restore().await.unwrap();
    let origin = restarted.positions().await.remove(0).alert_origin.unwrap();
    assert_eq!(origin.alert_id, taken.id);

    let fresh = restarted
        .create_alert(common::new_alert("ETHUSDT", Side::Long, 100, 110))
        .await
        .unwrap();
    assert!(fresh.id > taken.id);

    restarted.apply_tick(&tick("ETHUSDT", Decimal::from(100))).await.unwrap();
    let report = restarted.tracking(Utc::now()).await;
    assert_eq!(report.count, 1);
    assert_eq!(report.tracking[0].alert_id, fresh.id);
    assert_eq!(report.tracking[0].status, TrackingStatus::TriggeredOnly);
}

#[tokio::test]
async fn test_old_advisory_cannot_reduce_new_position() {
    let (engine, _store) = common::build_engine();
    let snap = |size: i64| PositionSnapshot {
        symbol: "AVAXUSDT".into(),
        size: Decimal::from(size),
        entry_price: Decimal::from(100),
        mark_price: Decimal::from(100),
        leverage: 5,
        timestamp: Utc::now(),
    };

    engine.apply_snapshot(&snap(10)).await.unwrap();
    engine.apply_tick(&tick("AVAXUSDT", Decimal::from(102))).await.unwrap();
    let stale = engine.advisories().await.remove(0).id;

    engine.apply_snapshot(&snap(0)).await.unwrap();
    engine.apply_snapshot(&snap(20)).await.unwrap();

    let result = engine
        .resolve_advisory(stale, cryptoalert::models::AdvisoryOutcome::Accepted)
        .await;
    assert!(result.is_err());
    assert_eq!(engine.positions().await[0].size, Decimal::from(20));
    assert!(engine.advisories().await.is_empty());
}

#[tokio::test]
async fn test_flush_drains_burst_of_queued_writes() {
    let (engine, store) = common::build_engine();
    for i in 0..200 {
        let symbol = if i % 2 == 0 { "BTCUSDT" } else { "ETHUSDT" };
        engine
            .create_alert(common::new_alert(symbol, Side::Short, 120, 110))
            .await
            .unwrap();
    }
    engine.apply_tick(&tick("BTCUSDT", Decimal::from(120))).await.unwrap();
    engine.flush().await;

    let stored = store.load_alerts().await.unwrap();
    assert_eq!(stored.len(), 200);
    assert_eq!(
        stored.iter().filter(|a| a.status == AlertStatus::Triggered).count(),
        100
    );
}
