use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;

use cryptoalert::config::AppConfig;
use cryptoalert::db::{AlertStore, MemoryStore};
use cryptoalert::engine::dispatcher::run_dispatcher;
use cryptoalert::engine::Engine;
use cryptoalert::models::{InboundEvent, NewAlert, Side};
use cryptoalert::AppState;

/// Engine over a fresh in-memory store. The store handle is returned so
/// tests can inspect what was persisted.
#[allow(dead_code)]
pub fn build_engine() -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(AppConfig::default().engine_config(), store.clone() as Arc<dyn AlertStore>);
    (engine, store)
}

/// Full app state with a running dispatcher and a detached metrics recorder.
#[allow(dead_code)]
pub fn build_state(config: AppConfig) -> AppState {
    let store: Arc<dyn AlertStore> = Arc::new(MemoryStore::new());
    let engine = Engine::new(config.engine_config(), store);
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(64);
    tokio::spawn(run_dispatcher(engine.clone(), inbound_rx));

    AppState {
        engine,
        config,
        inbound_tx,
        metrics_handle: cryptoalert::metrics::detached_handle(),
    }
}

#[allow(dead_code)]
pub fn new_alert(symbol: &str, side: Side, target: i64, reference: i64) -> NewAlert {
    NewAlert {
        symbol: symbol.into(),
        target_price: Decimal::from(target),
        alert_type: side,
        notes: Some("test".into()),
        reference_price: Some(Decimal::from(reference)),
    }
}
