use std::collections::HashMap;
use std::time::Instant;

use metrics::histogram;
use tokio::sync::mpsc;

use crate::models::{normalize_symbol, InboundEvent};

use super::Engine;

const WORKER_QUEUE: usize = 256;

/// Key for confirmations whose alert id is unknown.
const UNROUTED: &str = "*";

/// Route inbound events to one worker per symbol.
///
/// A symbol's events are applied strictly in arrival order; different symbols
/// run in parallel. Workers are spawned on first sight of a symbol.
pub async fn run_dispatcher(engine: Engine, mut rx: mpsc::Receiver<InboundEvent>) {
    let mut workers: HashMap<String, mpsc::Sender<InboundEvent>> = HashMap::new();
    tracing::info!("Event dispatcher started");

    while let Some(event) = rx.recv().await {
        let key = match &event {
            InboundEvent::Tick(t) => normalize_symbol(&t.symbol),
            InboundEvent::Snapshot(s) => normalize_symbol(&s.symbol),
            InboundEvent::Confirmation(c) => engine
                .symbol_of(c.alert_id)
                .await
                .unwrap_or_else(|| UNROUTED.to_string()),
        };

        let mut event = Some(event);
        // A worker only stops if its task panicked; respawn once.
        for _ in 0..2 {
            let tx = workers
                .entry(key.clone())
                .or_insert_with(|| spawn_worker(engine.clone(), key.clone()));
            let Some(ev) = event.take() else { break };
            match tx.send(ev).await {
                Ok(()) => break,
                Err(mpsc::error::SendError(ev)) => {
                    tracing::warn!(symbol = %key, "Symbol worker gone, respawning");
                    workers.remove(&key);
                    event = Some(ev);
                }
            }
        }
        if event.is_some() {
            tracing::error!(symbol = %key, "Dropped inbound event: no worker available");
        }
    }

    tracing::warn!("Inbound event channel closed, dispatcher shutting down");
}

fn spawn_worker(engine: Engine, symbol: String) -> mpsc::Sender<InboundEvent> {
    let (tx, mut rx) = mpsc::channel::<InboundEvent>(WORKER_QUEUE);
    tracing::debug!(symbol = %symbol, "Spawning symbol worker");

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let is_tick = matches!(event, InboundEvent::Tick(_));
            let started = Instant::now();
            if let Err(e) = engine.handle(event).await {
                tracing::warn!(symbol = %symbol, error = %e, "Inbound event rejected");
            }
            if is_tick {
                histogram!("tick_latency_seconds").record(started.elapsed().as_secs_f64());
            }
        }
    });

    tx
}
