pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod feed;
pub mod metrics;
pub mod models;
pub mod services;

use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::engine::Engine;
use crate::models::InboundEvent;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub config: AppConfig,
    /// Ticks and snapshots bound for the per-symbol dispatcher.
    pub inbound_tx: mpsc::Sender<InboundEvent>,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
