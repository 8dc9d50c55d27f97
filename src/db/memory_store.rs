use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::models::{Alert, Position};

use super::AlertStore;

/// Process-local store used in tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    alerts: Mutex<HashMap<i64, Alert>>,
    positions: Mutex<HashMap<String, Position>>,
    high_water: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, as if restored from an earlier run.
    pub fn with_state(alerts: Vec<Alert>, positions: Vec<Position>) -> Self {
        let high_water = alerts.iter().map(|a| a.id).max().unwrap_or(0);
        Self {
            alerts: Mutex::new(alerts.into_iter().map(|a| (a.id, a)).collect()),
            positions: Mutex::new(positions.into_iter().map(|p| (p.symbol.clone(), p)).collect()),
            high_water: AtomicI64::new(high_water),
        }
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn load_alerts(&self) -> anyhow::Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.alerts.lock().await.values().cloned().collect();
        alerts.sort_by_key(|a| a.id);
        Ok(alerts)
    }

    async fn save_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        self.high_water.fetch_max(alert.id, Ordering::SeqCst);
        let mut alerts = self.alerts.lock().await;
        match alerts.get(&alert.id) {
            Some(stored) if stored.version > alert.version => {
                tracing::debug!(alert_id = alert.id, "Skipping stale alert write");
            }
            _ => {
                alerts.insert(alert.id, alert.clone());
            }
        }
        Ok(())
    }

    async fn delete_alert(&self, id: i64) -> anyhow::Result<()> {
        self.alerts.lock().await.remove(&id);
        Ok(())
    }

    async fn max_alert_id(&self) -> anyhow::Result<i64> {
        Ok(self.high_water.load(Ordering::SeqCst))
    }

    async fn load_positions(&self) -> anyhow::Result<Vec<Position>> {
        let mut positions: Vec<Position> = self.positions.lock().await.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn save_position(&self, position: &Position) -> anyhow::Result<()> {
        self.positions
            .lock()
            .await
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn remove_position(&self, symbol: &str) -> anyhow::Result<()> {
        self.positions.lock().await.remove(symbol);
        Ok(())
    }
}
