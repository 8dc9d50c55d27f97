use chrono::Utc;
use tokio::time::{interval, Duration};

use crate::engine::Engine;

/// Periodically cancel alerts past their expiry and refresh the gauges.
pub async fn run_expiry_sweeper(engine: Engine, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    tracing::info!(
        interval_secs,
        expiry_hours = engine.config().alert_expiry.num_hours(),
        auto_delete = engine.config().auto_delete_expired,
        "Expiry sweeper started"
    );

    loop {
        ticker.tick().await;

        let expired = engine.expire_alerts(Utc::now()).await;
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired alerts cancelled");
        }
        engine.refresh_gauges().await;
    }
}
