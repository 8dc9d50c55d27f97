use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::AppState;

use super::ApiResponse;

#[derive(Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: String,
}

/// GET /api/config: effective engine settings. Secrets are reported as set/unset only.
pub async fn get_config(State(state): State<AppState>) -> Json<ApiResponse<Vec<ConfigEntry>>> {
    let c = &state.config;
    let entry = |key: &'static str, value: String| ConfigEntry { key, value };

    let entries = vec![
        entry("near_target_pct", c.near_target_pct.to_string()),
        entry("opportunity_pct", c.opportunity_pct.to_string()),
        entry("anti_greed_enabled", c.anti_greed_enabled.to_string()),
        entry("anti_greed_threshold_pct", c.anti_greed_threshold_pct.to_string()),
        entry("alert_expiry_hours", c.alert_expiry_hours.to_string()),
        entry("auto_delete_expired", c.auto_delete_expired.to_string()),
        entry("tracking_lookback_hours", c.tracking_lookback_hours.to_string()),
        entry("tracking_grace_minutes", c.tracking_grace_minutes.to_string()),
        entry("price_feed_enabled", c.price_feed_enabled.to_string()),
        entry("price_poll_interval_secs", c.price_poll_interval_secs.to_string()),
        entry("notify_on_trigger", c.notify_on_trigger.to_string()),
        entry("notify_on_near_price", c.notify_on_near_price.to_string()),
        entry("notify_on_expiry", c.notify_on_expiry.to_string()),
        entry("notify_on_position_detected", c.notify_on_position_detected.to_string()),
        entry("telegram_configured", c.has_telegram().to_string()),
        entry("discord_configured", c.discord_webhook_url.is_some().to_string()),
        entry("persistent_store", c.database_url.is_some().to_string()),
    ];

    ApiResponse::ok(entries)
}
