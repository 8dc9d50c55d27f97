use chrono::Duration;
use rust_decimal::Decimal;
use std::env;

use crate::engine::{EngineConfig, TrackingWindow};

const DEFAULT_PRICE_FEED_URL: &str = "https://fapi.binance.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// In-memory store when unset.
    pub database_url: Option<String>,
    pub api_token: Option<String>,

    // Notifications (optional)
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub notify_on_trigger: bool,
    pub notify_on_near_price: bool,
    pub notify_on_expiry: bool,
    pub notify_on_position_detected: bool,

    // Price feed
    pub price_feed_enabled: bool,
    pub price_feed_url: String,
    pub price_poll_interval_secs: u64,

    // Engine
    pub anti_greed_enabled: bool,
    pub anti_greed_threshold_pct: Decimal,
    pub near_target_pct: Decimal,
    pub opportunity_pct: Decimal,
    pub alert_expiry_hours: i64,
    pub auto_delete_expired: bool,
    pub expiry_check_interval_secs: u64,
    pub tracking_lookback_hours: i64,
    pub tracking_grace_minutes: i64,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            database_url: env_opt("DATABASE_URL"),
            api_token: env_opt("API_TOKEN"),

            telegram_bot_token: env_opt("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: env_opt("TELEGRAM_CHAT_ID"),
            discord_webhook_url: env_opt("DISCORD_WEBHOOK_URL"),
            notify_on_trigger: env_or("NOTIFY_ON_TRIGGER", true),
            notify_on_near_price: env_or("NOTIFY_ON_NEAR_PRICE", true),
            notify_on_expiry: env_or("NOTIFY_ON_EXPIRY", true),
            notify_on_position_detected: env_or("NOTIFY_ON_POSITION_DETECTED", true),

            price_feed_enabled: env_or("PRICE_FEED_ENABLED", true),
            price_feed_url: env::var("PRICE_FEED_URL")
                .unwrap_or_else(|_| DEFAULT_PRICE_FEED_URL.into()),
            price_poll_interval_secs: env_or("PRICE_POLL_INTERVAL_SECS", 10),

            anti_greed_enabled: env_or("ANTI_GREED_ENABLED", true),
            anti_greed_threshold_pct: env_or("ANTI_GREED_THRESHOLD_PCT", Decimal::ONE),
            near_target_pct: env_or("NEAR_TARGET_PCT", Decimal::from(95)),
            opportunity_pct: env_or("OPPORTUNITY_PCT", Decimal::from(80)),
            alert_expiry_hours: env_or("ALERT_EXPIRY_HOURS", 24),
            auto_delete_expired: env_or("AUTO_DELETE_EXPIRED", true),
            expiry_check_interval_secs: env_or("EXPIRY_CHECK_INTERVAL_SECS", 60),
            tracking_lookback_hours: env_or("TRACKING_LOOKBACK_HOURS", 24),
            tracking_grace_minutes: env_or("TRACKING_GRACE_MINUTES", 60),
        })
    }

    /// Returns true if both Telegram credentials are configured.
    pub fn has_telegram(&self) -> bool {
        self.telegram_bot_token.is_some() && self.telegram_chat_id.is_some()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            near_target_pct: self.near_target_pct,
            opportunity_pct: self.opportunity_pct,
            anti_greed_enabled: self.anti_greed_enabled,
            anti_greed_threshold_pct: self.anti_greed_threshold_pct,
            alert_expiry: Duration::hours(self.alert_expiry_hours.max(1)),
            auto_delete_expired: self.auto_delete_expired,
            tracking: TrackingWindow {
                lookback: Duration::hours(self.tracking_lookback_hours.max(1)),
                grace: Duration::minutes(self.tracking_grace_minutes.max(0)),
            },
        }
    }
}

impl Default for AppConfig {
    /// Local defaults: no database, no notifications, feed disabled.
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            database_url: None,
            api_token: None,
            telegram_bot_token: None,
            telegram_chat_id: None,
            discord_webhook_url: None,
            notify_on_trigger: true,
            notify_on_near_price: true,
            notify_on_expiry: true,
            notify_on_position_detected: true,
            price_feed_enabled: false,
            price_feed_url: DEFAULT_PRICE_FEED_URL.into(),
            price_poll_interval_secs: 10,
            anti_greed_enabled: true,
            anti_greed_threshold_pct: Decimal::ONE,
            near_target_pct: Decimal::from(95),
            opportunity_pct: Decimal::from(80),
            alert_expiry_hours: 24,
            auto_delete_expired: true,
            expiry_check_interval_secs: 60,
            tracking_lookback_hours: 24,
            tracking_grace_minutes: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_from_defaults() {
        let cfg = AppConfig::default().engine_config();
        assert_eq!(cfg.near_target_pct, Decimal::from(95));
        assert_eq!(cfg.alert_expiry, Duration::hours(24));
        assert_eq!(cfg.tracking.grace, Duration::minutes(60));
        assert!(cfg.anti_greed_enabled);
    }
}
