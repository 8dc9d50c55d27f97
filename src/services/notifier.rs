use serde_json::json;
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::models::{Alert, EngineEvent};

/// Which event kinds are worth a message.
#[derive(Debug, Clone, Copy)]
pub struct NotifyFilter {
    pub on_trigger: bool,
    pub on_near_price: bool,
    pub on_expiry: bool,
    pub on_position_detected: bool,
}

impl NotifyFilter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            on_trigger: config.notify_on_trigger,
            on_near_price: config.notify_on_near_price,
            on_expiry: config.notify_on_expiry,
            on_position_detected: config.notify_on_position_detected,
        }
    }

    pub fn allows(&self, event: &EngineEvent) -> bool {
        match event {
            EngineEvent::AlertTriggered { .. } => self.on_trigger,
            EngineEvent::AlertNearTarget { .. } => self.on_near_price,
            EngineEvent::AlertExpired(_) => self.on_expiry,
            EngineEvent::PositionOpened(_) => self.on_position_detected,
            EngineEvent::AlertCancelled(_) => false,
            _ => true,
        }
    }
}

/// Telegram + Discord delivery. Failures are logged but never block the engine.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    telegram: Option<(String, String)>,
    discord_webhook: Option<String>,
    filter: NotifyFilter,
}

impl Notifier {
    /// `None` when no channel is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let telegram = match (&config.telegram_bot_token, &config.telegram_chat_id) {
            (Some(token), Some(chat)) => Some((token.clone(), chat.clone())),
            _ => None,
        };
        if telegram.is_none() && config.discord_webhook_url.is_none() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            telegram,
            discord_webhook: config.discord_webhook_url.clone(),
            filter: NotifyFilter::from_config(config),
        })
    }

    pub async fn send_telegram(&self, html: &str) {
        let Some((token, chat_id)) = &self.telegram else {
            return;
        };
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let body = json!({
            "chat_id": chat_id,
            "text": html,
            "parse_mode": "HTML",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(status = %resp.status(), "Telegram sendMessage returned non-2xx");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to send Telegram notification"),
        }
    }

    pub async fn send_discord(&self, html: &str) {
        let Some(url) = &self.discord_webhook else {
            return;
        };
        let body = json!({ "content": html_to_markdown(html) });

        match self.http.post(url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                tracing::warn!(status = %resp.status(), "Discord webhook returned non-2xx");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to send Discord notification"),
        }
    }

    pub async fn notify(&self, event: &EngineEvent) {
        if !self.filter.allows(event) {
            return;
        }
        let Some(message) = format_event(event) else {
            return;
        };
        self.send_telegram(&message).await;
        self.send_discord(&message).await;
    }
}

/// Deliver engine events until the channel closes.
pub async fn run_notifier(notifier: Notifier, mut rx: broadcast::Receiver<EngineEvent>) {
    tracing::info!(
        telegram = notifier.telegram.is_some(),
        discord = notifier.discord_webhook.is_some(),
        "Notifier started"
    );
    loop {
        match rx.recv().await {
            Ok(event) => notifier.notify(&event).await,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "Notifier lagged behind engine events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    tracing::warn!("Engine event channel closed, notifier stopping");
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_to_markdown(html: &str) -> String {
    html.replace("<b>", "**")
        .replace("</b>", "**")
        .replace("<code>", "`")
        .replace("</code>", "`")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn alert_lines(alert: &Alert) -> String {
    let mut lines = format!(
        "Symbol: <code>{}</code>\nType: {}\nTarget: {}",
        escape(&alert.symbol),
        alert.alert_type,
        alert.target_price,
    );
    if !alert.notes.is_empty() {
        lines.push_str(&format!("\nNotes: {}", escape(&alert.notes)));
    }
    lines
}

/// Render an event as a Telegram HTML message.
pub fn format_event(event: &EngineEvent) -> Option<String> {
    let text = match event {
        EngineEvent::AlertTriggered { alert, price } => format!(
            "🎯 <b>Alert triggered</b>\n{}\nPrice: {}",
            alert_lines(alert),
            price
        ),
        EngineEvent::AlertNearTarget { alert, price } => format!(
            "⏳ <b>Price near target</b>\n{}\nPrice: {}\nProgress: {}%",
            alert_lines(alert),
            price,
            alert.display_progress().round_dp(1)
        ),
        EngineEvent::AlertExecuted(alert) => format!(
            "✅ <b>Alert executed</b>\n{}\nTrade: <code>{}</code>",
            alert_lines(alert),
            escape(alert.trade_id.as_deref().unwrap_or("-"))
        ),
        EngineEvent::AlertExpired(alert) => {
            format!("⌛ <b>Alert expired</b>\n{}", alert_lines(alert))
        }
        EngineEvent::AlertCancelled(_) => return None,
        EngineEvent::PositionOpened(p) => format!(
            "📈 <b>Position detected</b>\nSymbol: <code>{}</code>\nSide: {}\nSize: {} @ {}\nLeverage: {}x ({})",
            escape(&p.symbol),
            p.side,
            p.size,
            p.entry_price,
            p.leverage,
            p.trading_mode
        ),
        EngineEvent::TpExecuted {
            symbol,
            level,
            price,
            closed_size,
            realized_pnl,
        } => format!(
            "💰 <b>{} hit</b>\nSymbol: <code>{}</code>\nClosed: {} @ {}\nPnL: {}",
            escape(level),
            escape(symbol),
            closed_size,
            price,
            realized_pnl.round_dp(2)
        ),
        EngineEvent::StopLossMoved { symbol, price } => format!(
            "🛡 <b>Stop loss moved</b>\nSymbol: <code>{}</code>\nNew stop: {}",
            escape(symbol),
            price
        ),
        EngineEvent::PositionClosed {
            symbol,
            reason,
            price,
            realized_pnl,
        } => format!(
            "🏁 <b>Position closed</b> ({})\nSymbol: <code>{}</code>\nPrice: {}\nRealized PnL: {}",
            escape(reason),
            escape(symbol),
            price,
            realized_pnl.round_dp(2)
        ),
        EngineEvent::HoldExpired {
            symbol,
            trading_mode,
            opened_at,
        } => format!(
            "⏰ <b>Max hold exceeded</b>\nSymbol: <code>{}</code>\nMode: {}\nOpened: {}",
            escape(symbol),
            trading_mode,
            opened_at.format("%Y-%m-%d %H:%M UTC")
        ),
        EngineEvent::AdvisoryRaised(a) => format!(
            "🧠 <b>Anti-greed</b>\nSymbol: <code>{}</code>\nPnL: {}% (threshold {}%)\nSuggested: close {}%, trail {}%",
            escape(&a.symbol),
            a.pnl_percent.round_dp(2),
            a.threshold,
            a.close_pct,
            a.trail_pct
        ),
    };
    Some(text)
}
