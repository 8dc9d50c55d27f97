pub mod anti_greed;
pub mod book;
pub mod dispatcher;
pub mod ladder;
pub mod positions;
pub mod progress;
pub mod service;
pub mod state_machine;
pub mod tracker;

pub use book::{ClosedPart, ConfirmOutcome};
pub use ladder::{mode_table, plan_ladder, LadderOutcome, LadderPlan, ModeProfile};
pub use progress::progress_pct;
pub use service::{AlertStats, Engine, EngineSnapshot, SymbolStats};
pub use tracker::TrackingWindow;

use chrono::Duration;
use rust_decimal::Decimal;

/// Engine-facing settings, built from `AppConfig`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Progress at which a PENDING alert emits its near-target notice.
    pub near_target_pct: Decimal,
    /// Progress at which a PENDING alert is listed as an opportunity.
    pub opportunity_pct: Decimal,
    pub anti_greed_enabled: bool,
    pub anti_greed_threshold_pct: Decimal,
    pub alert_expiry: Duration,
    pub auto_delete_expired: bool,
    pub tracking: TrackingWindow,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            near_target_pct: Decimal::from(95),
            opportunity_pct: Decimal::from(80),
            anti_greed_enabled: true,
            anti_greed_threshold_pct: Decimal::ONE,
            alert_expiry: Duration::hours(24),
            auto_delete_expired: true,
            tracking: TrackingWindow::default(),
        }
    }
}
