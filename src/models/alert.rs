use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Side;

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertStatus {
    Pending,
    Triggered,
    Executed,
    Cancelled,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "PENDING",
            AlertStatus::Triggered => "TRIGGERED",
            AlertStatus::Executed => "EXECUTED",
            AlertStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(AlertStatus::Pending),
            "TRIGGERED" => Some(AlertStatus::Triggered),
            "EXECUTED" => Some(AlertStatus::Executed),
            "CANCELLED" => Some(AlertStatus::Cancelled),
            _ => None,
        }
    }

    /// EXECUTED and CANCELLED accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Executed | AlertStatus::Cancelled)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined price target monitored against live ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub symbol: String,
    pub target_price: Decimal,
    pub alert_type: Side,
    pub status: AlertStatus,
    pub notes: String,
    /// Price the progress is measured from.
    pub reference_price: Option<Decimal>,
    /// Last observed tick for the symbol.
    pub current_price: Option<Decimal>,
    /// Stored progress; may exceed 100 on overshoot.
    pub progress_percentage: Decimal,
    pub near_notified: bool,
    pub created_at: DateTime<Utc>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub trade_id: Option<String>,
    /// Bumped on every committed mutation; the store never overwrites a newer version.
    pub version: i64,
}

impl Alert {
    /// Progress clamped to 100 for display.
    pub fn display_progress(&self) -> Decimal {
        self.progress_percentage.min(Decimal::ONE_HUNDRED)
    }
}

/// Create-alert command.
#[derive(Debug, Clone, Deserialize)]
pub struct NewAlert {
    pub symbol: String,
    pub target_price: Decimal,
    pub alert_type: Side,
    #[serde(default)]
    pub notes: Option<String>,
    /// Start price for progress; taken from the first tick when absent.
    #[serde(default)]
    pub reference_price: Option<Decimal>,
}

/// Edit-alert command. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertEdit {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub target_price: Option<Decimal>,
    #[serde(default)]
    pub alert_type: Option<Side>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AlertEdit {
    /// True when the edit touches anything besides notes.
    pub fn touches_locked_fields(&self) -> bool {
        self.symbol.is_some() || self.target_price.is_some() || self.alert_type.is_some()
    }
}
