use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use crate::models::{Alert, AlertStatus, Position, Side};

use super::AlertStore;

/// Database row for the alerts table.
#[derive(Debug, Clone, FromRow)]
struct AlertRow {
    id: i64,
    symbol: String,
    target_price: Decimal,
    alert_type: String,
    status: String,
    notes: String,
    reference_price: Option<Decimal>,
    current_price: Option<Decimal>,
    progress_percentage: Decimal,
    near_notified: bool,
    created_at: DateTime<Utc>,
    triggered_at: Option<DateTime<Utc>>,
    executed_at: Option<DateTime<Utc>>,
    trade_id: Option<String>,
    version: i64,
}

impl TryFrom<AlertRow> for Alert {
    type Error = anyhow::Error;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let alert_type = Side::from_api_str(&row.alert_type)
            .ok_or_else(|| anyhow::anyhow!("alert {}: unknown alert_type {}", row.id, row.alert_type))?;
        let status = AlertStatus::from_db_str(&row.status)
            .ok_or_else(|| anyhow::anyhow!("alert {}: unknown status {}", row.id, row.status))?;

        Ok(Alert {
            id: row.id,
            symbol: row.symbol,
            target_price: row.target_price,
            alert_type,
            status,
            notes: row.notes,
            reference_price: row.reference_price,
            current_price: row.current_price,
            progress_percentage: row.progress_percentage,
            near_notified: row.near_notified,
            created_at: row.created_at,
            triggered_at: row.triggered_at,
            executed_at: row.executed_at,
            trade_id: row.trade_id,
            version: row.version,
        })
    }
}

/// Postgres-backed store. Positions are kept as JSONB documents keyed by symbol.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn load_alerts(&self) -> anyhow::Result<Vec<Alert>> {
        let rows = sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn save_alert(&self, alert: &Alert) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, symbol, target_price, alert_type, status, notes,
                reference_price, current_price, progress_percentage, near_notified,
                created_at, triggered_at, executed_at, trade_id, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                symbol = EXCLUDED.symbol,
                target_price = EXCLUDED.target_price,
                alert_type = EXCLUDED.alert_type,
                status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                reference_price = EXCLUDED.reference_price,
                current_price = EXCLUDED.current_price,
                progress_percentage = EXCLUDED.progress_percentage,
                near_notified = EXCLUDED.near_notified,
                triggered_at = EXCLUDED.triggered_at,
                executed_at = EXCLUDED.executed_at,
                trade_id = EXCLUDED.trade_id,
                version = EXCLUDED.version
            WHERE alerts.version <= EXCLUDED.version
            "#,
        )
        .bind(alert.id)
        .bind(&alert.symbol)
        .bind(alert.target_price)
        .bind(alert.alert_type.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.notes)
        .bind(alert.reference_price)
        .bind(alert.current_price)
        .bind(alert.progress_percentage)
        .bind(alert.near_notified)
        .bind(alert.created_at)
        .bind(alert.triggered_at)
        .bind(alert.executed_at)
        .bind(&alert.trade_id)
        .bind(alert.version)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE alert_id_high_water SET last_id = GREATEST(last_id, $1) WHERE singleton",
        )
        .bind(alert.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_alert(&self, id: i64) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM alerts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn max_alert_id(&self) -> anyhow::Result<i64> {
        let last = sqlx::query_scalar::<_, i64>(
            "SELECT GREATEST(
                 COALESCE((SELECT last_id FROM alert_id_high_water WHERE singleton), 0),
                 COALESCE((SELECT MAX(id) FROM alerts), 0)
             )",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(last)
    }

    async fn load_positions(&self) -> anyhow::Result<Vec<Position>> {
        let docs = sqlx::query_scalar::<_, Json<Position>>(
            "SELECT document FROM positions ORDER BY symbol",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(docs.into_iter().map(|Json(p)| p).collect())
    }

    async fn save_position(&self, position: &Position) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, document, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (symbol) DO UPDATE
                SET document = EXCLUDED.document, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&position.symbol)
        .bind(Json(position))
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_position(&self, symbol: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM positions WHERE symbol = $1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
