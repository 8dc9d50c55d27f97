pub mod memory_store;
pub mod pg_store;

pub use memory_store::MemoryStore;
pub use pg_store::PgStore;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::models::{Alert, Position};

/// Durable home for alerts and open positions.
///
/// The engine keeps the authoritative state in memory and writes through this
/// trait after each committed transition. A save never replaces a stored alert
/// carrying a higher `version`.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn load_alerts(&self) -> anyhow::Result<Vec<Alert>>;
    async fn save_alert(&self, alert: &Alert) -> anyhow::Result<()>;
    async fn delete_alert(&self, id: i64) -> anyhow::Result<()>;
    /// Highest alert id ever saved, including alerts deleted since.
    async fn max_alert_id(&self) -> anyhow::Result<i64>;

    async fn load_positions(&self) -> anyhow::Result<Vec<Position>>;
    async fn save_position(&self, position: &Position) -> anyhow::Result<()>;
    async fn remove_position(&self, symbol: &str) -> anyhow::Result<()>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> bool {
        true
    }
}

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
