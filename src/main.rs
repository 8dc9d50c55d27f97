use std::sync::Arc;

use tokio::sync::mpsc;

use cryptoalert::api::router::create_router;
use cryptoalert::config::AppConfig;
use cryptoalert::db::{self, AlertStore, MemoryStore, PgStore};
use cryptoalert::engine::dispatcher::run_dispatcher;
use cryptoalert::engine::Engine;
use cryptoalert::feed::{run_price_feed, BinanceFeed};
use cryptoalert::models::InboundEvent;
use cryptoalert::services::expiry::run_expiry_sweeper;
use cryptoalert::services::notifier::{run_notifier, Notifier};
use cryptoalert::{metrics, AppState};

const INBOUND_QUEUE: usize = 1000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let addr = format!("{}:{}", config.host, config.port);

    let metrics_handle = metrics::init_metrics()?;

    // --- Persistence ---
    let store: Arc<dyn AlertStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            tracing::info!("Database connected");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping alerts and positions in memory");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Engine ---
    let engine = Engine::new(config.engine_config(), store);
    let restored = engine.restore().await?;
    tracing::info!(alerts = restored, "Engine state restored");

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_QUEUE);
    tokio::spawn(run_dispatcher(engine.clone(), inbound_rx));

    // --- Price feed ---
    if config.price_feed_enabled {
        let feed = BinanceFeed::new(reqwest::Client::new(), config.price_feed_url.clone());
        tokio::spawn(run_price_feed(
            feed,
            engine.clone(),
            inbound_tx.clone(),
            config.price_poll_interval_secs,
        ));
    } else {
        tracing::info!("Price feed disabled (PRICE_FEED_ENABLED=false)");
    }

    // --- Notifications ---
    match Notifier::from_config(&config) {
        Some(notifier) => {
            tokio::spawn(run_notifier(notifier, engine.subscribe()));
        }
        None => tracing::info!("No notification channel configured"),
    }

    tokio::spawn(run_expiry_sweeper(
        engine.clone(),
        config.expiry_check_interval_secs,
    ));

    let state = AppState {
        engine: engine.clone(),
        config,
        inbound_tx,
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Flushing queued store writes...");
    engine.flush().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
