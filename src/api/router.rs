use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::auth::require_auth;
use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    // Public routes, no authentication
    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::render));

    // Require a Bearer token when API_TOKEN is set
    let protected = Router::new()
        // Alerts
        .route(
            "/api/alerts",
            get(handlers::alerts::list).post(handlers::alerts::create),
        )
        .route("/api/alerts/opportunities", get(handlers::alerts::opportunities))
        .route("/api/alerts/stats", get(handlers::alerts::stats))
        .route(
            "/api/alerts/:id",
            get(handlers::alerts::get)
                .put(handlers::alerts::update)
                .delete(handlers::alerts::delete),
        )
        .route("/api/alerts/:id/cancel", post(handlers::alerts::cancel))
        .route("/api/alerts/:id/confirm", post(handlers::alerts::confirm))
        // Inbound market data
        .route("/api/ticks", post(handlers::ingest::post_tick))
        .route("/api/positions/snapshot", post(handlers::ingest::post_snapshot))
        // Trading
        .route("/api/trading/positions", get(handlers::trading::positions))
        .route("/api/trading/close-position", post(handlers::trading::close_position))
        .route(
            "/api/trading/setup-take-profits",
            post(handlers::trading::setup_take_profits),
        )
        .route("/api/trading/tracking", get(handlers::trading::tracking))
        .route("/api/trading/modes", get(handlers::trading::modes))
        .route("/api/trading/advisories", get(handlers::trading::advisories))
        .route(
            "/api/trading/advisories/:id/accept",
            post(handlers::trading::accept_advisory),
        )
        .route(
            "/api/trading/advisories/:id/ignore",
            post(handlers::trading::ignore_advisory),
        )
        // Dashboard
        .route("/api/dashboard/summary", get(handlers::dashboard::summary))
        .route("/api/config", get(handlers::config::get_config))
        // WebSocket
        .route("/ws", get(handlers::ws::handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
