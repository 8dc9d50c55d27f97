mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use cryptoalert::api::router::create_router;
use cryptoalert::config::AppConfig;
use cryptoalert::AppState;

fn build_test_app() -> (Router, AppState) {
    let state = common::build_state(AppConfig::default());
    (create_router(state.clone()), state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _state) = build_test_app();

    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_create_list_and_filter_alerts() {
    let (app, _state) = build_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/api/alerts",
        Some(json!({
            "symbol": "btcusdt",
            "target_price": "45000",
            "alert_type": "LONG",
            "notes": "dip buy",
            "reference_price": "46000"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["symbol"], "BTCUSDT");
    assert_eq!(json["data"]["status"], "PENDING");

    let (status, json) = send(&app, "GET", "/api/alerts?status=pending", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"].as_array().unwrap().len(), 1);

    let (_, json) = send(&app, "GET", "/api/alerts?symbol=ETHUSDT", None).await;
    assert!(json["data"].as_array().unwrap().is_empty());

    let (status, json) = send(&app, "GET", "/api/alerts?status=bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_invalid_alert_is_rejected() {
    let (app, _state) = build_test_app();

    let (status, json) = send(
        &app,
        "POST",
        "/api/alerts",
        Some(json!({ "symbol": "BTCUSDT", "target_price": "-1", "alert_type": "LONG" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_unknown_alert_returns_not_found() {
    let (app, _state) = build_test_app();

    let (status, _) = send(&app, "GET", "/api/alerts/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tick_endpoint_triggers_alert_and_confirm_opens_position() {
    let (app, state) = build_test_app();

    let (_, json) = send(
        &app,
        "POST",
        "/api/alerts",
        Some(json!({
            "symbol": "ETHUSDT",
            "target_price": "100",
            "alert_type": "LONG",
            "reference_price": "110"
        })),
    )
    .await;
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        "/api/ticks",
        Some(json!({ "symbol": "ethusdt", "price": "100" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Ticks are applied by the dispatcher in the background.
    let mut triggered = false;
    for _ in 0..50 {
        let alert = state.engine.get_alert(id).await.unwrap();
        if alert.status == cryptoalert::models::AlertStatus::Triggered {
            triggered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(triggered);

    let body = json!({ "trade_id": "T-77", "entry_price": "100", "size": "10", "leverage": 5 });
    let (status, json) = send(&app, "POST", &format!("/api/alerts/{id}/confirm"), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["outcome"], "executed");
    assert_eq!(json["data"]["position"]["trading_mode"], "SWING");

    let (_, json) = send(&app, "POST", &format!("/api/alerts/{id}/confirm"), Some(body)).await;
    assert_eq!(json["data"]["outcome"], "duplicate");

    let (status, json) = send(&app, "GET", "/api/trading/positions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["count"], 1);

    let (status, json) = send(
        &app,
        "POST",
        "/api/trading/close-position",
        Some(json!({ "symbol": "ETHUSDT", "percentage": "50" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["position_closed"], false);
}

#[tokio::test]
async fn test_cancel_twice_conflicts() {
    let (app, _state) = build_test_app();

    let (_, json) = send(
        &app,
        "POST",
        "/api/alerts",
        Some(json!({ "symbol": "SOLUSDT", "target_price": "150", "alert_type": "SHORT" })),
    )
    .await;
    let id = json["data"]["id"].as_i64().unwrap();

    let (status, json) = send(&app, "POST", &format!("/api/alerts/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["status"], "CANCELLED");

    let (status, _) = send(&app, "POST", &format!("/api/alerts/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_close_without_position_is_not_found() {
    let (app, _state) = build_test_app();

    let (status, _) = send(
        &app,
        "POST",
        "/api/trading/close-position",
        Some(json!({ "symbol": "BTCUSDT" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_modes_table() {
    let (app, _state) = build_test_app();

    let (status, json) = send(&app, "GET", "/api/trading/modes", None).await;
    assert_eq!(status, StatusCode::OK);
    let modes = json["data"].as_array().unwrap();
    assert_eq!(modes.len(), 3);
    assert_eq!(modes[0]["mode"], "SWING");
}

#[tokio::test]
async fn test_dashboard_summary() {
    let (app, _state) = build_test_app();

    let (status, json) = send(&app, "GET", "/api/dashboard/summary", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert!(json["data"]["pending_alerts"].is_number());
    assert!(json["data"]["open_positions"].is_number());
}

#[tokio::test]
async fn test_api_token_is_enforced() {
    let config = AppConfig {
        api_token: Some("secret".into()),
        ..AppConfig::default()
    };
    let app = create_router(common::build_state(config));

    let (status, _) = send(&app, "GET", "/api/alerts", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/alerts")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Health stays public.
    let (status, _) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _state) = build_test_app();

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8(body.to_vec()).is_ok());
}
