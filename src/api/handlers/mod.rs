pub mod alerts;
pub mod config;
pub mod dashboard;
pub mod health;
pub mod ingest;
pub mod metrics;
pub mod trading;
pub mod ws;

use axum::Json;
use serde::Serialize;

/// Envelope shared by every JSON endpoint.
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}
