//! Courier Gateway Crate
//!
//! Real-time delivery over WebSocket: presence announcements, message
//! fan-out, reconnect replay, and the auxiliary query events (history,
//! contacts, read receipts).

pub mod auth;
pub mod error;
pub mod events;
pub mod filter;
pub mod state;
pub mod websocket;

pub use auth::{IdentityVerifier, TrustedHeaderVerifier};
pub use error::{AuthError, GatewayError, GatewayResult};
pub use events::{ClientEvent, ContactSummary, ServerEvent};
pub use filter::{ContentFilter, PassthroughFilter};
pub use state::AppState;

use axum::{
    http::header::{AUTHORIZATION, CONTENT_TYPE},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(websocket::create_websocket_routes())
        .with_state(state)
        .layer(cors_layer())
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}
