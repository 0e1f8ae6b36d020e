//! The REST gateway.

pub mod admin;
pub mod chat;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::Runtime;

pub fn router(rt: Runtime) -> Router {
    Router::new()
        .route("/api/status", get(admin::get_status))
        .route("/api/config", get(admin::get_config).put(admin::put_config))
        .route("/api/models", get(admin::get_models))
        .route("/api/sessions", get(admin::get_sessions))
        .route("/api/sessions/clear", post(admin::clear_sessions))
        .route("/api/chat", post(chat::post_chat))
        .route("/api/channels", get(admin::get_channels))
        .route("/api/env", get(admin::get_env).put(admin::put_env))
        .layer(CorsLayer::permissive())
        .with_state(rt)
}
