//! Insight gateway server library - HTTP front end for the analytics
//! query gateway.
//!
//! This library provides the HTTP routes and application state for the
//! gateway server. It's separated from main.rs to enable integration
//! testing.

pub mod config;
pub mod logging;
pub mod routes;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the full application router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Tool dispatch
        .route("/tools/call", post(routes::tools::call))
        .route("/tools/list", get(routes::tools::list))
        // Audit trail
        .route("/audit/recent", get(routes::audit::recent))
        .route("/audit/stats", get(routes::audit::stats))
        // KPI snapshots
        .route("/kpi/refresh-status", get(routes::kpi::refresh_status))
        .route("/kpi/refresh", post(routes::kpi::refresh))
        .route("/health", get(routes::health));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(routes::health))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
