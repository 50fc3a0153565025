//! KPI snapshot management routes.

use crate::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use insight_types::RefreshStatus;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub struct RefreshResponse {
    /// False when another refresh was already in flight and this
    /// trigger was skipped.
    pub refreshed: bool,
    pub status: RefreshStatus,
}

/// GET /api/kpi/refresh-status - Snapshot versions and refresh times.
pub async fn refresh_status(State(state): State<Arc<AppState>>) -> Json<RefreshStatus> {
    Json(state.aggregator.refresh_status())
}

/// POST /api/kpi/refresh - Trigger an on-demand snapshot refresh.
pub async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshResponse>, (StatusCode, String)> {
    let refreshed = state
        .aggregator
        .refresh()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.caller_message()))?;

    Ok(Json(RefreshResponse {
        refreshed,
        status: state.aggregator.refresh_status(),
    }))
}
