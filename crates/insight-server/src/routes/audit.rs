//! Audit trail routes.

use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use insight_types::{AuditQuery, ToolInvocationRecord, ToolUsageStat};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize)]
pub struct RecentResponse {
    pub records: Vec<ToolInvocationRecord>,
    pub count: usize,
}

/// GET /api/audit/recent - Most recent invocation records, filtered.
pub async fn recent(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<RecentResponse>, (StatusCode, String)> {
    let records = state
        .audit
        .recent(&query)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.caller_message()))?;

    Ok(Json(RecentResponse {
        count: records.len(),
        records,
    }))
}

/// Query parameters for usage statistics.
#[derive(Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    7
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub window_days: u32,
    pub tools: Vec<ToolUsageStat>,
    /// Audit writes dropped since startup; non-zero warrants attention.
    pub dropped_writes: u64,
}

/// GET /api/audit/stats - Per-tool usage statistics over a trailing window.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<StatsResponse>, (StatusCode, String)> {
    let tools = state
        .audit
        .statistics(query.days)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.caller_message()))?;

    Ok(Json(StatsResponse {
        window_days: query.days,
        tools,
        dropped_writes: state.audit.dropped_writes(),
    }))
}
