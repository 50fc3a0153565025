//! Tool invocation routes.

use crate::state::AppState;
use axum::{extract::State, Json};
use insight_types::{ToolCallRequest, ToolCallResponse};
use serde_json::Value;
use std::sync::Arc;

/// POST /api/tools/call - Dispatch a tool invocation.
///
/// Always returns 200 with the uniform envelope; failures are reported
/// through `success: false` rather than transport status codes.
pub async fn call(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToolCallRequest>,
) -> Json<ToolCallResponse> {
    tracing::debug!(
        target: "gateway::api",
        tool = %request.tool_name,
        principal = %request.principal_id,
        "Tool call received"
    );
    Json(state.dispatcher.dispatch(request).await)
}

/// GET /api/tools/list - Registry of dispatchable tools.
pub async fn list() -> Json<Value> {
    Json(insight_core::tool_registry())
}
