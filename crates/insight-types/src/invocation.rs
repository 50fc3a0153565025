//! Tool invocation envelope and audit record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Outcome of a tool invocation as recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Success,
    Error,
}

impl InvocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStatus::Success => "success",
            InvocationStatus::Error => "error",
        }
    }
}

/// A named tool invocation submitted to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Registered tool name, e.g. `sql.query`.
    pub tool_name: String,
    /// Tool parameters as a JSON object.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Identified caller.
    #[serde(default = "default_principal")]
    pub principal_id: String,
    /// Whether sensitive columns are redacted. Defaults to true.
    #[serde(default = "default_mask")]
    pub mask: bool,
}

fn default_principal() -> String {
    "anonymous".to_string()
}

fn default_mask() -> bool {
    true
}

/// Uniform response envelope produced by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolCallResponse {
    pub fn ok(result: Value, execution_time_ms: u64) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time_ms,
        }
    }

    pub fn err(message: String, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message),
            execution_time_ms,
        }
    }
}

/// One immutable audit record per invocation. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub id: Uuid,
    pub tool_name: String,
    /// Invocation parameters, sanitized through the PII mask before
    /// persistence.
    pub parameters: Value,
    pub principal_id: String,
    pub execution_time_ms: u64,
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ToolInvocationRecord {
    /// Build a record from a dispatched envelope.
    pub fn from_envelope(
        tool_name: &str,
        parameters: Value,
        principal_id: &str,
        response: &ToolCallResponse,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_name: tool_name.to_string(),
            parameters,
            principal_id: principal_id.to_string(),
            execution_time_ms: response.execution_time_ms,
            status: if response.success {
                InvocationStatus::Success
            } else {
                InvocationStatus::Error
            },
            error_message: response.error.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Filters for reading the audit trail, most recent first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub principal: Option<String>,
    #[serde(default)]
    pub status: Option<InvocationStatus>,
}

/// Per-tool usage statistics over a trailing window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsageStat {
    pub tool_name: String,
    pub total_calls: u64,
    pub error_count: u64,
    /// Successful calls as a percentage of total, rounded to 0.01.
    pub success_rate: f64,
    pub avg_execution_ms: f64,
}
