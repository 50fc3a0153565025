//! Error types for the gateway core.

use crate::guard::RejectReason;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Guard rejection. Surfaced verbatim to the caller, never retried.
    #[error("{0}")]
    Validation(RejectReason),

    /// An accepted query failed at the engine. Reported, not retried:
    /// retrying a malformed request cannot change the outcome.
    #[error("Query execution failed: {0}")]
    Execution(String),

    /// The wall-clock deadline interrupted an in-flight query.
    #[error("Query timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// Admission control tripped; no pooled connection became free
    /// within the bounded wait.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// A staged KPI snapshot failed its sanity check. The prior
    /// snapshot stays authoritative.
    #[error("Snapshot refresh integrity check failed: {0}")]
    RefreshIntegrity(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskJoin(String),
}

impl GatewayError {
    /// Message safe to place in the response envelope. Infrastructure
    /// errors are collapsed so engine internals never cross the boundary.
    pub fn caller_message(&self) -> String {
        match self {
            GatewayError::Database(_) | GatewayError::Io(_) | GatewayError::TaskJoin(_) => {
                "Internal gateway error".to_string()
            }
            other => other.to_string(),
        }
    }
}
