//! Raw query request/result types for the SQL tool path.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameters of the raw SQL tool. The caller identity and masking flag
/// travel on the surrounding envelope, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Raw SQL text. Must resolve to a single SELECT statement.
    pub query: String,
    /// Optional row cap, clamped to the configured maximum.
    #[serde(default)]
    pub row_cap: Option<usize>,
}

/// Ordered result rows plus column metadata.
///
/// Masking rewrites cell values in place and never changes the row count
/// or row order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in select-list order.
    pub columns: Vec<String>,
    /// Result rows, column name to JSON value.
    pub rows: Vec<Map<String, Value>>,
    /// Number of rows returned after capping.
    pub row_count: usize,
    /// True when the row cap cut the result short.
    pub truncated: bool,
}
