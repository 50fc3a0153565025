//! Query executor: runs guard-approved queries on pooled read-only
//! connections under a hard wall-clock timeout and row cap.

use crate::guard::ApprovedQuery;
use crate::pool::{PooledConnection, ReadPool};
use crate::{GatewayError, Result};
use insight_types::QueryResult;
use rusqlite::types::ValueRef;
use serde_json::{Map, Number, Value};
use std::time::Duration;

/// Executes approved queries against the analytical store.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: ReadPool,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pool: ReadPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Run an approved query. The statement is interrupted at the
    /// deadline; the connection returns to the pool on every exit path,
    /// including timeout and caller cancellation, because the pooled
    /// guard travels into the blocking task and is dropped there.
    pub async fn run(&self, approved: &ApprovedQuery) -> Result<QueryResult> {
        let conn = self.pool.acquire().await?;
        let interrupt = conn.get_interrupt_handle();
        let sql = approved.sql.clone();
        let cap = approved.row_cap;
        let timeout_secs = self.timeout.as_secs();

        let work = tokio::task::spawn_blocking(move || execute_on(conn, &sql, cap, timeout_secs));
        match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(GatewayError::TaskJoin(join.to_string())),
            Err(_) => {
                // The interrupted statement errors out inside the
                // detached blocking task, which then releases the
                // connection.
                interrupt.interrupt();
                Err(GatewayError::Timeout {
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }
}

fn execute_on(
    conn: PooledConnection,
    sql: &str,
    cap: usize,
    timeout_secs: u64,
) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| GatewayError::Execution(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| GatewayError::Execution(e.to_string()))?;
    let mut out: Vec<Map<String, Value>> = Vec::new();
    let mut truncated = false;

    while let Some(row) = rows.next().map_err(|e| map_row_error(e, timeout_secs))? {
        if out.len() == cap {
            truncated = true;
            break;
        }
        let mut obj = Map::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let cell = row
                .get_ref(idx)
                .map_err(|e| GatewayError::Execution(e.to_string()))?;
            obj.insert(name.clone(), cell_to_json(cell));
        }
        out.push(obj);
    }

    Ok(QueryResult {
        columns,
        row_count: out.len(),
        rows: out,
        truncated,
    })
}

fn map_row_error(e: rusqlite::Error, timeout_secs: u64) -> GatewayError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::OperationInterrupted) => GatewayError::Timeout {
            seconds: timeout_secs,
        },
        _ => GatewayError::Execution(e.to_string()),
    }
}

fn cell_to_json(cell: ValueRef<'_>) -> Value {
    match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use rusqlite::Connection;
    use serde_json::json;
    use std::path::PathBuf;

    fn fixture_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE customers (id INTEGER, email TEXT, balance REAL);
            INSERT INTO customers VALUES
                (1, 'john.doe@example.com', 100.5),
                (2, 'jane@test.com', 250.0),
                (3, NULL, 0.0);
            "#,
        )
        .unwrap();
        (dir, path)
    }

    fn executor(path: PathBuf) -> QueryExecutor {
        let pool = ReadPool::open(&PoolConfig {
            path,
            size: 2,
            acquire_timeout: Duration::from_millis(200),
        })
        .unwrap();
        QueryExecutor::new(pool, Duration::from_secs(5))
    }

    fn approved(sql: &str, cap: usize) -> ApprovedQuery {
        ApprovedQuery {
            sql: sql.to_string(),
            row_cap: cap,
        }
    }

    #[tokio::test]
    async fn returns_ordered_rows_and_columns() {
        let (_dir, path) = fixture_db();
        let result = executor(path)
            .run(&approved("SELECT id, email FROM customers ORDER BY id", 10))
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "email"]);
        assert_eq!(result.row_count, 3);
        assert!(!result.truncated);
        assert_eq!(result.rows[0]["id"], json!(1));
        assert_eq!(result.rows[2]["email"], Value::Null);
    }

    #[tokio::test]
    async fn caps_rows_and_flags_truncation() {
        let (_dir, path) = fixture_db();
        let result = executor(path)
            .run(&approved("SELECT id FROM customers ORDER BY id", 2))
            .await
            .unwrap();
        assert_eq!(result.row_count, 2);
        assert!(result.truncated);
    }

    #[test]
    fn interrupt_maps_to_timeout_with_configured_seconds() {
        let interrupted = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT),
            None,
        );
        match map_row_error(interrupted, 30) {
            GatewayError::Timeout { seconds } => assert_eq!(seconds, 30),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn engine_rejection_maps_to_execution_error() {
        let (_dir, path) = fixture_db();
        let err = executor(path)
            .run(&approved("SELECT nope FROM customers", 10))
            .await
            .unwrap_err();
        match err {
            GatewayError::Execution(msg) => assert!(msg.contains("nope")),
            other => panic!("expected execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_interrupts_and_releases_connection() {
        let (_dir, path) = fixture_db();
        let pool = ReadPool::open(&PoolConfig {
            path,
            size: 1,
            acquire_timeout: Duration::from_millis(500),
        })
        .unwrap();
        let exec = QueryExecutor::new(pool.clone(), Duration::from_millis(50));

        // Unbounded recursive CTE, only the interrupt stops it.
        let slow = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n) \
                    SELECT COUNT(*) FROM n";
        let err = exec.run(&approved(slow, 10)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));

        // The interrupted statement must give its connection back.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pool.acquire().await.is_ok());
    }
}
