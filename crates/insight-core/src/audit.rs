//! Append-only audit trail for tool invocations.
//!
//! Records are inserted once and never mutated. A write failure is a
//! degraded mode, not an error: it bumps an internal counter and logs a
//! warning, and must never fail the originating call.

use crate::Result;
use chrono::{DateTime, Utc};
use insight_types::{AuditQuery, InvocationStatus, ToolInvocationRecord, ToolUsageStat};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// SQLite-backed audit store.
pub struct AuditStore {
    conn: Mutex<Connection>,
    dropped_writes: AtomicU64,
}

impl AuditStore {
    /// Open or create the audit database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            dropped_writes: AtomicU64::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            dropped_writes: AtomicU64::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tool_invocations (
                id TEXT PRIMARY KEY,
                tool_name TEXT NOT NULL,
                parameters_json TEXT NOT NULL,
                principal_id TEXT NOT NULL,
                execution_time_ms INTEGER NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_invocations_created ON tool_invocations(created_at);
            CREATE INDEX IF NOT EXISTS idx_invocations_tool ON tool_invocations(tool_name);
            CREATE INDEX IF NOT EXISTS idx_invocations_principal ON tool_invocations(principal_id);
            "#,
        )?;
        Ok(())
    }

    /// Append one immutable record.
    pub fn append(&self, record: &ToolInvocationRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tool_invocations (
                id, tool_name, parameters_json, principal_id,
                execution_time_ms, status, error_message, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.id.to_string(),
                record.tool_name,
                record.parameters.to_string(),
                record.principal_id,
                record.execution_time_ms as i64,
                record.status.as_str(),
                record.error_message,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Append, swallowing failure. Observability is best-effort, not a
    /// correctness gate.
    pub fn append_best_effort(&self, record: &ToolInvocationRecord) {
        if let Err(e) = self.append(record) {
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                target: "gateway::audit",
                tool = %record.tool_name,
                "Dropped audit record: {}",
                e
            );
        }
    }

    /// Number of audit writes dropped since startup.
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    /// Read the trail most recent first, with optional filters.
    pub fn recent(&self, query: &AuditQuery) -> Result<Vec<ToolInvocationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT id, tool_name, parameters_json, principal_id, execution_time_ms, \
             status, error_message, created_at FROM tool_invocations WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(tool) = &query.tool {
            sql.push_str(" AND tool_name = ?");
            args.push(Box::new(tool.clone()));
        }
        if let Some(principal) = &query.principal {
            sql.push_str(" AND principal_id = ?");
            args.push(Box::new(principal.clone()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        args.push(Box::new(query.limit.unwrap_or(50) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(rusqlite::params_from_iter(args.iter()), row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Per-tool usage statistics over the trailing window.
    pub fn statistics(&self, days: u32) -> Result<Vec<ToolUsageStat>> {
        let cutoff = (Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                tool_name,
                COUNT(*) AS total_calls,
                SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END) AS error_count,
                AVG(execution_time_ms) AS avg_ms
            FROM tool_invocations
            WHERE created_at >= ?1
            GROUP BY tool_name
            ORDER BY total_calls DESC
            "#,
        )?;
        let stats = stmt
            .query_map(params![cutoff], |row| {
                let total: i64 = row.get("total_calls")?;
                let errors: i64 = row.get("error_count")?;
                let avg_ms: f64 = row.get::<_, Option<f64>>("avg_ms")?.unwrap_or(0.0);
                let success_rate = if total > 0 {
                    ((total - errors) as f64 * 100.0 / total as f64 * 100.0).round() / 100.0
                } else {
                    0.0
                };
                Ok(ToolUsageStat {
                    tool_name: row.get("tool_name")?,
                    total_calls: total as u64,
                    error_count: errors as u64,
                    success_rate,
                    avg_execution_ms: (avg_ms * 100.0).round() / 100.0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(stats)
    }
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ToolInvocationRecord> {
    let id: String = row.get("id")?;
    let parameters_json: String = row.get("parameters_json")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;

    Ok(ToolInvocationRecord {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        tool_name: row.get("tool_name")?,
        parameters: serde_json::from_str(&parameters_json).unwrap_or(serde_json::Value::Null),
        principal_id: row.get("principal_id")?,
        execution_time_ms: row.get::<_, i64>("execution_time_ms")? as u64,
        status: if status == "success" {
            InvocationStatus::Success
        } else {
            InvocationStatus::Error
        },
        error_message: row.get("error_message")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_types::ToolCallResponse;
    use serde_json::json;

    fn record(tool: &str, principal: &str, ok: bool) -> ToolInvocationRecord {
        let response = if ok {
            ToolCallResponse::ok(json!({"rows": 1}), 12)
        } else {
            ToolCallResponse::err("ONLY_SELECT_ALLOWED".into(), 3)
        };
        ToolInvocationRecord::from_envelope(tool, json!({"query": "SELECT 1"}), principal, &response)
    }

    #[test]
    fn appends_and_reads_recent_first() {
        let store = AuditStore::open_in_memory().unwrap();
        store.append(&record("sql.query", "alice", true)).unwrap();
        store.append(&record("kpi.top_root_causes", "bob", false)).unwrap();

        let all = store.recent(&AuditQuery::default()).unwrap();
        assert_eq!(all.len(), 2);

        let errors = store
            .recent(&AuditQuery {
                status: Some(InvocationStatus::Error),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tool_name, "kpi.top_root_causes");
        assert_eq!(errors[0].error_message.as_deref(), Some("ONLY_SELECT_ALLOWED"));
    }

    #[test]
    fn filters_by_tool_and_principal() {
        let store = AuditStore::open_in_memory().unwrap();
        for _ in 0..3 {
            store.append(&record("sql.query", "alice", true)).unwrap();
        }
        store.append(&record("sql.query", "bob", true)).unwrap();

        let alice = store
            .recent(&AuditQuery {
                tool: Some("sql.query".into()),
                principal: Some("alice".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(alice.len(), 3);
    }

    #[test]
    fn statistics_aggregate_per_tool() {
        let store = AuditStore::open_in_memory().unwrap();
        store.append(&record("sql.query", "alice", true)).unwrap();
        store.append(&record("sql.query", "alice", false)).unwrap();

        let stats = store.statistics(7).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total_calls, 2);
        assert_eq!(stats[0].error_count, 1);
        assert_eq!(stats[0].success_rate, 50.0);
    }

    #[test]
    fn dropped_writes_counter_starts_at_zero() {
        let store = AuditStore::open_in_memory().unwrap();
        assert_eq!(store.dropped_writes(), 0);
        store.append_best_effort(&record("sql.query", "alice", true));
        assert_eq!(store.dropped_writes(), 0);
    }

    #[test]
    fn failed_write_bumps_counter_instead_of_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let store = AuditStore::open(&path).unwrap();

        // Pull the table out from under the store through a second handle.
        Connection::open(&path)
            .unwrap()
            .execute_batch("DROP TABLE tool_invocations")
            .unwrap();

        store.append_best_effort(&record("sql.query", "alice", true));
        assert_eq!(store.dropped_writes(), 1);
        store.append_best_effort(&record("sql.query", "alice", false));
        assert_eq!(store.dropped_writes(), 2);
    }
}
