//! Dispatcher: routes named invocations, normalizes errors into the
//! uniform response envelope, and forwards every outcome to the audit
//! trail.
//!
//! Request lifecycle: Received -> Validating -> Executing -> Masking
//! (optional) -> Completed | Failed. The dispatcher itself is stateless
//! across requests.

use crate::aggregator::KpiAggregator;
use crate::audit::AuditStore;
use crate::executor::QueryExecutor;
use crate::guard::{self, GuardConfig};
use crate::mask;
use crate::{GatewayError, Result};
use insight_types::{
    ChurnQuery, FieldClassification, QueryRequest, RootCauseQuery, ToolCallRequest,
    ToolCallResponse, ToolInvocationRecord,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// Dispatcher limits and capability grants, fixed at startup.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub guard: GuardConfig,
    /// Upper bound any per-request row cap is clamped to.
    pub max_row_cap: usize,
    /// Principals holding the elevated capability to receive unmasked
    /// results.
    pub unmasked_principals: Vec<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            guard: GuardConfig::default(),
            max_row_cap: 1_000,
            unmasked_principals: Vec::new(),
        }
    }
}

/// Routes invocations to the guard/executor/mask pipeline or to the
/// KPI aggregator. Cheap to clone; all heavy state is shared.
#[derive(Clone)]
pub struct Dispatcher {
    config: DispatcherConfig,
    executor: QueryExecutor,
    aggregator: Arc<KpiAggregator>,
    audit: Arc<AuditStore>,
    classification: Arc<FieldClassification>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        executor: QueryExecutor,
        aggregator: Arc<KpiAggregator>,
        audit: Arc<AuditStore>,
        classification: Arc<FieldClassification>,
    ) -> Self {
        Self {
            config,
            executor,
            aggregator,
            audit,
            classification,
        }
    }

    pub fn aggregator(&self) -> &Arc<KpiAggregator> {
        &self.aggregator
    }

    pub fn audit(&self) -> &Arc<AuditStore> {
        &self.audit
    }

    /// Dispatch one invocation and return the uniform envelope.
    ///
    /// The work runs on a detached task: if the caller abandons the
    /// request, execution still completes and the audit record is still
    /// written, marked failed or successful as the outcome dictates.
    pub async fn dispatch(&self, request: ToolCallRequest) -> ToolCallResponse {
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_audited(request).await });
        match handle.await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(target: "gateway::dispatch", "Dispatch task failed: {}", e);
                ToolCallResponse::err("Internal gateway error".to_string(), 0)
            }
        }
    }

    async fn run_audited(&self, request: ToolCallRequest) -> ToolCallResponse {
        let start = Instant::now();
        let outcome = self.execute(&request).await;
        let elapsed = start.elapsed().as_millis() as u64;

        let response = match outcome {
            Ok(result) => ToolCallResponse::ok(result, elapsed),
            Err(e) => {
                tracing::info!(
                    target: "gateway::dispatch",
                    tool = %request.tool_name,
                    principal = %request.principal_id,
                    "Invocation failed: {}",
                    e
                );
                ToolCallResponse::err(e.caller_message(), elapsed)
            }
        };

        // The trail cannot leak what the mask already redacted.
        let sanitized = mask::sanitize_parameters(&request.parameters, &self.classification);
        let record = ToolInvocationRecord::from_envelope(
            &request.tool_name,
            sanitized,
            &request.principal_id,
            &response,
        );
        self.audit.append_best_effort(&record);
        response
    }

    async fn execute(&self, request: &ToolCallRequest) -> Result<Value> {
        match request.tool_name.as_str() {
            "sql.query" => self.run_sql_query(request).await,
            "kpi.top_root_causes" => {
                let query: RootCauseQuery = parse_params(&request.parameters)?;
                let rows = self.aggregator.top_root_causes(&clamp_rollup(query));
                Ok(json!({ "count": rows.len(), "root_causes": rows }))
            }
            "kpi.churn_profiles" => {
                let query: ChurnQuery = parse_params(&request.parameters)?;
                let rows = self.aggregator.churn_profiles(&clamp_churn(query));
                Ok(json!({ "count": rows.len(), "profiles": rows }))
            }
            "kpi.churn_summary" => {
                let days = match request.parameters.get("days") {
                    None => 30,
                    Some(v) => v.as_u64().ok_or_else(|| {
                        GatewayError::InvalidParams("days must be an integer".to_string())
                    })? as u32,
                };
                let segment = request
                    .parameters
                    .get("segment")
                    .and_then(Value::as_str);
                let summary = self.aggregator.churn_summary(days, segment)?;
                Ok(serde_json::to_value(summary)?)
            }
            other => Err(GatewayError::UnknownTool(format!(
                "'{other}'. Available tools: {}",
                TOOL_NAMES.join(", ")
            ))),
        }
    }

    async fn run_sql_query(&self, request: &ToolCallRequest) -> Result<Value> {
        let params: QueryRequest = parse_params(&request.parameters)?;
        let row_cap = params
            .row_cap
            .unwrap_or(self.config.guard.default_row_cap)
            .min(self.config.max_row_cap)
            .max(1);

        let guard_config = GuardConfig {
            max_query_len: self.config.guard.max_query_len,
            default_row_cap: row_cap,
        };
        let approved =
            guard::validate(&params.query, &guard_config).map_err(GatewayError::Validation)?;

        let mut result = self.executor.run(&approved).await?;

        // Unmasked output needs both the request flag and the elevated
        // capability; the default is always masked.
        let unmasked_allowed = !request.mask
            && self
                .config
                .unmasked_principals
                .iter()
                .any(|p| p == &request.principal_id);
        if !unmasked_allowed {
            mask::apply(&mut result, &self.classification);
        }

        Ok(serde_json::to_value(result)?)
    }
}

const TOOL_NAMES: &[&str] = &[
    "sql.query",
    "kpi.top_root_causes",
    "kpi.churn_profiles",
    "kpi.churn_summary",
];

/// Registry of dispatchable tools with their parameter descriptions.
pub fn tool_registry() -> Value {
    json!({
        "tools": [
            {
                "name": "sql.query",
                "description": "Execute a read-only SQL query against the analytical store. \
                                Results are PII-masked by default; only single SELECT \
                                statements are accepted.",
                "parameters": {
                    "query": { "type": "string", "required": true },
                    "row_cap": { "type": "integer", "required": false }
                }
            },
            {
                "name": "kpi.top_root_causes",
                "description": "Ranked root causes of tickets for a time period, from the \
                                pre-aggregated rollup snapshot.",
                "parameters": {
                    "year": { "type": "integer", "required": true },
                    "month": { "type": "integer", "required": false },
                    "category": { "type": "string", "required": false },
                    "product_category": { "type": "string", "required": false },
                    "min_tickets": { "type": "integer", "required": false },
                    "top_n": { "type": "integer", "required": false }
                }
            },
            {
                "name": "kpi.churn_profiles",
                "description": "Scored churn profiles from the churn snapshot, riskiest first.",
                "parameters": {
                    "segment": { "type": "string", "required": false },
                    "risk_level": { "type": "string", "required": false },
                    "churned_within_days": { "type": "integer", "required": false },
                    "top_n": { "type": "integer", "required": false }
                }
            },
            {
                "name": "kpi.churn_summary",
                "description": "Aggregate churn numbers for a 30- or 90-day window with a \
                                per-risk-level breakdown.",
                "parameters": {
                    "days": { "type": "integer", "required": false },
                    "segment": { "type": "string", "required": false }
                }
            }
        ]
    })
}

fn parse_params<T: serde::de::DeserializeOwned>(params: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| GatewayError::InvalidParams(e.to_string()))
}

fn clamp_rollup(mut query: RootCauseQuery) -> RootCauseQuery {
    query.top_n = query.top_n.clamp(1, 100);
    query
}

fn clamp_churn(mut query: ChurnQuery) -> ChurnQuery {
    query.top_n = query.top_n.clamp(1, 100);
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::pool::{PoolConfig, ReadPool};
    use insight_types::{AuditQuery, InvocationStatus};
    use rusqlite::Connection;
    use std::time::Duration;

    fn seed_analytics(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE customers (
                customer_id INTEGER, email TEXT, phone TEXT, full_name TEXT, balance REAL
            );
            INSERT INTO customers VALUES
                (1, 'john.doe@example.com', '+66-81-234-5678', 'John Doe Smith', 100.0),
                (2, 'jane@test.com', '0812345678', 'Jane Smith', 250.0);

            CREATE TABLE fact_tickets (
                created_year INTEGER, created_month INTEGER,
                root_cause TEXT, category TEXT, product_category TEXT,
                status TEXT, resolution_hours REAL, satisfaction_score INTEGER,
                is_release_related INTEGER, channel TEXT
            );
            INSERT INTO fact_tickets VALUES
                (2025, 10, 'app crash', 'stability', 'mobile', 'open', NULL, NULL, 1, 'app'),
                (2025, 10, 'app crash', 'stability', 'mobile', 'resolved', 6.0, 5, 1, 'app'),
                (2025, 10, 'slow sync', 'performance', 'mobile', 'open', NULL, NULL, 0, 'web');

            CREATE TABLE dim_customers (
                customer_id TEXT, customer_segment TEXT,
                registration_date TEXT, last_login_date TEXT,
                login_count_30d INTEGER, login_count_90d INTEGER,
                active_product_count INTEGER, open_ticket_count INTEGER,
                total_ticket_count INTEGER
            );
            INSERT INTO dim_customers VALUES
                ('c-1', 'premium', '2024-01-01', NULL, 0, 0, 2, 1, 3),
                ('c-2', 'standard', '2024-06-01', date('now', '-5 days'), 4, 12, 1, 0, 0);
            "#,
        )
        .unwrap();
    }

    fn dispatcher(unmasked: Vec<String>) -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.db");
        seed_analytics(&path);

        let pool = ReadPool::open(&PoolConfig {
            path,
            size: 2,
            acquire_timeout: Duration::from_millis(500),
        })
        .unwrap();
        let executor = QueryExecutor::new(pool.clone(), Duration::from_secs(5));
        let aggregator = Arc::new(KpiAggregator::new(pool, &AggregatorConfig::default()));
        let audit = Arc::new(AuditStore::open_in_memory().unwrap());
        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                unmasked_principals: unmasked,
                ..Default::default()
            },
            executor,
            aggregator,
            audit,
            Arc::new(FieldClassification::builtin()),
        );
        (dir, dispatcher)
    }

    fn call(tool: &str, params: Value, principal: &str, mask: bool) -> ToolCallRequest {
        ToolCallRequest {
            tool_name: tool.to_string(),
            parameters: params.as_object().cloned().unwrap_or_default(),
            principal_id: principal.to_string(),
            mask,
        }
    }

    #[tokio::test]
    async fn sql_query_masks_by_default() {
        let (_dir, d) = dispatcher(vec![]);
        let response = d
            .dispatch(call(
                "sql.query",
                json!({"query": "SELECT email, phone, full_name, balance FROM customers ORDER BY customer_id"}),
                "analyst",
                true,
            ))
            .await;
        assert!(response.success, "{:?}", response.error);
        let rows = &response.result.unwrap()["rows"];
        assert_eq!(rows[0]["email"], "jo***@example.com");
        assert_eq!(rows[0]["phone"], "+66****78");
        assert_eq!(rows[0]["full_name"], "John ***");
        assert_eq!(rows[0]["balance"], 100.0);
    }

    #[tokio::test]
    async fn unmasked_needs_flag_and_capability() {
        let (_dir, d) = dispatcher(vec!["auditor".to_string()]);

        // flag without capability: still masked
        let response = d
            .dispatch(call(
                "sql.query",
                json!({"query": "SELECT email FROM customers ORDER BY customer_id"}),
                "analyst",
                false,
            ))
            .await;
        assert_eq!(response.result.unwrap()["rows"][0]["email"], "jo***@example.com");

        // flag plus capability: raw values
        let response = d
            .dispatch(call(
                "sql.query",
                json!({"query": "SELECT email FROM customers ORDER BY customer_id"}),
                "auditor",
                false,
            ))
            .await;
        assert_eq!(response.result.unwrap()["rows"][0]["email"], "john.doe@example.com");

        // capability without flag: masked
        let response = d
            .dispatch(call(
                "sql.query",
                json!({"query": "SELECT email FROM customers ORDER BY customer_id"}),
                "auditor",
                true,
            ))
            .await;
        assert_eq!(response.result.unwrap()["rows"][0]["email"], "jo***@example.com");
    }

    #[tokio::test]
    async fn guard_rejection_surfaces_stable_error_and_is_audited() {
        let (_dir, d) = dispatcher(vec![]);
        let response = d
            .dispatch(call(
                "sql.query",
                json!({"query": "SELECT 1; DROP TABLE x;"}),
                "analyst",
                true,
            ))
            .await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("MULTIPLE_STATEMENTS"));

        let response = d
            .dispatch(call(
                "sql.query",
                json!({"query": "DELETE FROM customers"}),
                "analyst",
                true,
            ))
            .await;
        assert_eq!(response.error.as_deref(), Some("ONLY_SELECT_ALLOWED"));

        let records = d.audit().recent(&AuditQuery::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.status == InvocationStatus::Error));
    }

    #[tokio::test]
    async fn kpi_lookup_round_trip() {
        let (_dir, d) = dispatcher(vec![]);
        d.aggregator().refresh().await.unwrap();

        let response = d
            .dispatch(call(
                "kpi.top_root_causes",
                json!({"year": 2025, "month": 10}),
                "analyst",
                true,
            ))
            .await;
        assert!(response.success);
        let result = response.result.unwrap();
        assert_eq!(result["count"], 2);
        assert_eq!(result["root_causes"][0]["root_cause"], "app crash");
        assert_eq!(result["root_causes"][0]["pct_release_related"], 100.0);

        let response = d
            .dispatch(call("kpi.churn_summary", json!({"days": 30}), "analyst", true))
            .await;
        assert!(response.success);
        assert_eq!(response.result.unwrap()["total_churned"], 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_typed_and_audited() {
        let (_dir, d) = dispatcher(vec![]);
        let response = d
            .dispatch(call("kb.search", json!({"query": "hi"}), "analyst", true))
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("Unknown tool"));

        let records = d
            .audit()
            .recent(&AuditQuery {
                tool: Some("kb.search".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn audit_write_failure_never_fails_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let analytics_path = dir.path().join("analytics.db");
        seed_analytics(&analytics_path);
        let audit_path = dir.path().join("audit.db");

        let pool = ReadPool::open(&PoolConfig {
            path: analytics_path,
            size: 2,
            acquire_timeout: Duration::from_millis(500),
        })
        .unwrap();
        let executor = QueryExecutor::new(pool.clone(), Duration::from_secs(5));
        let aggregator = Arc::new(KpiAggregator::new(pool, &AggregatorConfig::default()));
        let audit = Arc::new(AuditStore::open(&audit_path).unwrap());
        let d = Dispatcher::new(
            DispatcherConfig::default(),
            executor,
            aggregator,
            Arc::clone(&audit),
            Arc::new(FieldClassification::builtin()),
        );

        // Break the trail out from under the dispatcher.
        Connection::open(&audit_path)
            .unwrap()
            .execute_batch("DROP TABLE tool_invocations")
            .unwrap();

        let response = d
            .dispatch(call("sql.query", json!({"query": "SELECT 1 AS one"}), "analyst", true))
            .await;
        assert!(response.success, "{:?}", response.error);
        assert_eq!(audit.dropped_writes(), 1);
    }

    #[tokio::test]
    async fn audit_parameters_are_sanitized() {
        let (_dir, d) = dispatcher(vec![]);
        d.dispatch(call(
            "sql.query",
            json!({"query": "SELECT 1", "email": "john.doe@example.com"}),
            "analyst",
            true,
        ))
        .await;

        let records = d.audit().recent(&AuditQuery::default()).unwrap();
        assert_eq!(records[0].parameters["email"], "jo***@example.com");
        assert_eq!(records[0].parameters["query"], "SELECT 1");
    }
}
