//! Core engine of the analytics query gateway.
//!
//! Pipeline components: the SQL guard validates incoming query text,
//! the executor runs approved queries against a read-only pool, the
//! mask redacts sensitive columns, and the dispatcher ties them into
//! the uniform tool-call envelope. KPI snapshots are maintained by the
//! aggregator and every invocation lands in the audit trail.

pub mod aggregator;
pub mod audit;
pub mod churn;
pub mod dispatcher;
mod error;
pub mod executor;
pub mod guard;
pub mod mask;
pub mod pool;
pub mod rollup;

pub use aggregator::{spawn_refresh_task, AggregatorConfig, KpiAggregator};
pub use audit::AuditStore;
pub use dispatcher::{tool_registry, Dispatcher, DispatcherConfig};
pub use error::GatewayError;
pub use executor::QueryExecutor;
pub use guard::{ApprovedQuery, GuardConfig, RejectReason};
pub use pool::{PoolConfig, ReadPool};

pub type Result<T> = std::result::Result<T, GatewayError>;
