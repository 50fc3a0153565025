//! Shared application state.

use crate::config::Config;
use insight_core::{
    AggregatorConfig, AuditStore, Dispatcher, DispatcherConfig, GuardConfig, KpiAggregator,
    PoolConfig, QueryExecutor, ReadPool,
};
use insight_types::FieldClassification;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub aggregator: Arc<KpiAggregator>,
    pub audit: Arc<AuditStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> insight_core::Result<Self> {
        let pool = ReadPool::open(&PoolConfig {
            path: config.analytics_db_path.clone(),
            size: config.pool_size,
            acquire_timeout: Duration::from_millis(config.acquire_timeout_ms),
        })?;

        let executor = QueryExecutor::new(
            pool.clone(),
            Duration::from_secs(config.query_timeout_secs),
        );
        let aggregator = Arc::new(KpiAggregator::new(
            pool,
            &AggregatorConfig {
                refresh_interval: Duration::from_secs(config.refresh_interval_secs),
                bound_factor: config.bound_factor,
            },
        ));
        let audit = Arc::new(AuditStore::open(&config.audit_db_path)?);
        let classification = Arc::new(FieldClassification::with_overrides(
            config.column_classifications.clone(),
        ));

        let dispatcher = Dispatcher::new(
            DispatcherConfig {
                guard: GuardConfig {
                    max_query_len: config.max_query_length,
                    default_row_cap: config.default_row_cap,
                },
                max_row_cap: config.max_row_cap,
                unmasked_principals: config.unmasked_principals.clone(),
            },
            executor,
            Arc::clone(&aggregator),
            Arc::clone(&audit),
            classification,
        );

        Ok(Self {
            dispatcher,
            aggregator,
            audit,
            config,
        })
    }

    /// Background refresh cadence for the KPI snapshots.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config.refresh_interval_secs)
    }
}
