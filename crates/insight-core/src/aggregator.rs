//! KPI aggregator: versioned snapshots with atomic swap on refresh.
//!
//! The root-cause rollup and churn profile snapshots are refreshed
//! independently. Each refresh computes into a staging vector, runs a
//! sanity check against the prior snapshot, and then swaps the
//! queryable pointer atomically. Readers always observe one complete
//! snapshot; the prior version is retained for rollback until the next
//! successful swap. At most one refresh is in flight at a time.

use crate::pool::ReadPool;
use crate::{churn, rollup, GatewayError, Result};
use chrono::{DateTime, Utc};
use insight_types::{
    ChurnProfile, ChurnQuery, ChurnRiskLevel, ChurnSummary, RefreshStatus, RiskBucket,
    RootCauseQuery, RootCauseRollup,
};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Aggregator tuning, fixed at startup.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Background refresh cadence.
    pub refresh_interval: Duration,
    /// A staged snapshot may grow or shrink by at most this factor
    /// relative to the prior one.
    pub bound_factor: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(900),
            bound_factor: 2.0,
        }
    }
}

/// One versioned snapshot slot.
struct Versioned<T> {
    version: u64,
    refreshed_at: Option<DateTime<Utc>>,
    current: Arc<Vec<T>>,
    /// Prior snapshot, kept for rollback until the next swap.
    previous: Option<Arc<Vec<T>>>,
}

impl<T> Versioned<T> {
    fn empty() -> Self {
        Self {
            version: 0,
            refreshed_at: None,
            current: Arc::new(Vec::new()),
            previous: None,
        }
    }

    fn swap(&mut self, staged: Vec<T>) {
        self.previous = Some(Arc::clone(&self.current));
        self.current = Arc::new(staged);
        self.version += 1;
        self.refreshed_at = Some(Utc::now());
    }
}

/// Background-refreshed KPI snapshots with cheap point lookups.
pub struct KpiAggregator {
    pool: ReadPool,
    bound_factor: f64,
    rollups: RwLock<Versioned<RootCauseRollup>>,
    churn: RwLock<Versioned<ChurnProfile>>,
    /// Mutual exclusion for refreshes; overlapping triggers are skipped.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl KpiAggregator {
    pub fn new(pool: ReadPool, config: &AggregatorConfig) -> Self {
        Self {
            pool,
            bound_factor: config.bound_factor,
            rollups: RwLock::new(Versioned::empty()),
            churn: RwLock::new(Versioned::empty()),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Refresh both snapshots. Returns `Ok(false)` without touching
    /// anything when another refresh is already in flight.
    pub async fn refresh(&self) -> Result<bool> {
        let Ok(_gate) = self.refresh_gate.try_lock() else {
            tracing::debug!(target: "gateway::kpi", "Refresh already in flight, skipping");
            return Ok(false);
        };
        self.refresh_rollups().await?;
        self.refresh_churn().await?;
        Ok(true)
    }

    async fn refresh_rollups(&self) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let staged = tokio::task::spawn_blocking(move || rollup::compute_rollups(&conn))
            .await
            .map_err(|e| GatewayError::TaskJoin(e.to_string()))??;

        let mut slot = self.rollups.write().unwrap();
        validate_staging("rollup", staged.len(), slot.current.len(), self.bound_factor)?;
        slot.swap(staged);
        tracing::info!(
            target: "gateway::kpi",
            version = slot.version,
            rows = slot.current.len(),
            "Swapped root-cause rollup snapshot"
        );
        Ok(())
    }

    async fn refresh_churn(&self) -> Result<()> {
        let conn = self.pool.acquire().await?;
        let today = Utc::now().date_naive();
        let staged = tokio::task::spawn_blocking(move || churn::compute_profiles(&conn, today))
            .await
            .map_err(|e| GatewayError::TaskJoin(e.to_string()))??;

        let mut slot = self.churn.write().unwrap();
        validate_staging("churn", staged.len(), slot.current.len(), self.bound_factor)?;
        slot.swap(staged);
        tracing::info!(
            target: "gateway::kpi",
            version = slot.version,
            rows = slot.current.len(),
            "Swapped churn profile snapshot"
        );
        Ok(())
    }

    /// Ranked root-cause lookup on the current snapshot.
    pub fn top_root_causes(&self, query: &RootCauseQuery) -> Vec<RootCauseRollup> {
        let snapshot = Arc::clone(&self.rollups.read().unwrap().current);
        snapshot
            .iter()
            .filter(|r| r.year == query.year)
            .filter(|r| query.month.is_none_or(|m| r.month == m))
            .filter(|r| {
                query
                    .category
                    .as_deref()
                    .is_none_or(|c| r.category.eq_ignore_ascii_case(c))
            })
            .filter(|r| {
                query
                    .product_category
                    .as_deref()
                    .is_none_or(|p| r.product_category.eq_ignore_ascii_case(p))
            })
            .filter(|r| r.total_tickets >= query.min_tickets)
            .take(query.top_n)
            .cloned()
            .collect()
    }

    /// Filtered churn profile lookup on the current snapshot.
    pub fn churn_profiles(&self, query: &ChurnQuery) -> Vec<ChurnProfile> {
        let snapshot = Arc::clone(&self.churn.read().unwrap().current);
        snapshot
            .iter()
            .filter(|p| {
                query
                    .segment
                    .as_deref()
                    .is_none_or(|s| p.segment.eq_ignore_ascii_case(s))
            })
            .filter(|p| query.risk_level.is_none_or(|l| p.churn_risk_level == l))
            .filter(|p| match query.churned_within_days {
                Some(30) => p.is_churned_30d,
                Some(90) => p.is_churned_90d,
                _ => true,
            })
            .take(query.top_n)
            .cloned()
            .collect()
    }

    /// Aggregate churn summary for a 30- or 90-day window.
    pub fn churn_summary(&self, window_days: u32, segment: Option<&str>) -> Result<ChurnSummary> {
        if window_days != 30 && window_days != 90 {
            return Err(GatewayError::InvalidParams(
                "churn window must be 30 or 90 days".to_string(),
            ));
        }
        let snapshot = Arc::clone(&self.churn.read().unwrap().current);
        let churned: Vec<&ChurnProfile> = snapshot
            .iter()
            .filter(|p| {
                if window_days == 30 {
                    p.is_churned_30d
                } else {
                    p.is_churned_90d
                }
            })
            .filter(|p| segment.is_none_or(|s| p.segment.eq_ignore_ascii_case(s)))
            .collect();

        let total = churned.len() as u64;
        let avg_days = if churned.is_empty() {
            0.0
        } else {
            churned.iter().map(|p| p.days_since_login as f64).sum::<f64>() / churned.len() as f64
        };
        let value_at_risk: f64 = churned.iter().map(|p| p.estimated_lifetime_value).sum();

        let mut breakdown = BTreeMap::new();
        for level in [
            ChurnRiskLevel::Critical,
            ChurnRiskLevel::High,
            ChurnRiskLevel::Medium,
            ChurnRiskLevel::Low,
        ] {
            let count = churned.iter().filter(|p| p.churn_risk_level == level).count() as u64;
            let percentage = if total > 0 {
                (count as f64 * 1000.0 / total as f64).round() / 10.0
            } else {
                0.0
            };
            let name = serde_json::to_value(level)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            breakdown.insert(name, RiskBucket { count, percentage });
        }

        Ok(ChurnSummary {
            churn_period_days: window_days,
            segment: segment.unwrap_or("all").to_string(),
            total_churned: total,
            avg_days_inactive: (avg_days * 10.0).round() / 10.0,
            total_value_at_risk: (value_at_risk * 100.0).round() / 100.0,
            risk_breakdown: breakdown,
        })
    }

    /// Versions and refresh times of both snapshots.
    pub fn refresh_status(&self) -> RefreshStatus {
        let rollups = self.rollups.read().unwrap();
        let churn = self.churn.read().unwrap();
        RefreshStatus {
            rollup_version: rollups.version,
            rollup_rows: rollups.current.len(),
            rollup_refreshed_at: rollups.refreshed_at,
            churn_version: churn.version,
            churn_rows: churn.current.len(),
            churn_refreshed_at: churn.refreshed_at,
        }
    }
}

/// Sanity check before a swap: a staged snapshot must be non-empty and
/// within a bounded ratio of the prior one, so a partial upstream load
/// never replaces good data.
fn validate_staging(name: &str, staged: usize, prior: usize, factor: f64) -> Result<()> {
    if staged == 0 {
        return Err(GatewayError::RefreshIntegrity(format!(
            "{name} staging produced zero rows"
        )));
    }
    if prior > 0 {
        let ratio = staged as f64 / prior as f64;
        if ratio > factor || ratio < 1.0 / factor {
            return Err(GatewayError::RefreshIntegrity(format!(
                "{name} staging row count {staged} outside bounds of prior {prior}"
            )));
        }
    }
    Ok(())
}

/// Spawn the background refresh loop. Failed refreshes leave the prior
/// snapshot authoritative and only log.
pub fn spawn_refresh_task(aggregator: Arc<KpiAggregator>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match aggregator.refresh().await {
                Ok(true) => {}
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(target: "gateway::kpi", "Snapshot refresh failed: {}", e);
                }
            }
        }
    });
}
