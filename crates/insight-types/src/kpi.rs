//! Pre-aggregated KPI snapshot rows and lookup filters.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One pre-aggregated root-cause group for a (year, month) period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseRollup {
    pub year: i32,
    /// Month 1-12.
    pub month: u32,
    /// Quarter 1-4, derived from the month.
    pub quarter: u32,
    pub root_cause: String,
    pub category: String,
    pub product_category: String,
    pub total_tickets: u64,
    pub open_tickets: u64,
    pub resolved_tickets: u64,
    /// Mean resolution time over resolved tickets, hours.
    pub avg_resolution_hours: f64,
    /// Median resolution time over resolved tickets, hours.
    pub median_resolution_hours: f64,
    /// satisfied / (satisfied + unsatisfied), 0 when no scored tickets.
    pub satisfaction_rate: f64,
    /// 100 * group total / period total, partitioned by (year, month).
    pub pct_of_period: f64,
    pub pct_open: f64,
    /// Share of tickets tied to a tracked release.
    pub pct_release_related: f64,
    /// Ticket counts per intake channel.
    pub channel_breakdown: BTreeMap<String, u64>,
}

/// Filters for a root-cause rollup lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct RootCauseQuery {
    pub year: i32,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub product_category: Option<String>,
    /// Minimum ticket count threshold.
    #[serde(default)]
    pub min_tickets: u64,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for RootCauseQuery {
    fn default() -> Self {
        Self {
            year: 0,
            month: None,
            category: None,
            product_category: None,
            min_tickets: 0,
            top_n: default_top_n(),
        }
    }
}

fn default_top_n() -> usize {
    10
}

/// Churn risk bands, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChurnRiskLevel {
    Critical,
    High,
    Medium,
    Low,
    Active,
}

impl ChurnRiskLevel {
    /// Severity rank, higher is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            ChurnRiskLevel::Critical => 4,
            ChurnRiskLevel::High => 3,
            ChurnRiskLevel::Medium => 2,
            ChurnRiskLevel::Low => 1,
            ChurnRiskLevel::Active => 0,
        }
    }
}

/// Per-customer churn scoring row, recomputed each refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnProfile {
    pub customer_id: String,
    pub segment: String,
    pub registration_date: NaiveDate,
    /// None when the customer has never logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_date: Option<NaiveDate>,
    /// Days since the last login, falling back to the registration date
    /// for customers who never logged in.
    pub days_since_login: i64,
    pub login_count_30d: u64,
    pub login_count_90d: u64,
    pub active_product_count: u64,
    pub open_ticket_count: u64,
    pub total_ticket_count: u64,
    /// 0-100, higher is riskier.
    pub churn_risk_score: u8,
    pub churn_risk_level: ChurnRiskLevel,
    pub is_churned_30d: bool,
    pub is_churned_90d: bool,
    pub estimated_lifetime_value: f64,
}

/// Filters for a churn profile lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct ChurnQuery {
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub risk_level: Option<ChurnRiskLevel>,
    /// 30 or 90; restricts to customers churned within that window.
    #[serde(default)]
    pub churned_within_days: Option<u32>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for ChurnQuery {
    fn default() -> Self {
        Self {
            segment: None,
            risk_level: None,
            churned_within_days: None,
            top_n: default_top_n(),
        }
    }
}

/// Aggregate churn numbers for one window, with a per-level breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChurnSummary {
    pub churn_period_days: u32,
    pub segment: String,
    pub total_churned: u64,
    pub avg_days_inactive: f64,
    pub total_value_at_risk: f64,
    pub risk_breakdown: BTreeMap<String, RiskBucket>,
}

/// Count and share of one risk level within a churn summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBucket {
    pub count: u64,
    pub percentage: f64,
}

/// Versions and timestamps of the queryable KPI snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshStatus {
    pub rollup_version: u64,
    pub rollup_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollup_refreshed_at: Option<DateTime<Utc>>,
    pub churn_version: u64,
    pub churn_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub churn_refreshed_at: Option<DateTime<Utc>>,
}
