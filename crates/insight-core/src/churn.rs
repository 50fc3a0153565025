//! Churn profile scoring and computation from customer activity facts.
//!
//! Reads the `dim_customers` dimension of the analytical store and
//! derives one [`ChurnProfile`] per customer. Scoring is a pure function
//! of days since last login, so the snapshot is reproducible for a given
//! reference date.

use crate::Result;
use chrono::NaiveDate;
use insight_types::{ChurnProfile, ChurnRiskLevel};
use rusqlite::Connection;

/// Lifetime-value weight for a customer segment.
pub fn segment_weight(segment: &str) -> f64 {
    match segment.to_lowercase().as_str() {
        "premium" => 1000.0,
        "standard" => 500.0,
        _ => 100.0,
    }
}

/// Churn risk score, 0-100. `None` means the customer never logged in.
pub fn risk_score(days_since_login: Option<i64>) -> u8 {
    match days_since_login {
        None => 100,
        Some(d) if d >= 90 => 90,
        Some(d) if d >= 60 => 70,
        Some(d) if d >= 30 => 50,
        Some(d) if d >= 14 => 30,
        Some(_) => 10,
    }
}

/// Churn risk band for a given login recency.
pub fn risk_level(days_since_login: Option<i64>) -> ChurnRiskLevel {
    match days_since_login {
        None => ChurnRiskLevel::Critical,
        Some(d) if d >= 90 => ChurnRiskLevel::Critical,
        Some(d) if d >= 60 => ChurnRiskLevel::High,
        Some(d) if d >= 30 => ChurnRiskLevel::Medium,
        Some(d) if d >= 14 => ChurnRiskLevel::Low,
        Some(_) => ChurnRiskLevel::Active,
    }
}

/// Raw per-customer activity facts as loaded from the store.
#[derive(Debug, Clone)]
pub struct CustomerFacts {
    pub customer_id: String,
    pub segment: String,
    pub registration_date: NaiveDate,
    pub last_login_date: Option<NaiveDate>,
    pub login_count_30d: u64,
    pub login_count_90d: u64,
    pub active_product_count: u64,
    pub open_ticket_count: u64,
    pub total_ticket_count: u64,
}

/// Derive a scored profile from raw facts, relative to `today`.
pub fn build_profile(facts: &CustomerFacts, today: NaiveDate) -> ChurnProfile {
    let login_recency = facts.last_login_date.map(|d| (today - d).num_days());
    let days_since_login = login_recency
        .unwrap_or_else(|| (today - facts.registration_date).num_days());

    ChurnProfile {
        customer_id: facts.customer_id.clone(),
        segment: facts.segment.clone(),
        registration_date: facts.registration_date,
        last_login_date: facts.last_login_date,
        days_since_login,
        login_count_30d: facts.login_count_30d,
        login_count_90d: facts.login_count_90d,
        active_product_count: facts.active_product_count,
        open_ticket_count: facts.open_ticket_count,
        total_ticket_count: facts.total_ticket_count,
        churn_risk_score: risk_score(login_recency),
        churn_risk_level: risk_level(login_recency),
        is_churned_30d: login_recency.map_or(true, |d| d >= 30),
        is_churned_90d: login_recency.map_or(true, |d| d >= 90),
        estimated_lifetime_value: segment_weight(&facts.segment)
            * facts.active_product_count as f64,
    }
}

/// One store row before its dates are parsed.
struct RawCustomerRow {
    customer_id: String,
    segment: String,
    registration_date: String,
    last_login_date: Option<String>,
    login_count_30d: u64,
    login_count_90d: u64,
    active_product_count: u64,
    open_ticket_count: u64,
    total_ticket_count: u64,
}

/// Compute the full churn snapshot, sorted by risk score then estimated
/// value, both descending.
///
/// Rows with unparseable dates are skipped with a warning rather than
/// scored: a defaulted date would read as decades of inactivity and pin
/// the customer at maximum severity.
pub fn compute_profiles(conn: &Connection, today: NaiveDate) -> Result<Vec<ChurnProfile>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            customer_id, customer_segment, registration_date, last_login_date,
            login_count_30d, login_count_90d, active_product_count,
            open_ticket_count, total_ticket_count
        FROM dim_customers
        "#,
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RawCustomerRow {
                customer_id: row.get("customer_id")?,
                segment: row.get("customer_segment")?,
                registration_date: row.get("registration_date")?,
                last_login_date: row.get("last_login_date")?,
                login_count_30d: row.get::<_, i64>("login_count_30d")? as u64,
                login_count_90d: row.get::<_, i64>("login_count_90d")? as u64,
                active_product_count: row.get::<_, i64>("active_product_count")? as u64,
                open_ticket_count: row.get::<_, i64>("open_ticket_count")? as u64,
                total_ticket_count: row.get::<_, i64>("total_ticket_count")? as u64,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut profiles = Vec::with_capacity(rows.len());
    for raw in rows {
        let Some(facts) = to_facts(raw) else {
            continue;
        };
        profiles.push(build_profile(&facts, today));
    }
    profiles.sort_by(|a, b| {
        b.churn_risk_score
            .cmp(&a.churn_risk_score)
            .then(
                b.estimated_lifetime_value
                    .partial_cmp(&a.estimated_lifetime_value)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(a.customer_id.cmp(&b.customer_id))
    });
    Ok(profiles)
}

fn to_facts(raw: RawCustomerRow) -> Option<CustomerFacts> {
    let Some(registration_date) = parse_date(&raw.registration_date) else {
        tracing::warn!(
            target: "gateway::kpi",
            customer = %raw.customer_id,
            "Skipping customer with unparseable registration date: {:?}",
            raw.registration_date
        );
        return None;
    };
    let last_login_date = match raw.last_login_date {
        None => None,
        Some(s) => match parse_date(&s) {
            Some(d) => Some(d),
            None => {
                tracing::warn!(
                    target: "gateway::kpi",
                    customer = %raw.customer_id,
                    "Skipping customer with unparseable last login date: {s:?}"
                );
                return None;
            }
        },
    };
    Some(CustomerFacts {
        customer_id: raw.customer_id,
        segment: raw.segment,
        registration_date,
        last_login_date,
        login_count_30d: raw.login_count_30d,
        login_count_90d: raw.login_count_90d,
        active_product_count: raw.active_product_count,
        open_ticket_count: raw.open_ticket_count,
        total_ticket_count: raw.total_ticket_count,
    })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
