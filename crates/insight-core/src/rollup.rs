//! Root-cause rollup computation from ticket facts.
//!
//! Groups the `fact_tickets` table by (year, month, quarter, root cause,
//! category, product category) and derives the ranked metrics served by
//! the KPI lookup path. Rebuilt wholesale each refresh.

use crate::Result;
use insight_types::RootCauseRollup;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};

/// One ticket fact row as loaded from the store.
#[derive(Debug, Clone)]
pub struct TicketFact {
    pub year: i32,
    pub month: u32,
    pub root_cause: String,
    pub category: String,
    pub product_category: String,
    /// `open`, `resolved`, or an intermediate state.
    pub status: String,
    /// Hours to resolution, present on resolved tickets.
    pub resolution_hours: Option<f64>,
    /// 1-5 satisfaction survey score, when the survey was answered.
    pub satisfaction_score: Option<i64>,
    /// Ticket tied to a tracked release.
    pub release_related: bool,
    pub channel: String,
}

#[derive(Debug, Default)]
struct GroupAccumulator {
    total: u64,
    open: u64,
    resolved: u64,
    resolution_hours: Vec<f64>,
    satisfied: u64,
    unsatisfied: u64,
    release_related: u64,
    channels: BTreeMap<String, u64>,
}

impl GroupAccumulator {
    fn add(&mut self, fact: &TicketFact) {
        self.total += 1;
        match fact.status.as_str() {
            "open" => self.open += 1,
            "resolved" => self.resolved += 1,
            _ => {}
        }
        if let Some(hours) = fact.resolution_hours {
            self.resolution_hours.push(hours);
        }
        // Score >= 4 counts satisfied, <= 3 unsatisfied; unanswered
        // surveys are excluded from the rate.
        match fact.satisfaction_score {
            Some(score) if score >= 4 => self.satisfied += 1,
            Some(_) => self.unsatisfied += 1,
            None => {}
        }
        if fact.release_related {
            self.release_related += 1;
        }
        *self.channels.entry(fact.channel.clone()).or_default() += 1;
    }
}

fn quarter_of(month: u32) -> u32 {
    (month - 1) / 3 + 1
}

fn median(sorted: &mut [f64]) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Group ticket facts into ranked rollup rows.
///
/// `pct_of_period` is partitioned by (year, month): within one period
/// the values across rollup rows sum to 100 up to rounding. Rows are
/// pre-sorted by total tickets desc, then year desc, then month desc.
pub fn build_rollups(facts: &[TicketFact]) -> Vec<RootCauseRollup> {
    type GroupKey = (i32, u32, String, String, String);
    let mut groups: HashMap<GroupKey, GroupAccumulator> = HashMap::new();
    let mut period_totals: HashMap<(i32, u32), u64> = HashMap::new();

    for fact in facts {
        let key = (
            fact.year,
            fact.month,
            fact.root_cause.clone(),
            fact.category.clone(),
            fact.product_category.clone(),
        );
        groups.entry(key).or_default().add(fact);
        *period_totals.entry((fact.year, fact.month)).or_default() += 1;
    }

    let mut rollups: Vec<RootCauseRollup> = groups
        .into_iter()
        .map(|((year, month, root_cause, category, product_category), mut acc)| {
            let period_total = period_totals[&(year, month)];
            let avg = if acc.resolution_hours.is_empty() {
                0.0
            } else {
                acc.resolution_hours.iter().sum::<f64>() / acc.resolution_hours.len() as f64
            };
            let scored = acc.satisfied + acc.unsatisfied;
            RootCauseRollup {
                year,
                month,
                quarter: quarter_of(month),
                root_cause,
                category,
                product_category,
                total_tickets: acc.total,
                open_tickets: acc.open,
                resolved_tickets: acc.resolved,
                avg_resolution_hours: round2(avg),
                median_resolution_hours: round2(median(&mut acc.resolution_hours)),
                satisfaction_rate: if scored == 0 {
                    0.0
                } else {
                    round2(acc.satisfied as f64 / scored as f64)
                },
                // Stored unrounded: per-row rounding error would break the
                // sum-to-100 property on partitions with many small groups.
                pct_of_period: acc.total as f64 * 100.0 / period_total as f64,
                pct_open: round2(acc.open as f64 * 100.0 / acc.total as f64),
                pct_release_related: round2(
                    acc.release_related as f64 * 100.0 / acc.total as f64,
                ),
                channel_breakdown: acc.channels,
            }
        })
        .collect();

    rollups.sort_by(|a, b| {
        b.total_tickets
            .cmp(&a.total_tickets)
            .then(b.year.cmp(&a.year))
            .then(b.month.cmp(&a.month))
            .then(a.root_cause.cmp(&b.root_cause))
    });
    rollups
}

/// Load ticket facts and compute the full rollup snapshot.
pub fn compute_rollups(conn: &Connection) -> Result<Vec<RootCauseRollup>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT
            created_year, created_month, root_cause, category, product_category,
            status, resolution_hours, satisfaction_score, is_release_related, channel
        FROM fact_tickets
        "#,
    )?;
    let facts = stmt
        .query_map([], |row| {
            Ok(TicketFact {
                year: row.get("created_year")?,
                month: row.get::<_, i64>("created_month")? as u32,
                root_cause: row.get("root_cause")?,
                category: row.get("category")?,
                product_category: row.get("product_category")?,
                status: row.get("status")?,
                resolution_hours: row.get("resolution_hours")?,
                satisfaction_score: row.get("satisfaction_score")?,
                release_related: row.get::<_, i64>("is_release_related")? != 0,
                channel: row.get("channel")?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(build_rollups(&facts))
}
