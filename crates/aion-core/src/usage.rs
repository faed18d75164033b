//! Token usage and budget values, plus the cost aggregates the usage panel
//! derives from them.

use chrono::{DateTime, Datelike, Local, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One captured agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: i64,
    pub session_id: String,
    pub agent: String,
    pub cost_usd: f64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub tokens_total: i64,
    #[serde(default)]
    pub duration_s: Option<i64>,
    /// RFC 3339 capture time
    pub captured_at: String,
    #[serde(default)]
    pub raw_output: String,
}

/// Spend against the limit of one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    /// `YYYY-MM`
    pub month: String,
    pub limit_usd: f64,
    pub spent_usd: f64,
    pub remaining_usd: f64,
    pub pct_used: f64,
}

/// Filter for `query_usage`. Unset fields do not constrain.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub agent: Option<String>,
    pub session_id: Option<String>,
}

impl UsageQuery {
    /// Everything captured since the start of the month containing `now`.
    pub fn since_month_start<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        Self {
            from: month_start(now),
            ..Self::default()
        }
    }
}

/// `YYYY-MM` key of the month containing `now`.
pub fn month_key<Tz: TimeZone>(now: &DateTime<Tz>) -> String {
    format!("{:04}-{:02}", now.year(), now.month())
}

/// Midnight on the first of `now`'s month, in `now`'s zone, as UTC RFC 3339.
///
/// `None` if that midnight does not exist locally (DST gap).
pub fn month_start<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<String> {
    let first = now.date_naive().with_day(1)?.and_hms_opt(0, 0, 0)?;
    let local = now.timezone().from_local_datetime(&first).earliest()?;
    Some(
        local
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

/// Month key for the local clock.
pub fn current_month() -> String {
    month_key(&Local::now())
}

/// Cost of one calendar day, split by agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCost {
    /// `YYYY-MM-DD`
    pub date: String,
    pub total: f64,
    pub agents: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentCost {
    pub agent: String,
    pub cost: f64,
}

/// Totals derived from a set of usage records.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UsageAggregates {
    /// Oldest day first
    pub timeline: Vec<DayCost>,
    /// Most expensive agent first
    pub breakdown: Vec<AgentCost>,
    pub total_cost: f64,
    pub total_tokens: i64,
}

impl UsageAggregates {
    pub fn from_records(records: &[UsageRecord]) -> Self {
        let mut by_day: BTreeMap<String, DayCost> = BTreeMap::new();
        let mut by_agent: HashMap<&str, f64> = HashMap::new();
        let mut total_cost = 0.0;
        let mut total_tokens = 0;

        for record in records {
            let date = record
                .captured_at
                .get(..10)
                .unwrap_or(&record.captured_at)
                .to_string();
            let day = by_day.entry(date.clone()).or_insert_with(|| DayCost {
                date,
                total: 0.0,
                agents: BTreeMap::new(),
            });
            day.total += record.cost_usd;
            *day.agents.entry(record.agent.clone()).or_insert(0.0) += record.cost_usd;

            *by_agent.entry(record.agent.as_str()).or_insert(0.0) += record.cost_usd;
            total_cost += record.cost_usd;
            total_tokens += record.tokens_total;
        }

        let mut breakdown: Vec<AgentCost> = by_agent
            .into_iter()
            .map(|(agent, cost)| AgentCost {
                agent: agent.to_string(),
                cost,
            })
            .collect();
        // Ties broken by name so the order is stable.
        breakdown.sort_by(|a, b| b.cost.total_cmp(&a.cost).then_with(|| a.agent.cmp(&b.agent)));

        Self {
            timeline: by_day.into_values().collect(),
            breakdown,
            total_cost,
            total_tokens,
        }
    }
}

/// Everything the usage panel shows.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct UsageSnapshot {
    /// Records of the current month, most recent first
    pub records: Vec<UsageRecord>,
    pub budget: Option<BudgetSummary>,
    pub loading: bool,
    /// Last caught failure, human readable
    pub error: Option<String>,
}

impl UsageSnapshot {
    pub fn aggregates(&self) -> UsageAggregates {
        UsageAggregates::from_records(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn record(agent: &str, captured_at: &str, cost_usd: f64, tokens_total: i64) -> UsageRecord {
        UsageRecord {
            id: 0,
            session_id: "s1".into(),
            agent: agent.into(),
            cost_usd,
            tokens_in: tokens_total / 2,
            tokens_out: tokens_total - tokens_total / 2,
            tokens_total,
            duration_s: None,
            captured_at: captured_at.into(),
            raw_output: String::new(),
        }
    }

    #[test]
    fn test_aggregates_group_by_day_and_agent() {
        let records = vec![
            record("claude", "2026-03-02T10:00:00Z", 1.5, 1000),
            record("codex", "2026-03-01T09:00:00Z", 0.5, 400),
            record("claude", "2026-03-01T08:00:00Z", 2.0, 1600),
        ];

        let aggregates = UsageAggregates::from_records(&records);

        let dates: Vec<&str> = aggregates.timeline.iter().map(|d| d.date.as_str()).collect();
        assert_eq!(dates, vec!["2026-03-01", "2026-03-02"]);
        assert_eq!(aggregates.timeline[0].total, 2.5);
        assert_eq!(aggregates.timeline[0].agents["claude"], 2.0);
        assert_eq!(aggregates.timeline[0].agents["codex"], 0.5);

        assert_eq!(aggregates.breakdown[0].agent, "claude");
        assert_eq!(aggregates.breakdown[0].cost, 3.5);
        assert_eq!(aggregates.breakdown[1].agent, "codex");
        assert_eq!(aggregates.total_cost, 4.0);
        assert_eq!(aggregates.total_tokens, 3000);
    }

    #[test]
    fn test_empty_records_aggregate_to_zero() {
        assert_eq!(UsageAggregates::from_records(&[]), UsageAggregates::default());
    }

    #[test]
    fn test_month_boundaries_follow_the_clock_zone() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let now = tokyo.with_ymd_and_hms(2026, 4, 1, 3, 0, 0).unwrap();

        assert_eq!(month_key(&now), "2026-04");
        // Local midnight on April 1st is still March in UTC.
        assert_eq!(
            month_start(&now).as_deref(),
            Some("2026-03-31T15:00:00.000Z")
        );
        assert_eq!(
            UsageQuery::since_month_start(&now).from,
            month_start(&now)
        );
    }
}
