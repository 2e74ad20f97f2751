//! Metric taxonomy and dual raw/normalized storage.
//!
//! Every target metric has a kind that decides how its raw string is
//! normalized: currency to whole dollars, percentages to signed floats,
//! runway to months, headcounts to plain numbers. The raw string is
//! always kept alongside the parsed value — "24+ months" and "~$8.000M"
//! carry nuance a float cannot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::normalize::{
    self, format_count, format_currency, format_duration, format_percentage, NOT_AVAILABLE,
};
use crate::oracle::RawMetrics;

/// How a metric's raw string is parsed and redisplayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Currency,
    Percentage,
    /// Stored in months; displayed as months or years.
    Duration,
    Count,
}

/// The target metrics, with the kind governing normalization.
pub const TARGET_METRICS: &[(&str, MetricKind)] = &[
    ("mrr", MetricKind::Currency),
    ("arr", MetricKind::Currency),
    ("qrr", MetricKind::Currency),
    ("total_revenue", MetricKind::Currency),
    ("gross_revenue", MetricKind::Currency),
    ("net_revenue", MetricKind::Currency),
    ("mrr_growth", MetricKind::Percentage),
    ("arr_growth", MetricKind::Percentage),
    ("revenue_growth_yoy", MetricKind::Percentage),
    ("revenue_growth_mom", MetricKind::Percentage),
    ("cash_balance", MetricKind::Currency),
    ("net_burn", MetricKind::Currency),
    ("gross_burn", MetricKind::Currency),
    ("runway_months", MetricKind::Duration),
    ("gross_margin", MetricKind::Percentage),
    ("ebitda", MetricKind::Currency),
    ("ebitda_margin", MetricKind::Percentage),
    ("net_income", MetricKind::Currency),
    ("customer_count", MetricKind::Count),
    ("new_customers", MetricKind::Count),
    ("churn_rate", MetricKind::Percentage),
    ("ltv", MetricKind::Currency),
    ("cac", MetricKind::Currency),
    ("team_size", MetricKind::Count),
    ("bookings", MetricKind::Currency),
    ("pipeline", MetricKind::Currency),
];

/// Look up the kind for a metric name.
pub fn kind_of(name: &str) -> Option<MetricKind> {
    TARGET_METRICS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// One stored metric: the source's exact wording plus the parsed value
/// and a canonical display string, when parsing succeeded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricValue {
    pub raw: String,
    pub value: Option<f64>,
    pub display: Option<String>,
}

impl MetricValue {
    fn new(kind: MetricKind, raw: &str) -> Self {
        let value = match kind {
            MetricKind::Currency => normalize::parse_currency(raw),
            MetricKind::Percentage => normalize::parse_percentage(raw),
            MetricKind::Duration => normalize::parse_duration_months(raw),
            MetricKind::Count => normalize::parse_count(raw),
        };
        let display = value.map(|v| match kind {
            MetricKind::Currency => format_currency(v),
            MetricKind::Percentage => format_percentage(v),
            MetricKind::Duration => format_duration(v),
            MetricKind::Count => format_count(v),
        });
        Self {
            raw: raw.to_string(),
            value,
            display,
        }
    }
}

/// Normalize one extraction pass into the map persisted as
/// `metrics_json`. Metrics the source never mentioned are omitted
/// entirely, not stored as nulls.
pub fn normalize_metrics(raw: &RawMetrics) -> BTreeMap<String, MetricValue> {
    let mut map = BTreeMap::new();
    for (name, raw_value) in raw.metric_fields() {
        let trimmed = raw_value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_AVAILABLE) {
            continue;
        }
        // Names come from metric_fields(), so the kind lookup cannot miss
        if let Some(kind) = kind_of(name) {
            map.insert(name.to_string(), MetricValue::new(kind, trimmed));
        }
    }
    map
}

/// Serialize a normalized map for the `metrics_json` column.
pub fn to_json(map: &BTreeMap<String, MetricValue>) -> serde_json::Result<String> {
    serde_json::to_string(map)
}

/// Deserialize a `metrics_json` column back into the map.
pub fn from_json(json: &str) -> serde_json::Result<BTreeMap<String, MetricValue>> {
    serde_json::from_str(json)
}
