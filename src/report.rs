//! Portfolio status reporting and metrics export.

use chrono::NaiveDate;

use crate::alerts::AlertTier;
use crate::config::AlertThresholds;
use crate::db::TrackerDb;
use crate::error::PipelineError;
use crate::metrics;

/// One portfolio company's standing in the report.
#[derive(Debug, Clone)]
pub struct CompanyStanding {
    pub name: String,
    pub last_update_date: Option<String>,
    pub days_since: Option<i64>,
    pub tier: Option<AlertTier>,
}

/// Snapshot of the whole tracker.
#[derive(Debug)]
pub struct PortfolioReport {
    pub companies: i64,
    pub portfolio_companies: i64,
    pub updates: i64,
    pub updates_last_30_days: i64,
    pub unresolved_alerts: i64,
    pub standings: Vec<CompanyStanding>,
}

/// Build the report as of `today`.
pub fn build_report(
    db: &TrackerDb,
    thresholds: &AlertThresholds,
    today: NaiveDate,
) -> Result<PortfolioReport, PipelineError> {
    let since = (today - chrono::Duration::days(30))
        .format("%Y-%m-%d")
        .to_string();

    let mut standings = Vec::new();
    for company in db.list_portfolio_companies()? {
        let last_update_date = db.latest_update_date(company.id)?;
        let days_since = last_update_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .map(|d| (today - d).num_days());
        let tier = AlertTier::due_for(days_since.unwrap_or(i64::MAX), thresholds);
        standings.push(CompanyStanding {
            name: company.name,
            last_update_date,
            days_since,
            tier,
        });
    }
    // Quietest companies first
    standings.sort_by_key(|s| std::cmp::Reverse(s.days_since.unwrap_or(i64::MAX)));

    Ok(PortfolioReport {
        companies: db.count_companies()?,
        portfolio_companies: db.count_portfolio_companies()?,
        updates: db.count_updates()?,
        updates_last_30_days: db.count_updates_since(&since)?,
        unresolved_alerts: db.count_unresolved_alerts()?,
        standings,
    })
}

/// Render the report for the terminal.
pub fn render_report(report: &PortfolioReport) -> String {
    let mut out = String::new();
    out.push_str("PORTFOLIO UPDATE TRACKER\n");
    out.push_str("========================\n\n");
    out.push_str(&format!(
        "Companies: {} ({} portfolio)\n",
        report.companies, report.portfolio_companies
    ));
    out.push_str(&format!(
        "Updates: {} total, {} in the last 30 days\n",
        report.updates, report.updates_last_30_days
    ));
    out.push_str(&format!("Open alerts: {}\n\n", report.unresolved_alerts));

    out.push_str("Portfolio standing (quietest first):\n");
    for standing in &report.standings {
        let silence = match standing.days_since {
            Some(days) => format!("{days} days"),
            None => "never updated".to_string(),
        };
        let flag = match standing.tier {
            Some(AlertTier::Escalation) => " [ESCALATION]",
            Some(AlertTier::TwoMonth) => " [2-month]",
            Some(AlertTier::OneMonth) => " [1-month]",
            None => "",
        };
        out.push_str(&format!("  {:<30} {}{}\n", standing.name, silence, flag));
    }
    out
}

/// Export every stored metric as CSV: one row per (update, source,
/// metric). Raw and normalized values ride side by side.
pub fn export_metrics_csv(db: &TrackerDb) -> Result<String, PipelineError> {
    let mut out = String::from("company,update_date,source,metric,raw,value,display,extracted_at\n");

    for company in db.list_companies()? {
        for update in db.updates_for_company(company.id)? {
            for record in db.metrics_for_update(update.id)? {
                let map = metrics::from_json(&record.metrics_json)
                    .map_err(|e| PipelineError::Config(format!("metrics_json: {e}")))?;
                for (name, metric) in &map {
                    let row = [
                        csv_field(&company.name),
                        csv_field(&update.update_date),
                        csv_field(&record.source),
                        csv_field(name),
                        csv_field(&metric.raw),
                        metric.value.map(|v| v.to_string()).unwrap_or_default(),
                        csv_field(metric.display.as_deref().unwrap_or("")),
                        csv_field(&record.extracted_at),
                    ];
                    out.push_str(&row.join(","));
                    out.push('\n');
                }
            }
        }
    }
    Ok(out)
}

/// Quote a CSV field when it needs it.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
