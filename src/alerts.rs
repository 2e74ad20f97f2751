//! Silence alerting for portfolio companies.
//!
//! A company that stops sending updates moves through three tiers of
//! escalation: a reminder after a month of silence, a follow-up after
//! two, and an urgent escalation (CC'd to the fund team) after three.
//! Only the highest due tier fires, and firing is idempotent — an
//! unresolved alert at a tier suppresses re-sends until the silence is
//! resolved by a new update.
//!
//! Non-portfolio companies are tracked in the registry but never alerted.

use chrono::NaiveDate;

use crate::config::{AlertThresholds, Config};
use crate::db::{DbCompany, TrackerDb};
use crate::error::PipelineError;

/// Days assumed since the last update for a company that has never sent
/// one. High enough to land in the escalation tier immediately.
const NEVER_UPDATED_DAYS: i64 = 999;

/// The three escalation tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTier {
    OneMonth,
    TwoMonth,
    Escalation,
}

impl AlertTier {
    /// Stable identifier stored in the alerts table.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTier::OneMonth => "1_month",
            AlertTier::TwoMonth => "2_month",
            AlertTier::Escalation => "3_month_escalation",
        }
    }

    pub fn threshold_days(&self, thresholds: &AlertThresholds) -> i64 {
        match self {
            AlertTier::OneMonth => thresholds.one_month,
            AlertTier::TwoMonth => thresholds.two_month,
            AlertTier::Escalation => thresholds.escalation,
        }
    }

    /// The single tier due for a given silence length: the highest one
    /// whose threshold is met, or none if the company is current.
    pub fn due_for(days_since: i64, thresholds: &AlertThresholds) -> Option<AlertTier> {
        if days_since >= thresholds.escalation {
            Some(AlertTier::Escalation)
        } else if days_since >= thresholds.two_month {
            Some(AlertTier::TwoMonth)
        } else if days_since >= thresholds.one_month {
            Some(AlertTier::OneMonth)
        } else {
            None
        }
    }
}

/// A company whose silence has crossed a threshold without an open
/// alert at that tier.
#[derive(Debug, Clone)]
pub struct PendingAlert {
    pub company: DbCompany,
    pub tier: AlertTier,
    pub days_since: i64,
    pub last_update_date: Option<String>,
}

/// Days between a `YYYY-MM-DD` date string and `today`.
fn days_since(date: &str, today: NaiveDate) -> Option<i64> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()
        .map(|d| (today - d).num_days())
}

/// Scan the portfolio for companies needing an alert. A company with no
/// updates at all is treated as maximally overdue.
pub fn pending_alerts(
    db: &TrackerDb,
    thresholds: &AlertThresholds,
    today: NaiveDate,
) -> Result<Vec<PendingAlert>, PipelineError> {
    let mut pending = Vec::new();

    for company in db.list_portfolio_companies()? {
        let last_update_date = db.latest_update_date(company.id)?;
        let silence = match last_update_date.as_deref() {
            Some(date) => days_since(date, today).unwrap_or(NEVER_UPDATED_DAYS),
            None => NEVER_UPDATED_DAYS,
        };

        let tier = match AlertTier::due_for(silence, thresholds) {
            Some(tier) => tier,
            None => continue,
        };

        if db.unresolved_alert_exists(company.id, tier.as_str())? {
            continue;
        }

        pending.push(PendingAlert {
            company,
            tier,
            days_since: silence,
            last_update_date,
        });
    }

    Ok(pending)
}

/// A composed alert email ready to hand to a sender.
#[derive(Debug, Clone)]
pub struct AlertEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Compose the alert email for one tier. Escalations carry the fund
/// team CC list; lower tiers go to the company alone.
pub fn compose_alert(pending: &PendingAlert, to: Vec<String>, escalation_cc: &[String]) -> AlertEmail {
    let name = &pending.company.name;
    let (subject, body) = match pending.tier {
        AlertTier::OneMonth => (
            format!("Reminder: Monthly Update Request - {name}"),
            format!(
                "Dear {name} Team,\n\n\
                 We noticed that we haven't received your monthly investor update in over a \
                 month. Your regular updates help us provide better support and identify \
                 opportunities where we can assist.\n\n\
                 Could you please send us your latest company update when convenient? We're \
                 particularly interested in:\n\n\
                 - Key metrics and performance indicators\n\
                 - Recent milestones and achievements\n\
                 - Current challenges or areas where we might help\n\
                 - Financial highlights\n\
                 - Team updates and hiring needs\n\n\
                 Thank you for taking the time to keep us informed.\n\n\
                 Best regards,\nThe Investment Team\n\n---\n\
                 This is an automated reminder. If you have questions, please reply to this email.\n"
            ),
        ),
        AlertTier::TwoMonth => (
            format!("Second Reminder: Update Request - {name}"),
            format!(
                "Dear {name} Team,\n\n\
                 We're following up on our previous request for your monthly investor update. \
                 It's been over two months since we last heard from you, and we want to ensure \
                 everything is going well.\n\n\
                 Please send us a brief update covering:\n\
                 - Current business status and key metrics\n\
                 - Any challenges you're facing\n\
                 - Recent wins or milestones\n\
                 - How we can help\n\n\
                 We're committed to supporting your success and would appreciate hearing from \
                 you soon.\n\n\
                 Best regards,\nThe Investment Team\n\n---\n\
                 This is an automated follow-up. Please reply if you need assistance.\n"
            ),
        ),
        AlertTier::Escalation => (
            format!("URGENT: Communication Needed - {name}"),
            format!(
                "Dear {name} Team,\n\n\
                 We are concerned that we haven't received any updates from {name} in over \
                 three months. As your investment partner, regular communication is essential \
                 for maintaining our relationship and providing appropriate support.\n\n\
                 IMMEDIATE ACTION REQUESTED:\n\
                 Please respond to this email within 48 hours with a status update, even if \
                 brief. We need to know:\n\n\
                 1. Current operational status of the company\n\
                 2. Any significant changes or challenges\n\
                 3. Whether you need immediate support or assistance\n\
                 4. Confirmation of your ongoing commitment to investor communications\n\n\
                 If we don't hear from you within 48 hours, we will need to escalate this \
                 matter to explore other communication channels.\n\n\
                 Urgent regards,\nThe Investment Team\n\n---\n\
                 This is an urgent automated escalation. Immediate response required.\n"
            ),
        ),
    };

    let cc = match pending.tier {
        AlertTier::Escalation => escalation_cc.to_vec(),
        _ => Vec::new(),
    };

    AlertEmail {
        to,
        cc,
        subject,
        body,
    }
}

/// Delivery seam. The default implementation logs instead of sending;
/// outbound SMTP lives behind this trait so the engine's selection and
/// idempotency logic is testable without a mail server.
pub trait AlertSender {
    fn send(&self, email: &AlertEmail) -> Result<(), PipelineError>;
}

/// Logs composed alerts without delivering them.
pub struct LogSender;

impl AlertSender for LogSender {
    fn send(&self, email: &AlertEmail) -> Result<(), PipelineError> {
        log::info!(
            "ALERT to {} (cc {}): {}",
            email.to.join(", "),
            email.cc.join(", "),
            email.subject
        );
        Ok(())
    }
}

/// Outcome counts for one alert run.
#[derive(Debug, Default)]
pub struct AlertRunStats {
    pub scanned: usize,
    pub sent: usize,
    pub skipped_no_contacts: usize,
    pub failed: usize,
}

/// Run one alert pass: scan, compose, send, record. Companies with no
/// usable contacts are logged and skipped, never silently dropped.
pub fn run_alerts(
    db: &TrackerDb,
    config: &Config,
    sender: &dyn AlertSender,
    today: NaiveDate,
    dry_run: bool,
) -> Result<AlertRunStats, PipelineError> {
    let pending = pending_alerts(db, &config.alert_thresholds, today)?;
    let mut stats = AlertRunStats {
        scanned: pending.len(),
        ..Default::default()
    };

    for item in &pending {
        let contacts = db.contacts_for_company(item.company.id)?;
        // Bounced addresses are dead letters; only deliverable ones count
        let to: Vec<String> = contacts
            .into_iter()
            .filter(|c| !c.bounced)
            .map(|c| c.email)
            .collect();
        if to.is_empty() {
            log::warn!(
                "{} is {} days silent ({:?} tier) but has no deliverable contacts; skipping",
                item.company.name,
                item.days_since,
                item.tier
            );
            stats.skipped_no_contacts += 1;
            continue;
        }

        let email = compose_alert(item, to, &config.recipients.escalation_cc());

        if dry_run {
            log::info!(
                "[dry-run] would send {} alert for {} ({} days silent)",
                item.tier.as_str(),
                item.company.name,
                item.days_since
            );
            stats.sent += 1;
            continue;
        }

        match sender.send(&email) {
            Ok(()) => {
                db.insert_alert(item.company.id, item.tier.as_str(), item.days_since)?;
                log::info!(
                    "Sent {} alert for {} ({} days silent)",
                    item.tier.as_str(),
                    item.company.name,
                    item.days_since
                );
                stats.sent += 1;
            }
            Err(e) => {
                log::error!("Failed to send alert for {}: {}", item.company.name, e);
                stats.failed += 1;
            }
        }
    }

    Ok(stats)
}
