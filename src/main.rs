//! Command-line entry point for the update tracker.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};

use foliotrack::alerts::{self, LogSender};
use foliotrack::config::Config;
use foliotrack::db::TrackerDb;
use foliotrack::error::PipelineError;
use foliotrack::ingest;
use foliotrack::mail::EmlDirSource;
use foliotrack::metrics;
use foliotrack::oracle::AnthropicOracle;
use foliotrack::report;
use foliotrack::resolver;

#[derive(Parser)]
#[command(name = "foliotrack", version, about = "Portfolio company update tracker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest forwarded update emails from the mailbox directory
    Ingest {
        /// Directory of .eml files (defaults to the configured mailbox)
        #[arg(long)]
        mailbox: Option<PathBuf>,
        /// Only ingest messages at most this many days old
        #[arg(long)]
        days: Option<i64>,
        /// Classify and report without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Scan for silent companies and send escalation alerts
    Alerts {
        #[command(subcommand)]
        action: Option<AlertsAction>,
        /// Compose and report without recording or sending
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the portfolio standing report
    Report,
    /// Show the latest extracted metrics for a company, or reprocess an update
    Metrics {
        /// Company name (fuzzy matched against the registry)
        company: Option<String>,
        /// Re-run metrics extraction for this stored update id
        #[arg(long)]
        update: Option<i64>,
    },
    /// Export all stored metrics as CSV
    Export {
        /// Output file (stdout if omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Add a company to the registry
    AddCompany {
        name: String,
        /// Fund label (e.g. "Fund II")
        #[arg(long)]
        fund: Option<String>,
        /// Track without alerting (not a portfolio company)
        #[arg(long)]
        non_portfolio: bool,
    },
    /// Add a contact for alert delivery
    AddContact {
        /// Company name (fuzzy matched against the registry)
        company: String,
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        primary: bool,
    },
    /// Flag a contact address as bounced so alerts stop using it
    MarkBounced {
        /// Company name (fuzzy matched against the registry)
        company: String,
        email: String,
        /// Clear the flag instead of setting it
        #[arg(long)]
        clear: bool,
    },
    /// Merge duplicate company rows that share a suffix-stripped name
    Dedupe {
        /// Report what would merge without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum AlertsAction {
    /// Manually resolve a company's open alerts
    Resolve {
        /// Company name (fuzzy matched against the registry)
        company: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), PipelineError> {
    let cli = Cli::parse();
    let config = Config::load()?;
    let db = TrackerDb::open()?;

    match cli.command {
        Command::Ingest {
            mailbox,
            days,
            dry_run,
        } => {
            let oracle = AnthropicOracle::new(&config.oracle, config.max_prompt_content_chars)?;
            let dir = mailbox.unwrap_or_else(|| config.mailbox_dir.clone());
            let source = EmlDirSource::new(dir);
            let stats = ingest::run_ingest(&db, &config, &oracle, &source, days, dry_run)?;
            println!(
                "Fetched {}, ingested {}, duplicates {}, not updates {}, too old {}, \
                 attachments {}, metrics records {}, alerts resolved {}, errors {}",
                stats.fetched,
                stats.ingested,
                stats.duplicates,
                stats.not_updates,
                stats.skipped_old,
                stats.attachments_saved,
                stats.metrics_records,
                stats.alerts_resolved,
                stats.errors
            );
        }
        Command::Alerts { action, dry_run } => match action {
            Some(AlertsAction::Resolve { company }) => {
                let registry = db.list_companies()?;
                let matched = resolver::resolve(&company, &registry).ok_or_else(|| {
                    PipelineError::Config(format!("No company matching '{company}'"))
                })?;
                let resolved = db.resolve_alerts(matched.company.id)?;
                println!("Resolved {} alert(s) for {}", resolved, matched.company.name);
            }
            None => {
                let today = Utc::now().date_naive();
                let stats = alerts::run_alerts(&db, &config, &LogSender, today, dry_run)?;
                println!(
                    "Scanned {}, sent {}, skipped (no contacts) {}, failed {}",
                    stats.scanned, stats.sent, stats.skipped_no_contacts, stats.failed
                );
            }
        },
        Command::Report => {
            let today = Utc::now().date_naive();
            let report = report::build_report(&db, &config.alert_thresholds, today)?;
            print!("{}", report::render_report(&report));
        }
        Command::Metrics { company, update } => match (company, update) {
            (_, Some(update_id)) => {
                let oracle =
                    AnthropicOracle::new(&config.oracle, config.max_prompt_content_chars)?;
                let added = ingest::reprocess_update(&db, &oracle, update_id)?;
                println!("Reprocessed update {update_id}: {added} new metrics record(s)");
            }
            (Some(company), None) => {
                let registry = db.list_companies()?;
                let matched = resolver::resolve(&company, &registry).ok_or_else(|| {
                    PipelineError::Config(format!("No company matching '{company}'"))
                })?;
                let records = db.metrics_for_company(matched.company.id)?;
                if records.is_empty() {
                    println!("No metrics recorded for {}", matched.company.name);
                    return Ok(());
                }
                println!("{} — latest extraction:", matched.company.name);
                let latest = &records[0];
                println!("  source: {} at {}", latest.source, latest.extracted_at);
                if let Some(period) = &latest.reporting_period {
                    println!("  period: {period}");
                }
                if let Some(confidence) = &latest.extraction_confidence {
                    println!("  confidence: {confidence}");
                }
                let map = metrics::from_json(&latest.metrics_json)
                    .map_err(|e| PipelineError::Config(format!("metrics_json: {e}")))?;
                for (name, metric) in &map {
                    match (&metric.display, metric.value) {
                        (Some(display), _) => {
                            println!("  {:<20} {} (raw: {})", name, display, metric.raw)
                        }
                        (None, _) => println!("  {:<20} {}", name, metric.raw),
                    }
                }
            }
            (None, None) => {
                return Err(PipelineError::Config(
                    "Pass a company name or --update <id>".to_string(),
                ));
            }
        },
        Command::Export { output } => {
            let csv = report::export_metrics_csv(&db)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    println!("Wrote {}", path.display());
                }
                None => print!("{csv}"),
            }
        }
        Command::AddCompany {
            name,
            fund,
            non_portfolio,
        } => {
            let id = db.insert_company(&name, !non_portfolio, fund.as_deref())?;
            println!("Added company {name} (id {id})");
        }
        Command::AddContact {
            company,
            email,
            name,
            title,
            primary,
        } => {
            let registry = db.list_companies()?;
            let matched = resolver::resolve(&company, &registry).ok_or_else(|| {
                PipelineError::Config(format!("No company matching '{company}'"))
            })?;
            db.insert_contact(
                matched.company.id,
                name.as_deref(),
                &email,
                title.as_deref(),
                primary,
            )?;
            println!("Added contact {} for {}", email, matched.company.name);
        }
        Command::MarkBounced {
            company,
            email,
            clear,
        } => {
            let registry = db.list_companies()?;
            let matched = resolver::resolve(&company, &registry).ok_or_else(|| {
                PipelineError::Config(format!("No company matching '{company}'"))
            })?;
            let n = db.set_contact_bounced(matched.company.id, &email, !clear)?;
            if n == 0 {
                return Err(PipelineError::Config(format!(
                    "No contact {} for {}",
                    email, matched.company.name
                )));
            }
            println!(
                "Marked {} as {} for {}",
                email,
                if clear { "deliverable" } else { "bounced" },
                matched.company.name
            );
        }
        Command::Dedupe { dry_run } => {
            let stats = resolver::dedupe_companies(&db, dry_run)?;
            println!(
                "{} duplicate group(s), {} compan{} merged{}",
                stats.groups,
                stats.merged,
                if stats.merged == 1 { "y" } else { "ies" },
                if dry_run { " (dry run)" } else { "" }
            );
        }
    }

    Ok(())
}
