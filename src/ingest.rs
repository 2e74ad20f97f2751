//! The ingestion pipeline: raw messages in, updates + metrics out.
//!
//! One pass over a mail source, synchronous and single-threaded. The
//! batch policy is continue-on-error: a message that fails to parse,
//! classify, or extract is logged and counted, and the run moves on.
//! Only setup failures (database, config) abort a run.
//!
//! Ingesting a new update resolves any open silence alerts for that
//! company — the silence it flagged has ended.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::classify;
use crate::config::Config;
use crate::db::{NewMetricsRecord, NewUpdate, TrackerDb};
use crate::error::PipelineError;
use crate::extract;
use crate::mail::{self, AttachmentPayload, MailSource};
use crate::metrics;
use crate::oracle::{Classification, EmailEnvelope, ExtractionOracle, RawMetrics, NOT_AVAILABLE};
use crate::resolver;

/// Counters for one ingestion run.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub fetched: usize,
    pub skipped_forwarder: usize,
    pub skipped_old: usize,
    pub not_updates: usize,
    pub duplicates: usize,
    pub ingested: usize,
    pub attachments_saved: usize,
    pub metrics_records: usize,
    pub alerts_resolved: usize,
    pub errors: usize,
}

/// Run one ingestion pass over the source. `max_age_days` limits the
/// pass to recent messages; `None` ingests everything (backfill runs).
pub fn run_ingest(
    db: &TrackerDb,
    config: &Config,
    oracle: &dyn ExtractionOracle,
    source: &dyn MailSource,
    max_age_days: Option<i64>,
    dry_run: bool,
) -> Result<IngestStats, PipelineError> {
    let messages = source.fetch()?;
    let mut stats = IngestStats {
        fetched: messages.len(),
        ..Default::default()
    };
    log::info!("Ingesting {} message(s)", stats.fetched);

    for message in &messages {
        match ingest_one(db, config, oracle, &message.data, max_age_days, dry_run, &mut stats) {
            Ok(()) => {}
            Err(e) => {
                log::error!("Failed to ingest {}: {}", message.id, e);
                stats.errors += 1;
            }
        }
    }

    log::info!(
        "Ingest complete: {} ingested, {} duplicates, {} not updates, {} errors",
        stats.ingested,
        stats.duplicates,
        stats.not_updates,
        stats.errors
    );
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
fn ingest_one(
    db: &TrackerDb,
    config: &Config,
    oracle: &dyn ExtractionOracle,
    raw: &[u8],
    max_age_days: Option<i64>,
    dry_run: bool,
    stats: &mut IngestStats,
) -> Result<(), PipelineError> {
    let email = mail::parse_message(raw, config.max_subject_chars, config.max_body_chars)?;

    if let Some(max_age) = max_age_days {
        let age = (Utc::now().date_naive() - email.date.date_naive()).num_days();
        if age > max_age {
            log::debug!(
                "Skipping message from {} ({} days old, window is {})",
                email.date.format("%Y-%m-%d"),
                age,
                max_age
            );
            stats.skipped_old += 1;
            return Ok(());
        }
    }

    // Only mail forwarded by a known fund partner is trusted. An empty
    // allow-list means ingest everything (test and backfill runs).
    if !config.forwarders.is_empty() {
        let sender = email.sender.to_lowercase();
        if !config.forwarders.iter().any(|f| f.to_lowercase() == sender) {
            log::debug!("Skipping message from non-forwarder {}", email.sender);
            stats.skipped_forwarder += 1;
            return Ok(());
        }
    }

    let registry = db.list_companies()?;
    let portfolio_names: Vec<String> = registry
        .iter()
        .filter(|c| c.is_portfolio)
        .map(|c| c.name.clone())
        .collect();

    let envelope = EmailEnvelope {
        subject: email.subject.clone(),
        sender: email.sender.clone(),
        date: email.date.format("%Y-%m-%d").to_string(),
        body: email.body.clone(),
    };

    let classification = match classify::classify(
        oracle,
        &envelope,
        &portfolio_names,
        config.confidence_threshold,
    )? {
        Some(c) => c,
        None => {
            stats.not_updates += 1;
            return Ok(());
        }
    };

    // Resolve against the registry; unknown companies are recorded so
    // their updates are never lost, just not alerted on.
    let company_id = match resolver::resolve(&classification.company_name, &registry) {
        Some(m) => {
            log::debug!(
                "Resolved '{}' to {} via {:?}",
                classification.company_name,
                m.company.name,
                m.tier
            );
            if classification.is_portfolio_company && !m.company.is_portfolio {
                log::info!("Promoting {} to portfolio", m.company.name);
                if !dry_run {
                    db.set_portfolio(m.company.id, true)?;
                }
            }
            m.company.id
        }
        None => {
            log::info!(
                "New company from update: {} (portfolio: {})",
                classification.company_name,
                classification.is_portfolio_company
            );
            if dry_run {
                stats.ingested += 1;
                return Ok(());
            }
            db.insert_company(
                &classification.company_name,
                classification.is_portfolio_company,
                None,
            )?
        }
    };

    let update_date = envelope.date.clone();
    if db.update_exists(company_id, &email.subject, &update_date)? {
        log::debug!(
            "Duplicate update for company {} on {}: '{}'",
            company_id,
            update_date,
            email.subject
        );
        stats.duplicates += 1;
        return Ok(());
    }

    if dry_run {
        log::info!(
            "[dry-run] would ingest '{}' for {}",
            email.subject,
            classification.company_name
        );
        stats.ingested += 1;
        return Ok(());
    }

    // Body metrics first, so the update row carries the narrative fields
    let body_metrics = if email.body.trim().is_empty() {
        None
    } else {
        extract_metrics_logged(oracle, &classification.company_name, "body", &email.body, stats)
    };

    let update_id = db.insert_update(&NewUpdate {
        company_id,
        subject: email.subject.clone(),
        sender: Some(
            classification
                .original_sender
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| email.sender.clone()),
        ),
        body: Some(email.body.clone()),
        update_date: update_date.clone(),
        received_at: Some(email.date.to_rfc3339()),
        summary: classification.summary.clone(),
        key_highlights: body_metrics
            .as_ref()
            .map(|m| m.key_highlights.clone())
            .filter(|s| !s.is_empty()),
        key_challenges: body_metrics
            .as_ref()
            .map(|m| m.key_challenges.clone())
            .filter(|s| !s.is_empty()),
        funding_status: body_metrics
            .as_ref()
            .map(|m| m.funding_status.clone())
            .filter(|s| !s.is_empty() && s != NOT_AVAILABLE),
        confidence: Some(classification.confidence),
    })?;
    stats.ingested += 1;

    if let Some(raw_metrics) = &body_metrics {
        record_metrics(db, update_id, company_id, "body", raw_metrics, stats)?;
    }

    for payload in &email.attachments {
        match save_attachment(db, config, update_id, company_id, payload) {
            Ok(stored_path) => {
                stats.attachments_saved += 1;
                process_attachment_metrics(
                    db,
                    oracle,
                    update_id,
                    company_id,
                    &classification,
                    payload,
                    &stored_path,
                    stats,
                )?;
            }
            Err(e) => {
                log::warn!("Failed to save attachment {}: {}", payload.filename, e);
                stats.errors += 1;
            }
        }
    }

    db.touch_last_update(company_id, &update_date)?;

    // A fresh update ends the silence
    let resolved = db.resolve_alerts(company_id)?;
    if resolved > 0 {
        log::info!(
            "Resolved {} open alert(s) for company {}",
            resolved,
            company_id
        );
        stats.alerts_resolved += resolved;
    }

    log::info!(
        "Ingested '{}' for {} (confidence {:.2})",
        email.subject,
        classification.company_name,
        classification.confidence
    );
    Ok(())
}

/// Metrics extraction with the item-level error policy applied: oracle
/// failures are logged and counted, never fatal to the message.
fn extract_metrics_logged(
    oracle: &dyn ExtractionOracle,
    company_name: &str,
    source_label: &str,
    content: &str,
    stats: &mut IngestStats,
) -> Option<RawMetrics> {
    match oracle.extract_metrics(company_name, source_label, content) {
        Ok(m) => Some(m),
        Err(e) => {
            log::warn!(
                "Metrics extraction failed for {} ({}): {}",
                company_name,
                source_label,
                e
            );
            stats.errors += 1;
            None
        }
    }
}

/// Persist one extraction pass, skipping passes where nothing was found.
/// The record keeps the oracle's reporting period/date and its
/// self-reported confidence alongside the metrics map.
fn record_metrics(
    db: &TrackerDb,
    update_id: i64,
    company_id: i64,
    source: &str,
    raw_metrics: &RawMetrics,
    stats: &mut IngestStats,
) -> Result<(), PipelineError> {
    let normalized = metrics::normalize_metrics(raw_metrics);
    if normalized.is_empty() {
        log::debug!("No metrics found in {source}");
        return Ok(());
    }
    let json = metrics::to_json(&normalized)
        .map_err(|e| PipelineError::Config(format!("serialize metrics: {e}")))?;
    db.insert_metrics_record(&NewMetricsRecord {
        update_id,
        company_id,
        source: source.to_string(),
        metrics_json: json,
        reporting_period: meta_field(&raw_metrics.reporting_period),
        reporting_date: meta_field(&raw_metrics.reporting_date),
        extraction_confidence: meta_field(&raw_metrics.extraction_confidence),
    })?;
    stats.metrics_records += 1;
    log::info!("Recorded {} metric(s) from {}", normalized.len(), source);
    Ok(())
}

/// "N/A" and empty strings become NULL columns, not stored sentinels.
fn meta_field(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_AVAILABLE) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Re-run metrics extraction for a stored update: the body first, then
/// every attachment whose saved file still extracts. New records are
/// appended; earlier ones stay immutable. Returns how many records the
/// pass added.
pub fn reprocess_update(
    db: &TrackerDb,
    oracle: &dyn ExtractionOracle,
    update_id: i64,
) -> Result<usize, PipelineError> {
    let update = db
        .get_update(update_id)?
        .ok_or_else(|| PipelineError::Config(format!("No update with id {update_id}")))?;
    let company = db
        .get_company(update.company_id)?
        .ok_or_else(|| PipelineError::Config(format!("No company for update {update_id}")))?;

    let mut stats = IngestStats::default();

    if let Some(body) = update.body.as_deref().filter(|b| !b.trim().is_empty()) {
        if let Some(raw_metrics) =
            extract_metrics_logged(oracle, &company.name, "body", body, &mut stats)
        {
            record_metrics(db, update_id, company.id, "body", &raw_metrics, &mut stats)?;
        }
    }

    for attachment in db.attachments_for_update(update_id)? {
        let path = Path::new(&attachment.stored_path);
        if !path.exists() {
            log::warn!("Stored attachment missing: {}", attachment.stored_path);
            continue;
        }
        if !extract::is_extractable(path) {
            continue;
        }
        match extract::extract_text(path) {
            Ok(text) if !text.trim().is_empty() => {
                if let Some(raw_metrics) = extract_metrics_logged(
                    oracle,
                    &company.name,
                    &attachment.filename,
                    &text,
                    &mut stats,
                ) {
                    record_metrics(
                        db,
                        update_id,
                        company.id,
                        &attachment.filename,
                        &raw_metrics,
                        &mut stats,
                    )?;
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Text extraction failed for {}: {}", attachment.filename, e),
        }
    }

    Ok(stats.metrics_records)
}

/// Write the attachment payload under `attachments/<company_id>/` with a
/// timestamp prefix, and record it.
fn save_attachment(
    db: &TrackerDb,
    config: &Config,
    update_id: i64,
    company_id: i64,
    payload: &AttachmentPayload,
) -> Result<PathBuf, PipelineError> {
    let dir = config.attachments_dir.join(company_id.to_string());
    fs::create_dir_all(&dir)?;

    let safe_name = sanitize_filename(&payload.filename);
    let stamped = format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), safe_name);
    let path = dir.join(stamped);

    fs::write(&path, &payload.data)?;
    db.insert_attachment(
        update_id,
        &payload.filename,
        payload.content_type.as_deref(),
        &path.display().to_string(),
        payload.data.len() as i64,
    )?;
    log::debug!(
        "Saved attachment {} ({} bytes)",
        path.display(),
        payload.data.len()
    );
    Ok(path)
}

#[allow(clippy::too_many_arguments)]
fn process_attachment_metrics(
    db: &TrackerDb,
    oracle: &dyn ExtractionOracle,
    update_id: i64,
    company_id: i64,
    classification: &Classification,
    payload: &AttachmentPayload,
    stored_path: &Path,
    stats: &mut IngestStats,
) -> Result<(), PipelineError> {
    if !extract::is_extractable(stored_path) {
        log::debug!("Skipping metrics for non-extractable {}", payload.filename);
        return Ok(());
    }

    let text = match extract::extract_text(stored_path) {
        Ok(t) if !t.trim().is_empty() => t,
        Ok(_) => return Ok(()),
        Err(e) => {
            log::warn!("Text extraction failed for {}: {}", payload.filename, e);
            stats.errors += 1;
            return Ok(());
        }
    };

    if let Some(raw_metrics) = extract_metrics_logged(
        oracle,
        &classification.company_name,
        &payload.filename,
        &text,
        stats,
    ) {
        record_metrics(
            db,
            update_id,
            company_id,
            &payload.filename,
            &raw_metrics,
            stats,
        )?;
    }
    Ok(())
}

/// Keep only the final path component and strip separator characters, so
/// hostile filenames cannot escape the attachments directory.
fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .trim_matches('.');
    let cleaned: String = base
        .chars()
        .filter(|c| !matches!(c, '\0' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    if cleaned.is_empty() {
        "attachment.bin".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MailError, OracleError};
    use crate::mail::RawMessage;
    use std::cell::RefCell;

    fn test_db() -> TrackerDb {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ingest_test.db");
        std::mem::forget(dir);
        TrackerDb::open_at(path).expect("open")
    }

    fn test_config() -> Config {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.attachments_dir = dir.path().join("attachments");
        std::mem::forget(dir);
        config
    }

    /// Oracle that replays scripted classifications and metrics.
    struct ScriptedOracle {
        classifications: RefCell<Vec<Result<Classification, OracleError>>>,
        metrics: RefCell<Vec<RawMetrics>>,
    }

    impl ScriptedOracle {
        fn new(
            classifications: Vec<Result<Classification, OracleError>>,
            metrics: Vec<RawMetrics>,
        ) -> Self {
            Self {
                classifications: RefCell::new(classifications),
                metrics: RefCell::new(metrics),
            }
        }
    }

    impl ExtractionOracle for ScriptedOracle {
        fn classify_update(
            &self,
            _email: &EmailEnvelope,
            _portfolio_names: &[String],
        ) -> Result<Classification, OracleError> {
            self.classifications
                .borrow_mut()
                .remove(0)
        }

        fn extract_metrics(
            &self,
            _company_name: &str,
            _source_label: &str,
            _content: &str,
        ) -> Result<RawMetrics, OracleError> {
            let mut queue = self.metrics.borrow_mut();
            if queue.is_empty() {
                Ok(RawMetrics::default())
            } else {
                Ok(queue.remove(0))
            }
        }
    }

    struct VecSource(Vec<RawMessage>);

    impl MailSource for VecSource {
        fn fetch(&self) -> Result<Vec<RawMessage>, MailError> {
            Ok(self.0.clone())
        }
    }

    fn eml(subject: &str, sender: &str, body: &str) -> RawMessage {
        let data = format!(
            "From: {sender}\r\nTo: updates@fund.example\r\nSubject: {subject}\r\n\
             Date: Sun, 03 May 2026 10:15:00 +0000\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\r\n{body}"
        );
        RawMessage {
            id: format!("{subject}.eml"),
            data: data.into_bytes(),
        }
    }

    fn acme_classification() -> Classification {
        Classification {
            is_company_update: true,
            company_name: "Acme".to_string(),
            is_portfolio_company: true,
            confidence: 0.9,
            summary: Some("May update".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_ingest_creates_company_update_and_metrics() {
        let db = test_db();
        let config = test_config();
        let oracle = ScriptedOracle::new(
            vec![Ok(acme_classification())],
            vec![RawMetrics {
                arr: "$1.2M".to_string(),
                key_highlights: "Crossed $1M ARR".to_string(),
                reporting_period: "May 2026".to_string(),
                reporting_date: "2026-05-31".to_string(),
                extraction_confidence: "high".to_string(),
                ..Default::default()
            }],
        );
        let source = VecSource(vec![eml(
            "Fwd: Acme May Update",
            "partner@fund.example",
            "ARR hit $1.2M this month.",
        )]);

        let stats = run_ingest(&db, &config, &oracle, &source, None, false).expect("run");
        assert_eq!(stats.ingested, 1);
        assert_eq!(stats.metrics_records, 1);
        assert_eq!(stats.errors, 0);

        let companies = db.list_portfolio_companies().expect("list");
        assert_eq!(companies.len(), 1);
        assert_eq!(companies[0].name, "Acme");
        assert_eq!(companies[0].last_update_at.as_deref(), Some("2026-05-03"));

        let updates = db.updates_for_company(companies[0].id).expect("updates");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].subject, "Fwd: Acme May Update");
        assert_eq!(updates[0].update_date, "2026-05-03");
        assert_eq!(updates[0].key_highlights.as_deref(), Some("Crossed $1M ARR"));

        let records = db.metrics_for_update(updates[0].id).expect("metrics");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "body");
        assert_eq!(records[0].reporting_period.as_deref(), Some("May 2026"));
        assert_eq!(records[0].reporting_date.as_deref(), Some("2026-05-31"));
        assert_eq!(records[0].extraction_confidence.as_deref(), Some("high"));
        let map = metrics::from_json(&records[0].metrics_json).expect("json");
        assert_eq!(map["arr"].value, Some(1_200_000.0));
    }

    #[test]
    fn test_reporting_metadata_sentinels_become_null() {
        let db = test_db();
        let config = test_config();
        let oracle = ScriptedOracle::new(
            vec![Ok(acme_classification())],
            vec![RawMetrics {
                arr: "$1.2M".to_string(),
                reporting_period: "N/A".to_string(),
                reporting_date: String::new(),
                ..Default::default()
            }],
        );
        let source = VecSource(vec![eml(
            "Fwd: Acme Update",
            "partner@fund.example",
            "ARR is $1.2M.",
        )]);

        run_ingest(&db, &config, &oracle, &source, None, false).expect("run");
        let company = &db.list_companies().expect("list")[0];
        let records = db.metrics_for_company(company.id).expect("metrics");
        assert_eq!(records.len(), 1);
        assert!(records[0].reporting_period.is_none());
        assert!(records[0].reporting_date.is_none());
        // Oracle defaults confidence to "low", which is a real value
        assert_eq!(records[0].extraction_confidence.as_deref(), Some("low"));
    }

    #[test]
    fn test_ingest_window_skips_old_messages() {
        let db = test_db();
        let config = test_config();
        let oracle = ScriptedOracle::new(vec![Ok(acme_classification())], vec![]);
        // The message is dated 2026-05-03, far outside a 30-day window
        let source = VecSource(vec![eml(
            "Fwd: Acme Update",
            "partner@fund.example",
            "old news",
        )]);

        let stats = run_ingest(&db, &config, &oracle, &source, Some(30), false).expect("run");
        assert_eq!(stats.skipped_old, 1);
        assert_eq!(stats.ingested, 0);
        assert_eq!(db.count_updates().expect("count"), 0);
    }

    #[test]
    fn test_reprocess_update_appends_new_records() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");
        let uid = db
            .insert_update(&NewUpdate {
                company_id: cid,
                subject: "May Update".to_string(),
                body: Some("ARR is $1.2M, runway 18 months.".to_string()),
                update_date: "2026-05-03".to_string(),
                ..Default::default()
            })
            .expect("insert");

        let oracle = ScriptedOracle::new(
            vec![],
            vec![RawMetrics {
                arr: "$1.2M".to_string(),
                runway_months: "18 months".to_string(),
                reporting_period: "May 2026".to_string(),
                ..Default::default()
            }],
        );

        let added = reprocess_update(&db, &oracle, uid).expect("reprocess");
        assert_eq!(added, 1);

        let records = db.metrics_for_update(uid).expect("metrics");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reporting_period.as_deref(), Some("May 2026"));
        let map = metrics::from_json(&records[0].metrics_json).expect("json");
        assert_eq!(map["runway_months"].value, Some(18.0));

        // A second pass appends, never rewrites
        let oracle = ScriptedOracle::new(
            vec![],
            vec![RawMetrics {
                arr: "$1.3M".to_string(),
                ..Default::default()
            }],
        );
        reprocess_update(&db, &oracle, uid).expect("reprocess again");
        assert_eq!(db.metrics_for_update(uid).expect("metrics").len(), 2);
    }

    #[test]
    fn test_reprocess_unknown_update_is_an_error() {
        let db = test_db();
        let oracle = ScriptedOracle::new(vec![], vec![]);
        assert!(reprocess_update(&db, &oracle, 42).is_err());
    }

    #[test]
    fn test_ingest_dedups_on_company_subject_date() {
        let db = test_db();
        let config = test_config();
        let message = eml(
            "Fwd: Acme May Update",
            "partner@fund.example",
            "Same update twice.",
        );
        let oracle = ScriptedOracle::new(
            vec![Ok(acme_classification()), Ok(acme_classification())],
            vec![],
        );
        let source = VecSource(vec![message.clone(), message]);

        let stats = run_ingest(&db, &config, &oracle, &source, None, false).expect("run");
        assert_eq!(stats.ingested, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(db.count_updates().expect("count"), 1);
    }

    #[test]
    fn test_ingest_filters_unknown_forwarders() {
        let db = test_db();
        let mut config = test_config();
        config.forwarders = vec!["partner@fund.example".to_string()];
        let oracle = ScriptedOracle::new(vec![Ok(acme_classification())], vec![]);
        let source = VecSource(vec![
            eml("Spam", "rando@elsewhere.example", "buy now"),
            eml("Fwd: Acme Update", "Partner@Fund.example", "real update"),
        ]);

        let stats = run_ingest(&db, &config, &oracle, &source, None, false).expect("run");
        assert_eq!(stats.skipped_forwarder, 1);
        assert_eq!(stats.ingested, 1);
    }

    #[test]
    fn test_ingest_resolves_open_alerts() {
        let db = test_db();
        let config = test_config();
        let cid = db.insert_company("Acme", true, None).expect("insert");
        db.insert_alert(cid, "2_month", 70).expect("alert");

        let oracle = ScriptedOracle::new(vec![Ok(acme_classification())], vec![]);
        let source = VecSource(vec![eml(
            "Fwd: Acme Is Back",
            "partner@fund.example",
            "We're alive!",
        )]);

        let stats = run_ingest(&db, &config, &oracle, &source, None, false).expect("run");
        assert_eq!(stats.ingested, 1);
        assert_eq!(stats.alerts_resolved, 1);
        assert_eq!(db.count_unresolved_alerts().expect("count"), 0);
    }

    #[test]
    fn test_ingest_promotes_known_company_on_portfolio_classification() {
        let db = test_db();
        let config = test_config();
        db.insert_company("Acme", false, None).expect("insert");

        let oracle = ScriptedOracle::new(vec![Ok(acme_classification())], vec![]);
        let source = VecSource(vec![eml(
            "Fwd: Acme Update",
            "partner@fund.example",
            "update body",
        )]);

        run_ingest(&db, &config, &oracle, &source, None, false).expect("run");
        assert_eq!(db.list_portfolio_companies().expect("list").len(), 1);
        // Resolved, not duplicated
        assert_eq!(db.count_companies().expect("count"), 1);
    }

    #[test]
    fn test_ingest_continues_after_oracle_transport_failure() {
        let db = test_db();
        let config = test_config();
        let oracle = ScriptedOracle::new(
            vec![
                Err(OracleError::Transport("connection refused".to_string())),
                Ok(acme_classification()),
            ],
            vec![],
        );
        let source = VecSource(vec![
            eml("Fwd: Broken", "partner@fund.example", "first"),
            eml("Fwd: Acme Update", "partner@fund.example", "second"),
        ]);

        let stats = run_ingest(&db, &config, &oracle, &source, None, false).expect("run");
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.ingested, 1);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let db = test_db();
        let config = test_config();
        let oracle = ScriptedOracle::new(vec![Ok(acme_classification())], vec![]);
        let source = VecSource(vec![eml(
            "Fwd: Acme Update",
            "partner@fund.example",
            "body",
        )]);

        let stats = run_ingest(&db, &config, &oracle, &source, None, true).expect("run");
        assert_eq!(stats.ingested, 1);
        assert_eq!(db.count_companies().expect("count"), 0);
        assert_eq!(db.count_updates().expect("count"), 0);
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("deck.pdf"), "deck.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\report.xlsx"), "report.xlsx");
        assert_eq!(sanitize_filename("weird:na*me?.pdf"), "weirdname.pdf");
        assert_eq!(sanitize_filename("..."), "attachment.bin");
    }
}
