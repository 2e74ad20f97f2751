//! SQLite-based state for companies, updates, metrics, and alerts.
//!
//! The database lives at `~/.foliotrack/tracker.db`. Every timestamp is
//! stored as RFC 3339 TEXT in UTC; `update_date` is a bare `YYYY-MM-DD`
//! date so the dedup key and silence math stay calendar-based. Extracted
//! metrics are persisted as one JSON document per (update, source) pair
//! rather than a 25-column wide table.

use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// A row from the `companies` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbCompany {
    pub id: i64,
    pub name: String,
    pub legal_name: Option<String>,
    pub website: Option<String>,
    pub fund: Option<String>,
    pub description: Option<String>,
    pub founders: Option<String>,
    pub is_portfolio: bool,
    pub last_update_at: Option<String>,
    pub created_at: String,
}

/// A row from the `contacts` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: i64,
    pub company_id: i64,
    pub name: Option<String>,
    pub email: String,
    pub job_title: Option<String>,
    pub is_primary: bool,
    /// Delivery to this address has hard-bounced; alerts skip it.
    pub bounced: bool,
    pub created_at: String,
}

/// A row from the `updates` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbUpdate {
    pub id: i64,
    pub company_id: i64,
    pub subject: String,
    pub sender: Option<String>,
    pub body: Option<String>,
    /// Calendar date of the update (`YYYY-MM-DD`). Part of the dedup key.
    pub update_date: String,
    pub received_at: Option<String>,
    pub summary: Option<String>,
    /// JSON array of strings, as returned by the oracle.
    pub key_highlights: Option<String>,
    pub key_challenges: Option<String>,
    pub funding_status: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: String,
}

/// Fields for inserting a new update. The id and created_at are assigned
/// by the database.
#[derive(Debug, Clone, Default)]
pub struct NewUpdate {
    pub company_id: i64,
    pub subject: String,
    pub sender: Option<String>,
    pub body: Option<String>,
    pub update_date: String,
    pub received_at: Option<String>,
    pub summary: Option<String>,
    pub key_highlights: Option<String>,
    pub key_challenges: Option<String>,
    pub funding_status: Option<String>,
    pub confidence: Option<f64>,
}

/// A row from the `attachments` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAttachment {
    pub id: i64,
    pub update_id: i64,
    pub filename: String,
    pub content_type: Option<String>,
    pub stored_path: String,
    pub size_bytes: Option<i64>,
    pub created_at: String,
}

/// A row from the `metrics_records` table. `metrics_json` holds a map of
/// metric name to `{raw, value, display}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbMetricsRecord {
    pub id: i64,
    pub update_id: i64,
    pub company_id: i64,
    /// "body" for the email text, otherwise the attachment filename.
    pub source: String,
    pub metrics_json: String,
    /// Period label the source reports on ("Q1 2026", "May 2026").
    pub reporting_period: Option<String>,
    /// The period's date as the source states it, distinct from
    /// `extracted_at` (when we ran extraction).
    pub reporting_date: Option<String>,
    /// Oracle's self-reported confidence: high, medium, or low.
    pub extraction_confidence: Option<String>,
    pub extracted_at: String,
}

/// Fields for inserting a new metrics record. The id and extracted_at
/// are assigned by the database.
#[derive(Debug, Clone, Default)]
pub struct NewMetricsRecord {
    pub update_id: i64,
    pub company_id: i64,
    pub source: String,
    pub metrics_json: String,
    pub reporting_period: Option<String>,
    pub reporting_date: Option<String>,
    pub extraction_confidence: Option<String>,
}

/// A row from the `alerts` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAlert {
    pub id: i64,
    pub company_id: i64,
    pub tier: String,
    pub days_since: i64,
    pub sent_at: String,
    pub resolved: bool,
    pub resolved_at: Option<String>,
}

/// SQLite connection wrapper for tracker state.
///
/// Intentionally NOT `Clone` or `Sync`; the pipeline is single-threaded
/// and owns exactly one handle per run.
pub struct TrackerDb {
    conn: Connection,
}

impl TrackerDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at `~/.foliotrack/tracker.db` and
    /// apply the schema.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Schema is idempotent (IF NOT EXISTS throughout)
        conn.execute_batch(include_str!("schema.sql"))?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.foliotrack/tracker.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".foliotrack").join("tracker.db"))
    }

    // =========================================================================
    // Companies
    // =========================================================================

    /// Insert a company and return its row id.
    pub fn insert_company(
        &self,
        name: &str,
        is_portfolio: bool,
        fund: Option<&str>,
    ) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO companies (name, fund, is_portfolio, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, fund, is_portfolio, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_company(&self, id: i64) -> Result<Option<DbCompany>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, legal_name, website, fund, description, founders,
                        is_portfolio, last_update_at, created_at
                 FROM companies WHERE id = ?1",
                params![id],
                Self::map_company,
            )
            .optional()?;
        Ok(row)
    }

    /// All companies, portfolio and non-portfolio alike, in name order.
    /// This is the resolver's registry.
    pub fn list_companies(&self) -> Result<Vec<DbCompany>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, legal_name, website, fund, description, founders,
                    is_portfolio, last_update_at, created_at
             FROM companies ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], Self::map_company)?;

        let mut companies = Vec::new();
        for row in rows {
            companies.push(row?);
        }
        Ok(companies)
    }

    /// Portfolio companies only. The alert engine scans exactly this set.
    pub fn list_portfolio_companies(&self) -> Result<Vec<DbCompany>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, legal_name, website, fund, description, founders,
                    is_portfolio, last_update_at, created_at
             FROM companies WHERE is_portfolio = 1 ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt.query_map([], Self::map_company)?;

        let mut companies = Vec::new();
        for row in rows {
            companies.push(row?);
        }
        Ok(companies)
    }

    /// Flip a company's portfolio flag.
    pub fn set_portfolio(&self, id: i64, is_portfolio: bool) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE companies SET is_portfolio = ?1 WHERE id = ?2",
            params![is_portfolio, id],
        )?;
        Ok(())
    }

    /// Advance `last_update_at`, but never move it backwards.
    pub fn touch_last_update(&self, id: i64, when: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE companies SET last_update_at = ?1
             WHERE id = ?2 AND (last_update_at IS NULL OR last_update_at < ?1)",
            params![when, id],
        )?;
        Ok(())
    }

    /// Fold one company into another and delete the source row: contacts,
    /// updates, attachments, metrics, and alert history all move to
    /// `into_id`. Rows that collide with the target's unique keys
    /// (duplicate contact emails, updates with the same dedup key) are
    /// dropped along with their dependents. Open alerts on the source are
    /// closed rather than moved, so the target never ends up with two
    /// unresolved alerts at one tier.
    pub fn merge_company(&self, from_id: i64, into_id: i64) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();

        self.conn.execute(
            "UPDATE OR IGNORE contacts SET company_id = ?1 WHERE company_id = ?2",
            params![into_id, from_id],
        )?;
        self.conn.execute(
            "DELETE FROM contacts WHERE company_id = ?1",
            params![from_id],
        )?;

        self.conn.execute(
            "UPDATE OR IGNORE updates SET company_id = ?1 WHERE company_id = ?2",
            params![into_id, from_id],
        )?;
        // Leftovers are dedup-key duplicates of updates the target already has
        self.conn.execute(
            "DELETE FROM metrics_records WHERE update_id IN
                 (SELECT id FROM updates WHERE company_id = ?1)",
            params![from_id],
        )?;
        self.conn.execute(
            "DELETE FROM attachments WHERE update_id IN
                 (SELECT id FROM updates WHERE company_id = ?1)",
            params![from_id],
        )?;
        self.conn.execute(
            "DELETE FROM updates WHERE company_id = ?1",
            params![from_id],
        )?;
        self.conn.execute(
            "UPDATE metrics_records SET company_id = ?1 WHERE company_id = ?2",
            params![into_id, from_id],
        )?;

        self.conn.execute(
            "UPDATE alerts SET resolved = 1, resolved_at = ?1
             WHERE company_id = ?2 AND resolved = 0",
            params![now, from_id],
        )?;
        self.conn.execute(
            "UPDATE alerts SET company_id = ?1 WHERE company_id = ?2",
            params![into_id, from_id],
        )?;

        self.conn.execute(
            "DELETE FROM companies WHERE id = ?1",
            params![from_id],
        )?;

        if let Some(latest) = self.latest_update_date(into_id)? {
            self.touch_last_update(into_id, &latest)?;
        }
        Ok(())
    }

    fn map_company(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbCompany> {
        Ok(DbCompany {
            id: row.get(0)?,
            name: row.get(1)?,
            legal_name: row.get(2)?,
            website: row.get(3)?,
            fund: row.get(4)?,
            description: row.get(5)?,
            founders: row.get(6)?,
            is_portfolio: row.get(7)?,
            last_update_at: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    // =========================================================================
    // Contacts
    // =========================================================================

    /// Insert a contact, or fold into the existing row when this company
    /// already has the email on file. Existing non-null fields win; a
    /// primary flag from either side sticks. Returns the row id.
    pub fn insert_contact(
        &self,
        company_id: i64,
        name: Option<&str>,
        email: &str,
        job_title: Option<&str>,
        is_primary: bool,
    ) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO contacts (company_id, name, email, job_title, is_primary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(company_id, email) DO UPDATE SET
                 name = COALESCE(name, excluded.name),
                 job_title = COALESCE(job_title, excluded.job_title),
                 is_primary = MAX(is_primary, excluded.is_primary)",
            params![company_id, name, email, job_title, is_primary, now],
        )?;
        let id = self.conn.query_row(
            "SELECT id FROM contacts WHERE company_id = ?1 AND email = ?2",
            params![company_id, email],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Flag (or clear) a hard bounce on a contact's address. Returns how
    /// many rows matched.
    pub fn set_contact_bounced(
        &self,
        company_id: i64,
        email: &str,
        bounced: bool,
    ) -> Result<usize, DbError> {
        let n = self.conn.execute(
            "UPDATE contacts SET bounced = ?1 WHERE company_id = ?2 AND email = ?3",
            params![bounced, company_id, email],
        )?;
        Ok(n)
    }

    /// Contacts for a company, primary contacts first.
    pub fn contacts_for_company(&self, company_id: i64) -> Result<Vec<DbContact>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, name, email, job_title, is_primary, bounced, created_at
             FROM contacts WHERE company_id = ?1
             ORDER BY is_primary DESC, email",
        )?;
        let rows = stmt.query_map(params![company_id], |row| {
            Ok(DbContact {
                id: row.get(0)?,
                company_id: row.get(1)?,
                name: row.get(2)?,
                email: row.get(3)?,
                job_title: row.get(4)?,
                is_primary: row.get(5)?,
                bounced: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Dedup check on the (company, subject, date) key.
    pub fn update_exists(
        &self,
        company_id: i64,
        subject: &str,
        update_date: &str,
    ) -> Result<bool, DbError> {
        let exists = self
            .conn
            .prepare(
                "SELECT 1 FROM updates
                 WHERE company_id = ?1 AND subject = ?2 AND update_date = ?3
                 LIMIT 1",
            )?
            .exists(params![company_id, subject, update_date])?;
        Ok(exists)
    }

    pub fn insert_update(&self, update: &NewUpdate) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO updates (company_id, subject, sender, body, update_date,
                                  received_at, summary, key_highlights, key_challenges,
                                  funding_status, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                update.company_id,
                update.subject,
                update.sender,
                update.body,
                update.update_date,
                update.received_at,
                update.summary,
                update.key_highlights,
                update.key_challenges,
                update.funding_status,
                update.confidence,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_update(&self, id: i64) -> Result<Option<DbUpdate>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, company_id, subject, sender, body, update_date, received_at,
                        summary, key_highlights, key_challenges, funding_status,
                        confidence, created_at
                 FROM updates WHERE id = ?1",
                params![id],
                Self::map_update,
            )
            .optional()?;
        Ok(row)
    }

    /// Updates for a company, newest first.
    pub fn updates_for_company(&self, company_id: i64) -> Result<Vec<DbUpdate>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, subject, sender, body, update_date, received_at,
                    summary, key_highlights, key_challenges, funding_status,
                    confidence, created_at
             FROM updates WHERE company_id = ?1
             ORDER BY update_date DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![company_id], Self::map_update)?;

        let mut updates = Vec::new();
        for row in rows {
            updates.push(row?);
        }
        Ok(updates)
    }

    /// Most recent update date for a company, if any update exists.
    pub fn latest_update_date(&self, company_id: i64) -> Result<Option<String>, DbError> {
        let date: Option<String> = self.conn.query_row(
            "SELECT MAX(update_date) FROM updates WHERE company_id = ?1",
            params![company_id],
            |row| row.get(0),
        )?;
        Ok(date)
    }

    fn map_update(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbUpdate> {
        Ok(DbUpdate {
            id: row.get(0)?,
            company_id: row.get(1)?,
            subject: row.get(2)?,
            sender: row.get(3)?,
            body: row.get(4)?,
            update_date: row.get(5)?,
            received_at: row.get(6)?,
            summary: row.get(7)?,
            key_highlights: row.get(8)?,
            key_challenges: row.get(9)?,
            funding_status: row.get(10)?,
            confidence: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    // =========================================================================
    // Attachments
    // =========================================================================

    pub fn insert_attachment(
        &self,
        update_id: i64,
        filename: &str,
        content_type: Option<&str>,
        stored_path: &str,
        size_bytes: i64,
    ) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO attachments (update_id, filename, content_type, stored_path,
                                      size_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![update_id, filename, content_type, stored_path, size_bytes, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn attachments_for_update(&self, update_id: i64) -> Result<Vec<DbAttachment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, update_id, filename, content_type, stored_path, size_bytes, created_at
             FROM attachments WHERE update_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![update_id], |row| {
            Ok(DbAttachment {
                id: row.get(0)?,
                update_id: row.get(1)?,
                filename: row.get(2)?,
                content_type: row.get(3)?,
                stored_path: row.get(4)?,
                size_bytes: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    pub fn insert_metrics_record(&self, record: &NewMetricsRecord) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO metrics_records (update_id, company_id, source, metrics_json,
                                          reporting_period, reporting_date,
                                          extraction_confidence, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.update_id,
                record.company_id,
                record.source,
                record.metrics_json,
                record.reporting_period,
                record.reporting_date,
                record.extraction_confidence,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All metrics records for a company, newest first.
    pub fn metrics_for_company(&self, company_id: i64) -> Result<Vec<DbMetricsRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, update_id, company_id, source, metrics_json, reporting_period,
                    reporting_date, extraction_confidence, extracted_at
             FROM metrics_records WHERE company_id = ?1
             ORDER BY extracted_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![company_id], Self::map_metrics)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn metrics_for_update(&self, update_id: i64) -> Result<Vec<DbMetricsRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, update_id, company_id, source, metrics_json, reporting_period,
                    reporting_date, extraction_confidence, extracted_at
             FROM metrics_records WHERE update_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![update_id], Self::map_metrics)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn map_metrics(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbMetricsRecord> {
        Ok(DbMetricsRecord {
            id: row.get(0)?,
            update_id: row.get(1)?,
            company_id: row.get(2)?,
            source: row.get(3)?,
            metrics_json: row.get(4)?,
            reporting_period: row.get(5)?,
            reporting_date: row.get(6)?,
            extraction_confidence: row.get(7)?,
            extracted_at: row.get(8)?,
        })
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    pub fn insert_alert(
        &self,
        company_id: i64,
        tier: &str,
        days_since: i64,
    ) -> Result<i64, DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO alerts (company_id, tier, days_since, sent_at, resolved)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![company_id, tier, days_since, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// True if this company already has an unresolved alert at this tier.
    /// Firing is idempotent per (company, tier) until the silence resolves.
    pub fn unresolved_alert_exists(&self, company_id: i64, tier: &str) -> Result<bool, DbError> {
        let exists = self
            .conn
            .prepare(
                "SELECT 1 FROM alerts
                 WHERE company_id = ?1 AND tier = ?2 AND resolved = 0
                 LIMIT 1",
            )?
            .exists(params![company_id, tier])?;
        Ok(exists)
    }

    /// Resolve all open alerts for a company. Returns how many were closed.
    pub fn resolve_alerts(&self, company_id: i64) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        let n = self.conn.execute(
            "UPDATE alerts SET resolved = 1, resolved_at = ?1
             WHERE company_id = ?2 AND resolved = 0",
            params![now, company_id],
        )?;
        Ok(n)
    }

    /// All unresolved alerts across the portfolio, newest first.
    pub fn unresolved_alerts(&self) -> Result<Vec<DbAlert>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, tier, days_since, sent_at, resolved, resolved_at
             FROM alerts WHERE resolved = 0
             ORDER BY sent_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([], Self::map_alert)?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    pub fn alerts_for_company(&self, company_id: i64) -> Result<Vec<DbAlert>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, company_id, tier, days_since, sent_at, resolved, resolved_at
             FROM alerts WHERE company_id = ?1
             ORDER BY sent_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![company_id], Self::map_alert)?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(row?);
        }
        Ok(alerts)
    }

    fn map_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbAlert> {
        Ok(DbAlert {
            id: row.get(0)?,
            company_id: row.get(1)?,
            tier: row.get(2)?,
            days_since: row.get(3)?,
            sent_at: row.get(4)?,
            resolved: row.get(5)?,
            resolved_at: row.get(6)?,
        })
    }

    // =========================================================================
    // Stats
    // =========================================================================

    pub fn count_companies(&self) -> Result<i64, DbError> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM companies", [], |row| row.get(0))?;
        Ok(n)
    }

    pub fn count_portfolio_companies(&self) -> Result<i64, DbError> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM companies WHERE is_portfolio = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn count_updates(&self) -> Result<i64, DbError> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM updates", [], |row| row.get(0))?;
        Ok(n)
    }

    /// Updates dated on or after `since` (`YYYY-MM-DD`).
    pub fn count_updates_since(&self, since: &str) -> Result<i64, DbError> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM updates WHERE update_date >= ?1",
            params![since],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn count_unresolved_alerts(&self) -> Result<i64, DbError> {
        let n = self.conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE resolved = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of
    /// the test. Test temp dirs are cleaned up by the OS.
    pub(crate) fn test_db() -> TrackerDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test_tracker.db");
        std::mem::forget(dir);
        TrackerDb::open_at(path).expect("Failed to open test database")
    }

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        for table in ["companies", "contacts", "updates", "attachments", "metrics_records", "alerts"]
        {
            let count: i64 = db
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap_or_else(|e| panic!("{table} table should exist: {e}"));
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_insert_and_list_companies() {
        let db = test_db();
        let id = db.insert_company("Acme", true, Some("Fund II")).expect("insert");
        db.insert_company("Beta Labs", false, None).expect("insert");

        let all = db.list_companies().expect("list");
        assert_eq!(all.len(), 2);

        let portfolio = db.list_portfolio_companies().expect("list portfolio");
        assert_eq!(portfolio.len(), 1);
        assert_eq!(portfolio[0].id, id);
        assert_eq!(portfolio[0].fund.as_deref(), Some("Fund II"));
    }

    #[test]
    fn test_set_portfolio_promotes_company() {
        let db = test_db();
        let id = db.insert_company("Gamma", false, None).expect("insert");
        assert!(db.list_portfolio_companies().expect("list").is_empty());

        db.set_portfolio(id, true).expect("promote");
        assert_eq!(db.list_portfolio_companies().expect("list").len(), 1);
    }

    #[test]
    fn test_update_dedup_key() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");

        let update = NewUpdate {
            company_id: cid,
            subject: "May Investor Update".to_string(),
            update_date: "2026-05-03".to_string(),
            ..Default::default()
        };
        db.insert_update(&update).expect("first insert");

        assert!(db
            .update_exists(cid, "May Investor Update", "2026-05-03")
            .expect("exists"));
        assert!(!db
            .update_exists(cid, "May Investor Update", "2026-06-03")
            .expect("exists"));

        // Same key again violates the UNIQUE constraint
        assert!(db.insert_update(&update).is_err());
    }

    #[test]
    fn test_latest_update_date() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");
        assert!(db.latest_update_date(cid).expect("latest").is_none());

        for date in ["2026-03-01", "2026-05-03", "2026-04-15"] {
            db.insert_update(&NewUpdate {
                company_id: cid,
                subject: format!("Update {date}"),
                update_date: date.to_string(),
                ..Default::default()
            })
            .expect("insert");
        }
        assert_eq!(
            db.latest_update_date(cid).expect("latest").as_deref(),
            Some("2026-05-03")
        );
    }

    #[test]
    fn test_touch_last_update_never_regresses() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");

        db.touch_last_update(cid, "2026-05-03").expect("touch");
        db.touch_last_update(cid, "2026-04-01").expect("touch older");

        let company = db.get_company(cid).expect("get").expect("present");
        assert_eq!(company.last_update_at.as_deref(), Some("2026-05-03"));
    }

    #[test]
    fn test_alert_lifecycle() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");

        db.insert_alert(cid, "1_month", 35).expect("insert alert");
        assert!(db.unresolved_alert_exists(cid, "1_month").expect("exists"));
        assert!(!db.unresolved_alert_exists(cid, "2_month").expect("exists"));

        let resolved = db.resolve_alerts(cid).expect("resolve");
        assert_eq!(resolved, 1);
        assert!(!db.unresolved_alert_exists(cid, "1_month").expect("exists"));
        assert_eq!(db.count_unresolved_alerts().expect("count"), 0);

        let history = db.alerts_for_company(cid).expect("history");
        assert_eq!(history.len(), 1);
        assert!(history[0].resolved);
        assert!(history[0].resolved_at.is_some());
    }

    #[test]
    fn test_metrics_records_round_trip() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");
        let uid = db
            .insert_update(&NewUpdate {
                company_id: cid,
                subject: "May Update".to_string(),
                update_date: "2026-05-03".to_string(),
                ..Default::default()
            })
            .expect("insert update");

        let json = r#"{"current_arr":{"raw":"$1.2M","value":1200000.0,"display":"$1.2M"}}"#;
        db.insert_metrics_record(&NewMetricsRecord {
            update_id: uid,
            company_id: cid,
            source: "body".to_string(),
            metrics_json: json.to_string(),
            reporting_period: Some("Q2 2026".to_string()),
            reporting_date: Some("2026-05-01".to_string()),
            extraction_confidence: Some("high".to_string()),
        })
        .expect("insert");
        db.insert_metrics_record(&NewMetricsRecord {
            update_id: uid,
            company_id: cid,
            source: "deck_may.pdf".to_string(),
            metrics_json: json.to_string(),
            ..Default::default()
        })
        .expect("insert");

        let records = db.metrics_for_update(uid).expect("query");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, "body");
        assert_eq!(records[0].reporting_period.as_deref(), Some("Q2 2026"));
        assert_eq!(records[0].reporting_date.as_deref(), Some("2026-05-01"));
        assert_eq!(records[0].extraction_confidence.as_deref(), Some("high"));
        assert_eq!(records[1].source, "deck_may.pdf");
        assert!(records[1].reporting_period.is_none());

        let by_company = db.metrics_for_company(cid).expect("query");
        assert_eq!(by_company.len(), 2);
    }

    #[test]
    fn test_contacts_primary_first() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");
        db.insert_contact(cid, Some("Ana"), "ana@acme.example", Some("CFO"), false)
            .expect("insert");
        db.insert_contact(cid, Some("Ben"), "ben@acme.example", Some("CEO"), true)
            .expect("insert");

        let contacts = db.contacts_for_company(cid).expect("query");
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].email, "ben@acme.example");
        assert!(contacts[0].is_primary);
        assert!(!contacts[0].bounced);
    }

    #[test]
    fn test_insert_contact_is_unique_per_company_email() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");
        let first = db
            .insert_contact(cid, Some("Ana"), "ana@acme.example", None, false)
            .expect("insert");
        // Same address again folds into the existing row
        let second = db
            .insert_contact(cid, None, "ana@acme.example", Some("CFO"), true)
            .expect("re-insert");
        assert_eq!(first, second);

        let contacts = db.contacts_for_company(cid).expect("query");
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name.as_deref(), Some("Ana"));
        assert_eq!(contacts[0].job_title.as_deref(), Some("CFO"));
        assert!(contacts[0].is_primary);
    }

    #[test]
    fn test_set_contact_bounced() {
        let db = test_db();
        let cid = db.insert_company("Acme", true, None).expect("insert");
        db.insert_contact(cid, None, "ana@acme.example", None, false)
            .expect("insert");

        let n = db
            .set_contact_bounced(cid, "ana@acme.example", true)
            .expect("flag");
        assert_eq!(n, 1);
        assert!(db.contacts_for_company(cid).expect("query")[0].bounced);

        db.set_contact_bounced(cid, "ana@acme.example", false)
            .expect("clear");
        assert!(!db.contacts_for_company(cid).expect("query")[0].bounced);

        let n = db
            .set_contact_bounced(cid, "nobody@acme.example", true)
            .expect("miss");
        assert_eq!(n, 0);
    }

    #[test]
    fn test_merge_company_moves_everything_and_deletes_source() {
        let db = test_db();
        let keep = db.insert_company("Acme", true, None).expect("insert");
        let dupe = db.insert_company("Acme Inc", true, None).expect("insert");

        db.insert_contact(keep, None, "shared@acme.example", None, false)
            .expect("contact");
        db.insert_contact(dupe, None, "shared@acme.example", None, false)
            .expect("dupe contact");
        db.insert_contact(dupe, None, "only@acme.example", None, true)
            .expect("contact");

        let moved_uid = db
            .insert_update(&NewUpdate {
                company_id: dupe,
                subject: "June Update".to_string(),
                update_date: "2026-06-01".to_string(),
                ..Default::default()
            })
            .expect("update");
        db.insert_metrics_record(&NewMetricsRecord {
            update_id: moved_uid,
            company_id: dupe,
            source: "body".to_string(),
            metrics_json: "{}".to_string(),
            ..Default::default()
        })
        .expect("metrics");
        db.insert_alert(dupe, "1_month", 35).expect("alert");

        db.merge_company(dupe, keep).expect("merge");

        assert!(db.get_company(dupe).expect("get").is_none());
        let contacts = db.contacts_for_company(keep).expect("contacts");
        assert_eq!(contacts.len(), 2);

        let updates = db.updates_for_company(keep).expect("updates");
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].id, moved_uid);
        assert_eq!(db.metrics_for_company(keep).expect("metrics").len(), 1);

        // Open alerts on the source are closed, and history follows
        assert_eq!(db.count_unresolved_alerts().expect("count"), 0);
        assert_eq!(db.alerts_for_company(keep).expect("alerts").len(), 1);

        let company = db.get_company(keep).expect("get").expect("present");
        assert_eq!(company.last_update_at.as_deref(), Some("2026-06-01"));
    }
}
