//! Mail acquisition and MIME part classification.
//!
//! Forwarded investor updates arrive with wildly inconsistent MIME
//! structure, so attachment detection is deliberately aggressive: six
//! independent signals, any one of which marks a part as an attachment.
//! Conservative disposition-only detection misses decks sent inline and
//! PDFs without a filename parameter.
//!
//! The part classifier works on a plain [`PartInfo`] snapshot so each
//! signal is unit-testable without constructing real MIME trees.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use crate::error::MailError;

/// Content types treated as attachments even without a disposition header.
const DOCUMENT_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/zip",
    "application/x-zip-compressed",
    "application/octet-stream",
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/tiff",
    "text/csv",
];

/// Extensions that mark an inline part as a document (signal 3).
const DOCUMENT_EXTENSIONS: &[&str] = &[
    ".pdf", ".xlsx", ".xls", ".pptx", ".ppt", ".docx", ".doc", ".csv", ".zip", ".png", ".jpg",
    ".jpeg", ".gif", ".tiff",
];

/// Decoded header snapshot of one MIME part, as seen by the classifier.
#[derive(Debug, Clone, Default)]
pub struct PartInfo {
    /// Full `type/subtype`, lowercased (e.g. "application/pdf").
    pub content_type: Option<String>,
    /// Raw Content-Disposition value, lowercased ("attachment", "inline; ...").
    pub disposition: Option<String>,
    /// Decoded filename from the name/filename parameters, if present.
    pub filename: Option<String>,
    /// Content-Transfer-Encoding value, lowercased ("base64", ...).
    pub transfer_encoding: Option<String>,
}

/// Decide whether a MIME part is an attachment. Any of six signals fires:
///
/// 1. disposition is exactly "attachment"
/// 2. disposition merely mentions "attachment"
/// 3. an inline part carries a document-extension filename
/// 4. any other non-empty filename is present
/// 5. the content type is a known document type
/// 6. an `application/*` part is base64-encoded
pub fn classify_part(info: &PartInfo) -> bool {
    let content_type = info.content_type.as_deref().unwrap_or("");
    let disposition = info.disposition.as_deref().unwrap_or("");
    let filename = info.filename.as_deref().unwrap_or("").trim();

    if disposition == "attachment" || disposition.starts_with("attachment;") {
        return true;
    }
    if disposition.contains("attachment") {
        return true;
    }
    if disposition.contains("inline") && !filename.is_empty() {
        let lower = filename.to_lowercase();
        if DOCUMENT_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
            return true;
        }
    }
    if !filename.is_empty() {
        return true;
    }
    if DOCUMENT_CONTENT_TYPES.contains(&content_type) {
        return true;
    }
    if content_type.starts_with("application/")
        && info.transfer_encoding.as_deref() == Some("base64")
    {
        return true;
    }

    false
}

/// Synthesize a filename for an attachment that arrived without one.
/// `index` is 1-based within the message.
pub fn synthesize_filename(content_type: Option<&str>, index: usize) -> String {
    let extension = match content_type.unwrap_or("") {
        "application/pdf" => ".pdf",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/vnd.ms-powerpoint" => ".ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "text/csv" => ".csv",
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        _ => ".bin",
    };
    format!("attachment_{index}{extension}")
}

/// A detected attachment with its decoded payload.
#[derive(Debug, Clone)]
pub struct AttachmentPayload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// The parts of a message the pipeline cares about.
#[derive(Debug, Clone)]
pub struct EmailContent {
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub body: String,
    pub attachments: Vec<AttachmentPayload>,
}

/// Parse a raw RFC 5322 message and extract subject, sender, body text,
/// and attachments. Subject and body are truncated to the given caps
/// (character counts, not bytes).
pub fn parse_message(
    raw: &[u8],
    max_subject_chars: usize,
    max_body_chars: usize,
) -> Result<EmailContent, MailError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::Unparseable("not a valid RFC 5322 message".to_string()))?;

    let subject = truncate_chars(message.subject().unwrap_or(""), max_subject_chars);

    let sender = message
        .from()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| addr.address())
        .unwrap_or("")
        .to_string();

    let date = message
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    // Prefer the plain-text body; fall back to rendered HTML.
    let body = match message.body_text(0) {
        Some(text) => text.into_owned(),
        None => message
            .body_html(0)
            .and_then(|html| html2text::from_read(html.as_bytes(), 100).ok())
            .unwrap_or_default(),
    };
    let body = truncate_chars(body.trim(), max_body_chars);

    // Part ids already rendered as the body are never attachments.
    let body_ids: Vec<usize> = message
        .text_body
        .iter()
        .chain(message.html_body.iter())
        .copied()
        .collect();

    let mut attachments = Vec::new();
    for (id, part) in message.parts.iter().enumerate() {
        if body_ids.contains(&id) {
            continue;
        }
        let content_type = part.content_type().map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub).to_lowercase(),
            None => ct.ctype().to_lowercase(),
        });
        // Multipart containers hold structure, not payload
        if content_type
            .as_deref()
            .map(|ct| ct.starts_with("multipart/") || ct.starts_with("message/"))
            .unwrap_or(false)
        {
            continue;
        }

        let disposition = part.content_disposition().map(|cd| {
            let mut value = cd.ctype().to_lowercase();
            if cd.attribute("filename").is_some() {
                value.push_str("; filename");
            }
            value
        });

        let info = PartInfo {
            content_type: content_type.clone(),
            disposition,
            filename: part.attachment_name().map(|n| n.trim().to_string()),
            transfer_encoding: part
                .content_transfer_encoding()
                .map(|e| e.to_lowercase()),
        };

        if !classify_part(&info) {
            continue;
        }

        let filename = match info.filename.filter(|f| !f.is_empty()) {
            Some(f) => f,
            None => synthesize_filename(content_type.as_deref(), attachments.len() + 1),
        };

        attachments.push(AttachmentPayload {
            filename,
            content_type,
            data: part.contents().to_vec(),
        });
    }

    Ok(EmailContent {
        subject,
        sender,
        date,
        body,
        attachments,
    })
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// A raw message plus a stable identifier for logging.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub data: Vec<u8>,
}

/// Source of raw messages to ingest. The pipeline only ever sees raw
/// bytes, so sources can be a maildir-style directory, a test fixture,
/// or an IMAP client without the orchestrator caring.
pub trait MailSource {
    fn fetch(&self) -> Result<Vec<RawMessage>, MailError>;
}

/// Reads every `.eml` file from a directory, in filename order.
/// Forwarder and date-window filtering happen downstream, after parsing.
pub struct EmlDirSource {
    dir: PathBuf,
}

impl EmlDirSource {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl MailSource for EmlDirSource {
    fn fetch(&self) -> Result<Vec<RawMessage>, MailError> {
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| MailError::Mailbox(self.dir.display().to_string(), e))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| MailError::Mailbox(self.dir.display().to_string(), e))?
                .path();
            if path.extension().and_then(|e| e.to_str()) == Some("eml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::new();
        for path in paths {
            let data = fs::read(&path)?;
            let id = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("<unnamed>")
                .to_string();
            messages.push(RawMessage { id, data });
        }
        Ok(messages)
    }
}
