//! Runtime configuration for the tracker.
//!
//! Everything fund-specific — who forwards portfolio mail, who gets CC'd on
//! escalations, alert thresholds — lives here rather than in module-level
//! constants, so the pipeline is fund-agnostic and testable with fixture
//! configs. Loaded from `~/.foliotrack/config.json`; every field has a
//! default so a missing file still yields a runnable (if empty) config.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Addresses the alert engine copies on outgoing mail, grouped by role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoleRecipients {
    pub general_partners: Vec<String>,
    pub partners: Vec<String>,
    pub eirs: Vec<String>,
}

impl RoleRecipients {
    /// The full escalation CC list: GPs, partners, and EIRs combined.
    pub fn escalation_cc(&self) -> Vec<String> {
        let mut cc = self.general_partners.clone();
        cc.extend(self.partners.iter().cloned());
        cc.extend(self.eirs.iter().cloned());
        cc
    }
}

/// Days of silence before each alert tier becomes due.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlertThresholds {
    pub one_month: i64,
    pub two_month: i64,
    pub escalation: i64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        // 1 month + 1 day, 2 months + 2 days, 3 months + 3 days
        Self {
            one_month: 31,
            two_month: 62,
            escalation: 93,
        }
    }
}

/// Extraction oracle transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OracleConfig {
    /// Environment variable holding the API key. The key itself is never
    /// written to the config file.
    pub api_key_env: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Bounded retries for transient transport failures. Malformed
    /// responses are never retried.
    pub max_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2000,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

/// Top-level tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Senders whose forwarded mail the pipeline ingests.
    pub forwarders: Vec<String>,
    /// Fund team addresses by role, for escalation CC.
    pub recipients: RoleRecipients,
    /// Minimum oracle confidence to persist a classified update.
    pub confidence_threshold: f64,
    pub alert_thresholds: AlertThresholds,
    pub oracle: OracleConfig,
    /// Directory of raw `.eml` messages to ingest from.
    pub mailbox_dir: PathBuf,
    /// Where attachment payloads are written (one subdir per company).
    pub attachments_dir: PathBuf,
    /// Stored update body cap, in characters.
    pub max_body_chars: usize,
    /// Stored subject cap, in characters.
    pub max_subject_chars: usize,
    /// Content cap per oracle prompt, in characters.
    pub max_prompt_content_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        let base = state_dir();
        Self {
            forwarders: Vec::new(),
            recipients: RoleRecipients::default(),
            confidence_threshold: 0.7,
            alert_thresholds: AlertThresholds::default(),
            oracle: OracleConfig::default(),
            mailbox_dir: base.join("mailbox"),
            attachments_dir: base.join("attachments"),
            max_body_chars: 10_000,
            max_subject_chars: 500,
            max_prompt_content_chars: 8_000,
        }
    }
}

/// Resolve the tracker state directory: `~/.foliotrack`.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".foliotrack")
}

/// Default config file path: `~/.foliotrack/config.json`.
pub fn config_path() -> PathBuf {
    state_dir().join("config.json")
}

impl Config {
    /// Load config from the default path, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> Result<Self, PipelineError> {
        Self::load_from(&config_path())
    }

    /// Load config from an explicit path. Useful for testing.
    pub fn load_from(path: &std::path::Path) -> Result<Self, PipelineError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("parse {}: {}", path.display(), e)))
    }

    /// Write config to the default path, creating the state dir if needed.
    pub fn save(&self) -> Result<(), PipelineError> {
        let path = config_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(format!("serialize config: {}", e)))?;
        fs::write(&path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.confidence_threshold, 0.7);
        assert_eq!(cfg.alert_thresholds.one_month, 31);
        assert_eq!(cfg.alert_thresholds.two_month, 62);
        assert_eq!(cfg.alert_thresholds.escalation, 93);
        assert_eq!(cfg.max_body_chars, 10_000);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert!(cfg.forwarders.is_empty());
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut cfg = Config::default();
        cfg.forwarders = vec!["partner@fund.example".to_string()];
        cfg.recipients.general_partners = vec!["gp@fund.example".to_string()];

        let raw = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.forwarders, cfg.forwarders);
        assert_eq!(
            back.recipients.escalation_cc(),
            vec!["gp@fund.example".to_string()]
        );
    }

    #[test]
    fn test_escalation_cc_combines_roles() {
        let recipients = RoleRecipients {
            general_partners: vec!["gp1@f.example".into(), "gp2@f.example".into()],
            partners: vec!["p@f.example".into()],
            eirs: vec!["eir@f.example".into()],
        };
        assert_eq!(recipients.escalation_cc().len(), 4);
    }
}
