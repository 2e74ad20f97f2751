//! Update classification with a confidence gate.
//!
//! The oracle answers "is this a company update, and from whom"; this
//! module decides whether to trust it. Three outcomes collapse to the
//! same answer — not an update, confidence below threshold, and a
//! malformed oracle response all mean "skip this message". Only
//! transport-level failures (after the oracle's own retries) surface
//! as errors.

use crate::error::OracleError;
use crate::oracle::{Classification, EmailEnvelope, ExtractionOracle};

/// Classify one email. `Ok(None)` means "not an update worth keeping",
/// for any of the reasons above.
pub fn classify(
    oracle: &dyn ExtractionOracle,
    email: &EmailEnvelope,
    portfolio_names: &[String],
    confidence_threshold: f64,
) -> Result<Option<Classification>, OracleError> {
    let classification = match oracle.classify_update(email, portfolio_names) {
        Ok(c) => c,
        Err(OracleError::MalformedResponse(snippet)) => {
            log::warn!(
                "Unparseable classification for '{}': {}",
                email.subject,
                snippet
            );
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    if !classification.is_company_update {
        log::debug!(
            "Not a company update: '{}' ({})",
            email.subject,
            classification.reasoning.as_deref().unwrap_or("no reasoning")
        );
        return Ok(None);
    }

    if classification.confidence < confidence_threshold {
        log::info!(
            "Low confidence ({:.2} < {:.2}) for '{}' from {}; skipping",
            classification.confidence,
            confidence_threshold,
            email.subject,
            classification.company_name
        );
        return Ok(None);
    }

    if classification.company_name.trim().is_empty() {
        log::warn!("Update classified without a company name: '{}'", email.subject);
        return Ok(None);
    }

    Ok(Some(classification))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::RawMetrics;

    struct FixedOracle {
        result: Result<Classification, fn() -> OracleError>,
    }

    impl ExtractionOracle for FixedOracle {
        fn classify_update(
            &self,
            _email: &EmailEnvelope,
            _portfolio_names: &[String],
        ) -> Result<Classification, OracleError> {
            match &self.result {
                Ok(c) => Ok(c.clone()),
                Err(make) => Err(make()),
            }
        }

        fn extract_metrics(
            &self,
            _company_name: &str,
            _source_label: &str,
            _content: &str,
        ) -> Result<RawMetrics, OracleError> {
            Ok(RawMetrics::default())
        }
    }

    fn email() -> EmailEnvelope {
        EmailEnvelope {
            subject: "Fwd: Acme May Update".to_string(),
            sender: "partner@fund.example".to_string(),
            date: "2026-05-03".to_string(),
            body: "ARR hit $1.2M".to_string(),
        }
    }

    fn update(confidence: f64) -> Classification {
        Classification {
            is_company_update: true,
            company_name: "Acme".to_string(),
            is_portfolio_company: true,
            confidence,
            ..Default::default()
        }
    }

    #[test]
    fn test_confident_update_passes() {
        let oracle = FixedOracle {
            result: Ok(update(0.92)),
        };
        let result = classify(&oracle, &email(), &[], 0.7).expect("classify");
        assert_eq!(result.map(|c| c.company_name).as_deref(), Some("Acme"));
    }

    #[test]
    fn test_below_threshold_is_skipped() {
        let oracle = FixedOracle {
            result: Ok(update(0.55)),
        };
        assert!(classify(&oracle, &email(), &[], 0.7).expect("classify").is_none());
    }

    #[test]
    fn test_not_an_update_is_skipped() {
        let mut c = update(0.95);
        c.is_company_update = false;
        let oracle = FixedOracle { result: Ok(c) };
        assert!(classify(&oracle, &email(), &[], 0.7).expect("classify").is_none());
    }

    #[test]
    fn test_malformed_response_is_skipped_not_fatal() {
        let oracle = FixedOracle {
            result: Err(|| OracleError::MalformedResponse("no json here".to_string())),
        };
        assert!(classify(&oracle, &email(), &[], 0.7).expect("classify").is_none());
    }

    #[test]
    fn test_transport_error_propagates() {
        let oracle = FixedOracle {
            result: Err(|| OracleError::Transport("connection refused".to_string())),
        };
        assert!(classify(&oracle, &email(), &[], 0.7).is_err());
    }

    #[test]
    fn test_missing_company_name_is_skipped() {
        let mut c = update(0.9);
        c.company_name = "  ".to_string();
        let oracle = FixedOracle { result: Ok(c) };
        assert!(classify(&oracle, &email(), &[], 0.7).expect("classify").is_none());
    }
}
