//! LLM-backed extraction oracle.
//!
//! Two operations, both prompt-shaped: classify a forwarded email as a
//! company update (or not), and pull financial metrics out of update
//! content. The oracle returns raw strings exactly as they appear in the
//! source ("$1.2M", "24+ months"); normalization happens downstream.
//!
//! Transport failures are retried with backoff. A response that parses
//! but contains no JSON object is permanent for that item — the model
//! has already answered, so retrying only burns budget.

use serde::Deserialize;
use serde_json::json;

use crate::config::OracleConfig;
use crate::error::OracleError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub use crate::normalize::NOT_AVAILABLE;

fn na() -> String {
    NOT_AVAILABLE.to_string()
}

/// The oracle's verdict on one forwarded email.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Classification {
    pub is_company_update: bool,
    pub company_name: String,
    pub is_portfolio_company: bool,
    pub confidence: f64,
    pub original_sender: Option<String>,
    pub update_type: Option<String>,
    pub key_topics: Vec<String>,
    pub summary: Option<String>,
    pub reasoning: Option<String>,
}

/// Raw metric strings from one extraction pass, exactly as the source
/// wrote them. Absent metrics default to [`NOT_AVAILABLE`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawMetrics {
    pub reporting_period: String,
    pub reporting_date: String,
    pub mrr: String,
    pub arr: String,
    pub qrr: String,
    pub total_revenue: String,
    pub gross_revenue: String,
    pub net_revenue: String,
    pub mrr_growth: String,
    pub arr_growth: String,
    pub revenue_growth_yoy: String,
    pub revenue_growth_mom: String,
    pub cash_balance: String,
    pub net_burn: String,
    pub gross_burn: String,
    pub runway_months: String,
    pub gross_margin: String,
    pub ebitda: String,
    pub ebitda_margin: String,
    pub net_income: String,
    pub customer_count: String,
    pub new_customers: String,
    pub churn_rate: String,
    pub ltv: String,
    pub cac: String,
    pub team_size: String,
    pub bookings: String,
    pub pipeline: String,
    pub key_highlights: String,
    pub key_challenges: String,
    pub funding_status: String,
    pub extraction_confidence: String,
}

impl Default for RawMetrics {
    fn default() -> Self {
        Self {
            reporting_period: na(),
            reporting_date: na(),
            mrr: na(),
            arr: na(),
            qrr: na(),
            total_revenue: na(),
            gross_revenue: na(),
            net_revenue: na(),
            mrr_growth: na(),
            arr_growth: na(),
            revenue_growth_yoy: na(),
            revenue_growth_mom: na(),
            cash_balance: na(),
            net_burn: na(),
            gross_burn: na(),
            runway_months: na(),
            gross_margin: na(),
            ebitda: na(),
            ebitda_margin: na(),
            net_income: na(),
            customer_count: na(),
            new_customers: na(),
            churn_rate: na(),
            ltv: na(),
            cac: na(),
            team_size: na(),
            bookings: na(),
            pipeline: na(),
            key_highlights: String::new(),
            key_challenges: String::new(),
            funding_status: na(),
            extraction_confidence: "low".to_string(),
        }
    }
}

impl RawMetrics {
    /// The target metric fields by name, in a stable order. The side
    /// fields (reporting period, highlights, confidence) are not metrics
    /// and are excluded here.
    pub fn metric_fields(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("mrr", self.mrr.as_str()),
            ("arr", self.arr.as_str()),
            ("qrr", self.qrr.as_str()),
            ("total_revenue", self.total_revenue.as_str()),
            ("gross_revenue", self.gross_revenue.as_str()),
            ("net_revenue", self.net_revenue.as_str()),
            ("mrr_growth", self.mrr_growth.as_str()),
            ("arr_growth", self.arr_growth.as_str()),
            ("revenue_growth_yoy", self.revenue_growth_yoy.as_str()),
            ("revenue_growth_mom", self.revenue_growth_mom.as_str()),
            ("cash_balance", self.cash_balance.as_str()),
            ("net_burn", self.net_burn.as_str()),
            ("gross_burn", self.gross_burn.as_str()),
            ("runway_months", self.runway_months.as_str()),
            ("gross_margin", self.gross_margin.as_str()),
            ("ebitda", self.ebitda.as_str()),
            ("ebitda_margin", self.ebitda_margin.as_str()),
            ("net_income", self.net_income.as_str()),
            ("customer_count", self.customer_count.as_str()),
            ("new_customers", self.new_customers.as_str()),
            ("churn_rate", self.churn_rate.as_str()),
            ("ltv", self.ltv.as_str()),
            ("cac", self.cac.as_str()),
            ("team_size", self.team_size.as_str()),
            ("bookings", self.bookings.as_str()),
            ("pipeline", self.pipeline.as_str()),
        ]
    }
}

/// Envelope fields the classification prompt needs.
#[derive(Debug, Clone)]
pub struct EmailEnvelope {
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
}

/// The seam between the pipeline and the LLM. Implemented by the real
/// API client in production and by scripted fakes in tests.
pub trait ExtractionOracle {
    /// Classify a forwarded email against the known portfolio names.
    fn classify_update(
        &self,
        email: &EmailEnvelope,
        portfolio_names: &[String],
    ) -> Result<Classification, OracleError>;

    /// Extract raw metric strings from one content source (the email
    /// body or one attachment's extracted text).
    fn extract_metrics(
        &self,
        company_name: &str,
        source_label: &str,
        content: &str,
    ) -> Result<RawMetrics, OracleError>;
}

// =============================================================================
// Prompt builders
// =============================================================================

/// Build the classification prompt. Name-variation hints keep the model
/// flexible about "VALIDIC" vs "Validic" and "Equity Shift Inc." vs
/// "Equity Shift".
pub fn build_classification_prompt(email: &EmailEnvelope, portfolio_names: &[String]) -> String {
    let mut company_list = String::new();
    for name in portfolio_names {
        company_list.push_str("- ");
        company_list.push_str(name);
        if !name.contains("Inc") && !name.contains("LLC") {
            company_list.push_str(&format!(
                " (may also appear as {} Inc, {} LLC)",
                name, name
            ));
        }
        company_list.push('\n');
    }

    let mut prompt = String::new();
    prompt.push_str(
        "You are analyzing an email to determine if it contains a company update. \
         This email was forwarded by a venture capital fund partner.\n\n",
    );
    prompt.push_str("KNOWN PORTFOLIO COMPANIES (be flexible with company name variations):\n");
    prompt.push_str(&company_list);
    prompt.push_str("\nEMAIL TO ANALYZE:\n");
    prompt.push_str(&format!("Subject: {}\n", email.subject));
    prompt.push_str(&format!("From: {}\n", email.sender));
    prompt.push_str(&format!("Date: {}\n\n", email.date));
    prompt.push_str("Body:\n");
    prompt.push_str(&email.body);
    prompt.push_str("\n\nANALYSIS INSTRUCTIONS:\n");
    prompt.push_str(
        "1. Determine if this email contains an update from ANY company (portfolio or not)\n\
         2. Look for forwarded emails, investor updates, monthly reports, quarterly updates\n\
         3. Be VERY FLEXIBLE with company names - \"VALIDIC\" matches \"Validic\", \
         \"Equity Shift Inc.\" matches \"Equity Shift\", \"Trayecto Letter\" matches \"Trayecto\"\n\
         4. If the company is in the list above, mark is_portfolio_company as true\n\
         5. If it is a legitimate company update from a company NOT in the list, \
         mark is_portfolio_company as false\n\
         6. Use the exact name from the portfolio list when it matches, otherwise the name \
         as it appears in the email\n\n",
    );
    prompt.push_str("Respond in JSON format:\n");
    prompt.push_str(
        "{\n    \"is_company_update\": true/false,\n    \"company_name\": \"...\",\n    \
         \"is_portfolio_company\": true/false,\n    \"confidence\": 0.0-1.0,\n    \
         \"original_sender\": \"email address of the actual company sender if identifiable\",\n    \
         \"update_type\": \"monthly/quarterly/special/funding/other\",\n    \
         \"key_topics\": [\"...\"],\n    \"summary\": \"brief summary of the update\",\n    \
         \"reasoning\": \"why you classified it this way\"\n}\n\n",
    );
    prompt.push_str("Only respond with valid JSON.");
    prompt
}

/// Build the metrics extraction prompt for one content source.
pub fn build_metrics_prompt(company_name: &str, source_label: &str, content: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "You are a financial analyst extracting key metrics from portfolio company updates.\n\n",
    );
    prompt.push_str(&format!("Company: {}\n", company_name));
    prompt.push_str(&format!("Source: {}\n\n", source_label));
    prompt.push_str(
        "Analyze the following content and extract financial metrics. Return ONLY a JSON \
         object with this structure:\n\n",
    );
    prompt.push_str(
        r#"{
    "reporting_period": "Q1 2026" or "May 2026" or "2025 Annual",
    "reporting_date": "best estimate in YYYY-MM-DD format",
    "mrr": "Monthly Recurring Revenue (e.g., '$112K', '$1.2M') or 'N/A'",
    "arr": "Annual Recurring Revenue (e.g., '$8.022M', '~$8.000M') or 'N/A'",
    "qrr": "Quarterly Recurring Revenue or 'N/A'",
    "total_revenue": "Total revenue for period or 'N/A'",
    "gross_revenue": "Gross revenue or 'N/A'",
    "net_revenue": "Net revenue or 'N/A'",
    "mrr_growth": "MRR growth rate (e.g., '+15%', '-5%') or 'N/A'",
    "arr_growth": "ARR growth rate or 'N/A'",
    "revenue_growth_yoy": "Year over year growth or 'N/A'",
    "revenue_growth_mom": "Month over month growth or 'N/A'",
    "cash_balance": "Current cash balance (e.g., '$2.8M') or 'N/A'",
    "net_burn": "Monthly net burn rate or 'N/A'",
    "gross_burn": "Monthly gross burn rate or 'N/A'",
    "runway_months": "Cash runway in months (e.g., '24+ months') or 'N/A'",
    "gross_margin": "Gross margin percentage (e.g., '72%') or 'N/A'",
    "ebitda": "EBITDA or 'N/A'",
    "ebitda_margin": "EBITDA margin or 'N/A'",
    "net_income": "Net income/loss or 'N/A'",
    "customer_count": "Total customers (e.g., '50 clients') or 'N/A'",
    "new_customers": "New customers in period or 'N/A'",
    "churn_rate": "Customer churn rate or 'N/A'",
    "ltv": "Lifetime value or 'N/A'",
    "cac": "Customer acquisition cost or 'N/A'",
    "team_size": "Number of employees or 'N/A'",
    "bookings": "New bookings/contracts or 'N/A'",
    "pipeline": "Sales pipeline value or 'N/A'",
    "key_highlights": "Key achievements and positive developments",
    "key_challenges": "Challenges and concerns mentioned",
    "funding_status": "Current funding status/notes or 'N/A'",
    "extraction_confidence": "high/medium/low based on clarity of data"
}
"#,
    );
    prompt.push_str(
        "\nKey guidelines:\n\
         - Preserve original formatting (e.g., \"$1.2M\", \"~$8.000M\", \"24+ months\")\n\
         - Use \"N/A\" for metrics not mentioned or unclear\n\
         - Be conservative with confidence - use \"low\" if uncertain\n\
         - Extract exact numbers and formatting as presented\n\n",
    );
    prompt.push_str("Content to analyze:\n");
    prompt.push_str(content);
    prompt
}

/// Find the first complete JSON object `{...}` in the text. Handles
/// responses wrapped in markdown fences or surrounded by prose.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape {
            escape = false;
            continue;
        }
        if b == b'\\' && in_string {
            escape = true;
            continue;
        }
        if b == b'"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Truncate at a character count, not bytes, so multi-byte content
/// never splits mid-char.
fn cap_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// =============================================================================
// API client
// =============================================================================

/// Messages API response shape (the parts we read).
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
struct ApiContent {
    #[serde(default)]
    text: String,
}

/// Blocking client for the Anthropic Messages API.
pub struct AnthropicOracle {
    client: reqwest::blocking::Client,
    api_key: String,
    config: OracleConfig,
    max_content_chars: usize,
}

impl AnthropicOracle {
    /// Build a client from config. The API key comes from the environment
    /// variable named in the config, never from the config file itself.
    pub fn new(config: &OracleConfig, max_content_chars: usize) -> Result<Self, OracleError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| OracleError::MissingApiKey(config.api_key_env.clone()))?;

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            config: config.clone(),
            max_content_chars,
        })
    }

    /// One round trip to the Messages API, returning the text content.
    fn complete_once(&self, prompt: &str) -> Result<String, OracleError> {
        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout(self.config.timeout_secs)
                } else {
                    OracleError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(OracleError::RateLimit);
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(OracleError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ApiResponse = response
            .json()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(parsed
            .content
            .first()
            .map(|c| c.text.clone())
            .unwrap_or_default())
    }

    /// Round trip with bounded retries. Only retryable errors (transport,
    /// timeout, rate limit) are retried; backoff doubles per attempt.
    fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let mut attempt = 0;
        loop {
            match self.complete_once(prompt) {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt + 1 < self.config.max_retries => {
                    let delay = 2u64.saturating_pow(attempt);
                    log::warn!(
                        "Oracle request failed (attempt {}/{}): {}; retrying in {}s",
                        attempt + 1,
                        self.config.max_retries,
                        e,
                        delay
                    );
                    std::thread::sleep(std::time::Duration::from_secs(delay));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn parse_response<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, OracleError> {
        let json_str = extract_json_object(text)
            .ok_or_else(|| OracleError::MalformedResponse(snippet(text)))?;
        serde_json::from_str(&json_str).map_err(|e| {
            OracleError::MalformedResponse(format!("{} in: {}", e, snippet(&json_str)))
        })
    }
}

fn snippet(text: &str) -> String {
    cap_chars(text.trim(), 200).to_string()
}

impl ExtractionOracle for AnthropicOracle {
    fn classify_update(
        &self,
        email: &EmailEnvelope,
        portfolio_names: &[String],
    ) -> Result<Classification, OracleError> {
        let prompt = build_classification_prompt(email, portfolio_names);
        let text = self.complete(&prompt)?;
        Self::parse_response(&text)
    }

    fn extract_metrics(
        &self,
        company_name: &str,
        source_label: &str,
        content: &str,
    ) -> Result<RawMetrics, OracleError> {
        let capped = cap_chars(content, self.max_content_chars);
        let prompt = build_metrics_prompt(company_name, source_label, capped);
        let text = self.complete(&prompt)?;
        Self::parse_response(&text)
    }
}
