//! Free-form financial value parsing and canonical formatting.
//!
//! Portfolio updates report numbers however the founder felt like writing
//! them ("~$8.000M", "24+ months", "25 percent"). These helpers parse that
//! text into canonical numeric values and render canonical display strings
//! ("$8.0M", "2.0 years", "+25.0%"). All parse functions are pure and
//! total: unparseable input yields `None`, never a panic.

use std::sync::OnceLock;

use regex::Regex;

/// The literal sentinel the extraction oracle uses for metrics it could
/// not find in the source.
pub const NOT_AVAILABLE: &str = "N/A";

// Compile-once regex patterns via OnceLock.
fn re_currency_millions() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\$(\d+(?:\.\d+)?)\s*M(?:illion)?").unwrap())
}

fn re_currency_thousands() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\$(\d+(?:\.\d+)?)\s*K(?:\s*thousand)?").unwrap())
}

fn re_currency_plain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$(\d+(?:,\d{3})*(?:\.\d+)?)").unwrap())
}

fn re_bare_millions() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*M(?:illion)?\b").unwrap())
}

fn re_bare_thousands() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*K\b").unwrap())
}

fn re_bare_plain() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:,\d{3})*(?:\.\d+)?)").unwrap())
}

fn re_percentage() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)([+-]?\d+(?:\.\d+)?)\s*(?:%|percent)").unwrap())
}

fn re_duration_range() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*[-–]\s*(\d+(?:\.\d+)?)\s*(months?|years?)").unwrap()
    })
}

fn re_duration_months() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\+?\s*months?").unwrap())
}

fn re_duration_years() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\+?\s*years?").unwrap())
}

fn re_qualifier_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\s*(?:~|approximately|approx\.?|about|around)\s*").unwrap())
}

/// Whether the text describes a change qualitatively with no usable number
/// ("revenue increased nicely").
fn is_qualitative_only(text: &str) -> bool {
    let lower = text.to_lowercase();
    (lower.contains("increased") || lower.contains("improved") || lower.contains("decreased"))
        && !text.chars().any(|c| c.is_ascii_digit())
}

fn empty_or_na(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_AVAILABLE)
}

/// Parse a free-form currency string into dollars.
///
/// Tries patterns in priority order: `$` + M suffix, `$` + K suffix, plain
/// `$` amount, then the same three without the `$` prefix. First match
/// wins. Leading qualifiers ("~", "approximately", "about") are stripped.
///
/// ```
/// use foliotrack::normalize::parse_currency;
/// assert_eq!(parse_currency("$1.2M"), Some(1_200_000.0));
/// assert_eq!(parse_currency("~$150K"), Some(150_000.0));
/// assert_eq!(parse_currency("revenue improved"), None);
/// ```
pub fn parse_currency(text: &str) -> Option<f64> {
    if empty_or_na(text) || is_qualitative_only(text) {
        return None;
    }
    let cleaned = re_qualifier_prefix().replace(text.trim(), "");

    if let Some(caps) = re_currency_millions().captures(&cleaned) {
        return caps[1].parse::<f64>().ok().map(|v| v * 1_000_000.0);
    }
    if let Some(caps) = re_currency_thousands().captures(&cleaned) {
        return caps[1].parse::<f64>().ok().map(|v| v * 1_000.0);
    }
    if let Some(caps) = re_currency_plain().captures(&cleaned) {
        return caps[1].replace(',', "").parse::<f64>().ok();
    }
    if let Some(caps) = re_bare_millions().captures(&cleaned) {
        return caps[1].parse::<f64>().ok().map(|v| v * 1_000_000.0);
    }
    if let Some(caps) = re_bare_thousands().captures(&cleaned) {
        return caps[1].parse::<f64>().ok().map(|v| v * 1_000.0);
    }
    if let Some(caps) = re_bare_plain().captures(&cleaned) {
        return caps[1].replace(',', "").parse::<f64>().ok();
    }
    None
}

/// Parse a percentage string ("+15%", "-5.2%", "25 percent") into a float.
pub fn parse_percentage(text: &str) -> Option<f64> {
    if empty_or_na(text) {
        return None;
    }
    let caps = re_percentage().captures(text.trim())?;
    caps[1].parse::<f64>().ok()
}

/// Parse a duration ("18 months", "2.5 years", "24+ months") into months.
///
/// Ranges like "12-18 months" normalize to their midpoint.
pub fn parse_duration_months(text: &str) -> Option<f64> {
    if empty_or_na(text) {
        return None;
    }
    let trimmed = text.trim();

    if let Some(caps) = re_duration_range().captures(trimmed) {
        let lo: f64 = caps[1].parse().ok()?;
        let hi: f64 = caps[2].parse().ok()?;
        let mid = (lo + hi) / 2.0;
        return Some(if caps[3].to_lowercase().starts_with("year") {
            mid * 12.0
        } else {
            mid
        });
    }
    if let Some(caps) = re_duration_months().captures(trimmed) {
        return caps[1].parse::<f64>().ok();
    }
    if let Some(caps) = re_duration_years().captures(trimmed) {
        return caps[1].parse::<f64>().ok().map(|v| v * 12.0);
    }
    None
}

/// Parse a plain count ("50 clients", "1,200") into a float.
///
/// Used for customer/headcount metrics where `$` and `%` don't apply.
pub fn parse_count(text: &str) -> Option<f64> {
    if empty_or_na(text) {
        return None;
    }
    let caps = re_bare_plain().captures(text.trim())?;
    caps[1].replace(',', "").parse::<f64>().ok()
}

/// Render dollars canonically: `$1.2M`, `$150K`, `$850`.
pub fn format_currency(value: f64) -> String {
    if value >= 1_000_000.0 {
        format!("${:.1}M", value / 1_000_000.0)
    } else if value >= 1_000.0 {
        format!("${:.0}K", value / 1_000.0)
    } else {
        format!("${}", group_thousands(value))
    }
}

/// Render a percentage canonically with an explicit sign: `+15.0%`, `-5.2%`.
pub fn format_percentage(value: f64) -> String {
    format!("{:+.1}%", value)
}

/// Render a duration canonically: `1.5 years` at or above 12 months,
/// whole `months` below.
pub fn format_duration(months: f64) -> String {
    if months >= 12.0 {
        format!("{:.1} years", months / 12.0)
    } else {
        format!("{:.0} months", months)
    }
}

/// Render a count canonically with thousands separators.
pub fn format_count(value: f64) -> String {
    group_thousands(value)
}

/// Group an f64's integer part with comma separators ("1234567" → "1,234,567").
fn group_thousands(value: f64) -> String {
    let raw = format!("{:.0}", value);
    let (sign, digits) = match raw.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", raw.as_str()),
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    format!("{}{}", sign, out)
}
