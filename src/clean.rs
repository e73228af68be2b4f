use regex::Regex;
use std::sync::LazyLock;

const MONEY_COLUMN_TOKENS: &[&str] = &["charge", "amount", "estimated", "min", "max"];
const MONEY_SENTINELS: &[&str] = &["", "none", "nan", "other", "other nonnumeric"];

static CITY_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r",\s*([A-Za-z .]+),\s*([A-Z]{2})\b").expect("valid city/state regex")
});
static STATE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2})\b").expect("valid state token regex"));

pub fn is_money_column(name: &str) -> bool {
    MONEY_COLUMN_TOKENS.iter().any(|token| name.contains(token))
}

/// Coerces a published price into a number.
///
/// Currency symbols, thousands separators and footnote marks are stripped;
/// sentinel text and anything left unparseable becomes `None`.
pub fn parse_money(raw: Option<&str>) -> Option<f64> {
    let trimmed = raw?.trim();
    if MONEY_SENTINELS
        .iter()
        .any(|s| trimmed.eq_ignore_ascii_case(s))
    {
        return None;
    }
    let digits: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E'))
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok()
}

/// Two-letter US state code from a free-text address.
pub fn extract_state(address: Option<&str>) -> Option<String> {
    let address = address?;
    if let Some(caps) = CITY_STATE.captures(address) {
        return caps.get(2).map(|m| m.as_str().to_string());
    }
    STATE_TOKEN
        .captures_iter(address)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
