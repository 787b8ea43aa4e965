//! Number and code normalization.

use rust_decimal::Decimal;
use std::str::FromStr;

use super::patterns::NUMERIC_TOKEN;

/// Parse a formatted number (e.g., "1,234.56", "1.234,56", "1 234.56" or "12,5").
///
/// Returns `None` for empty or unparseable input.
pub fn parse_number(s: &str) -> Option<Decimal> {
    // Remove spaces and non-breaking spaces
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let comma_pos = compact.rfind(',');
    let dot_pos = compact.rfind('.');
    let comma_count = compact.matches(',').count();

    let normalized = match (comma_pos, dot_pos) {
        // European: 1.234,56 or 12,5
        (Some(c), Some(d)) if c > d => compact.replace('.', "").replace(',', "."),
        // A lone comma is decimal unless exactly three digits follow it.
        (Some(c), None) if comma_count == 1 && compact.len() - c - 1 != 3 => {
            compact.replace(',', ".")
        }
        _ => compact.replace(',', ""),
    };

    let cleaned: String = normalized
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        .collect();
    let cleaned = cleaned.trim_start_matches('+');

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    Decimal::from_str(cleaned).ok()
}

/// Normalize a Harmonized System code.
///
/// Separators are stripped; the result must be a run of 6 to 10 digits.
pub fn normalize_hs_code(s: &str) -> Option<String> {
    let stripped: String = s
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | '-' | '/' | '\u{00a0}'))
        .collect();

    if (6..=10).contains(&stripped.len()) && stripped.chars().all(|c| c.is_ascii_digit()) {
        Some(stripped)
    } else {
        None
    }
}

/// Whether a single whitespace-free token looks like a number.
pub fn is_numeric_token(token: &str) -> bool {
    NUMERIC_TOKEN.is_match(token.trim())
}
