//! Brazilian currency amounts (`1.234,56`).

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

/// The whole digit run written after `R$`, separators included. A trailing
/// `.` or `,` that ends a sentence is left out of the capture. Whether the
/// run is a well-formed amount is decided by [`parse_brl`].
pub const AMOUNT_PATTERN: &str = r"([\d.,]*\d)(?:[^\d.,]|[.,](?:\D|$)|$)";

/// Thousands-grouped with dots or a plain digit run, each with up to two
/// decimals after a comma.
static WELL_FORMED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d{1,3}(?:\.\d{3})+|\d+)(?:,\d{1,2})?$").unwrap());

/// Parse a `1.234,56`-style amount. Returns `None` for malformed runs such
/// as `10.50`, `1234,567` or `1.234.56` rather than guessing at a prefix.
pub fn parse_brl(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    if !WELL_FORMED.is_match(raw) {
        return None;
    }
    let normalized = raw.replace('.', "").replace(',', ".");
    Decimal::from_str(&normalized).ok()
}

/// Render an amount the way the gazette prints it, always with two decimals.
pub fn format_brl(value: Decimal) -> String {
    let rounded = format!("{:.2}", value.round_dp(2));
    let (sign, digits) = match rounded.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", rounded.as_str()),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped},{frac_part}")
}
