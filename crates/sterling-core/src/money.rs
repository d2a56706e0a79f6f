//! Money parsing and comparison helpers.
//!
//! Every monetary figure in the system is an `f64` rounded to two decimal
//! places at the boundary where it enters. Integrity cross-checks compare
//! with an absolute tolerance of one penny ([`defaults::MONEY_TOLERANCE`]).

use crate::defaults;

/// Round to two decimal places (banker's-free, half-away-from-zero).
#[inline]
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compare two amounts at 2 dp with the standard one-penny tolerance.
#[inline]
pub fn amounts_match(a: f64, b: f64) -> bool {
    (round2(a) - round2(b)).abs() <= defaults::MONEY_TOLERANCE + 1e-9
}

/// Parse a monetary string into a signed, 2 dp-rounded value.
///
/// Accepts the forms that show up in real statements and payslips:
/// currency symbols (`£`, `$`, `€`), thousands separators, leading signs,
/// parenthesized negatives (`(850.00)`), and trailing `CR`/`DR` markers
/// (`DR` negates). Returns `None` when no numeric value can be recovered;
/// callers must not fall back to zero.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let mut s = raw.trim().to_uppercase();
    if s.is_empty() {
        return None;
    }

    let mut negative = false;

    if s.len() >= 2 && s.starts_with('(') && s.ends_with(')') {
        negative = true;
        s = s[1..s.len() - 1].trim().to_string();
    }

    if let Some(stripped) = s.strip_suffix("DR") {
        negative = true;
        s = stripped.trim_end().to_string();
    } else if let Some(stripped) = s.strip_suffix("CR") {
        s = stripped.trim_end().to_string();
    }

    let mut cleaned = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '£' | '$' | '€' | ',' | ' ' | '\u{a0}' => {}
            _ => cleaned.push(c),
        }
    }

    if let Some(rest) = cleaned.strip_prefix('-') {
        negative = true;
        cleaned = rest.to_string();
    } else if let Some(rest) = cleaned.strip_prefix('+') {
        cleaned = rest.to_string();
    }

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    let signed = if negative { -value } else { value };
    Some(round2(signed))
}
