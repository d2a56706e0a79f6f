//! Alias pickers for heterogeneous standardization payloads.
//!
//! The external extraction service names fields differently from one
//! document to the next ("grossPay", "gross_pay", "gross"). Each canonical
//! field therefore carries an explicit ordered alias list, and the picker
//! returns which alias won, so a surprising value can be traced back to the
//! payload key that supplied it.

use chrono::NaiveDate;
use serde_json::Value as JsonValue;

use sterling_core::{parse_amount, round2};

/// A value together with the payload alias that supplied it.
#[derive(Debug, Clone, PartialEq)]
pub struct Picked<T> {
    pub value: T,
    pub alias: &'static str,
}

impl<T> Picked<T> {
    /// Audit line for the insight's notes.
    pub fn note(&self, field: &str) -> String {
        format!("{} picked from {}", field, self.alias)
    }
}

/// Unwrap a pick, recording a note when a non-primary alias won. Fields
/// resolved through their primary alias stay quiet so notes only list the
/// surprises.
pub fn noted<T>(
    picked: Option<Picked<T>>,
    field: &str,
    aliases: &[&'static str],
    notes: &mut Vec<String>,
) -> Option<T> {
    let picked = picked?;
    if aliases.first() != Some(&picked.alias) {
        notes.push(picked.note(field));
    }
    Some(picked.value)
}

/// Resolve an alias against the payload. Dots descend into nested objects
/// ("employer.name").
fn lookup<'a>(payload: &'a JsonValue, alias: &str) -> Option<&'a JsonValue> {
    let mut node = payload;
    for part in alias.split('.') {
        node = node.get(part)?;
    }
    Some(node)
}

/// First alias holding a non-empty string.
pub fn pick_str(payload: &JsonValue, aliases: &[&'static str]) -> Option<Picked<String>> {
    for &alias in aliases {
        if let Some(s) = lookup(payload, alias).and_then(JsonValue::as_str) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(Picked {
                    value: trimmed.to_string(),
                    alias,
                });
            }
        }
    }
    None
}

/// First alias holding a parseable amount. JSON numbers are taken as-is
/// (rounded to 2 dp); strings go through [`parse_amount`], so "£2,500.00"
/// and "(850.00)" both work. A present-but-unparseable value is skipped,
/// never treated as zero.
pub fn pick_num(payload: &JsonValue, aliases: &[&'static str]) -> Option<Picked<f64>> {
    for &alias in aliases {
        let parsed = match lookup(payload, alias) {
            Some(JsonValue::Number(n)) => n.as_f64().map(round2),
            Some(JsonValue::String(s)) => parse_amount(s),
            _ => None,
        };
        if let Some(value) = parsed {
            return Some(Picked { value, alias });
        }
    }
    None
}

/// First alias holding a parseable date.
pub fn pick_date(payload: &JsonValue, aliases: &[&'static str]) -> Option<Picked<NaiveDate>> {
    for &alias in aliases {
        if let Some(s) = lookup(payload, alias).and_then(JsonValue::as_str) {
            if let Some(value) = parse_date(s) {
                return Some(Picked { value, alias });
            }
        }
    }
    None
}

/// First alias holding an array. Presence wins even when the array is
/// empty: a statement that says `"transactions": []` has zero transactions,
/// which is not the same as not mentioning them.
pub fn pick_array<'a>(
    payload: &'a JsonValue,
    aliases: &[&'static str],
) -> Option<Picked<&'a [JsonValue]>> {
    for &alias in aliases {
        if let Some(arr) = lookup(payload, alias).and_then(JsonValue::as_array) {
            return Some(Picked {
                value: arr.as_slice(),
                alias,
            });
        }
    }
    None
}

/// Parse the date formats seen in UK financial documents: ISO, day-first
/// numeric, and day-first with a spelled month. ISO datetimes are accepted
/// by their date part.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d %b %Y", "%d %B %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    if let Some(prefix) = trimmed.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(prefix, "%Y-%m-%d") {
            return Some(date);
        }
    }
    None
}
