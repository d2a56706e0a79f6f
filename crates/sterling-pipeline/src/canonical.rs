//! Institution canonicalization and account identity.
//!
//! Upstream extraction returns institution names in whatever spelling the
//! document used ("BARCLAYS BANK UK PLC", "Barclays", "barclays bank").
//! Accounts are keyed by a fingerprint of the canonical name plus the
//! account-number hash, so every spelling of one account converges on one
//! row; the raw spellings are kept as an evidence array that only grows.

use sha2::{Digest, Sha256};

use sterling_core::{build_update, Result, UpdateMode, UpdatePlan};

/// Known institution brands, keyed by their normalized token sequence.
///
/// Shared with the classifier's hint extraction. Multi-word keys are matched
/// against whitespace-normalized, lowercased text with word boundaries.
pub(crate) const BRANDS: &[(&str, &str)] = &[
    ("barclays", "Barclays"),
    ("hsbc", "HSBC"),
    ("lloyds", "Lloyds"),
    ("natwest", "NatWest"),
    ("nationwide", "Nationwide"),
    ("santander", "Santander"),
    ("halifax", "Halifax"),
    ("monzo", "Monzo"),
    ("starling", "Starling"),
    ("revolut", "Revolut"),
    ("first direct", "First Direct"),
    ("co operative", "Co-operative Bank"),
    ("vanguard", "Vanguard"),
    ("fidelity", "Fidelity"),
    ("hargreaves lansdown", "Hargreaves Lansdown"),
    ("aj bell", "AJ Bell"),
    ("interactive investor", "Interactive Investor"),
    ("aviva", "Aviva"),
    ("scottish widows", "Scottish Widows"),
    ("legal general", "Legal & General"),
    ("standard life", "Standard Life"),
    ("royal london", "Royal London"),
    ("nest", "Nest"),
];

/// Trailing tokens stripped from unknown institution names.
const LEGAL_SUFFIXES: &[&str] = &["ltd", "limited", "plc", "llp", "uk", "bank", "group"];

/// A raw institution spelling resolved to its canonical display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalInstitution {
    pub canonical: String,
    /// The cleaned original spelling, kept for the account's evidence array.
    pub raw: String,
}

/// Lowercase, split on non-alphanumeric runs, and rejoin with single spaces,
/// padded so `" key "` containment gives word-boundary matching.
pub(crate) fn normalize_tokens(text: &str) -> String {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    format!(" {} ", tokens.join(" ")).to_lowercase()
}

/// Find the first known brand present in `text`, if any.
pub(crate) fn match_brand(text: &str) -> Option<&'static str> {
    let normalized = normalize_tokens(text);
    BRANDS
        .iter()
        .find(|(key, _)| normalized.contains(&format!(" {key} ")))
        .map(|(_, name)| *name)
}

/// Resolve a raw institution spelling to its canonical name.
///
/// Known brands win outright; unknown names get their trailing legal
/// suffixes stripped and are title-cased.
pub fn canonicalise_institution(raw: &str) -> CanonicalInstitution {
    let cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(brand) = match_brand(&cleaned) {
        return CanonicalInstitution {
            canonical: brand.to_string(),
            raw: cleaned,
        };
    }

    let mut tokens: Vec<String> = cleaned
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    while tokens.len() > 1 && LEGAL_SUFFIXES.contains(&tokens[tokens.len() - 1].as_str()) {
        tokens.pop();
    }

    let canonical = if tokens.is_empty() {
        cleaned.clone()
    } else {
        tokens
            .iter()
            .map(|t| title_case(t))
            .collect::<Vec<_>>()
            .join(" ")
    };

    CanonicalInstitution {
        canonical,
        raw: cleaned,
    }
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Stable identity for one account across documents: canonical institution
/// plus the account-number hash. Either part alone is ambiguous (two
/// accounts at one bank; renumbered exports of one account), together they
/// pin a row.
pub fn account_fingerprint(canonical: &str, account_number_hash: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(account_number_hash.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Plan the raw-name array growth for an existing account. Empty plan means
/// the spelling is already recorded and no write is needed.
pub fn plan_raw_name_append(current: &[String], raw_name: &str) -> Result<UpdatePlan> {
    build_update(
        "raw_institution_names",
        current,
        UpdateMode::AppendUnique {
            values: vec![raw_name.to_string()],
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brand_wins_over_suffix_stripping() {
        let resolved = canonicalise_institution("BARCLAYS BANK UK PLC");
        assert_eq!(resolved.canonical, "Barclays");
        assert_eq!(resolved.raw, "BARCLAYS BANK UK PLC");
    }

    #[test]
    fn multiword_brand_matches() {
        assert_eq!(
            canonicalise_institution("Hargreaves Lansdown Asset Management").canonical,
            "Hargreaves Lansdown"
        );
        assert_eq!(
            canonicalise_institution("Legal & General Investment").canonical,
            "Legal & General"
        );
    }

    #[test]
    fn brand_requires_word_boundary() {
        // "Ernest" must not match the "nest" pension brand.
        assert_eq!(match_brand("Ernest Partners"), None);
        assert_eq!(match_brand("Nest Pensions"), Some("Nest"));
    }

    #[test]
    fn unknown_name_strips_suffixes_and_title_cases() {
        let resolved = canonicalise_institution("  acme   savings ltd ");
        assert_eq!(resolved.canonical, "Acme Savings");
        assert_eq!(resolved.raw, "acme savings ltd");
    }

    #[test]
    fn suffix_stripping_keeps_at_least_one_token() {
        assert_eq!(canonicalise_institution("PLC").canonical, "Plc");
    }

    #[test]
    fn whitespace_is_collapsed_in_raw() {
        let resolved = canonicalise_institution("Monzo   Bank\tLtd");
        assert_eq!(resolved.canonical, "Monzo");
        assert_eq!(resolved.raw, "Monzo Bank Ltd");
    }

    #[test]
    fn fingerprint_is_case_insensitive_on_canonical() {
        let a = account_fingerprint("Barclays", Some("abc123"));
        let b = account_fingerprint("BARCLAYS", Some("abc123"));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_separates_name_and_hash() {
        // Missing hash must not collide with a hash that happens to extend
        // the name.
        let a = account_fingerprint("Barclays", None);
        let b = account_fingerprint("Barclays", Some(""));
        let c = account_fingerprint("Barclaysx", None);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fingerprint_distinguishes_accounts_at_one_bank() {
        let a = account_fingerprint("Barclays", Some("hash-1"));
        let b = account_fingerprint("Barclays", Some("hash-2"));
        assert_ne!(a, b);
    }

    #[test]
    fn plan_append_skips_known_spelling() {
        let current = vec!["Barclays Bank".to_string()];
        let plan = plan_raw_name_append(&current, "Barclays Bank").unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn plan_append_adds_new_spelling() {
        let current = vec!["Barclays Bank".to_string()];
        let plan = plan_raw_name_append(&current, "BARCLAYS BANK UK PLC").unwrap();
        assert!(!plan.is_empty());
        let next = plan.apply_path("raw_institution_names", &current).unwrap();
        assert_eq!(next, vec!["Barclays Bank", "BARCLAYS BANK UK PLC"]);
    }
}
