//! Hashing and masking for personally identifiable identifiers.
//!
//! Raw National Insurance numbers, account numbers, and sort codes never
//! leave the normalizer: canonical records carry only a SHA-256 digest (for
//! equality matching and dedup) and a masked display form. There is no
//! recovery path from either.

use sha2::{Digest, Sha256};

/// SHA-256 digest of an identifier, hex-encoded.
///
/// The input is canonicalized first (alphanumerics only, uppercased) so that
/// `"QQ 12 34 56 C"` and `"qq123456c"` hash identically.
pub fn hash_identifier(raw: &str) -> String {
    let canonical: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 digest of raw bytes, hex-encoded. Used for document content
/// hashes and account fingerprints.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Masked display form of a National Insurance number: the last three
/// digits, everything else starred.
pub fn mask_ni_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let keep = digits.len().min(3);
    let visible = &digits[digits.len() - keep..];
    format!("******{visible}")
}

/// Masked display form of an account number: the last four digits,
/// everything else starred.
pub fn mask_account_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let keep = digits.len().min(4);
    let visible = &digits[digits.len() - keep..];
    format!("****{visible}")
}

/// Masked display form of a sort code: last pair visible, `**-**-56`.
pub fn mask_sort_code(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let keep = digits.len().min(2);
    let visible = &digits[digits.len() - keep..];
    format!("**-**-{visible}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_spacing_and_case_insensitive() {
        let a = hash_identifier("QQ 12 34 56 C");
        let b = hash_identifier("qq123456c");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_identifiers_hash_differently() {
        assert_ne!(hash_identifier("12345678"), hash_identifier("12345679"));
    }

    #[test]
    fn hash_bytes_stable() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
        assert_eq!(hash_bytes(b"").len(), 64);
    }

    #[test]
    fn ni_mask_keeps_last_three_digits() {
        assert_eq!(mask_ni_number("QQ123456C"), "******456");
        assert_eq!(mask_ni_number("qq 12 34 56 c"), "******456");
    }

    #[test]
    fn ni_mask_short_input() {
        assert_eq!(mask_ni_number("12"), "******12");
        assert_eq!(mask_ni_number("no digits"), "******");
    }

    #[test]
    fn account_mask_keeps_last_four() {
        assert_eq!(mask_account_number("12345678"), "****5678");
        assert_eq!(mask_account_number("0000 1234"), "****1234");
    }

    #[test]
    fn sort_code_mask() {
        assert_eq!(mask_sort_code("12-34-56"), "**-**-56");
        assert_eq!(mask_sort_code("123456"), "**-**-56");
    }

    #[test]
    fn masks_never_echo_full_input() {
        let masked = mask_account_number("12345678");
        assert!(!masked.contains("12345678"));
        let masked = mask_ni_number("QQ123456C");
        assert!(!masked.to_uppercase().contains("QQ"));
    }
}
