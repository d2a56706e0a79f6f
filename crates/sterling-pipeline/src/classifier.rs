//! Heuristic document classifier.
//!
//! Classification runs before any external call: a document that cannot be
//! recognized must never be submitted for standardization. Rules are ordered
//! keyword lists with fixed confidences; the score reflects which rule
//! fired, not how much evidence it found. Filename evidence outranks content
//! evidence because upload names ("Payslip_March.pdf") are chosen by people
//! while content is OCR-grade text.

use sterling_core::defaults::CLASSIFY_CONTENT_WINDOW;
use sterling_core::DocumentKind;

use crate::canonical::{match_brand, normalize_tokens};

/// Classifier verdict. The processor decides acceptance: kind `Unknown` or
/// confidence below the threshold is rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: DocumentKind,
    pub confidence: f64,
    pub employer_name: Option<String>,
    pub institution_name: Option<String>,
}

struct Rule {
    kind: DocumentKind,
    keywords: &'static [&'static str],
    filename_confidence: f64,
    content_confidence: f64,
}

/// Ordered most-specific first; the generic "statement" catch-all must stay
/// last or it would shadow every other statement kind.
const RULES: &[Rule] = &[
    Rule {
        kind: DocumentKind::Payslip,
        keywords: &["payslip", "pay slip", "pay advice", "wage slip", "salary slip"],
        filename_confidence: 0.9,
        content_confidence: 0.75,
    },
    Rule {
        kind: DocumentKind::HmrcCorrespondence,
        keywords: &[
            "hmrc",
            "self assessment",
            "sa302",
            "p60",
            "p45",
            "p800",
            "tax code notice",
            "tax calculation",
        ],
        filename_confidence: 0.85,
        content_confidence: 0.7,
    },
    Rule {
        kind: DocumentKind::IsaStatement,
        keywords: &["isa"],
        filename_confidence: 0.85,
        content_confidence: 0.7,
    },
    Rule {
        kind: DocumentKind::SavingsAccountStatement,
        keywords: &["savings"],
        filename_confidence: 0.8,
        content_confidence: 0.7,
    },
    Rule {
        kind: DocumentKind::InvestmentStatement,
        keywords: &["investment", "portfolio", "brokerage", "gia"],
        filename_confidence: 0.8,
        content_confidence: 0.7,
    },
    Rule {
        kind: DocumentKind::PensionStatement,
        keywords: &["pension", "sipp", "annual benefit"],
        filename_confidence: 0.8,
        content_confidence: 0.7,
    },
    Rule {
        kind: DocumentKind::CurrentAccountStatement,
        keywords: &["current account", "bank statement"],
        filename_confidence: 0.75,
        content_confidence: 0.65,
    },
    Rule {
        kind: DocumentKind::CurrentAccountStatement,
        keywords: &["statement"],
        filename_confidence: 0.65,
        content_confidence: 0.6,
    },
];

/// First rule with any keyword present, scanning in declaration order.
fn first_rule_hit(normalized: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| {
        rule.keywords
            .iter()
            .any(|kw| normalized.contains(&format!(" {kw} ")))
    })
}

/// Classify a document from its upload name and an optional content window.
///
/// Each source contributes at most one candidate (its first matching rule);
/// the higher-confidence candidate wins, with ties going to the filename.
pub fn classify(original_name: &str, content: Option<&str>) -> Classification {
    let name_hit = first_rule_hit(&normalize_tokens(original_name))
        .map(|rule| (rule.kind, rule.filename_confidence));
    let content_hit = content
        .map(normalize_tokens)
        .as_deref()
        .and_then(first_rule_hit)
        .map(|rule| (rule.kind, rule.content_confidence));

    let (kind, confidence) = match (name_hit, content_hit) {
        (Some((nk, nc)), Some((ck, cc))) => {
            if cc > nc {
                (ck, cc)
            } else {
                (nk, nc)
            }
        }
        (Some(hit), None) | (None, Some(hit)) => hit,
        (None, None) => (DocumentKind::Unknown, 0.0),
    };

    let brand = match_brand(original_name)
        .or_else(|| content.and_then(match_brand))
        .map(str::to_string);
    let (employer_name, institution_name) = if kind == DocumentKind::Payslip {
        (brand, None)
    } else if kind.is_statement() {
        (None, brand)
    } else {
        (None, None)
    };

    Classification {
        kind,
        confidence,
        employer_name,
        institution_name,
    }
}

/// Lossy UTF-8 view of the first [`CLASSIFY_CONTENT_WINDOW`] bytes, for
/// feeding binary uploads into [`classify`].
pub fn content_window(bytes: &[u8]) -> String {
    let end = bytes.len().min(CLASSIFY_CONTENT_WINDOW);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
