//! Statement normalization and the balance reconciliation check.
//!
//! The invariant: opening balance plus inflows minus outflows must equal
//! the closing balance within one penny. Unlike payslip deductions, a
//! missing balance is never assumed to be zero; reconciliation without both
//! endpoints is meaningless, so the check fails outright.

use serde_json::Value as JsonValue;

use sterling_core::defaults::CATEGORY_UNCATEGORIZED;
use sterling_core::{
    amounts_match, hash_identifier, mask_account_number, mask_sort_code, round2,
    IntegrityReason, IntegrityReport, StatementMetrics, Transaction, TxDirection,
};

use super::fields::{noted, pick_array, pick_date, pick_num, pick_str};
use chrono::NaiveDate;

const INSTITUTION: &[&str] = &[
    "institution",
    "institutionName",
    "bankName",
    "bank",
    "provider",
    "issuer",
];
const ACCOUNT_NUMBER: &[&str] = &["accountNumber", "account_number", "accountNo", "iban"];
const SORT_CODE: &[&str] = &["sortCode", "sort_code"];
const OPENING_BALANCE: &[&str] = &[
    "openingBalance",
    "opening_balance",
    "startBalance",
    "balanceBroughtForward",
];
const CLOSING_BALANCE: &[&str] = &[
    "closingBalance",
    "closing_balance",
    "endBalance",
    "balanceCarriedForward",
];
const TOTAL_IN: &[&str] = &["totalIn", "total_in", "inflow", "totalCredits", "moneyIn"];
const TOTAL_OUT: &[&str] = &["totalOut", "total_out", "outflow", "totalDebits", "moneyOut"];
const PERIOD_END: &[&str] = &[
    "periodEnd",
    "period_end",
    "statementDate",
    "statement_date",
    "endDate",
    "to",
];
const TRANSACTIONS: &[&str] = &["transactions", "items", "entries"];

const TX_ID: &[&str] = &["id", "transactionId"];
const TX_DATE: &[&str] = &["date", "transactionDate", "postedDate", "valueDate"];
const TX_DESCRIPTION: &[&str] = &["description", "narrative", "details", "merchant"];
const TX_AMOUNT: &[&str] = &["amount", "value"];
const TX_CREDIT: &[&str] = &["credit", "paidIn", "moneyIn"];
const TX_DEBIT: &[&str] = &["debit", "paidOut", "moneyOut"];
const TX_DIRECTION: &[&str] = &["direction", "type"];
const TX_CATEGORY: &[&str] = &["category"];
const TX_BALANCE: &[&str] = &["balance", "balanceAfter", "runningBalance"];

/// A normalized statement plus its transactions and audit notes.
#[derive(Debug, Clone)]
pub struct StatementNormalized {
    pub metrics: StatementMetrics,
    pub transactions: Vec<Transaction>,
    pub period_end: Option<NaiveDate>,
    pub notes: Vec<String>,
}

/// Normalize a standardized statement payload. One normalizer covers the
/// current-account, savings, ISA, investment and pension kinds; their
/// payloads differ only in which fields happen to be present.
pub fn normalize_statement(payload: &JsonValue) -> StatementNormalized {
    let mut notes = Vec::new();

    let institution = noted(
        pick_str(payload, INSTITUTION),
        "institution",
        INSTITUTION,
        &mut notes,
    );

    // Raw account identifiers stop here: only the hash and mask go out.
    let account = pick_str(payload, ACCOUNT_NUMBER);
    let (account_number_hash, account_number_masked) = match account {
        Some(picked) => (
            Some(hash_identifier(&picked.value)),
            Some(mask_account_number(&picked.value)),
        ),
        None => (None, None),
    };
    let sort_code_masked = pick_str(payload, SORT_CODE).map(|p| mask_sort_code(&p.value));

    let opening_balance = noted(
        pick_num(payload, OPENING_BALANCE),
        "opening_balance",
        OPENING_BALANCE,
        &mut notes,
    );
    let closing_balance = noted(
        pick_num(payload, CLOSING_BALANCE),
        "closing_balance",
        CLOSING_BALANCE,
        &mut notes,
    );
    let period_end = noted(
        pick_date(payload, PERIOD_END),
        "period_end",
        PERIOD_END,
        &mut notes,
    );

    let rows = noted(
        pick_array(payload, TRANSACTIONS),
        "transactions",
        TRANSACTIONS,
        &mut notes,
    )
    .unwrap_or_default();
    let mut transactions = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        match parse_transaction(idx, row) {
            Some(tx) => transactions.push(tx),
            None => notes.push(format!("transaction at index {idx} has no amount; skipped")),
        }
    }

    let computed_in = round2(
        transactions
            .iter()
            .filter(|t| t.direction == TxDirection::In)
            .map(|t| t.amount)
            .sum(),
    );
    let computed_out = round2(
        transactions
            .iter()
            .filter(|t| t.direction == TxDirection::Out)
            .map(|t| t.amount)
            .sum(),
    );

    // Stated totals win over computed ones; a summary-only statement has
    // totals but no rows, and a full export may round differently than we
    // do. Either way the document's own figures are what its closing
    // balance was printed against.
    let inflow = noted(pick_num(payload, TOTAL_IN), "inflow", TOTAL_IN, &mut notes)
        .unwrap_or(computed_in);
    let outflow = noted(pick_num(payload, TOTAL_OUT), "outflow", TOTAL_OUT, &mut notes)
        .unwrap_or(computed_out);

    let (expected_closing, integrity) = match (opening_balance, closing_balance) {
        (Some(open), Some(close)) => {
            let expected = round2(open + inflow - outflow);
            if amounts_match(close, expected) {
                (Some(expected), IntegrityReport::pass())
            } else {
                let delta = round2(close - expected);
                (
                    Some(expected),
                    IntegrityReport::fail(IntegrityReason::BalanceMismatch, Some(delta)),
                )
            }
        }
        _ => {
            if opening_balance.is_none() {
                notes.push("opening balance missing; balance identity cannot be verified".into());
            }
            if closing_balance.is_none() {
                notes.push("closing balance missing; balance identity cannot be verified".into());
            }
            (None, IntegrityReport::fail(IntegrityReason::BalanceMismatch, None))
        }
    };

    StatementNormalized {
        metrics: StatementMetrics {
            institution,
            account_number_hash,
            account_number_masked,
            sort_code_masked,
            opening_balance,
            closing_balance,
            inflow,
            outflow,
            expected_closing,
            integrity,
        },
        transactions,
        period_end,
        notes,
    }
}

/// Parse one transaction row. Returns `None` when no amount can be found in
/// any form; such a row cannot contribute to cashflow.
fn parse_transaction(idx: usize, row: &JsonValue) -> Option<Transaction> {
    let credit = pick_num(row, TX_CREDIT).map(|p| p.value).filter(|v| *v != 0.0);
    let debit = pick_num(row, TX_DEBIT).map(|p| p.value).filter(|v| *v != 0.0);
    let signed = pick_num(row, TX_AMOUNT).map(|p| p.value);

    // Split credit/debit columns are unambiguous. A single signed amount
    // needs a direction hint if one is present, otherwise its sign decides.
    let (amount, direction) = if let Some(value) = credit {
        (value.abs(), TxDirection::In)
    } else if let Some(value) = debit {
        (value.abs(), TxDirection::Out)
    } else {
        let value = signed?;
        let hint = pick_str(row, TX_DIRECTION).map(|p| p.value.to_ascii_lowercase());
        let direction = match hint.as_deref() {
            Some("credit" | "cr" | "in" | "deposit") => TxDirection::In,
            Some("debit" | "dr" | "out" | "withdrawal") => TxDirection::Out,
            _ if value < 0.0 => TxDirection::Out,
            _ => TxDirection::In,
        };
        (value.abs(), direction)
    };

    let id = pick_str(row, TX_ID)
        .map(|p| p.value)
        .unwrap_or_else(|| format!("txn-{:03}", idx + 1));
    let date = pick_date(row, TX_DATE).map(|p| p.value);
    let description = pick_str(row, TX_DESCRIPTION)
        .map(|p| p.value)
        .unwrap_or_default();
    let category = pick_str(row, TX_CATEGORY)
        .map(|p| p.value)
        .unwrap_or_else(|| CATEGORY_UNCATEGORIZED.to_string());
    let balance_after = pick_num(row, TX_BALANCE).map(|p| p.value);

    Some(Transaction {
        id,
        date,
        description,
        amount: round2(amount),
        direction,
        category,
        balance_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sterling_core::IntegrityStatus;

    #[test]
    fn balance_reconciles_from_stated_totals() {
        let payload = json!({
            "institution": "Barclays Bank",
            "openingBalance": 0.0,
            "closingBalance": 1850.0,
            "totalIn": 2000.0,
            "totalOut": 150.0,
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.metrics.integrity.status, IntegrityStatus::Pass);
        assert_eq!(n.metrics.expected_closing, Some(1850.0));
        assert_eq!(n.metrics.inflow, 2000.0);
        assert_eq!(n.metrics.outflow, 150.0);
    }

    #[test]
    fn balance_mismatch_carries_signed_delta() {
        // Expected closing is 1850; the statement claims 1000, so the
        // delta is -850.
        let payload = json!({
            "openingBalance": 0.0,
            "closingBalance": 1000.0,
            "totalIn": 2000.0,
            "totalOut": 150.0,
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.metrics.integrity.status, IntegrityStatus::Fail);
        assert_eq!(n.metrics.integrity.reason, Some(IntegrityReason::BalanceMismatch));
        assert_eq!(n.metrics.integrity.delta, Some(-850.0));
        assert_eq!(n.metrics.expected_closing, Some(1850.0));
    }

    #[test]
    fn missing_balance_fails_without_delta() {
        let payload = json!({"totalIn": 100.0, "totalOut": 50.0, "closingBalance": 50.0});
        let n = normalize_statement(&payload);
        assert_eq!(n.metrics.integrity.status, IntegrityStatus::Fail);
        assert_eq!(n.metrics.integrity.delta, None);
        assert_eq!(n.metrics.expected_closing, None);
        assert!(n.notes.iter().any(|note| note.contains("opening balance missing")));
    }

    #[test]
    fn totals_computed_from_transactions_when_not_stated() {
        let payload = json!({
            "openingBalance": 100.0,
            "closingBalance": 70.0,
            "transactions": [
                {"description": "Salary", "credit": 50.0},
                {"description": "Coffee", "debit": 30.0},
                {"description": "Groceries", "amount": -50.0},
            ],
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.metrics.inflow, 50.0);
        assert_eq!(n.metrics.outflow, 80.0);
        assert_eq!(n.metrics.integrity.status, IntegrityStatus::Pass);
        assert_eq!(n.transactions.len(), 3);
    }

    #[test]
    fn stated_totals_win_over_computed_ones() {
        let payload = json!({
            "openingBalance": 0.0,
            "closingBalance": 10.0,
            "totalIn": 10.0,
            "totalOut": 0.0,
            "transactions": [{"description": "Partial export", "credit": 4.0}],
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.metrics.inflow, 10.0);
        assert_eq!(n.metrics.integrity.status, IntegrityStatus::Pass);
    }

    #[test]
    fn direction_resolution_order() {
        let rows = json!({
            "openingBalance": 0.0,
            "closingBalance": 0.0,
            "transactions": [
                {"credit": 10.0, "description": "split credit column"},
                {"debit": 20.0, "description": "split debit column"},
                {"amount": 30.0, "type": "debit", "description": "hint beats sign"},
                {"amount": -40.0, "description": "sign decides"},
                {"amount": 50.0, "description": "default is inbound"},
            ],
        });
        let n = normalize_statement(&rows);
        let dirs: Vec<TxDirection> = n.transactions.iter().map(|t| t.direction).collect();
        assert_eq!(
            dirs,
            vec![
                TxDirection::In,
                TxDirection::Out,
                TxDirection::Out,
                TxDirection::Out,
                TxDirection::In,
            ]
        );
        // Amounts are stored non-negative regardless of source sign.
        assert!(n.transactions.iter().all(|t| t.amount >= 0.0));
        assert_eq!(n.transactions[3].amount, 40.0);
    }

    #[test]
    fn rows_without_an_amount_are_skipped_with_a_note() {
        let payload = json!({
            "openingBalance": 0.0,
            "closingBalance": 5.0,
            "transactions": [
                {"description": "no amount at all"},
                {"credit": 5.0, "description": "kept"},
            ],
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.transactions.len(), 1);
        assert!(n
            .notes
            .iter()
            .any(|note| note == "transaction at index 0 has no amount; skipped"));
    }

    #[test]
    fn transaction_ids_fall_back_to_position() {
        let payload = json!({
            "openingBalance": 0.0,
            "closingBalance": 0.0,
            "transactions": [
                {"credit": 1.0},
                {"id": "FPS-991", "debit": 1.0},
                {"credit": 2.0},
            ],
        });
        let n = normalize_statement(&payload);
        let ids: Vec<&str> = n.transactions.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["txn-001", "FPS-991", "txn-003"]);
    }

    #[test]
    fn category_defaults_to_uncategorized() {
        let payload = json!({
            "openingBalance": 0.0,
            "closingBalance": 0.0,
            "transactions": [
                {"credit": 1.0},
                {"credit": 1.0, "category": "Groceries"},
            ],
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.transactions[0].category, CATEGORY_UNCATEGORIZED);
        assert_eq!(n.transactions[1].category, "Groceries");
    }

    #[test]
    fn account_identifiers_are_hashed_and_masked() {
        let payload = json!({
            "openingBalance": 0.0,
            "closingBalance": 0.0,
            "accountNumber": "12345678",
            "sortCode": "12-34-56",
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.metrics.account_number_masked.as_deref(), Some("****5678"));
        assert_eq!(n.metrics.sort_code_masked.as_deref(), Some("**-**-56"));
        let hash = n.metrics.account_number_hash.unwrap();
        assert_eq!(hash.len(), 64);
        assert!(!hash.contains("1234"));
    }

    #[test]
    fn period_end_parses_common_forms() {
        let payload = json!({
            "openingBalance": 0.0,
            "closingBalance": 0.0,
            "statementDate": "31/03/2026",
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.period_end, NaiveDate::from_ymd_opt(2026, 3, 31));
        assert!(n.notes.iter().any(|note| note == "period_end picked from statementDate"));
    }

    #[test]
    fn balance_after_is_carried_per_row() {
        let payload = json!({
            "openingBalance": 100.0,
            "closingBalance": 150.0,
            "transactions": [{"credit": 50.0, "balance": 150.0}],
        });
        let n = normalize_statement(&payload);
        assert_eq!(n.transactions[0].balance_after, Some(150.0));
        assert_eq!(n.metrics.integrity.status, IntegrityStatus::Pass);
    }
}
