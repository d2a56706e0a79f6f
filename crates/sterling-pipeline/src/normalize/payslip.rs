//! Payslip normalization and the net-pay identity check.
//!
//! The invariant: gross minus every deduction must equal net within one
//! penny. Known deductions absent from the document count as zero, but
//! gross and net themselves are required; a payslip stating neither cannot
//! be verified and is rejected outright.

use serde_json::Value as JsonValue;
use tracing::warn;

use sterling_core::{
    amounts_match, hash_identifier, mask_ni_number, round2, DeductionSource, Error,
    IntegrityReason, IntegrityReport, PayslipMetrics, Result,
};

use super::fields::{noted, pick_date, pick_num, pick_str};

const EMPLOYER: &[&str] = &[
    "employer",
    "employerName",
    "employer_name",
    "employer.name",
    "company",
    "companyName",
];
const PAY_DATE: &[&str] = &[
    "payDate",
    "pay_date",
    "paymentDate",
    "date",
    "periodEnd",
    "period_end",
];
const GROSS: &[&str] = &["grossPay", "gross_pay", "gross", "totalGross", "grossEarnings"];
const NET: &[&str] = &["netPay", "net_pay", "net", "takeHome", "netEarnings"];
const INCOME_TAX: &[&str] = &["incomeTax", "income_tax", "tax", "paye", "taxDeducted"];
const NATIONAL_INSURANCE: &[&str] = &[
    "nationalInsurance",
    "national_insurance",
    "ni",
    "nationalInsuranceContribution",
    "nic",
];
const PENSION: &[&str] = &[
    "pension",
    "pensionContribution",
    "pension_contribution",
    "employeePension",
];
const STUDENT_LOAN: &[&str] = &[
    "studentLoan",
    "student_loan",
    "studentLoanDeduction",
    "studentLoanRepayment",
];
const OTHER_DEDUCTIONS: &[&str] = &["otherDeductions", "other_deductions", "other"];
const NI_NUMBER: &[&str] = &[
    "niNumber",
    "ni_number",
    "nationalInsuranceNumber",
    "national_insurance_number",
    "nino",
];

/// A normalized payslip plus its audit notes.
#[derive(Debug, Clone)]
pub struct PayslipNormalized {
    pub metrics: PayslipMetrics,
    pub notes: Vec<String>,
}

/// Normalize a standardized payslip payload.
///
/// Fails with an integrity error when gross or net pay is absent; a
/// failing-but-computable identity is reported in the returned metrics, not
/// as an error.
pub fn normalize_payslip(payload: &JsonValue) -> Result<PayslipNormalized> {
    let mut notes = Vec::new();

    let Some(gross) = noted(pick_num(payload, GROSS), "gross", GROSS, &mut notes) else {
        warn!("payslip payload has no gross pay; net identity cannot be verified");
        return Err(Error::Integrity {
            reason: IntegrityReason::NetIdentityFailed,
            delta: None,
        });
    };
    let Some(net) = noted(pick_num(payload, NET), "net", NET, &mut notes) else {
        warn!("payslip payload has no net pay; net identity cannot be verified");
        return Err(Error::Integrity {
            reason: IntegrityReason::NetIdentityFailed,
            delta: None,
        });
    };

    // Deduction lines a payslip simply doesn't have genuinely are zero.
    // Balances get no such grace (see the statement normalizer); a missing
    // deduction line is the document's way of saying "none".
    let income_tax =
        noted(pick_num(payload, INCOME_TAX), "income_tax", INCOME_TAX, &mut notes).unwrap_or(0.0);
    let national_insurance = noted(
        pick_num(payload, NATIONAL_INSURANCE),
        "national_insurance",
        NATIONAL_INSURANCE,
        &mut notes,
    )
    .unwrap_or(0.0);
    let pension = noted(pick_num(payload, PENSION), "pension", PENSION, &mut notes).unwrap_or(0.0);
    let student_loan = noted(
        pick_num(payload, STUDENT_LOAN),
        "student_loan",
        STUDENT_LOAN,
        &mut notes,
    )
    .unwrap_or(0.0);

    let known = round2(income_tax + national_insurance + pension + student_loan);
    let residual = round2(gross - known - net);

    // A provided figure that agrees with the residual is kept as stated;
    // one that disagrees (or is absent) is replaced by the derived value so
    // the identity check measures the document, not a typo in one line.
    let provided_other = noted(
        pick_num(payload, OTHER_DEDUCTIONS),
        "other_deductions",
        OTHER_DEDUCTIONS,
        &mut notes,
    );
    let (other_deductions, other_deductions_source) = match provided_other {
        Some(value) if amounts_match(value, residual) => (value, DeductionSource::Provided),
        Some(value) => {
            let derived = if residual > 0.0 { residual } else { 0.0 };
            notes.push(format!(
                "other_deductions {value:.2} disagrees with residual {residual:.2}; derived {derived:.2}"
            ));
            (derived, DeductionSource::Computed)
        }
        None => {
            let derived = if residual > 0.0 { residual } else { 0.0 };
            if derived > 0.0 {
                notes.push(format!("other_deductions derived from residual: {derived:.2}"));
            }
            (derived, DeductionSource::Computed)
        }
    };

    let expected_net = round2(gross - known - other_deductions);
    let delta = round2(net - expected_net);
    let integrity = if amounts_match(net, expected_net) {
        IntegrityReport::pass()
    } else {
        IntegrityReport::fail(IntegrityReason::NetIdentityFailed, Some(delta))
    };

    let employer = noted(pick_str(payload, EMPLOYER), "employer", EMPLOYER, &mut notes);
    let pay_date = noted(pick_date(payload, PAY_DATE), "pay_date", PAY_DATE, &mut notes);

    // The raw NI number stops here: only the hash and mask go out.
    let ni = pick_str(payload, NI_NUMBER);
    let (ni_number_hash, ni_number_masked) = match ni {
        Some(picked) => (
            Some(hash_identifier(&picked.value)),
            Some(mask_ni_number(&picked.value)),
        ),
        None => (None, None),
    };

    Ok(PayslipNormalized {
        metrics: PayslipMetrics {
            employer,
            pay_date,
            gross,
            net,
            income_tax,
            national_insurance,
            pension,
            student_loan,
            other_deductions,
            other_deductions_source,
            expected_net,
            ni_number_hash,
            ni_number_masked,
            integrity,
        },
        notes,
    })
}
