//! Deterministic monthly analytics rebuild.
//!
//! A rebuild derives one user's month entirely from stored insights and
//! overrides and replaces the snapshot wholesale. Running it twice against
//! the same rows produces byte-identical figures: insights arrive in a
//! stable order, category maps are sorted, and every sum is rounded the
//! same way. Overrides layer on top at rebuild time; the underlying
//! insights are never edited.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{info, warn};
use uuid::Uuid;

use sterling_core::defaults::{CATEGORY_SALARY, CATEGORY_TRANSFERS, OTHER_INCOME_CATEGORIES};
use sterling_core::{
    round2, DocumentInsight, DocumentKind, InsightMetrics, InsightRepository, Month, NewSnapshot,
    OverrideRepository, OverrideScope, Result, SnapshotFigures, SnapshotRepository, Transaction,
    TxDirection, UserAnalyticsSnapshot, UserOverride,
};

/// Rebuilds per-user monthly snapshots from insights and overrides.
pub struct AnalyticsEngine {
    insights: Arc<dyn InsightRepository>,
    overrides: Arc<dyn OverrideRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
}

impl AnalyticsEngine {
    pub fn new(
        insights: Arc<dyn InsightRepository>,
        overrides: Arc<dyn OverrideRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
    ) -> Self {
        Self {
            insights,
            overrides,
            snapshots,
        }
    }

    /// Rebuild and persist the snapshot for one `(user, month)`.
    ///
    /// Overrides are taken as of the last day of the month, so a correction
    /// dated mid-month applies to that whole month and every later one.
    pub async fn rebuild_monthly(
        &self,
        user_id: Uuid,
        month: Month,
    ) -> Result<UserAnalyticsSnapshot> {
        let insights = self.insights.list_for_month(user_id, month).await?;
        let overrides = self
            .overrides
            .list_effective(user_id, month.last_day())
            .await?;

        let outcome = rebuild_figures(month, &insights, &overrides)?;
        let snapshot = self
            .snapshots
            .upsert(NewSnapshot {
                user_id,
                month,
                figures: outcome.figures,
                insight_count: outcome.insight_count,
                transaction_count: outcome.transaction_count,
            })
            .await?;

        info!(
            %user_id,
            month = %month,
            insights = outcome.insight_count,
            transactions = outcome.transaction_count,
            "analytics snapshot rebuilt"
        );
        Ok(snapshot)
    }
}

pub(crate) struct RebuildOutcome {
    pub figures: JsonValue,
    pub insight_count: i32,
    pub transaction_count: i32,
}

/// The pure heart of the rebuild. `insights` must already be in stable
/// `(created_at, id)` order and `overrides` oldest-first, as the
/// repositories return them.
pub(crate) fn rebuild_figures(
    month: Month,
    insights: &[DocumentInsight],
    overrides: &[UserOverride],
) -> Result<RebuildOutcome> {
    let mut tx_patches: HashMap<&str, Vec<&JsonValue>> = HashMap::new();
    let mut metric_overrides: Vec<&UserOverride> = Vec::new();
    for o in overrides {
        match o.scope {
            OverrideScope::Transaction => {
                tx_patches.entry(o.target.as_str()).or_default().push(&o.patch)
            }
            OverrideScope::Metric => metric_overrides.push(o),
        }
    }

    let mut figures = SnapshotFigures::default();
    let mut pool: Vec<Transaction> = Vec::new();
    let mut has_payslip_income = false;
    let mut savings: Option<(NaiveDate, f64)> = None;
    let mut isa: Option<(NaiveDate, f64)> = None;
    let mut investment: Option<(NaiveDate, f64)> = None;
    let mut pension: Option<(NaiveDate, f64)> = None;

    for insight in insights {
        match &insight.metrics {
            InsightMetrics::Payslip(m) => {
                if m.gross > 0.0 || m.net > 0.0 {
                    has_payslip_income = true;
                }
                figures.income.gross += m.gross;
                figures.income.net += m.net;
                figures.tax.income_tax += m.income_tax;
                figures.tax.national_insurance += m.national_insurance;
                figures.tax.pension += m.pension;
                figures.tax.student_loan += m.student_loan;
            }
            InsightMetrics::Statement(m) => {
                // Balance figures track the most recently dated statement;
                // an undated one counts as the start of the month. Walk
                // order breaks date ties, so a re-extraction wins.
                let date = insight.document_date.unwrap_or_else(|| month.first_day());
                if let Some(closing) = m.closing_balance {
                    let slot = match insight.catalogue_key {
                        DocumentKind::SavingsAccountStatement => Some(&mut savings),
                        DocumentKind::IsaStatement => Some(&mut isa),
                        DocumentKind::InvestmentStatement => Some(&mut investment),
                        DocumentKind::PensionStatement => Some(&mut pension),
                        _ => None,
                    };
                    if let Some(slot) = slot {
                        track_latest(slot, date, closing);
                    }
                }
                for tx in &insight.transactions {
                    pool.push(patched_transaction(tx, &tx_patches));
                }
            }
            InsightMetrics::None => {}
        }
    }

    let mut other_income = 0.0;
    for tx in &pool {
        match tx.direction {
            TxDirection::In => {
                figures.cashflow.inflow += tx.amount;
                if is_other_income(&tx.category)
                    || (is_salary(&tx.category) && !has_payslip_income)
                {
                    other_income += tx.amount;
                }
            }
            TxDirection::Out => {
                figures.cashflow.outflow += tx.amount;
                // Transfers move money between the user's own accounts;
                // they count in cashflow but never as spend.
                if !is_transfer(&tx.category) {
                    *figures.spend_by_category.entry(tx.category.clone()).or_insert(0.0) +=
                        tx.amount;
                }
            }
        }
    }

    figures.income.gross = round2(figures.income.gross);
    figures.income.net = round2(figures.income.net);
    figures.income.other = round2(other_income);
    figures.income.total = round2(figures.income.gross + figures.income.other);
    figures.tax.income_tax = round2(figures.tax.income_tax);
    figures.tax.national_insurance = round2(figures.tax.national_insurance);
    figures.tax.pension = round2(figures.tax.pension);
    figures.tax.student_loan = round2(figures.tax.student_loan);
    figures.tax.total_withheld = round2(
        figures.tax.income_tax
            + figures.tax.national_insurance
            + figures.tax.pension
            + figures.tax.student_loan,
    );
    figures.cashflow.inflow = round2(figures.cashflow.inflow);
    figures.cashflow.outflow = round2(figures.cashflow.outflow);
    figures.cashflow.net = round2(figures.cashflow.inflow - figures.cashflow.outflow);
    for value in figures.spend_by_category.values_mut() {
        *value = round2(*value);
    }
    figures.total_spend = round2(figures.spend_by_category.values().sum());
    figures.savings_balance = savings.map(|(_, v)| v);
    figures.isa_balance = isa.map(|(_, v)| v);
    figures.investment_balance = investment.map(|(_, v)| v);
    figures.pension_balance = pension.map(|(_, v)| v);

    // Metric overrides patch the serialized document, deepest path first,
    // so a wholesale subtree replacement beats the point edits inside it.
    // Same-depth overrides keep their oldest-first order and the newest
    // write lands last.
    let mut doc = serde_json::to_value(&figures)?;
    metric_overrides
        .sort_by_key(|o| std::cmp::Reverse(o.target.split('.').count()));
    for o in metric_overrides {
        set_path(&mut doc, &o.target, o.patch.clone());
    }

    Ok(RebuildOutcome {
        figures: doc,
        insight_count: insights.len() as i32,
        transaction_count: pool.len() as i32,
    })
}

/// Apply every patch targeting this transaction, oldest first. A patch
/// that does not merge into a valid transaction is ignored.
fn patched_transaction(tx: &Transaction, patches: &HashMap<&str, Vec<&JsonValue>>) -> Transaction {
    let mut current = tx.clone();
    if let Some(patches) = patches.get(tx.id.as_str()) {
        for patch in patches {
            match apply_tx_patch(&current, patch) {
                Some(patched) => current = patched,
                None => warn!(tx_id = %tx.id, "transaction override does not merge; ignored"),
            }
        }
    }
    current
}

/// Shallow-merge a patch object into one transaction.
fn apply_tx_patch(tx: &Transaction, patch: &JsonValue) -> Option<Transaction> {
    let JsonValue::Object(patch_map) = patch else {
        return None;
    };
    let mut doc = serde_json::to_value(tx).ok()?;
    let doc_map = doc.as_object_mut()?;
    for (key, value) in patch_map {
        doc_map.insert(key.clone(), value.clone());
    }
    let mut merged: Transaction = serde_json::from_value(doc).ok()?;
    merged.amount = round2(merged.amount.abs());
    Some(merged)
}

fn track_latest(slot: &mut Option<(NaiveDate, f64)>, date: NaiveDate, value: f64) {
    match slot {
        Some((existing, _)) if *existing > date => {}
        _ => *slot = Some((date, value)),
    }
}

fn is_transfer(category: &str) -> bool {
    category.eq_ignore_ascii_case(CATEGORY_TRANSFERS)
}

fn is_salary(category: &str) -> bool {
    category.eq_ignore_ascii_case(CATEGORY_SALARY)
}

fn is_other_income(category: &str) -> bool {
    OTHER_INCOME_CATEGORIES
        .iter()
        .any(|c| category.eq_ignore_ascii_case(c))
}

/// Set a dotted path inside a JSON document, creating intermediate objects
/// as needed. Descending into a non-object leaf replaces it.
fn set_path(doc: &mut JsonValue, path: &str, value: JsonValue) {
    let mut node = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let JsonValue::Object(map) = node else { return };
        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        let entry = map
            .entry(part.to_string())
            .or_insert_with(|| JsonValue::Object(JsonMap::new()));
        if !entry.is_object() {
            *entry = JsonValue::Object(JsonMap::new());
        }
        node = entry;
    }
}
