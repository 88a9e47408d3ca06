// ⚖️ Status Reconciliation - derive CLEAN/DEBT from a payment ledger
//
// Rule:
//   DEBT  if any payment is Overdue, or Paid but not yet verified
//   CLEAN otherwise (including an empty ledger)
//
// Operator attestation, not self-report, is the trust boundary: a "Paid"
// payment nobody has verified counts exactly like an overdue one.

use crate::entities::{Payment, PaymentStatus, Student};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// FINANCIAL STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FinancialStatus {
    /// No evidence of debt
    Clean,

    /// At least one overdue or unverified payment
    Debt,
}

impl FinancialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinancialStatus::Clean => "CLEAN",
            FinancialStatus::Debt => "DEBT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CLEAN" => Some(FinancialStatus::Clean),
            "DEBT" => Some(FinancialStatus::Debt),
            _ => None,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, FinancialStatus::Clean)
    }
}

impl fmt::Display for FinancialStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RECOMPUTE
// ============================================================================

/// Binary status of a ledger. No partial or weighted states.
///
/// An empty ledger is CLEAN: no debt signal is treated as paid. A newly
/// enrolled student with no charges issued yet therefore gets full access.
pub fn recompute(payments: &[Payment]) -> FinancialStatus {
    if payments.iter().any(Payment::is_debt) {
        FinancialStatus::Debt
    } else {
        FinancialStatus::Clean
    }
}

// ============================================================================
// STATUS REPORT (status + the evidence behind it)
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: FinancialStatus,
    pub payment_count: usize,
    /// Ids of Overdue payments
    pub overdue: Vec<String>,
    /// Ids of Paid payments still waiting for operator verification
    pub unverified_paid: Vec<String>,
    pub pending_count: usize,
    /// Sum of Pending + Overdue amounts
    pub outstanding_amount: f64,
    pub reconciled_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.status.is_clean()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} payments, {} overdue, {} awaiting verification, ${:.2} outstanding",
            self.status,
            self.payment_count,
            self.overdue.len(),
            self.unverified_paid.len(),
            self.outstanding_amount
        )
    }
}

/// Reconcile a ledger into a full report. `report.status == recompute(payments)`.
pub fn reconcile(payments: &[Payment]) -> StatusReport {
    let overdue: Vec<String> = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Overdue)
        .map(|p| p.id.clone())
        .collect();

    let unverified_paid: Vec<String> = payments
        .iter()
        .filter(|p| p.awaits_verification())
        .map(|p| p.id.clone())
        .collect();

    let pending_count = payments
        .iter()
        .filter(|p| p.status == PaymentStatus::Pending)
        .count();

    StatusReport {
        status: recompute(payments),
        payment_count: payments.len(),
        overdue,
        unverified_paid,
        pending_count,
        outstanding_amount: outstanding_amount(payments),
        reconciled_at: Utc::now(),
    }
}

fn outstanding_amount(payments: &[Payment]) -> f64 {
    payments
        .iter()
        .filter(|p| p.status != PaymentStatus::Paid)
        .map(|p| p.amount)
        .sum()
}

// ============================================================================
// ROSTER SUMMARY (owner dashboard)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterSummary {
    pub total_students: usize,
    pub clean: usize,
    pub debt: usize,
    pub awaiting_verification: usize,
    pub outstanding_amount: f64,
}

pub fn summarize<'a, I>(students: I) -> RosterSummary
where
    I: IntoIterator<Item = &'a Student>,
{
    let mut summary = RosterSummary::default();

    for student in students {
        summary.total_students += 1;
        match student.financial_status() {
            FinancialStatus::Clean => summary.clean += 1,
            FinancialStatus::Debt => summary.debt += 1,
        }
        summary.awaiting_verification += student
            .payments()
            .iter()
            .filter(|p| p.awaits_verification())
            .count();
        summary.outstanding_amount += outstanding_amount(student.payments());
    }

    summary
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn payment(status: PaymentStatus, verified: bool, amount: f64) -> Payment {
        Payment::new(
            "Tuition",
            amount,
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            status,
        )
        .unwrap()
        .with_verified(verified)
    }

    #[test]
    fn test_empty_ledger_is_clean() {
        // Policy default: no evidence of debt means CLEAN
        assert_eq!(recompute(&[]), FinancialStatus::Clean);
    }

    #[test]
    fn test_all_paid_and_verified_is_clean() {
        let ledger = vec![
            payment(PaymentStatus::Paid, true, 100.0),
            payment(PaymentStatus::Paid, true, 250.0),
        ];
        assert_eq!(recompute(&ledger), FinancialStatus::Clean);
    }

    #[test]
    fn test_one_overdue_is_debt() {
        let ledger = vec![
            payment(PaymentStatus::Paid, true, 100.0),
            payment(PaymentStatus::Overdue, false, 80.0),
        ];
        assert_eq!(recompute(&ledger), FinancialStatus::Debt);
    }

    #[test]
    fn test_overdue_stays_debt_even_if_verified() {
        let ledger = vec![payment(PaymentStatus::Overdue, true, 80.0)];
        assert_eq!(recompute(&ledger), FinancialStatus::Debt);
    }

    #[test]
    fn test_one_unverified_paid_among_verified_is_debt() {
        let ledger = vec![
            payment(PaymentStatus::Paid, true, 100.0),
            payment(PaymentStatus::Paid, true, 100.0),
            payment(PaymentStatus::Paid, false, 100.0),
        ];
        assert_eq!(recompute(&ledger), FinancialStatus::Debt);
    }

    #[test]
    fn test_pending_alone_is_clean() {
        let ledger = vec![
            payment(PaymentStatus::Pending, false, 100.0),
            payment(PaymentStatus::Paid, true, 100.0),
        ];
        assert_eq!(recompute(&ledger), FinancialStatus::Clean);
    }

    #[test]
    fn test_recompute_matches_rule_for_every_combination() {
        let statuses = [
            PaymentStatus::Paid,
            PaymentStatus::Pending,
            PaymentStatus::Overdue,
        ];
        for status in statuses {
            for verified in [true, false] {
                let ledger = vec![payment(status, verified, 10.0)];
                let expected_debt = status == PaymentStatus::Overdue
                    || (status == PaymentStatus::Paid && !verified);
                assert_eq!(
                    recompute(&ledger) == FinancialStatus::Debt,
                    expected_debt,
                    "status={:?} verified={}",
                    status,
                    verified
                );
            }
        }
    }

    #[test]
    fn test_report_lists_evidence() {
        let overdue = payment(PaymentStatus::Overdue, false, 80.0);
        let unverified = payment(PaymentStatus::Paid, false, 120.0);
        let pending = payment(PaymentStatus::Pending, false, 40.0);
        let ledger = vec![overdue.clone(), unverified.clone(), pending];

        let report = reconcile(&ledger);

        assert_eq!(report.status, FinancialStatus::Debt);
        assert_eq!(report.payment_count, 3);
        assert_eq!(report.overdue, vec![overdue.id]);
        assert_eq!(report.unverified_paid, vec![unverified.id]);
        assert_eq!(report.pending_count, 1);
        assert!((report.outstanding_amount - 120.0).abs() < 0.001);
        assert!(!report.is_clean());
        assert!(report.summary().starts_with("DEBT"));
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!(FinancialStatus::parse("clean"), Some(FinancialStatus::Clean));
        assert_eq!(FinancialStatus::parse(" DEBT "), Some(FinancialStatus::Debt));
        assert_eq!(FinancialStatus::parse("maybe"), None);
        assert_eq!(FinancialStatus::Debt.to_string(), "DEBT");
        assert_eq!(
            serde_json::to_string(&FinancialStatus::Clean).unwrap(),
            "\"CLEAN\""
        );
    }

    #[test]
    fn test_summarize_roster() {
        let mut clean = Student::new("A-001", "Ana", "2010-01-01", "Centro").unwrap();
        clean.add_payment(payment(PaymentStatus::Paid, true, 100.0));

        let mut blocked = Student::new("A-002", "Luis", "2010-02-02", "Centro").unwrap();
        blocked.add_payment(payment(PaymentStatus::Paid, false, 100.0));
        blocked.add_payment(payment(PaymentStatus::Overdue, false, 60.0));

        let summary = summarize([&clean, &blocked]);

        assert_eq!(summary.total_students, 2);
        assert_eq!(summary.clean, 1);
        assert_eq!(summary.debt, 1);
        assert_eq!(summary.awaiting_verification, 1);
        assert!((summary.outstanding_amount - 60.0).abs() < 0.001);
    }
}
