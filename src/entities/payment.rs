// 💵 Payment Entity - one line in a student's ledger
//
// Payments are append-only: created at enrollment or when a charge is issued,
// never deleted. After creation only `verified` (operator attestation) and the
// proof-of-payment reference change.

use crate::error::ValidationError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PAYMENT STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentStatus {
    /// Reported as paid (needs verification to count)
    Paid,

    /// Issued, not yet due
    Pending,

    /// Past due and unpaid
    Overdue,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Overdue => "Overdue",
        }
    }

    /// Parse a status label. Accepts the Spanish labels used by campus exports.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "paid" | "pagado" => Some(PaymentStatus::Paid),
            "pending" | "pendiente" => Some(PaymentStatus::Pending),
            "overdue" | "vencido" => Some(PaymentStatus::Overdue),
            _ => None,
        }
    }
}

// ============================================================================
// PAYMENT ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Stable identity (UUID)
    pub id: String,

    /// What the charge is for (e.g., "Colegiatura Marzo")
    pub concept: String,

    /// Always > 0
    pub amount: f64,

    pub due_date: NaiveDate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_date: Option<NaiveDate>,

    pub status: PaymentStatus,

    /// Set by an owner/admin once the money is confirmed
    #[serde(default)]
    pub verified: bool,

    /// Opaque pointer to an uploaded receipt; never interpreted here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_url: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Create a new unverified payment
    pub fn new(
        concept: impl Into<String>,
        amount: f64,
        due_date: NaiveDate,
        status: PaymentStatus,
    ) -> Result<Self, ValidationError> {
        let concept = concept.into();
        if concept.trim().is_empty() {
            return Err(ValidationError::EmptyField("concept"));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ValidationError::NonPositiveAmount(amount));
        }

        Ok(Payment {
            id: uuid::Uuid::new_v4().to_string(),
            concept: concept.trim().to_string(),
            amount,
            due_date,
            paid_date: None,
            status,
            verified: false,
            proof_url: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = verified;
        self
    }

    pub fn with_paid_date(mut self, paid_date: NaiveDate) -> Self {
        self.paid_date = Some(paid_date);
        self
    }

    pub fn with_proof(mut self, proof_url: impl Into<String>) -> Self {
        self.proof_url = Some(proof_url.into());
        self
    }

    /// Counts against the student: overdue, or paid without attestation
    pub fn is_debt(&self) -> bool {
        match self.status {
            PaymentStatus::Overdue => true,
            PaymentStatus::Paid => !self.verified,
            PaymentStatus::Pending => false,
        }
    }

    /// Reported paid, waiting on an operator
    pub fn awaits_verification(&self) -> bool {
        self.status == PaymentStatus::Paid && !self.verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn due() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    #[test]
    fn test_new_payment_is_unverified() {
        let p = Payment::new("Colegiatura Marzo", 1500.0, due(), PaymentStatus::Paid).unwrap();
        assert!(!p.verified);
        assert!(p.awaits_verification());
        assert!(p.is_debt());
        assert_eq!(p.id.len(), 36);
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        for amount in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let result = Payment::new("Inscripción", amount, due(), PaymentStatus::Pending);
            assert!(
                matches!(result, Err(ValidationError::NonPositiveAmount(_))),
                "amount {} should be rejected",
                amount
            );
        }
    }

    #[test]
    fn test_rejects_empty_concept() {
        let result = Payment::new("   ", 10.0, due(), PaymentStatus::Pending);
        assert_eq!(result, Err(ValidationError::EmptyField("concept")));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(PaymentStatus::parse("Paid"), Some(PaymentStatus::Paid));
        assert_eq!(PaymentStatus::parse("VENCIDO"), Some(PaymentStatus::Overdue));
        assert_eq!(PaymentStatus::parse("pendiente"), Some(PaymentStatus::Pending));
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let p = Payment::new("Uniforme", 300.0, due(), PaymentStatus::Pending)
            .unwrap()
            .with_proof("uploads/receipt-1.jpg");
        let json = serde_json::to_value(&p).unwrap();
        assert_eq!(json["dueDate"], "2025-03-10");
        assert_eq!(json["proofUrl"], "uploads/receipt-1.jpg");
        assert_eq!(json["status"], "Pending");
        assert!(json.get("paidDate").is_none());
    }
}
