// 🎓 Student Entity - identity, grade and an owned payment ledger
//
// `financial_status` is a cache of `reconciliation::recompute(payments)`.
// It is private and only `refresh_status` writes it; every method that
// touches the ledger calls it before returning.

use crate::entities::payment::Payment;
use crate::error::ValidationError;
use crate::grades::Grade;
use crate::reconciliation::{self, FinancialStatus, StatusReport};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    /// Stable identity (UUID or campus-assigned id)
    pub id: String,

    /// Matrícula - the login identifier
    pub enrollment: String,

    pub name: String,

    /// Secondary login credential (date of birth as written on the enrollment form)
    #[serde(skip_serializing)]
    credential: String,

    /// Sede the student attends
    pub campus: String,

    /// Lookup relation to a Teacher; None = unassigned
    pub teacher_id: Option<String>,

    grade: Option<Grade>,

    financial_status: FinancialStatus,

    payments: Vec<Payment>,
}

impl Student {
    /// Create a newly enrolled student with an empty ledger
    pub fn new(
        enrollment: impl Into<String>,
        name: impl Into<String>,
        credential: impl Into<String>,
        campus: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let enrollment = required(enrollment.into(), "enrollment")?;
        let name = required(name.into(), "name")?;
        let credential = required(credential.into(), "credential")?;

        let mut student = Student {
            id: uuid::Uuid::new_v4().to_string(),
            enrollment,
            name,
            credential,
            campus: campus.into().trim().to_string(),
            teacher_id: None,
            grade: None,
            financial_status: FinancialStatus::Clean,
            payments: Vec::new(),
        };
        student.refresh_status();
        Ok(student)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_teacher(mut self, teacher_id: impl Into<String>) -> Self {
        self.teacher_id = Some(teacher_id.into());
        self
    }

    pub fn with_grade(mut self, grade: Option<Grade>) -> Self {
        self.grade = grade;
        self
    }

    /// Replace the whole ledger (used when restoring from a store)
    pub fn with_payments(mut self, payments: Vec<Payment>) -> Self {
        self.payments = payments;
        self.refresh_status();
        self
    }

    // ========================================================================
    // DERIVED STATUS
    // ========================================================================

    pub fn financial_status(&self) -> FinancialStatus {
        self.financial_status
    }

    /// Recompute the cached status from the current ledger
    pub fn refresh_status(&mut self) -> FinancialStatus {
        self.financial_status = reconciliation::recompute(&self.payments);
        self.financial_status
    }

    pub fn status_report(&self) -> StatusReport {
        reconciliation::reconcile(&self.payments)
    }

    // ========================================================================
    // LEDGER
    // ========================================================================

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn payment(&self, payment_id: &str) -> Option<&Payment> {
        self.payments.iter().find(|p| p.id == payment_id)
    }

    /// Append a payment to the ledger
    pub fn add_payment(&mut self, payment: Payment) -> FinancialStatus {
        self.payments.push(payment);
        self.refresh_status()
    }

    /// Set the verified flag. Returns the new status, or None if the payment
    /// is not in this ledger.
    pub fn set_payment_verified(
        &mut self,
        payment_id: &str,
        verified: bool,
    ) -> Option<FinancialStatus> {
        let payment = self.payments.iter_mut().find(|p| p.id == payment_id)?;
        payment.verified = verified;
        Some(self.refresh_status())
    }

    /// Attach a proof-of-payment reference. Returns None if the payment is unknown.
    pub fn set_payment_proof(
        &mut self,
        payment_id: &str,
        proof_url: impl Into<String>,
    ) -> Option<FinancialStatus> {
        let payment = self.payments.iter_mut().find(|p| p.id == payment_id)?;
        payment.proof_url = Some(proof_url.into());
        Some(self.refresh_status())
    }

    // ========================================================================
    // CREDENTIAL & GRADE
    // ========================================================================

    pub fn credential_matches(&self, credential: &str) -> bool {
        self.credential == credential.trim()
    }

    pub(crate) fn credential(&self) -> &str {
        &self.credential
    }

    pub fn grade(&self) -> Option<Grade> {
        self.grade
    }

    /// Unchecked write. Callers outside the crate go through `School::write_grade`,
    /// which applies the grade gate.
    pub(crate) fn record_grade(&mut self, grade: Option<Grade>) {
        self.grade = grade;
    }
}

fn required(value: String, field: &'static str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ValidationError::EmptyField(field))
    } else {
        Ok(trimmed.to_string())
    }
}
