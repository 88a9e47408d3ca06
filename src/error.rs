// 🚨 Error Taxonomy - what can fail, and what the caller is allowed to learn
//
// AuthError and ValidationError are terminal for the attempt (retry with new input).
// StoreError never leaves the in-memory roster half-updated.
// SchoolError is what every School operation returns.

use crate::access::Role;
use crate::reconciliation::FinancialStatus;
use thiserror::Error;

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Identity or secret did not match. Never says which one.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Identity matched but the account is not clean.
    #[error(
        "access blocked: the account has an outstanding balance. \
         If you do not recognize a charge, report it to the administration office"
    )]
    DebtBlocked { status: FinancialStatus },
}

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("grade must be a number, got {0:?}")]
    NotNumeric(String),

    #[error("grade must be between 0 and 10, got {0}")]
    OutOfRange(f64),

    #[error("grade accepts at most one decimal place, got {0}")]
    TooPrecise(String),

    #[error("payment amount must be positive, got {0}")]
    NonPositiveAmount(f64),

    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A write would move a record to a different owner
    #[error("ownership conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Failures worth exactly one more attempt (lock contention, flaky backend)
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            StoreError::Unavailable(_) => true,
            _ => false,
        }
    }
}

// ============================================================================
// SERVICE ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum SchoolError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("{role} is not allowed to {action}")]
    Forbidden { role: Role, action: &'static str },

    #[error("grades are locked for student {student_id} until the account is clean")]
    GradeLocked { student_id: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl SchoolError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SchoolError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Stable machine-readable code used by the HTTP layer
    pub fn code(&self) -> &'static str {
        match self {
            SchoolError::Auth(AuthError::InvalidCredentials) => "invalid_credentials",
            SchoolError::Auth(AuthError::DebtBlocked { .. }) => "debt_blocked",
            SchoolError::Validation(_) => "validation_error",
            SchoolError::Persistence(_) => "persistence_failure",
            SchoolError::Forbidden { .. } => "forbidden",
            SchoolError::GradeLocked { .. } => "grade_locked",
            SchoolError::NotFound { .. } => "not_found",
            SchoolError::Conflict(_) => "conflict",
            SchoolError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}
