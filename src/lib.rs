// NEXT School - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod access;         // Access Gate - login rules and grade gate
pub mod audit;          // Audit Log - append-only trail
pub mod config;         // Environment configuration and tracing setup
pub mod db;             // SQLite persistence (WAL)
pub mod entities;       // Student, Payment, Teacher
pub mod error;          // Error taxonomy
pub mod grades;         // Grade value and two-step editor
pub mod notify;         // Fire-and-forget notifications
pub mod reconciliation; // Status Reconciliation - CLEAN/DEBT
pub mod school;         // School service - the single mutation path
pub mod seed;           // Demo roster and CSV import
pub mod store;          // Persistence port + in-memory store

#[cfg(feature = "server")]
pub mod api;            // REST API (axum)

// Re-export commonly used types
pub use access::{
    authenticate_staff, authenticate_student, can_write_grade,
    CredentialVerifier, Identity, LoginOutcome, Role, StaffAccount, StaticDirectory,
};
pub use audit::{ActionKind, AuditEntry, AuditLog, MemoryAuditLog};
pub use config::AppConfig;
pub use db::{SqliteAuditLog, SqliteStore};
pub use entities::{Payment, PaymentStatus, Student, Teacher};
pub use error::{AuthError, SchoolError, StoreError, ValidationError};
pub use grades::{EditorState, Grade, GradeEditor};
pub use notify::{Notifier, RecordingNotifier, TracingNotifier};
pub use reconciliation::{recompute, reconcile, FinancialStatus, RosterSummary, StatusReport};
pub use school::{PendingVerification, School, TeacherGroup};
pub use store::{MemoryStore, Roster, RosterStore};
