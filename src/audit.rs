// 📜 Audit Log - append-only evidentiary trail
//
// Every login attempt and every security-relevant action appends exactly one
// entry. There is no update or delete API. The log lives outside the roster
// snapshot, so reseeding students never erases it.

use crate::access::Role;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

// ============================================================================
// ACTION KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    LoginSucceeded,
    LoginFailed,
    LoginBlocked,
    PaymentVerified,
    PaymentUnverified,
    PaymentRecorded,
    ProofAttached,
    GradeWritten,
    GradeRejected,
    AccessDenied,
    RosterReseeded,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::LoginSucceeded => "login_succeeded",
            ActionKind::LoginFailed => "login_failed",
            ActionKind::LoginBlocked => "login_blocked",
            ActionKind::PaymentVerified => "payment_verified",
            ActionKind::PaymentUnverified => "payment_unverified",
            ActionKind::PaymentRecorded => "payment_recorded",
            ActionKind::ProofAttached => "proof_attached",
            ActionKind::GradeWritten => "grade_written",
            ActionKind::GradeRejected => "grade_rejected",
            ActionKind::AccessDenied => "access_denied",
            ActionKind::RosterReseeded => "roster_reseeded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s {
            "login_succeeded" => ActionKind::LoginSucceeded,
            "login_failed" => ActionKind::LoginFailed,
            "login_blocked" => ActionKind::LoginBlocked,
            "payment_verified" => ActionKind::PaymentVerified,
            "payment_unverified" => ActionKind::PaymentUnverified,
            "payment_recorded" => ActionKind::PaymentRecorded,
            "proof_attached" => ActionKind::ProofAttached,
            "grade_written" => ActionKind::GradeWritten,
            "grade_rejected" => ActionKind::GradeRejected,
            "access_denied" => ActionKind::AccessDenied,
            "roster_reseeded" => ActionKind::RosterReseeded,
            _ => return None,
        };
        Some(kind)
    }
}

// ============================================================================
// AUDIT ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Assigned by the log on append; 0 until then
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub role: Role,
    pub action: ActionKind,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(
        actor_id: impl Into<String>,
        role: Role,
        action: ActionKind,
        detail: impl Into<String>,
    ) -> Self {
        AuditEntry {
            sequence: 0,
            timestamp: Utc::now(),
            actor_id: actor_id.into(),
            role,
            action,
            detail: detail.into(),
        }
    }
}

// ============================================================================
// AUDIT LOG PORT
// ============================================================================

pub trait AuditLog: Send + Sync {
    /// Append and return the stored entry (with its sequence number)
    fn append(&self, entry: AuditEntry) -> Result<AuditEntry, StoreError>;

    /// All entries, newest first
    fn list(&self) -> Result<Vec<AuditEntry>, StoreError>;
}

/// In-process log for tests and ephemeral runs
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry, StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("audit log lock poisoned".to_string()))?;
        entry.sequence = entries.len() as u64 + 1;
        entries.push(entry.clone());
        Ok(entry)
    }

    fn list(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Unavailable("audit log lock poisoned".to_string()))?;
        Ok(entries.iter().rev().cloned().collect())
    }
}
