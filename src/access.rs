// 🔐 Access Gate - who may log in, and who may touch a grade
//
// Students log in with matrícula + date of birth and are debt-gated.
// Staff (owner, admin, teacher) are checked against a pluggable
// CredentialVerifier and are never debt-gated.

use crate::entities::Student;
use crate::error::{AuthError, SchoolError};
use crate::reconciliation::FinancialStatus;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

// ============================================================================
// ROLES & IDENTITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    /// Owner and Admin may verify payments and manage the roster
    pub fn is_administrative(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Student id, Teacher id, or staff account id
    pub actor_id: String,
    pub role: Role,
    pub display_name: String,
}

impl Identity {
    pub fn new(actor_id: impl Into<String>, role: Role, display_name: impl Into<String>) -> Self {
        Identity {
            actor_id: actor_id.into(),
            role,
            display_name: display_name.into(),
        }
    }

    /// Maintenance actor used by the CLI (seeding, imports)
    pub fn system() -> Self {
        Identity::new("system", Role::Owner, "System")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOutcome {
    pub granted: bool,
    pub status: FinancialStatus,
    pub identity: Identity,
}

// ============================================================================
// CREDENTIAL VERIFICATION (pluggable)
// ============================================================================

/// Verify a claimed staff identity. Production plugs in a real directory.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, identifier: &str, credential: &str, role: Role) -> Option<Identity>;
}

/// SHA-256 hex digest of a secret
pub fn digest_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffAccount {
    /// Login identifier (e-mail or staff number)
    pub identifier: String,

    /// Id the actor acts as; for teachers this is the Teacher.id
    pub actor_id: String,

    pub name: String,
    pub role: Role,

    /// Hex SHA-256 of the secret
    pub secret_sha256: String,
}

/// Fixed allow-list of staff accounts
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    accounts: Vec<StaffAccount>,
}

impl StaticDirectory {
    pub fn new(accounts: Vec<StaffAccount>) -> Self {
        StaticDirectory { accounts }
    }

    /// Add an account, hashing the plain secret
    pub fn with_account(
        mut self,
        identifier: &str,
        actor_id: &str,
        name: &str,
        role: Role,
        secret: &str,
    ) -> Self {
        self.accounts.push(StaffAccount {
            identifier: identifier.to_string(),
            actor_id: actor_id.to_string(),
            name: name.to_string(),
            role,
            secret_sha256: digest_secret(secret),
        });
        self
    }

    /// Development accounts matching `seed::demo_roster`
    pub fn fixture() -> Self {
        StaticDirectory::default()
            .with_account("owner@next.edu", "owner", "Dirección General", Role::Owner, "next-owner")
            .with_account("admin@next.edu", "admin", "Control Escolar", Role::Admin, "next-admin")
            .with_account("lucia@next.edu", "T-001", "Lucía Hernández", Role::Teacher, "profe-001")
            .with_account("jorge@next.edu", "T-002", "Jorge Martínez", Role::Teacher, "profe-002")
    }

    /// Load accounts from a JSON array of `StaffAccount`
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read staff directory {}", path.display()))?;
        let accounts: Vec<StaffAccount> =
            serde_json::from_str(&raw).context("Failed to parse staff directory")?;
        Ok(StaticDirectory::new(accounts))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl CredentialVerifier for StaticDirectory {
    fn verify(&self, identifier: &str, credential: &str, role: Role) -> Option<Identity> {
        if role == Role::Student {
            return None;
        }
        let presented = digest_secret(credential);
        self.accounts
            .iter()
            .find(|a| {
                a.role == role
                    && a.identifier.eq_ignore_ascii_case(identifier.trim())
                    && a.secret_sha256 == presented
            })
            .map(|a| Identity::new(a.actor_id.clone(), a.role, a.name.clone()))
    }
}

// ============================================================================
// LOGIN RULES
// ============================================================================

/// Student login: identity must match, then the account must be CLEAN.
///
/// `student` is the result of the enrollment lookup (None = unknown matrícula).
pub fn authenticate_student(
    student: Option<&Student>,
    credential: &str,
) -> Result<LoginOutcome, AuthError> {
    let student = match student {
        Some(s) if s.credential_matches(credential) => s,
        _ => return Err(AuthError::InvalidCredentials),
    };

    match student.financial_status() {
        FinancialStatus::Debt => Err(AuthError::DebtBlocked {
            status: FinancialStatus::Debt,
        }),
        FinancialStatus::Clean => Ok(LoginOutcome {
            granted: true,
            status: FinancialStatus::Clean,
            identity: Identity::new(student.id.clone(), Role::Student, student.name.clone()),
        }),
    }
}

/// Staff login through the directory. Staff report CLEAN.
pub fn authenticate_staff(
    verifier: &dyn CredentialVerifier,
    identifier: &str,
    credential: &str,
    role: Role,
) -> Result<LoginOutcome, AuthError> {
    verifier
        .verify(identifier, credential, role)
        .map(|identity| LoginOutcome {
            granted: true,
            status: FinancialStatus::Clean,
            identity,
        })
        .ok_or(AuthError::InvalidCredentials)
}

// ============================================================================
// GRADE GATE & AUTHORIZATION
// ============================================================================

/// A grade may be written only for a CLEAN student
pub fn can_write_grade(student: &Student) -> bool {
    student.financial_status() == FinancialStatus::Clean
}

/// Owner/Admin only
pub fn require_administrative(actor: &Identity, action: &'static str) -> Result<(), SchoolError> {
    if actor.role.is_administrative() {
        Ok(())
    } else {
        Err(SchoolError::Forbidden {
            role: actor.role,
            action,
        })
    }
}

/// Admins grade anyone; a teacher grades only assigned students
pub fn may_grade(actor: &Identity, student: &Student) -> bool {
    match actor.role {
        Role::Owner | Role::Admin => true,
        Role::Teacher => student.teacher_id.as_deref() == Some(actor.actor_id.as_str()),
        Role::Student => false,
    }
}
