// 🏫 School Service - the one place that mutates the roster
//
// Every role-specific view (owner, teacher, student portals, HTTP API, CLI)
// calls into School; none of them re-implement status or gate rules.
//
// Locking:
//   registry (RwLock)  -> index of students, payments, teachers
//   student  (Mutex)   -> per-aggregate critical section
// Order is always registry then student, and the registry lock is released
// before a student lock is held for a write.
//
// Mutation recipe (all-or-nothing):
//   lock student -> mutate a copy -> recompute status -> persist copy
//   -> only then swap the copy in

use crate::access::{self, CredentialVerifier, Identity, LoginOutcome, Role};
use crate::audit::{ActionKind, AuditEntry, AuditLog};
use crate::entities::{Payment, Student, Teacher};
use crate::error::{AuthError, SchoolError, StoreError, ValidationError};
use crate::grades::Grade;
use crate::notify::Notifier;
use crate::reconciliation::{self, FinancialStatus, RosterSummary};
use crate::store::{with_single_retry, Roster, RosterStore};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

type StudentHandle = Arc<Mutex<Student>>;

#[derive(Default)]
struct Registry {
    students: HashMap<String, StudentHandle>,
    by_enrollment: HashMap<String, String>,
    /// payment id -> owning student id
    by_payment: HashMap<String, String>,
    teachers: Vec<Teacher>,
}

impl Registry {
    fn from_roster(roster: Roster) -> Self {
        let mut registry = Registry {
            teachers: roster.teachers,
            ..Registry::default()
        };
        for mut student in roster.students {
            // The cached status is never trusted across a load
            student.refresh_status();
            registry.insert(student);
        }
        registry
    }

    fn insert(&mut self, student: Student) {
        for payment in student.payments() {
            self.by_payment.insert(payment.id.clone(), student.id.clone());
        }
        self.by_enrollment
            .insert(student.enrollment.clone(), student.id.clone());
        self.students
            .insert(student.id.clone(), Arc::new(Mutex::new(student)));
    }
}

/// Students of one teacher, or the unassigned bucket (`teacher == None`)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherGroup {
    pub teacher: Option<Teacher>,
    pub students: Vec<Student>,
}

/// A Paid payment nobody has verified yet
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingVerification {
    pub student_id: String,
    pub enrollment: String,
    pub student_name: String,
    pub payment: Payment,
}

pub struct School {
    registry: RwLock<Registry>,
    store: Arc<dyn RosterStore>,
    audit: Arc<dyn AuditLog>,
    directory: Arc<dyn CredentialVerifier>,
    notifier: Arc<dyn Notifier>,
}

impl School {
    /// Load the roster from the store and recompute every student's status
    pub fn open(
        store: Arc<dyn RosterStore>,
        audit: Arc<dyn AuditLog>,
        directory: Arc<dyn CredentialVerifier>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, StoreError> {
        let roster = store.load_roster()?;
        if let Some(duplicate) = roster.find_duplicate() {
            return Err(StoreError::Corrupt(format!("duplicate {} in stored roster", duplicate)));
        }
        info!(
            students = roster.students.len(),
            teachers = roster.teachers.len(),
            payments = roster.payment_count(),
            "roster loaded"
        );

        Ok(School {
            registry: RwLock::new(Registry::from_roster(roster)),
            store,
            audit,
            directory,
            notifier,
        })
    }

    // ========================================================================
    // AUTHENTICATION
    // ========================================================================

    /// Authenticate any role. Appends exactly one audit entry per attempt.
    ///
    /// If the audit entry cannot be written the attempt fails with a
    /// persistence error and nothing is granted.
    pub fn authenticate(
        &self,
        identifier: &str,
        credential: &str,
        role: Role,
    ) -> Result<LoginOutcome, SchoolError> {
        let identifier = identifier.trim();

        let result = match role {
            Role::Student => {
                let handle = self.handle_by_enrollment(identifier);
                let student = handle.as_ref().map(lock);
                access::authenticate_student(student.as_deref(), credential)
            }
            _ => access::authenticate_staff(self.directory.as_ref(), identifier, credential, role),
        };

        let (action, detail) = match &result {
            Ok(_) => (ActionKind::LoginSucceeded, "clean login"),
            Err(AuthError::InvalidCredentials) => (ActionKind::LoginFailed, "invalid credentials"),
            Err(AuthError::DebtBlocked { .. }) => (ActionKind::LoginBlocked, "blocked by debt"),
        };
        self.audit.append(AuditEntry::new(identifier, role, action, detail))?;

        match &result {
            Ok(outcome) => info!(%role, actor = %outcome.identity.actor_id, "login granted"),
            Err(err) => warn!(%role, identifier, reason = detail, "login refused: {}", err),
        }

        result.map_err(SchoolError::from)
    }

    // ========================================================================
    // VERIFICATION ACTION
    // ========================================================================

    /// Set a payment's verified flag and return the student with its
    /// recomputed status. Owner/Admin only.
    pub fn set_verified(
        &self,
        actor: &Identity,
        payment_id: &str,
        verified: bool,
    ) -> Result<Student, SchoolError> {
        self.authorize_administrative(actor, "verify payments")?;
        let handle = self.handle_by_payment(payment_id)?;

        let mut before = FinancialStatus::Clean;
        let student = self.mutate(&handle, |student| {
            before = student.financial_status();
            student
                .set_payment_verified(payment_id, verified)
                .map(|_| ())
                .ok_or_else(|| SchoolError::not_found("payment", payment_id))
        })?;

        let action = if verified {
            ActionKind::PaymentVerified
        } else {
            ActionKind::PaymentUnverified
        };
        self.record(
            actor,
            action,
            format!(
                "payment {} of {}: {} -> {}",
                payment_id,
                student.enrollment,
                before,
                student.financial_status()
            ),
        );
        info!(
            payment = payment_id,
            student = %student.id,
            verified,
            status = %student.financial_status(),
            "payment verification updated"
        );
        self.notifier.notify(&format!(
            "Payment {} for {}. Status: {}",
            if verified { "verified" } else { "unverified" },
            student.name,
            student.financial_status()
        ));

        Ok(student)
    }

    // ========================================================================
    // GRADES
    // ========================================================================

    pub fn can_write_grade(&self, student_id: &str) -> Result<bool, SchoolError> {
        let handle = self.handle(student_id)?;
        let student = lock(&handle);
        Ok(access::can_write_grade(&student))
    }

    /// Persist a grade. The gate is checked inside the student's critical
    /// section, so a concurrent verification cannot slip in between.
    pub fn write_grade(
        &self,
        actor: &Identity,
        student_id: &str,
        grade: Grade,
    ) -> Result<Student, SchoolError> {
        let handle = self.handle(student_id)?;

        let result = self.mutate(&handle, |student| {
            if !access::may_grade(actor, student) {
                return Err(SchoolError::Forbidden {
                    role: actor.role,
                    action: "grade this student",
                });
            }
            if !access::can_write_grade(student) {
                return Err(SchoolError::GradeLocked {
                    student_id: student.id.clone(),
                });
            }
            student.record_grade(Some(grade));
            Ok(())
        });

        match &result {
            Ok(student) => {
                self.record(
                    actor,
                    ActionKind::GradeWritten,
                    format!("{} graded {}", student.enrollment, grade),
                );
                info!(student = student_id, %grade, "grade written");
            }
            Err(SchoolError::GradeLocked { .. }) => {
                self.record(
                    actor,
                    ActionKind::GradeRejected,
                    format!("grade {} for {} refused: account in debt", grade, student_id),
                );
                warn!(student = student_id, actor = %actor.actor_id, "grade write refused, student in debt");
            }
            Err(SchoolError::Forbidden { .. }) => {
                self.record(
                    actor,
                    ActionKind::AccessDenied,
                    format!("grade for {} outside assignment", student_id),
                );
            }
            Err(_) => {}
        }

        result
    }

    // ========================================================================
    // LEDGER & ROSTER MANAGEMENT
    // ========================================================================

    /// Append a payment to a student's ledger. Owner/Admin only.
    pub fn record_payment(
        &self,
        actor: &Identity,
        student_id: &str,
        payment: Payment,
    ) -> Result<Student, SchoolError> {
        self.authorize_administrative(actor, "record payments")?;

        let mut registry = write(&self.registry);
        if registry.by_payment.contains_key(&payment.id) {
            return Err(SchoolError::Conflict(format!("payment {} already exists", payment.id)));
        }
        let handle = registry
            .students
            .get(student_id)
            .cloned()
            .ok_or_else(|| SchoolError::not_found("student", student_id))?;

        let payment_id = payment.id.clone();
        let concept = payment.concept.clone();
        let student = self.mutate(&handle, move |student| {
            student.add_payment(payment);
            Ok(())
        })?;
        registry
            .by_payment
            .insert(payment_id.clone(), student.id.clone());
        drop(registry);

        self.record(
            actor,
            ActionKind::PaymentRecorded,
            format!("{} ({}) added to {}", payment_id, concept, student.enrollment),
        );
        Ok(student)
    }

    /// Attach a proof-of-payment reference. The owning student or an admin.
    /// Does not verify the payment.
    pub fn attach_proof(
        &self,
        actor: &Identity,
        payment_id: &str,
        proof_url: &str,
    ) -> Result<Student, SchoolError> {
        let proof_url = proof_url.trim();
        if proof_url.is_empty() {
            return Err(ValidationError::EmptyField("proof url").into());
        }
        let handle = self.handle_by_payment(payment_id)?;

        let owner_id = lock(&handle).id.clone();
        let allowed = actor.role.is_administrative()
            || (actor.role == Role::Student && actor.actor_id == owner_id);
        if !allowed {
            self.record(
                actor,
                ActionKind::AccessDenied,
                format!("proof upload for payment {}", payment_id),
            );
            return Err(SchoolError::Forbidden {
                role: actor.role,
                action: "attach proof to this payment",
            });
        }

        let student = self.mutate(&handle, |student| {
            student
                .set_payment_proof(payment_id, proof_url)
                .map(|_| ())
                .ok_or_else(|| SchoolError::not_found("payment", payment_id))
        })?;

        self.record(actor, ActionKind::ProofAttached, format!("payment {}", payment_id));
        self.notifier
            .notify(&format!("Proof received for {}, awaiting verification", student.name));
        Ok(student)
    }

    /// Enroll a new student. Owner/Admin only; enrollment numbers are unique.
    pub fn enroll_student(&self, actor: &Identity, student: Student) -> Result<Student, SchoolError> {
        self.authorize_administrative(actor, "enroll students")?;

        let mut student = student;
        student.refresh_status();

        let mut registry = write(&self.registry);
        if registry.by_enrollment.contains_key(&student.enrollment) {
            return Err(SchoolError::Conflict(format!(
                "enrollment {} already exists",
                student.enrollment
            )));
        }
        if registry.students.contains_key(&student.id) {
            return Err(SchoolError::Conflict(format!("student {} already exists", student.id)));
        }
        let mut incoming = HashSet::new();
        for payment in student.payments() {
            if registry.by_payment.contains_key(&payment.id) || !incoming.insert(payment.id.as_str()) {
                return Err(SchoolError::Conflict(format!("payment {} already exists", payment.id)));
            }
        }
        if let Some(teacher_id) = &student.teacher_id {
            if !registry.teachers.iter().any(|t| &t.id == teacher_id) {
                return Err(SchoolError::not_found("teacher", teacher_id.clone()));
            }
        }

        with_single_retry("save_student", || self.store.save_student(&student))?;
        registry.insert(student.clone());
        drop(registry);

        info!(student = %student.id, enrollment = %student.enrollment, "student enrolled");
        Ok(student)
    }

    pub fn add_teacher(&self, actor: &Identity, teacher: Teacher) -> Result<Teacher, SchoolError> {
        self.authorize_administrative(actor, "manage teachers")?;

        let mut registry = write(&self.registry);
        if registry.teachers.iter().any(|t| t.id == teacher.id) {
            return Err(SchoolError::Conflict(format!("teacher {} already exists", teacher.id)));
        }
        with_single_retry("save_teacher", || self.store.save_teacher(&teacher))?;
        registry.teachers.push(teacher.clone());
        Ok(teacher)
    }

    /// Assign (or with None, unassign) a student's teacher. Owner/Admin only.
    pub fn assign_teacher(
        &self,
        actor: &Identity,
        student_id: &str,
        teacher_id: Option<&str>,
    ) -> Result<Student, SchoolError> {
        self.authorize_administrative(actor, "assign teachers")?;

        if let Some(teacher_id) = teacher_id {
            let registry = read(&self.registry);
            if !registry.teachers.iter().any(|t| t.id == teacher_id) {
                return Err(SchoolError::not_found("teacher", teacher_id));
            }
        }
        let handle = self.handle(student_id)?;
        self.mutate(&handle, |student| {
            student.teacher_id = teacher_id.map(str::to_string);
            Ok(())
        })
    }

    /// Replace all operational data. The audit log is left untouched.
    pub fn reseed(&self, actor: &Identity, roster: Roster) -> Result<(), SchoolError> {
        self.authorize_administrative(actor, "reseed the roster")?;
        if let Some(duplicate) = roster.find_duplicate() {
            return Err(SchoolError::Conflict(format!("duplicate {} in roster", duplicate)));
        }

        let mut registry = write(&self.registry);
        with_single_retry("save_roster", || self.store.save_roster(&roster))?;
        let detail = format!(
            "{} students, {} teachers, {} payments",
            roster.students.len(),
            roster.teachers.len(),
            roster.payment_count()
        );
        *registry = Registry::from_roster(roster);
        drop(registry);

        self.record(actor, ActionKind::RosterReseeded, detail);
        Ok(())
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// All students, sorted by name
    pub fn students(&self) -> Vec<Student> {
        let mut students: Vec<Student> = read(&self.registry)
            .students
            .values()
            .map(|h| lock(h).clone())
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.enrollment.cmp(&b.enrollment)));
        students
    }

    pub fn student(&self, student_id: &str) -> Result<Student, SchoolError> {
        let handle = self.handle(student_id)?;
        let student = lock(&handle).clone();
        Ok(student)
    }

    pub fn student_by_enrollment(&self, enrollment: &str) -> Result<Student, SchoolError> {
        let handle = self
            .handle_by_enrollment(enrollment.trim())
            .ok_or_else(|| SchoolError::not_found("enrollment", enrollment))?;
        let student = lock(&handle).clone();
        Ok(student)
    }

    pub fn teachers(&self) -> Vec<Teacher> {
        read(&self.registry).teachers.clone()
    }

    pub fn teachers_on_campus(&self, campus: &str) -> Vec<Teacher> {
        read(&self.registry)
            .teachers
            .iter()
            .filter(|t| t.teaches_at(campus))
            .cloned()
            .collect()
    }

    /// One group per teacher (in roster order) then the unassigned bucket.
    /// Students pointing at an unknown teacher land in the unassigned bucket.
    pub fn students_by_teacher(&self) -> Vec<TeacherGroup> {
        let teachers = self.teachers();
        let mut groups: Vec<TeacherGroup> = teachers
            .into_iter()
            .map(|teacher| TeacherGroup {
                teacher: Some(teacher),
                students: Vec::new(),
            })
            .collect();
        let mut unassigned = Vec::new();

        for student in self.students() {
            let slot = student.teacher_id.as_deref().and_then(|id| {
                groups
                    .iter_mut()
                    .find(|g| g.teacher.as_ref().map(|t| t.id.as_str()) == Some(id))
            });
            match slot {
                Some(group) => group.students.push(student),
                None => unassigned.push(student),
            }
        }

        groups.push(TeacherGroup {
            teacher: None,
            students: unassigned,
        });
        groups
    }

    /// Owner dashboard figures
    pub fn summary(&self) -> RosterSummary {
        let students = self.students();
        reconciliation::summarize(&students)
    }

    /// Paid payments waiting for an operator, oldest due date first
    pub fn pending_verifications(&self) -> Vec<PendingVerification> {
        let mut pending: Vec<PendingVerification> = self
            .students()
            .into_iter()
            .flat_map(|student| {
                student
                    .payments()
                    .iter()
                    .filter(|p| p.awaits_verification())
                    .map(|p| PendingVerification {
                        student_id: student.id.clone(),
                        enrollment: student.enrollment.clone(),
                        student_name: student.name.clone(),
                        payment: p.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        pending.sort_by(|a, b| a.payment.due_date.cmp(&b.payment.due_date));
        pending
    }

    pub fn audit_log(&self) -> Result<Vec<AuditEntry>, SchoolError> {
        Ok(self.audit.list()?)
    }

    pub fn status_of(&self, student_id: &str) -> Result<FinancialStatus, SchoolError> {
        let handle = self.handle(student_id)?;
        let status = lock(&handle).financial_status();
        Ok(status)
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    /// Run `change` on a copy inside the student's critical section, recompute,
    /// persist, then commit. Any error leaves the in-memory student untouched.
    fn mutate<F>(&self, handle: &StudentHandle, change: F) -> Result<Student, SchoolError>
    where
        F: FnOnce(&mut Student) -> Result<(), SchoolError>,
    {
        let mut guard = lock(handle);
        let mut draft = guard.clone();

        change(&mut draft)?;
        draft.refresh_status();

        with_single_retry("save_student", || self.store.save_student(&draft))?;
        *guard = draft.clone();
        Ok(draft)
    }

    fn authorize_administrative(
        &self,
        actor: &Identity,
        action: &'static str,
    ) -> Result<(), SchoolError> {
        access::require_administrative(actor, action).inspect_err(|_| {
            warn!(actor = %actor.actor_id, role = %actor.role, action, "forbidden");
            self.record(actor, ActionKind::AccessDenied, action.to_string());
        })
    }

    /// Append a post-commit audit entry. The mutation already happened, so a
    /// failure here is logged, not returned.
    fn record(&self, actor: &Identity, action: ActionKind, detail: String) {
        let entry = AuditEntry::new(actor.actor_id.clone(), actor.role, action, detail);
        if let Err(err) = self.audit.append(entry) {
            error!(action = action.as_str(), error = %err, "failed to append audit entry");
        }
    }

    fn handle(&self, student_id: &str) -> Result<StudentHandle, SchoolError> {
        read(&self.registry)
            .students
            .get(student_id)
            .cloned()
            .ok_or_else(|| SchoolError::not_found("student", student_id))
    }

    fn handle_by_enrollment(&self, enrollment: &str) -> Option<StudentHandle> {
        let registry = read(&self.registry);
        registry
            .by_enrollment
            .get(enrollment)
            .and_then(|id| registry.students.get(id))
            .cloned()
    }

    fn handle_by_payment(&self, payment_id: &str) -> Result<StudentHandle, SchoolError> {
        let registry = read(&self.registry);
        registry
            .by_payment
            .get(payment_id)
            .and_then(|id| registry.students.get(id))
            .cloned()
            .ok_or_else(|| SchoolError::not_found("payment", payment_id))
    }
}

// State is only swapped in after a successful persist, so a poisoned lock
// still guards a consistent value.
fn lock(handle: &StudentHandle) -> MutexGuard<'_, Student> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read(registry: &RwLock<Registry>) -> RwLockReadGuard<'_, Registry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(registry: &RwLock<Registry>) -> RwLockWriteGuard<'_, Registry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// TESTS
// ============================================================================
