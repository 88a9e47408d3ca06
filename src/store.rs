// 🗄️ Persistence Port - roster snapshots and single-aggregate updates
//
// The core never talks to a database directly. Everything goes through
// RosterStore so the backing store (memory, SQLite, remote) is swappable.

use crate::entities::{Student, Teacher};
use crate::error::StoreError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ============================================================================
// ROSTER SNAPSHOT
// ============================================================================

/// Whole operational dataset. Payments travel inside their students.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    pub students: Vec<Student>,
    pub teachers: Vec<Teacher>,
}

impl Roster {
    pub fn new(students: Vec<Student>, teachers: Vec<Teacher>) -> Self {
        Roster { students, teachers }
    }

    pub fn payment_count(&self) -> usize {
        self.students.iter().map(|s| s.payments().len()).sum()
    }

    /// First identifier used twice, e.g. `"payment p-1"`. Payment ids are
    /// unique across the whole roster, not just within one ledger.
    pub fn find_duplicate(&self) -> Option<String> {
        let mut students = HashSet::new();
        let mut enrollments = HashSet::new();
        let mut payments = HashSet::new();
        let mut teachers = HashSet::new();

        if let Some(t) = self.teachers.iter().find(|t| !teachers.insert(t.id.as_str())) {
            return Some(format!("teacher {}", t.id));
        }
        for student in &self.students {
            if !students.insert(student.id.as_str()) {
                return Some(format!("student {}", student.id));
            }
            if !enrollments.insert(student.enrollment.as_str()) {
                return Some(format!("enrollment {}", student.enrollment));
            }
            if let Some(p) = student.payments().iter().find(|p| !payments.insert(p.id.as_str())) {
                return Some(format!("payment {}", p.id));
            }
        }
        None
    }
}

// ============================================================================
// STORE PORT
// ============================================================================

pub trait RosterStore: Send + Sync {
    fn load_roster(&self) -> Result<Roster, StoreError>;

    /// Replace the whole snapshot
    fn save_roster(&self, roster: &Roster) -> Result<(), StoreError>;

    /// Atomically upsert one student together with its ledger
    fn save_student(&self, student: &Student) -> Result<(), StoreError>;

    fn save_teacher(&self, teacher: &Teacher) -> Result<(), StoreError>;
}

/// Run a store write, retrying once on a transient failure.
///
/// A second failure, or any non-transient one, is returned immediately.
pub fn with_single_retry<T, F>(operation: &str, mut write: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    match write() {
        Err(err) if err.is_transient() => {
            tracing::warn!(operation, error = %err, "transient store failure, retrying once");
            write()
        }
        other => other,
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Volatile store. `fail_next_writes` injects transient failures.
#[derive(Debug, Default)]
pub struct MemoryStore {
    roster: Mutex<Roster>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roster(roster: Roster) -> Self {
        MemoryStore {
            roster: Mutex::new(roster),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` writes fail with `StoreError::Unavailable`
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Copy of what is currently persisted
    pub fn snapshot(&self) -> Result<Roster, StoreError> {
        self.load_roster()
    }

    fn check_write(&self) -> Result<(), StoreError> {
        let consumed = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(StoreError::Unavailable("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Roster>, StoreError> {
        self.roster
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl RosterStore for MemoryStore {
    fn load_roster(&self) -> Result<Roster, StoreError> {
        Ok(self.lock()?.clone())
    }

    fn save_roster(&self, roster: &Roster) -> Result<(), StoreError> {
        self.check_write()?;
        *self.lock()? = roster.clone();
        Ok(())
    }

    fn save_student(&self, student: &Student) -> Result<(), StoreError> {
        self.check_write()?;
        let mut roster = self.lock()?;
        match roster.students.iter_mut().find(|s| s.id == student.id) {
            Some(existing) => *existing = student.clone(),
            None => roster.students.push(student.clone()),
        }
        Ok(())
    }

    fn save_teacher(&self, teacher: &Teacher) -> Result<(), StoreError> {
        self.check_write()?;
        let mut roster = self.lock()?;
        match roster.teachers.iter_mut().find(|t| t.id == teacher.id) {
            Some(existing) => *existing = teacher.clone(),
            None => roster.teachers.push(teacher.clone()),
        }
        Ok(())
    }
}
