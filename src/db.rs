// 🗃️ SQLite Persistence - roster tables + independent audit table
//
// WAL mode for crash recovery. Each student aggregate (student row + its
// payments) is written in one transaction. The audit_log table is never
// touched by roster saves.

use crate::access::Role;
use crate::audit::{ActionKind, AuditEntry, AuditLog};
use crate::entities::{Payment, PaymentStatus, Student, Teacher};
use crate::error::StoreError;
use crate::grades::Grade;
use crate::reconciliation::FinancialStatus;
use crate::store::{Roster, RosterStore};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Roster and audit connections may share one file
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

pub fn setup_database(conn: &Connection) -> Result<(), StoreError> {
    // In-memory databases report "memory" and ignore WAL; both are fine
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Roster tables
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            campus TEXT NOT NULL,
            email TEXT,
            phone TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            enrollment TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            credential TEXT NOT NULL,
            campus TEXT NOT NULL,
            teacher_id TEXT,
            grade_tenths INTEGER,
            -- cached; recomputed from payments on every load
            financial_status TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL REFERENCES students(id),
            concept TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount > 0),
            due_date TEXT NOT NULL,
            paid_date TEXT,
            status TEXT NOT NULL,
            verified INTEGER NOT NULL DEFAULT 0,
            proof_url TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_student ON payments(student_id)",
        [],
    )?;

    setup_audit_table(conn)?;

    Ok(())
}

/// Audit trail table (append-only)
pub fn setup_audit_table(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            role TEXT NOT NULL,
            action TEXT NOT NULL,
            detail TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_log(actor_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROSTER STORE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn student_count(&self) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        let count = conn.query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))?;
        Ok(count)
    }

    /// True if the store holds no students yet
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.student_count()? == 0)
    }
}

impl RosterStore for SqliteStore {
    fn load_roster(&self) -> Result<Roster, StoreError> {
        let conn = lock(&self.conn)?;

        let teachers = load_teachers(&conn)?;
        let mut ledgers = load_payments(&conn)?;

        let mut stmt = conn.prepare(
            "SELECT id, enrollment, name, credential, campus, teacher_id, grade_tenths, financial_status
             FROM students
             ORDER BY name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(StudentRow {
                    id: row.get(0)?,
                    enrollment: row.get(1)?,
                    name: row.get(2)?,
                    credential: row.get(3)?,
                    campus: row.get(4)?,
                    teacher_id: row.get(5)?,
                    grade_tenths: row.get(6)?,
                    financial_status: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut students = Vec::with_capacity(rows.len());
        for row in rows {
            let payments = ledgers.remove(&row.id).unwrap_or_default();
            students.push(row.into_student(payments)?);
        }

        Ok(Roster::new(students, teachers))
    }

    fn save_roster(&self, roster: &Roster) -> Result<(), StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM payments", [])?;
        tx.execute("DELETE FROM students", [])?;
        tx.execute("DELETE FROM teachers", [])?;

        for teacher in &roster.teachers {
            upsert_teacher(&tx, teacher)?;
        }
        for student in &roster.students {
            upsert_student(&tx, student)?;
        }

        tx.commit()?;
        tracing::debug!(
            students = roster.students.len(),
            payments = roster.payment_count(),
            "roster snapshot saved"
        );
        Ok(())
    }

    fn save_student(&self, student: &Student) -> Result<(), StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        upsert_student(&tx, student)?;
        tx.commit()?;
        Ok(())
    }

    fn save_teacher(&self, teacher: &Teacher) -> Result<(), StoreError> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;
        upsert_teacher(&tx, teacher)?;
        tx.commit()?;
        Ok(())
    }
}

struct StudentRow {
    id: String,
    enrollment: String,
    name: String,
    credential: String,
    campus: String,
    teacher_id: Option<String>,
    grade_tenths: Option<i64>,
    financial_status: String,
}

impl StudentRow {
    fn into_student(self, payments: Vec<Payment>) -> Result<Student, StoreError> {
        let grade = self
            .grade_tenths
            .map(|t| {
                u8::try_from(t)
                    .map_err(|_| StoreError::Corrupt(format!("grade {} for {}", t, self.id)))
                    .and_then(|t| {
                        Grade::from_tenths(t).map_err(|e| StoreError::Corrupt(e.to_string()))
                    })
            })
            .transpose()?;

        let mut student = Student::new(self.enrollment, self.name, self.credential, self.campus)
            .map_err(|e| StoreError::Corrupt(format!("student {}: {}", self.id, e)))?
            .with_id(self.id)
            .with_grade(grade)
            .with_payments(payments);
        student.teacher_id = self.teacher_id;

        let cached = FinancialStatus::parse(&self.financial_status);
        if cached != Some(student.financial_status()) {
            tracing::warn!(
                student = %student.id,
                cached = %self.financial_status,
                recomputed = %student.financial_status(),
                "stale financial status on disk, using recomputed value"
            );
        }

        Ok(student)
    }
}

fn upsert_student(tx: &Transaction<'_>, student: &Student) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO students (
            id, enrollment, name, credential, campus, teacher_id, grade_tenths, financial_status, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(id) DO UPDATE SET
            enrollment = excluded.enrollment,
            name = excluded.name,
            credential = excluded.credential,
            campus = excluded.campus,
            teacher_id = excluded.teacher_id,
            grade_tenths = excluded.grade_tenths,
            financial_status = excluded.financial_status,
            updated_at = excluded.updated_at",
        params![
            student.id,
            student.enrollment,
            student.name,
            student.credential(),
            student.campus,
            student.teacher_id,
            student.grade().map(|g| i64::from(g.tenths())),
            student.financial_status().as_str(),
            Utc::now().to_rfc3339(),
        ],
    )?;

    // Payments are never deleted, only inserted or updated in place
    for payment in student.payments() {
        let owner: Option<String> = tx
            .query_row(
                "SELECT student_id FROM payments WHERE id = ?1",
                params![payment.id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner) = owner.filter(|owner| owner != &student.id) {
            return Err(StoreError::Conflict(format!(
                "payment {} belongs to student {}, not {}",
                payment.id, owner, student.id
            )));
        }

        tx.execute(
            "INSERT INTO payments (
                id, student_id, concept, amount, due_date, paid_date, status, verified, proof_url, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                paid_date = excluded.paid_date,
                status = excluded.status,
                verified = excluded.verified,
                proof_url = excluded.proof_url",
            params![
                payment.id,
                student.id,
                payment.concept,
                payment.amount,
                payment.due_date.to_string(),
                payment.paid_date.map(|d| d.to_string()),
                payment.status.as_str(),
                payment.verified,
                payment.proof_url,
                payment.created_at.to_rfc3339(),
            ],
        )?;
    }

    Ok(())
}

fn upsert_teacher(tx: &Transaction<'_>, teacher: &Teacher) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO teachers (id, name, campus, email, phone)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            campus = excluded.campus,
            email = excluded.email,
            phone = excluded.phone",
        params![
            teacher.id,
            teacher.name,
            teacher.campus,
            teacher.email,
            teacher.phone
        ],
    )?;
    Ok(())
}

fn load_teachers(conn: &Connection) -> Result<Vec<Teacher>, StoreError> {
    let mut stmt = conn.prepare("SELECT id, name, campus, email, phone FROM teachers ORDER BY name")?;
    let teachers = stmt
        .query_map([], |row| {
            Ok(Teacher {
                id: row.get(0)?,
                name: row.get(1)?,
                campus: row.get(2)?,
                email: row.get(3)?,
                phone: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(teachers)
}

/// All payments grouped by owning student id
fn load_payments(conn: &Connection) -> Result<HashMap<String, Vec<Payment>>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, concept, amount, due_date, paid_date, status, verified, proof_url, created_at
         FROM payments
         ORDER BY due_date, created_at",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                PaymentRow {
                    id: row.get(0)?,
                    concept: row.get(2)?,
                    amount: row.get(3)?,
                    due_date: row.get(4)?,
                    paid_date: row.get(5)?,
                    status: row.get(6)?,
                    verified: row.get(7)?,
                    proof_url: row.get(8)?,
                    created_at: row.get(9)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut ledgers: HashMap<String, Vec<Payment>> = HashMap::new();
    for (student_id, row) in rows {
        ledgers.entry(student_id).or_default().push(row.into_payment()?);
    }
    Ok(ledgers)
}

struct PaymentRow {
    id: String,
    concept: String,
    amount: f64,
    due_date: String,
    paid_date: Option<String>,
    status: String,
    verified: bool,
    proof_url: Option<String>,
    created_at: String,
}

impl PaymentRow {
    fn into_payment(self) -> Result<Payment, StoreError> {
        let status = PaymentStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("payment {} status {}", self.id, self.status)))?;

        Ok(Payment {
            due_date: parse_date(&self.due_date)?,
            paid_date: self.paid_date.as_deref().map(parse_date).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            id: self.id,
            concept: self.concept,
            amount: self.amount,
            status,
            verified: self.verified,
            proof_url: self.proof_url,
        })
    }
}

// ============================================================================
// AUDIT LOG
// ============================================================================

/// Audit log with its own connection, so it can live in a separate file
pub struct SqliteAuditLog {
    conn: Mutex<Connection>,
}

impl SqliteAuditLog {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        setup_audit_table(&conn)?;
        Ok(SqliteAuditLog {
            conn: Mutex::new(conn),
        })
    }

    /// Entries for one actor, newest first
    pub fn entries_for_actor(&self, actor_id: &str) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = lock(&self.conn)?;
        query_entries(
            &conn,
            "SELECT seq, timestamp, actor_id, role, action, detail
             FROM audit_log WHERE actor_id = ?1 ORDER BY seq DESC",
            &[&actor_id],
        )
    }
}

impl AuditLog for SqliteAuditLog {
    fn append(&self, mut entry: AuditEntry) -> Result<AuditEntry, StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT INTO audit_log (timestamp, actor_id, role, action, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.timestamp.to_rfc3339(),
                entry.actor_id,
                entry.role.as_str(),
                entry.action.as_str(),
                entry.detail,
            ],
        )?;
        entry.sequence = u64::try_from(conn.last_insert_rowid())
            .map_err(|_| StoreError::Corrupt("negative audit sequence".to_string()))?;
        Ok(entry)
    }

    fn list(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let conn = lock(&self.conn)?;
        query_entries(
            &conn,
            "SELECT seq, timestamp, actor_id, role, action, detail
             FROM audit_log ORDER BY seq DESC",
            &[],
        )
    }
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<AuditEntry>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(seq, timestamp, actor_id, role, action, detail)| {
            Ok(AuditEntry {
                sequence: u64::try_from(seq)
                    .map_err(|_| StoreError::Corrupt(format!("audit sequence {}", seq)))?,
                timestamp: parse_timestamp(&timestamp)?,
                actor_id,
                role: Role::parse(&role)
                    .ok_or_else(|| StoreError::Corrupt(format!("audit role {}", role)))?,
                action: ActionKind::parse(&action)
                    .ok_or_else(|| StoreError::Corrupt(format!("audit action {}", action)))?,
                detail,
            })
        })
        .collect()
}

// ============================================================================
// HELPERS
// ============================================================================

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::Unavailable("database connection lock poisoned".to_string()))
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("date {:?}: {}", s, e)))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn due(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, day).unwrap()
    }

    fn sample_roster() -> Roster {
        let teacher = Teacher::new("T-001", "Lucía Hernández", "Sede Norte").unwrap();

        let paid = Payment::new("Colegiatura Enero", 1500.0, due(1), PaymentStatus::Paid)
            .unwrap()
            .with_paid_date(due(2))
            .with_proof("uploads/ene.jpg");
        let overdue = Payment::new("Colegiatura Febrero", 1500.0, due(28), PaymentStatus::Overdue).unwrap();

        let student = Student::new("2024-0001", "Ana Torres", "2011-04-04", "Sede Norte")
            .unwrap()
            .with_teacher("T-001")
            .with_grade(Some(Grade::try_from(8.5).unwrap()))
            .with_payments(vec![paid, overdue]);

        Roster::new(vec![student], vec![teacher])
    }

    #[test]
    fn test_roster_snapshot_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let roster = sample_roster();
        store.save_roster(&roster).unwrap();

        let loaded = store.load_roster().unwrap();
        assert_eq!(loaded.teachers, roster.teachers);
        assert_eq!(loaded.students.len(), 1);

        let student = &loaded.students[0];
        let original = &roster.students[0];
        assert_eq!(student.id, original.id);
        assert_eq!(student.teacher_id.as_deref(), Some("T-001"));
        assert_eq!(student.grade(), original.grade());
        assert_eq!(student.financial_status(), FinancialStatus::Debt);
        assert!(student.credential_matches("2011-04-04"));
        assert_eq!(student.payments().len(), 2);
        assert_eq!(
            student.payments()[0].proof_url.as_deref(),
            Some("uploads/ene.jpg")
        );
    }

    #[test]
    fn test_save_student_updates_ledger_in_place() {
        let store = SqliteStore::open_in_memory().unwrap();
        let roster = sample_roster();
        store.save_roster(&roster).unwrap();

        let mut student = roster.students[0].clone();
        let paid_id = student.payments()[0].id.clone();
        student.set_payment_verified(&paid_id, true);
        store.save_student(&student).unwrap();

        let loaded = store.load_roster().unwrap();
        let payment = loaded.students[0].payment(&paid_id).unwrap();
        assert!(payment.verified);
        assert_eq!(loaded.students[0].payments().len(), 2);
    }

    #[test]
    fn test_payment_cannot_change_owner() {
        let store = SqliteStore::open_in_memory().unwrap();
        let roster = sample_roster();
        store.save_roster(&roster).unwrap();

        let overdue_id = roster.students[0].payments()[1].id.clone();
        let claimed = Payment::new("Colegiatura Febrero", 1500.0, due(28), PaymentStatus::Paid)
            .unwrap()
            .with_id(overdue_id.clone())
            .with_verified(true);
        let other = Student::new("2024-0002", "Beto Ruiz", "2010-10-10", "Sede Norte")
            .unwrap()
            .with_payments(vec![claimed]);

        let err = store.save_student(&other).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(!err.is_transient());

        // The transaction rolled back: no new student, original row intact
        let loaded = store.load_roster().unwrap();
        assert_eq!(loaded.students.len(), 1);
        let payment = loaded.students[0].payment(&overdue_id).unwrap();
        assert_eq!(payment.status, PaymentStatus::Overdue);
        assert!(!payment.verified);
        assert_eq!(loaded.students[0].financial_status(), FinancialStatus::Debt);
    }

    #[test]
    fn test_snapshot_with_shared_payment_id_is_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_roster(&sample_roster()).unwrap();

        let shared = |status| {
            Payment::new("Colegiatura", 1500.0, due(1), status)
                .unwrap()
                .with_id("p-1")
        };
        let ana = Student::new("2024-0010", "Ana", "2011-01-01", "Sede Norte")
            .unwrap()
            .with_payments(vec![shared(PaymentStatus::Overdue)]);
        let beto = Student::new("2024-0011", "Beto", "2011-02-02", "Sede Norte")
            .unwrap()
            .with_payments(vec![shared(PaymentStatus::Paid)]);

        assert!(store.save_roster(&Roster::new(vec![ana, beto], vec![])).is_err());
        // Previous snapshot survives the failed replace
        let loaded = store.load_roster().unwrap();
        assert_eq!(loaded.students[0].enrollment, "2024-0001");
    }

    #[test]
    fn test_status_is_recomputed_on_load() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save_roster(&sample_roster()).unwrap();

        // Corrupt the cache on disk
        {
            let conn = store.conn.lock().unwrap();
            conn.execute("UPDATE students SET financial_status = 'CLEAN'", [])
                .unwrap();
        }

        let loaded = store.load_roster().unwrap();
        assert_eq!(loaded.students[0].financial_status(), FinancialStatus::Debt);
    }

    #[test]
    fn test_save_roster_keeps_audit_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("next.db");

        let store = SqliteStore::open(&path).unwrap();
        let audit = SqliteAuditLog::open(&path).unwrap();

        audit
            .append(AuditEntry::new("admin", Role::Admin, ActionKind::LoginSucceeded, "clean login"))
            .unwrap();
        store.save_roster(&sample_roster()).unwrap();
        store.save_roster(&Roster::default()).unwrap();

        assert!(store.is_empty().unwrap());
        assert_eq!(audit.list().unwrap().len(), 1);
    }

    #[test]
    fn test_audit_log_newest_first() {
        let audit = SqliteAuditLog::open_in_memory().unwrap();
        for (actor, action) in [
            ("2024-0001", ActionKind::LoginSucceeded),
            ("2024-0002", ActionKind::LoginFailed),
            ("2024-0001", ActionKind::LoginBlocked),
        ] {
            audit
                .append(AuditEntry::new(actor, Role::Student, action, "attempt"))
                .unwrap();
        }

        let entries = audit.list().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].action, ActionKind::LoginBlocked);
        assert_eq!(entries[2].action, ActionKind::LoginSucceeded);
        assert!(entries[0].sequence > entries[1].sequence);

        let mine = audit.entries_for_actor("2024-0001").unwrap();
        assert_eq!(mine.len(), 2);
    }
}
