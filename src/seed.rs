// 🌱 Roster Seeding - demo data and CSV import
//
// CSV layout (header row required, optional columns may be left empty):
//   students.csv  enrollment,name,credential,campus,teacher_id,grade,id
//   payments.csv  enrollment,concept,amount,due_date,status,verified,paid_date,proof_url,id
//   teachers.csv  id,name,campus,email,phone

use crate::entities::{Payment, PaymentStatus, Student, Teacher};
use crate::grades::Grade;
use crate::store::Roster;
use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

// ============================================================================
// DEMO ROSTER
// ============================================================================

/// Two campuses, two teachers (matching `StaticDirectory::fixture`) and a
/// ledger mix that covers every status combination.
pub fn demo_roster() -> Result<Roster> {
    let teachers = vec![
        Teacher::new("T-001", "Lucía Hernández", "Sede Norte")?
            .with_contact(Some("lucia@next.edu".to_string()), Some("555-0101".to_string())),
        Teacher::new("T-002", "Jorge Martínez", "Sede Sur")?
            .with_contact(Some("jorge@next.edu".to_string()), None),
    ];

    let colegiatura = |due: &str, status: PaymentStatus| -> Result<Payment> {
        Ok(Payment::new("Colegiatura", 1850.0, date(due)?, status)?)
    };

    let students = vec![
        // Fully verified
        Student::new("2024-0001", "Ana Sofía Ramírez", "2011-03-14", "Sede Norte")?
            .with_teacher("T-001")
            .with_grade(Some(Grade::from_tenths(92)?))
            .with_payments(vec![
                colegiatura("2025-01-10", PaymentStatus::Paid)?
                    .with_paid_date(date("2025-01-08")?)
                    .with_verified(true),
                colegiatura("2025-02-10", PaymentStatus::Paid)?
                    .with_paid_date(date("2025-02-07")?)
                    .with_verified(true),
            ]),
        // Overdue tuition
        Student::new("2024-0002", "Diego Torres", "2010-11-02", "Sede Norte")?
            .with_teacher("T-001")
            .with_payments(vec![
                colegiatura("2025-01-10", PaymentStatus::Paid)?.with_verified(true),
                colegiatura("2025-02-10", PaymentStatus::Overdue)?,
            ]),
        // Paid with a receipt, waiting for the office
        Student::new("2024-0003", "Valeria Cruz", "2011-07-21", "Sede Sur")?
            .with_teacher("T-002")
            .with_payments(vec![colegiatura("2025-02-10", PaymentStatus::Paid)?
                .with_paid_date(date("2025-02-09")?)
                .with_proof("uploads/2024-0003/febrero.jpg")]),
        // Upcoming charge only
        Student::new("2024-0004", "Mateo Flores", "2012-01-30", "Sede Sur")?
            .with_teacher("T-002")
            .with_grade(Some(Grade::from_tenths(78)?))
            .with_payments(vec![
                Payment::new("Inscripción", 2500.0, date("2025-08-15")?, PaymentStatus::Pending)?,
            ]),
        // No teacher yet, empty ledger
        Student::new("2024-0005", "Camila Ortiz", "2012-05-05", "Sede Norte")?,
    ];

    Ok(Roster::new(students, teachers))
}

fn date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date {:?}, expected YYYY-MM-DD", raw))
}

// ============================================================================
// CSV IMPORT
// ============================================================================

#[derive(Debug, Deserialize)]
struct StudentRecord {
    enrollment: String,
    name: String,
    credential: String,
    campus: String,
    #[serde(default)]
    teacher_id: Option<String>,
    #[serde(default)]
    grade: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentRecord {
    enrollment: String,
    concept: String,
    amount: f64,
    due_date: String,
    status: String,
    #[serde(default)]
    verified: Option<String>,
    #[serde(default)]
    paid_date: Option<String>,
    #[serde(default)]
    proof_url: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TeacherRecord {
    id: String,
    name: String,
    campus: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

/// Build a roster from CSV files. Payments are attached by enrollment.
pub fn load_roster_csv(
    students_csv: &Path,
    payments_csv: &Path,
    teachers_csv: Option<&Path>,
) -> Result<Roster> {
    let open = |path: &Path| {
        std::fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))
    };

    let students = read_students(open(students_csv)?)?;
    let payments = read_payments(open(payments_csv)?)?;
    let teachers = match teachers_csv {
        Some(path) => read_teachers(open(path)?)?,
        None => Vec::new(),
    };

    assemble(students, payments, teachers)
}

pub fn read_students<R: Read>(source: R) -> Result<Vec<Student>> {
    let mut rdr = csv::Reader::from_reader(source);
    let mut students = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        let line = index + 2;
        let record: StudentRecord =
            result.with_context(|| format!("Failed to deserialize student on line {}", line))?;

        let mut student = Student::new(record.enrollment, record.name, record.credential, record.campus)
            .with_context(|| format!("Invalid student on line {}", line))?;
        if let Some(id) = present(record.id) {
            student = student.with_id(id);
        }
        if let Some(teacher_id) = present(record.teacher_id) {
            student = student.with_teacher(teacher_id);
        }
        if let Some(grade) = present(record.grade) {
            let grade: Grade = grade
                .parse()
                .with_context(|| format!("Invalid grade on line {}", line))?;
            student = student.with_grade(Some(grade));
        }
        students.push(student);
    }

    Ok(students)
}

/// Returns (enrollment, payment) pairs
pub fn read_payments<R: Read>(source: R) -> Result<Vec<(String, Payment)>> {
    let mut rdr = csv::Reader::from_reader(source);
    let mut payments = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        let line = index + 2;
        let record: PaymentRecord =
            result.with_context(|| format!("Failed to deserialize payment on line {}", line))?;

        let status = PaymentStatus::parse(&record.status)
            .ok_or_else(|| anyhow!("Unknown payment status {:?} on line {}", record.status, line))?;
        let mut payment = Payment::new(record.concept, record.amount, date(&record.due_date)?, status)
            .with_context(|| format!("Invalid payment on line {}", line))?
            .with_verified(present(record.verified).map(|v| is_truthy(&v)).unwrap_or(false));

        if let Some(id) = present(record.id) {
            payment = payment.with_id(id);
        }
        if let Some(paid) = present(record.paid_date) {
            payment = payment.with_paid_date(date(&paid)?);
        }
        if let Some(url) = present(record.proof_url) {
            payment = payment.with_proof(url);
        }
        payments.push((record.enrollment.trim().to_string(), payment));
    }

    Ok(payments)
}

pub fn read_teachers<R: Read>(source: R) -> Result<Vec<Teacher>> {
    let mut rdr = csv::Reader::from_reader(source);
    let mut teachers = Vec::new();

    for (index, result) in rdr.deserialize().enumerate() {
        let line = index + 2;
        let record: TeacherRecord =
            result.with_context(|| format!("Failed to deserialize teacher on line {}", line))?;
        let teacher = Teacher::new(record.id, record.name, record.campus)
            .with_context(|| format!("Invalid teacher on line {}", line))?
            .with_contact(present(record.email), present(record.phone));
        teachers.push(teacher);
    }

    Ok(teachers)
}

/// Attach payments to students and check cross-references
pub fn assemble(
    students: Vec<Student>,
    payments: Vec<(String, Payment)>,
    teachers: Vec<Teacher>,
) -> Result<Roster> {
    let mut ledgers: HashMap<String, Vec<Payment>> = HashMap::new();
    for (enrollment, payment) in payments {
        ledgers.entry(enrollment).or_default().push(payment);
    }

    let mut seen = HashSet::new();
    let mut assembled = Vec::with_capacity(students.len());
    for student in students {
        if !seen.insert(student.enrollment.clone()) {
            bail!("Duplicate enrollment {}", student.enrollment);
        }
        if let Some(teacher_id) = &student.teacher_id {
            if !teachers.is_empty() && !teachers.iter().any(|t| &t.id == teacher_id) {
                bail!("Student {} references unknown teacher {}", student.enrollment, teacher_id);
            }
        }
        let ledger = ledgers.remove(&student.enrollment).unwrap_or_default();
        assembled.push(student.with_payments(ledger));
    }

    if let Some(orphan) = ledgers.keys().next() {
        bail!("Payments reference unknown enrollment {}", orphan);
    }

    let roster = Roster::new(assembled, teachers);
    if let Some(duplicate) = roster.find_duplicate() {
        bail!("Duplicate {} in import", duplicate);
    }
    Ok(roster)
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "si" | "sí" | "x"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::FinancialStatus;

    const STUDENTS: &str = "\
enrollment,name,credential,campus,teacher_id,grade,id
2024-0100,Sofía Reyes,2011-02-02,Sede Norte,T-001,8.5,
2024-0101,Emilio Vega,2010-09-19,Sede Norte,,,s-101
";

    const PAYMENTS: &str = "\
enrollment,concept,amount,due_date,status,verified,paid_date,proof_url,id
2024-0100,Colegiatura,1850,2025-01-10,Pagado,true,2025-01-09,,p-1
2024-0101,Colegiatura,1850,2025-01-10,paid,false,,uploads/r.jpg,p-2
";

    const TEACHERS: &str = "\
id,name,campus,email,phone
T-001,Lucía Hernández,Sede Norte,lucia@next.edu,
";

    #[test]
    fn test_demo_roster_covers_both_statuses() {
        let roster = demo_roster().unwrap();
        assert_eq!(roster.teachers.len(), 2);
        assert_eq!(roster.students.len(), 5);

        let status = |enrollment: &str| {
            roster
                .students
                .iter()
                .find(|s| s.enrollment == enrollment)
                .unwrap()
                .financial_status()
        };
        assert_eq!(status("2024-0001"), FinancialStatus::Clean);
        assert_eq!(status("2024-0002"), FinancialStatus::Debt);
        assert_eq!(status("2024-0003"), FinancialStatus::Debt);
        assert_eq!(status("2024-0004"), FinancialStatus::Clean);
        assert_eq!(status("2024-0005"), FinancialStatus::Clean);
    }

    #[test]
    fn test_import_from_readers() {
        let roster = assemble(
            read_students(STUDENTS.as_bytes()).unwrap(),
            read_payments(PAYMENTS.as_bytes()).unwrap(),
            read_teachers(TEACHERS.as_bytes()).unwrap(),
        )
        .unwrap();

        assert_eq!(roster.students.len(), 2);
        assert_eq!(roster.payment_count(), 2);

        let sofia = &roster.students[0];
        assert_eq!(sofia.teacher_id.as_deref(), Some("T-001"));
        assert_eq!(sofia.grade(), Some(Grade::from_tenths(85).unwrap()));
        assert_eq!(sofia.financial_status(), FinancialStatus::Clean);
        assert_eq!(sofia.payment("p-1").unwrap().paid_date, Some(date("2025-01-09").unwrap()));

        let emilio = &roster.students[1];
        assert_eq!(emilio.id, "s-101");
        assert!(emilio.teacher_id.is_none());
        assert_eq!(emilio.financial_status(), FinancialStatus::Debt);
        assert_eq!(
            emilio.payment("p-2").unwrap().proof_url.as_deref(),
            Some("uploads/r.jpg")
        );
    }

    #[test]
    fn test_import_rejects_bad_rows() {
        let bad_grade = "enrollment,name,credential,campus,teacher_id,grade,id\nE-1,X,2011-01-01,C,,11,\n";
        assert!(read_students(bad_grade.as_bytes()).is_err());

        let bad_status = "enrollment,concept,amount,due_date,status,verified,paid_date,proof_url,id\nE-1,C,10,2025-01-01,maybe,,,,\n";
        assert!(read_payments(bad_status.as_bytes()).is_err());

        let bad_amount = "enrollment,concept,amount,due_date,status,verified,paid_date,proof_url,id\nE-1,C,0,2025-01-01,paid,,,,\n";
        assert!(read_payments(bad_amount.as_bytes()).is_err());
    }

    #[test]
    fn test_assemble_checks_references() {
        let students = read_students(STUDENTS.as_bytes()).unwrap();
        let mut payments = read_payments(PAYMENTS.as_bytes()).unwrap();
        payments[0].0 = "2099-9999".to_string();
        let err = assemble(students, payments, vec![]).unwrap_err();
        assert!(err.to_string().contains("2099-9999"));

        let students = read_students(STUDENTS.as_bytes()).unwrap();
        let other = vec![Teacher::new("T-777", "Otro", "Sede Sur").unwrap()];
        assert!(assemble(students, vec![], other).is_err());
    }

    #[test]
    fn test_assemble_rejects_shared_payment_id() {
        let payments = "\
enrollment,concept,amount,due_date,status,verified,paid_date,proof_url,id
2024-0100,Colegiatura,1850,2025-01-10,overdue,,,,p-1
2024-0101,Colegiatura,1850,2025-01-10,paid,true,2025-01-09,,p-1
";
        let err = assemble(
            read_students(STUDENTS.as_bytes()).unwrap(),
            read_payments(payments.as_bytes()).unwrap(),
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("payment p-1"), "{}", err);

        let twins = "\
enrollment,name,credential,campus,teacher_id,grade,id
2024-0100,Sofía Reyes,2011-02-02,Sede Norte,,,s-1
2024-0101,Emilio Vega,2010-09-19,Sede Norte,,,s-1
";
        let err = assemble(read_students(twins.as_bytes()).unwrap(), vec![], vec![]).unwrap_err();
        assert!(err.to_string().contains("student s-1"), "{}", err);
    }

    #[test]
    fn test_load_roster_csv_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let students = dir.path().join("students.csv");
        let payments = dir.path().join("payments.csv");
        std::fs::write(&students, STUDENTS).unwrap();
        std::fs::write(&payments, PAYMENTS).unwrap();

        let roster = load_roster_csv(&students, &payments, None).unwrap();
        assert_eq!(roster.students.len(), 2);
        assert!(roster.teachers.is_empty());

        assert!(load_roster_csv(&dir.path().join("missing.csv"), &payments, None).is_err());
    }
}
