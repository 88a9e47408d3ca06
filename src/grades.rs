// 📝 Grades - validated values and the two-step entry editor
//
// A grade is 0..=10 with at most one decimal. It is stored as tenths so that
// 7.5 is exactly 75 and never drifts through float arithmetic.
//
// Editor state machine:
//
//   Viewing --begin_edit--> Editing --stage--> PendingConfirmation --confirm--> Viewing
//                              |                      |
//                              +------- cancel -------+-----------------------> Viewing

use crate::access::{self, Identity};
use crate::entities::Student;
use crate::error::{SchoolError, ValidationError};
use crate::school::School;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// GRADE VALUE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Grade {
    tenths: u8,
}

impl Grade {
    pub const MAX_TENTHS: u8 = 100;

    pub fn from_tenths(tenths: u8) -> Result<Self, ValidationError> {
        if tenths > Self::MAX_TENTHS {
            return Err(ValidationError::OutOfRange(f64::from(tenths) / 10.0));
        }
        Ok(Grade { tenths })
    }

    pub fn tenths(&self) -> u8 {
        self.tenths
    }

    pub fn value(&self) -> f64 {
        f64::from(self.tenths) / 10.0
    }

    /// Parse a loosely typed input (JSON number or numeric string)
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ValidationError> {
        match value {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(v) => Grade::try_from(v),
                None => Err(ValidationError::NotNumeric(n.to_string())),
            },
            serde_json::Value::String(s) => s.parse(),
            other => Err(ValidationError::NotNumeric(other.to_string())),
        }
    }
}

impl TryFrom<f64> for Grade {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(ValidationError::NotNumeric(value.to_string()));
        }
        if !(0.0..=10.0).contains(&value) {
            return Err(ValidationError::OutOfRange(value));
        }

        let scaled = value * 10.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return Err(ValidationError::TooPrecise(value.to_string()));
        }

        // 0.0..=100.0 after the range check
        Ok(Grade {
            tenths: rounded as u8,
        })
    }
}

impl FromStr for Grade {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value: f64 = trimmed
            .parse()
            .map_err(|_| ValidationError::NotNumeric(s.to_string()))?;
        // "NaN" and "inf" parse as f64 but are not numbers a teacher typed
        if !value.is_finite() {
            return Err(ValidationError::NotNumeric(s.to_string()));
        }
        Grade::try_from(value)
    }
}

impl From<Grade> for f64 {
    fn from(grade: Grade) -> f64 {
        grade.value()
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.value())
    }
}

// ============================================================================
// EDITOR STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EditorState {
    /// Showing the last committed value
    Viewing,

    /// Free-text draft, not validated yet
    Editing { draft: String },

    /// Validated value waiting for explicit confirmation
    PendingConfirmation { staged: Grade },
}

impl EditorState {
    pub fn name(&self) -> &'static str {
        match self {
            EditorState::Viewing => "viewing",
            EditorState::Editing { .. } => "editing",
            EditorState::PendingConfirmation { .. } => "pending confirmation",
        }
    }
}

/// Two-step grade entry for one student.
///
/// The UI disables the control when `is_writable()` is false. `confirm` still
/// goes through `School::write_grade`, which enforces the same gate.
#[derive(Debug, Clone)]
pub struct GradeEditor {
    student_id: String,
    committed: Option<Grade>,
    writable: bool,
    state: EditorState,
}

impl GradeEditor {
    pub fn for_student(student: &Student) -> Self {
        GradeEditor {
            student_id: student.id.clone(),
            committed: student.grade(),
            writable: access::can_write_grade(student),
            state: EditorState::Viewing,
        }
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn state(&self) -> &EditorState {
        &self.state
    }

    pub fn committed(&self) -> Option<Grade> {
        self.committed
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn begin_edit(&mut self) -> Result<(), SchoolError> {
        if !self.writable {
            return Err(SchoolError::GradeLocked {
                student_id: self.student_id.clone(),
            });
        }
        self.expect_state("edit", matches!(self.state, EditorState::Viewing))?;

        self.state = EditorState::Editing {
            draft: self.committed.map(|g| g.to_string()).unwrap_or_default(),
        };
        Ok(())
    }

    pub fn set_draft(&mut self, text: impl Into<String>) -> Result<(), SchoolError> {
        match &mut self.state {
            EditorState::Editing { draft } => {
                *draft = text.into();
                Ok(())
            }
            other => Err(SchoolError::InvalidTransition {
                action: "change the draft",
                state: other.name(),
            }),
        }
    }

    /// Validate the draft. On failure the editor stays in Editing.
    pub fn stage(&mut self) -> Result<Grade, SchoolError> {
        let staged = match &self.state {
            EditorState::Editing { draft } => draft.parse::<Grade>()?,
            other => {
                return Err(SchoolError::InvalidTransition {
                    action: "stage a grade",
                    state: other.name(),
                })
            }
        };
        self.state = EditorState::PendingConfirmation { staged };
        Ok(staged)
    }

    /// Persist the staged grade and return to Viewing.
    ///
    /// Either way the draft is consumed. On error the committed value is
    /// unchanged and the caller starts over.
    pub fn confirm(&mut self, school: &School, actor: &Identity) -> Result<Student, SchoolError> {
        let staged = match self.state {
            EditorState::PendingConfirmation { staged } => staged,
            ref other => {
                return Err(SchoolError::InvalidTransition {
                    action: "confirm",
                    state: other.name(),
                })
            }
        };
        self.state = EditorState::Viewing;

        match school.write_grade(actor, &self.student_id, staged) {
            Ok(student) => {
                self.committed = student.grade();
                self.writable = access::can_write_grade(&student);
                Ok(student)
            }
            Err(err) => {
                if matches!(err, SchoolError::GradeLocked { .. }) {
                    self.writable = false;
                }
                Err(err)
            }
        }
    }

    /// Discard any draft. A no-op while Viewing.
    pub fn cancel(&mut self) {
        self.state = EditorState::Viewing;
    }

    fn expect_state(&self, action: &'static str, ok: bool) -> Result<(), SchoolError> {
        if ok {
            Ok(())
        } else {
            Err(SchoolError::InvalidTransition {
                action,
                state: self.state.name(),
            })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Payment, PaymentStatus};
    use chrono::NaiveDate;
    use rstest::rstest;

    #[rstest]
    #[case("0", 0)]
    #[case("10", 100)]
    #[case("7.5", 75)]
    #[case(" 8 ", 80)]
    #[case("9.0", 90)]
    fn test_accepts_valid_grades(#[case] input: &str, #[case] tenths: u8) {
        let grade: Grade = input.parse().unwrap();
        assert_eq!(grade.tenths(), tenths);
    }

    #[rstest]
    #[case("-1")]
    #[case("10.1")]
    #[case("abc")]
    #[case("")]
    #[case("NaN")]
    #[case("inf")]
    #[case("7.25")]
    fn test_rejects_invalid_grades(#[case] input: &str) {
        assert!(input.parse::<Grade>().is_err(), "{:?} should be rejected", input);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            "abc".parse::<Grade>(),
            Err(ValidationError::NotNumeric("abc".to_string()))
        );
        assert_eq!(Grade::try_from(-1.0), Err(ValidationError::OutOfRange(-1.0)));
        assert_eq!(Grade::try_from(10.1), Err(ValidationError::OutOfRange(10.1)));
        assert!(matches!(
            Grade::try_from(7.25),
            Err(ValidationError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            Grade::from_json(&serde_json::json!(7.5)).unwrap().tenths(),
            75
        );
        assert_eq!(
            Grade::from_json(&serde_json::json!("10")).unwrap().tenths(),
            100
        );
        assert!(Grade::from_json(&serde_json::json!("abc")).is_err());
        assert!(Grade::from_json(&serde_json::json!(null)).is_err());
        assert!(Grade::from_json(&serde_json::json!(true)).is_err());
    }

    #[test]
    fn test_serde_uses_plain_numbers() {
        let grade = Grade::try_from(8.5).unwrap();
        assert_eq!(serde_json::to_string(&grade).unwrap(), "8.5");
        assert_eq!(serde_json::from_str::<Grade>("8.5").unwrap(), grade);
        assert!(serde_json::from_str::<Grade>("11").is_err());
        assert_eq!(grade.to_string(), "8.5");
    }

    fn clean_student() -> Student {
        Student::new("E-100", "Sofía", "2012-03-03", "Centro")
            .unwrap()
            .with_grade(Some(Grade::try_from(6.0).unwrap()))
    }

    fn debt_student() -> Student {
        let overdue = Payment::new(
            "Colegiatura",
            900.0,
            NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            PaymentStatus::Overdue,
        )
        .unwrap();
        Student::new("E-200", "Diego", "2012-04-04", "Centro")
            .unwrap()
            .with_payments(vec![overdue])
    }

    #[test]
    fn test_editor_walks_to_pending_confirmation() {
        let mut editor = GradeEditor::for_student(&clean_student());
        assert!(editor.is_writable());
        assert_eq!(editor.state(), &EditorState::Viewing);

        editor.begin_edit().unwrap();
        assert_eq!(
            editor.state(),
            &EditorState::Editing {
                draft: "6.0".to_string()
            }
        );

        editor.set_draft("9.5").unwrap();
        let staged = editor.stage().unwrap();
        assert_eq!(staged.tenths(), 95);
        assert_eq!(editor.state(), &EditorState::PendingConfirmation { staged });
    }

    #[test]
    fn test_invalid_draft_stays_in_editing() {
        let mut editor = GradeEditor::for_student(&clean_student());
        editor.begin_edit().unwrap();
        editor.set_draft("10.1").unwrap();

        let err = editor.stage().unwrap_err();
        assert!(matches!(err, SchoolError::Validation(ValidationError::OutOfRange(_))));
        assert!(matches!(editor.state(), EditorState::Editing { .. }));
    }

    #[test]
    fn test_cancel_restores_committed_value() {
        let mut editor = GradeEditor::for_student(&clean_student());

        editor.begin_edit().unwrap();
        editor.set_draft("3").unwrap();
        editor.cancel();
        assert_eq!(editor.state(), &EditorState::Viewing);
        assert_eq!(editor.committed().map(|g| g.tenths()), Some(60));

        editor.begin_edit().unwrap();
        editor.set_draft("4").unwrap();
        editor.stage().unwrap();
        editor.cancel();
        assert_eq!(editor.state(), &EditorState::Viewing);
        assert_eq!(editor.committed().map(|g| g.tenths()), Some(60));
    }

    #[test]
    fn test_debt_student_cannot_open_editor() {
        let mut editor = GradeEditor::for_student(&debt_student());
        assert!(!editor.is_writable());
        assert!(matches!(
            editor.begin_edit(),
            Err(SchoolError::GradeLocked { .. })
        ));
        assert_eq!(editor.state(), &EditorState::Viewing);
    }

    #[test]
    fn test_confirm_rechecks_gate_in_service() {
        use crate::access::{Role, StaticDirectory};
        use crate::audit::MemoryAuditLog;
        use crate::notify::RecordingNotifier;
        use crate::store::{MemoryStore, Roster};
        use std::sync::Arc;

        let student = clean_student();
        let school = School::open(
            Arc::new(MemoryStore::with_roster(Roster::new(vec![student.clone()], vec![]))),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(StaticDirectory::fixture()),
            Arc::new(RecordingNotifier::new()),
        )
        .unwrap();
        let admin = Identity::new("admin", Role::Admin, "Admin");

        let mut editor = GradeEditor::for_student(&student);
        editor.begin_edit().unwrap();
        editor.set_draft("9").unwrap();
        editor.stage().unwrap();

        // Account falls into debt after the editor was opened
        let overdue = Payment::new(
            "Colegiatura",
            900.0,
            NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
            PaymentStatus::Overdue,
        )
        .unwrap();
        school.record_payment(&admin, &student.id, overdue).unwrap();

        let err = editor.confirm(&school, &admin).unwrap_err();
        assert!(matches!(err, SchoolError::GradeLocked { .. }));
        assert!(!editor.is_writable());
        assert_eq!(editor.state(), &EditorState::Viewing);
        assert_eq!(school.student(&student.id).unwrap().grade(), editor.committed());
    }

    #[test]
    fn test_out_of_order_transitions_are_rejected() {
        let mut editor = GradeEditor::for_student(&clean_student());
        assert!(matches!(
            editor.stage(),
            Err(SchoolError::InvalidTransition { .. })
        ));
        assert!(matches!(
            editor.set_draft("5"),
            Err(SchoolError::InvalidTransition { .. })
        ));
        editor.begin_edit().unwrap();
        assert!(matches!(
            editor.begin_edit(),
            Err(SchoolError::InvalidTransition { .. })
        ));
    }
}
