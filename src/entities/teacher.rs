// 🧑‍🏫 Teacher Entity - staff member affiliated with one campus
//
// Students point at teachers by id (Student.teacher_id); the teacher owns
// nothing. Login for teachers goes through the credential directory, not here.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Teacher {
    pub id: String,
    pub name: String,

    /// Sede affiliation
    pub campus: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Teacher {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        campus: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let id = id.into();
        let name = name.into();
        if id.trim().is_empty() {
            return Err(ValidationError::EmptyField("teacher id"));
        }
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }

        Ok(Teacher {
            id: id.trim().to_string(),
            name: name.trim().to_string(),
            campus: campus.into().trim().to_string(),
            email: None,
            phone: None,
        })
    }

    pub fn with_contact(mut self, email: Option<String>, phone: Option<String>) -> Self {
        self.email = email;
        self.phone = phone;
        self
    }

    /// Case-insensitive campus match
    pub fn teaches_at(&self, campus: &str) -> bool {
        self.campus.eq_ignore_ascii_case(campus.trim())
    }
}
