// Entity Models
//
// Student owns its Payment ledger (composition).
// Student -> Teacher is a lookup by id, never ownership.

pub mod payment;
pub mod student;
pub mod teacher;

pub use payment::{Payment, PaymentStatus};
pub use student::Student;
pub use teacher::Teacher;
