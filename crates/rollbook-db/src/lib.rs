//! Persistent schema for classroom and survey tracking.
//!
//! Every user-facing row is keyed by a random UUID token; lookup tables
//! use small integer keys. All consistency (uniqueness, foreign keys,
//! cascades) is enforced by SQLite itself.

pub mod accounts;
pub mod classes;
pub mod lookups;
pub mod migrations;
pub mod models;
pub mod projection;
pub mod store;
pub mod students;
pub mod surveys;

pub use lookups::{LookupEntry, LookupTable};
pub use migrations::{MIGRATIONS, Migration, MigrationStatus, migration_status, run_migrations};
pub use models::{
    Class, ClassEnrollment, ClassId, Demographic, DemographicId, Position, PositionId,
    QuestionId, QuestionType, ResponseId, Semester, Session, SessionId, Student, StudentId,
    Survey, SurveyId, SurveyQuestion, SurveyResponse, UserAccount, UserId,
};
pub use projection::{
    ClassView, DemographicView, EnrollmentView, EntityKind, PositionView, QuestionView,
    ResponseView, SurveyView,
};
pub use store::{Store, StoreOptions, TableCount};
pub use students::StudentEntry;
