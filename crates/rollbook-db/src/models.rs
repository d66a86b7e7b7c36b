//! Row models and typed identifiers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, SubsecRound, Utc};
use rollbook_common::Error;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh random identifier, usable before the row is persisted.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| Error::Other(format!("invalid {} '{s}': {e}", stringify!($name))))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let s = value.as_str()?;
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

id_type!(UserId);
id_type!(SessionId);
id_type!(StudentId);
id_type!(DemographicId);
id_type!(PositionId);
id_type!(ClassId);
id_type!(SurveyId);
id_type!(QuestionId);
id_type!(ResponseId);

/// Latest year a stored timestamp may carry. Five-digit years break the
/// text ordering the schema relies on.
pub const MAX_TIMESTAMP_YEAR: i32 = 9999;

/// Current time at the microsecond precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Text-coded enumerations stored as short codes in CHECK-constrained columns.
macro_rules! coded_enum {
    ($name:ident { $($variant:ident => ($code:literal, $label:literal)),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(&self) -> &'static str {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.code())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($code => Ok($name::$variant),)+
                    other => Err(Error::Other(format!(
                        "unknown {} code: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.code()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: Error| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Semester {
    #[default]
    #[serde(rename = "FL")]
    Fall,
    #[serde(rename = "SP")]
    Spring,
    #[serde(rename = "SM")]
    Summer,
}

coded_enum!(Semester {
    Fall => ("FL", "Fall"),
    Spring => ("SP", "Spring"),
    Summer => ("SM", "Summer"),
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QuestionType {
    #[default]
    #[serde(rename = "SA")]
    ShortAnswer,
    #[serde(rename = "LA")]
    Essay,
    #[serde(rename = "RA")]
    Range,
}

coded_enum!(QuestionType {
    ShortAnswer => ("SA", "Short Answer"),
    Essay => ("LA", "Essay"),
    Range => ("RA", "Range"),
});

/// Minimal account row owning students, sessions, classes and surveys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(
        username: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            id: UserId::new(),
            username: username.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: String::new(),
            created_at: now(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    /// "First Last", trimmed when either part is blank.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A session created now and expiring `ttl` later. Fails when the
    /// expiry would fall past [`MAX_TIMESTAMP_YEAR`].
    pub fn new(user_id: UserId, ttl: Duration) -> Result<Self, Error> {
        let created_at = now();
        let expires_at = created_at
            .checked_add_signed(ttl)
            .filter(|ts| ts.year() <= MAX_TIMESTAMP_YEAR)
            .ok_or_else(|| {
                Error::Other(format!(
                    "session lifetime of {} hours is out of range",
                    ttl.num_hours()
                ))
            })?;
        Ok(Self {
            id: SessionId::new(),
            user_id,
            created_at,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.id, self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub user_id: UserId,
    pub reset_password_code: Option<String>,
}

impl Student {
    pub fn new(user_id: UserId) -> Self {
        Self {
            id: StudentId::new(),
            user_id,
            reset_password_code: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demographic {
    pub id: DemographicId,
    pub student_id: StudentId,
    pub age: i64,
    pub gender_id: i64,
    pub grade_year_id: i64,
    pub ethnicity_id: i64,
    pub race_id: i64,
    pub major: String,
}

/// One location sample. A student accumulates many of these over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub student_id: StudentId,
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
}

impl Position {
    /// A sample taken now.
    pub fn new(student_id: StudentId, x: f64, y: f64) -> Self {
        Self {
            id: PositionId::new(),
            student_id,
            timestamp: now(),
            x,
            y,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.id, self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: ClassId,
    pub title: String,
    pub admin_id: UserId,
    pub semester: Semester,
    pub section: i64,
    pub year: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Class {
    /// A Fall section in the current year.
    pub fn new(
        title: impl Into<String>,
        admin_id: UserId,
        section: i64,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Self {
        Self {
            id: ClassId::new(),
            title: title.into(),
            admin_id,
            semester: Semester::default(),
            section,
            year: now().year(),
            start_time,
            end_time,
        }
    }

    pub fn semester(mut self, semester: Semester) -> Self {
        self.semester = semester;
        self
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEnrollment {
    pub id: i64,
    pub student_id: StudentId,
    pub class_id: ClassId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: SurveyId,
    pub admin_id: UserId,
    pub class_id: ClassId,
}

impl Survey {
    pub fn new(admin_id: UserId, class_id: ClassId) -> Self {
        Self {
            id: SurveyId::new(),
            admin_id,
            class_id,
        }
    }
}

impl fmt::Display for Survey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Survey - {}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyQuestion {
    pub id: QuestionId,
    pub survey_id: SurveyId,
    pub question_type: QuestionType,
    pub prompt_text: String,
}

impl SurveyQuestion {
    pub fn new(survey_id: SurveyId, question_type: QuestionType, prompt: impl Into<String>) -> Self {
        Self {
            id: QuestionId::new(),
            survey_id,
            question_type,
            prompt_text: prompt.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub id: ResponseId,
    pub question_id: QuestionId,
    pub student_id: StudentId,
    pub response: String,
}

impl SurveyResponse {
    pub fn new(question_id: QuestionId, student_id: StudentId, response: impl Into<String>) -> Self {
        Self {
            id: ResponseId::new(),
            question_id,
            student_id,
            response: response.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_strings() {
        let id = StudentId::new();
        let parsed: StudentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<StudentId>().is_err());
    }

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(ClassId::new(), ClassId::new());
    }

    #[test]
    fn semester_codes_and_labels() {
        assert_eq!(Semester::default(), Semester::Fall);
        assert_eq!(Semester::Spring.code(), "SP");
        assert_eq!(Semester::Summer.label(), "Summer");
        assert_eq!("SM".parse::<Semester>().unwrap(), Semester::Summer);
        assert!("Fall".parse::<Semester>().is_err());
        assert_eq!(serde_json::to_string(&Semester::Fall).unwrap(), "\"FL\"");
    }

    #[test]
    fn question_type_codes() {
        assert_eq!(QuestionType::default(), QuestionType::ShortAnswer);
        assert_eq!(QuestionType::Essay.code(), "LA");
        assert_eq!("RA".parse::<QuestionType>().unwrap(), QuestionType::Range);
        assert_eq!(QuestionType::ALL.len(), 3);
    }

    #[test]
    fn session_expiry_follows_ttl() {
        let session = Session::new(UserId::new(), Duration::hours(24)).unwrap();
        assert_eq!(session.expires_at - session.created_at, Duration::hours(24));
        assert!(!session.is_expired(session.created_at));
        assert!(session.is_expired(session.expires_at));
    }

    #[test]
    fn session_lifetime_past_year_9999_is_rejected() {
        let user = UserId::new();
        assert!(Session::new(user, Duration::hours(i64::from(u32::MAX))).is_err());
        assert!(Session::new(user, Duration::hours(9000 * 24 * 366)).is_err());
        assert!(Session::new(user, Duration::days(365 * 10)).is_ok());
    }

    #[test]
    fn class_defaults_to_fall_of_current_year() {
        let start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(10, 15, 0).unwrap();
        let class = Class::new("Algebra I", UserId::new(), 1, start, end);
        assert_eq!(class.semester, Semester::Fall);
        assert_eq!(class.year, Utc::now().year());

        let class = class.semester(Semester::Spring).year(2025);
        assert_eq!(class.semester, Semester::Spring);
        assert_eq!(class.year, 2025);
    }

    #[test]
    fn display_forms() {
        let user = UserAccount::new("jdoe", "Jane", "Doe");
        assert_eq!(user.full_name(), "Jane Doe");
        assert_eq!(UserAccount::new("x", "", "Solo").full_name(), "Solo");

        let position = Position::new(StudentId::new(), 1.5, -2.0);
        assert_eq!(position.to_string(), format!("{} (1.5, -2)", position.id));

        let survey = Survey::new(UserId::new(), ClassId::new());
        assert_eq!(survey.to_string(), format!("Survey - {}", survey.id));
    }
}
