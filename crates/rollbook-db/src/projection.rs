//! Flat key/value projections of rows for handing to callers.
//!
//! Foreign keys are flattened to the referenced id, except where a view
//! names a human-readable field (class admin username, survey admin name,
//! class meeting day names).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rollbook_common::{Error, Result};
use serde::Serialize;
use serde_json::Value;

use crate::models::{
    ClassEnrollment, ClassId, Demographic, DemographicId, Position, PositionId, QuestionId,
    QuestionType, ResponseId, Semester, StudentId, SurveyId, SurveyQuestion, SurveyResponse,
};
use crate::store::{Store, format_time};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DemographicView {
    pub id: DemographicId,
    pub student: StudentId,
    pub age: i64,
    pub gender: i64,
    pub grade_year: i64,
    pub ethnicity: i64,
    pub race: i64,
    pub major: String,
}

impl From<&Demographic> for DemographicView {
    fn from(d: &Demographic) -> Self {
        Self {
            id: d.id,
            student: d.student_id,
            age: d.age,
            gender: d.gender_id,
            grade_year: d.grade_year_id,
            ethnicity: d.ethnicity_id,
            race: d.race_id,
            major: d.major.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionView {
    pub id: PositionId,
    pub student: StudentId,
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
}

impl From<&Position> for PositionView {
    fn from(p: &Position) -> Self {
        Self {
            id: p.id,
            student: p.student_id,
            timestamp: p.timestamp,
            x: p.x,
            y: p.y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassView {
    pub id: ClassId,
    pub title: String,
    pub section: i64,
    /// Username of the owning admin.
    pub admin: String,
    pub semester: Semester,
    pub year: i32,
    pub days: Vec<String>,
    pub start_time: String,
    pub end_time: String,
}

impl fmt::Display for ClassView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} - {} - {} {}",
            self.title, self.section, self.admin, self.semester, self.year
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrollmentView {
    pub student: StudentId,
    pub classes: ClassId,
}

impl From<&ClassEnrollment> for EnrollmentView {
    fn from(e: &ClassEnrollment) -> Self {
        Self {
            student: e.student_id,
            classes: e.class_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurveyView {
    pub id: SurveyId,
    /// Full name of the owning admin.
    pub admin: String,
    pub associated_class: ClassId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub survey: SurveyId,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
}

impl From<&SurveyQuestion> for QuestionView {
    fn from(q: &SurveyQuestion) -> Self {
        Self {
            id: q.id,
            survey: q.survey_id,
            question_type: q.question_type,
            prompt: q.prompt_text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseView {
    pub id: ResponseId,
    pub question: QuestionId,
    pub student: StudentId,
    pub response: String,
}

impl From<&SurveyResponse> for ResponseView {
    fn from(r: &SurveyResponse) -> Self {
        Self {
            id: r.id,
            question: r.question_id,
            student: r.student_id,
            response: r.response.clone(),
        }
    }
}

/// Entities that have a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Student,
    Demographic,
    Position,
    Class,
    Enrollment,
    Survey,
    Question,
    Response,
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(EntityKind::Student),
            "demographic" => Ok(EntityKind::Demographic),
            "position" => Ok(EntityKind::Position),
            "class" => Ok(EntityKind::Class),
            "enrollment" => Ok(EntityKind::Enrollment),
            "survey" => Ok(EntityKind::Survey),
            "question" => Ok(EntityKind::Question),
            "response" => Ok(EntityKind::Response),
            other => Err(Error::Other(format!("unknown entity: {other}"))),
        }
    }
}

fn not_found(what: &str, id: impl fmt::Display) -> Error {
    Error::NotFound(format!("{what} {id}"))
}

impl Store {
    pub fn class_view(&self, id: ClassId) -> Result<Option<ClassView>> {
        let Some(class) = self.get_class(id)? else {
            return Ok(None);
        };
        let admin = self
            .get_user(class.admin_id)?
            .map(|u| u.username)
            .unwrap_or_default();
        let days = self
            .class_days(id)?
            .into_iter()
            .map(|d| d.name)
            .collect();
        Ok(Some(ClassView {
            id: class.id,
            title: class.title,
            section: class.section,
            admin,
            semester: class.semester,
            year: class.year,
            days,
            start_time: format_time(class.start_time),
            end_time: format_time(class.end_time),
        }))
    }

    pub fn survey_view(&self, id: SurveyId) -> Result<Option<SurveyView>> {
        let Some(survey) = self.get_survey(id)? else {
            return Ok(None);
        };
        let admin = self
            .get_user(survey.admin_id)?
            .map(|u| u.full_name())
            .unwrap_or_default();
        Ok(Some(SurveyView {
            id: survey.id,
            admin,
            associated_class: survey.class_id,
        }))
    }

    /// Projection of one row as JSON. `id` is a UUID, or an integer for
    /// enrollments.
    pub fn projection(&self, kind: EntityKind, id: &str) -> Result<Value> {
        let value = match kind {
            EntityKind::Student => {
                let id: StudentId = id.parse()?;
                let student = self.get_student(id)?.ok_or_else(|| not_found("student", id))?;
                serde_json::to_value(student.id)?
            }
            EntityKind::Demographic => {
                let id: DemographicId = id.parse()?;
                let d = self
                    .get_demographic(id)?
                    .ok_or_else(|| not_found("demographic", id))?;
                serde_json::to_value(DemographicView::from(&d))?
            }
            EntityKind::Position => {
                let id: PositionId = id.parse()?;
                let p = self.get_position(id)?.ok_or_else(|| not_found("position", id))?;
                serde_json::to_value(PositionView::from(&p))?
            }
            EntityKind::Class => {
                let id: ClassId = id.parse()?;
                let view = self.class_view(id)?.ok_or_else(|| not_found("class", id))?;
                serde_json::to_value(view)?
            }
            EntityKind::Enrollment => {
                let id: i64 = id
                    .parse()
                    .map_err(|e| Error::Other(format!("invalid enrollment id '{id}': {e}")))?;
                let e = self
                    .get_enrollment(id)?
                    .ok_or_else(|| not_found("enrollment", id))?;
                serde_json::to_value(EnrollmentView::from(&e))?
            }
            EntityKind::Survey => {
                let id: SurveyId = id.parse()?;
                let view = self.survey_view(id)?.ok_or_else(|| not_found("survey", id))?;
                serde_json::to_value(view)?
            }
            EntityKind::Question => {
                let id: QuestionId = id.parse()?;
                let q = self
                    .get_question(id)?
                    .ok_or_else(|| not_found("survey question", id))?;
                serde_json::to_value(QuestionView::from(&q))?
            }
            EntityKind::Response => {
                let id: ResponseId = id.parse()?;
                let r = self
                    .get_response(id)?
                    .ok_or_else(|| not_found("survey response", id))?;
                serde_json::to_value(ResponseView::from(&r))?
            }
        };
        Ok(value)
    }
}
