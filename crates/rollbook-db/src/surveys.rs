//! Surveys, their questions and student responses.
//!
//! None of these relationships cascade on delete: removing a class, survey,
//! question or student that still has survey rows pointing at it is refused
//! by the store with a foreign-key violation.

use rollbook_common::{Error, Result};
use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::models::{
    ClassId, QuestionId, ResponseId, StudentId, Survey, SurveyId, SurveyQuestion, SurveyResponse,
    UserId,
};
use crate::store::{Store, collect_rows, db_error};

fn survey_from_row(row: &Row<'_>) -> rusqlite::Result<Survey> {
    Ok(Survey {
        id: row.get(0)?,
        admin_id: row.get(1)?,
        class_id: row.get(2)?,
    })
}

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<SurveyQuestion> {
    Ok(SurveyQuestion {
        id: row.get(0)?,
        survey_id: row.get(1)?,
        question_type: row.get(2)?,
        prompt_text: row.get(3)?,
    })
}

fn response_from_row(row: &Row<'_>) -> rusqlite::Result<SurveyResponse> {
    Ok(SurveyResponse {
        id: row.get(0)?,
        question_id: row.get(1)?,
        student_id: row.get(2)?,
        response: row.get(3)?,
    })
}

impl Store {
    // ========== Surveys ==========

    pub fn create_survey(&self, survey: &Survey) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO surveys (id, admin_id, class_id) VALUES (?1, ?2, ?3)",
            params![survey.id, survey.admin_id, survey.class_id],
        )
        .map_err(|e| db_error("failed to create survey", e))?;
        debug!("created survey {} for class {}", survey.id, survey.class_id);
        Ok(())
    }

    pub fn get_survey(&self, id: SurveyId) -> Result<Option<Survey>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, admin_id, class_id FROM surveys WHERE id = ?1",
            params![id],
            survey_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load survey", e))
    }

    pub fn surveys_for_class(&self, class_id: ClassId) -> Result<Vec<Survey>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, admin_id, class_id FROM surveys WHERE class_id = ?1")
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![class_id], survey_from_row)
            .map_err(|e| db_error("failed to query surveys", e))?;
        collect_rows(rows, "failed to read survey row")
    }

    pub fn surveys_for_admin(&self, admin_id: UserId) -> Result<Vec<Survey>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, admin_id, class_id FROM surveys WHERE admin_id = ?1")
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![admin_id], survey_from_row)
            .map_err(|e| db_error("failed to query surveys", e))?;
        collect_rows(rows, "failed to read survey row")
    }

    pub fn update_survey(&self, survey: &Survey) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE surveys SET admin_id = ?2, class_id = ?3 WHERE id = ?1",
                params![survey.id, survey.admin_id, survey.class_id],
            )
            .map_err(|e| db_error("failed to update survey", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("survey {}", survey.id)));
        }
        Ok(())
    }

    pub fn delete_survey(&self, id: SurveyId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM surveys WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete survey", e))?;
        Ok(changed > 0)
    }

    // ========== Questions ==========

    pub fn add_question(&self, question: &SurveyQuestion) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO survey_questions (id, survey_id, type, prompt_text)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                question.id,
                question.survey_id,
                question.question_type,
                question.prompt_text
            ],
        )
        .map_err(|e| db_error("failed to add survey question", e))?;
        Ok(())
    }

    pub fn get_question(&self, id: QuestionId) -> Result<Option<SurveyQuestion>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, survey_id, type, prompt_text FROM survey_questions WHERE id = ?1",
            params![id],
            question_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load survey question", e))
    }

    /// Questions of a survey in insertion order.
    pub fn questions_for_survey(&self, survey_id: SurveyId) -> Result<Vec<SurveyQuestion>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, survey_id, type, prompt_text FROM survey_questions
                 WHERE survey_id = ?1 ORDER BY rowid",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![survey_id], question_from_row)
            .map_err(|e| db_error("failed to query survey questions", e))?;
        collect_rows(rows, "failed to read survey question row")
    }

    pub fn update_question(&self, question: &SurveyQuestion) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE survey_questions SET survey_id = ?2, type = ?3, prompt_text = ?4
                 WHERE id = ?1",
                params![
                    question.id,
                    question.survey_id,
                    question.question_type,
                    question.prompt_text
                ],
            )
            .map_err(|e| db_error("failed to update survey question", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("survey question {}", question.id)));
        }
        Ok(())
    }

    pub fn delete_question(&self, id: QuestionId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM survey_questions WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete survey question", e))?;
        Ok(changed > 0)
    }

    // ========== Responses ==========

    /// Store a response. A student may answer the same question more than once.
    pub fn record_response(&self, response: &SurveyResponse) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO survey_responses (id, question_id, student_id, response)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                response.id,
                response.question_id,
                response.student_id,
                response.response
            ],
        )
        .map_err(|e| db_error("failed to record survey response", e))?;
        Ok(())
    }

    pub fn get_response(&self, id: ResponseId) -> Result<Option<SurveyResponse>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, question_id, student_id, response FROM survey_responses WHERE id = ?1",
            params![id],
            response_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load survey response", e))
    }

    pub fn responses_for_question(&self, question_id: QuestionId) -> Result<Vec<SurveyResponse>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, question_id, student_id, response FROM survey_responses
                 WHERE question_id = ?1 ORDER BY rowid",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![question_id], response_from_row)
            .map_err(|e| db_error("failed to query survey responses", e))?;
        collect_rows(rows, "failed to read survey response row")
    }

    pub fn responses_for_student(&self, student_id: StudentId) -> Result<Vec<SurveyResponse>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, question_id, student_id, response FROM survey_responses
                 WHERE student_id = ?1 ORDER BY rowid",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![student_id], response_from_row)
            .map_err(|e| db_error("failed to query survey responses", e))?;
        collect_rows(rows, "failed to read survey response row")
    }

    pub fn update_response(&self, id: ResponseId, response: &str) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE survey_responses SET response = ?2 WHERE id = ?1",
                params![id, response],
            )
            .map_err(|e| db_error("failed to update survey response", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("survey response {id}")));
        }
        Ok(())
    }

    pub fn delete_response(&self, id: ResponseId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM survey_responses WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete survey response", e))?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Class, QuestionType, Student, UserAccount};
    use chrono::NaiveTime;

    struct Fixture {
        store: Store,
        admin: UserAccount,
        class: Class,
        student: Student,
    }

    fn fixture() -> Fixture {
        let store = Store::in_memory().unwrap();
        let admin = UserAccount::new("prof", "Grace", "Hopper");
        store.create_user(&admin).unwrap();

        let class = Class::new(
            "Compilers",
            admin.id,
            1,
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
        );
        store.create_class(&class, &[2, 4]).unwrap();

        let user = UserAccount::new("kid", "Kim", "Lee");
        store.create_user(&user).unwrap();
        let student = Student::new(user.id);
        store.create_student(&student).unwrap();

        Fixture {
            store,
            admin,
            class,
            student,
        }
    }

    #[test]
    fn survey_tree_round_trip() {
        let f = fixture();
        let survey = Survey::new(f.admin.id, f.class.id);
        f.store.create_survey(&survey).unwrap();

        let q1 = SurveyQuestion::new(survey.id, QuestionType::ShortAnswer, "Name one loop.");
        let q2 = SurveyQuestion::new(survey.id, QuestionType::Range, "Rate 1-10");
        f.store.add_question(&q1).unwrap();
        f.store.add_question(&q2).unwrap();

        assert_eq!(f.store.get_survey(survey.id).unwrap(), Some(survey.clone()));
        assert_eq!(f.store.questions_for_survey(survey.id).unwrap(), [q1, q2]);
        assert_eq!(f.store.surveys_for_class(f.class.id).unwrap().len(), 1);
        assert_eq!(f.store.surveys_for_admin(f.admin.id).unwrap().len(), 1);
    }

    #[test]
    fn survey_needs_an_existing_class() {
        let f = fixture();
        let err = f
            .store
            .create_survey(&Survey::new(f.admin.id, ClassId::new()))
            .unwrap_err();
        assert!(err.is_foreign_key_violation());
    }

    #[test]
    fn repeated_responses_are_allowed() {
        let f = fixture();
        let survey = Survey::new(f.admin.id, f.class.id);
        f.store.create_survey(&survey).unwrap();
        let q = SurveyQuestion::new(survey.id, QuestionType::Essay, "Explain parsing.");
        f.store.add_question(&q).unwrap();

        f.store
            .record_response(&SurveyResponse::new(q.id, f.student.id, "first try"))
            .unwrap();
        f.store
            .record_response(&SurveyResponse::new(q.id, f.student.id, "second try"))
            .unwrap();

        let answers = f.store.responses_for_question(q.id).unwrap();
        assert_eq!(answers.len(), 2);
        assert_eq!(answers[1].response, "second try");
        assert_eq!(f.store.responses_for_student(f.student.id).unwrap().len(), 2);

        f.store.update_response(answers[0].id, "revised").unwrap();
        assert_eq!(
            f.store.get_response(answers[0].id).unwrap().unwrap().response,
            "revised"
        );
    }

    #[test]
    fn parents_with_survey_rows_cannot_be_deleted() {
        let f = fixture();
        let survey = Survey::new(f.admin.id, f.class.id);
        f.store.create_survey(&survey).unwrap();
        let q = SurveyQuestion::new(survey.id, QuestionType::ShortAnswer, "Why?");
        f.store.add_question(&q).unwrap();
        let r = SurveyResponse::new(q.id, f.student.id, "Because.");
        f.store.record_response(&r).unwrap();

        assert!(f.store.delete_class(f.class.id).unwrap_err().is_foreign_key_violation());
        assert!(f.store.delete_survey(survey.id).unwrap_err().is_foreign_key_violation());
        assert!(f.store.delete_question(q.id).unwrap_err().is_foreign_key_violation());
        assert!(f.store.delete_student(f.student.id).unwrap_err().is_foreign_key_violation());

        // Children first, then the parents go through.
        assert!(f.store.delete_response(r.id).unwrap());
        assert!(f.store.delete_question(q.id).unwrap());
        assert!(f.store.delete_survey(survey.id).unwrap());
        assert!(f.store.delete_class(f.class.id).unwrap());
        assert!(f.store.delete_student(f.student.id).unwrap());
    }

    #[test]
    fn updating_questions_and_missing_rows() {
        let f = fixture();
        let survey = Survey::new(f.admin.id, f.class.id);
        f.store.create_survey(&survey).unwrap();
        let mut q = SurveyQuestion::new(survey.id, QuestionType::default(), "Draft");
        f.store.add_question(&q).unwrap();

        q.question_type = QuestionType::Essay;
        q.prompt_text = "Final".into();
        f.store.update_question(&q).unwrap();
        let loaded = f.store.get_question(q.id).unwrap().unwrap();
        assert_eq!(loaded.question_type, QuestionType::Essay);
        assert_eq!(loaded.prompt_text, "Final");

        let ghost = SurveyQuestion::new(survey.id, QuestionType::Range, "?");
        assert!(matches!(f.store.update_question(&ghost), Err(Error::NotFound(_))));
        assert!(matches!(
            f.store.update_response(ResponseId::new(), "x"),
            Err(Error::NotFound(_))
        ));
    }
}
