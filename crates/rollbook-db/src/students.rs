//! Students and the per-student rows that hang off them.

use std::fmt;

use rollbook_common::{Error, Result};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use tracing::debug;

use crate::models::{Demographic, DemographicId, Position, PositionId, Student, StudentId, UserId};
use crate::store::{Store, collect_rows, db_error, format_timestamp, read_timestamp};

const DEMOGRAPHIC_COLUMNS: &str =
    "id, student_id, age, gender_id, grade_year_id, ethnicity_id, race_id, major";

/// A student together with the owning account's name, as listed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentEntry {
    pub student: Student,
    pub first_name: String,
    pub last_name: String,
}

impl fmt::Display for StudentEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.last_name, self.first_name)
    }
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        user_id: row.get(1)?,
        reset_password_code: row.get(2)?,
    })
}

pub(crate) fn student_entry_from_row(row: &Row<'_>) -> rusqlite::Result<StudentEntry> {
    Ok(StudentEntry {
        student: student_from_row(row)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
    })
}

fn demographic_from_row(row: &Row<'_>) -> rusqlite::Result<Demographic> {
    Ok(Demographic {
        id: row.get(0)?,
        student_id: row.get(1)?,
        age: row.get(2)?,
        gender_id: row.get(3)?,
        grade_year_id: row.get(4)?,
        ethnicity_id: row.get(5)?,
        race_id: row.get(6)?,
        major: row.get(7)?,
    })
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        id: row.get(0)?,
        student_id: row.get(1)?,
        timestamp: read_timestamp(row, 2)?,
        x: row.get(3)?,
        y: row.get(4)?,
    })
}

impl Store {
    // ========== Students ==========

    pub fn create_student(&self, student: &Student) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO students (id, user_id, reset_password_code) VALUES (?1, ?2, ?3)",
            params![student.id, student.user_id, student.reset_password_code],
        )
        .map_err(|e| db_error("failed to create student", e))?;
        debug!("created student {}", student.id);
        Ok(())
    }

    pub fn get_student(&self, id: StudentId) -> Result<Option<Student>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, user_id, reset_password_code FROM students WHERE id = ?1",
            params![id],
            student_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load student", e))
    }

    pub fn students_for_user(&self, user_id: UserId) -> Result<Vec<Student>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, user_id, reset_password_code FROM students WHERE user_id = ?1")
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![user_id], student_from_row)
            .map_err(|e| db_error("failed to query students", e))?;
        collect_rows(rows, "failed to read student row")
    }

    /// All students, ordered by the owning user's last then first name.
    pub fn list_students(&self) -> Result<Vec<StudentEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.user_id, s.reset_password_code, u.first_name, u.last_name
                 FROM students s
                 JOIN users u ON u.id = s.user_id
                 ORDER BY u.last_name, u.first_name",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], student_entry_from_row)
            .map_err(|e| db_error("failed to query students", e))?;
        collect_rows(rows, "failed to read student row")
    }

    pub fn set_reset_password_code(&self, id: StudentId, code: Option<&str>) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE students SET reset_password_code = ?2 WHERE id = ?1",
                params![id, code],
            )
            .map_err(|e| db_error("failed to update student", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("student {id}")));
        }
        Ok(())
    }

    /// Delete a student along with their demographic, positions and
    /// enrollments. Fails while survey responses still reference them.
    pub fn delete_student(&self, id: StudentId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM students WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete student", e))?;
        Ok(changed > 0)
    }

    // ========== Demographics ==========

    pub fn create_demographic(&self, demographic: &Demographic) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO demographics
                (id, student_id, age, gender_id, grade_year_id, ethnicity_id, race_id, major)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                demographic.id,
                demographic.student_id,
                demographic.age,
                demographic.gender_id,
                demographic.grade_year_id,
                demographic.ethnicity_id,
                demographic.race_id,
                demographic.major,
            ],
        )
        .map_err(|e| db_error("failed to create demographic", e))?;
        debug!("created demographic for student {}", demographic.student_id);
        Ok(())
    }

    pub fn get_demographic(&self, id: DemographicId) -> Result<Option<Demographic>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {DEMOGRAPHIC_COLUMNS} FROM demographics WHERE id = ?1"),
            params![id],
            demographic_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load demographic", e))
    }

    pub fn demographic_for_student(&self, student_id: StudentId) -> Result<Option<Demographic>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {DEMOGRAPHIC_COLUMNS} FROM demographics WHERE student_id = ?1"),
            params![student_id],
            demographic_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load demographic", e))
    }

    pub fn update_demographic(&self, demographic: &Demographic) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE demographics SET age = ?2, gender_id = ?3, grade_year_id = ?4,
                    ethnicity_id = ?5, race_id = ?6, major = ?7
                 WHERE id = ?1",
                params![
                    demographic.id,
                    demographic.age,
                    demographic.gender_id,
                    demographic.grade_year_id,
                    demographic.ethnicity_id,
                    demographic.race_id,
                    demographic.major,
                ],
            )
            .map_err(|e| db_error("failed to update demographic", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("demographic {}", demographic.id)));
        }
        Ok(())
    }

    pub fn delete_demographic(&self, id: DemographicId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM demographics WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete demographic", e))?;
        Ok(changed > 0)
    }

    // ========== Positions ==========

    pub fn record_position(&self, position: &Position) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO positions (id, student_id, timestamp, x, y) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                position.id,
                position.student_id,
                format_timestamp(position.timestamp),
                position.x,
                position.y,
            ],
        )
        .map_err(|e| db_error("failed to record position", e))?;
        Ok(())
    }

    pub fn get_position(&self, id: PositionId) -> Result<Option<Position>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, student_id, timestamp, x, y FROM positions WHERE id = ?1",
            params![id],
            position_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load position", e))
    }

    /// Movement history of one student, newest first.
    pub fn positions_for_student(&self, student_id: StudentId, limit: usize) -> Result<Vec<Position>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, student_id, timestamp, x, y FROM positions
                 WHERE student_id = ?1
                 ORDER BY timestamp DESC
                 LIMIT ?2",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![student_id, limit as i64], position_from_row)
            .map_err(|e| db_error("failed to query positions", e))?;
        collect_rows(rows, "failed to read position row")
    }

    pub fn latest_position(&self, student_id: StudentId) -> Result<Option<Position>> {
        Ok(self.positions_for_student(student_id, 1)?.into_iter().next())
    }

    pub fn delete_position(&self, id: PositionId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM positions WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete position", e))?;
        Ok(changed > 0)
    }
}
