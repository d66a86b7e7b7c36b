//! Class sections, their meeting days and student enrollment.

use rollbook_common::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::lookups::LookupEntry;
use crate::models::{Class, ClassEnrollment, ClassId, Semester, StudentId, UserId};
use crate::store::{Store, collect_rows, db_error, format_time, read_time};
use crate::students::{StudentEntry, student_entry_from_row};

const CLASS_COLUMNS: &str =
    "id, title, admin_id, semester, section, year, start_time, end_time";

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: row.get(0)?,
        title: row.get(1)?,
        admin_id: row.get(2)?,
        semester: row.get(3)?,
        section: row.get(4)?,
        year: row.get(5)?,
        start_time: read_time(row, 6)?,
        end_time: read_time(row, 7)?,
    })
}

fn enrollment_from_row(row: &Row<'_>) -> rusqlite::Result<ClassEnrollment> {
    Ok(ClassEnrollment {
        id: row.get(0)?,
        student_id: row.get(1)?,
        class_id: row.get(2)?,
    })
}

fn insert_days(conn: &Connection, class_id: ClassId, days: &[i64]) -> Result<()> {
    let mut stmt = conn
        .prepare("INSERT OR IGNORE INTO class_days (class_id, day_id) VALUES (?1, ?2)")
        .map_err(|e| db_error("failed to prepare query", e))?;
    for day in days {
        stmt.execute(params![class_id, day])
            .map_err(|e| db_error(&format!("failed to add day {day} to class"), e))?;
    }
    Ok(())
}

impl Store {
    // ========== Classes ==========

    /// Insert a class and its meeting days atomically.
    pub fn create_class(&self, class: &Class, days: &[i64]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error("failed to begin transaction", e))?;
        tx.execute(
            "INSERT INTO classes
                (id, title, admin_id, semester, section, year, start_time, end_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                class.id,
                class.title,
                class.admin_id,
                class.semester,
                class.section,
                class.year,
                format_time(class.start_time),
                format_time(class.end_time),
            ],
        )
        .map_err(|e| db_error("failed to create class", e))?;
        insert_days(&tx, class.id, days)?;
        tx.commit()
            .map_err(|e| db_error("failed to commit class", e))?;
        debug!(
            "created class {} ({} {} {})",
            class.id, class.title, class.semester, class.year
        );
        Ok(())
    }

    pub fn get_class(&self, id: ClassId) -> Result<Option<Class>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {CLASS_COLUMNS} FROM classes WHERE id = ?1"),
            params![id],
            class_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load class", e))
    }

    pub fn find_class(&self, title: &str, semester: Semester, year: i32) -> Result<Option<Class>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "SELECT {CLASS_COLUMNS} FROM classes
                 WHERE title = ?1 AND semester = ?2 AND year = ?3"
            ),
            params![title, semester, year],
            class_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load class", e))
    }

    /// All classes ordered by title.
    pub fn list_classes(&self) -> Result<Vec<Class>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {CLASS_COLUMNS} FROM classes ORDER BY title"))
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], class_from_row)
            .map_err(|e| db_error("failed to query classes", e))?;
        collect_rows(rows, "failed to read class row")
    }

    pub fn classes_for_admin(&self, admin_id: UserId) -> Result<Vec<Class>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CLASS_COLUMNS} FROM classes WHERE admin_id = ?1 ORDER BY title"
            ))
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![admin_id], class_from_row)
            .map_err(|e| db_error("failed to query classes", e))?;
        collect_rows(rows, "failed to read class row")
    }

    pub fn update_class(&self, class: &Class) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE classes SET title = ?2, admin_id = ?3, semester = ?4, section = ?5,
                    year = ?6, start_time = ?7, end_time = ?8
                 WHERE id = ?1",
                params![
                    class.id,
                    class.title,
                    class.admin_id,
                    class.semester,
                    class.section,
                    class.year,
                    format_time(class.start_time),
                    format_time(class.end_time),
                ],
            )
            .map_err(|e| db_error("failed to update class", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("class {}", class.id)));
        }
        Ok(())
    }

    /// Delete a class with its meeting days and enrollments. Fails while a
    /// survey is still associated with it.
    pub fn delete_class(&self, id: ClassId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM classes WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete class", e))?;
        Ok(changed > 0)
    }

    // ========== Meeting days ==========

    /// Replace the meeting days of a class.
    pub fn set_class_days(&self, class_id: ClassId, days: &[i64]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| db_error("failed to begin transaction", e))?;
        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM classes WHERE id = ?1)",
                params![class_id],
                |row| row.get(0),
            )
            .map_err(|e| db_error("failed to load class", e))?;
        if !exists {
            return Err(Error::NotFound(format!("class {class_id}")));
        }
        tx.execute("DELETE FROM class_days WHERE class_id = ?1", params![class_id])
            .map_err(|e| db_error("failed to clear class days", e))?;
        insert_days(&tx, class_id, days)?;
        tx.commit()
            .map_err(|e| db_error("failed to commit class days", e))
    }

    /// Meeting days of a class, Monday first.
    pub fn class_days(&self, class_id: ClassId) -> Result<Vec<LookupEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT d.id, d.name FROM class_days cd
                 JOIN day_lookup d ON d.id = cd.day_id
                 WHERE cd.class_id = ?1
                 ORDER BY d.id",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![class_id], |row| {
                Ok(LookupEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| db_error("failed to query class days", e))?;
        collect_rows(rows, "failed to read day row")
    }

    // ========== Enrollment ==========

    pub fn enroll(&self, student_id: StudentId, class_id: ClassId) -> Result<ClassEnrollment> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO class_enrollments (student_id, class_id) VALUES (?1, ?2)",
            params![student_id, class_id],
        )
        .map_err(|e| db_error("failed to enroll student", e))?;
        debug!("enrolled student {student_id} in class {class_id}");
        Ok(ClassEnrollment {
            id: conn.last_insert_rowid(),
            student_id,
            class_id,
        })
    }

    pub fn get_enrollment(&self, id: i64) -> Result<Option<ClassEnrollment>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, student_id, class_id FROM class_enrollments WHERE id = ?1",
            params![id],
            enrollment_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load enrollment", e))
    }

    pub fn unenroll(&self, student_id: StudentId, class_id: ClassId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "DELETE FROM class_enrollments WHERE student_id = ?1 AND class_id = ?2",
                params![student_id, class_id],
            )
            .map_err(|e| db_error("failed to unenroll student", e))?;
        Ok(changed > 0)
    }

    pub fn enrollments_for_class(&self, class_id: ClassId) -> Result<Vec<ClassEnrollment>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, student_id, class_id FROM class_enrollments
                 WHERE class_id = ?1 ORDER BY id",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![class_id], enrollment_from_row)
            .map_err(|e| db_error("failed to query enrollments", e))?;
        collect_rows(rows, "failed to read enrollment row")
    }

    /// Enrolled students, ordered like [`Store::list_students`].
    pub fn students_in_class(&self, class_id: ClassId) -> Result<Vec<StudentEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT s.id, s.user_id, s.reset_password_code, u.first_name, u.last_name
                 FROM class_enrollments e
                 JOIN students s ON s.id = e.student_id
                 JOIN users u ON u.id = s.user_id
                 WHERE e.class_id = ?1
                 ORDER BY u.last_name, u.first_name",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![class_id], student_entry_from_row)
            .map_err(|e| db_error("failed to query class roster", e))?;
        collect_rows(rows, "failed to read student row")
    }

    pub fn classes_for_student(&self, student_id: StudentId) -> Result<Vec<Class>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.title, c.admin_id, c.semester, c.section, c.year,
                        c.start_time, c.end_time
                 FROM class_enrollments e
                 JOIN classes c ON c.id = e.class_id
                 WHERE e.student_id = ?1
                 ORDER BY c.title",
            )
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![student_id], class_from_row)
            .map_err(|e| db_error("failed to query classes", e))?;
        collect_rows(rows, "failed to read class row")
    }
}
