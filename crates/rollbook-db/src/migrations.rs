//! Migration system for tracking and applying database schema changes.
//!
//! Each migration has a version number and a SQL statement.
//! Migrations are applied in order and tracked in a `_migrations` table.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rollbook_common::{Error, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::store::{collect_rows, db_error, format_timestamp, read_timestamp};

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// The schema, oldest first. Append only.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users_and_sessions",
        sql: "CREATE TABLE users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE CHECK (length(username) <= 150),
                first_name TEXT NOT NULL DEFAULT '',
                last_name TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            );

            CREATE TABLE sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                CHECK (expires_at > created_at)
            );

            CREATE INDEX idx_sessions_user ON sessions(user_id);
            CREATE INDEX idx_sessions_expires ON sessions(expires_at);",
    },
    Migration {
        version: 2,
        name: "create_students_and_lookups",
        sql: "CREATE TABLE students (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                reset_password_code TEXT
                    CHECK (reset_password_code IS NULL OR length(reset_password_code) <= 6)
            );

            CREATE INDEX idx_students_user ON students(user_id);

            CREATE TABLE gender_lookup (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL CHECK (length(name) <= 25)
            );

            CREATE TABLE grade_year_lookup (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL CHECK (length(name) <= 25)
            );

            CREATE TABLE race_lookup (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL CHECK (length(name) <= 50)
            );

            CREATE TABLE ethnicity_lookup (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL CHECK (length(name) <= 50)
            );",
    },
    Migration {
        version: 3,
        name: "create_demographics_and_positions",
        sql: "CREATE TABLE demographics (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL UNIQUE REFERENCES students(id) ON DELETE CASCADE,
                age INTEGER NOT NULL,
                gender_id INTEGER NOT NULL REFERENCES gender_lookup(id) ON DELETE CASCADE,
                grade_year_id INTEGER NOT NULL REFERENCES grade_year_lookup(id) ON DELETE CASCADE,
                ethnicity_id INTEGER NOT NULL REFERENCES ethnicity_lookup(id) ON DELETE CASCADE,
                race_id INTEGER NOT NULL REFERENCES race_lookup(id) ON DELETE CASCADE,
                major TEXT NOT NULL CHECK (length(major) <= 100)
            );

            CREATE TABLE positions (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
                timestamp TEXT NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL
            );

            CREATE INDEX idx_positions_student ON positions(student_id, timestamp);",
    },
    Migration {
        version: 4,
        name: "create_classes_and_enrollments",
        sql: "CREATE TABLE day_lookup (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL CHECK (length(name) <= 10)
            );

            CREATE TABLE classes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL CHECK (length(title) <= 50),
                admin_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                semester TEXT NOT NULL DEFAULT 'FL' CHECK (semester IN ('FL', 'SP', 'SM')),
                section INTEGER NOT NULL,
                year INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                UNIQUE (title, semester, year)
            );

            CREATE TABLE class_days (
                class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
                day_id INTEGER NOT NULL REFERENCES day_lookup(id) ON DELETE CASCADE,
                PRIMARY KEY (class_id, day_id)
            );

            CREATE TABLE class_enrollments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_id TEXT NOT NULL REFERENCES students(id) ON DELETE CASCADE,
                class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
                UNIQUE (student_id, class_id)
            );

            CREATE INDEX idx_enrollments_class ON class_enrollments(class_id);",
    },
    Migration {
        version: 5,
        name: "create_surveys",
        sql: "CREATE TABLE surveys (
                id TEXT PRIMARY KEY,
                admin_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                class_id TEXT NOT NULL REFERENCES classes(id) ON DELETE NO ACTION
            );

            CREATE TABLE survey_questions (
                id TEXT PRIMARY KEY,
                survey_id TEXT NOT NULL REFERENCES surveys(id) ON DELETE NO ACTION,
                type TEXT NOT NULL DEFAULT 'SA' CHECK (type IN ('SA', 'LA', 'RA')),
                prompt_text TEXT NOT NULL
            );

            CREATE TABLE survey_responses (
                id TEXT PRIMARY KEY,
                question_id TEXT NOT NULL REFERENCES survey_questions(id) ON DELETE NO ACTION,
                student_id TEXT NOT NULL REFERENCES students(id) ON DELETE NO ACTION,
                response TEXT NOT NULL
            );

            CREATE INDEX idx_questions_survey ON survey_questions(survey_id);
            CREATE INDEX idx_responses_question ON survey_responses(question_id);
            CREATE INDEX idx_responses_student ON survey_responses(student_id);",
    },
    Migration {
        version: 6,
        name: "seed_days",
        sql: "INSERT INTO day_lookup (id, name) VALUES
                (1, 'Monday'),
                (2, 'Tuesday'),
                (3, 'Wednesday'),
                (4, 'Thursday'),
                (5, 'Friday'),
                (6, 'Saturday'),
                (7, 'Sunday');",
    },
];

/// A migration recorded in `_migrations`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedMigration>,
    pub pending: Vec<(u32, &'static str)>,
}

impl MigrationStatus {
    pub fn current_version(&self) -> u32 {
        self.applied.iter().map(|m| m.version).max().unwrap_or(0)
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|e| db_error("failed to create migrations table", e))
}

fn migrations_table_exists(conn: &Connection) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = '_migrations')",
        [],
        |row| row.get(0),
    )
    .map_err(|e| db_error("failed to look up migrations table", e))
}

fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>> {
    let mut stmt = conn
        .prepare("SELECT version FROM _migrations")
        .map_err(|e| db_error("failed to prepare query", e))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, u32>(0))
        .map_err(|e| db_error("failed to read migrations", e))?;

    let mut versions = BTreeSet::new();
    for row in rows {
        versions.insert(row.map_err(|e| db_error("failed to read migration row", e))?);
    }
    Ok(versions)
}

fn check_ordering(migrations: &[Migration]) -> Result<()> {
    for pair in migrations.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(Error::Database(format!(
                "migration {} ({}) is not newer than {} ({})",
                pair[1].version, pair[1].name, pair[0].version, pair[0].name
            )));
        }
    }
    Ok(())
}

/// Apply every pending entry of [`MIGRATIONS`]. Returns how many ran.
pub fn run_migrations(conn: &mut Connection) -> Result<usize> {
    apply_migrations(conn, MIGRATIONS)
}

/// Apply pending `migrations` in order, each in its own transaction.
pub fn apply_migrations(conn: &mut Connection, migrations: &[Migration]) -> Result<usize> {
    check_ordering(migrations)?;
    ensure_migrations_table(conn)?;
    let applied = applied_versions(conn)?;

    let mut count = 0;
    for migration in migrations.iter().filter(|m| !applied.contains(&m.version)) {
        let tx = conn
            .transaction()
            .map_err(|e| db_error("failed to begin migration", e))?;
        tx.execute_batch(migration.sql).map_err(|e| {
            db_error(
                &format!("migration {} ({}) failed", migration.version, migration.name),
                e,
            )
        })?;
        tx.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, format_timestamp(Utc::now())],
        )
        .map_err(|e| db_error("failed to record migration", e))?;
        tx.commit()
            .map_err(|e| db_error("failed to commit migration", e))?;

        info!("applied migration {} ({})", migration.version, migration.name);
        count += 1;
    }

    if count == 0 {
        debug!("schema is up to date");
    }
    Ok(count)
}

/// Report applied and pending migrations without changing anything.
pub fn migration_status(conn: &Connection) -> Result<MigrationStatus> {
    if !migrations_table_exists(conn)? {
        return Ok(MigrationStatus {
            applied: Vec::new(),
            pending: MIGRATIONS.iter().map(|m| (m.version, m.name)).collect(),
        });
    }
    let mut stmt = conn
        .prepare("SELECT version, name, applied_at FROM _migrations ORDER BY version")
        .map_err(|e| db_error("failed to prepare query", e))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(AppliedMigration {
                version: row.get(0)?,
                name: row.get(1)?,
                applied_at: read_timestamp(row, 2)?,
            })
        })
        .map_err(|e| db_error("failed to read migrations", e))?;

    let applied = collect_rows(rows, "failed to read migration row")?;

    let pending = MIGRATIONS
        .iter()
        .filter(|m| !applied.iter().any(|a| a.version == m.version))
        .map(|m| (m.version, m.name))
        .collect();

    Ok(MigrationStatus { applied, pending })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn migration_list_is_strictly_increasing() {
        assert!(check_ordering(MIGRATIONS).is_ok());
    }

    #[test]
    fn applies_all_then_is_idempotent() {
        let mut conn = fresh();
        assert_eq!(run_migrations(&mut conn).unwrap(), MIGRATIONS.len());
        assert_eq!(run_migrations(&mut conn).unwrap(), 0);

        let status = migration_status(&conn).unwrap();
        assert!(status.is_up_to_date());
        assert_eq!(status.current_version(), MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn status_lists_pending_before_migrating() {
        let conn = fresh();
        let status = migration_status(&conn).unwrap();
        assert_eq!(status.current_version(), 0);
        assert_eq!(status.pending.len(), MIGRATIONS.len());
        assert_eq!(status.pending[0], (1, "create_users_and_sessions"));
    }

    #[test]
    fn status_does_not_create_the_tracking_table() {
        let conn = fresh();
        migration_status(&conn).unwrap();
        assert!(!migrations_table_exists(&conn).unwrap());

        let tables: i64 = conn
            .query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tables, 0);
    }

    #[test]
    fn partial_history_only_applies_newer_entries() {
        let mut conn = fresh();
        apply_migrations(&mut conn, &MIGRATIONS[..2]).unwrap();
        assert_eq!(run_migrations(&mut conn).unwrap(), MIGRATIONS.len() - 2);
    }

    #[test]
    fn seeds_the_seven_weekdays() {
        let mut conn = fresh();
        run_migrations(&mut conn).unwrap();
        let days: Vec<String> = conn
            .prepare("SELECT name FROM day_lookup ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], "Monday");
        assert_eq!(days[6], "Sunday");
    }

    #[test]
    fn rejects_out_of_order_list() {
        let mut conn = fresh();
        let bad = [MIGRATIONS[1], MIGRATIONS[0]];
        let err = apply_migrations(&mut conn, &bad).unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[test]
    fn failed_migration_is_rolled_back() {
        let mut conn = fresh();
        let broken = [Migration {
            version: 1,
            name: "broken",
            sql: "CREATE TABLE half_done (id INTEGER); INSERT INTO missing VALUES (1);",
        }];
        assert!(apply_migrations(&mut conn, &broken).is_err());

        let exists: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE name = 'half_done'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(exists, 0);
        assert!(migration_status(&conn).unwrap().applied.is_empty());
    }
}
