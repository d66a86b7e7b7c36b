use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Datelike, NaiveTime, SecondsFormat, SubsecRound, Utc};
use rollbook_common::{ConstraintKind, ConstraintViolation, Error, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, Row, ffi};
use serde::Serialize;
use tracing::info;

use crate::migrations::run_migrations;
use crate::models::MAX_TIMESTAMP_YEAR;

/// Tables reported by [`Store::table_counts`], in dependency order.
const TABLES: &[&str] = &[
    "users",
    "sessions",
    "students",
    "gender_lookup",
    "grade_year_lookup",
    "race_lookup",
    "ethnicity_lookup",
    "demographics",
    "positions",
    "day_lookup",
    "classes",
    "class_days",
    "class_enrollments",
    "surveys",
    "survey_questions",
    "survey_responses",
];

const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub busy_timeout: std::time::Duration,
    /// Lifetime given to sessions created without an explicit expiry.
    pub session_ttl: chrono::Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: std::time::Duration::from_millis(5_000),
            session_ttl: chrono::Duration::hours(24),
        }
    }
}

/// Handle to the Rollbook database. Opening it brings the schema up to date.
///
/// Entity operations live in the `accounts`, `students`, `lookups`,
/// `classes` and `surveys` modules as further `impl Store` blocks.
pub struct Store {
    conn: Mutex<Connection>,
    options: StoreOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: &'static str,
    pub rows: usize,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::open_with(db_path, StoreOptions::default())
    }

    pub fn open_with(db_path: &Path, options: StoreOptions) -> Result<Self> {
        info!("opening rollbook store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| db_error("failed to open database", e))?;
        Self::init(conn, options)
    }

    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with(StoreOptions::default())
    }

    pub fn in_memory_with(options: StoreOptions) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| db_error("failed to open in-memory database", e))?;
        Self::init(conn, options)
    }

    fn init(mut conn: Connection, options: StoreOptions) -> Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| db_error("failed to set pragmas", e))?;
        conn.busy_timeout(options.busy_timeout)
            .map_err(|e| db_error("failed to set busy timeout", e))?;

        let applied = run_migrations(&mut conn)?;
        if applied > 0 {
            info!("applied {applied} migration(s)");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            options,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("store lock poisoned".into()))
    }

    /// Current migration state of this database.
    pub fn migration_status(&self) -> Result<crate::migrations::MigrationStatus> {
        let conn = self.connection()?;
        crate::migrations::migration_status(&conn)
    }

    /// Row counts for every schema table.
    pub fn table_counts(&self) -> Result<Vec<TableCount>> {
        let conn = self.connection()?;
        TABLES
            .iter()
            .map(|&table| {
                let rows: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                        row.get(0)
                    })
                    .map_err(|e| db_error(&format!("failed to count {table}"), e))?;
                Ok(TableCount {
                    table,
                    rows: rows as usize,
                })
            })
            .collect()
    }
}

/// Wrap a SQLite error with context, classifying constraint failures so the
/// caller can tell a duplicate from a dangling reference.
pub(crate) fn db_error(context: &str, err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(code, detail) = &err {
        if code.code == ErrorCode::ConstraintViolation {
            let kind = match code.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
                ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::PrimaryKey,
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
                ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
                ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
                _ => ConstraintKind::Other,
            };
            let detail = detail.clone().unwrap_or_else(|| err.to_string());
            return Error::Constraint(ConstraintViolation {
                kind,
                message: format!("{context}: {detail}"),
            });
        }
    }
    Error::Database(format!("{context}: {err}"))
}

/// Fixed-width RFC 3339 so that text comparison matches time order.
/// Sub-microsecond digits are dropped.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.trunc_subsecs(6).to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// [`format_timestamp`] for caller-supplied values, refusing years whose
/// text form would not sort in time order.
pub(crate) fn checked_timestamp(ts: DateTime<Utc>) -> Result<String> {
    if !(0..=MAX_TIMESTAMP_YEAR).contains(&ts.year()) {
        return Err(Error::Other(format!("timestamp {ts} is out of range")));
    }
    Ok(format_timestamp(ts))
}

pub(crate) fn format_time(t: NaiveTime) -> String {
    t.format(TIME_FORMAT).to_string()
}

pub(crate) fn read_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn read_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveTime> {
    let raw: String = row.get(idx)?;
    NaiveTime::parse_from_str(&raw, TIME_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Drain a `query_map` iterator, wrapping row errors with `context`.
pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
    context: &str,
) -> Result<Vec<T>> {
    rows.map(|row| row.map_err(|e| db_error(context, e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_is_fully_migrated() {
        let store = Store::in_memory().unwrap();
        let status = store.migration_status().unwrap();
        assert!(status.is_up_to_date());
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let store = Store::in_memory().unwrap();
        let conn = store.connection().unwrap();
        let enabled: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn table_counts_cover_every_table() {
        let store = Store::in_memory().unwrap();
        let counts = store.table_counts().unwrap();
        assert_eq!(counts.len(), TABLES.len());

        let days = counts.iter().find(|c| c.table == "day_lookup").unwrap();
        assert_eq!(days.rows, 7);
        let users = counts.iter().find(|c| c.table == "users").unwrap();
        assert_eq!(users.rows, 0);
    }

    #[test]
    fn timestamps_sort_lexically_in_time_order() {
        let early = DateTime::parse_from_rfc3339("2024-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = early + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(early) < format_timestamp(later));
        assert_eq!(format_timestamp(early), "2024-01-01T09:00:00.000000Z");
    }

    #[test]
    fn far_future_timestamps_are_refused() {
        let edge = DateTime::parse_from_rfc3339("9999-12-31T23:59:59Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(checked_timestamp(edge).is_ok());
        assert!(checked_timestamp(edge + chrono::Duration::seconds(1)).is_err());
    }

    #[test]
    fn classifies_constraint_failures() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT NOT NULL UNIQUE);")
            .unwrap();
        conn.execute("INSERT INTO t (v) VALUES ('a')", []).unwrap();

        let dup = conn.execute("INSERT INTO t (v) VALUES ('a')", []).unwrap_err();
        assert_eq!(
            db_error("insert", dup).constraint_kind(),
            Some(ConstraintKind::Unique)
        );

        let null = conn.execute("INSERT INTO t (v) VALUES (NULL)", []).unwrap_err();
        assert_eq!(
            db_error("insert", null).constraint_kind(),
            Some(ConstraintKind::NotNull)
        );

        let other = conn.execute("INSERT INTO nope VALUES (1)", []).unwrap_err();
        assert!(matches!(db_error("insert", other), Error::Database(_)));
    }
}
