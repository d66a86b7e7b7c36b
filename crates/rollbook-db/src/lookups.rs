//! Administrator-maintained reference tables.
//!
//! The set of tables is closed; their values are rows that can be added or
//! removed without a code change.

use std::fmt;
use std::str::FromStr;

use rollbook_common::{Error, Result};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::store::{Store, collect_rows, db_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupTable {
    Gender,
    GradeYear,
    Race,
    Ethnicity,
    Day,
}

impl LookupTable {
    pub const ALL: &'static [LookupTable] = &[
        LookupTable::Gender,
        LookupTable::GradeYear,
        LookupTable::Race,
        LookupTable::Ethnicity,
        LookupTable::Day,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            LookupTable::Gender => "gender_lookup",
            LookupTable::GradeYear => "grade_year_lookup",
            LookupTable::Race => "race_lookup",
            LookupTable::Ethnicity => "ethnicity_lookup",
            LookupTable::Day => "day_lookup",
        }
    }

    /// Day ids are assigned explicitly; the others autoincrement.
    pub fn has_explicit_ids(&self) -> bool {
        matches!(self, LookupTable::Day)
    }
}

impl fmt::Display for LookupTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LookupTable::Gender => "gender",
            LookupTable::GradeYear => "grade-year",
            LookupTable::Race => "race",
            LookupTable::Ethnicity => "ethnicity",
            LookupTable::Day => "day",
        };
        f.write_str(s)
    }
}

impl FromStr for LookupTable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "gender" => Ok(LookupTable::Gender),
            "grade-year" => Ok(LookupTable::GradeYear),
            "race" => Ok(LookupTable::Race),
            "ethnicity" => Ok(LookupTable::Ethnicity),
            "day" => Ok(LookupTable::Day),
            other => Err(Error::Other(format!("unknown lookup table: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub id: i64,
    pub name: String,
}

impl fmt::Display for LookupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Store {
    /// Add a value to an autoincrement lookup table, returning its id.
    pub fn add_lookup(&self, table: LookupTable, name: &str) -> Result<i64> {
        if table.has_explicit_ids() {
            return Err(Error::Other(format!(
                "{table} entries need an explicit id; use add_lookup_with_id"
            )));
        }
        let conn = self.connection()?;
        conn.execute(
            &format!("INSERT INTO {} (name) VALUES (?1)", table.table_name()),
            params![name],
        )
        .map_err(|e| db_error(&format!("failed to add {table} entry"), e))?;
        let id = conn.last_insert_rowid();
        debug!("added {table} entry {id} ({name})");
        Ok(id)
    }

    pub fn add_lookup_with_id(&self, table: LookupTable, id: i64, name: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            &format!("INSERT INTO {} (id, name) VALUES (?1, ?2)", table.table_name()),
            params![id, name],
        )
        .map_err(|e| db_error(&format!("failed to add {table} entry"), e))?;
        debug!("added {table} entry {id} ({name})");
        Ok(())
    }

    pub fn rename_lookup(&self, table: LookupTable, id: i64, name: &str) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                &format!("UPDATE {} SET name = ?2 WHERE id = ?1", table.table_name()),
                params![id, name],
            )
            .map_err(|e| db_error(&format!("failed to rename {table} entry"), e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("{table} entry {id}")));
        }
        Ok(())
    }

    /// Remove a lookup value. Rows referencing it are deleted with it.
    pub fn remove_lookup(&self, table: LookupTable, id: i64) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                &format!("DELETE FROM {} WHERE id = ?1", table.table_name()),
                params![id],
            )
            .map_err(|e| db_error(&format!("failed to remove {table} entry"), e))?;
        Ok(changed > 0)
    }

    pub fn get_lookup(&self, table: LookupTable, id: i64) -> Result<Option<LookupEntry>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT id, name FROM {} WHERE id = ?1", table.table_name()),
            params![id],
            |row| {
                Ok(LookupEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(|e| db_error(&format!("failed to load {table} entry"), e))
    }

    pub fn list_lookup(&self, table: LookupTable) -> Result<Vec<LookupEntry>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, name FROM {} ORDER BY id",
                table.table_name()
            ))
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LookupEntry {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .map_err(|e| db_error(&format!("failed to query {table} entries"), e))?;
        collect_rows(rows, "failed to read lookup row")
    }
}
