use chrono::{DateTime, Utc};
use rollbook_common::{Error, Result};
use rusqlite::{OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::models::{Session, SessionId, UserAccount, UserId};
use crate::store::{
    Store, checked_timestamp, collect_rows, db_error, format_timestamp, read_timestamp,
};

const USER_COLUMNS: &str = "id, username, first_name, last_name, email, created_at";
const SESSION_COLUMNS: &str = "id, user_id, created_at, expires_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserAccount> {
    Ok(UserAccount {
        id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        created_at: read_timestamp(row, 5)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        created_at: read_timestamp(row, 2)?,
        expires_at: read_timestamp(row, 3)?,
    })
}

impl Store {
    // ========== Users ==========

    pub fn create_user(&self, user: &UserAccount) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO users (id, username, first_name, last_name, email, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id,
                user.username,
                user.first_name,
                user.last_name,
                user.email,
                format_timestamp(user.created_at),
            ],
        )
        .map_err(|e| db_error("failed to create user", e))?;
        debug!("created user {} ({})", user.id, user.username);
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<Option<UserAccount>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
            params![id],
            user_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load user", e))
    }

    pub fn find_user_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
            params![username],
            user_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load user", e))
    }

    /// Users ordered by last name, then first name.
    pub fn list_users(&self) -> Result<Vec<UserAccount>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY last_name, first_name"
            ))
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map([], user_from_row)
            .map_err(|e| db_error("failed to query users", e))?;
        collect_rows(rows, "failed to read user row")
    }

    pub fn update_user(&self, user: &UserAccount) -> Result<()> {
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE users SET username = ?2, first_name = ?3, last_name = ?4, email = ?5
                 WHERE id = ?1",
                params![
                    user.id,
                    user.username,
                    user.first_name,
                    user.last_name,
                    user.email
                ],
            )
            .map_err(|e| db_error("failed to update user", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }

    /// Delete a user together with their sessions, students, classes and
    /// surveys.
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete user", e))?;
        Ok(changed > 0)
    }

    // ========== Sessions ==========

    /// Start a session for `user_id` using the configured lifetime.
    pub fn create_session(&self, user_id: UserId) -> Result<Session> {
        let session = Session::new(user_id, self.options().session_ttl)?;
        self.insert_session(&session)?;
        Ok(session)
    }

    /// Persist a session as given, e.g. with an explicitly chosen expiry.
    ///
    /// Timestamps are stored at microsecond precision; finer digits are
    /// dropped, so build them with [`crate::models::now`] to read back equal.
    pub fn insert_session(&self, session: &Session) -> Result<()> {
        let created_at = checked_timestamp(session.created_at)?;
        let expires_at = checked_timestamp(session.expires_at)?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![session.id, session.user_id, created_at, expires_at],
        )
        .map_err(|e| db_error("failed to create session", e))?;
        debug!("created session {} for user {}", session.id, session.user_id);
        Ok(())
    }

    pub fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
            session_from_row,
        )
        .optional()
        .map_err(|e| db_error("failed to load session", e))
    }

    /// Sessions of one user, newest first.
    pub fn sessions_for_user(&self, user_id: UserId) -> Result<Vec<Session>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ?1
                 ORDER BY created_at DESC"
            ))
            .map_err(|e| db_error("failed to prepare query", e))?;
        let rows = stmt
            .query_map(params![user_id], session_from_row)
            .map_err(|e| db_error("failed to query sessions", e))?;
        collect_rows(rows, "failed to read session row")
    }

    /// Move a session's expiry. Stored at microsecond precision.
    pub fn set_session_expiry(&self, id: SessionId, expires_at: DateTime<Utc>) -> Result<()> {
        let expires_at = checked_timestamp(expires_at)?;
        let conn = self.connection()?;
        let changed = conn
            .execute(
                "UPDATE sessions SET expires_at = ?2 WHERE id = ?1",
                params![id, expires_at],
            )
            .map_err(|e| db_error("failed to update session expiry", e))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    pub fn delete_session(&self, id: SessionId) -> Result<bool> {
        let conn = self.connection()?;
        let changed = conn
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .map_err(|e| db_error("failed to delete session", e))?;
        Ok(changed > 0)
    }

    /// Delete every session whose expiry is at or before `now`.
    pub fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.connection()?;
        let removed = conn
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![format_timestamp(now)],
            )
            .map_err(|e| db_error("failed to purge sessions", e))?;
        if removed > 0 {
            info!("purged {removed} expired session(s)");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use chrono::{Duration, SubsecRound};
    use rollbook_common::ConstraintKind;

    fn store_with_user() -> (Store, UserAccount) {
        let store = Store::in_memory().unwrap();
        let user = UserAccount::new("ada", "Ada", "Lovelace").with_email("ada@example.edu");
        store.create_user(&user).unwrap();
        (store, user)
    }

    #[test]
    fn create_and_get_user_round_trip() {
        let (store, user) = store_with_user();
        let loaded = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(loaded.username, "ada");
        assert_eq!(loaded.email, "ada@example.edu");
        assert_eq!(loaded.created_at, user.created_at);

        let by_name = store.find_user_by_username("ada").unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(store.find_user_by_username("bob").unwrap().is_none());
    }

    #[test]
    fn usernames_are_unique() {
        let (store, _) = store_with_user();
        let err = store
            .create_user(&UserAccount::new("ada", "Other", "Person"))
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn update_missing_user_is_not_found() {
        let store = Store::in_memory().unwrap();
        let ghost = UserAccount::new("ghost", "", "");
        assert!(matches!(store.update_user(&ghost), Err(Error::NotFound(_))));
    }

    #[test]
    fn users_are_listed_by_last_then_first_name() {
        let store = Store::in_memory().unwrap();
        for (u, f, l) in [("c", "Carl", "Zed"), ("b", "Bea", "Adams"), ("a", "Al", "Adams")] {
            store.create_user(&UserAccount::new(u, f, l)).unwrap();
        }
        let names: Vec<_> = store
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn session_defaults_to_a_day() {
        let (store, user) = store_with_user();
        let session = store.create_session(user.id).unwrap();
        let loaded = store.get_session(session.id).unwrap().unwrap();
        assert_eq!(loaded.expires_at - loaded.created_at, Duration::hours(24));
        assert_eq!(loaded, session);
    }

    #[test]
    fn session_ttl_follows_store_options() {
        let store = Store::in_memory_with(StoreOptions {
            session_ttl: Duration::hours(2),
            ..StoreOptions::default()
        })
        .unwrap();
        let user = UserAccount::new("x", "X", "Y");
        store.create_user(&user).unwrap();

        let session = store.create_session(user.id).unwrap();
        assert_eq!(session.expires_at - session.created_at, Duration::hours(2));
    }

    #[test]
    fn oversized_session_ttl_is_an_error_not_a_panic() {
        for hours in [i64::from(u32::MAX), 9000 * 24 * 366] {
            let store = Store::in_memory_with(StoreOptions {
                session_ttl: Duration::hours(hours),
                ..StoreOptions::default()
            })
            .unwrap();
            let user = UserAccount::new("x", "X", "Y");
            store.create_user(&user).unwrap();

            let err = store.create_session(user.id).unwrap_err();
            assert!(matches!(err, Error::Other(_)), "got {err}");
            assert!(store.sessions_for_user(user.id).unwrap().is_empty());
        }
    }

    #[test]
    fn expiry_past_year_9999_is_refused() {
        let (store, user) = store_with_user();
        let session = store.create_session(user.id).unwrap();
        let far = session.created_at + Duration::days(9000 * 366);
        assert!(store.set_session_expiry(session.id, far).is_err());
        assert_eq!(store.get_session(session.id).unwrap().unwrap(), session);
    }

    #[test]
    fn expiry_is_stored_at_microsecond_precision() {
        let (store, user) = store_with_user();
        let session = store.create_session(user.id).unwrap();
        let later = session.expires_at + Duration::nanoseconds(1_234_567);
        store.set_session_expiry(session.id, later).unwrap();

        let loaded = store.get_session(session.id).unwrap().unwrap();
        assert_eq!(loaded.expires_at, later.trunc_subsecs(6));
        assert_eq!(loaded.expires_at - session.expires_at, Duration::microseconds(1_234));
    }

    #[test]
    fn each_session_gets_its_own_creation_time() {
        let (store, user) = store_with_user();
        let first = store.create_session(user.id).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = store.create_session(user.id).unwrap();
        assert!(second.created_at > first.created_at);
        assert_ne!(first.id, second.id);

        let listed = store.sessions_for_user(user.id).unwrap();
        assert_eq!(listed[0].id, second.id);
    }

    #[test]
    fn expiry_must_follow_creation() {
        let (store, user) = store_with_user();
        let mut session = Session::new(user.id, Duration::hours(1)).unwrap();
        session.expires_at = session.created_at - Duration::seconds(1);
        let err = store.insert_session(&session).unwrap_err();
        assert_eq!(err.constraint_kind(), Some(ConstraintKind::Check));
    }

    #[test]
    fn session_for_unknown_user_is_rejected() {
        let store = Store::in_memory().unwrap();
        let err = store.create_session(UserId::new()).unwrap_err();
        assert!(err.is_foreign_key_violation());
    }

    #[test]
    fn purge_removes_only_expired_sessions() {
        let (store, user) = store_with_user();
        let mut stale = Session::new(user.id, Duration::hours(1)).unwrap();
        stale.created_at -= Duration::hours(3);
        stale.expires_at -= Duration::hours(3);
        store.insert_session(&stale).unwrap();
        let live = store.create_session(user.id).unwrap();

        assert_eq!(store.purge_expired_sessions(Utc::now()).unwrap(), 1);
        assert!(store.get_session(stale.id).unwrap().is_none());
        assert!(store.get_session(live.id).unwrap().is_some());
    }

    #[test]
    fn extending_a_session() {
        let (store, user) = store_with_user();
        let session = store.create_session(user.id).unwrap();
        let later = session.expires_at + Duration::hours(6);
        store.set_session_expiry(session.id, later).unwrap();
        assert_eq!(store.get_session(session.id).unwrap().unwrap().expires_at, later);
    }

    #[test]
    fn deleting_user_cascades_to_sessions() {
        let (store, user) = store_with_user();
        let session = store.create_session(user.id).unwrap();

        assert!(store.delete_user(user.id).unwrap());
        assert!(store.get_session(session.id).unwrap().is_none());
        assert!(!store.delete_session(session.id).unwrap());
    }
}
