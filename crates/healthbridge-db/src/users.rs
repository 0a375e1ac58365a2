use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, Row};

use crate::models::UserRow;
use crate::{Database, OptionalExt, format_timestamp};

const USER_COLUMNS: &str =
    "id, name, email, password, role, avatar, is_active, last_login, created_at";

impl Database {
    pub fn create_user(&self, name: &str, email: &str, password_hash: &str, role: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (name, email, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                (name, email, password_hash, role, format_timestamp(Utc::now())),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// The gate used before trusting a credential: the user exists and is active.
    pub fn is_active_user(&self, id: i64) -> Result<bool> {
        Ok(self.get_user_by_id(id)?.is_some_and(|u| u.is_active))
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("UPDATE users SET is_active = ?1 WHERE id = ?2", (active, id))?;
            Ok(())
        })
    }

    pub fn touch_last_login(&self, id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                (format_timestamp(Utc::now()), id),
            )?;
            Ok(())
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY name COLLATE NOCASE, id"
            ))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, predicate: &str, value: P) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {predicate}"))?;
    stmt.query_row([value], map_user).optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        avatar: row.get(5)?,
        is_active: row.get(6)?,
        last_login: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_user("Alice", "alice@example.org", "hash", "doctor").unwrap();

        let by_email = db.get_user_by_email("alice@example.org").unwrap().unwrap();
        assert_eq!(by_email.id, id);
        assert_eq!(by_email.role, "doctor");
        assert!(by_email.is_active);

        assert!(db.get_user_by_id(id + 1).unwrap().is_none());
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("Alice", "alice@example.org", "hash", "patient").unwrap();
        assert!(db.create_user("Other", "alice@example.org", "hash", "patient").is_err());
    }

    #[test]
    fn inactive_users_fail_the_gate() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_user("Bob", "bob@example.org", "hash", "nurse").unwrap();
        assert!(db.is_active_user(id).unwrap());

        db.set_user_active(id, false).unwrap();
        assert!(!db.is_active_user(id).unwrap());
        assert!(!db.is_active_user(999).unwrap());
    }
}
