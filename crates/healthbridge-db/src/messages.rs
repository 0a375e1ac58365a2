//! Message Store: the only writer of `messages` rows.
//!
//! Rows are appended on send, flipped to read in bulk when the receiver
//! loads a thread, and removed only by the retention purge.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};

use healthbridge_types::models::UserProfile;

use crate::models::MessageRow;
use crate::{Database, OptionalExt, format_timestamp};

/// JOIN users twice to fetch both profiles in one query (no N+1).
const MESSAGE_SELECT: &str = "
    SELECT m.id, m.sender_id, m.receiver_id, m.content, m.is_read, m.read_at, m.created_at,
           s.id, s.name, s.email, s.avatar, s.role,
           r.id, r.name, r.email, r.avatar, r.role
    FROM messages m
    JOIN users s ON s.id = m.sender_id
    JOIN users r ON r.id = m.receiver_id";

/// Rows exchanged by a pair, in both directions.
const PAIR_FILTER: &str = "
    (m.sender_id = ?1 AND m.receiver_id = ?2) OR (m.sender_id = ?2 AND m.receiver_id = ?1)";

/// One page of a thread, oldest first.
pub struct ThreadPage {
    pub messages: Vec<MessageRow>,
    pub total: u64,
    /// Rows flipped to read by this fetch. Zero on a repeated fetch.
    pub marked_read: usize,
}

impl Database {
    pub fn insert_message(&self, sender_id: i64, receiver_id: i64, content: &str) -> Result<MessageRow> {
        self.insert_message_at(sender_id, receiver_id, content, Utc::now())
    }

    /// Insert with an explicit creation time and return the stored row with profiles.
    pub fn insert_message_at(
        &self,
        sender_id: i64,
        receiver_id: i64,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, receiver_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sender_id, receiver_id, content, format_timestamp(created_at)],
            )?;
            let id = conn.last_insert_rowid();
            query_message(conn, id)?.ok_or_else(|| anyhow!("Message {} vanished after insert", id))
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    /// Fetch one page of the thread between `user_id` and `counterpart_id`.
    ///
    /// Every unread message sent by the counterpart to `user_id` is marked
    /// read first, whatever the page number, so the returned rows already
    /// carry their read state. Pages are cut newest-first and returned
    /// oldest-first.
    pub fn list_thread(
        &self,
        user_id: i64,
        counterpart_id: i64,
        page: u32,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<ThreadPage> {
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = (page as i64 - 1) * limit as i64;

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let marked_read = mark_read(&tx, user_id, counterpart_id, now)?;

            let total: u64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM messages m WHERE {PAIR_FILTER}"),
                rusqlite::params![user_id, counterpart_id],
                |row| row.get(0),
            )?;

            let mut messages = {
                let mut stmt = tx.prepare(&format!(
                    "{MESSAGE_SELECT} WHERE {PAIR_FILTER}
                     ORDER BY m.created_at DESC, m.id DESC
                     LIMIT ?3 OFFSET ?4"
                ))?;
                stmt.query_map(
                    rusqlite::params![user_id, counterpart_id, limit, offset],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?
            };
            messages.reverse();

            tx.commit()?;

            Ok(ThreadPage {
                messages,
                total,
                marked_read,
            })
        })
    }

    /// Every message the user sent or received, newest first.
    pub fn list_user_messages(&self, user_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{MESSAGE_SELECT} WHERE m.sender_id = ?1 OR m.receiver_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC"
            ))?;
            let rows = stmt
                .query_map([user_id], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete read messages created strictly before `cutoff`. Unread rows are
    /// never touched, whatever their age. Runs as a single DELETE.
    pub fn purge_read_messages_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM messages WHERE is_read = 1 AND created_at < ?1",
                [format_timestamp(cutoff)],
            )?;
            Ok(deleted)
        })
    }
}

fn mark_read(conn: &Connection, reader_id: i64, counterpart_id: i64, now: DateTime<Utc>) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE messages SET is_read = 1, read_at = ?3
         WHERE sender_id = ?2 AND receiver_id = ?1 AND is_read = 0",
        rusqlite::params![reader_id, counterpart_id, format_timestamp(now)],
    )?;
    Ok(updated)
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(&format!("{MESSAGE_SELECT} WHERE m.id = ?1"))?;
    stmt.query_row([id], map_message).optional()
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        content: row.get(3)?,
        is_read: row.get(4)?,
        read_at: row.get(5)?,
        created_at: row.get(6)?,
        sender: map_profile(row, 7)?,
        receiver: map_profile(row, 12)?,
    })
}

fn map_profile(row: &Row<'_>, start: usize) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        id: row.get(start)?,
        name: row.get(start + 1)?,
        email: row.get(start + 2)?,
        avatar: row.get(start + 3)?,
        role: row.get(start + 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("Alice", "alice@example.org", "hash", "doctor").unwrap();
        let bob = db.create_user("Bob", "bob@example.org", "hash", "patient").unwrap();
        (db, alice, bob)
    }

    #[test]
    fn insert_returns_row_with_profiles() {
        let (db, alice, bob) = setup();
        let row = db.insert_message(alice, bob, "Bonjour").unwrap();

        assert_eq!(row.sender_id, alice);
        assert_eq!(row.receiver_id, bob);
        assert_eq!(row.sender.name, "Alice");
        assert_eq!(row.receiver.email, "bob@example.org");
        assert!(!row.is_read);
        assert!(row.read_at.is_none());
    }

    #[test]
    fn empty_content_is_refused_by_the_store() {
        let (db, alice, bob) = setup();
        assert!(db.insert_message(alice, bob, "").is_err());
    }

    #[test]
    fn unknown_receiver_violates_foreign_key() {
        let (db, alice, _) = setup();
        assert!(db.insert_message(alice, 404, "hello").is_err());
    }

    #[test]
    fn thread_is_oldest_first_and_marks_read() {
        let (db, alice, bob) = setup();
        let base = Utc::now() - Duration::minutes(10);
        db.insert_message_at(alice, bob, "one", base).unwrap();
        db.insert_message_at(bob, alice, "two", base + Duration::minutes(1)).unwrap();
        db.insert_message_at(alice, bob, "three", base + Duration::minutes(2)).unwrap();

        let page = db.list_thread(bob, alice, 1, 50, Utc::now()).unwrap();
        let contents: Vec<_> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
        assert_eq!(page.total, 3);
        assert_eq!(page.marked_read, 2);

        for m in &page.messages {
            if m.receiver_id == bob {
                assert!(m.is_read);
                assert!(m.read_at.is_some());
            } else {
                // Bob's own message to Alice stays unread until Alice looks.
                assert!(!m.is_read);
                assert!(m.read_at.is_none());
            }
        }
    }

    #[test]
    fn repeated_fetch_marks_nothing_new() {
        let (db, alice, bob) = setup();
        db.insert_message(alice, bob, "hello").unwrap();

        let first = db.list_thread(bob, alice, 1, 50, Utc::now()).unwrap();
        let second = db.list_thread(bob, alice, 1, 50, Utc::now()).unwrap();

        assert_eq!(first.marked_read, 1);
        assert_eq!(second.marked_read, 0);
        assert_eq!(
            first.messages.iter().map(|m| m.id).collect::<Vec<_>>(),
            second.messages.iter().map(|m| m.id).collect::<Vec<_>>()
        );
        assert_eq!(first.messages[0].read_at, second.messages[0].read_at);
    }

    #[test]
    fn any_page_marks_the_whole_unread_set() {
        let (db, alice, bob) = setup();
        let base = Utc::now() - Duration::hours(1);
        for i in 0..5 {
            db.insert_message_at(alice, bob, &format!("m{i}"), base + Duration::seconds(i)).unwrap();
        }

        let page2 = db.list_thread(bob, alice, 2, 2, Utc::now()).unwrap();
        let contents: Vec<_> = page2.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m1", "m2"]);
        assert_eq!(page2.marked_read, 5);
    }

    #[test]
    fn purge_spares_unread_and_recent() {
        let (db, alice, bob) = setup();
        let old = Utc::now() - Duration::days(31);
        let read_old = db.insert_message_at(alice, bob, "read old", old).unwrap();
        let unread_old = db.insert_message_at(bob, alice, "unread old", old).unwrap();
        db.list_thread(bob, alice, 1, 50, Utc::now()).unwrap();
        let read_recent = db.insert_message(alice, bob, "read recent").unwrap();
        db.list_thread(bob, alice, 1, 50, Utc::now()).unwrap();

        let deleted = db
            .purge_read_messages_before(Utc::now() - Duration::days(30))
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(db.get_message(read_old.id).unwrap().is_none());
        assert!(db.get_message(unread_old.id).unwrap().is_some());
        assert!(db.get_message(read_recent.id).unwrap().is_some());
    }
}
