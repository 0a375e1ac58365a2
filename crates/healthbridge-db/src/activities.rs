use anyhow::Result;
use chrono::Utc;
use rusqlite::types::ToSql;

use healthbridge_types::models::UserProfile;

use crate::models::{ActivityRow, NewActivity};
use crate::{Database, format_timestamp};

#[derive(Debug, Default, Clone)]
pub struct ActivityFilter {
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub user_id: Option<i64>,
}

impl Database {
    /// Insert an audit record. A user id that does not resolve to an existing
    /// user is stored as NULL rather than failing the insert.
    pub fn insert_activity(&self, activity: &NewActivity) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO activities
                    (user_id, action, entity_type, entity_id, entity_name, description, metadata, created_at)
                 VALUES ((SELECT id FROM users WHERE id = ?1), ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    activity.user_id,
                    activity.action,
                    activity.entity_type,
                    activity.entity_id,
                    activity.entity_name,
                    activity.description,
                    activity.metadata.to_string(),
                    format_timestamp(Utc::now()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Newest first, with the acting user's profile when known.
    pub fn list_activities(&self, filter: &ActivityFilter, page: u32, limit: u32) -> Result<(Vec<ActivityRow>, u64)> {
        let page = page.max(1);
        let limit = limit.max(1);
        let offset = (page as i64 - 1) * limit as i64;

        let mut clauses: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(action) = &filter.action {
            clauses.push("a.action = ?");
            params.push(Box::new(action.clone()));
        }
        if let Some(entity_type) = &filter.entity_type {
            clauses.push("a.entity_type = ?");
            params.push(Box::new(entity_type.clone()));
        }
        if let Some(user_id) = filter.user_id {
            clauses.push("a.user_id = ?");
            params.push(Box::new(user_id));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        self.with_conn(|conn| {
            let filter_params: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            let total: u64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM activities a {where_sql}"),
                filter_params.as_slice(),
                |row| row.get(0),
            )?;

            let mut page_params = filter_params.clone();
            page_params.push(&limit);
            page_params.push(&offset);

            let mut stmt = conn.prepare(&format!(
                "SELECT a.id, a.user_id, a.action, a.entity_type, a.entity_id, a.entity_name,
                        a.description, a.metadata, a.created_at,
                        u.id, u.name, u.email, u.avatar, u.role
                 FROM activities a
                 LEFT JOIN users u ON u.id = a.user_id
                 {where_sql}
                 ORDER BY a.created_at DESC, a.id DESC
                 LIMIT ? OFFSET ?"
            ))?;

            let rows = stmt
                .query_map(page_params.as_slice(), |row| {
                    let user = match row.get::<_, Option<i64>>(9)? {
                        Some(id) => Some(UserProfile {
                            id,
                            name: row.get(10)?,
                            email: row.get(11)?,
                            avatar: row.get(12)?,
                            role: row.get(13)?,
                        }),
                        None => None,
                    };
                    Ok(ActivityRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        action: row.get(2)?,
                        entity_type: row.get(3)?,
                        entity_id: row.get(4)?,
                        entity_name: row.get(5)?,
                        description: row.get(6)?,
                        metadata: row.get(7)?,
                        created_at: row.get(8)?,
                        user,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok((rows, total))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(user_id: Option<i64>, action: &str) -> NewActivity {
        NewActivity {
            user_id,
            action: action.to_string(),
            entity_type: "Message".to_string(),
            entity_id: None,
            entity_name: None,
            description: None,
            metadata: serde_json::json!({ "k": 1 }),
        }
    }

    #[test]
    fn unknown_user_is_stored_as_null() {
        let db = Database::open_in_memory().unwrap();
        db.insert_activity(&activity(Some(42), "CREATE")).unwrap();

        let (rows, total) = db.list_activities(&ActivityFilter::default(), 1, 50).unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].user_id, None);
        assert!(rows[0].user.is_none());
    }

    #[test]
    fn filters_and_pages() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("Alice", "alice@example.org", "hash", "admin").unwrap();
        for _ in 0..3 {
            db.insert_activity(&activity(Some(alice), "LOGIN")).unwrap();
        }
        db.insert_activity(&activity(None, "ARCHIVE")).unwrap();

        let filter = ActivityFilter {
            action: Some("LOGIN".into()),
            user_id: Some(alice),
            ..Default::default()
        };
        let (rows, total) = db.list_activities(&filter, 2, 2).unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user.as_ref().unwrap().name, "Alice");

        let view = rows.into_iter().next().unwrap().into_view();
        assert_eq!(view.metadata["k"], 1);
    }
}
