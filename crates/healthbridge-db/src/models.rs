//! Database row types. These map directly to SQLite rows.
//! Timestamps stay as stored text until converted into API views.

use chrono::{DateTime, Utc};
use tracing::warn;

use healthbridge_types::models::{ActivityView, MessageView, UserProfile};

use crate::parse_timestamp;

pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub last_login: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            role: self.role.clone(),
        }
    }
}

/// A message joined with the public profiles of both participants.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<String>,
    pub created_at: String,
    pub sender: UserProfile,
    pub receiver: UserProfile,
}

impl MessageRow {
    pub fn into_view(self) -> MessageView {
        let created_at = timestamp_or_default(&self.created_at, "created_at", self.id);
        let read_at = self
            .read_at
            .as_deref()
            .map(|raw| timestamp_or_default(raw, "read_at", self.id));

        MessageView {
            id: self.id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            is_read: self.is_read,
            read_at,
            created_at,
            sender: self.sender,
            receiver: self.receiver,
        }
    }
}

pub struct NewActivity {
    pub user_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub entity_name: Option<String>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
}

pub struct ActivityRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub entity_name: Option<String>,
    pub description: Option<String>,
    pub metadata: String,
    pub created_at: String,
    pub user: Option<UserProfile>,
}

impl ActivityRow {
    pub fn into_view(self) -> ActivityView {
        let metadata = serde_json::from_str(&self.metadata).unwrap_or_else(|e| {
            warn!("Corrupt metadata on activity {}: {}", self.id, e);
            serde_json::Value::Null
        });

        ActivityView {
            id: self.id,
            user_id: self.user_id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            entity_name: self.entity_name,
            description: self.description,
            metadata,
            created_at: timestamp_or_default(&self.created_at, "created_at", self.id),
            user: self.user,
        }
    }
}

fn timestamp_or_default(raw: &str, column: &str, row_id: i64) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on row {}: {}", column, raw, row_id, e);
        DateTime::default()
    })
}
