use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Roles accepted at registration.
pub const ROLES: &[&str] = &["admin", "doctor", "nurse", "patient"];

pub const DEFAULT_ROLE: &str = "patient";

/// Public profile fields of a user, attached to messages and conversations.
/// Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub role: String,
}

/// A stored direct message joined with both participants' profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub sender: UserProfile,
    pub receiver: UserProfile,
}

/// Derived view: one entry per counterpart, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub user: UserProfile,
    pub last_message: MessageView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityView {
    pub id: i64,
    pub user_id: Option<i64>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub entity_name: Option<String>,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub user: Option<UserProfile>,
}
