use serde::{Deserialize, Serialize};

use crate::models::{MessageView, UserProfile};

// -- JWT Claims --

/// JWT claims shared across healthbridge-api (bearer middleware) and the
/// gateway handshake. Both sides must agree on this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user: UserProfile,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPresence {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub is_online: bool,
}

// -- Messages --

/// Body of `POST /messages/send` and payload of the gateway `SendMessage`
/// command. Fields are optional so that a missing value surfaces as a
/// validation error instead of a deserialization rejection. Unknown fields
/// are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub receiver_id: Option<i64>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

impl Pagination {
    pub fn new(total: u64, page: u32, limit: u32) -> Self {
        let limit = limit.max(1);
        Self {
            total,
            page,
            limit,
            pages: total.div_ceil(limit as u64),
        }
    }
}

// -- Envelopes --

#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub success: bool,
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: String,
    pub data: MessageView,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveResponse {
    pub success: bool,
    pub message: String,
    pub deleted_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}
