use std::collections::HashSet;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::json;
use tracing::{info, warn};

use healthbridge_db::models::UserRow;
use healthbridge_types::api::{AuthPayload, Claims, DataResponse, LoginRequest, RegisterRequest, UserPresence};
use healthbridge_types::models::{DEFAULT_ROLE, ROLES, UserProfile};

use crate::error::{ApiError, join_error};
use crate::middleware::AuthUser;
use crate::state::AppState;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_lowercase();
    let role = req.role.unwrap_or_else(|| DEFAULT_ROLE.to_string());

    // Validate input
    let name_len = name.chars().count();
    if !(2..=100).contains(&name_len) {
        return Err(ApiError::Validation("name must be between 2 and 100 characters".into()));
    }
    if !is_plausible_email(&email) {
        return Err(ApiError::Validation("invalid email".into()));
    }
    if req.password.chars().count() < 6 {
        return Err(ApiError::Validation("password must be at least 6 characters".into()));
    }
    if !ROLES.contains(&role.as_str()) {
        return Err(ApiError::Validation("invalid role".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<UserRow>> {
        if db.get_user_by_email(&email)?.is_some() {
            return Ok(None);
        }
        let id = db.create_user(&name, &email, &password_hash, &role)?;
        db.get_user_by_id(id)
    })
    .await
    .map_err(join_error)??
    .ok_or_else(|| ApiError::Conflict("a user with this email already exists".into()))?;

    let token = create_token(&state.settings.jwt_secret, state.settings.token_ttl_hours, user.id, &user.email)?;
    info!("Registered user {} ({})", user.id, user.role);

    Ok((
        StatusCode::CREATED,
        Json(DataResponse::ok(AuthPayload {
            user: user.profile(),
            token,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_email(&email))
        .await
        .map_err(join_error)??
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|e| anyhow::anyhow!("corrupt password hash: {}", e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            warn!("Failed login for user {}", user.id);
            ApiError::Unauthorized
        })?;

    if !user.is_active {
        return Err(ApiError::Forbidden);
    }

    let db = state.db.clone();
    let user_id = user.id;
    tokio::task::spawn_blocking(move || db.touch_last_login(user_id))
        .await
        .map_err(join_error)??;

    state.activity.login(user.id, &user.name);

    let token = create_token(&state.settings.jwt_secret, state.settings.token_ttl_hours, user.id, &user.email)?;

    Ok(Json(DataResponse::ok(AuthPayload {
        user: user.profile(),
        token,
    })))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(caller.id))
        .await
        .map_err(join_error)??
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    Ok(Json(DataResponse::ok(user.profile())))
}

/// Tokens are stateless; logging out only leaves an audit record.
pub async fn logout(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthUser>,
) -> impl IntoResponse {
    state.activity.logout(caller.id, &caller.name);
    Json(json!({ "success": true, "message": "Logged out" }))
}

/// Every user, online ones first, then by name.
pub async fn all_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let online: HashSet<i64> = state.dispatcher().online_user_ids().await.into_iter().collect();

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_users())
        .await
        .map_err(join_error)??;

    let mut users: Vec<UserPresence> = rows
        .iter()
        .map(|row| UserPresence {
            profile: row.profile(),
            is_online: online.contains(&row.id),
        })
        .collect();
    // Stable sort keeps the name order inside each group
    users.sort_by_key(|u| !u.is_online);

    Ok(Json(DataResponse::ok(users)))
}

/// Users with at least one live gateway connection.
pub async fn online_users(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let online: HashSet<i64> = state.dispatcher().online_user_ids().await.into_iter().collect();

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_users())
        .await
        .map_err(join_error)??;

    let users: Vec<UserProfile> = rows
        .iter()
        .filter(|row| online.contains(&row.id))
        .map(|row| row.profile())
        .collect();

    Ok(Json(DataResponse::ok(users)))
}

/// Longest accepted token lifetime: one year.
pub const MAX_TOKEN_TTL_HOURS: i64 = 24 * 365;

pub fn create_token(secret: &str, ttl_hours: i64, user_id: i64, email: &str) -> anyhow::Result<String> {
    let expires_at = chrono::Duration::try_hours(ttl_hours)
        .and_then(|ttl| chrono::Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| anyhow::anyhow!("token lifetime of {} hours is out of range", ttl_hours))?;

    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: expires_at.timestamp().max(0) as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && !domain.is_empty() && !domain.contains('@') && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}
