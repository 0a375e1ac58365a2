use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use tracing::warn;

use healthbridge_types::api::Claims;

use crate::error::{ApiError, join_error};
use crate::state::AppState;

/// The caller identity resolved from a verified credential.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub role: String,
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Verify a token the same way for HTTP requests and gateway handshakes:
/// signature, expiry, then the user must still exist and be active.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser, ApiError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.settings.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => ApiError::TokenExpired,
        _ => ApiError::Unauthorized,
    })?;

    let user_id = token_data.claims.sub;
    let db = state.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(user_id))
        .await
        .map_err(join_error)??;

    match user {
        Some(user) if user.is_active => Ok(AuthUser {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
        }),
        Some(_) => {
            warn!("Rejected token for inactive user {}", user_id);
            Err(ApiError::Unauthorized)
        }
        None => {
            warn!("Rejected token for unknown user {}", user_id);
            Err(ApiError::Unauthorized)
        }
    }
}

/// Extract and validate JWT from the Authorization header.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;
    let user = authenticate(&state, &token).await?;
    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
