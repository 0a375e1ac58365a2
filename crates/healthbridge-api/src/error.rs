use axum::Json;
use axum::extract::{Request, State, rejection::JsonRejection};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use healthbridge_gateway::messenger::SendError;

use crate::state::AppState;

/// Detail of a 500, carried on the response until `attach_error_detail`
/// decides whether the client may see it.
#[derive(Debug, Clone)]
struct InternalDetail(String);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Token expired")]
    TokenExpired,
    #[error("Account disabled")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, internal) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Invalid or missing token".to_string(), None),
            ApiError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired".to_string(), None),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Account disabled".to_string(), None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(InternalDetail(format!("{:#}", e))),
                )
            }
        };

        let mut response = (
            status,
            Json(ErrorBody {
                success: false,
                message,
                detail: None,
            }),
        )
            .into_response();
        if let Some(internal) = internal {
            response.extensions_mut().insert(internal);
        }
        response
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

/// Echo internal error detail in the body when the settings allow it
/// (development mode). Otherwise clients only see the generic message.
pub async fn attach_error_detail(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let Some(InternalDetail(detail)) = response.extensions_mut().remove::<InternalDetail>() else {
        return response;
    };
    if !state.settings.expose_error_detail {
        return response;
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            success: false,
            message: "Internal server error".to_string(),
            detail: Some(detail),
        }),
    )
        .into_response()
}

impl From<SendError> for ApiError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Validation(msg) => ApiError::Validation(msg),
            SendError::UnknownReceiver(id) => ApiError::NotFound(format!("User {} not found", id)),
            SendError::Persistence(e) => ApiError::Internal(e),
        }
    }
}

/// Join error from `spawn_blocking`, surfaced as a generic 500.
pub fn join_error(e: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e))
}
