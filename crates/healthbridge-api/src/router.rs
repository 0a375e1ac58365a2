use axum::{
    Json, Router, middleware,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use healthbridge_types::api::HealthResponse;

use crate::error::attach_error_detail;
use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{activities, auth, gateway, messages};

/// The full HTTP surface: public auth routes, bearer-protected routes and
/// the gateway handshake.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/auth/profile", get(auth::profile))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/all-users", get(auth::all_users))
        .route("/auth/online-users", get(auth::online_users))
        .route("/messages/conversations", get(messages::get_conversations))
        .route("/messages/send", post(messages::send_message))
        .route("/messages/archive", post(messages::archive_messages))
        .route("/messages/{counterpart_id}", get(messages::get_messages))
        .route("/activities", get(activities::list_activities))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let ws_route = Router::new().route("/gateway", get(gateway::gateway_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(middleware::from_fn_with_state(state.clone(), attach_error_detail))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        message: "HealthBridge API is running".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
