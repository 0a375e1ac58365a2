use axum::{
    extract::{Query, State, WebSocketUpgrade, ws::rejection::WebSocketUpgradeRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use healthbridge_gateway::connection;

use crate::error::ApiError;
use crate::middleware::{authenticate, bearer_token};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// Handshake for the live channel. The credential is checked before the
/// upgrade: a missing, malformed or expired token gets a 401 and the
/// connection never joins a channel.
pub async fn gateway_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()).or_else(|| bearer_token(&headers)) else {
        warn!("Gateway handshake without a token");
        return ApiError::Unauthorized.into_response();
    };

    let user = match authenticate(&state, &token).await {
        Ok(user) => user,
        Err(e) => {
            warn!("Gateway handshake rejected: {}", e);
            return e.into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let messenger = state.messenger.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, messenger, user.id, user.name))
}
