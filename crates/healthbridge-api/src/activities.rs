use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use healthbridge_db::activities::ActivityFilter;
use healthbridge_types::api::{PageResponse, Pagination};
use healthbridge_types::models::ActivityView;

use crate::error::{ApiError, join_error};
use crate::messages::MAX_PAGE_SIZE;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub user_id: Option<i64>,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

pub async fn list_activities(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
    let filter = ActivityFilter {
        action: query.action.filter(|a| !a.is_empty()),
        entity_type: query.entity_type.filter(|t| !t.is_empty()),
        user_id: query.user_id,
    };

    let db = state.db.clone();
    let (rows, total) = tokio::task::spawn_blocking(move || db.list_activities(&filter, page, limit))
        .await
        .map_err(join_error)??;

    let data: Vec<ActivityView> = rows.into_iter().map(|row| row.into_view()).collect();

    Ok(Json(PageResponse {
        success: true,
        data,
        pagination: Pagination::new(total, page, limit),
    }))
}
