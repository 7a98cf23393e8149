use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use super::error::ApiError;
use crate::{
    middlewares::auth::JwtClaims,
    services::{stats_service::StatsService, AppState},
};

/// GET /api/v1/stats/me
pub async fn my_overview(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Getting performance overview for user: {}", claims.sub);
    let overview = StatsService::new(state.store.clone())
        .overview(&claims.sub)
        .await?;
    Ok(Json(overview))
}

/// GET /api/v1/stats/questions/{id}
pub async fn my_question_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = StatsService::new(state.store.clone())
        .question_history(&claims.sub, &question_id)
        .await?;
    Ok(Json(history))
}
