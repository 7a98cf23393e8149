use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use crate::{
    middlewares::auth::JwtClaims,
    models::QuestionView,
    services::{
        favorite_service::FavoriteService,
        question_service::{QuestionSearch, QuestionService},
        AppState,
    },
};

#[derive(Debug, Serialize)]
pub struct QuestionDetail {
    #[serde(flatten)]
    pub question: QuestionView,
    pub favorited: bool,
}

/// GET /api/v1/questions
pub async fn search_questions(
    State(state): State<Arc<AppState>>,
    Query(search): Query<QuestionSearch>,
) -> Result<impl IntoResponse, ApiError> {
    let service = QuestionService::new(state.store.clone());
    let questions = service.search(&search).await?;
    tracing::debug!("Question search returned {} results", questions.len());
    Ok(Json(questions))
}

/// GET /api/v1/questions/{id}
pub async fn get_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let question = QuestionService::new(state.store.clone())
        .get(&question_id)
        .await?;
    let favorited = FavoriteService::new(state.store.clone(), state.favorite_toggles.clone())
        .is_favorite(&claims.sub, &question_id)
        .await?;

    Ok(Json(QuestionDetail {
        question: QuestionView::from(&question),
        favorited,
    }))
}

/// GET /api/v1/areas
pub async fn list_areas(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let areas = QuestionService::new(state.store.clone()).areas().await?;
    Ok(Json(areas))
}
