use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use super::error::ApiError;
use crate::{
    middlewares::auth::JwtClaims,
    services::{favorite_service::FavoriteService, AppState},
};

fn service(state: &AppState) -> FavoriteService {
    FavoriteService::new(state.store.clone(), state.favorite_toggles.clone())
}

pub async fn list_favorites(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let favorites = service(&state).list(&claims.sub).await?;
    Ok(Json(favorites))
}

pub async fn toggle_favorite(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let toggle = service(&state).toggle(&claims.sub, &question_id).await?;
    Ok(Json(toggle))
}
