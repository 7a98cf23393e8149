use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use std::sync::Arc;

use super::error::ApiError;
use crate::{
    extractors::ValidatedJson,
    middlewares::auth::JwtClaims,
    models::UpsertNoteRequest,
    services::{note_service::NoteService, AppState},
};

pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let notes = NoteService::new(state.store.clone()).list(&claims.sub).await?;
    Ok(Json(notes))
}

pub async fn get_note(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    NoteService::new(state.store.clone())
        .get(&claims.sub, &question_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no note for question {}", question_id)))
}

pub async fn upsert_note(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpsertNoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let note = NoteService::new(state.store.clone())
        .upsert(&claims.sub, &question_id, &req.content, Utc::now())
        .await?;
    Ok(Json(note))
}

pub async fn delete_note(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(question_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = NoteService::new(state.store.clone())
        .delete(&claims.sub, &question_id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no note for question {}", question_id)))
    }
}
