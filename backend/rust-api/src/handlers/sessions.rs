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
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{CreateSessionRequest, JumpRequest, SubmitAnswerRequest},
    services::{session_service::SessionService, AppState},
};

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Creating session for user_id={}, mode={}",
        claims.sub,
        req.mode.as_str()
    );

    let service = SessionService::new(&state);
    let view = service.create_session(&claims.sub, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(&state);
    let view = service
        .get_session(&session_id, &claims.sub, Utc::now())
        .await?;
    Ok(Json(view))
}

pub async fn current_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(&state);
    let question = service
        .current_question(&session_id, &claims.sub, Utc::now())
        .await?;
    Ok(Json(question))
}

pub async fn submit_answer(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Submitting answer for session: {}", session_id);

    let service = SessionService::new(&state);
    let response = service
        .submit_answer(&session_id, &claims.sub, &req, Utc::now())
        .await?;
    Ok(Json(response))
}

pub async fn next_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(&state);
    let response = service
        .next_question(&session_id, &claims.sub, Utc::now())
        .await?;
    Ok(Json(response))
}

pub async fn previous_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(&state);
    let response = service
        .previous_question(&session_id, &claims.sub, Utc::now())
        .await?;
    Ok(Json(response))
}

pub async fn jump_to_question(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<JumpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(&state);
    let response = service
        .jump_to(&session_id, &claims.sub, req.index, Utc::now())
        .await?;
    Ok(Json(response))
}

pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Completing session: {}", session_id);

    let service = SessionService::new(&state);
    let response = service
        .complete_session(&session_id, &claims.sub, Utc::now())
        .await?;
    Ok(Json(response))
}

pub async fn abandon_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Abandoning session: {}", session_id);

    let service = SessionService::new(&state);
    let sync = service
        .abandon_session(&session_id, &claims.sub, Utc::now())
        .await?;
    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "abandoned": true,
        "sync": sync,
    })))
}
