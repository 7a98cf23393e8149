use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod quiz;
pub mod services;
pub mod store;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        // Everything under /api/v1 requires a bearer token
        .nest(
            "/api/v1",
            api_routes().route_layer(middleware::from_fn_with_state(
                app_state.clone(),
                middlewares::auth::auth_middleware,
            )),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(middlewares::metrics::metrics_middleware))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/sessions", sessions_routes())
        .route("/questions", get(handlers::questions::search_questions))
        .route("/questions/{id}", get(handlers::questions::get_question))
        .route("/areas", get(handlers::questions::list_areas))
        .route("/favorites", get(handlers::favorites::list_favorites))
        .route(
            "/favorites/{question_id}/toggle",
            post(handlers::favorites::toggle_favorite),
        )
        .route("/notes", get(handlers::notes::list_notes))
        .route(
            "/notes/{question_id}",
            get(handlers::notes::get_note)
                .put(handlers::notes::upsert_note)
                .delete(handlers::notes::delete_note),
        )
        .route("/stats/me", get(handlers::stats::my_overview))
        .route(
            "/stats/questions/{id}",
            get(handlers::stats::my_question_history),
        )
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::sessions::create_session))
        .route(
            "/{id}",
            get(handlers::sessions::get_session).delete(handlers::sessions::abandon_session),
        )
        .route("/{id}/question", get(handlers::sessions::current_question))
        .route("/{id}/answers", post(handlers::sessions::submit_answer))
        .route("/{id}/next", post(handlers::sessions::next_question))
        .route("/{id}/previous", post(handlers::sessions::previous_question))
        .route("/{id}/jump", post(handlers::sessions::jump_to_question))
        .route("/{id}/complete", post(handlers::sessions::complete_session))
        .route("/{id}/stream", get(handlers::sse::session_stream))
}
