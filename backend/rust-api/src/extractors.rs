use axum::{
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use validator::Validate;

fn bad_request(code: &str, message: String) -> Response {
    tracing::warn!("{}", message);
    let body = json!({
        "error": code,
        "message": message,
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

/// JSON extractor that rejects with a JSON error body instead of plain text.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(bad_request(
                "invalid_json",
                format!("Failed to parse JSON request body: {}", rejection),
            )),
        }
    }
}

/// [`AppJson`] that also runs the payload's `validator` rules.
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: serde::de::DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let AppJson(value) = AppJson::<T>::from_request(req, state).await?;
        value
            .validate()
            .map_err(|errors| bad_request("validation_error", errors.to_string()))?;
        Ok(ValidatedJson(value))
    }
}
