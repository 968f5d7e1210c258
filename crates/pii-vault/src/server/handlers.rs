//! Axum request handlers for all service endpoints.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{
    ContactForm, ErrorResponse, HealthResponse, RecordsResponse, RootResponse, SubmitResponse,
};
use common::ServiceError;
use tracing::{error, warn};

use super::state::AppState;
use crate::lifecycle::LifecycleState;

/// Body of `GET /`.
pub const BANNER: &str = "Encryption PoC is running. POST /submit with form data.";

/// `GET /`: service banner.
pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: BANNER.into(),
    })
}

/// `POST /submit`: validate a contact form, encrypt it, and store it.
pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<ContactForm>, JsonRejection>,
) -> Response {
    let form = match payload {
        Ok(Json(form)) => form,
        Err(rejection) => {
            return error_response(ServiceError::BadRequest(rejection.body_text()));
        }
    };
    if let Err(e) = form.validate() {
        return error_response(e);
    }

    match state.submission.submit(&form).await {
        Ok(_) => (StatusCode::OK, Json(SubmitResponse::ok())).into_response(),
        Err(e) => error_response(e.into()),
    }
}

/// `GET /etl/records`: decrypt and return every stored record.
pub async fn records(State(state): State<AppState>) -> Response {
    match state.decryption.decrypt_all().await {
        Ok(records) => (StatusCode::OK, Json(RecordsResponse { records })).into_response(),
        Err(e) => error_response(e.into()),
    }
}

/// `GET /health`: readiness check.
///
/// Returns `200 OK` while an active key exists and no recovery is running.
/// Returns `503 Service Unavailable` otherwise, including when the store
/// cannot be queried.
pub async fn health(State(state): State<AppState>) -> Response {
    let key_state = match state.lifecycle.state().await {
        Ok(s) => s.as_str(),
        Err(e) => {
            warn!(error = %e, "health check could not read key state");
            "unknown"
        }
    };

    let (status_code, status_str) = if key_state == LifecycleState::Active.as_str() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status_str.into(),
        key_state: key_state.into(),
    };
    (status_code, Json(body)).into_response()
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

fn error_response(err: ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!(code = err.code(), error = %err, "request failed");
    } else {
        warn!(code = err.code(), error = %err, "request rejected");
    }
    (status, Json(ErrorResponse::from(&err))).into_response()
}
