use std::sync::Arc;

use axum::{
    extract::{Extension, Json, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};

use songforge_infra::{NudgeRequest, SongRequest};

use crate::app::dto::AcceptedResponse;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new()
        .route("/song", post(generate_song))
        .route("/nudge", post(generate_nudge))
}

/// POST /generate/song
pub async fn generate_song(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<SongRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    };

    match services.intake.enqueue_song(user.user_id(), request).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(AcceptedResponse::from(accepted))).into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}

/// POST /generate/nudge
pub async fn generate_nudge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    body: Result<Json<NudgeRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    };

    match services.intake.enqueue_nudge(user.user_id(), request).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(AcceptedResponse::from(accepted))).into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}
