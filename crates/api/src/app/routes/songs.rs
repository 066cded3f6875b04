use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Router,
};

use songforge_core::ResultId;
use songforge_infra::VideoRequest;

use crate::app::dto::AcceptedResponse;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new().route("/:id/video", post(package_video))
}

/// POST /songs/:id/video
///
/// Queues the packaging step for a finished song. No credit is taken.
pub async fn package_video(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
    body: Result<Json<VideoRequest>, JsonRejection>,
) -> axum::response::Response {
    let song_id: ResultId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid song id"),
    };
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    };

    match services.intake.enqueue_video(user.user_id(), song_id, request).await {
        Ok(accepted) => (StatusCode::ACCEPTED, Json(AcceptedResponse::from(accepted))).into_response(),
        Err(e) => errors::generation_error_to_response(e),
    }
}
